//! Loading and validating [`PipelineConfig`] files.

use std::path::Path;

use crime_map_hotspot_models::PipelineConfig;

/// Errors from reading or validating a pipeline configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Failed to read {path}: {source}")]
    Read {
        /// File that failed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for [`PipelineConfig`].
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A field holds a value no engine can run with.
    #[error("Invalid {field}: {message}")]
    Invalid {
        /// Dotted field path, e.g. `kmeans.k`.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },
}

/// Reads and validates a TOML config file. Missing fields take their
/// defaults.
///
/// # Errors
///
/// Returns [`ConfigError`] if the file cannot be read or parsed, or fails
/// [`validate`].
pub fn load_config(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let config = from_toml_str(&contents)?;
    log::info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Parses and validates a TOML config string.
///
/// # Errors
///
/// Returns [`ConfigError`] if the string is not valid TOML or fails
/// [`validate`].
pub fn from_toml_str(contents: &str) -> Result<PipelineConfig, ConfigError> {
    let config: PipelineConfig = toml::de::from_str(contents)?;
    validate(&config)?;
    Ok(config)
}

fn invalid(field: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        message: message.into(),
    }
}

/// Rejects values no engine can run with.
///
/// Sample sizes larger than the dataset are only detected when a run draws
/// its sample.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] naming the first offending field.
pub fn validate(config: &PipelineConfig) -> Result<(), ConfigError> {
    let positive = [
        ("kmeans.sample_size", config.kmeans.sample_size),
        ("kmeans.k", config.kmeans.k),
        ("kmeans.batch_size", config.kmeans.batch_size),
        ("kmeans.max_iter", config.kmeans.max_iter),
        ("dbscan.sample_size", config.dbscan.sample_size),
        ("dbscan.min_samples", config.dbscan.min_samples),
        ("hierarchical.sample_size", config.hierarchical.sample_size),
        ("hierarchical.k", config.hierarchical.k),
    ];
    if let Some((field, _)) = positive.iter().find(|(_, value)| *value == 0) {
        return Err(invalid(field, "must be greater than 0"));
    }

    if config.kmeans.init_size == Some(0) {
        return Err(invalid("kmeans.init_size", "must be greater than 0"));
    }
    if config.quality_sample_size == Some(0) {
        return Err(invalid("quality_sample_size", "must be greater than 0"));
    }

    let tol = config.kmeans.tol;
    if !tol.is_finite() || tol < 0.0 {
        return Err(invalid(
            "kmeans.tol",
            format!("must be a non-negative number, got {tol}"),
        ));
    }

    let eps = config.dbscan.eps;
    if !eps.is_finite() || eps <= 0.0 {
        return Err(invalid(
            "dbscan.eps",
            format!("must be a positive number, got {eps}"),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use crime_map_hotspot_models::Linkage;

    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        assert_eq!(from_toml_str("").unwrap(), PipelineConfig::default());
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let config = from_toml_str(
            r#"
            seed = 7
            output_dir = "out"
            quality_sample_size = 500

            [dbscan]
            eps = 0.4

            [hierarchical]
            linkage = "average"
            "#,
        )
        .unwrap();

        assert_eq!(config.seed, 7);
        assert_eq!(config.output_dir, Path::new("out"));
        assert_eq!(config.quality_sample_size, Some(500));
        assert!((config.dbscan.eps - 0.4).abs() < f64::EPSILON);
        assert_eq!(config.dbscan.min_samples, 50);
        assert_eq!(config.hierarchical.linkage, Linkage::Average);
        assert_eq!(config.kmeans, PipelineConfig::default().kmeans);
    }

    #[test]
    fn rejects_zero_counts_and_bad_radius() {
        for (toml, field) in [
            ("[kmeans]\nk = 0", "kmeans.k"),
            ("[kmeans]\nbatch_size = 0", "kmeans.batch_size"),
            ("[dbscan]\nmin_samples = 0", "dbscan.min_samples"),
            ("[dbscan]\neps = 0.0", "dbscan.eps"),
            ("[dbscan]\neps = -1.5", "dbscan.eps"),
            ("[hierarchical]\nsample_size = 0", "hierarchical.sample_size"),
            ("quality_sample_size = 0", "quality_sample_size"),
            ("[kmeans]\ntol = -0.1", "kmeans.tol"),
        ] {
            match from_toml_str(toml) {
                Err(ConfigError::Invalid { field: got, .. }) => assert_eq!(got, field, "{toml}"),
                other => panic!("expected invalid {field}, got {other:?}"),
            }
        }
    }

    #[test]
    fn unknown_linkage_is_a_parse_error() {
        assert!(matches!(
            from_toml_str("[hierarchical]\nlinkage = \"centroid\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_config_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "seed = 99\n[kmeans]\nk = 3").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.seed, 99);
        assert_eq!(config.kmeans.k, 3);

        assert!(matches!(
            load_config(Path::new("/definitely/not/here.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
