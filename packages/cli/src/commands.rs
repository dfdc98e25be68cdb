//! Subcommand implementations shared by the flag-driven and interactive
//! entry points.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crime_map_cli_utils::{IndicatifProgress, MultiProgress};
use crime_map_hotspot::config::{load_config, validate};
use crime_map_hotspot::dataset::Dataset;
use crime_map_hotspot::pipeline::{EngineRun, run_all};
use crime_map_hotspot::prepare::{PrepareOptions, prepare_file};
use crime_map_hotspot::report::{HotspotReport, labels_from_column};
use crime_map_hotspot_models::{EngineKind, Linkage, PipelineConfig};

/// Command-line overrides applied on top of the config file.
#[derive(Debug, Default, Clone, clap::Args)]
pub struct ClusterOverrides {
    /// Directory for labeled tables and run records
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
    /// Seed for sampling and k-means
    #[arg(long)]
    pub seed: Option<u64>,
    /// Rows drawn for k-means
    #[arg(long)]
    pub kmeans_sample: Option<usize>,
    /// Rows drawn for DBSCAN
    #[arg(long)]
    pub dbscan_sample: Option<usize>,
    /// Rows drawn for agglomerative clustering
    #[arg(long)]
    pub hierarchical_sample: Option<usize>,
    /// Cluster count for k-means and agglomerative clustering
    #[arg(long)]
    pub k: Option<usize>,
    /// DBSCAN neighborhood radius in scaled units
    #[arg(long)]
    pub eps: Option<f64>,
    /// DBSCAN core-point threshold
    #[arg(long)]
    pub min_samples: Option<usize>,
    /// k-means mini-batch size
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// Agglomerative linkage (ward, average, complete, single)
    #[arg(long)]
    pub linkage: Option<Linkage>,
    /// Skip writing run records
    #[arg(long)]
    pub no_tracking: bool,
}

impl ClusterOverrides {
    /// Applies every set override to `config`.
    pub fn apply(&self, config: &mut PipelineConfig) {
        if let Some(dir) = &self.output_dir {
            config.output_dir.clone_from(dir);
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(n) = self.kmeans_sample {
            config.kmeans.sample_size = n;
        }
        if let Some(n) = self.dbscan_sample {
            config.dbscan.sample_size = n;
        }
        if let Some(n) = self.hierarchical_sample {
            config.hierarchical.sample_size = n;
        }
        if let Some(k) = self.k {
            config.kmeans.k = k;
            config.hierarchical.k = k;
        }
        if let Some(eps) = self.eps {
            config.dbscan.eps = eps;
        }
        if let Some(min_samples) = self.min_samples {
            config.dbscan.min_samples = min_samples;
        }
        if let Some(batch_size) = self.batch_size {
            config.kmeans.batch_size = batch_size;
        }
        if let Some(linkage) = self.linkage {
            config.hierarchical.linkage = linkage;
        }
        if self.no_tracking {
            config.tracking = false;
        }
    }
}

/// Loads `config_path` (or the defaults), applies `overrides` and
/// validates the result.
///
/// # Errors
///
/// Returns an error if the file cannot be loaded or the final config is
/// invalid.
pub fn resolve_config(
    config_path: Option<&Path>,
    overrides: &ClusterOverrides,
) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    let mut config = match config_path {
        Some(path) => load_config(path)?,
        None => PipelineConfig::default(),
    };
    overrides.apply(&mut config);
    validate(&config)?;
    log::debug!("Resolved config: {config:?}");
    Ok(config)
}

/// Prepares a feature table from a raw export.
///
/// # Errors
///
/// Returns an error if preparation fails.
pub async fn prepare(
    multi: &MultiProgress,
    input: PathBuf,
    output: PathBuf,
    options: PrepareOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();
    let spinner = IndicatifProgress::spinner(multi, &format!("Preparing {}", input.display()));

    let stats = tokio::task::spawn_blocking({
        let output = output.clone();
        move || prepare_file(&input, &output, options)
    })
    .await??;

    spinner.finish_and_clear();
    println!(
        "Read {} rows, dropped {}, wrote {} to {} in {:.1}s",
        stats.read,
        stats.dropped,
        stats.written,
        output.display(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

/// Runs `engines` on the feature table at `input` and prints a report per
/// run.
///
/// # Errors
///
/// Returns an error if the table cannot be loaded or any engine run fails.
pub async fn cluster(
    multi: &MultiProgress,
    input: PathBuf,
    config: PipelineConfig,
    engines: &[EngineKind],
) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();

    let spinner = IndicatifProgress::spinner(multi, &format!("Loading {}", input.display()));
    let dataset = Arc::new(tokio::task::spawn_blocking(move || Dataset::from_path(&input)).await??);
    spinner.finish_and_clear();

    let names: Vec<&str> = engines.iter().map(|e| e.display_name()).collect();
    log::info!("Running {} on {} records", names.join(", "), dataset.len());

    let runs = run_all(
        Arc::clone(&dataset),
        Arc::new(config),
        engines,
        |kind| IndicatifProgress::engine_bar(multi, kind),
    )
    .await?;

    for run in &runs {
        print_run(&dataset, run);
    }
    println!("Finished {} runs in {:.1}s", runs.len(), start.elapsed().as_secs_f64());

    Ok(())
}

fn print_run(dataset: &Dataset, run: &EngineRun) {
    println!();
    println!("== {} ==", run.engine.display_name());
    println!("  sample:  {} records", run.sample.len());
    println!(
        "  labels:  {} clusters, {} noise",
        run.assignment.cluster_count(),
        run.assignment.noise_count()
    );
    if run.quality.is_available() {
        println!("  quality: {}", run.quality);
    } else {
        println!("  quality: unavailable (degenerate clustering)");
    }
    for warning in &run.warnings {
        println!("  warning: {warning}");
    }
    println!("  output:  {}", run.output.display());
    if let Some(record) = &run.record {
        println!("  record:  {}", record.display());
    }
    println!();
    print!("{}", HotspotReport::build(dataset, &run.assignment));
}

/// Prints the hotspot report for a labeled table written by an earlier
/// run. `column` defaults to the engine's label column.
///
/// # Errors
///
/// Returns an error if the table cannot be loaded or the label column is
/// missing or malformed.
pub fn report(
    input: &Path,
    engine: EngineKind,
    column: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let dataset = Dataset::from_path(input)?;
    let column = column.unwrap_or_else(|| engine.label_column());
    let assignment = labels_from_column(&dataset, engine, column)?;
    print!("{}", HotspotReport::build(&dataset, &assignment));
    Ok(())
}
