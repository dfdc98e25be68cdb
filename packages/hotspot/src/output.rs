//! Labeled output tables.

use std::path::{Path, PathBuf};

use crime_map_hotspot_models::{ClusterAssignment, EngineKind, PipelineConfig};

use crate::HotspotError;
use crate::dataset::Dataset;

/// Where `engine`'s labeled table goes under `config.output_dir`.
#[must_use]
pub fn output_path(config: &PipelineConfig, engine: EngineKind) -> PathBuf {
    config.output_dir.join(engine.output_file_name())
}

/// Writes every assigned record's source row, in assignment order, with the
/// engine's label column appended. Parent directories are created as
/// needed; an existing file is replaced.
///
/// # Errors
///
/// Returns [`HotspotError::Io`] if the directory or file cannot be created
/// and [`HotspotError::Csv`] if a row cannot be written.
pub fn write_labeled_csv(
    dataset: &Dataset,
    assignment: &ClusterAssignment,
    path: &Path,
) -> Result<(), HotspotError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = csv::Writer::from_path(path)?;

    let mut header = dataset.headers().clone();
    header.push_field(assignment.engine().label_column());
    writer.write_record(&header)?;

    let mut written = 0_usize;
    for (id, label) in assignment.iter() {
        let Some(row) = dataset.row(id) else {
            log::warn!("Record {id} is not in the dataset; skipping");
            continue;
        };
        let mut record = row.clone();
        record.push_field(&label.to_string());
        writer.write_record(&record)?;
        written += 1;
    }

    writer.flush()?;
    log::info!("Wrote {written} labeled rows to {}", path.display());

    Ok(())
}
