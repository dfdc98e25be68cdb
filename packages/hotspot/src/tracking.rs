//! Per-run experiment records.
//!
//! Every engine run can leave a JSON record under `<output_dir>/runs/` with
//! the parameters it ran with, its quality scores, and the table it wrote.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use crime_map_hotspot_models::{EngineKind, PipelineConfig, QualityMetrics};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::HotspotError;

/// Experiment name stamped on every record.
pub const EXPERIMENT_NAME: &str = "Crime Hotspot Clustering";

/// Subdirectory of the output directory holding run records.
pub const RUNS_DIR: &str = "runs";

/// Quality scores under their tracked names.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    /// Mean silhouette, or `null` when unavailable.
    pub silhouette_score: Option<f64>,
    /// Davies-Bouldin index, or `null` when unavailable.
    pub davies_bouldin_index: Option<f64>,
}

impl From<QualityMetrics> for RunMetrics {
    fn from(metrics: QualityMetrics) -> Self {
        Self {
            silhouette_score: metrics.silhouette,
            davies_bouldin_index: metrics.davies_bouldin,
        }
    }
}

/// One tracked engine run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub experiment: String,
    pub engine: EngineKind,
    pub params: BTreeMap<String, Value>,
    pub metrics: RunMetrics,
    /// Labeled table written by the run.
    pub artifact: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl RunRecord {
    /// Creates a record with a fresh run id.
    #[must_use]
    pub fn new(
        engine: EngineKind,
        config: &PipelineConfig,
        metrics: QualityMetrics,
        artifact: PathBuf,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        let duration_ms = (finished_at - started_at)
            .num_milliseconds()
            .try_into()
            .unwrap_or(0);

        Self {
            run_id: Uuid::new_v4(),
            experiment: EXPERIMENT_NAME.to_string(),
            engine,
            params: engine_params(engine, config),
            metrics: metrics.into(),
            artifact,
            started_at,
            finished_at,
            duration_ms,
        }
    }

    /// File name of this record: `<engine>-<run id>.json`.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}-{}.json", self.engine, self.run_id)
    }
}

/// The parameters that shaped `engine`'s run.
#[must_use]
pub fn engine_params(engine: EngineKind, config: &PipelineConfig) -> BTreeMap<String, Value> {
    let mut params = BTreeMap::new();
    params.insert("algorithm".to_string(), json!(engine.display_name()));
    params.insert("seed".to_string(), json!(config.seed));

    let specific = match engine {
        EngineKind::Kmeans => {
            let p = &config.kmeans;
            json!({
                "sample_size": p.sample_size,
                "n_clusters": p.k,
                "batch_size": p.batch_size,
                "max_iter": p.max_iter,
                "tol": p.tol,
                "max_no_improvement": p.max_no_improvement,
                "init_size": p.init_size,
            })
        }
        EngineKind::Dbscan => {
            let p = &config.dbscan;
            json!({
                "sample_size": p.sample_size,
                "eps": p.eps,
                "min_samples": p.min_samples,
            })
        }
        EngineKind::Hierarchical => {
            let p = &config.hierarchical;
            json!({
                "sample_size": p.sample_size,
                "n_clusters": p.k,
                "linkage": p.linkage,
            })
        }
    };

    if let Value::Object(map) = specific {
        params.extend(map);
    }
    params
}

/// Writes `record` to `<output_dir>/runs/<engine>-<run id>.json` and returns
/// the path.
///
/// # Errors
///
/// Returns [`HotspotError::Io`] if the file cannot be created and
/// [`HotspotError::Json`] if serialization fails.
pub fn write_run_record(record: &RunRecord, output_dir: &Path) -> Result<PathBuf, HotspotError> {
    let dir = output_dir.join(RUNS_DIR);
    std::fs::create_dir_all(&dir)?;

    let path = dir.join(record.file_name());
    let file = std::fs::File::create(&path)?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), record)?;

    log::info!("Recorded {} run {} at {}", record.engine, record.run_id, path.display());
    Ok(path)
}

/// Reads every run record under `<output_dir>/runs/`, oldest first.
///
/// # Errors
///
/// Returns [`HotspotError::Io`] if the directory cannot be listed and
/// [`HotspotError::Json`] if a record is malformed. A missing directory
/// yields an empty list.
pub fn read_run_records(output_dir: &Path) -> Result<Vec<RunRecord>, HotspotError> {
    let dir = output_dir.join(RUNS_DIR);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut records = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            let contents = std::fs::read_to_string(&path)?;
            records.push(serde_json::from_str::<RunRecord>(&contents)?);
        }
    }
    records.sort_by_key(|r| r.started_at);

    Ok(records)
}
