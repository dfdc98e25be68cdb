//! Immutable pipeline configuration.
//!
//! One [`PipelineConfig`] value is passed into each pipeline invocation.
//! Every field has a default so partial TOML files deserialize cleanly.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::Linkage;

/// Parameters for the mini-batch k-means engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KMeansParams {
    /// Rows drawn from the dataset for this engine.
    pub sample_size: usize,
    /// Number of clusters.
    pub k: usize,
    /// Points per mini-batch.
    pub batch_size: usize,
    /// Passes over the sample; the batch budget is
    /// `ceil(max_iter * n / batch_size)`.
    pub max_iter: usize,
    /// Center-movement tolerance relative to the mean feature variance.
    /// `0.0` disables the check.
    pub tol: f64,
    /// Stop after this many consecutive batches without improvement of the
    /// smoothed batch inertia. `None` disables the check.
    pub max_no_improvement: Option<usize>,
    /// Points used to seed the initial centroids. Defaults to
    /// `max(3 * batch_size, 3 * k)` capped at the sample size.
    pub init_size: Option<usize>,
}

impl Default for KMeansParams {
    fn default() -> Self {
        Self {
            sample_size: 200_000,
            k: 7,
            batch_size: 10_000,
            max_iter: 100,
            tol: 0.0,
            max_no_improvement: Some(10),
            init_size: None,
        }
    }
}

/// Parameters for the DBSCAN engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbscanParams {
    /// Rows drawn from the dataset for this engine.
    pub sample_size: usize,
    /// Neighborhood radius in scaled feature space (inclusive).
    pub eps: f64,
    /// Neighbors (including the point itself) required for a core point.
    pub min_samples: usize,
}

impl Default for DbscanParams {
    fn default() -> Self {
        Self {
            sample_size: 30_000,
            eps: 0.7,
            min_samples: 50,
        }
    }
}

/// Parameters for the agglomerative engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HierarchicalParams {
    /// Rows drawn from the dataset for this engine.
    pub sample_size: usize,
    /// Number of clusters to stop merging at.
    pub k: usize,
    /// Inter-cluster distance rule.
    pub linkage: Linkage,
}

impl Default for HierarchicalParams {
    fn default() -> Self {
        Self {
            sample_size: 20_000,
            k: 7,
            linkage: Linkage::Ward,
        }
    }
}

/// Everything a clustering run needs besides the dataset itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Seed for sampling and for the k-means engine.
    pub seed: u64,
    /// Directory receiving labeled tables and run records.
    pub output_dir: PathBuf,
    /// Upper bound on the points used for the silhouette score. `None`
    /// scores every non-noise point.
    pub quality_sample_size: Option<usize>,
    /// Whether to write a run record per engine run.
    pub tracking: bool,
    /// Mini-batch k-means parameters.
    pub kmeans: KMeansParams,
    /// DBSCAN parameters.
    pub dbscan: DbscanParams,
    /// Agglomerative parameters.
    pub hierarchical: HierarchicalParams,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            output_dir: PathBuf::from("data/processed"),
            quality_sample_size: Some(20_000),
            tracking: true,
            kmeans: KMeansParams::default(),
            dbscan: DbscanParams::default(),
            hierarchical: HierarchicalParams::default(),
        }
    }
}
