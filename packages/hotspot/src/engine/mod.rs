//! Clustering engines.
//!
//! Every engine implements [`ClusterEngine`]: fit on a scaled feature
//! matrix and return one integer label per row. Centroid and hierarchical
//! labels are `0..k`; density labels are `0..m` plus
//! [`NOISE_LABEL`](crime_map_hotspot_models::NOISE_LABEL).

mod dbscan;
mod hierarchical;
mod kmeans;

use crime_map_hotspot_models::{EngineKind, PipelineConfig};
use ndarray::ArrayView1;

pub use dbscan::Dbscan;
pub use hierarchical::Agglomerative;
pub use kmeans::{KMeansModel, MiniBatchKMeans};

/// An engine rejected its parameters or its input matrix.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClusterError {
    /// The input matrix has no rows.
    #[error("cannot cluster an empty matrix")]
    EmptyInput,

    /// `k` is zero or larger than the number of points.
    #[error("invalid cluster count {k} for {n_samples} points")]
    InvalidK {
        /// Requested cluster count.
        k: usize,
        /// Points available.
        n_samples: usize,
    },

    /// A numeric parameter is out of range.
    #[error("invalid parameter {name}: {message}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// The matrix contains NaN or infinite values.
    #[error("input matrix contains non-finite values")]
    NonFinite,

    /// Data and model disagree on the number of columns.
    #[error("dimension mismatch: expected {expected} columns, got {actual}")]
    DimensionMismatch {
        /// Columns the model was fit on.
        expected: usize,
        /// Columns in the input.
        actual: usize,
    },
}

/// Fit-predict contract shared by all engines.
pub trait ClusterEngine: Send + Sync {
    /// Which algorithm this engine runs.
    fn kind(&self) -> EngineKind;

    /// Clusters the rows of `data` and returns one label per row.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError`] if the parameters do not fit the data or the
    /// data contains non-finite values.
    fn fit_predict(&self, data: ndarray::ArrayView2<'_, f64>) -> Result<Vec<i32>, ClusterError>;
}

/// Builds the engine for `kind` from its section of `config`.
#[must_use]
pub fn build(kind: EngineKind, config: &PipelineConfig) -> Box<dyn ClusterEngine> {
    match kind {
        EngineKind::Kmeans => Box::new(MiniBatchKMeans::new(config.kmeans.clone(), config.seed)),
        EngineKind::Dbscan => Box::new(Dbscan::new(config.dbscan.eps, config.dbscan.min_samples)),
        EngineKind::Hierarchical => Box::new(Agglomerative::new(
            config.hierarchical.k,
            config.hierarchical.linkage,
        )),
    }
}

/// Squared Euclidean distance between two rows.
#[inline]
pub(crate) fn squared_distance(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Euclidean distance between two rows.
#[inline]
pub(crate) fn distance(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    squared_distance(a, b).sqrt()
}

pub(crate) fn ensure_finite(data: ndarray::ArrayView2<'_, f64>) -> Result<(), ClusterError> {
    if data.iter().all(|x| x.is_finite()) {
        Ok(())
    } else {
        Err(ClusterError::NonFinite)
    }
}
