//! Cluster-quality scores.
//!
//! Noise-labeled points are dropped before scoring. Both scores need at
//! least two clusters and at least one cluster with more than one member;
//! otherwise the clustering is degenerate and the scores are unavailable.

use std::collections::BTreeMap;

use crime_map_hotspot_models::{NOISE_LABEL, QualityMetrics};
use ndarray::{Array2, ArrayView2};

use crate::engine::distance;
use crate::sample::sample_indices;

/// The labels cannot be scored: fewer than two non-noise clusters, or every
/// cluster is a single point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot score {clusters} non-noise clusters over {points} points")]
pub struct DegenerateClusteringError {
    /// Distinct non-noise labels present.
    pub clusters: usize,
    /// Non-noise points considered.
    pub points: usize,
}

/// Why [`try_evaluate`] could not score a clustering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EvaluateError {
    /// The labels do not line up with the data rows.
    #[error("{labels} labels for {rows} rows")]
    LengthMismatch {
        /// Labels given.
        labels: usize,
        /// Rows in the data.
        rows: usize,
    },

    /// The clustering has nothing to compare.
    #[error(transparent)]
    Degenerate(#[from] DegenerateClusteringError),
}

/// Non-noise rows with labels renumbered densely as `0..n_clusters`.
struct Scored {
    rows: Vec<usize>,
    clusters: Vec<usize>,
    n_clusters: usize,
}

impl Scored {
    fn new(labels: &[i32], rows: impl Iterator<Item = usize>) -> Self {
        let mut dense = BTreeMap::new();
        let mut kept = Vec::new();
        let mut clusters = Vec::new();
        for row in rows {
            let label = labels[row];
            if label == NOISE_LABEL {
                continue;
            }
            let next = dense.len();
            clusters.push(*dense.entry(label).or_insert(next));
            kept.push(row);
        }
        Self {
            rows: kept,
            clusters,
            n_clusters: dense.len(),
        }
    }

    fn check(&self) -> Result<(), DegenerateClusteringError> {
        if self.n_clusters < 2 || self.rows.len() <= self.n_clusters {
            return Err(DegenerateClusteringError {
                clusters: self.n_clusters,
                points: self.rows.len(),
            });
        }
        Ok(())
    }

    fn sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_clusters];
        for &c in &self.clusters {
            sizes[c] += 1;
        }
        sizes
    }
}

/// Scores `labels` against `data`.
///
/// When `silhouette_sample` is set and more non-noise points than that are
/// present, the silhouette is computed on a seeded subsample of that size.
///
/// # Errors
///
/// Returns [`EvaluateError::LengthMismatch`] unless there is one label per
/// row, and [`EvaluateError::Degenerate`] if fewer than two non-noise
/// clusters exist or every cluster is a singleton.
pub fn try_evaluate(
    data: ArrayView2<'_, f64>,
    labels: &[i32],
    silhouette_sample: Option<usize>,
    seed: u64,
) -> Result<QualityMetrics, EvaluateError> {
    if labels.len() != data.nrows() {
        return Err(EvaluateError::LengthMismatch {
            labels: labels.len(),
            rows: data.nrows(),
        });
    }

    let scored = Scored::new(labels, 0..labels.len());
    scored.check()?;

    let davies_bouldin = davies_bouldin(data, &scored);

    let silhouette = match silhouette_sample {
        Some(size) if size < scored.rows.len() => {
            let subset = sample_indices(scored.rows.len(), size.max(1), seed)
                .ok()
                .map(|s| {
                    let mut rows: Vec<usize> =
                        s.ids().iter().map(|id| scored.rows[id.0]).collect();
                    rows.sort_unstable();
                    Scored::new(labels, rows.into_iter())
                })
                .filter(|s| s.check().is_ok());
            match subset {
                Some(subset) => {
                    log::debug!(
                        "Silhouette on {} of {} points",
                        subset.rows.len(),
                        scored.rows.len()
                    );
                    silhouette(data, &subset)
                }
                None => silhouette(data, &scored),
            }
        }
        _ => silhouette(data, &scored),
    };

    Ok(QualityMetrics {
        silhouette: Some(silhouette.clamp(-1.0, 1.0)).filter(|s| s.is_finite()),
        davies_bouldin: Some(davies_bouldin.max(0.0)).filter(|db| db.is_finite()),
    })
}

/// Scores `labels` against `data`, returning unavailable metrics (and
/// logging a warning) whenever [`try_evaluate`] fails.
#[must_use]
pub fn evaluate(
    data: ArrayView2<'_, f64>,
    labels: &[i32],
    silhouette_sample: Option<usize>,
    seed: u64,
) -> QualityMetrics {
    match try_evaluate(data, labels, silhouette_sample, seed) {
        Ok(metrics) => metrics,
        Err(e) => {
            log::warn!("Quality metrics unavailable: {e}");
            QualityMetrics::unavailable()
        }
    }
}

/// Mean silhouette over the scored rows. Singleton members score 0.
#[allow(clippy::cast_precision_loss)]
fn silhouette(data: ArrayView2<'_, f64>, scored: &Scored) -> f64 {
    let sizes = scored.sizes();
    let mut sums = vec![0.0; scored.n_clusters];
    let mut total = 0.0;

    for (&i, &own) in scored.rows.iter().zip(&scored.clusters) {
        if sizes[own] <= 1 {
            continue;
        }

        sums.fill(0.0);
        for (&j, &other) in scored.rows.iter().zip(&scored.clusters) {
            if i != j {
                sums[other] += distance(data.row(i), data.row(j));
            }
        }

        let a = sums[own] / (sizes[own] - 1) as f64;
        let b = (0..scored.n_clusters)
            .filter(|&c| c != own)
            .map(|c| sums[c] / sizes[c] as f64)
            .fold(f64::INFINITY, f64::min);

        let spread = a.max(b);
        if spread > 0.0 {
            total += (b - a) / spread;
        }
    }

    total / scored.rows.len() as f64
}

/// Mean over clusters of the worst `(S_i + S_j) / M_ij` ratio, where `S` is
/// the mean distance to the centroid and `M` the centroid distance. Pairs
/// with coincident centroids are skipped.
#[allow(clippy::cast_precision_loss)]
fn davies_bouldin(data: ArrayView2<'_, f64>, scored: &Scored) -> f64 {
    let m = scored.n_clusters;
    let sizes = scored.sizes();

    let mut centroids = Array2::<f64>::zeros((m, data.ncols()));
    for (&row, &c) in scored.rows.iter().zip(&scored.clusters) {
        let mut centroid = centroids.row_mut(c);
        centroid += &data.row(row);
    }
    for (mut centroid, &size) in centroids.rows_mut().into_iter().zip(&sizes) {
        centroid /= size as f64;
    }

    let mut scatter = vec![0.0; m];
    for (&row, &c) in scored.rows.iter().zip(&scored.clusters) {
        scatter[c] += distance(data.row(row), centroids.row(c));
    }
    for (s, &size) in scatter.iter_mut().zip(&sizes) {
        *s /= size as f64;
    }

    let mut total = 0.0;
    for i in 0..m {
        let worst = (0..m)
            .filter(|&j| j != i)
            .filter_map(|j| {
                let separation = distance(centroids.row(i), centroids.row(j));
                (separation > 0.0).then(|| (scatter[i] + scatter[j]) / separation)
            })
            .fold(0.0, f64::max);
        total += worst;
    }

    total / m as f64
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};
    use rand::{Rng as _, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::engine::fixtures;

    #[test]
    fn matches_hand_computed_scores() {
        let data = array![[0.0], [1.0], [4.0], [5.0]];
        let metrics = try_evaluate(data.view(), &[0, 0, 1, 1], None, 0).unwrap();

        let expected = (3.5 / 4.5 + 2.5 / 3.5) / 2.0;
        assert_abs_diff_eq!(metrics.silhouette.unwrap(), expected, epsilon = 1e-12);
        assert_abs_diff_eq!(metrics.davies_bouldin.unwrap(), 0.25, epsilon = 1e-12);
    }

    #[test]
    fn well_separated_groups_score_well() {
        let data = fixtures::two_groups();
        let labels = [0, 0, 0, 0, 0, 1, 1, 1, 1, 1];
        let metrics = try_evaluate(data.view(), &labels, None, 0).unwrap();
        assert!(metrics.silhouette.unwrap() > 0.9);
        assert!(metrics.davies_bouldin.unwrap() < 0.1);
    }

    #[test]
    fn noise_points_are_ignored() {
        let data = array![[0.0], [1.0], [4.0], [5.0], [100.0], [-50.0]];
        let with_noise = try_evaluate(
            data.view(),
            &[0, 0, 1, 1, NOISE_LABEL, NOISE_LABEL],
            None,
            0,
        )
        .unwrap();
        let without = try_evaluate(data.slice(ndarray::s![..4, ..]), &[0, 0, 1, 1], None, 0)
            .unwrap();
        assert_eq!(with_noise, without);
    }

    #[test]
    fn degenerate_clusterings_are_unavailable() {
        let data = array![[0.0], [1.0], [2.0]];
        assert_eq!(
            try_evaluate(data.view(), &[0, 0, 0], None, 0),
            Err(EvaluateError::Degenerate(DegenerateClusteringError {
                clusters: 1,
                points: 3
            }))
        );
        assert_eq!(
            try_evaluate(data.view(), &[NOISE_LABEL; 3], None, 0),
            Err(EvaluateError::Degenerate(DegenerateClusteringError {
                clusters: 0,
                points: 0
            }))
        );
        assert_eq!(
            try_evaluate(data.view(), &[0, 1, NOISE_LABEL], None, 0),
            Err(EvaluateError::Degenerate(DegenerateClusteringError {
                clusters: 2,
                points: 2
            }))
        );
        assert_eq!(
            evaluate(data.view(), &[0, 1, 2], None, 0),
            QualityMetrics::unavailable()
        );
    }

    #[test]
    fn mismatched_label_count_is_an_error() {
        let data = array![[0.0], [1.0], [4.0], [5.0]];
        assert_eq!(
            try_evaluate(data.view(), &[0, 0, 1], None, 0),
            Err(EvaluateError::LengthMismatch { labels: 3, rows: 4 })
        );
        assert_eq!(
            evaluate(data.view(), &[0, 0, 1, 1, 1], None, 0),
            QualityMetrics::unavailable()
        );
    }

    #[test]
    fn scores_stay_in_range_for_arbitrary_labels() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let data = Array2::from_shape_fn((80, 3), |_| rng.gen_range(-3.0..3.0));
        for seed in 0..5 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let labels: Vec<i32> = (0..80).map(|_| rng.gen_range(-1..4)).collect();
            let metrics = evaluate(data.view(), &labels, None, 0);
            let s = metrics.silhouette.unwrap();
            assert!((-1.0..=1.0).contains(&s));
            assert!(metrics.davies_bouldin.unwrap() >= 0.0);
        }
    }

    #[test]
    fn subsampled_silhouette_is_deterministic_and_close() {
        let data = fixtures::blobs(&[[0.0, 0.0], [6.0, 0.0], [3.0, 5.0]], 100, 1.0, 8);
        let labels: Vec<i32> = (0..300).map(|i| i / 100).collect();

        let full = try_evaluate(data.view(), &labels, None, 0).unwrap();
        let a = try_evaluate(data.view(), &labels, Some(90), 3).unwrap();
        let b = try_evaluate(data.view(), &labels, Some(90), 3).unwrap();

        assert_eq!(a, b);
        assert_eq!(a.davies_bouldin, full.davies_bouldin);
        assert_abs_diff_eq!(
            a.silhouette.unwrap(),
            full.silhouette.unwrap(),
            epsilon = 0.1
        );
    }
}
