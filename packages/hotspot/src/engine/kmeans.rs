//! Mini-batch k-means.
//!
//! Centroids are seeded with greedy k-means++ on a subset of the data, then
//! refined from uniformly drawn mini-batches. Each centroid moves to the
//! running mean of every point ever assigned to it, so its effective
//! learning rate decays as `1 / count`. Training stops when the batch budget
//! is spent, when total centroid movement falls below the tolerance, or when
//! the smoothed batch inertia stops improving.

use crime_map_hotspot_models::{EngineKind, KMeansParams};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::{Rng as _, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::{ClusterEngine, ClusterError, ensure_finite, squared_distance};

/// Mini-batch k-means engine.
#[derive(Debug, Clone)]
pub struct MiniBatchKMeans {
    params: KMeansParams,
    seed: u64,
}

/// Result of fitting [`MiniBatchKMeans`].
#[derive(Debug, Clone)]
pub struct KMeansModel {
    centroids: Array2<f64>,
    counts: Vec<u64>,
    labels: Vec<i32>,
    inertia: f64,
    n_steps: usize,
}

impl MiniBatchKMeans {
    /// Creates an engine with the given parameters and seed.
    #[must_use]
    pub const fn new(params: KMeansParams, seed: u64) -> Self {
        Self { params, seed }
    }

    fn validate(&self, n_samples: usize) -> Result<(), ClusterError> {
        let k = self.params.k;
        if k == 0 || k > n_samples {
            return Err(ClusterError::InvalidK { k, n_samples });
        }
        if self.params.batch_size == 0 {
            return Err(ClusterError::InvalidParameter {
                name: "batch_size",
                message: "must be greater than 0".to_string(),
            });
        }
        if self.params.tol.is_nan() || self.params.tol < 0.0 {
            return Err(ClusterError::InvalidParameter {
                name: "tol",
                message: format!("must be non-negative, got {}", self.params.tol),
            });
        }
        Ok(())
    }

    /// Fits centroids to `data` and labels every row.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError`] if `data` is empty or non-finite, `k` is
    /// zero or exceeds the row count, or the batch size is zero.
    #[allow(clippy::cast_precision_loss)]
    pub fn fit(&self, data: ArrayView2<'_, f64>) -> Result<KMeansModel, ClusterError> {
        ensure_finite(data)?;
        let n_samples = data.nrows();
        if n_samples == 0 {
            return Err(ClusterError::EmptyInput);
        }
        self.validate(n_samples)?;

        let k = self.params.k;
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);

        let init_size = self
            .params
            .init_size
            .unwrap_or_else(|| (3 * self.params.batch_size).max(3 * k))
            .clamp(k, n_samples);
        let init_ids: Vec<usize> = if init_size < n_samples {
            rand::seq::index::sample(&mut rng, n_samples, init_size).into_vec()
        } else {
            (0..n_samples).collect()
        };
        let mut centroids = kmeans_plus_plus(data, &init_ids, k, &mut rng);

        let batch_size = self.params.batch_size.min(n_samples);
        let max_steps = self
            .params
            .max_iter
            .saturating_mul(n_samples)
            .div_ceil(batch_size);
        let tol = if self.params.tol > 0.0 {
            self.params.tol * mean_variance(data)
        } else {
            0.0
        };
        let alpha = (batch_size as f64 * 2.0 / (n_samples as f64 + 1.0)).min(1.0);

        log::debug!(
            "Mini-batch k-means: {n_samples} points, k={k}, batch={batch_size}, up to {max_steps} batches"
        );

        let mut counts = vec![0_u64; k];
        let mut ewa_inertia: Option<f64> = None;
        let mut best_ewa = f64::INFINITY;
        let mut no_improvement = 0_usize;
        let mut n_steps = 0;

        for step in 0..max_steps {
            n_steps = step + 1;
            let batch: Vec<usize> = (0..batch_size)
                .map(|_| rng.gen_range(0..n_samples))
                .collect();

            let (batch_inertia, shift) = update_on_batch(data, &batch, &mut centroids, &mut counts);
            let batch_inertia = batch_inertia / batch_size as f64;

            // The first batch moves centroids away from their seeds; its
            // movement and inertia say nothing about convergence.
            if step == 0 {
                ewa_inertia = Some(batch_inertia);
                continue;
            }

            if tol > 0.0 && shift <= tol {
                log::debug!("Converged at batch {n_steps}: center shift {shift:.3e} <= {tol:.3e}");
                break;
            }

            let ewa = ewa_inertia.map_or(batch_inertia, |prev| {
                prev.mul_add(1.0 - alpha, batch_inertia * alpha)
            });
            ewa_inertia = Some(ewa);

            if ewa < best_ewa {
                best_ewa = ewa;
                no_improvement = 0;
            } else {
                no_improvement += 1;
                if self
                    .params
                    .max_no_improvement
                    .is_some_and(|limit| no_improvement >= limit)
                {
                    log::debug!(
                        "Stopping at batch {n_steps}: no inertia improvement in {no_improvement} batches"
                    );
                    break;
                }
            }
        }

        let mut labels = Vec::with_capacity(n_samples);
        let mut inertia = 0.0;
        for row in data.rows() {
            let (label, dist) = nearest_centroid(row, centroids.view());
            labels.push(label_from_index(label));
            inertia += dist;
        }

        Ok(KMeansModel {
            centroids,
            counts,
            labels,
            inertia,
            n_steps,
        })
    }
}

impl ClusterEngine for MiniBatchKMeans {
    fn kind(&self) -> EngineKind {
        EngineKind::Kmeans
    }

    fn fit_predict(&self, data: ArrayView2<'_, f64>) -> Result<Vec<i32>, ClusterError> {
        let model = self.fit(data)?;
        log::info!(
            "Mini-batch k-means finished after {} batches, inertia {:.3}",
            model.n_steps,
            model.inertia
        );
        Ok(model.labels)
    }
}

impl KMeansModel {
    /// Final centroids, one row per cluster.
    #[must_use]
    pub const fn centroids(&self) -> &Array2<f64> {
        &self.centroids
    }

    /// Points assigned to each centroid across all mini-batches.
    #[must_use]
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Labels of the training rows.
    #[must_use]
    pub fn labels(&self) -> &[i32] {
        &self.labels
    }

    /// Sum of squared distances from each training row to its centroid.
    #[must_use]
    pub const fn inertia(&self) -> f64 {
        self.inertia
    }

    /// Mini-batches processed.
    #[must_use]
    pub const fn n_steps(&self) -> usize {
        self.n_steps
    }

    /// Labels each row of `data` with its nearest centroid.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::DimensionMismatch`] if `data` has a different
    /// column count than the training data.
    pub fn predict(&self, data: ArrayView2<'_, f64>) -> Result<Vec<i32>, ClusterError> {
        if data.ncols() != self.centroids.ncols() {
            return Err(ClusterError::DimensionMismatch {
                expected: self.centroids.ncols(),
                actual: data.ncols(),
            });
        }
        Ok(data
            .rows()
            .into_iter()
            .map(|row| label_from_index(nearest_centroid(row, self.centroids.view()).0))
            .collect())
    }
}

/// Assigns the batch and folds it into the running centroid means.
///
/// Returns the batch's summed squared distance and the total squared
/// centroid movement.
#[allow(clippy::cast_precision_loss)]
fn update_on_batch(
    data: ArrayView2<'_, f64>,
    batch: &[usize],
    centroids: &mut Array2<f64>,
    counts: &mut [u64],
) -> (f64, f64) {
    let k = centroids.nrows();
    let mut sums = Array2::<f64>::zeros((k, data.ncols()));
    let mut batch_counts = vec![0_u64; k];
    let mut inertia = 0.0;

    for &i in batch {
        let row = data.row(i);
        let (c, dist) = nearest_centroid(row, centroids.view());
        let mut sum = sums.row_mut(c);
        sum += &row;
        batch_counts[c] += 1;
        inertia += dist;
    }

    let mut shift = 0.0;
    for (c, &added) in batch_counts.iter().enumerate() {
        if added == 0 {
            continue;
        }
        let previous = counts[c] as f64;
        let total = previous + added as f64;

        let old = centroids.row(c).to_owned();
        let mut centroid = centroids.row_mut(c);
        centroid.zip_mut_with(&sums.row(c), |center, &sum| {
            *center = center.mul_add(previous, sum) / total;
        });
        shift += squared_distance(old.view(), centroid.view());
        counts[c] += added;
    }

    (inertia, shift)
}

/// Index of and squared distance to the closest centroid. Ties go to the
/// lowest index.
fn nearest_centroid(row: ArrayView1<'_, f64>, centroids: ArrayView2<'_, f64>) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (c, centroid) in centroids.rows().into_iter().enumerate() {
        let dist = squared_distance(row, centroid);
        if dist < best.1 {
            best = (c, dist);
        }
    }
    best
}

/// Greedy k-means++: each new centroid is the best of several
/// distance-squared-weighted draws, judged by the resulting potential.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn kmeans_plus_plus(
    data: ArrayView2<'_, f64>,
    candidates: &[usize],
    k: usize,
    rng: &mut ChaCha8Rng,
) -> Array2<f64> {
    let n_local_trials = 2 + (k as f64).ln().floor() as usize;
    let mut centroids = Array2::zeros((k, data.ncols()));

    let first = candidates[rng.gen_range(0..candidates.len())];
    centroids.row_mut(0).assign(&data.row(first));

    let mut closest: Vec<f64> = candidates
        .iter()
        .map(|&i| squared_distance(data.row(i), data.row(first)))
        .collect();
    let mut potential: f64 = closest.iter().sum();

    for c in 1..k {
        let mut best: Option<(usize, f64, Vec<f64>)> = None;

        for _ in 0..n_local_trials {
            let pick = if potential > 0.0 {
                weighted_pick(&closest, rng.r#gen::<f64>() * potential)
            } else {
                rng.gen_range(0..candidates.len())
            };
            let candidate = data.row(candidates[pick]);

            let updated: Vec<f64> = candidates
                .iter()
                .zip(&closest)
                .map(|(&i, &d)| d.min(squared_distance(data.row(i), candidate)))
                .collect();
            let updated_potential: f64 = updated.iter().sum();

            if best
                .as_ref()
                .is_none_or(|(_, pot, _)| updated_potential < *pot)
            {
                best = Some((pick, updated_potential, updated));
            }
        }

        if let Some((pick, pot, updated)) = best {
            centroids.row_mut(c).assign(&data.row(candidates[pick]));
            closest = updated;
            potential = pot;
        }
    }

    centroids
}

/// Index whose cumulative weight first exceeds `target`.
fn weighted_pick(weights: &[f64], target: f64) -> usize {
    let mut cumulative = 0.0;
    let mut last_positive = 0;
    for (i, &w) in weights.iter().enumerate() {
        if w > 0.0 {
            last_positive = i;
        }
        cumulative += w;
        if cumulative > target {
            return i;
        }
    }
    last_positive
}

/// Mean of the per-column variances.
fn mean_variance(data: ArrayView2<'_, f64>) -> f64 {
    data.var_axis(Axis(0), 0.0).mean().unwrap_or(0.0)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
const fn label_from_index(index: usize) -> i32 {
    index as i32
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::engine::fixtures;
    use crate::quality;

    fn params(k: usize, batch_size: usize) -> KMeansParams {
        KMeansParams {
            k,
            batch_size,
            ..KMeansParams::default()
        }
    }

    #[test]
    fn separates_two_groups_with_high_silhouette() {
        let data = fixtures::two_groups();
        let engine = MiniBatchKMeans::new(params(2, 5), 42);

        let labels = engine.fit_predict(data.view()).unwrap();

        assert!(labels[..5].iter().all(|&l| l == labels[0]));
        assert!(labels[5..].iter().all(|&l| l == labels[5]));
        assert_ne!(labels[0], labels[5]);

        let metrics = quality::evaluate(data.view(), &labels, None, 0);
        assert!(metrics.silhouette.unwrap() > 0.9);
    }

    #[test]
    fn labels_are_in_range_and_reproducible() {
        let data = fixtures::blobs(&[[0.0, 0.0], [5.0, 5.0], [0.0, 5.0]], 200, 1.0, 1);
        let engine = MiniBatchKMeans::new(params(7, 64), 9);

        let first = engine.fit_predict(data.view()).unwrap();
        let second = engine.fit_predict(data.view()).unwrap();

        assert_eq!(first.len(), data.nrows());
        assert!(first.iter().all(|&l| (0..7).contains(&l)));
        assert_eq!(first, second);
    }

    #[test]
    fn centroids_land_near_blob_centers() {
        let centers = [[0.0, 0.0], [10.0, 0.0], [0.0, 10.0]];
        let data = fixtures::blobs(&centers, 300, 0.5, 2);
        let model = MiniBatchKMeans::new(params(3, 100), 3)
            .fit(data.view())
            .unwrap();

        for center in centers {
            let closest = model
                .centroids()
                .rows()
                .into_iter()
                .map(|c| ((c[0] - center[0]).powi(2) + (c[1] - center[1]).powi(2)).sqrt())
                .fold(f64::INFINITY, f64::min);
            assert!(closest < 0.3, "no centroid near {center:?}: {closest}");
        }

        let distinct: BTreeSet<i32> = model.labels().iter().copied().collect();
        assert_eq!(distinct.len(), 3);
    }

    #[test]
    fn counts_accumulate_every_batch_point() {
        let data = fixtures::blobs(&[[0.0, 0.0], [4.0, 4.0]], 50, 0.5, 4);
        let engine = MiniBatchKMeans::new(
            KMeansParams {
                max_no_improvement: None,
                max_iter: 3,
                ..params(2, 10)
            },
            5,
        );
        let model = engine.fit(data.view()).unwrap();

        assert_eq!(model.n_steps(), 30);
        assert_eq!(model.counts().iter().sum::<u64>(), 300);
    }

    #[test]
    fn predict_matches_training_labels_and_checks_dimensions() {
        let data = fixtures::blobs(&[[0.0, 0.0], [6.0, 6.0]], 40, 0.5, 6);
        let model = MiniBatchKMeans::new(params(2, 16), 7)
            .fit(data.view())
            .unwrap();

        assert_eq!(model.predict(data.view()).unwrap(), model.labels());
        let wide = Array2::<f64>::zeros((3, 5));
        assert_eq!(
            model.predict(wide.view()),
            Err(ClusterError::DimensionMismatch {
                expected: 2,
                actual: 5
            })
        );
    }

    #[test]
    fn rejects_invalid_parameters() {
        let data = fixtures::two_groups();
        assert_eq!(
            MiniBatchKMeans::new(params(11, 4), 0).fit_predict(data.view()),
            Err(ClusterError::InvalidK {
                k: 11,
                n_samples: 10
            })
        );
        assert_eq!(
            MiniBatchKMeans::new(params(0, 4), 0).fit_predict(data.view()),
            Err(ClusterError::InvalidK { k: 0, n_samples: 10 })
        );
        assert!(matches!(
            MiniBatchKMeans::new(params(2, 0), 0).fit_predict(data.view()),
            Err(ClusterError::InvalidParameter {
                name: "batch_size",
                ..
            })
        ));
        let empty = Array2::<f64>::zeros((0, 5));
        assert_eq!(
            MiniBatchKMeans::new(params(2, 4), 0).fit_predict(empty.view()),
            Err(ClusterError::EmptyInput)
        );
    }

    #[test]
    fn tolerance_stops_early_on_static_data() {
        let data = fixtures::two_groups();
        let model = MiniBatchKMeans::new(
            KMeansParams {
                tol: 1e-3,
                max_no_improvement: None,
                ..params(2, 10)
            },
            1,
        )
        .fit(data.view())
        .unwrap();
        assert!(model.n_steps() < 100);
    }

    #[test]
    fn huge_iteration_budget_does_not_overflow() {
        let data = fixtures::two_groups();
        let model = MiniBatchKMeans::new(
            KMeansParams {
                max_iter: usize::MAX,
                tol: 1e-3,
                ..params(2, 10)
            },
            1,
        )
        .fit(data.view())
        .unwrap();
        assert!(model.n_steps() < 100);
        assert_eq!(model.labels().len(), 10);
    }

    #[test]
    fn weighted_pick_follows_cumulative_weights() {
        let weights = [0.0, 1.0, 0.0, 3.0];
        assert_eq!(weighted_pick(&weights, 0.5), 1);
        assert_eq!(weighted_pick(&weights, 1.5), 3);
        assert_eq!(weighted_pick(&weights, 4.0), 3);
    }
}
