//! Agglomerative (bottom-up hierarchical) clustering.
//!
//! Builds the full merge tree with the nearest-neighbor-chain algorithm,
//! which is exact for the reducible linkages offered here, then replays the
//! `n - k` cheapest merges to cut the tree at `k` clusters. Ward linkage
//! keeps only cluster centroids and sizes; the other linkages keep a
//! condensed distance matrix updated with the Lance-Williams formulas.
//!
//! Ties are broken toward the previous chain element, then toward the lowest
//! cluster index, so the result is deterministic.

use crime_map_hotspot_models::{EngineKind, Linkage};
use ndarray::{Array2, ArrayView2};

use super::{ClusterEngine, ClusterError, distance, ensure_finite};

/// Agglomerative clustering engine.
#[derive(Debug, Clone, Copy)]
pub struct Agglomerative {
    k: usize,
    linkage: Linkage,
}

impl Agglomerative {
    /// Creates an engine that merges down to `k` clusters under `linkage`.
    #[must_use]
    pub const fn new(k: usize, linkage: Linkage) -> Self {
        Self { k, linkage }
    }
}

impl ClusterEngine for Agglomerative {
    fn kind(&self) -> EngineKind {
        EngineKind::Hierarchical
    }

    fn fit_predict(&self, data: ArrayView2<'_, f64>) -> Result<Vec<i32>, ClusterError> {
        ensure_finite(data)?;
        let n = data.nrows();
        if n == 0 {
            return Err(ClusterError::EmptyInput);
        }
        if self.k == 0 || self.k > n {
            return Err(ClusterError::InvalidK {
                k: self.k,
                n_samples: n,
            });
        }

        let mut merges = match self.linkage {
            Linkage::Ward => nn_chain(n, &mut WardState::new(data)),
            linkage => {
                log::debug!(
                    "Allocating {} pairwise distances for {linkage} linkage",
                    n * (n - 1) / 2
                );
                nn_chain(n, &mut MatrixState::new(data, linkage))
            }
        };

        // Stable: equal heights keep chain order, which lists children
        // before their parents.
        merges.sort_by(|a, b| a.height.total_cmp(&b.height));

        let mut forest = DisjointSet::new(n);
        for merge in merges.iter().take(n - self.k) {
            forest.union(merge.a, merge.b);
        }

        let labels = forest.labels();
        log::info!(
            "Agglomerative ({}) merged {n} points into {} clusters",
            self.linkage,
            self.k
        );
        Ok(labels)
    }
}

/// One merge of the tree: cluster `b` was folded into cluster `a`.
#[derive(Debug, Clone, Copy)]
struct Merge {
    a: usize,
    b: usize,
    height: f64,
}

/// Inter-cluster distances that can be updated in place after a merge.
trait LinkageState {
    fn distance(&self, a: usize, b: usize) -> f64;

    /// Folds cluster `b` into cluster `a`. `active` lists the clusters that
    /// remain after the merge.
    fn merge(&mut self, a: usize, b: usize, active: &[usize]);
}

/// Ward linkage from centroids: the merge cost of `A` and `B` is
/// `sqrt(2 |A| |B| / (|A| + |B|)) * ||c_A - c_B||`.
struct WardState {
    centroids: Array2<f64>,
    sizes: Vec<f64>,
}

impl WardState {
    fn new(data: ArrayView2<'_, f64>) -> Self {
        Self {
            centroids: data.to_owned(),
            sizes: vec![1.0; data.nrows()],
        }
    }
}

impl LinkageState for WardState {
    fn distance(&self, a: usize, b: usize) -> f64 {
        let (na, nb) = (self.sizes[a], self.sizes[b]);
        (2.0 * na * nb / (na + nb)).sqrt() * distance(self.centroids.row(a), self.centroids.row(b))
    }

    fn merge(&mut self, a: usize, b: usize, _active: &[usize]) {
        let (na, nb) = (self.sizes[a], self.sizes[b]);
        let total = na + nb;
        let other = self.centroids.row(b).to_owned();
        self.centroids
            .row_mut(a)
            .zip_mut_with(&other, |ca, &cb| *ca = ca.mul_add(na, cb * nb) / total);
        self.sizes[a] = total;
    }
}

/// Pairwise linkages over a condensed upper-triangular distance matrix.
struct MatrixState {
    n: usize,
    distances: Vec<f64>,
    sizes: Vec<f64>,
    linkage: Linkage,
}

impl MatrixState {
    fn new(data: ArrayView2<'_, f64>, linkage: Linkage) -> Self {
        let n = data.nrows();
        let mut distances = Vec::with_capacity(n * n.saturating_sub(1) / 2);
        for i in 0..n {
            for j in (i + 1)..n {
                distances.push(distance(data.row(i), data.row(j)));
            }
        }
        Self {
            n,
            distances,
            sizes: vec![1.0; n],
            linkage,
        }
    }

    const fn offset(&self, a: usize, b: usize) -> usize {
        let (i, j) = if a < b { (a, b) } else { (b, a) };
        self.n * i - i * (i + 1) / 2 + j - i - 1
    }
}

impl LinkageState for MatrixState {
    fn distance(&self, a: usize, b: usize) -> f64 {
        self.distances[self.offset(a, b)]
    }

    fn merge(&mut self, a: usize, b: usize, active: &[usize]) {
        let (na, nb) = (self.sizes[a], self.sizes[b]);
        for &other in active {
            if other == a {
                continue;
            }
            let da = self.distance(a, other);
            let db = self.distance(b, other);
            let updated = match self.linkage {
                Linkage::Single => da.min(db),
                Linkage::Complete => da.max(db),
                Linkage::Average | Linkage::Ward => da.mul_add(na, db * nb) / (na + nb),
            };
            let offset = self.offset(a, other);
            self.distances[offset] = updated;
        }
        self.sizes[a] = na + nb;
    }
}

/// Nearest-neighbor chain: follow nearest neighbors until two clusters are
/// mutual nearest neighbors, merge them, and continue from the remaining
/// chain. Returns the `n - 1` merges in the order they were made.
fn nn_chain(n: usize, state: &mut dyn LinkageState) -> Vec<Merge> {
    let mut active: Vec<usize> = (0..n).collect();
    let mut chain: Vec<usize> = Vec::with_capacity(n);
    let mut merges = Vec::with_capacity(n.saturating_sub(1));

    while active.len() > 1 {
        if chain.is_empty() {
            chain.push(active[0]);
        }

        loop {
            let a = chain[chain.len() - 1];
            let previous = chain.len().checked_sub(2).map(|i| chain[i]);

            let mut nearest = previous.map(|p| (p, state.distance(a, p)));
            for &c in &active {
                if c == a {
                    continue;
                }
                let d = state.distance(a, c);
                if nearest.is_none_or(|(_, best)| d < best) {
                    nearest = Some((c, d));
                }
            }

            let Some((b, height)) = nearest else {
                break;
            };

            if Some(b) == previous {
                chain.truncate(chain.len() - 2);
                let (keep, fold) = (a.min(b), a.max(b));
                if let Ok(pos) = active.binary_search(&fold) {
                    active.remove(pos);
                }
                state.merge(keep, fold, &active);
                merges.push(Merge {
                    a: keep,
                    b: fold,
                    height,
                });
                break;
            }

            chain.push(b);
        }
    }

    merges
}

/// Union-find over point indices.
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[child] = root;
        }
    }

    /// Labels components `0..` in order of their lowest point index.
    fn labels(&mut self) -> Vec<i32> {
        let n = self.parent.len();
        let mut root_label = vec![None; n];
        let mut next = 0;
        (0..n)
            .map(|i| {
                let root = self.find(i);
                *root_label[root].get_or_insert_with(|| {
                    let label = next;
                    next += 1;
                    label
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use ndarray::{Array2, array};

    use super::*;
    use crate::engine::fixtures;

    const ALL_LINKAGES: [Linkage; 4] = [
        Linkage::Ward,
        Linkage::Average,
        Linkage::Complete,
        Linkage::Single,
    ];

    fn line(xs: &[f64]) -> Array2<f64> {
        Array2::from_shape_fn((xs.len(), 2), |(i, j)| if j == 0 { xs[i] } else { 0.0 })
    }

    #[test]
    fn produces_exactly_k_clusters() {
        let data = fixtures::blobs(&[[0.0, 0.0], [3.0, 0.0], [0.0, 3.0]], 25, 1.5, 41);
        for linkage in ALL_LINKAGES {
            for k in [1, 2, 3, 7, 20, data.nrows()] {
                let labels = Agglomerative::new(k, linkage)
                    .fit_predict(data.view())
                    .unwrap();
                let distinct: BTreeSet<i32> = labels.iter().copied().collect();
                assert_eq!(distinct.len(), k, "{linkage} k={k}");
                assert_eq!(distinct, (0..i32::try_from(k).unwrap()).collect(), "{linkage} k={k}");
            }
        }
    }

    #[test]
    fn separates_well_spaced_groups() {
        let data = line(&[0.0, 1.0, 10.0, 11.0, 25.0]);
        for linkage in ALL_LINKAGES {
            let labels = Agglomerative::new(3, linkage)
                .fit_predict(data.view())
                .unwrap();
            assert_eq!(labels, [0, 0, 1, 1, 2], "{linkage}");
        }
    }

    #[test]
    fn single_linkage_chains_through_gaps() {
        let data = line(&[0.0, 1.0, 2.5, 4.5, 12.0]);
        let single = Agglomerative::new(2, Linkage::Single)
            .fit_predict(data.view())
            .unwrap();
        assert_eq!(single, [0, 0, 0, 0, 1]);
    }

    #[test]
    fn complete_and_single_disagree_on_a_chain() {
        // Single linkage follows the chain 0-1-2-3 (gaps 1.0, 1.1, 1.2) and
        // leaves the last point alone; complete linkage splits the chain.
        let data = line(&[0.0, 1.0, 2.1, 3.3, 5.0]);
        let single = Agglomerative::new(2, Linkage::Single)
            .fit_predict(data.view())
            .unwrap();
        let complete = Agglomerative::new(2, Linkage::Complete)
            .fit_predict(data.view())
            .unwrap();
        assert_eq!(single, [0, 0, 0, 0, 1]);
        assert_eq!(complete, [0, 0, 1, 1, 1]);
    }

    #[test]
    fn deterministic_with_tied_distances() {
        let data = array![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
        for linkage in ALL_LINKAGES {
            let engine = Agglomerative::new(2, linkage);
            let first = engine.fit_predict(data.view()).unwrap();
            let second = engine.fit_predict(data.view()).unwrap();
            assert_eq!(first, second);
            assert_eq!(first.iter().copied().collect::<BTreeSet<_>>().len(), 2);
        }
    }

    #[test]
    fn rejects_invalid_k() {
        let data = fixtures::two_groups();
        assert_eq!(
            Agglomerative::new(0, Linkage::Ward).fit_predict(data.view()),
            Err(ClusterError::InvalidK {
                k: 0,
                n_samples: 10
            })
        );
        assert_eq!(
            Agglomerative::new(11, Linkage::Average).fit_predict(data.view()),
            Err(ClusterError::InvalidK {
                k: 11,
                n_samples: 10
            })
        );
    }

    #[test]
    fn condensed_offsets_cover_upper_triangle() {
        let data = Array2::<f64>::zeros((5, 2));
        let state = MatrixState::new(data.view(), Linkage::Average);
        let mut seen = BTreeSet::new();
        for i in 0..5 {
            for j in (i + 1)..5 {
                assert_eq!(state.offset(i, j), state.offset(j, i));
                seen.insert(state.offset(i, j));
            }
        }
        assert_eq!(seen, (0..10).collect());
    }
}
