//! DBSCAN density clustering.
//!
//! Neighborhood queries go through an R-tree over the scaled rows (for 2 to
//! 5 columns) or a linear scan otherwise. Clusters are grown in a canonical
//! order (rows sorted by coordinates), so labels depend only on the point
//! set, `eps` and `min_samples`, not on row order. A border point reachable
//! from several clusters joins the one discovered first.

use crime_map_hotspot_models::{EngineKind, NOISE_LABEL};
use ndarray::ArrayView2;
use rstar::primitives::GeomWithData;
use rstar::{Point, RTree};

use super::{ClusterEngine, ClusterError, ensure_finite, squared_distance};

/// DBSCAN engine.
#[derive(Debug, Clone, Copy)]
pub struct Dbscan {
    eps: f64,
    min_samples: usize,
}

impl Dbscan {
    /// Creates an engine with neighborhood radius `eps` (inclusive) and
    /// core threshold `min_samples` (the point itself counts).
    #[must_use]
    pub const fn new(eps: f64, min_samples: usize) -> Self {
        Self { eps, min_samples }
    }

    fn validate(&self) -> Result<(), ClusterError> {
        if !self.eps.is_finite() || self.eps <= 0.0 {
            return Err(ClusterError::InvalidParameter {
                name: "eps",
                message: format!("must be a positive finite radius, got {}", self.eps),
            });
        }
        if self.min_samples == 0 {
            return Err(ClusterError::InvalidParameter {
                name: "min_samples",
                message: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

impl ClusterEngine for Dbscan {
    fn kind(&self) -> EngineKind {
        EngineKind::Dbscan
    }

    fn fit_predict(&self, data: ArrayView2<'_, f64>) -> Result<Vec<i32>, ClusterError> {
        ensure_finite(data)?;
        self.validate()?;
        let n = data.nrows();
        if n == 0 {
            return Err(ClusterError::EmptyInput);
        }

        let index = region_query(data, self.eps);
        let core: Vec<bool> = (0..n)
            .map(|i| index.count(i) >= self.min_samples)
            .collect();

        let mut labels: Vec<Option<i32>> = vec![None; n];
        let mut next_cluster = 0;
        let mut neighbors = Vec::new();
        let mut stack = Vec::new();

        for seed in canonical_order(data) {
            if !core[seed] || labels[seed].is_some() {
                continue;
            }

            let cluster = next_cluster;
            next_cluster += 1;
            labels[seed] = Some(cluster);
            stack.push(seed);

            while let Some(p) = stack.pop() {
                index.neighbors(p, &mut neighbors);
                for &q in &neighbors {
                    if labels[q].is_none() {
                        labels[q] = Some(cluster);
                        if core[q] {
                            stack.push(q);
                        }
                    }
                }
            }
        }

        let labels: Vec<i32> = labels
            .into_iter()
            .map(|l| l.unwrap_or(NOISE_LABEL))
            .collect();
        let noise = labels.iter().filter(|&&l| l == NOISE_LABEL).count();
        log::info!(
            "DBSCAN found {next_cluster} clusters, {} core points, {noise} noise points",
            core.iter().filter(|&&c| c).count()
        );

        Ok(labels)
    }
}

/// Fixed-radius neighbor search over the rows of a matrix.
trait RegionQuery {
    /// Writes the indices of all rows within the radius of row `i`
    /// (including `i`) into `out`.
    fn neighbors(&self, i: usize, out: &mut Vec<usize>);

    /// Number of rows within the radius of row `i`, including `i`.
    fn count(&self, i: usize) -> usize;
}

struct RTreeQuery<const D: usize>
where
    [f64; D]: Point<Scalar = f64>,
{
    tree: RTree<GeomWithData<[f64; D], usize>>,
    points: Vec<[f64; D]>,
    eps_sq: f64,
}

impl<const D: usize> RTreeQuery<D>
where
    [f64; D]: Point<Scalar = f64>,
{
    fn new(data: ArrayView2<'_, f64>, eps: f64) -> Self {
        let points: Vec<[f64; D]> = data
            .rows()
            .into_iter()
            .map(|row| std::array::from_fn(|j| row[j]))
            .collect();
        let entries = points
            .iter()
            .enumerate()
            .map(|(i, p)| GeomWithData::new(*p, i))
            .collect();

        Self {
            tree: RTree::bulk_load(entries),
            points,
            eps_sq: eps * eps,
        }
    }
}

impl<const D: usize> RegionQuery for RTreeQuery<D>
where
    [f64; D]: Point<Scalar = f64>,
{
    fn neighbors(&self, i: usize, out: &mut Vec<usize>) {
        out.clear();
        out.extend(
            self.tree
                .locate_within_distance(self.points[i], self.eps_sq)
                .map(|entry| entry.data),
        );
    }

    fn count(&self, i: usize) -> usize {
        self.tree
            .locate_within_distance(self.points[i], self.eps_sq)
            .count()
    }
}

struct LinearScan<'a> {
    data: ArrayView2<'a, f64>,
    eps_sq: f64,
}

impl RegionQuery for LinearScan<'_> {
    fn neighbors(&self, i: usize, out: &mut Vec<usize>) {
        out.clear();
        let row = self.data.row(i);
        out.extend(
            self.data
                .rows()
                .into_iter()
                .enumerate()
                .filter(|(_, other)| squared_distance(row, *other) <= self.eps_sq)
                .map(|(j, _)| j),
        );
    }

    fn count(&self, i: usize) -> usize {
        let row = self.data.row(i);
        self.data
            .rows()
            .into_iter()
            .filter(|other| squared_distance(row, *other) <= self.eps_sq)
            .count()
    }
}

fn region_query<'a>(data: ArrayView2<'a, f64>, eps: f64) -> Box<dyn RegionQuery + 'a> {
    match data.ncols() {
        2 => Box::new(RTreeQuery::<2>::new(data, eps)),
        3 => Box::new(RTreeQuery::<3>::new(data, eps)),
        4 => Box::new(RTreeQuery::<4>::new(data, eps)),
        5 => Box::new(RTreeQuery::<5>::new(data, eps)),
        _ => Box::new(LinearScan {
            data,
            eps_sq: eps * eps,
        }),
    }
}

/// Row indices sorted lexicographically by coordinates, then by index.
fn canonical_order(data: ArrayView2<'_, f64>) -> Vec<usize> {
    let mut order: Vec<usize> = (0..data.nrows()).collect();
    order.sort_by(|&a, &b| {
        data.row(a)
            .iter()
            .zip(data.row(b).iter())
            .map(|(x, y)| x.total_cmp(y))
            .find(|ord| ord.is_ne())
            .unwrap_or_else(|| a.cmp(&b))
    });
    order
}
