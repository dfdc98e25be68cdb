//! Deterministic subsampling without replacement.
//!
//! Every engine draws its own sample. The same `(population, size, seed)`
//! always yields the same ids in the same order.

use crime_map_hotspot_models::RecordId;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::dataset::Dataset;

/// Requested sample is empty or larger than the population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid sample size {requested}: expected 1..={population}")]
pub struct InvalidSampleSizeError {
    /// Requested number of records.
    pub requested: usize,
    /// Number of records available.
    pub population: usize,
}

/// Record ids drawn from a dataset, in draw order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    ids: Vec<RecordId>,
}

impl Sample {
    /// The drawn ids.
    #[must_use]
    pub fn ids(&self) -> &[RecordId] {
        &self.ids
    }

    /// Number of drawn records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the sample is empty. Never true for a sample returned by
    /// [`sample_indices`].
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Draws `size` distinct ids from `0..population`.
///
/// # Errors
///
/// Returns [`InvalidSampleSizeError`] if `size` is zero or exceeds
/// `population`.
pub fn sample_indices(
    population: usize,
    size: usize,
    seed: u64,
) -> Result<Sample, InvalidSampleSizeError> {
    if size == 0 || size > population {
        return Err(InvalidSampleSizeError {
            requested: size,
            population,
        });
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let ids = rand::seq::index::sample(&mut rng, population, size)
        .into_vec()
        .into_iter()
        .map(RecordId)
        .collect();

    Ok(Sample { ids })
}

/// Draws `size` distinct records from `dataset`.
///
/// # Errors
///
/// Returns [`InvalidSampleSizeError`] if `size` is zero or exceeds the
/// dataset length.
pub fn sample(dataset: &Dataset, size: usize, seed: u64) -> Result<Sample, InvalidSampleSizeError> {
    let sample = sample_indices(dataset.len(), size, seed)?;
    log::debug!(
        "Sampled {} of {} records (seed {seed})",
        sample.len(),
        dataset.len()
    );
    Ok(sample)
}
