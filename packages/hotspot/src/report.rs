//! Hotspot summaries of a labeled sample.
//!
//! A report is computed from a [`Dataset`] and a [`ClusterAssignment`]
//! over it, either straight after a run or from a labeled table written by
//! an earlier run (see [`labels_from_column`]).

use std::collections::BTreeMap;
use std::fmt;

use crime_map_hotspot_models::{ClusterAssignment, EngineKind, NOISE_LABEL, RecordId};

use crate::dataset::{Dataset, InputError};

/// Hours in a day; one histogram bucket each.
pub const HOURS: usize = 24;

/// Summary of one non-noise cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSummary {
    pub label: i32,
    pub size: usize,
    pub mean_latitude: f64,
    pub mean_longitude: f64,
    /// Hour with the most incidents; the earliest such hour on ties.
    pub peak_hour: u8,
}

/// Cluster summaries plus an hourly histogram over every labeled record.
#[derive(Debug, Clone, PartialEq)]
pub struct HotspotReport {
    pub engine: EngineKind,
    pub records: usize,
    pub noise: usize,
    pub clusters: Vec<ClusterSummary>,
    pub hourly: [usize; HOURS],
}

#[derive(Default)]
struct Accumulator {
    size: usize,
    latitude: f64,
    longitude: f64,
    hours: [usize; HOURS],
}

impl HotspotReport {
    /// Summarizes `assignment`. Records missing from `dataset` are skipped.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn build(dataset: &Dataset, assignment: &ClusterAssignment) -> Self {
        let mut by_label: BTreeMap<i32, Accumulator> = BTreeMap::new();
        let mut hourly = [0; HOURS];
        let mut records = 0;
        let mut noise = 0;

        for (id, label) in assignment.iter() {
            let Some(feature) = dataset.feature(id) else {
                continue;
            };
            records += 1;
            hourly[usize::from(feature.hour)] += 1;

            if label == NOISE_LABEL {
                noise += 1;
                continue;
            }
            let acc = by_label.entry(label).or_default();
            acc.size += 1;
            acc.latitude += feature.latitude;
            acc.longitude += feature.longitude;
            acc.hours[usize::from(feature.hour)] += 1;
        }

        let clusters = by_label
            .into_iter()
            .map(|(label, acc)| ClusterSummary {
                label,
                size: acc.size,
                mean_latitude: acc.latitude / acc.size as f64,
                mean_longitude: acc.longitude / acc.size as f64,
                peak_hour: peak_hour(&acc.hours),
            })
            .collect();

        Self {
            engine: assignment.engine(),
            records,
            noise,
            clusters,
            hourly,
        }
    }

    /// Clusters ordered by size, largest first; ties by label.
    #[must_use]
    pub fn largest_clusters(&self) -> Vec<&ClusterSummary> {
        let mut clusters: Vec<&ClusterSummary> = self.clusters.iter().collect();
        clusters.sort_by(|a, b| b.size.cmp(&a.size).then(a.label.cmp(&b.label)));
        clusters
    }
}

#[allow(clippy::cast_possible_truncation)]
fn peak_hour(hours: &[usize; HOURS]) -> u8 {
    let mut best = 0;
    for (hour, &count) in hours.iter().enumerate() {
        if count > hours[best] {
            best = hour;
        }
    }
    best as u8
}

impl fmt::Display for HotspotReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} records, {} clusters",
            self.engine.display_name(),
            self.records,
            self.clusters.len()
        )?;
        if self.engine.emits_noise() {
            write!(f, ", {} noise", self.noise)?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>8} {:>8} {:>11} {:>11} {:>5}",
            "cluster", "size", "mean_lat", "mean_lon", "peak"
        )?;
        for c in self.largest_clusters() {
            writeln!(
                f,
                "{:>8} {:>8} {:>11.5} {:>11.5} {:>5}",
                c.label, c.size, c.mean_latitude, c.mean_longitude, c.peak_hour
            )?;
        }

        let max = self.hourly.iter().copied().max().unwrap_or(0).max(1);
        writeln!(f, "incidents by hour:")?;
        for (hour, &count) in self.hourly.iter().enumerate() {
            let bar = "#".repeat(count * 40 / max);
            writeln!(f, "  {hour:02} {count:>8} {bar}")?;
        }
        Ok(())
    }
}

/// Reads `engine`'s labels back from `column` of a labeled table.
///
/// # Errors
///
/// Returns [`InputError::MissingColumns`] if the column is absent,
/// [`InputError::Unparseable`] if a label is not an integer and
/// [`InputError::InvalidLabel`] if a label is negative, other than
/// [`NOISE_LABEL`] from an engine that emits noise.
pub fn labels_from_column(
    dataset: &Dataset,
    engine: EngineKind,
    column: &str,
) -> Result<ClusterAssignment, InputError> {
    let position = dataset
        .column_index(column)
        .ok_or_else(|| InputError::MissingColumns(vec![column.to_string()]))?;

    let mut entries = Vec::with_capacity(dataset.len());
    for row in 0..dataset.len() {
        let id = RecordId(row);
        let value = dataset
            .row(id)
            .and_then(|r| r.get(position))
            .unwrap_or_default();
        let label = value
            .trim()
            .parse::<i32>()
            .map_err(|_| InputError::Unparseable {
                row,
                column: column.to_string(),
                value: value.to_string(),
            })?;
        if label < 0 && !(label == NOISE_LABEL && engine.emits_noise()) {
            return Err(InputError::InvalidLabel {
                row,
                column: column.to_string(),
                engine,
                label,
            });
        }
        entries.push((id, label));
    }

    Ok(ClusterAssignment::new(engine, entries))
}
