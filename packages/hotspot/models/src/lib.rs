#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Shared types for crime hotspot clustering.
//!
//! Defines the fixed five-attribute feature vector extracted from each
//! incident, the identity used to re-associate labels with source rows,
//! the per-engine label assignment, quality metrics, and the immutable
//! pipeline configuration.

pub mod config;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub use config::{DbscanParams, HierarchicalParams, KMeansParams, PipelineConfig};

/// Number of attributes in a [`FeatureRecord`].
pub const FEATURE_COUNT: usize = 5;

/// Label assigned by the density engine to points outside every cluster.
pub const NOISE_LABEL: i32 = -1;

/// One of the five clustering attributes, in matrix column order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
pub enum FeatureColumn {
    /// Incident latitude in decimal degrees.
    #[strum(serialize = "Latitude")]
    #[serde(rename = "Latitude")]
    Latitude,
    /// Incident longitude in decimal degrees.
    #[strum(serialize = "Longitude")]
    #[serde(rename = "Longitude")]
    Longitude,
    /// Hour of day, 0-23.
    #[strum(serialize = "hour")]
    #[serde(rename = "hour")]
    Hour,
    /// Day of week, 0 (Monday) through 6 (Sunday).
    #[strum(serialize = "day_of_week")]
    #[serde(rename = "day_of_week")]
    DayOfWeek,
    /// Month, 1-12.
    #[strum(serialize = "month")]
    #[serde(rename = "month")]
    Month,
}

impl FeatureColumn {
    /// Returns all columns in matrix order.
    #[must_use]
    pub const fn all() -> &'static [Self; FEATURE_COUNT] {
        &[
            Self::Latitude,
            Self::Longitude,
            Self::Hour,
            Self::DayOfWeek,
            Self::Month,
        ]
    }

    /// Returns the column index of this attribute in a feature matrix.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Error returned when a feature value is outside its valid range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InvalidFeatureError {
    /// The attribute that failed validation.
    pub column: FeatureColumn,
    /// The rejected value.
    pub value: f64,
}

impl std::fmt::Display for InvalidFeatureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let expected = match self.column {
            FeatureColumn::Latitude | FeatureColumn::Longitude => "a finite coordinate",
            FeatureColumn::Hour => "0-23",
            FeatureColumn::DayOfWeek => "0-6",
            FeatureColumn::Month => "1-12",
        };
        write!(
            f,
            "invalid {} value {}: expected {expected}",
            self.column, self.value
        )
    }
}

impl std::error::Error for InvalidFeatureError {}

/// The spatial-temporal attributes of a single incident.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
    /// Hour of day, 0-23.
    pub hour: u8,
    /// Day of week, 0 (Monday) through 6 (Sunday).
    pub day_of_week: u8,
    /// Month, 1-12.
    pub month: u8,
}

impl FeatureRecord {
    /// Creates a record after checking every attribute against its range.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidFeatureError`] for the first attribute that is out
    /// of range.
    pub fn try_new(
        latitude: f64,
        longitude: f64,
        hour: u8,
        day_of_week: u8,
        month: u8,
    ) -> Result<Self, InvalidFeatureError> {
        if !latitude.is_finite() {
            return Err(InvalidFeatureError {
                column: FeatureColumn::Latitude,
                value: latitude,
            });
        }
        if !longitude.is_finite() {
            return Err(InvalidFeatureError {
                column: FeatureColumn::Longitude,
                value: longitude,
            });
        }
        if hour > 23 {
            return Err(InvalidFeatureError {
                column: FeatureColumn::Hour,
                value: f64::from(hour),
            });
        }
        if day_of_week > 6 {
            return Err(InvalidFeatureError {
                column: FeatureColumn::DayOfWeek,
                value: f64::from(day_of_week),
            });
        }
        if !(1..=12).contains(&month) {
            return Err(InvalidFeatureError {
                column: FeatureColumn::Month,
                value: f64::from(month),
            });
        }

        Ok(Self {
            latitude,
            longitude,
            hour,
            day_of_week,
            month,
        })
    }

    /// Returns the attributes as a numeric row in [`FeatureColumn`] order.
    #[must_use]
    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.latitude,
            self.longitude,
            f64::from(self.hour),
            f64::from(self.day_of_week),
            f64::from(self.month),
        ]
    }
}

/// Identity of a record within its source dataset (0-based data row index).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RecordId(pub usize);

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The clustering algorithm variants.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EngineKind {
    /// Mini-batch k-means (centroid-based).
    Kmeans,
    /// DBSCAN (density-based).
    Dbscan,
    /// Agglomerative clustering (hierarchical).
    Hierarchical,
}

impl EngineKind {
    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Kmeans, Self::Dbscan, Self::Hierarchical]
    }

    /// Human-readable algorithm name.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Kmeans => "MiniBatch K-Means",
            Self::Dbscan => "DBSCAN",
            Self::Hierarchical => "Hierarchical",
        }
    }

    /// Name of the label column appended to this engine's output table.
    #[must_use]
    pub const fn label_column(self) -> &'static str {
        match self {
            Self::Kmeans => "kmeans_cluster",
            Self::Dbscan => "dbscan_cluster",
            Self::Hierarchical => "hierarchical_cluster",
        }
    }

    /// File name of this engine's labeled output table.
    #[must_use]
    pub const fn output_file_name(self) -> &'static str {
        match self {
            Self::Kmeans => "crimes_kmeans_sample.csv",
            Self::Dbscan => "crimes_dbscan_sample.csv",
            Self::Hierarchical => "crimes_hierarchical_sample.csv",
        }
    }

    /// Whether this engine may emit [`NOISE_LABEL`].
    #[must_use]
    pub const fn emits_noise(self) -> bool {
        matches!(self, Self::Dbscan)
    }
}

/// Rule for measuring the distance between two clusters when merging.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Linkage {
    /// Minimum increase in within-cluster variance.
    #[default]
    Ward,
    /// Mean pairwise distance between members.
    Average,
    /// Maximum pairwise distance between members.
    Complete,
    /// Minimum pairwise distance between members.
    Single,
}

/// Labels produced by one engine for one sample, keyed by record identity.
///
/// Entries keep the sample's draw order. There is no mutating API; a new
/// assignment is produced for every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    engine: EngineKind,
    entries: Vec<(RecordId, i32)>,
}

impl ClusterAssignment {
    /// Creates an assignment from `(record, label)` pairs.
    #[must_use]
    pub const fn new(engine: EngineKind, entries: Vec<(RecordId, i32)>) -> Self {
        Self { engine, entries }
    }

    /// The engine that produced these labels.
    #[must_use]
    pub const fn engine(&self) -> EngineKind {
        self.engine
    }

    /// Number of labeled records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no records were labeled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates `(record, label)` pairs in sample order.
    pub fn iter(&self) -> impl Iterator<Item = (RecordId, i32)> + '_ {
        self.entries.iter().copied()
    }

    /// Iterates labels in sample order.
    pub fn labels(&self) -> impl Iterator<Item = i32> + '_ {
        self.entries.iter().map(|&(_, label)| label)
    }

    /// Number of members per non-noise label.
    #[must_use]
    pub fn cluster_sizes(&self) -> BTreeMap<i32, usize> {
        let mut sizes = BTreeMap::new();
        for label in self.labels().filter(|&l| l != NOISE_LABEL) {
            *sizes.entry(label).or_insert(0) += 1;
        }
        sizes
    }

    /// Number of distinct non-noise labels.
    #[must_use]
    pub fn cluster_count(&self) -> usize {
        self.cluster_sizes().len()
    }

    /// Number of records labeled [`NOISE_LABEL`].
    #[must_use]
    pub fn noise_count(&self) -> usize {
        self.labels().filter(|&l| l == NOISE_LABEL).count()
    }
}

/// Cluster-quality scores. `None` means the score is unavailable because
/// the clustering was degenerate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// Mean silhouette coefficient, in `[-1, 1]`; higher is better.
    pub silhouette: Option<f64>,
    /// Davies-Bouldin index, `>= 0`; lower is better.
    pub davies_bouldin: Option<f64>,
}

impl QualityMetrics {
    /// Metrics for a clustering that could not be scored.
    #[must_use]
    pub const fn unavailable() -> Self {
        Self {
            silhouette: None,
            davies_bouldin: None,
        }
    }

    /// Whether both scores were computed.
    #[must_use]
    pub const fn is_available(&self) -> bool {
        self.silhouette.is_some() && self.davies_bouldin.is_some()
    }
}

impl std::fmt::Display for QualityMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.silhouette {
            Some(s) => write!(f, "silhouette={s:.3}")?,
            None => write!(f, "silhouette=unavailable")?,
        }
        match self.davies_bouldin {
            Some(db) => write!(f, " davies_bouldin={db:.3}"),
            None => write!(f, " davies_bouldin=unavailable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr as _;

    use super::*;

    #[test]
    fn feature_column_names_match_table_headers() {
        let names: Vec<String> = FeatureColumn::all().iter().map(ToString::to_string).collect();
        assert_eq!(
            names,
            ["Latitude", "Longitude", "hour", "day_of_week", "month"]
        );
        assert_eq!(
            FeatureColumn::from_str("day_of_week").unwrap(),
            FeatureColumn::DayOfWeek
        );
    }

    #[test]
    fn feature_column_index_matches_array_position() {
        let record = FeatureRecord::try_new(41.88, -87.63, 14, 2, 7).unwrap();
        let row = record.to_array();
        for column in FeatureColumn::all() {
            let expected = match column {
                FeatureColumn::Latitude => 41.88,
                FeatureColumn::Longitude => -87.63,
                FeatureColumn::Hour => 14.0,
                FeatureColumn::DayOfWeek => 2.0,
                FeatureColumn::Month => 7.0,
            };
            assert!((row[column.index()] - expected).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn feature_record_rejects_out_of_range_values() {
        assert_eq!(
            FeatureRecord::try_new(41.0, -87.0, 24, 0, 1)
                .unwrap_err()
                .column,
            FeatureColumn::Hour
        );
        assert_eq!(
            FeatureRecord::try_new(41.0, -87.0, 0, 7, 1)
                .unwrap_err()
                .column,
            FeatureColumn::DayOfWeek
        );
        assert_eq!(
            FeatureRecord::try_new(41.0, -87.0, 0, 0, 0)
                .unwrap_err()
                .column,
            FeatureColumn::Month
        );
        assert_eq!(
            FeatureRecord::try_new(f64::NAN, -87.0, 0, 0, 1)
                .unwrap_err()
                .column,
            FeatureColumn::Latitude
        );
    }

    #[test]
    fn engine_kind_output_names() {
        assert_eq!(EngineKind::Kmeans.to_string(), "kmeans");
        assert_eq!(
            EngineKind::from_str("hierarchical").unwrap(),
            EngineKind::Hierarchical
        );
        assert_eq!(EngineKind::Dbscan.label_column(), "dbscan_cluster");
        assert_eq!(
            EngineKind::Kmeans.output_file_name(),
            "crimes_kmeans_sample.csv"
        );
        assert!(EngineKind::Dbscan.emits_noise());
        assert!(!EngineKind::Kmeans.emits_noise());
    }

    #[test]
    fn assignment_counts_clusters_and_noise() {
        let assignment = ClusterAssignment::new(
            EngineKind::Dbscan,
            vec![
                (RecordId(4), 0),
                (RecordId(1), 0),
                (RecordId(9), NOISE_LABEL),
                (RecordId(2), 1),
            ],
        );

        assert_eq!(assignment.len(), 4);
        assert_eq!(assignment.cluster_count(), 2);
        assert_eq!(assignment.noise_count(), 1);
        assert_eq!(assignment.cluster_sizes().get(&0), Some(&2));
        assert_eq!(
            assignment.iter().map(|(id, _)| id.0).collect::<Vec<_>>(),
            [4, 1, 9, 2]
        );
    }

    #[test]
    fn quality_metrics_display_marks_unavailable() {
        assert_eq!(
            QualityMetrics::unavailable().to_string(),
            "silhouette=unavailable davies_bouldin=unavailable"
        );
        let metrics = QualityMetrics {
            silhouette: Some(0.5),
            davies_bouldin: Some(1.25),
        };
        assert!(metrics.is_available());
        assert_eq!(metrics.to_string(), "silhouette=0.500 davies_bouldin=1.250");
    }

    #[test]
    fn linkage_parses_from_snake_case() {
        assert_eq!(Linkage::from_str("average").unwrap(), Linkage::Average);
        assert_eq!(Linkage::default(), Linkage::Ward);
        assert_eq!(
            serde_json::to_string(&Linkage::Complete).unwrap(),
            "\"complete\""
        );
    }
}
