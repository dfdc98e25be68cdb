//! Loading the cleaned feature table.
//!
//! The table must contain the five [`FeatureColumn`] headers. All other
//! columns are kept verbatim so the labeled output can reproduce the source
//! rows.

use std::io::Read;
use std::path::Path;

use crime_map_hotspot_models::{
    EngineKind, FEATURE_COUNT, FeatureColumn, FeatureRecord, InvalidFeatureError, RecordId,
};
use csv::StringRecord;
use ndarray::Array2;

use crate::HotspotError;

/// The input table cannot be clustered.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    /// One or more feature columns are absent from the header.
    #[error("missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    /// The table has a header but no data rows.
    #[error("dataset has no rows")]
    EmptyDataset,

    /// A feature cell is not a number of the expected kind.
    #[error("row {row}, column {column}: cannot parse {value:?}")]
    Unparseable {
        /// 0-based data row.
        row: usize,
        /// Column header.
        column: String,
        /// Raw cell contents.
        value: String,
    },

    /// A label column holds a label its engine never assigns.
    #[error("row {row}, column {column}: {engine} does not assign label {label}")]
    InvalidLabel {
        /// 0-based data row.
        row: usize,
        /// Column header.
        column: String,
        /// Engine the labels were read for.
        engine: EngineKind,
        /// Offending label.
        label: i32,
    },

    /// A feature value is out of range.
    #[error("row {row}: {source}")]
    InvalidFeature {
        /// 0-based data row.
        row: usize,
        /// The range violation.
        #[source]
        source: InvalidFeatureError,
    },
}

/// The full feature table, loaded once per pipeline invocation.
#[derive(Debug, Clone)]
pub struct Dataset {
    headers: StringRecord,
    rows: Vec<StringRecord>,
    features: Vec<FeatureRecord>,
}

impl Dataset {
    /// Reads a comma-delimited table from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`HotspotError::Csv`] if the file cannot be read and
    /// [`HotspotError::Input`] if it fails validation.
    pub fn from_path(path: &Path) -> Result<Self, HotspotError> {
        let file = std::fs::File::open(path)?;
        let dataset = Self::from_reader(file)?;
        log::info!(
            "Loaded {} records ({} columns) from {}",
            dataset.len(),
            dataset.headers.len(),
            path.display()
        );
        Ok(dataset)
    }

    /// Reads a comma-delimited table with a header row.
    ///
    /// # Errors
    ///
    /// Returns [`HotspotError::Csv`] on malformed CSV and
    /// [`HotspotError::Input`] if a feature column is missing, no rows are
    /// present, or a feature value is invalid.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, HotspotError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::Headers)
            .from_reader(reader);

        let headers = reader.headers()?.clone();
        let positions = feature_positions(&headers)?;

        let mut rows = Vec::new();
        let mut features = Vec::new();

        for (row, record) in reader.into_records().enumerate() {
            let record = record?;
            features.push(parse_features(row, &record, &headers, &positions)?);
            rows.push(record);
        }

        if rows.is_empty() {
            return Err(InputError::EmptyDataset.into());
        }

        Ok(Self {
            headers,
            rows,
            features,
        })
    }

    /// Builds a dataset whose only columns are the five features.
    ///
    /// # Errors
    ///
    /// Returns [`InputError::EmptyDataset`] if `features` is empty.
    pub fn from_features(features: Vec<FeatureRecord>) -> Result<Self, InputError> {
        if features.is_empty() {
            return Err(InputError::EmptyDataset);
        }

        let headers: StringRecord = FeatureColumn::all()
            .iter()
            .map(AsRef::<str>::as_ref)
            .collect();
        let rows = features
            .iter()
            .map(|f| {
                StringRecord::from(vec![
                    f.latitude.to_string(),
                    f.longitude.to_string(),
                    f.hour.to_string(),
                    f.day_of_week.to_string(),
                    f.month.to_string(),
                ])
            })
            .collect();

        Ok(Self {
            headers,
            rows,
            features,
        })
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the dataset has no records. Never true for a loaded dataset.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Header row of the source table.
    #[must_use]
    pub const fn headers(&self) -> &StringRecord {
        &self.headers
    }

    /// Position of a header, if present.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Source row for a record.
    #[must_use]
    pub fn row(&self, id: RecordId) -> Option<&StringRecord> {
        self.rows.get(id.0)
    }

    /// Parsed features for a record.
    #[must_use]
    pub fn feature(&self, id: RecordId) -> Option<&FeatureRecord> {
        self.features.get(id.0)
    }

    /// All parsed features in row order.
    #[must_use]
    pub fn features(&self) -> &[FeatureRecord] {
        &self.features
    }

    /// Builds the `ids.len() x 5` feature matrix for the given records.
    ///
    /// # Panics
    ///
    /// Panics if an id is out of range; ids are expected to come from a
    /// sample of this dataset.
    #[must_use]
    pub fn feature_matrix(&self, ids: &[RecordId]) -> Array2<f64> {
        let mut matrix = Array2::zeros((ids.len(), FEATURE_COUNT));
        for (mut out, id) in matrix.rows_mut().into_iter().zip(ids) {
            for (cell, value) in out.iter_mut().zip(self.features[id.0].to_array()) {
                *cell = value;
            }
        }
        matrix
    }
}

fn feature_positions(headers: &StringRecord) -> Result<[usize; FEATURE_COUNT], InputError> {
    let mut positions = [0; FEATURE_COUNT];
    let mut missing = Vec::new();

    for column in FeatureColumn::all() {
        match headers.iter().position(|h| h == column.as_ref()) {
            Some(pos) => positions[column.index()] = pos,
            None => missing.push(column.to_string()),
        }
    }

    if missing.is_empty() {
        Ok(positions)
    } else {
        Err(InputError::MissingColumns(missing))
    }
}

fn parse_features(
    row: usize,
    record: &StringRecord,
    headers: &StringRecord,
    positions: &[usize; FEATURE_COUNT],
) -> Result<FeatureRecord, InputError> {
    let cell = |column: FeatureColumn| record.get(positions[column.index()]).unwrap_or("").trim();
    let unparseable = |column: FeatureColumn| InputError::Unparseable {
        row,
        column: headers
            .get(positions[column.index()])
            .unwrap_or(column.as_ref())
            .to_string(),
        value: cell(column).to_string(),
    };

    let coordinate = |column: FeatureColumn| {
        cell(column)
            .parse::<f64>()
            .map_err(|_| unparseable(column))
    };
    let ordinal = |column: FeatureColumn| parse_ordinal(cell(column)).ok_or_else(|| unparseable(column));

    FeatureRecord::try_new(
        coordinate(FeatureColumn::Latitude)?,
        coordinate(FeatureColumn::Longitude)?,
        ordinal(FeatureColumn::Hour)?,
        ordinal(FeatureColumn::DayOfWeek)?,
        ordinal(FeatureColumn::Month)?,
    )
    .map_err(|source| InputError::InvalidFeature { row, source })
}

/// Parses a small non-negative integer, accepting float spellings such as
/// `"14.0"`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn parse_ordinal(value: &str) -> Option<u8> {
    if let Ok(v) = value.parse::<u8>() {
        return Some(v);
    }
    let v = value.parse::<f64>().ok()?;
    if v.fract() != 0.0 || !(0.0..=f64::from(u8::MAX)).contains(&v) {
        return None;
    }
    Some(v as u8)
}
