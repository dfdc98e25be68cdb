//! Raw incident export to feature table.
//!
//! Reads an export in the Chicago data portal schema, drops rows without a
//! usable `Date`, `Latitude` or `Longitude`, derives the `hour`,
//! `day_of_week` (Monday = 0) and `month` columns, optionally draws a
//! seeded sample, and writes the original columns plus the derived ones.

use std::io::{Read, Write};
use std::path::Path;

use chrono::{Datelike as _, NaiveDateTime, Timelike as _};
use crime_map_hotspot_models::{FeatureColumn, FeatureRecord};
use csv::StringRecord;

use crate::HotspotError;
use crate::dataset::InputError;
use crate::sample::sample_indices;

/// Format of the `Date` column in portal exports, e.g.
/// `09/05/2015 01:30:00 PM`.
pub const DATE_FORMAT: &str = "%m/%d/%Y %I:%M:%S %p";

/// Header of the raw timestamp column.
pub const DATE_COLUMN: &str = "Date";

/// Rows kept by default.
pub const DEFAULT_SAMPLE_SIZE: usize = 500_000;

/// How many cleaned rows to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrepareOptions {
    /// Rows to draw from the cleaned table, or `None` for all of them.
    /// Capped at the number of cleaned rows.
    pub sample_size: Option<usize>,
    /// Sampling seed.
    pub seed: u64,
}

impl Default for PrepareOptions {
    fn default() -> Self {
        Self {
            sample_size: Some(DEFAULT_SAMPLE_SIZE),
            seed: 42,
        }
    }
}

/// Row counts from one preparation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrepareStats {
    /// Data rows in the raw export.
    pub read: usize,
    /// Rows dropped for a missing or invalid date or coordinate.
    pub dropped: usize,
    /// Rows written to the feature table.
    pub written: usize,
}

/// Parses a portal timestamp. Returns `None` if it does not match
/// [`DATE_FORMAT`].
#[must_use]
pub fn parse_incident_date(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s.trim(), DATE_FORMAT).ok()
}

/// Builds the feature record for one raw row, or `None` if the row must be
/// dropped.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn derive_features(date: &str, latitude: &str, longitude: &str) -> Option<FeatureRecord> {
    let date = parse_incident_date(date)?;
    let latitude = latitude.trim().parse::<f64>().ok()?;
    let longitude = longitude.trim().parse::<f64>().ok()?;

    FeatureRecord::try_new(
        latitude,
        longitude,
        date.hour() as u8,
        date.weekday().num_days_from_monday() as u8,
        date.month() as u8,
    )
    .ok()
}

fn column(headers: &StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h == name)
}

/// Prepares a feature table from a raw export.
///
/// # Errors
///
/// Returns [`InputError::MissingColumns`] if `Date`, `Latitude` or
/// `Longitude` is absent, [`InputError::EmptyDataset`] if no row survives
/// cleaning, and [`HotspotError::Csv`] on malformed input or a failed
/// write.
pub fn prepare<R: Read, W: Write>(
    reader: R,
    writer: W,
    options: PrepareOptions,
) -> Result<PrepareStats, HotspotError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_reader(reader);
    let headers = reader.headers()?.clone();

    let date_col = column(&headers, DATE_COLUMN);
    let lat_col = column(&headers, FeatureColumn::Latitude.as_ref());
    let lon_col = column(&headers, FeatureColumn::Longitude.as_ref());
    let (Some(date_col), Some(lat_col), Some(lon_col)) = (date_col, lat_col, lon_col) else {
        let missing = [
            (DATE_COLUMN, date_col),
            (FeatureColumn::Latitude.as_ref(), lat_col),
            (FeatureColumn::Longitude.as_ref(), lon_col),
        ]
        .into_iter()
        .filter(|(_, position)| position.is_none())
        .map(|(name, _)| name.to_string())
        .collect();
        return Err(InputError::MissingColumns(missing).into());
    };

    let mut stats = PrepareStats::default();
    let mut kept = Vec::new();

    for record in reader.into_records() {
        let record = record?;
        stats.read += 1;

        let features = derive_features(
            record.get(date_col).unwrap_or_default(),
            record.get(lat_col).unwrap_or_default(),
            record.get(lon_col).unwrap_or_default(),
        );
        let Some(features) = features else {
            stats.dropped += 1;
            continue;
        };

        let mut row = record;
        row.push_field(&features.hour.to_string());
        row.push_field(&features.day_of_week.to_string());
        row.push_field(&features.month.to_string());
        kept.push(row);
    }

    log::info!(
        "Read {} raw rows, dropped {} without a usable date or location",
        stats.read,
        stats.dropped
    );

    if kept.is_empty() {
        return Err(InputError::EmptyDataset.into());
    }

    let order: Vec<usize> = match options.sample_size {
        Some(size) if size < kept.len() => sample_indices(kept.len(), size, options.seed)?
            .ids()
            .iter()
            .map(|id| id.0)
            .collect(),
        Some(size) => {
            log::info!(
                "Requested {size} rows but only {} survived cleaning; keeping all",
                kept.len()
            );
            (0..kept.len()).collect()
        }
        None => (0..kept.len()).collect(),
    };

    let mut writer = csv::Writer::from_writer(writer);
    let mut out_headers = headers;
    for derived in [
        FeatureColumn::Hour,
        FeatureColumn::DayOfWeek,
        FeatureColumn::Month,
    ] {
        out_headers.push_field(derived.as_ref());
    }
    writer.write_record(&out_headers)?;

    for &i in &order {
        writer.write_record(&kept[i])?;
    }
    writer.flush()?;
    stats.written = order.len();

    Ok(stats)
}

/// Prepares `output` from the raw export at `input`, creating parent
/// directories as needed.
///
/// # Errors
///
/// See [`prepare`]; also returns [`HotspotError::Io`] if either file cannot
/// be opened.
pub fn prepare_file(
    input: &Path,
    output: &Path,
    options: PrepareOptions,
) -> Result<PrepareStats, HotspotError> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let reader = std::io::BufReader::new(std::fs::File::open(input)?);
    let writer = std::io::BufWriter::new(std::fs::File::create(output)?);
    let stats = prepare(reader, writer, options)?;

    log::info!("Wrote {} feature rows to {}", stats.written, output.display());
    Ok(stats)
}
