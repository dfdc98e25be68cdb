#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Spatial-temporal crime hotspot clustering.
//!
//! A run draws a seeded sample from a [`dataset::Dataset`], standardizes
//! the five feature columns with statistics fit on that sample, clusters the
//! scaled matrix with one of three engines, scores the labels, and writes
//! the sampled rows with the label column appended:
//!
//! ```text
//! sample -> scale -> cluster -> evaluate -> write (-> track)
//! ```
//!
//! The engines ([`engine::MiniBatchKMeans`], [`engine::Dbscan`],
//! [`engine::Agglomerative`]) share the [`engine::ClusterEngine`] contract
//! and run on independently drawn samples, so [`pipeline::run_all`] can run
//! them concurrently.

pub mod config;
pub mod dataset;
pub mod engine;
pub mod output;
pub mod pipeline;
pub mod prepare;
pub mod progress;
pub mod quality;
pub mod report;
pub mod sample;
pub mod scale;
pub mod tracking;

use crime_map_hotspot_models::EngineKind;
use strum_macros::Display;

pub use config::ConfigError;
pub use dataset::InputError;
pub use engine::ClusterError;
pub use quality::{DegenerateClusteringError, EvaluateError};
pub use sample::InvalidSampleSizeError;
pub use scale::DegenerateFeatureWarning;

/// Pipeline stage at which an engine run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    /// Drawing the sample.
    Sample,
    /// Standardizing the sample's feature columns.
    Scale,
    /// Running the clustering engine.
    Cluster,
    /// Scoring the labels.
    Evaluate,
    /// Writing the labeled table.
    Write,
    /// Writing the run record.
    Track,
}

/// Errors that can occur while preparing data or running the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum HotspotError {
    /// The input table is unusable.
    #[error("Input error: {0}")]
    Input(#[from] InputError),

    /// The requested sample size does not fit the dataset.
    #[error(transparent)]
    InvalidSampleSize(#[from] InvalidSampleSizeError),

    /// An engine rejected its parameters or input.
    #[error("Clustering error: {0}")]
    Cluster(#[from] ClusterError),

    /// The configuration is invalid or could not be read.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// CSV reading or writing failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error (file read/write).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking engine task panicked or was cancelled.
    #[error("{engine} task failed: {message}")]
    Task {
        /// Engine whose task failed.
        engine: EngineKind,
        /// Join error description.
        message: String,
    },

    /// An engine run failed at a specific stage.
    #[error("{engine} run failed during {stage}: {source}")]
    Stage {
        /// Engine whose run failed.
        engine: EngineKind,
        /// Stage that produced the error.
        stage: Stage,
        /// Underlying error.
        #[source]
        source: Box<Self>,
    },
}

impl HotspotError {
    /// Attributes this error to a stage of an engine run.
    #[must_use]
    pub fn at(self, engine: EngineKind, stage: Stage) -> Self {
        Self::Stage {
            engine,
            stage,
            source: Box::new(self),
        }
    }
}
