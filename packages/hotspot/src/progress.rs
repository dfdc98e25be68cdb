//! Progress reporting for engine runs.
//!
//! [`run_engine`](crate::pipeline::run_engine) announces how many stages it
//! will run, then brackets each [`Stage`] with [`RunProgress::enter`] and
//! [`RunProgress::complete`]. The CLI renders this with `indicatif`; tests
//! and library users pass [`null_progress`].

use std::sync::Arc;

use crime_map_hotspot_models::EngineKind;

use crate::Stage;

/// Receives stage updates from one engine run.
///
/// Runs execute on blocking worker threads, so implementations must be
/// `Send + Sync`.
pub trait RunProgress: Send + Sync {
    /// The run of `engine` is starting and will pass through `stages`
    /// stages.
    fn begin(&self, engine: EngineKind, stages: u64);

    /// `stage` has started.
    fn enter(&self, engine: EngineKind, stage: Stage);

    /// `stage` finished successfully.
    fn complete(&self, engine: EngineKind, stage: Stage);

    /// The run finished; `summary` describes the result.
    fn finish(&self, engine: EngineKind, summary: String);
}

/// Discards every update.
pub struct NullProgress;

impl RunProgress for NullProgress {
    fn begin(&self, _engine: EngineKind, _stages: u64) {}
    fn enter(&self, _engine: EngineKind, _stage: Stage) {}
    fn complete(&self, _engine: EngineKind, _stage: Stage) {}
    fn finish(&self, _engine: EngineKind, _summary: String) {}
}

/// Returns a shared [`NullProgress`].
#[must_use]
pub fn null_progress() -> Arc<dyn RunProgress> {
    Arc::new(NullProgress)
}
