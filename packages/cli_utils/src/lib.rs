#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Terminal plumbing for the hotspot CLI.
//!
//! [`IndicatifProgress`] renders engine-run stages with `indicatif`, and
//! [`init_logger`] routes `log` output through the same [`MultiProgress`]
//! so log lines never tear through a bar mid-redraw.

use std::sync::Arc;
use std::time::Duration;

use crime_map_hotspot::Stage;
use crime_map_hotspot::progress::RunProgress;
use crime_map_hotspot_models::EngineKind;
use indicatif::{ProgressBar, ProgressStyle};

pub use indicatif::MultiProgress;

/// One `indicatif` bar per engine run, advanced once per completed
/// [`Stage`].
pub struct IndicatifProgress {
    bar: ProgressBar,
    /// Style applied once `begin()` provides the stage count.
    bar_style: ProgressStyle,
}

impl IndicatifProgress {
    /// Adds a bar for `engine` to `multi`. Shows a spinner until the run
    /// begins.
    #[must_use]
    pub fn engine_bar(multi: &MultiProgress, engine: EngineKind) -> Arc<dyn RunProgress> {
        let bar = multi.add(ProgressBar::new_spinner());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(format!("{}: waiting", engine.display_name()));

        let bar_style = ProgressStyle::with_template(
            "{spinner:.cyan} {wide_msg} {bar:20.cyan/dim} {pos}/{len} [{elapsed_precise}]",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");

        Arc::new(Self { bar, bar_style })
    }

    /// A spinner for work of unknown length, such as loading a table.
    #[must_use]
    pub fn spinner(multi: &MultiProgress, message: &str) -> ProgressBar {
        let bar = multi.add(ProgressBar::new_spinner());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_style(
            ProgressStyle::with_template("{spinner:.yellow} {msg} [{elapsed}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(message.to_string());
        bar
    }
}

/// Bar message while `stage` runs.
const fn stage_message(stage: Stage) -> &'static str {
    match stage {
        Stage::Sample => "sampling",
        Stage::Scale => "scaling",
        Stage::Cluster => "clustering",
        Stage::Evaluate => "evaluating",
        Stage::Write => "writing labels",
        Stage::Track => "recording run",
    }
}

impl RunProgress for IndicatifProgress {
    fn begin(&self, _engine: EngineKind, stages: u64) {
        self.bar.set_length(stages);
        self.bar.set_position(0);
        self.bar.set_style(self.bar_style.clone());
    }

    fn enter(&self, engine: EngineKind, stage: Stage) {
        self.bar.set_message(format!(
            "{}: {}",
            engine.display_name(),
            stage_message(stage)
        ));
    }

    fn complete(&self, _engine: EngineKind, _stage: Stage) {
        self.bar.inc(1);
    }

    fn finish(&self, _engine: EngineKind, summary: String) {
        self.bar.finish_with_message(summary);
    }
}

/// Installs `pretty_env_logger` (filtered by `RUST_LOG`) behind
/// `indicatif-log-bridge` and returns the [`MultiProgress`] every bar must
/// be added to.
#[must_use]
pub fn init_logger() -> MultiProgress {
    let multi = MultiProgress::new();

    let logger = pretty_env_logger::formatted_builder()
        .parse_env("RUST_LOG")
        .build();
    let level = logger.filter();

    // A logger may already be installed (tests).
    indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .ok();

    log::set_max_level(level);

    multi
}
