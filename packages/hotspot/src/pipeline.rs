//! Engine runs over a loaded dataset.
//!
//! A run is `sample -> scale -> cluster -> evaluate -> write (-> track)`.
//! Each engine draws its own sample and fits its own scaler, so runs share
//! nothing but the read-only [`Dataset`] and [`PipelineConfig`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use crime_map_hotspot_models::{ClusterAssignment, EngineKind, PipelineConfig, QualityMetrics};

use crate::dataset::Dataset;
use crate::progress::RunProgress;
use crate::sample::Sample;
use crate::scale::DegenerateFeatureWarning;
use crate::tracking::RunRecord;
use crate::{HotspotError, Stage, engine, output, quality, sample, scale, tracking};

/// Everything one engine run produced.
#[derive(Debug, Clone)]
pub struct EngineRun {
    pub engine: EngineKind,
    /// Records the engine ran on, in draw order.
    pub sample: Sample,
    pub assignment: ClusterAssignment,
    pub quality: QualityMetrics,
    /// Constant columns zeroed while scaling.
    pub warnings: Vec<DegenerateFeatureWarning>,
    /// Labeled table.
    pub output: PathBuf,
    /// Run record, when tracking is enabled.
    pub record: Option<PathBuf>,
    pub elapsed: Duration,
}

/// Progress steps reported by one [`run_engine`] call.
#[must_use]
pub const fn stage_count(config: &PipelineConfig) -> u64 {
    if config.tracking { 6 } else { 5 }
}

/// Sample size configured for `engine`.
#[must_use]
pub const fn sample_size(engine: EngineKind, config: &PipelineConfig) -> usize {
    match engine {
        EngineKind::Kmeans => config.kmeans.sample_size,
        EngineKind::Dbscan => config.dbscan.sample_size,
        EngineKind::Hierarchical => config.hierarchical.sample_size,
    }
}

/// Runs one engine end to end. Blocks; see [`run_all`] for the concurrent
/// form.
///
/// # Errors
///
/// Returns [`HotspotError::Stage`] naming the engine and the stage that
/// failed. Degenerate clusterings are not errors: the run completes with
/// unavailable metrics.
pub fn run_engine(
    dataset: &Dataset,
    kind: EngineKind,
    config: &PipelineConfig,
    progress: &Arc<dyn RunProgress>,
) -> Result<EngineRun, HotspotError> {
    let started = Instant::now();
    let started_at = Utc::now();
    progress.begin(kind, stage_count(config));

    let sample = in_stage(progress, kind, Stage::Sample, || {
        Ok(sample::sample(dataset, sample_size(kind, config), config.seed)?)
    })?;

    let scaled = in_stage(progress, kind, Stage::Scale, || {
        Ok(scale::fit_transform(
            dataset.feature_matrix(sample.ids()).view(),
        )?)
    })?;

    let labels = in_stage(progress, kind, Stage::Cluster, || {
        log::info!(
            "Running {} on {} records",
            kind.display_name(),
            scaled.nrows()
        );
        Ok(engine::build(kind, config).fit_predict(scaled.view())?)
    })?;

    let quality = in_stage(progress, kind, Stage::Evaluate, || {
        let quality = quality::evaluate(
            scaled.view(),
            &labels,
            config.quality_sample_size,
            config.seed,
        );
        log::info!("{}: {quality}", kind.display_name());
        Ok(quality)
    })?;

    let assignment = ClusterAssignment::new(
        kind,
        sample.ids().iter().copied().zip(labels).collect(),
    );

    let output = in_stage(progress, kind, Stage::Write, || {
        let output = output::output_path(config, kind);
        output::write_labeled_csv(dataset, &assignment, &output)?;
        Ok(output)
    })?;

    let record = if config.tracking {
        let path = in_stage(progress, kind, Stage::Track, || {
            let record = RunRecord::new(
                kind,
                config,
                quality,
                output.clone(),
                started_at,
                Utc::now(),
            );
            tracking::write_run_record(&record, &config.output_dir)
        })?;
        Some(path)
    } else {
        None
    };

    let elapsed = started.elapsed();
    progress.finish(
        kind,
        format!(
            "{}: {} clusters in {:.1}s",
            kind.display_name(),
            assignment.cluster_count(),
            elapsed.as_secs_f64()
        ),
    );

    Ok(EngineRun {
        engine: kind,
        sample,
        warnings: scaled.warnings().to_vec(),
        assignment,
        quality,
        output,
        record,
        elapsed,
    })
}

/// Runs one stage between `enter` and `complete`, attributing any error to
/// it.
fn in_stage<T>(
    progress: &Arc<dyn RunProgress>,
    kind: EngineKind,
    stage: Stage,
    f: impl FnOnce() -> Result<T, HotspotError>,
) -> Result<T, HotspotError> {
    progress.enter(kind, stage);
    let value = f().map_err(|e| e.at(kind, stage))?;
    progress.complete(kind, stage);
    Ok(value)
}

/// Runs `engines` concurrently, one blocking task each, and returns their
/// results in the order requested. `progress` is called once per engine to
/// obtain that engine's reporter.
///
/// # Errors
///
/// Returns the first failed run in request order, or
/// [`HotspotError::Task`] if an engine task panicked.
pub async fn run_all<F>(
    dataset: Arc<Dataset>,
    config: Arc<PipelineConfig>,
    engines: &[EngineKind],
    progress: F,
) -> Result<Vec<EngineRun>, HotspotError>
where
    F: Fn(EngineKind) -> Arc<dyn RunProgress>,
{
    let handles: Vec<_> = engines
        .iter()
        .map(|&kind| {
            let dataset = Arc::clone(&dataset);
            let config = Arc::clone(&config);
            let progress = progress(kind);
            (
                kind,
                tokio::task::spawn_blocking(move || {
                    run_engine(&dataset, kind, &config, &progress)
                }),
            )
        })
        .collect();

    let mut runs = Vec::with_capacity(handles.len());
    for (kind, handle) in handles {
        let run = handle.await.map_err(|e| HotspotError::Task {
            engine: kind,
            message: e.to_string(),
        })??;
        runs.push(run);
    }

    Ok(runs)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    use crime_map_hotspot_models::{FeatureRecord, NOISE_LABEL};
    use rand::{Rng as _, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::progress::null_progress;

    #[derive(Default)]
    struct StageLog {
        stages: Mutex<Option<u64>>,
        entered: Mutex<Vec<Stage>>,
        completed: Mutex<Vec<Stage>>,
        finished: Mutex<Option<String>>,
    }

    impl RunProgress for StageLog {
        fn begin(&self, _engine: EngineKind, stages: u64) {
            *self.stages.lock().unwrap() = Some(stages);
        }

        fn enter(&self, _engine: EngineKind, stage: Stage) {
            self.entered.lock().unwrap().push(stage);
        }

        fn complete(&self, _engine: EngineKind, stage: Stage) {
            self.completed.lock().unwrap().push(stage);
        }

        fn finish(&self, _engine: EngineKind, summary: String) {
            *self.finished.lock().unwrap() = Some(summary);
        }
    }

    /// Two tight incident groups at different places and times of day.
    fn dataset(n_per_group: usize) -> Dataset {
        let mut rng = ChaCha8Rng::seed_from_u64(99);
        let mut features = Vec::new();
        for (lat, lon, hour, dow, month) in [(41.75, -87.60, 2, 5, 7), (41.95, -87.75, 15, 1, 2)] {
            for _ in 0..n_per_group {
                features.push(
                    FeatureRecord::try_new(
                        lat + rng.gen_range(-0.002..0.002),
                        lon + rng.gen_range(-0.002..0.002),
                        hour,
                        dow,
                        month,
                    )
                    .unwrap(),
                );
            }
        }
        Dataset::from_features(features).unwrap()
    }

    fn config(dir: &std::path::Path) -> PipelineConfig {
        let mut config = PipelineConfig {
            output_dir: dir.to_path_buf(),
            ..PipelineConfig::default()
        };
        config.kmeans.sample_size = 60;
        config.kmeans.k = 2;
        config.kmeans.batch_size = 16;
        config.dbscan.sample_size = 60;
        config.dbscan.eps = 0.5;
        config.dbscan.min_samples = 5;
        config.hierarchical.sample_size = 40;
        config.hierarchical.k = 2;
        config
    }

    #[test]
    fn run_engine_writes_labels_for_the_sample() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = dataset(40);
        let config = config(dir.path());

        let run = run_engine(&dataset, EngineKind::Kmeans, &config, &null_progress()).unwrap();

        assert_eq!(run.sample.len(), 60);
        assert_eq!(run.assignment.len(), 60);
        assert_eq!(run.assignment.cluster_count(), 2);
        assert!(run.quality.silhouette.unwrap() > 0.9);
        assert!(run.output.exists());
        assert!(run.record.as_ref().is_some_and(|p| p.exists()));

        let labeled = Dataset::from_path(&run.output).unwrap();
        assert_eq!(labeled.len(), 60);
        assert!(labeled.column_index("kmeans_cluster").is_some());
    }

    #[test]
    fn progress_brackets_every_stage() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = dataset(40);
        let config = config(dir.path());
        let log = Arc::new(StageLog::default());
        let progress: Arc<dyn RunProgress> = Arc::clone(&log) as _;

        run_engine(&dataset, EngineKind::Dbscan, &config, &progress).unwrap();

        let all = [
            Stage::Sample,
            Stage::Scale,
            Stage::Cluster,
            Stage::Evaluate,
            Stage::Write,
            Stage::Track,
        ];
        assert_eq!(*log.stages.lock().unwrap(), Some(6));
        assert_eq!(*log.entered.lock().unwrap(), all);
        assert_eq!(*log.completed.lock().unwrap(), all);
        assert!(
            log.finished
                .lock()
                .unwrap()
                .as_deref()
                .is_some_and(|s| s.starts_with("DBSCAN: "))
        );
    }

    #[test]
    fn failed_stage_is_entered_but_not_completed() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = dataset(40);
        let mut config = config(dir.path());
        config.tracking = false;
        config.hierarchical.k = 100;
        let log = Arc::new(StageLog::default());
        let progress: Arc<dyn RunProgress> = Arc::clone(&log) as _;

        run_engine(&dataset, EngineKind::Hierarchical, &config, &progress).unwrap_err();

        assert_eq!(*log.stages.lock().unwrap(), Some(5));
        assert_eq!(
            *log.entered.lock().unwrap(),
            [Stage::Sample, Stage::Scale, Stage::Cluster]
        );
        assert_eq!(
            *log.completed.lock().unwrap(),
            [Stage::Sample, Stage::Scale]
        );
        assert!(log.finished.lock().unwrap().is_none());
    }

    #[test]
    fn failures_name_engine_and_stage() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = dataset(10);
        let config = config(dir.path());

        let err = run_engine(&dataset, EngineKind::Kmeans, &config, &null_progress()).unwrap_err();
        assert!(matches!(
            err,
            HotspotError::Stage {
                engine: EngineKind::Kmeans,
                stage: Stage::Sample,
                ..
            }
        ));
        assert!(err.to_string().contains("during sample"));

        let mut config = config;
        config.hierarchical.sample_size = 20;
        config.hierarchical.k = 100;
        let err =
            run_engine(&dataset, EngineKind::Hierarchical, &config, &null_progress()).unwrap_err();
        assert!(matches!(
            err,
            HotspotError::Stage {
                stage: Stage::Cluster,
                ..
            }
        ));
    }

    #[test]
    fn degenerate_runs_still_write_output() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = dataset(40);
        let mut config = config(dir.path());
        config.tracking = false;
        config.dbscan.min_samples = 1_000;

        let run = run_engine(&dataset, EngineKind::Dbscan, &config, &null_progress()).unwrap();

        assert!(run.assignment.labels().all(|l| l == NOISE_LABEL));
        assert_eq!(run.quality, QualityMetrics::unavailable());
        assert!(run.output.exists());
        assert!(run.record.is_none());
    }

    #[test]
    fn constant_columns_are_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = dataset(40);
        let config = config(dir.path());

        let run =
            run_engine(&dataset, EngineKind::Hierarchical, &config, &null_progress()).unwrap();
        assert!(run.warnings.is_empty());

        let features = vec![FeatureRecord::try_new(41.8, -87.6, 3, 3, 3).unwrap(); 50];
        let flat = Dataset::from_features(features).unwrap();
        let mut config = config;
        config.hierarchical.k = 1;
        let run = run_engine(&flat, EngineKind::Hierarchical, &config, &null_progress()).unwrap();
        assert_eq!(run.warnings.len(), 5);
        assert_eq!(run.quality, QualityMetrics::unavailable());
    }

    #[tokio::test]
    async fn run_all_returns_runs_in_request_order() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = Arc::new(dataset(40));
        let config = Arc::new(config(dir.path()));
        let engines = [
            EngineKind::Hierarchical,
            EngineKind::Kmeans,
            EngineKind::Dbscan,
        ];

        let runs = run_all(dataset, Arc::clone(&config), &engines, |_| null_progress())
            .await
            .unwrap();

        let kinds: Vec<EngineKind> = runs.iter().map(|r| r.engine).collect();
        assert_eq!(kinds, engines);
        for run in &runs {
            assert!(run.output.exists(), "{}", run.engine);
        }

        let outputs: BTreeSet<_> = runs.iter().map(|r| r.output.clone()).collect();
        assert_eq!(outputs.len(), 3);
        assert_eq!(
            tracking::read_run_records(&config.output_dir).unwrap().len(),
            3
        );
    }

    #[tokio::test]
    async fn run_all_is_deterministic() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let dataset = Arc::new(dataset(40));

        let mut labels = Vec::new();
        for dir in [&first, &second] {
            let runs = run_all(
                Arc::clone(&dataset),
                Arc::new(config(dir.path())),
                EngineKind::all(),
                |_| null_progress(),
            )
            .await
            .unwrap();
            labels.push(
                runs.into_iter()
                    .map(|r| r.assignment)
                    .collect::<Vec<_>>(),
            );
        }

        assert_eq!(labels[0], labels[1]);
    }
}
