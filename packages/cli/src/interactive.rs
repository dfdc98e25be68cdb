//! Menu-driven fallback when no subcommand is given.

use std::path::PathBuf;

use crime_map_cli_utils::MultiProgress;
use crime_map_hotspot::prepare::{DEFAULT_SAMPLE_SIZE, PrepareOptions};
use crime_map_hotspot_models::{EngineKind, Linkage, PipelineConfig};
use dialoguer::{Confirm, Input, MultiSelect, Select};

use crate::commands::{self, ClusterOverrides};

enum Action {
    Prepare,
    Cluster,
    Report,
}

impl Action {
    const ALL: &[Self] = &[Self::Prepare, Self::Cluster, Self::Report];

    #[must_use]
    const fn label(&self) -> &'static str {
        match self {
            Self::Prepare => "Prepare features from a raw export",
            Self::Cluster => "Run clustering engines",
            Self::Report => "Report on a labeled table",
        }
    }
}

/// Asks which action to run and prompts for its inputs.
///
/// # Errors
///
/// Returns an error if a prompt fails or the selected action fails.
pub async fn run(multi: &MultiProgress) -> Result<(), Box<dyn std::error::Error>> {
    println!("Crime Hotspot Clustering");
    println!();

    let labels: Vec<&str> = Action::ALL.iter().map(Action::label).collect();
    let idx = Select::new()
        .with_prompt("What would you like to do?")
        .items(&labels)
        .default(1)
        .interact()?;

    match Action::ALL[idx] {
        Action::Prepare => prepare(multi).await,
        Action::Cluster => cluster(multi).await,
        Action::Report => report(),
    }
}

fn prompt_path(prompt: &str, default: &str) -> Result<PathBuf, dialoguer::Error> {
    let path: String = Input::new()
        .with_prompt(prompt)
        .default(default.to_string())
        .interact_text()?;
    Ok(PathBuf::from(path))
}

fn select_engine(prompt: &str) -> Result<EngineKind, dialoguer::Error> {
    let names: Vec<&str> = EngineKind::all()
        .iter()
        .map(|e| e.display_name())
        .collect();
    let idx = Select::new()
        .with_prompt(prompt)
        .items(&names)
        .default(0)
        .interact()?;
    Ok(EngineKind::all()[idx])
}

async fn prepare(multi: &MultiProgress) -> Result<(), Box<dyn std::error::Error>> {
    let input = prompt_path("Raw export", "data/raw/crimes.csv")?;
    let output = prompt_path("Feature table", "data/processed/crimes_500k_features.csv")?;

    let sample_str: String = Input::new()
        .with_prompt("Rows to keep (empty for all)")
        .default(DEFAULT_SAMPLE_SIZE.to_string())
        .allow_empty(true)
        .interact_text()?;
    let sample_size = sample_str.trim().parse().ok();

    let options = PrepareOptions {
        sample_size,
        ..PrepareOptions::default()
    };
    commands::prepare(multi, input, output, options).await
}

async fn cluster(multi: &MultiProgress) -> Result<(), Box<dyn std::error::Error>> {
    let input = prompt_path("Feature table", "data/processed/crimes_500k_features.csv")?;

    let names: Vec<&str> = EngineKind::all()
        .iter()
        .map(|e| e.display_name())
        .collect();
    let chosen = MultiSelect::new()
        .with_prompt("Engines (space=toggle, enter=confirm)")
        .items(&names)
        .defaults(&vec![true; names.len()])
        .interact()?;
    if chosen.is_empty() {
        println!("No engines selected.");
        return Ok(());
    }
    let engines: Vec<EngineKind> = chosen.into_iter().map(|i| EngineKind::all()[i]).collect();

    let defaults = PipelineConfig::default();
    let mut overrides = ClusterOverrides::default();

    let customize = Confirm::new()
        .with_prompt("Customize parameters?")
        .default(false)
        .interact()?;

    if customize {
        let k_str: String = Input::new()
            .with_prompt("Clusters (k)")
            .default(defaults.kmeans.k.to_string())
            .interact_text()?;
        overrides.k = k_str.parse().ok();

        if engines.contains(&EngineKind::Dbscan) {
            let eps_str: String = Input::new()
                .with_prompt("DBSCAN eps")
                .default(defaults.dbscan.eps.to_string())
                .interact_text()?;
            overrides.eps = eps_str.parse().ok();

            let min_str: String = Input::new()
                .with_prompt("DBSCAN min samples")
                .default(defaults.dbscan.min_samples.to_string())
                .interact_text()?;
            overrides.min_samples = min_str.parse().ok();
        }

        if engines.contains(&EngineKind::Hierarchical) {
            let linkages = [
                Linkage::Ward,
                Linkage::Average,
                Linkage::Complete,
                Linkage::Single,
            ];
            let linkage_names: Vec<&str> = linkages.iter().map(AsRef::as_ref).collect();
            let idx = Select::new()
                .with_prompt("Linkage")
                .items(&linkage_names)
                .default(0)
                .interact()?;
            overrides.linkage = Some(linkages[idx]);
        }

        let seed_str: String = Input::new()
            .with_prompt("Seed")
            .default(defaults.seed.to_string())
            .interact_text()?;
        overrides.seed = seed_str.parse().ok();
    }

    overrides.no_tracking = !Confirm::new()
        .with_prompt("Write run records?")
        .default(true)
        .interact()?;

    let config = commands::resolve_config(None, &overrides)?;
    commands::cluster(multi, input, config, &engines).await
}

fn report() -> Result<(), Box<dyn std::error::Error>> {
    let engine = select_engine("Engine")?;
    let default = PipelineConfig::default()
        .output_dir
        .join(engine.output_file_name());
    let input = prompt_path("Labeled table", &default.display().to_string())?;
    commands::report(&input, engine, None)
}
