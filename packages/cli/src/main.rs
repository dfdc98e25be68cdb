#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI for crime hotspot clustering.
//!
//! `prepare` turns a raw incident export into a feature table, `cluster`
//! runs the engines over it, and `report` summarizes a labeled table from
//! an earlier run. Without a subcommand the tool asks what to do.
//!
//! Log output goes through [`crime_map_cli_utils::init_logger`] so it does
//! not collide with the per-engine progress bars.

mod commands;
mod interactive;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use crime_map_hotspot::prepare::{DEFAULT_SAMPLE_SIZE, PrepareOptions};
use crime_map_hotspot_models::EngineKind;

use crate::commands::ClusterOverrides;

#[derive(Parser)]
#[command(name = "crime_map_cli", about = "Crime hotspot clustering")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Derive the feature table from a raw incident export
    Prepare {
        /// Raw export with `Date`, `Latitude` and `Longitude` columns
        #[arg(long)]
        input: PathBuf,
        /// Feature table to write
        #[arg(long)]
        output: PathBuf,
        /// Rows to keep after cleaning
        #[arg(long, default_value_t = DEFAULT_SAMPLE_SIZE)]
        sample_size: usize,
        /// Sampling seed
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Keep every cleaned row
        #[arg(long, conflicts_with = "sample_size")]
        all: bool,
    },
    /// Cluster a feature table with one or more engines
    Cluster {
        /// Feature table with `Latitude`, `Longitude`, `hour`, `day_of_week`
        /// and `month` columns
        #[arg(long)]
        input: PathBuf,
        /// TOML pipeline config; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,
        /// Comma-separated engines to run (kmeans, dbscan, hierarchical)
        #[arg(long, value_delimiter = ',', default_value = "kmeans,dbscan,hierarchical")]
        engines: Vec<EngineKind>,
        #[command(flatten)]
        overrides: ClusterOverrides,
    },
    /// Summarize a labeled table written by `cluster`
    Report {
        /// Labeled table
        #[arg(long)]
        input: PathBuf,
        /// Engine that produced the labels
        #[arg(long)]
        engine: EngineKind,
        /// Label column, if not the engine's default
        #[arg(long)]
        column: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = crime_map_cli_utils::init_logger();
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        return interactive::run(&multi).await;
    };

    match command {
        Commands::Prepare {
            input,
            output,
            sample_size,
            seed,
            all,
        } => {
            let options = PrepareOptions {
                sample_size: (!all).then_some(sample_size),
                seed,
            };
            commands::prepare(&multi, input, output, options).await?;
        }
        Commands::Cluster {
            input,
            config,
            engines,
            overrides,
        } => {
            let config = commands::resolve_config(config.as_deref(), &overrides)?;
            commands::cluster(&multi, input, config, &engines).await?;
        }
        Commands::Report {
            input,
            engine,
            column,
        } => commands::report(&input, engine, column.as_deref())?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory as _;
    use crime_map_hotspot_models::Linkage;

    use super::*;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn cluster_parses_engines_and_overrides() {
        let cli = Cli::try_parse_from([
            "crime_map_cli",
            "cluster",
            "--input",
            "features.csv",
            "--engines",
            "dbscan,hierarchical",
            "--linkage",
            "average",
            "--k",
            "5",
        ])
        .unwrap();

        let Some(Commands::Cluster {
            engines, overrides, ..
        }) = cli.command
        else {
            panic!("expected cluster");
        };
        assert_eq!(engines, [EngineKind::Dbscan, EngineKind::Hierarchical]);
        assert_eq!(overrides.linkage, Some(Linkage::Average));
        assert_eq!(overrides.k, Some(5));
    }

    #[test]
    fn cluster_defaults_to_every_engine() {
        let cli = Cli::try_parse_from(["crime_map_cli", "cluster", "--input", "f.csv"]).unwrap();
        let Some(Commands::Cluster { engines, .. }) = cli.command else {
            panic!("expected cluster");
        };
        assert_eq!(engines, EngineKind::all());
    }

    #[test]
    fn unknown_engine_names_are_rejected() {
        assert!(
            Cli::try_parse_from([
                "crime_map_cli",
                "report",
                "--input",
                "labeled.csv",
                "--engine",
                "spectral",
            ])
            .is_err()
        );
        let cli = Cli::try_parse_from([
            "crime_map_cli",
            "report",
            "--input",
            "labeled.csv",
            "--engine",
            "kmeans",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Report {
                engine: EngineKind::Kmeans,
                column: None,
                ..
            })
        ));
    }
}
