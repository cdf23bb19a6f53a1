///
/// This module implements the CLI interface for testbridge: command parsing,
/// argument validation and the user-visible `inspect` report.
///
/// All business logic (parsing, normalization, filtering, submission) lives in
/// the [`testbridge-core`] crate. This module is strictly CLI glue.
///
/// ## How To Use
/// - For command-line users: use the installed `testbridge` binary with `--help`.
/// - For programmatic/integration use: call [`run`] with a constructed [`Cli`].
///
/// ## Extending
/// When adding subcommands, update [`Commands`] below and keep non-trivial
/// logic inside `testbridge-core`.
///
/// [`testbridge-core`]: ../../testbridge-core/
/// [`Cli`]: struct.Cli.html
/// [`run`]: fn.run.html
/// [`Commands`]: enum.Commands.html
use crate::load_config::load_config;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use testbridge_core::model::Warning;
use testbridge_core::synchronise::{prepare, Prepared};

/// CLI for testbridge: turn test-runner output into test-management runs.
#[derive(Parser)]
#[clap(
    name = "testbridge",
    version,
    about = "Ingest JUnit XML and structured test results into one canonical run"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse, normalize and filter the configured results and print a JSON summary
    Inspect {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// File, directory or glob overriding `ingest.data_path`
        #[clap(long)]
        data: Option<String>,
    },
}

/// What `inspect` prints.
#[derive(Debug, Serialize)]
pub struct InspectSummary {
    pub run_name: String,
    pub project_key: String,
    pub source: String,
    pub files_parsed: usize,
    pub cases: usize,
    pub status_counts: BTreeMap<&'static str, usize>,
    pub filtered_out: usize,
    pub warnings: Vec<Warning>,
    pub parse_failures: Vec<String>,
}

impl From<&Prepared> for InspectSummary {
    fn from(prepared: &Prepared) -> Self {
        Self {
            run_name: prepared.run.name.clone(),
            project_key: prepared.run.project_key.clone(),
            source: prepared.run.source.clone(),
            files_parsed: prepared.documents.len(),
            cases: prepared.run.len(),
            status_counts: prepared
                .run
                .status_counts()
                .into_iter()
                .map(|(status, n)| (status.as_str(), n))
                .collect(),
            filtered_out: prepared.filtered_out,
            warnings: prepared.warnings.clone(),
            parse_failures: prepared
                .parse_failures
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

/// Async CLI entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Inspect { config, data } => {
            let mut config = load_config(config)?;
            if let Some(data) = data {
                config.ingest.data_path = data;
            }
            config.trace_loaded();
            tracing::info!(command = "inspect", "Preparing run");

            let prepared = prepare(&config).await.map_err(|e| {
                tracing::error!(command = "inspect", error = %e, "Inspection failed");
                anyhow::Error::new(e)
            })?;
            let summary = InspectSummary::from(&prepared);
            let json =
                serde_json::to_string_pretty(&summary).context("Failed to render summary")?;
            println!("{json}");
            tracing::info!(command = "inspect", cases = summary.cases, "Inspection complete");
            Ok(())
        }
    }
}
