//! # parenttext-pipeline CLI
//!
//! Argument parsing and orchestration only. Configuration, pulling, step
//! execution and splitting live in [`parenttext_pipeline_core`].
//!
//! ## Commands
//! - `run [--config PATH] <OPERATION>...` loads the configuration, checks that it
//!   was written for this pipeline version, then runs `pull_data`,
//!   `compile_flows` and/or `pot_output` in the order given.
//! - `convert-config --input F --output F` rewrites a legacy configuration
//!   document in the current layout.
//!
//! [`run`] is the async entry point shared by `main` and the integration tests.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use parenttext_pipeline_core::config::{load_config, Config};
use parenttext_pipeline_core::config_converter::convert_legacy_config;
use parenttext_pipeline_core::contract::ExternalTool;
use parenttext_pipeline_core::flow_graph::to_pretty_json;
use parenttext_pipeline_core::meta::check_pipeline_version;
use parenttext_pipeline_core::steps::StepRegistry;
use parenttext_pipeline_core::tools::CommandRunner;
use parenttext_pipeline_core::{compile_flows, pot_output, pull_data, PIPELINE_VERSION};
use serde_json::Value;

use crate::collaborators::pull_context;

/// CLI for the ParentText content pipeline.
#[derive(Parser)]
#[clap(
    name = "parenttext-pipeline",
    version,
    about = "Pull chatbot content sources and compile them into RapidPro flow files"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a sequence of operations against a configuration
    Run {
        /// Config file, or a directory containing config.json / config.yaml
        #[clap(long, default_value = ".")]
        config: PathBuf,
        /// Operations to perform, in order
        #[clap(value_enum, required = true)]
        operations: Vec<Operation>,
    },
    /// Convert a legacy configuration document to the current layout
    ConvertConfig {
        #[clap(long)]
        input: PathBuf,
        #[clap(long)]
        output: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum Operation {
    PullData,
    CompileFlows,
    PotOutput,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::PullData => "pull_data",
            Operation::CompileFlows => "compile_flows",
            Operation::PotOutput => "pot_output",
        })
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Run { config, operations } => {
            let config = load_config(&config)?;
            check_pipeline_version(&config.meta.pipeline_version, PIPELINE_VERSION)?;
            run_operations(&config, &operations).await
        }
        Commands::ConvertConfig { input, output } => convert_config(&input, &output),
    }
}

/// Runs `operations` in order; the first failure aborts the remaining ones.
pub async fn run_operations(config: &Config, operations: &[Operation]) -> Result<()> {
    let runner = Arc::new(CommandRunner::new(&config.tools));
    let registry = StepRegistry::standard();

    for &operation in operations {
        tracing::info!(%operation, "Starting operation");
        match operation {
            Operation::PullData => {
                let tool: Arc<dyn ExternalTool> = runner.clone();
                let ctx = pull_context(config, tool)?;
                let report = pull_data::run(config, &ctx).await?;
                let failed: Vec<&String> = report.sources.iter().flat_map(|s| &s.failed).collect();
                if !failed.is_empty() {
                    tracing::warn!(%operation, ?failed, "Some items could not be pulled, cached copies kept");
                }
                let pull_timestamp = report.meta.as_ref().map(|meta| meta.pull_timestamp.to_rfc3339());
                tracing::info!(
                    %operation,
                    sources = report.sources.len(),
                    ?pull_timestamp,
                    "Operation complete"
                );
            }
            Operation::CompileFlows => {
                let report = compile_flows::run(config, &registry, runner.as_ref()).await?;
                tracing::info!(
                    %operation,
                    outputs = ?report.outputs,
                    "Operation complete"
                );
            }
            Operation::PotOutput => {
                let report = pot_output::run(config, &registry, runner.as_ref()).await?;
                if !report.failed_groups.is_empty() {
                    tracing::warn!(%operation, failed_groups = ?report.failed_groups, "Some groups produced no template");
                }
                tracing::info!(%operation, written = report.written.len(), "Operation complete");
            }
        }
    }
    Ok(())
}

fn read_document(path: &Path) -> Result<Value> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext == "yaml" || ext == "yml");
    let value = if is_yaml {
        serde_yaml::from_str(&content).with_context(|| format!("invalid YAML in {}", path.display()))?
    } else {
        serde_json::from_str(&content).with_context(|| format!("invalid JSON in {}", path.display()))?
    };
    Ok(value)
}

/// Writes the current-layout equivalent of the legacy document at `input`.
pub fn convert_config(input: &Path, output: &Path) -> Result<()> {
    let legacy = read_document(input)?;
    if !legacy.is_object() {
        bail!("{} does not contain a configuration object", input.display());
    }
    if legacy.get("meta").is_some() {
        bail!("{} is already in the current configuration layout", input.display());
    }

    let converted = convert_legacy_config(&legacy, PIPELINE_VERSION);
    // Surface problems now rather than on the first run.
    Config::from_value(converted.clone()).context("converted configuration is invalid")?;

    let bytes = to_pretty_json(&converted)?;
    fs::write(output, bytes).with_context(|| format!("failed to write {}", output.display()))?;
    tracing::info!(input = ?input, output = ?output, "Converted legacy configuration");
    Ok(())
}
