use std::fs;
use std::path::Path;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{info, warn};

use super::{path_arg, scalar_arg, StepContext, StepHandler, StepOutcome};
use crate::config::{SourceConfig, StepParams};
use crate::contract::{run_checked, ToolInvocation};
use crate::error::StepError;
use crate::flow_graph::{set_expiration, FlowGraph};
use crate::tools::{ABTESTING, RPFT};

pub const SPECIAL_EXPIRATION_KEY: &str = "special_expiration_file";

fn read_graph(path: &Path) -> Result<FlowGraph, StepError> {
    let content = fs::read(path).map_err(|e| StepError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_slice(&content).map_err(|e| StepError::Json {
        path: path.to_path_buf(),
        source: e,
    })
}

fn write_graph(path: &Path, graph: &FlowGraph) -> Result<(), StepError> {
    let bytes = serde_json::to_vec(graph).map_err(|e| StepError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;
    fs::write(path, bytes).map_err(|e| StepError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Builds flows from the cached sheet JSON of its sources with `rpft create_flows`.
pub struct CreateFlows;

#[async_trait]
impl StepHandler for CreateFlows {
    async fn apply(&self, ctx: &StepContext<'_>) -> Result<StepOutcome, StepError> {
        let StepParams::CreateFlows(params) = &ctx.step.params else {
            return Err(ctx.mismatch("create_flows"));
        };
        let inputs = ctx.sheet_files()?;
        let output = ctx.output_path();

        let mut args: Vec<String> = vec!["create_flows".to_owned()];
        args.extend(inputs.iter().map(|p| path_arg(p)));
        args.extend(["--output".to_owned(), path_arg(&output)]);
        args.extend(["--format".to_owned(), "json".to_owned()]);
        if let Some(models) = &params.models_module {
            args.extend(["--datamodels".to_owned(), models.clone()]);
        }
        if !params.tags.is_empty() {
            args.push("--tags".to_owned());
            args.extend(params.tags.iter().map(|tag| scalar_arg(Some(tag))));
        }

        run_checked(ctx.tool, ToolInvocation::new(RPFT, args)).await?;
        info!(sheets = inputs.len(), output = ?output, "[STEP] Created flows from sheets");
        Ok(StepOutcome::Produced(output))
    }
}

/// Concatenates ready-made flow-graph documents from `json` sources.
pub struct LoadFlows;

#[async_trait]
impl StepHandler for LoadFlows {
    async fn apply(&self, ctx: &StepContext<'_>) -> Result<StepOutcome, StepError> {
        let mut graphs = Vec::new();
        for source_name in ctx.require_sources()? {
            let SourceConfig::Json(json) = ctx.source(source_name)? else {
                return Err(ctx.wrong_format(source_name, "json"));
            };
            let dir = ctx.config.source_input_dir(source_name);
            for key in json.files_dict.keys() {
                graphs.push(read_graph(&dir.join(format!("{key}.json")))?);
            }
        }

        let merged = FlowGraph::merge(graphs);
        let output = ctx.output_path();
        write_graph(&output, &merged)?;
        info!(flows = merged.flows.len(), output = ?output, "[STEP] Loaded flows");
        Ok(StepOutcome::Produced(output))
    }
}

/// Applies A/B tests and localisation edits from cached edit sheets.
pub struct Edits;

#[async_trait]
impl StepHandler for Edits {
    async fn apply(&self, ctx: &StepContext<'_>) -> Result<StepOutcome, StepError> {
        let input = ctx.require_input()?;
        let sheets = ctx.sheet_files()?;
        if sheets.is_empty() {
            info!(step = %ctx.step.id, "[STEP] No edit sheets declared, skipping");
            return Ok(StepOutcome::Unchanged);
        }

        let output = ctx.output_path();
        let log = ctx.temp_dir().join(ctx.log_name("edits.log"));
        let mut args = vec![path_arg(input), path_arg(&output)];
        args.extend(sheets.iter().map(|p| path_arg(p)));
        args.extend([
            "--format".to_owned(),
            "json".to_owned(),
            "--logfile".to_owned(),
            path_arg(&log),
        ]);

        run_checked(ctx.tool, ToolInvocation::new(ABTESTING, args)).await?;
        Ok(StepOutcome::Produced(output))
    }
}

/// Sets flow expiration times, in process.
pub struct UpdateExpirationTimes;

#[async_trait]
impl StepHandler for UpdateExpirationTimes {
    async fn apply(&self, ctx: &StepContext<'_>) -> Result<StepOutcome, StepError> {
        let StepParams::UpdateExpirationTimes(params) = &ctx.step.params else {
            return Err(ctx.mismatch("update_expiration_times"));
        };
        let input = ctx.require_input()?;

        let specifics: Map<String, Value> = match ctx.json_source_file(SPECIAL_EXPIRATION_KEY) {
            Some(path) => {
                let content = fs::read(&path).map_err(|e| StepError::Io {
                    path: path.clone(),
                    source: e,
                })?;
                serde_json::from_slice(&content).map_err(|e| StepError::Json { path, source: e })?
            }
            None => Map::new(),
        };
        if params.default_expiration_time.is_none() {
            warn!(step = %ctx.step.id, "[STEP] No default expiration time, only specific flows are updated");
        }

        let mut graph = read_graph(input)?;
        let updated = graph
            .flows
            .iter_mut()
            .map(|flow| set_expiration(flow, params.default_expiration_time, &specifics))
            .filter(|changed| *changed)
            .count();

        let output = ctx.output_path();
        write_graph(&output, &graph)?;
        info!(updated, specifics = specifics.len(), "[STEP] Updated expiration times");
        Ok(StepOutcome::Produced(output))
    }
}
