//! The `compile_flows` operation: run every configured step in order, then split.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::Config;
use crate::contract::ExternalTool;
use crate::error::{PipelineError, StepError};
use crate::fs_util::clear_or_create_dir;
use crate::split::split;
use crate::steps::{StepContext, StepOutcome, StepRegistry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileReport {
    /// Artifact of the last step that produced one.
    pub final_artifact: PathBuf,
    /// Files written to the output directory.
    pub outputs: Vec<PathBuf>,
}

fn reset_dir(path: &Path) -> Result<(), PipelineError> {
    clear_or_create_dir(path).map_err(|e| PipelineError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Applies the steps one after the other, threading each produced artifact into
/// the next step. Steps reporting [`StepOutcome::Unchanged`] leave the current
/// artifact in place.
pub async fn apply_steps(
    config: &Config,
    registry: &StepRegistry,
    tool: &dyn ExternalTool,
) -> Result<PathBuf, StepError> {
    let mut current: Option<PathBuf> = None;

    for (index, step) in config.steps.iter().enumerate() {
        let handler = registry.get(step.kind())?;
        let ctx = StepContext {
            config,
            step,
            step_number: index + 1,
            input: current.as_deref(),
            tool,
        };
        let outcome = handler.apply(&ctx).await?;
        if let StepOutcome::Produced(path) = outcome {
            current = Some(path);
        }
        info!(
            step_id = %step.id,
            step_type = %step.kind(),
            "[COMPILE] Applied step {}, result stored at {}",
            step.kind(),
            current
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "None".to_owned())
        );
    }

    current.ok_or(StepError::NoArtifact)
}

/// Clears the output and temp directories, applies all steps and splits the result.
pub async fn run(
    config: &Config,
    registry: &StepRegistry,
    tool: &dyn ExternalTool,
) -> Result<CompileReport, PipelineError> {
    reset_dir(&config.outputpath)?;
    reset_dir(&config.temppath)?;

    let final_artifact = apply_steps(config, registry, tool).await?;
    let outputs = split(config, &final_artifact)?;
    info!(
        outputs = outputs.len(),
        output_dir = ?config.outputpath,
        "[COMPILE] Result written to output folder"
    );

    Ok(CompileReport {
        final_artifact,
        outputs,
    })
}
