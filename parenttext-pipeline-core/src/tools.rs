//! Subprocess-backed implementations of [`ExternalTool`] and [`SheetConverter`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::SheetSubformat;
use crate::contract::{run_checked, ExternalTool, SheetConverter, ToolInvocation, ToolStatus};
use crate::error::{RemoteError, ToolError};

pub const TRANSLATION_COMMON: &str = "translation_common";
pub const TRANSLATION_CHATBOT: &str = "translation_chatbot";
pub const SAFEGUARDING_ADD: &str = "safeguarding_add";
pub const SAFEGUARDING_REDIRECT: &str = "safeguarding_redirect";
pub const RPFT: &str = "rpft";
pub const ABTESTING: &str = "abtesting";

fn node_script(script: &str) -> Vec<String> {
    vec!["node".to_owned(), format!("node_modules/@idems/{script}")]
}

/// Command lines used when the config does not override a tool.
pub fn default_commands() -> BTreeMap<String, Vec<String>> {
    BTreeMap::from([
        (
            TRANSLATION_COMMON.to_owned(),
            node_script("idems_translation_common/index.js"),
        ),
        (
            TRANSLATION_CHATBOT.to_owned(),
            node_script("idems_translation_chatbot/index.js"),
        ),
        (
            SAFEGUARDING_ADD.to_owned(),
            node_script("safeguarding-rapidpro/v2_add_safeguarding_to_flows.js"),
        ),
        (
            SAFEGUARDING_REDIRECT.to_owned(),
            node_script("safeguarding-rapidpro/v2_edit_redirect_flow.js"),
        ),
        (RPFT.to_owned(), vec!["rpft".to_owned()]),
        (
            ABTESTING.to_owned(),
            vec![
                "python".to_owned(),
                "-m".to_owned(),
                "rapidpro_abtesting.main".to_owned(),
            ],
        ),
    ])
}

/// Resolves logical tool names to command lines and runs them with `tokio::process`.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    commands: BTreeMap<String, Vec<String>>,
    working_dir: Option<PathBuf>,
}

impl CommandRunner {
    /// Defaults overlaid with `overrides` (usually the config's `tools` map).
    pub fn new(overrides: &BTreeMap<String, Vec<String>>) -> Self {
        let mut commands = default_commands();
        commands.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        CommandRunner {
            commands,
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn command_for(&self, tool: &str) -> Result<&[String], ToolError> {
        let command = self
            .commands
            .get(tool)
            .ok_or_else(|| ToolError::UnknownTool(tool.to_owned()))?;
        if command.is_empty() {
            return Err(ToolError::EmptyCommand {
                tool: tool.to_owned(),
            });
        }
        Ok(command)
    }
}

#[async_trait]
impl ExternalTool for CommandRunner {
    async fn invoke(&self, invocation: &ToolInvocation) -> Result<ToolStatus, ToolError> {
        let command = self.command_for(&invocation.tool)?;
        let (program, prefix) = command
            .split_first()
            .ok_or_else(|| ToolError::EmptyCommand {
                tool: invocation.tool.clone(),
            })?;

        let mut cmd = Command::new(program);
        cmd.args(prefix).args(&invocation.args);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        match cmd.status().await {
            Ok(status) => {
                tracing::info!(
                    tool = %invocation.tool,
                    program = %program,
                    status = ?status,
                    "[TOOL] External tool finished"
                );
                Ok(ToolStatus {
                    code: status.code(),
                })
            }
            Err(e) => {
                tracing::error!(
                    error = ?e,
                    tool = %invocation.tool,
                    program = %program,
                    "[TOOL] Failed to launch external tool"
                );
                Err(ToolError::Launch {
                    program: program.clone(),
                    source: e,
                })
            }
        }
    }
}

/// Converts spreadsheets to JSON through the `rpft` tool, reading back the file it writes.
pub struct RpftSheetConverter {
    tool: Arc<dyn ExternalTool>,
    scratch: PathBuf,
}

impl RpftSheetConverter {
    pub fn new(tool: Arc<dyn ExternalTool>, scratch: impl Into<PathBuf>) -> Self {
        RpftSheetConverter {
            tool,
            scratch: scratch.into(),
        }
    }
}

#[async_trait]
impl SheetConverter for RpftSheetConverter {
    async fn to_json(&self, subformat: SheetSubformat, location: &str) -> Result<String, RemoteError> {
        tokio::fs::create_dir_all(&self.scratch).await?;
        // Parallel conversions share the scratch dir, so each needs its own file.
        let out = tempfile::Builder::new()
            .prefix("sheet_")
            .suffix(".json")
            .tempfile_in(&self.scratch)?;
        let out_path = out.path().to_string_lossy().into_owned();

        run_checked(
            self.tool.as_ref(),
            ToolInvocation::new(
                RPFT,
                [
                    "sheets_to_uni",
                    "--format",
                    subformat.as_str(),
                    location,
                    out_path.as_str(),
                ],
            ),
        )
        .await?;

        Ok(tokio::fs::read_to_string(out.path()).await?)
    }
}
