//! The `pot_output` operation: one translator template (`.pot`) per content group.

use std::fs;
use std::path::PathBuf;

use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::compile_flows::apply_steps;
use crate::config::Config;
use crate::contract::ExternalTool;
use crate::error::PipelineError;
use crate::fs_util::clear_or_create_dir;
use crate::meta::{read_meta, write_meta, PullMeta};
use crate::split::split;
use crate::steps::StepRegistry;

pub const FLOW_DEFINITIONS_SOURCE: &str = "flow_definitions";

/// Content groups and the `create_flows` tag filter selecting each.
pub fn pot_groups() -> Vec<(&'static str, Vec<Value>)> {
    let tags = |v: Value| v.as_array().cloned().unwrap_or_default();
    vec![
        ("modules", tags(json!([1, "module"]))),
        ("activities", tags(json!([1, "ltp_activity"]))),
        ("onboarding", tags(json!([1, "onboarding"]))),
        ("survey", tags(json!([1, "survey"]))),
        (
            "navigation",
            tags(json!([1, "delivery", 1, "menu", 1, "safeguarding"])),
        ),
    ]
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PotReport {
    pub written: Vec<PathBuf>,
    pub failed_groups: Vec<String>,
}

pub async fn run(
    config: &Config,
    registry: &StepRegistry,
    tool: &dyn ExternalTool,
) -> Result<PotReport, PipelineError> {
    for dir in [&config.outputpath, &config.temppath] {
        clear_or_create_dir(dir).map_err(|e| PipelineError::Io {
            path: dir.clone(),
            source: e,
        })?;
    }
    info!("[POT] Compiling .pot files...");

    match read_meta(&config.inputpath) {
        Some(meta) => {
            let copied = PullMeta {
                pull_timestamp: meta.pull_timestamp,
                pipeline_version: None,
                config_version: None,
            };
            write_meta(&config.outputpath, &copied)?;
        }
        None => warn!("[POT] No pull metadata found, output is not stamped"),
    }

    let language = config
        .first_translation_language()
        .map(|l| l.language.clone())
        .unwrap_or_else(|| "eng".to_owned());
    let translator_dir = config.translator_output_dir();
    let produced = translator_dir.join(format!("{}_crowdin.pot", config.flows_outputbasename));

    let mut report = PotReport::default();
    for (group, tags) in pot_groups() {
        let group_config = config.with_create_flows_override(vec![FLOW_DEFINITIONS_SOURCE.to_owned()], tags);

        let compiled = match apply_steps(&group_config, registry, tool).await {
            Ok(artifact) => split(&group_config, &artifact).map_err(PipelineError::from),
            Err(e) => Err(PipelineError::from(e)),
        };
        if let Err(e) = compiled {
            error!(group, error = %e, "[POT] Compiling group failed");
            // A template extracted before the failure is not trusted.
            if produced.exists() {
                fs::remove_file(&produced).map_err(|source| PipelineError::Io {
                    path: produced.clone(),
                    source,
                })?;
            }
            report.failed_groups.push(group.to_owned());
            continue;
        }

        let target = translator_dir.join(format!("{language}_{group}.pot"));
        match fs::rename(&produced, &target) {
            Ok(()) => {
                info!(group, pot = ?target, "[POT] Wrote translator template");
                report.written.push(target);
            }
            Err(e) => {
                error!(group, error = %e, "[POT] No translator template produced");
                report.failed_groups.push(group.to_owned());
            }
        }
    }

    info!(failed_groups = ?report.failed_groups, "[POT] Failed Groups");
    Ok(report)
}
