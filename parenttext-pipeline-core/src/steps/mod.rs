//! Step handlers and the registry that dispatches to them.
//!
//! A handler consumes the previous step's artifact (if any) plus the cached data
//! of its sources, and reports either a new artifact or that it produced nothing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{Config, SheetsSource, SourceConfig, StepConfig, StepKind};
use crate::contract::ExternalTool;
use crate::error::StepError;

mod flows;
mod postprocess;
mod translation;

pub use flows::{CreateFlows, Edits, LoadFlows, UpdateExpirationTimes};
pub use postprocess::{QrTreatmentStep, Safeguarding};
pub use translation::{
    ExtractTextsForTranslators, FixArgQrTranslation, HasAnyWordCheck, OverallIntegrityCheck, Translation,
};

/// Result of one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// A new flow file; it becomes the input of the next step.
    Produced(PathBuf),
    /// Nothing new; the previous artifact stays the active input.
    Unchanged,
}

/// Everything a handler may look at while applying one step.
pub struct StepContext<'a> {
    pub config: &'a Config,
    pub step: &'a StepConfig,
    /// 1-based position of the step in the pipeline.
    pub step_number: usize,
    pub input: Option<&'a Path>,
    pub tool: &'a dyn ExternalTool,
}

impl<'a> StepContext<'a> {
    /// Path this step writes its artifact to.
    pub fn output_path(&self) -> PathBuf {
        self.config.step_output_path(self.step_number, &self.step.id)
    }

    /// File stem of [`Self::output_path`], as expected by tools that take a name and a directory.
    pub fn output_name(&self) -> String {
        format!(
            "{}_{}_{}",
            self.config.flows_outputbasename, self.step_number, self.step.id
        )
    }

    pub fn temp_dir(&self) -> &Path {
        &self.config.temppath
    }

    /// Name of a log file for this step, relative to the tool's output directory.
    pub fn log_name(&self, suffix: &str) -> String {
        format!("{}_{}", self.step_number, suffix)
    }

    pub fn require_input(&self) -> Result<&'a Path, StepError> {
        self.input.ok_or_else(|| StepError::MissingInput {
            step: self.step.id.clone(),
        })
    }

    pub fn require_sources(&self) -> Result<&'a [String], StepError> {
        if self.step.sources.is_empty() {
            return Err(StepError::MissingSources {
                step: self.step.id.clone(),
            });
        }
        Ok(&self.step.sources)
    }

    pub fn source(&self, name: &str) -> Result<&'a SourceConfig, StepError> {
        self.config
            .sources
            .get(name)
            .ok_or_else(|| StepError::MissingSources {
                step: self.step.id.clone(),
            })
    }

    pub fn wrong_format(&self, source_name: &str, expected: &'static str) -> StepError {
        StepError::WrongSourceFormat {
            step: self.step.id.clone(),
            source_name: source_name.to_owned(),
            expected,
        }
    }

    pub fn mismatch(&self, expected: &'static str) -> StepError {
        StepError::ConfigMismatch {
            step: self.step.id.clone(),
            expected,
        }
    }

    /// Cached `{name}.json` files of every `sheets` source of this step, in declaration order.
    pub fn sheet_files(&self) -> Result<Vec<PathBuf>, StepError> {
        let mut files = Vec::new();
        for source_name in self.require_sources()? {
            let SourceConfig::Sheets(sheets) = self.source(source_name)? else {
                return Err(self.wrong_format(source_name, "sheets"));
            };
            let dir = self.config.source_input_dir(source_name);
            files.extend(sheet_names(sheets).into_iter().map(|n| dir.join(format!("{n}.json"))));
        }
        Ok(files)
    }

    /// Cached file `{key}.json` of the first `json` source declaring `key`.
    pub fn json_source_file(&self, key: &str) -> Option<PathBuf> {
        self.step.sources.iter().find_map(|source_name| {
            match self.config.sources.get(source_name) {
                Some(SourceConfig::Json(json)) if json.files_dict.get(key).is_some_and(Option::is_some) => {
                    Some(self.config.source_input_dir(source_name).join(format!("{key}.json")))
                }
                _ => None,
            }
        })
    }
}

/// Local identifiers of a sheets source: `files_list` entries first, then `files_dict` keys.
pub fn sheet_names(sheets: &SheetsSource) -> Vec<String> {
    sheets
        .files_list
        .iter()
        .cloned()
        .chain(sheets.files_dict.keys().cloned())
        .collect()
}

pub(crate) fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Renders a config scalar the way it appears on a command line.
pub(crate) fn scalar_arg(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn apply(&self, ctx: &StepContext<'_>) -> Result<StepOutcome, StepError>;
}

/// Maps each step type to its handler. Built once per run and passed to the executor.
#[derive(Clone, Default)]
pub struct StepRegistry {
    handlers: HashMap<StepKind, Arc<dyn StepHandler>>,
}

impl StepRegistry {
    pub fn empty() -> Self {
        StepRegistry::default()
    }

    /// Registry with a handler for every known step type.
    pub fn standard() -> Self {
        let mut registry = StepRegistry::empty();
        registry
            .register(StepKind::CreateFlows, Arc::new(CreateFlows))
            .register(StepKind::LoadFlows, Arc::new(LoadFlows))
            .register(StepKind::Edits, Arc::new(Edits))
            .register(StepKind::Translation, Arc::new(Translation))
            .register(StepKind::Safeguarding, Arc::new(Safeguarding))
            .register(StepKind::UpdateExpirationTimes, Arc::new(UpdateExpirationTimes))
            .register(StepKind::QrTreatment, Arc::new(QrTreatmentStep))
            .register(StepKind::ExtractTextsForTranslators, Arc::new(ExtractTextsForTranslators))
            .register(StepKind::FixArgQrTranslation, Arc::new(FixArgQrTranslation))
            .register(StepKind::HasAnyWordCheck, Arc::new(HasAnyWordCheck))
            .register(StepKind::OverallIntegrityCheck, Arc::new(OverallIntegrityCheck));
        registry
    }

    pub fn register(&mut self, kind: StepKind, handler: Arc<dyn StepHandler>) -> &mut Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn get(&self, kind: StepKind) -> Result<Arc<dyn StepHandler>, StepError> {
        self.handlers
            .get(&kind)
            .cloned()
            .ok_or_else(|| StepError::NoHandler(kind.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_covers_every_step_type() {
        let registry = StepRegistry::standard();
        for kind in StepKind::ALL {
            assert!(registry.get(kind).is_ok(), "missing handler for {kind}");
        }
    }

    #[test]
    fn scalar_args_render_without_quotes() {
        assert_eq!(scalar_arg(Some(&Value::from("yes"))), "yes");
        assert_eq!(scalar_arg(Some(&Value::from(3))), "3");
        assert_eq!(scalar_arg(None), "");
    }
}
