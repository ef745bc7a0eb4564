//! Typed pipeline configuration.
//!
//! A configuration is loaded once per process from a JSON or YAML document and
//! never mutated afterwards. Loading happens in two explicit stages:
//!
//! 1. The document is parsed into a generic [`serde_json::Value`]. If it lacks the
//!    top-level `meta` key it is a legacy document and is run through
//!    [`convert_legacy_config`], a pure function producing the current layout.
//! 2. Steps and sources are resolved into their typed variants by looking up the
//!    `type`/`format` discriminator first ([`StepKind`], [`SourceFormat`]), so a
//!    typo produces a named error instead of a silently skipped step.
//!
//! After construction [`Config::validate`] checks cross references (every step
//! source must be declared) and the per-variant requirements.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config_converter::convert_legacy_config;
use crate::error::ConfigError;
use crate::PIPELINE_VERSION;

/// File names probed, in order, when `load_config` is pointed at a directory.
pub const CONFIG_FILE_NAMES: [&str; 3] = ["config.json", "config.yaml", "config.yml"];

const DEFAULT_FETCH_CONCURRENCY: usize = 8;

/// Data model module used when a derived `create_flows` step has none.
pub const DEFAULT_MODELS_MODULE: &str = "models.parenttext_models";

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn default_temppath() -> PathBuf {
    PathBuf::from("temp")
}

fn default_outputpath() -> PathBuf {
    PathBuf::from("output")
}

fn default_inputpath() -> PathBuf {
    PathBuf::from("input")
}

fn default_qr_limit() -> u32 {
    10
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ConfigMeta {
    pub pipeline_version: String,
    #[serde(default)]
    pub config_version: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// A language pair: `language` is the 3-letter RapidPro code, `code` the
/// 2-letter code used by the translation platform.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Language {
    pub language: String,
    pub code: String,
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceFormat {
    Sheets,
    Json,
    TranslationRepo,
    Safeguarding,
    MediaAssets,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Sheets => "sheets",
            SourceFormat::Json => "json",
            SourceFormat::TranslationRepo => "translation_repo",
            SourceFormat::Safeguarding => "safeguarding",
            SourceFormat::MediaAssets => "media_assets",
        }
    }
}

impl FromStr for SourceFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sheets" => Ok(SourceFormat::Sheets),
            "json" => Ok(SourceFormat::Json),
            "translation_repo" => Ok(SourceFormat::TranslationRepo),
            "safeguarding" => Ok(SourceFormat::Safeguarding),
            "media_assets" => Ok(SourceFormat::MediaAssets),
            _ => Err(()),
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum SourceConfig {
    Sheets(SheetsSource),
    Json(JsonSource),
    TranslationRepo(TranslationSource),
    Safeguarding(SafeguardingSource),
    MediaAssets(MediaAssetsSource),
}

impl SourceConfig {
    pub fn format(&self) -> SourceFormat {
        match self {
            SourceConfig::Sheets(_) => SourceFormat::Sheets,
            SourceConfig::Json(_) => SourceFormat::Json,
            SourceConfig::TranslationRepo(_) => SourceFormat::TranslationRepo,
            SourceConfig::Safeguarding(_) => SourceFormat::Safeguarding,
            SourceConfig::MediaAssets(_) => SourceFormat::MediaAssets,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SheetSubformat {
    GoogleSheets,
    Csv,
    Json,
    Xlsx,
}

impl SheetSubformat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SheetSubformat::GoogleSheets => "google_sheets",
            SheetSubformat::Csv => "csv",
            SheetSubformat::Json => "json",
            SheetSubformat::Xlsx => "xlsx",
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, SheetSubformat::GoogleSheets)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SheetsSource {
    pub subformat: SheetSubformat,
    /// Each `(name, location)` entry is stored as `{name}.json`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub files_dict: BTreeMap<String, String>,
    /// Sheet ids (or folder names inside `files_archive`), each stored under its own name.
    #[serde(default, deserialize_with = "null_as_default")]
    pub files_list: Vec<String>,
    /// Path or URL of a zip archive holding the sheets.
    #[serde(default)]
    pub files_archive: Option<String>,
    /// Base directory for local subformats when no archive is given.
    #[serde(default)]
    pub basepath: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct JsonSource {
    #[serde(default, deserialize_with = "null_as_default")]
    pub files_dict: BTreeMap<String, Option<PathBuf>>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TranslationSource {
    #[serde(default, deserialize_with = "null_as_default")]
    pub languages: Vec<Language>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub translation_repo: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub folder_within_repo: String,
    #[serde(default)]
    pub commit_hash: Option<String>,
    #[serde(default)]
    pub commit_tag: Option<String>,
}

/// One safeguarding workbook, either a local path or a Drive/Sheets id.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct WorkbookSource {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

impl WorkbookSource {
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref().or(self.path.as_deref())
    }

    pub fn language_key(&self) -> &str {
        self.key.as_deref().unwrap_or("unknown")
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SafeguardingSource {
    #[serde(default)]
    pub filepath: Option<PathBuf>,
    #[serde(default)]
    pub sources: Option<Vec<WorkbookSource>>,
}

/// Media asset settings are carried through untouched; no operation consumes them.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MediaAssetsSource {
    #[serde(flatten)]
    pub settings: serde_json::Map<String, Value>,
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StepKind {
    CreateFlows,
    LoadFlows,
    Edits,
    Translation,
    Safeguarding,
    UpdateExpirationTimes,
    QrTreatment,
    ExtractTextsForTranslators,
    FixArgQrTranslation,
    HasAnyWordCheck,
    OverallIntegrityCheck,
}

impl StepKind {
    pub const ALL: [StepKind; 11] = [
        StepKind::CreateFlows,
        StepKind::LoadFlows,
        StepKind::Edits,
        StepKind::Translation,
        StepKind::Safeguarding,
        StepKind::UpdateExpirationTimes,
        StepKind::QrTreatment,
        StepKind::ExtractTextsForTranslators,
        StepKind::FixArgQrTranslation,
        StepKind::HasAnyWordCheck,
        StepKind::OverallIntegrityCheck,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::CreateFlows => "create_flows",
            StepKind::LoadFlows => "load_flows",
            StepKind::Edits => "edits",
            StepKind::Translation => "translation",
            StepKind::Safeguarding => "safeguarding",
            StepKind::UpdateExpirationTimes => "update_expiration_times",
            StepKind::QrTreatment => "qr_treatment",
            StepKind::ExtractTextsForTranslators => "extract_texts_for_translators",
            StepKind::FixArgQrTranslation => "fix_arg_qr_translation",
            StepKind::HasAnyWordCheck => "has_any_word_check",
            StepKind::OverallIntegrityCheck => "overall_integrity_check",
        }
    }
}

impl FromStr for StepKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StepKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or(())
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StepConfig {
    pub id: String,
    /// Names of the sources this step reads; order is significant for some handlers.
    #[serde(default, deserialize_with = "null_as_default")]
    pub sources: Vec<String>,
    #[serde(flatten)]
    pub params: StepParams,
}

impl StepConfig {
    pub fn kind(&self) -> StepKind {
        self.params.kind()
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepParams {
    CreateFlows(CreateFlowsParams),
    LoadFlows,
    Edits,
    Translation(TranslationParams),
    Safeguarding(SafeguardingParams),
    UpdateExpirationTimes(ExpirationParams),
    QrTreatment(QrTreatmentParams),
    ExtractTextsForTranslators,
    FixArgQrTranslation,
    HasAnyWordCheck,
    OverallIntegrityCheck,
}

impl StepParams {
    pub fn kind(&self) -> StepKind {
        match self {
            StepParams::CreateFlows(_) => StepKind::CreateFlows,
            StepParams::LoadFlows => StepKind::LoadFlows,
            StepParams::Edits => StepKind::Edits,
            StepParams::Translation(_) => StepKind::Translation,
            StepParams::Safeguarding(_) => StepKind::Safeguarding,
            StepParams::UpdateExpirationTimes(_) => StepKind::UpdateExpirationTimes,
            StepParams::QrTreatment(_) => StepKind::QrTreatment,
            StepParams::ExtractTextsForTranslators => StepKind::ExtractTextsForTranslators,
            StepParams::FixArgQrTranslation => StepKind::FixArgQrTranslation,
            StepParams::HasAnyWordCheck => StepKind::HasAnyWordCheck,
            StepParams::OverallIntegrityCheck => StepKind::OverallIntegrityCheck,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CreateFlowsParams {
    /// Data model module handed to the flow converter.
    #[serde(default)]
    pub models_module: Option<String>,
    /// Tag filter; entries are either numbers (tag position) or strings.
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TranslationParams {
    #[serde(default, deserialize_with = "null_as_default")]
    pub languages: Vec<Language>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SafeguardingParams {
    #[serde(default)]
    pub flow_uuid: Option<String>,
    #[serde(default)]
    pub flow_name: Option<String>,
    #[serde(default)]
    pub redirect_flow_names: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ExpirationParams {
    /// Applied to every flow without a specific entry; `None` leaves such flows untouched.
    #[serde(default)]
    pub default_expiration_time: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QrTreatment {
    Move,
    MoveAndMod,
    Reformat,
    ReformatChina,
    Wechat,
    #[default]
    #[serde(rename = "none")]
    Skip,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct QrTreatmentParams {
    #[serde(default, deserialize_with = "null_as_default")]
    pub qr_treatment: QrTreatment,
    #[serde(default = "default_qr_limit")]
    pub qr_limit: u32,
    #[serde(default)]
    pub count_threshold: Option<Value>,
    #[serde(default)]
    pub length_threshold: Option<Value>,
    #[serde(default)]
    pub add_selectors: Option<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub replace_phrases: String,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub meta: ConfigMeta,
    /// Parent repositories; accepted but not compiled into sources.
    pub parents: Option<Value>,
    pub sources: BTreeMap<String, SourceConfig>,
    pub steps: Vec<StepConfig>,
    pub temppath: PathBuf,
    pub outputpath: PathBuf,
    pub inputpath: PathBuf,
    pub flows_outputbasename: String,
    pub output_split_number: usize,
    /// Friendly sheet name -> remote sheet id.
    pub sheet_names: BTreeMap<String, String>,
    /// Logical tool name -> command line override.
    pub tools: BTreeMap<String, Vec<String>>,
    pub fetch_concurrency: usize,
}

#[derive(Deserialize)]
struct RawConfig {
    meta: ConfigMeta,
    #[serde(default)]
    parents: Option<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    sources: BTreeMap<String, Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    steps: Vec<Value>,
    #[serde(default = "default_temppath")]
    temppath: PathBuf,
    #[serde(default = "default_outputpath")]
    outputpath: PathBuf,
    #[serde(default = "default_inputpath")]
    inputpath: PathBuf,
    flows_outputbasename: String,
    #[serde(default)]
    output_split_number: Option<usize>,
    #[serde(default, deserialize_with = "null_as_default")]
    sheet_names: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "null_as_default")]
    tools: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    fetch_concurrency: Option<usize>,
}

fn resolve_step(index: usize, value: Value) -> Result<StepConfig, ConfigError> {
    let step_label = value
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_else(|| format!("#{}", index + 1));

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ConfigError::MissingStepType {
            step: step_label.clone(),
        })?;
    if StepKind::from_str(kind).is_err() {
        return Err(ConfigError::UnknownStepType {
            step: step_label,
            kind: kind.to_owned(),
        });
    }

    serde_json::from_value(value).map_err(|e| ConfigError::InvalidStep {
        step: step_label,
        reason: e.to_string(),
    })
}

fn resolve_source(name: &str, value: Value) -> Result<SourceConfig, ConfigError> {
    let format = value
        .get("format")
        .and_then(Value::as_str)
        .ok_or_else(|| ConfigError::MissingSourceFormat {
            source_name: name.to_owned(),
        })?;
    if SourceFormat::from_str(format).is_err() {
        return Err(ConfigError::UnknownSourceFormat {
            source_name: name.to_owned(),
            format: format.to_owned(),
        });
    }

    serde_json::from_value(value).map_err(|e| ConfigError::InvalidSource {
        source_name: name.to_owned(),
        reason: e.to_string(),
    })
}

impl Config {
    /// Builds a validated config from a parsed document, converting legacy layouts first.
    pub fn from_value(value: Value) -> Result<Config, ConfigError> {
        if !value.is_object() {
            return Err(ConfigError::Parse(
                "configuration must be a JSON/YAML object".to_owned(),
            ));
        }

        let value = if value.get("meta").is_none() {
            warn!("[CONFIG] No `meta` key found, converting legacy configuration");
            convert_legacy_config(&value, PIPELINE_VERSION)
        } else {
            value
        };

        let raw: RawConfig =
            serde_json::from_value(value).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let steps = raw
            .steps
            .into_iter()
            .enumerate()
            .map(|(index, step)| resolve_step(index, step))
            .collect::<Result<Vec<_>, _>>()?;

        let sources = raw
            .sources
            .into_iter()
            .map(|(name, source)| resolve_source(&name, source).map(|s| (name, s)))
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        let config = Config {
            meta: raw.meta,
            parents: raw.parents,
            sources,
            steps,
            temppath: raw.temppath,
            outputpath: raw.outputpath,
            inputpath: raw.inputpath,
            flows_outputbasename: raw.flows_outputbasename,
            output_split_number: raw.output_split_number.unwrap_or(1),
            sheet_names: raw.sheet_names,
            tools: raw.tools,
            fetch_concurrency: raw
                .fetch_concurrency
                .unwrap_or(DEFAULT_FETCH_CONCURRENCY)
                .max(1),
        };
        config.validate()?;
        config.trace_loaded();
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output_split_number == 0 {
            return Err(ConfigError::InvalidSplitNumber);
        }

        let mut seen = BTreeSet::new();
        for step in &self.steps {
            if !seen.insert(step.id.as_str()) {
                return Err(ConfigError::DuplicateStepId(step.id.clone()));
            }
            for source_name in &step.sources {
                if !self.sources.contains_key(source_name) {
                    return Err(ConfigError::UndeclaredSource {
                        step: step.id.clone(),
                        source_name: source_name.clone(),
                    });
                }
            }
            if let StepParams::Safeguarding(params) = &step.params {
                let has_flow = params.flow_uuid.is_some() && params.flow_name.is_some();
                if !has_flow && params.redirect_flow_names.is_none() {
                    return Err(ConfigError::InvalidStep {
                        step: step.id.clone(),
                        reason: "either flow_uuid and flow_name or redirect_flow_names must be provided"
                            .to_owned(),
                    });
                }
            }
        }

        for (name, source) in &self.sources {
            match source {
                SourceConfig::Safeguarding(sg) => {
                    let has_workbooks = sg.sources.as_ref().is_some_and(|s| !s.is_empty());
                    if sg.filepath.is_none() && !has_workbooks {
                        return Err(ConfigError::InvalidSource {
                            source_name: name.clone(),
                            reason: "either filepath or sources needs to be provided".to_owned(),
                        });
                    }
                    if let Some(workbooks) = &sg.sources {
                        if workbooks.iter().any(|w| w.location().is_none()) {
                            return Err(ConfigError::InvalidSource {
                                source_name: name.clone(),
                                reason: "every workbook needs a path or location".to_owned(),
                            });
                        }
                    }
                }
                SourceConfig::Sheets(sheets) => {
                    if sheets.files_archive.is_some() && sheets.subformat.is_remote() {
                        return Err(ConfigError::InvalidSource {
                            source_name: name.clone(),
                            reason: "files_archive not supported for sheets of subformat google_sheets"
                                .to_owned(),
                        });
                    }
                }
                _ => {}
            }
        }

        if self.parents.as_ref().is_some_and(|p| !is_empty_value(p)) {
            warn!("[CONFIG] `parents` are declared but parent compilation is not supported; ignoring");
        }
        Ok(())
    }

    pub fn trace_loaded(&self) {
        info!(
            pipeline_version = %self.meta.pipeline_version,
            sources_count = self.sources.len(),
            steps_count = self.steps.len(),
            output_split_number = self.output_split_number,
            "[CONFIG] Loaded Config"
        );
        debug!(?self, "[CONFIG] Config loaded (full debug)");
    }

    /// Cache directory of a source under the input path.
    pub fn source_input_dir(&self, source_name: &str) -> PathBuf {
        self.inputpath.join(source_name)
    }

    /// Scratch directory of a source under the temp path.
    pub fn source_temp_dir(&self, source_name: &str) -> PathBuf {
        self.temppath.join(source_name)
    }

    /// Where a step writes the artifact it produces.
    pub fn step_output_path(&self, step_number: usize, step_id: &str) -> PathBuf {
        self.temppath.join(format!(
            "{}_{}_{}.json",
            self.flows_outputbasename, step_number, step_id
        ))
    }

    /// Directory for files meant for translators.
    pub fn translator_output_dir(&self) -> PathBuf {
        self.outputpath.join("send_to_translators")
    }

    /// Remote id of a sheet referenced by name; names without a mapping are ids already.
    pub fn resolve_sheet_id(&self, sheet_name: &str) -> String {
        self.sheet_names
            .get(sheet_name)
            .cloned()
            .unwrap_or_else(|| sheet_name.to_owned())
    }

    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.get(name)
    }

    /// First language of the first translation-repo source, if any.
    pub fn first_translation_language(&self) -> Option<&Language> {
        self.sources.values().find_map(|source| match source {
            SourceConfig::TranslationRepo(t) => t.languages.first(),
            _ => None,
        })
    }

    /// Returns a copy whose first step is a `create_flows` step over `sources`
    /// filtered by `tags`. The original config is left untouched.
    pub fn with_create_flows_override(&self, sources: Vec<String>, tags: Vec<Value>) -> Config {
        let mut derived = self.clone();
        let models_module = derived
            .steps
            .first()
            .and_then(|step| match &step.params {
                StepParams::CreateFlows(params) => params.models_module.clone(),
                _ => None,
            })
            .or_else(|| Some(DEFAULT_MODELS_MODULE.to_owned()));
        let step = StepConfig {
            id: "create_flows".to_owned(),
            sources,
            params: StepParams::CreateFlows(CreateFlowsParams {
                models_module,
                tags,
            }),
        };
        if derived.steps.is_empty() {
            derived.steps.push(step);
        } else {
            derived.steps[0] = step;
        }
        derived
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn locate_config(path: &Path) -> Result<PathBuf, ConfigError> {
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    if path.is_dir() {
        if let Some(found) = CONFIG_FILE_NAMES
            .iter()
            .map(|name| path.join(name))
            .find(|candidate| candidate.is_file())
        {
            return Ok(found);
        }
    }
    error!(config_path = ?path, "[CONFIG] No configuration file found");
    Err(ConfigError::NotFound(path.to_path_buf()))
}

/// Loads a configuration from a file, or from the first known config file in a directory.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let config_file = locate_config(path.as_ref())?;
    info!(config_path = ?config_file, "[CONFIG] Loading configuration from file");

    let content = fs::read_to_string(&config_file).map_err(|e| {
        error!(error = ?e, config_path = ?config_file, "[CONFIG] Failed to read config file");
        ConfigError::Read {
            path: config_file.clone(),
            source: e,
        }
    })?;

    let is_yaml = config_file
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext == "yaml" || ext == "yml");

    let value: Value = if is_yaml {
        serde_yaml::from_str(&content).map_err(|e| {
            error!(error = ?e, config_path = ?config_file, "[CONFIG] Failed to parse config YAML");
            ConfigError::Parse(format!("invalid YAML: {e}"))
        })?
    } else {
        serde_json::from_str(&content).map_err(|e| {
            error!(error = ?e, config_path = ?config_file, "[CONFIG] Failed to parse config JSON");
            ConfigError::Parse(format!("invalid JSON: {e}"))
        })?
    };

    Config::from_value(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_kind_round_trips_through_its_name() {
        for kind in StepKind::ALL {
            assert_eq!(StepKind::from_str(kind.as_str()), Ok(kind));
        }
        assert!(StepKind::from_str("postprocessing").is_err());
    }

    #[test]
    fn sheet_name_without_mapping_is_its_own_id() {
        let mut config = Config::from_value(serde_json::json!({
            "meta": {"pipeline_version": "1.0.0"},
            "flows_outputbasename": "out",
        }))
        .unwrap();
        assert_eq!(config.resolve_sheet_id("abc"), "abc");
        config
            .sheet_names
            .insert("content".into(), "1xyz".into());
        assert_eq!(config.resolve_sheet_id("content"), "1xyz");
    }
}
