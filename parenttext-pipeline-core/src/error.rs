//! Error types for every stage of the pipeline.
//!
//! Configuration problems are fatal and surface before any work starts. Remote
//! fetch problems are usually recovered inside the source resolver and only
//! appear here when a whole source cannot be processed. Step failures abort the
//! compile run.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no configuration found at {0}")]
    NotFound(PathBuf),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("unknown step type `{kind}` in step `{step}`")]
    UnknownStepType { step: String, kind: String },

    #[error("unknown source format `{format}` for source `{source_name}`")]
    UnknownSourceFormat { source_name: String, format: String },

    #[error("step `{step}` is missing its `type` field")]
    MissingStepType { step: String },

    #[error("source `{source_name}` is missing its `format` field")]
    MissingSourceFormat { source_name: String },

    #[error("invalid step `{step}`: {reason}")]
    InvalidStep { step: String, reason: String },

    #[error("invalid source `{source_name}`: {reason}")]
    InvalidSource { source_name: String, reason: String },

    #[error("step `{step}` references undeclared source `{source_name}`")]
    UndeclaredSource { step: String, source_name: String },

    #[error("duplicate step id `{0}`")]
    DuplicateStepId(String),

    #[error("output_split_number must be at least 1")]
    InvalidSplitNumber,

    #[error("invalid pipeline version `{version}`: {reason}")]
    InvalidVersion { version: String, reason: String },

    #[error("pipeline version of the config {config} is newer than actual pipeline version {running}")]
    PipelineTooOld { config: String, running: String },

    #[error("major of config pipeline version {config} does not match major of actual pipeline version {running}")]
    MajorMismatch { config: String, running: String },
}

/// Failure of a remote collaborator (Drive, GitHub, archive download).
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response from {url}: {reason}")]
    Unexpected { url: String, reason: String },

    #[error("invalid repository url `{0}`")]
    InvalidRepoUrl(String),

    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Tool(#[from] ToolError),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool `{0}`")]
    UnknownTool(String),

    #[error("tool `{tool}` has an empty command line")]
    EmptyCommand { tool: String },

    #[error("failed to launch `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{tool} {args}` exited with status {code:?}")]
    Failed {
        tool: String,
        args: String,
        code: Option<i32>,
    },
}

#[derive(Debug, Error)]
pub enum KeywordError {
    #[error("failed to open workbook {path}: {reason}")]
    Workbook { path: PathBuf, reason: String },

    #[error("keyword sources are empty")]
    NoSources,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum PullError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to unpack archive {path}: {reason}")]
    Archive { path: PathBuf, reason: String },

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Keywords(#[from] KeywordError),

    #[error(transparent)]
    Meta(#[from] MetaError),
}

#[derive(Debug, Error)]
pub enum MetaError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error("step `{step}` requires at least one source")]
    MissingSources { step: String },

    #[error("step `{step}` requires an input flow file")]
    MissingInput { step: String },

    #[error("step `{step}` was dispatched to the wrong handler (expected {expected})")]
    ConfigMismatch { step: String, expected: &'static str },

    #[error("no handler registered for step type `{0}`")]
    NoHandler(String),

    #[error("source `{source_name}` of step `{step}` has the wrong format (expected {expected})")]
    WrongSourceFormat {
        step: String,
        source_name: String,
        expected: &'static str,
    },

    #[error("no steps produced a flow file")]
    NoArtifact,

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid flow json in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Tool(#[from] ToolError),
}

#[derive(Debug, Error)]
pub enum SplitError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid flow json in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Umbrella error for a whole operation (`pull_data`, `compile_flows`, `pot_output`).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pull(#[from] PullError),

    #[error(transparent)]
    Step(#[from] StepError),

    #[error(transparent)]
    Split(#[from] SplitError),

    #[error(transparent)]
    Meta(#[from] MetaError),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
