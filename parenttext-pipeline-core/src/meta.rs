//! Pull metadata sidecar and pipeline version gate.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ConfigError, MetaError};

pub const META_FILE_NAME: &str = "meta.json";

/// Record of the last successful pull, stored next to the cached sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullMeta {
    pub pull_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub pipeline_version: Option<String>,
    #[serde(default)]
    pub config_version: Option<String>,
}

impl PullMeta {
    pub fn now(pipeline_version: &str, config_version: Option<String>) -> Self {
        PullMeta {
            pull_timestamp: Utc::now(),
            pipeline_version: Some(pipeline_version.to_owned()),
            config_version,
        }
    }
}

pub fn meta_path(dir: &Path) -> PathBuf {
    dir.join(META_FILE_NAME)
}

/// Reads the sidecar in `dir`. Anything short of a valid record yields `None`,
/// which callers treat as "pull everything".
pub fn read_meta(dir: &Path) -> Option<PullMeta> {
    let path = meta_path(dir);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) => {
            info!(meta_path = ?path, error = %e, "[META] meta.json not found, updating everything");
            return None;
        }
    };
    match serde_json::from_str::<PullMeta>(&content) {
        Ok(meta) => {
            debug!(meta_path = ?path, pull_timestamp = %meta.pull_timestamp, "[META] Read pull metadata");
            Some(meta)
        }
        Err(e) => {
            warn!(meta_path = ?path, error = %e, "[META] meta.json unreadable, updating everything");
            None
        }
    }
}

pub fn write_meta(dir: &Path, meta: &PullMeta) -> Result<(), MetaError> {
    fs::create_dir_all(dir).map_err(|e| MetaError::Write {
        path: dir.to_path_buf(),
        source: e,
    })?;
    let path = meta_path(dir);
    let content = serde_json::to_string_pretty(meta)?;
    fs::write(&path, content).map_err(|e| MetaError::Write {
        path: path.clone(),
        source: e,
    })?;
    info!(meta_path = ?path, pull_timestamp = %meta.pull_timestamp, "[META] Wrote pull metadata");
    Ok(())
}

/// Parses a version, padding short forms such as `"1"` or `"1.2"` to `x.y.z`.
pub fn parse_version(version: &str) -> Result<Version, ConfigError> {
    let trimmed = version.trim().trim_start_matches('v');
    let (core, rest) = match trimmed.find(|c: char| c == '-' || c == '+') {
        Some(pos) => trimmed.split_at(pos),
        None => (trimmed, ""),
    };
    let missing = 2usize.saturating_sub(core.matches('.').count());
    let padded = format!("{core}{}{rest}", ".0".repeat(missing));
    Version::parse(&padded).map_err(|e| ConfigError::InvalidVersion {
        version: version.to_owned(),
        reason: e.to_string(),
    })
}

/// Rejects configs written for a newer pipeline or for another major version.
pub fn check_pipeline_version(config_version: &str, running_version: &str) -> Result<(), ConfigError> {
    let config = parse_version(config_version)?;
    let running = parse_version(running_version)?;

    if config > running {
        return Err(ConfigError::PipelineTooOld {
            config: config.to_string(),
            running: running.to_string(),
        });
    }
    if config.major != running.major {
        return Err(ConfigError::MajorMismatch {
            config: config.to_string(),
            running: running.to_string(),
        });
    }
    debug!(%config, %running, "[META] Pipeline version accepted");
    Ok(())
}
