//! Wiring of the concrete collaborators used by the `pull_data` operation.
//!
//! Credentials are read from the environment (see `.env`). A missing Drive token
//! is not fatal: spreadsheets are converted by `rpft`, which authenticates on its
//! own, so the pull degrades to refetching every sheet.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parenttext_pipeline_core::config::Config;
use parenttext_pipeline_core::contract::{Drive, ExternalTool, RemoteFile};
use parenttext_pipeline_core::error::RemoteError;
use parenttext_pipeline_core::pull_data::PullContext;
use parenttext_pipeline_core::remote::{http_client, GithubClient, GoogleDrive};
use parenttext_pipeline_core::tools::RpftSheetConverter;

const DRIVE_TOKEN_VAR: &str = "GOOGLE_DRIVE_ACCESS_TOKEN";

/// Stand-in used when no Drive token is configured; every call fails.
pub struct UnavailableDrive;

impl UnavailableDrive {
    fn error() -> RemoteError {
        RemoteError::MissingCredentials(DRIVE_TOKEN_VAR.to_owned())
    }
}

#[async_trait]
impl Drive for UnavailableDrive {
    async fn modified_times(
        &self,
        _file_ids: &[String],
    ) -> Result<HashMap<String, Option<DateTime<Utc>>>, RemoteError> {
        Err(Self::error())
    }

    async fn fetch(&self, _file_id: &str) -> Result<RemoteFile, RemoteError> {
        Err(Self::error())
    }

    async fn export(&self, _file_id: &str, _extension: &str) -> Result<Vec<u8>, RemoteError> {
        Err(Self::error())
    }
}

/// Builds the pull collaborators for `config`, sharing `tool` with the sheet converter.
pub fn pull_context(config: &Config, tool: Arc<dyn ExternalTool>) -> Result<PullContext> {
    let drive: Arc<dyn Drive> = match GoogleDrive::new_from_env() {
        Ok(drive) => Arc::new(drive.with_concurrency(config.fetch_concurrency)),
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Google Drive unavailable, sheet modification times are unknown and every sheet is refetched"
            );
            Arc::new(UnavailableDrive)
        }
    };
    let repo = GithubClient::new_from_env()?;
    let sheets = RpftSheetConverter::new(tool.clone(), config.temppath.join("sheets"));

    Ok(PullContext {
        drive,
        sheets: Arc::new(sheets),
        repo: Arc::new(repo),
        tool,
        http: http_client()?,
    })
}
