//! Google Drive v3 adapter.

use std::collections::HashMap;
use std::env;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Deserialize;

use super::{check_status, http_client};
use crate::contract::{Drive, RemoteFile};
use crate::error::RemoteError;

pub const DRIVE_API_URL: &str = "https://www.googleapis.com/drive/v3";
/// Metadata lookups in flight at once unless overridden.
pub const DEFAULT_LOOKUP_CONCURRENCY: usize = 4;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileMetadata {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    modified_time: Option<DateTime<Utc>>,
}

fn export_mime_type(extension: &str) -> Option<&'static str> {
    match extension.trim_start_matches('.') {
        "xlsx" => Some("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
        "csv" => Some("text/csv"),
        "ods" => Some("application/vnd.oasis.opendocument.spreadsheet"),
        "pdf" => Some("application/pdf"),
        _ => None,
    }
}

pub struct GoogleDrive {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
    concurrency: usize,
}

impl GoogleDrive {
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>) -> Result<Self, RemoteError> {
        Ok(GoogleDrive {
            http: http_client()?,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            access_token: access_token.into(),
            concurrency: DEFAULT_LOOKUP_CONCURRENCY,
        })
    }

    /// Bounds the number of metadata lookups in flight at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Reads the bearer token from `GOOGLE_DRIVE_ACCESS_TOKEN`.
    pub fn new_from_env() -> Result<Self, RemoteError> {
        match env::var("GOOGLE_DRIVE_ACCESS_TOKEN") {
            Ok(token) if !token.is_empty() => {
                tracing::info!("[REMOTE] Initialized Google Drive client from environment");
                GoogleDrive::new(DRIVE_API_URL, token)
            }
            _ => {
                tracing::error!("[REMOTE] GOOGLE_DRIVE_ACCESS_TOKEN missing in environment");
                Err(RemoteError::MissingCredentials(
                    "GOOGLE_DRIVE_ACCESS_TOKEN".to_owned(),
                ))
            }
        }
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}/{}", self.base_url, path))
            .bearer_auth(&self.access_token)
            .query(&[("supportsAllDrives", "true")])
    }

    async fn metadata(&self, file_id: &str, fields: &str) -> Result<FileMetadata, RemoteError> {
        let response = check_status(
            self.get(&format!("files/{file_id}"))
                .query(&[("fields", fields)])
                .send()
                .await?,
        )
        .await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl Drive for GoogleDrive {
    async fn modified_times(
        &self,
        file_ids: &[String],
    ) -> Result<HashMap<String, Option<DateTime<Utc>>>, RemoteError> {
        let times: HashMap<_, _> = stream::iter(file_ids.iter().cloned())
            .map(|id| async move {
                match self.metadata(&id, "modifiedTime").await {
                    Ok(meta) => (id.clone(), meta.modified_time),
                    Err(e) => {
                        tracing::warn!(file_id = %id, error = %e, "[REMOTE] Modified time lookup failed");
                        (id.clone(), None)
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        tracing::debug!(files = times.len(), "[REMOTE] Fetched modified times");
        Ok(times)
    }

    async fn fetch(&self, file_id: &str) -> Result<RemoteFile, RemoteError> {
        let name = self
            .metadata(file_id, "name")
            .await?
            .name
            .unwrap_or_else(|| file_id.to_owned());
        let response = check_status(
            self.get(&format!("files/{file_id}"))
                .query(&[("alt", "media")])
                .send()
                .await?,
        )
        .await?;
        Ok(RemoteFile {
            name,
            content: response.bytes().await?.to_vec(),
        })
    }

    async fn export(&self, file_id: &str, extension: &str) -> Result<Vec<u8>, RemoteError> {
        let mime_type = export_mime_type(extension).ok_or_else(|| RemoteError::Unexpected {
            url: file_id.to_owned(),
            reason: format!("no export format for `{extension}`"),
        })?;
        let response = check_status(
            self.get(&format!("files/{file_id}/export"))
                .query(&[("mimeType", mime_type)])
                .send()
                .await?,
        )
        .await?;
        Ok(response.bytes().await?.to_vec())
    }
}
