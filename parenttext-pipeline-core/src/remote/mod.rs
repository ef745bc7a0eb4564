//! HTTP adapters for the remote collaborators: GitHub, Google Drive and archive downloads.

use std::path::{Path, PathBuf};

use crate::error::RemoteError;

pub mod drive;
pub mod github;

pub use drive::GoogleDrive;
pub use github::GithubClient;

pub const USER_AGENT: &str = concat!("parenttext-pipeline/", env!("CARGO_PKG_VERSION"));

pub fn http_client() -> Result<reqwest::Client, RemoteError> {
    Ok(reqwest::Client::builder().user_agent(USER_AGENT).build()?)
}

/// Turns a non-success response into [`RemoteError::Unexpected`], keeping the body for the log.
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    tracing::warn!(%url, %status, body = %body, "[REMOTE] Request failed");
    Err(RemoteError::Unexpected {
        url,
        reason: format!("status {status}"),
    })
}

/// Resolves an archive location to a local file. `http(s)` locations are
/// downloaded into `dest_dir/archive.zip`; anything else is taken as a path.
pub async fn download_archive(
    http: &reqwest::Client,
    location: &str,
    dest_dir: &Path,
) -> Result<PathBuf, RemoteError> {
    if !location.starts_with("http") {
        return Ok(PathBuf::from(location));
    }
    let response = check_status(http.get(location).send().await?).await?;
    let bytes = response.bytes().await?;
    tokio::fs::create_dir_all(dest_dir).await?;
    let dest = dest_dir.join("archive.zip");
    tokio::fs::write(&dest, &bytes).await?;
    tracing::info!(url = location, file = ?dest, "[REMOTE] Archive downloaded");
    Ok(dest)
}
