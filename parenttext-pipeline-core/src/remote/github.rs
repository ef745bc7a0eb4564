//! GitHub REST client used to pull translation files.

use std::env;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{check_status, http_client};
use crate::contract::{RepoFile, RepoRef, TranslationRepo};
use crate::error::RemoteError;

pub const GITHUB_API_URL: &str = "https://api.github.com";

#[derive(Deserialize)]
struct ContentItem {
    name: String,
    path: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    download_url: Option<String>,
}

#[derive(Deserialize)]
struct CommitItem {
    sha: String,
}

#[derive(Deserialize)]
struct ChangedFile {
    filename: String,
}

#[derive(Deserialize)]
struct Comparison {
    #[serde(default)]
    files: Vec<ChangedFile>,
}

pub struct GithubClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl GithubClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, RemoteError> {
        Ok(GithubClient {
            http: http_client()?,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            token,
        })
    }

    /// Public API with an optional `GITHUB_TOKEN` to lift rate limits.
    pub fn new_from_env() -> Result<Self, RemoteError> {
        let token = env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty());
        tracing::info!(token_set = token.is_some(), "[REMOTE] Initialized GitHub client from environment");
        GithubClient::new(GITHUB_API_URL, token)
    }

    fn repo_url(&self, repo: &RepoRef, tail: &str) -> String {
        format!("{}/repos/{}/{}/{}", self.base_url, repo.owner, repo.name, tail)
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json");
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, RemoteError> {
        tracing::debug!(url, ?query, "[REMOTE] GitHub request");
        let response = check_status(self.get(url).query(query).send().await?).await?;
        Ok(response.json().await?)
    }

    async fn commits(&self, repo: &RepoRef, until: Option<DateTime<Utc>>) -> Result<Vec<CommitItem>, RemoteError> {
        let mut query = vec![("page", "1".to_owned()), ("per_page", "1".to_owned())];
        if let Some(until) = until {
            query.push(("until", until.to_rfc3339_opts(SecondsFormat::Secs, true)));
        }
        self.get_json(&self.repo_url(repo, "commits"), &query).await
    }
}

#[async_trait]
impl TranslationRepo for GithubClient {
    async fn list_files(&self, repo: &RepoRef, folder: &str) -> Result<Vec<RepoFile>, RemoteError> {
        let items: Vec<ContentItem> = self
            .get_json(&self.repo_url(repo, &format!("contents/{folder}")), &[])
            .await?;
        Ok(items
            .into_iter()
            .filter(|item| item.kind == "file")
            .map(|item| RepoFile {
                name: item.name,
                path: item.path,
                download_url: item.download_url,
            })
            .collect())
    }

    async fn latest_commit(&self, repo: &RepoRef) -> Result<String, RemoteError> {
        let url = self.repo_url(repo, "commits");
        self.commits(repo, None)
            .await?
            .into_iter()
            .next()
            .map(|c| c.sha)
            .ok_or_else(|| RemoteError::Unexpected {
                url,
                reason: "repository has no commits".to_owned(),
            })
    }

    async fn commit_before(
        &self,
        repo: &RepoRef,
        until: DateTime<Utc>,
    ) -> Result<Option<String>, RemoteError> {
        Ok(self
            .commits(repo, Some(until))
            .await?
            .into_iter()
            .next()
            .map(|c| c.sha))
    }

    async fn changed_files(&self, repo: &RepoRef, base: &str, head: &str) -> Result<Vec<String>, RemoteError> {
        let comparison: Comparison = self
            .get_json(&self.repo_url(repo, &format!("compare/{base}...{head}")), &[])
            .await?;
        Ok(comparison.files.into_iter().map(|f| f.filename).collect())
    }

    async fn download(&self, file: &RepoFile) -> Result<Vec<u8>, RemoteError> {
        let url = file
            .download_url
            .as_deref()
            .ok_or_else(|| RemoteError::Unexpected {
                url: file.path.clone(),
                reason: "file has no download url".to_owned(),
            })?;
        let response = check_status(self.get(url).send().await?).await?;
        Ok(response.bytes().await?.to_vec())
    }
}
