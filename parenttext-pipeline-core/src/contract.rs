//! # contract: interfaces to everything outside the pipeline core
//!
//! The core never talks to Google, GitHub or a subprocess directly. It depends on
//! the traits below, which are implemented by the adapters in [`crate::remote`]
//! and [`crate::tools`] and by `mockall` mocks in tests.
//!
//! ## Mocking & Testing
//! - Every trait is annotated for `mockall`; mocks are exported under the
//!   `test-export-mocks` feature so dependent crates can use them too.
//! - All methods are async and return the typed errors of [`crate::error`].

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::config::SheetSubformat;
use crate::error::{RemoteError, ToolError};

/// A file downloaded from cloud storage, with the name it has remotely.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteFile {
    pub name: String,
    pub content: Vec<u8>,
}

/// Cloud storage and spreadsheet metadata.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Drive: Send + Sync {
    /// Last modification time of each file id, in one call.
    /// Ids the backend knows nothing about, or whose lookup failed, map to `None`.
    async fn modified_times(
        &self,
        file_ids: &[String],
    ) -> Result<HashMap<String, Option<DateTime<Utc>>>, RemoteError>;

    async fn fetch(&self, file_id: &str) -> Result<RemoteFile, RemoteError>;

    /// Exports a native spreadsheet into an office format such as `.xlsx`.
    async fn export(&self, file_id: &str, extension: &str) -> Result<Vec<u8>, RemoteError>;
}

/// Converts one spreadsheet (remote id or local path) into its JSON representation.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait SheetConverter: Send + Sync {
    async fn to_json(&self, subformat: SheetSubformat, location: &str) -> Result<String, RemoteError>;
}

/// A call to a logical external tool, such as `translation_chatbot`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub tool: String,
    pub args: Vec<String>,
}

impl ToolInvocation {
    pub fn new<I, S>(tool: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ToolInvocation {
            tool: tool.to_owned(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// First argument, which for the node tools is the subcommand.
    pub fn subcommand(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }
}

impl fmt::Display for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.tool, self.args.join(" "))
    }
}

/// Exit status of an external tool; `code` is `None` when killed by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolStatus {
    pub code: Option<i32>,
}

impl ToolStatus {
    pub const SUCCESS: ToolStatus = ToolStatus { code: Some(0) };

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Narrow interface over the command-line helpers invoked by steps.
/// Implementations block until the tool exits; no timeout is applied.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ExternalTool: Send + Sync {
    async fn invoke(&self, invocation: &ToolInvocation) -> Result<ToolStatus, ToolError>;
}

/// Runs `invocation` and turns a non-zero exit into [`ToolError::Failed`].
pub async fn run_checked(tool: &dyn ExternalTool, invocation: ToolInvocation) -> Result<(), ToolError> {
    tracing::debug!(invocation = %invocation, "[TOOL] Invoking external tool");
    let status = tool.invoke(&invocation).await?;
    if status.success() {
        Ok(())
    } else {
        tracing::error!(invocation = %invocation, code = ?status.code, "[TOOL] External tool failed");
        Err(ToolError::Failed {
            tool: invocation.tool,
            args: invocation.args.join(" "),
            code: status.code,
        })
    }
}

/// Owner and name of a hosted repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    /// Parses `https://github.com/{owner}/{name}(.git)`.
    pub fn parse(url: &str) -> Result<RepoRef, RemoteError> {
        let mut segments = url.trim_end_matches('/').rsplit('/');
        let name = segments.next().map(|n| n.trim_end_matches(".git"));
        let owner = segments.next();
        match (owner, name) {
            (Some(owner), Some(name)) if !owner.is_empty() && !name.is_empty() && !owner.contains(':') => {
                Ok(RepoRef {
                    owner: owner.to_owned(),
                    name: name.to_owned(),
                })
            }
            _ => Err(RemoteError::InvalidRepoUrl(url.to_owned())),
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// A file listed in a repository folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoFile {
    pub name: String,
    /// Path relative to the repository root.
    pub path: String,
    pub download_url: Option<String>,
}

/// Version-control hosting API used to pull translation files.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait TranslationRepo: Send + Sync {
    /// Plain files (not directories) directly inside `folder`.
    async fn list_files(&self, repo: &RepoRef, folder: &str) -> Result<Vec<RepoFile>, RemoteError>;

    /// Sha of the most recent commit.
    async fn latest_commit(&self, repo: &RepoRef) -> Result<String, RemoteError>;

    /// Sha of the most recent commit at or before `until`, if any.
    async fn commit_before(
        &self,
        repo: &RepoRef,
        until: DateTime<Utc>,
    ) -> Result<Option<String>, RemoteError>;

    /// Paths touched between `base` and `head`.
    async fn changed_files(&self, repo: &RepoRef, base: &str, head: &str) -> Result<Vec<String>, RemoteError>;

    async fn download(&self, file: &RepoFile) -> Result<Vec<u8>, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_url_with_git_suffix() {
        let repo = RepoRef::parse("https://github.com/IDEMSInternational/plh-translations.git").unwrap();
        assert_eq!(repo.owner, "IDEMSInternational");
        assert_eq!(repo.name, "plh-translations");
    }

    #[test]
    fn repo_url_without_owner_is_rejected() {
        assert!(RepoRef::parse("plh-translations").is_err());
        assert!(RepoRef::parse("").is_err());
    }

    #[tokio::test]
    async fn run_checked_maps_nonzero_exit_to_error() {
        let mut tool = MockExternalTool::new();
        tool.expect_invoke()
            .returning(|_| Ok(ToolStatus { code: Some(3) }));
        let err = run_checked(&tool, ToolInvocation::new("rpft", ["create_flows"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Failed { code: Some(3), .. }));
    }
}
