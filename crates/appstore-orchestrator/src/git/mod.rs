// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! GitOps commit client.
//!
//! Each app store chart owns one repository, mirrored locally under the
//! working directory in a folder named after the chart (whitespace collapsed
//! to `-`). Installs of that chart live side by side in the repository, one
//! folder per `<app>-<env>`. Every write pulls first, then commits and pushes.

pub mod libgit;
pub mod mock;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::chart::ProxyChart;

pub use self::libgit::LibGitClient;
pub use self::mock::MockGitClient;

/// A single file commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartConfig {
    /// File name inside `chart_location`
    pub file_name: String,
    /// Full file content
    pub file_content: String,
    /// App store name; selects the repository
    pub chart_name: String,
    /// Folder inside the repository, `<app>-<env>`
    pub chart_location: String,
    /// Commit message, `release-<asv>-env-<env>`
    pub release_message: String,
}

/// Where a proxy chart was committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartGitAttribute {
    /// Clone URL of the chart repository
    pub repo_url: String,
    /// Folder of the chart inside the repository
    pub chart_location: String,
}

/// Git client errors.
#[derive(Debug, Error)]
pub enum GitError {
    /// Credentials were rejected.
    #[error("git authentication failed: {0}")]
    Auth(String),

    /// The remote moved and the push was rejected.
    #[error("git conflict: {0}")]
    Conflict(String),

    /// The remote could not be reached.
    #[error("git network error: {0}")]
    Network(String),

    /// The chart repository does not exist.
    #[error("git repository not found: {0}")]
    RepoNotFound(String),

    /// Any other libgit2 failure.
    #[error("git error: {0}")]
    Repository(String),

    /// Local file system failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Injected failure from the mock client.
    #[error("injected git failure: {0}")]
    Injected(String),
}

impl From<git2::Error> for GitError {
    fn from(err: git2::Error) -> Self {
        use git2::{ErrorClass, ErrorCode};
        let message = err.message().to_string();
        match (err.code(), err.class()) {
            (ErrorCode::Auth, _) | (_, ErrorClass::Ssh) => GitError::Auth(message),
            (ErrorCode::NotFastForward | ErrorCode::Conflict | ErrorCode::Locked, _) => {
                GitError::Conflict(message)
            }
            (_, ErrorClass::Net | ErrorClass::Http | ErrorClass::Ssl) => GitError::Network(message),
            _ => GitError::Repository(message),
        }
    }
}

/// Result type for git operations.
pub type Result<T> = std::result::Result<T, GitError>;

/// Folder name of a chart's local mirror: whitespace runs become `-`.
pub fn chart_dir_name(chart_name: &str) -> String {
    let mut out = String::with_capacity(chart_name.len());
    let mut in_space = false;
    for c in chart_name.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push('-');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

/// Operations on chart repositories.
#[async_trait]
pub trait GitClient: Send + Sync {
    /// Clone URL of the repository holding chart `chart_name`.
    ///
    /// Resolves to the same repository the commits of that chart went to:
    /// the name is passed through [`chart_dir_name`] and scoped by
    /// `workspace_id` when set.
    async fn get_repo_url(&self, chart_name: &str, workspace_id: &str) -> Result<String>;

    /// Commit the proxy chart tree under `chart_location`.
    ///
    /// `workspace_id` scopes the repository on Bitbucket; empty for
    /// providers without workspaces.
    async fn commit_chart(
        &self,
        chart: &ProxyChart,
        chart_location: &str,
        message: &str,
        workspace_id: &str,
    ) -> Result<ChartGitAttribute>;

    /// Write one file at `<chart_location>/<file_name>`, commit and push.
    ///
    /// Returns the commit hash.
    async fn commit_values(&self, config: &ChartConfig, workspace_id: &str) -> Result<String>;

    /// Bring `clone_dir` up to the remote tip, re-cloning under `app_name`
    /// when the pull fails.
    async fn git_pull(&self, clone_dir: &std::path::Path, repo_url: &str, app_name: &str)
    -> Result<()>;

    /// Local mirror directory of a chart.
    fn clone_dir(&self, chart_name: &str) -> PathBuf;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chart_dir_name_collapses_whitespace() {
        assert_eq!(chart_dir_name("nginx-ingress"), "nginx-ingress");
        assert_eq!(chart_dir_name("my  chart\tname"), "my-chart-name");
        assert_eq!(chart_dir_name(" padded "), "-padded-");
    }

    #[test]
    fn test_git2_error_classification() {
        let auth = git2::Error::new(git2::ErrorCode::Auth, git2::ErrorClass::Http, "denied");
        assert!(matches!(GitError::from(auth), GitError::Auth(_)));

        let rejected = git2::Error::new(
            git2::ErrorCode::NotFastForward,
            git2::ErrorClass::Reference,
            "rejected",
        );
        assert!(matches!(GitError::from(rejected), GitError::Conflict(_)));

        let net = git2::Error::new(git2::ErrorCode::GenericError, git2::ErrorClass::Net, "down");
        assert!(matches!(GitError::from(net), GitError::Network(_)));

        let other = git2::Error::new(git2::ErrorCode::NotFound, git2::ErrorClass::Odb, "gone");
        assert!(matches!(GitError::from(other), GitError::Repository(_)));
    }
}
