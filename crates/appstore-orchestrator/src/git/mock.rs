// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory [`GitClient`] that records every commit.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{ChartConfig, ChartGitAttribute, GitClient, GitError, Result, chart_dir_name};
use crate::chart::ProxyChart;

/// A recorded file commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommit {
    /// App store name
    pub chart_name: String,
    /// Folder inside the repository
    pub chart_location: String,
    /// File name
    pub file_name: String,
    /// File content
    pub content: String,
    /// Commit message
    pub message: String,
}

#[derive(Debug, Default)]
struct State {
    commits: Vec<RecordedCommit>,
    charts: Vec<(String, String)>,
    pulls: Vec<PathBuf>,
    fail_files: HashMap<String, usize>,
    fail_all: bool,
    sequence: u64,
}

/// Recording git client with failure injection.
#[derive(Debug, Clone)]
pub struct MockGitClient {
    base_url: String,
    working_dir: PathBuf,
    state: Arc<Mutex<State>>,
}

impl Default for MockGitClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGitClient {
    /// Create a client that accepts every commit.
    pub fn new() -> Self {
        Self {
            base_url: "https://git.example.com/charts".to_string(),
            working_dir: PathBuf::from("/tmp/gitops/"),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Fail every operation.
    pub async fn failing(self) -> Self {
        self.state.lock().await.fail_all = true;
        self
    }

    /// Fail the next `times` commits of `file_name`.
    pub async fn fail_on_file(&self, file_name: &str, times: usize) {
        self.state
            .lock()
            .await
            .fail_files
            .insert(file_name.to_string(), times);
    }

    /// Stop failing.
    pub async fn heal(&self) {
        let mut state = self.state.lock().await;
        state.fail_all = false;
        state.fail_files.clear();
    }

    /// File commits in order.
    pub async fn commits(&self) -> Vec<RecordedCommit> {
        self.state.lock().await.commits.clone()
    }

    /// File commits of one file name.
    pub async fn commits_of(&self, file_name: &str) -> Vec<RecordedCommit> {
        self.state
            .lock()
            .await
            .commits
            .iter()
            .filter(|c| c.file_name == file_name)
            .cloned()
            .collect()
    }

    /// `(chart name, chart location)` of every proxy chart commit.
    pub async fn charts(&self) -> Vec<(String, String)> {
        self.state.lock().await.charts.clone()
    }

    /// Directories pulled.
    pub async fn pulls(&self) -> Vec<PathBuf> {
        self.state.lock().await.pulls.clone()
    }

    fn url_for(&self, workspace_id: &str, chart_name: &str) -> String {
        let name = chart_dir_name(chart_name);
        if workspace_id.is_empty() {
            format!("{}/{name}.git", self.base_url)
        } else {
            format!("{}/{workspace_id}/{name}.git", self.base_url)
        }
    }
}

impl State {
    fn should_fail(&mut self, file_name: &str) -> bool {
        if self.fail_all {
            return true;
        }
        match self.fail_files.get_mut(file_name) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl GitClient for MockGitClient {
    async fn get_repo_url(&self, chart_name: &str, workspace_id: &str) -> Result<String> {
        if self.state.lock().await.fail_all {
            return Err(GitError::Injected(format!("get_repo_url {chart_name}")));
        }
        Ok(self.url_for(workspace_id, chart_name))
    }

    async fn commit_chart(
        &self,
        chart: &ProxyChart,
        chart_location: &str,
        _message: &str,
        workspace_id: &str,
    ) -> Result<ChartGitAttribute> {
        let mut state = self.state.lock().await;
        if state.should_fail("Chart.yaml") {
            return Err(GitError::Injected(format!("commit chart {chart_location}")));
        }
        state
            .charts
            .push((chart.name.clone(), chart_location.to_string()));
        Ok(ChartGitAttribute {
            repo_url: self.url_for(workspace_id, &chart.name),
            chart_location: chart_location.to_string(),
        })
    }

    async fn commit_values(&self, config: &ChartConfig, _workspace_id: &str) -> Result<String> {
        let mut state = self.state.lock().await;
        if state.should_fail(&config.file_name) {
            return Err(GitError::Injected(format!(
                "commit {}/{}",
                config.chart_location, config.file_name
            )));
        }
        state.commits.push(RecordedCommit {
            chart_name: config.chart_name.clone(),
            chart_location: config.chart_location.clone(),
            file_name: config.file_name.clone(),
            content: config.file_content.clone(),
            message: config.release_message.clone(),
        });
        state.sequence += 1;
        Ok(format!("{:040x}", state.sequence))
    }

    async fn git_pull(&self, clone_dir: &Path, _repo_url: &str, _app_name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.fail_all {
            return Err(GitError::Injected(format!("pull {}", clone_dir.display())));
        }
        state.pulls.push(clone_dir.to_path_buf());
        Ok(())
    }

    fn clone_dir(&self, chart_name: &str) -> PathBuf {
        self.working_dir.join(chart_dir_name(chart_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(file: &str) -> ChartConfig {
        ChartConfig {
            file_name: file.to_string(),
            file_content: "a: 1\n".to_string(),
            chart_name: "redis".to_string(),
            chart_location: "cache-prod".to_string(),
            release_message: "release-1-env-2".to_string(),
        }
    }

    #[tokio::test]
    async fn test_fail_on_file_counts_down() {
        let git = MockGitClient::new();
        git.fail_on_file("values.yaml", 1).await;

        assert!(git.commit_values(&config("values.yaml"), "").await.is_err());
        assert!(git.commit_values(&config("requirements.yaml"), "").await.is_ok());
        assert!(git.commit_values(&config("values.yaml"), "").await.is_ok());

        let files: Vec<_> = git.commits().await.into_iter().map(|c| c.file_name).collect();
        assert_eq!(files, vec!["requirements.yaml", "values.yaml"]);
    }

    #[tokio::test]
    async fn test_failing_client_rejects_everything() {
        let git = MockGitClient::new().failing().await;
        assert!(git.get_repo_url("redis", "").await.is_err());
        assert!(git.commit_values(&config("values.yaml"), "").await.is_err());
        git.heal().await;
        assert_eq!(
            git.get_repo_url("redis", "").await.unwrap(),
            "https://git.example.com/charts/redis.git"
        );
    }

    #[tokio::test]
    async fn test_repo_url_matches_committed_chart() {
        let git = MockGitClient::new();
        let chart = ProxyChart {
            name: "my chart".to_string(),
            files: Vec::new(),
        };
        let attr = git
            .commit_chart(&chart, "app-prod", "release-1-env-2", "ws")
            .await
            .unwrap();

        assert_eq!(attr.repo_url, "https://git.example.com/charts/ws/my-chart.git");
        assert_eq!(git.get_repo_url("my chart", "ws").await.unwrap(), attr.repo_url);
    }
}
