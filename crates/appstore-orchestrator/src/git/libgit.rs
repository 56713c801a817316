// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! libgit2 implementation of [`GitClient`].
//!
//! libgit2 is blocking, so every repository operation runs on the blocking
//! pool. Operations on the same chart mirror are serialized by a per-chart
//! async mutex; different charts proceed in parallel.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{
    Cred, Direction, ErrorClass, ErrorCode, FetchOptions, IndexAddOption, PushOptions,
    RemoteCallbacks, Repository, Signature,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{ChartConfig, ChartGitAttribute, GitClient, GitError, Result, chart_dir_name};
use crate::chart::ProxyChart;
use crate::config::GitOpsSettings;

const COMMIT_AUTHOR_NAME: &str = "appstore bot";
const COMMIT_AUTHOR_EMAIL: &str = "appstore-bot@localhost";
const DEFAULT_BRANCH: &str = "master";

#[derive(Debug, Clone, Default)]
struct Credentials {
    username: Option<String>,
    token: Option<String>,
}

/// Git client backed by local mirrors and libgit2.
pub struct LibGitClient {
    settings: GitOpsSettings,
    credentials: Credentials,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl LibGitClient {
    /// Create a client for the configured provider.
    pub fn new(settings: GitOpsSettings) -> Self {
        let credentials = Credentials {
            username: settings.username.clone(),
            token: settings.token.clone(),
        };
        Self {
            settings,
            credentials,
            locks: DashMap::new(),
        }
    }

    fn is_local_host(&self) -> bool {
        !self.settings.host.contains("://")
    }

    /// Clone URL of `repo_name`, scoped by `workspace_id` when set, else by the org.
    pub fn repo_url(&self, workspace_id: &str, repo_name: &str) -> String {
        let host = self.settings.host.trim_end_matches('/');
        let scope = if workspace_id.is_empty() {
            self.settings.org.as_str()
        } else {
            workspace_id
        };
        if self.is_local_host() {
            let mut path = PathBuf::from(host);
            if !scope.is_empty() {
                path.push(scope);
            }
            path.push(format!("{repo_name}.git"));
            path.to_string_lossy().into_owned()
        } else if scope.is_empty() {
            format!("{host}/{repo_name}.git")
        } else {
            format!("{host}/{scope}/{repo_name}.git")
        }
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run `op` on the blocking pool while holding the mirror lock of `key`.
    async fn locked<T, F>(&self, key: &str, op: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;
        tokio::task::spawn_blocking(op)
            .await
            .map_err(|e| GitError::Repository(format!("git task failed: {e}")))?
    }
}

#[async_trait]
impl GitClient for LibGitClient {
    async fn get_repo_url(&self, chart_name: &str, workspace_id: &str) -> Result<String> {
        let url = self.repo_url(workspace_id, &chart_dir_name(chart_name));
        if self.is_local_host() {
            return if Path::new(&url).exists() {
                Ok(url)
            } else {
                Err(GitError::RepoNotFound(url))
            };
        }

        let credentials = self.credentials.clone();
        let remote_url = url.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut remote = git2::Remote::create_detached(remote_url.as_str())?;
            // Dropping the connection disconnects.
            let _connection = remote
                .connect_auth(Direction::Fetch, Some(callbacks(&credentials)), None)
                .map_err(|e| match e.code() {
                    ErrorCode::NotFound => GitError::RepoNotFound(remote_url.clone()),
                    _ => GitError::from(e),
                })?;
            Ok(())
        })
        .await
        .map_err(|e| GitError::Repository(format!("git task failed: {e}")))??;
        Ok(url)
    }

    async fn commit_chart(
        &self,
        chart: &ProxyChart,
        chart_location: &str,
        message: &str,
        workspace_id: &str,
    ) -> Result<ChartGitAttribute> {
        let repo_name = chart_dir_name(&chart.name);
        let repo_url = self.repo_url(workspace_id, &repo_name);
        let clone_dir = self.clone_dir(&chart.name);
        let credentials = self.credentials.clone();
        let chart = chart.clone();
        let location = chart_location.to_string();
        let message = message.to_string();
        let url = repo_url.clone();

        let commit = self
            .locked(&repo_name, move || {
                let repo = open_or_clone(&clone_dir, &url, &credentials)?;
                pull(&repo, &credentials)?;
                write_chart(&clone_dir, &location, &chart)?;
                match commit_and_push(&repo, &message, &credentials) {
                    Err(GitError::Conflict(reason)) => {
                        warn!(reason = %reason, "Chart push rejected, pulling and retrying");
                        pull(&repo, &credentials)?;
                        write_chart(&clone_dir, &location, &chart)?;
                        commit_and_push(&repo, &message, &credentials)
                    }
                    other => other,
                }
            })
            .await?;

        debug!(repo_url = %repo_url, commit = %commit, "Proxy chart committed");
        Ok(ChartGitAttribute {
            repo_url,
            chart_location: chart_location.to_string(),
        })
    }

    async fn commit_values(&self, config: &ChartConfig, workspace_id: &str) -> Result<String> {
        let repo_name = chart_dir_name(&config.chart_name);
        let url = self.repo_url(workspace_id, &repo_name);
        let clone_dir = self.clone_dir(&config.chart_name);
        let credentials = self.credentials.clone();
        let config = config.clone();

        self.locked(&repo_name, move || {
            let repo = open_or_clone(&clone_dir, &url, &credentials)?;
            pull(&repo, &credentials)?;
            write_file(&clone_dir, &config)?;
            match commit_and_push(&repo, &config.release_message, &credentials) {
                Err(GitError::Conflict(reason)) => {
                    warn!(reason = %reason, file = %config.file_name, "Push rejected, pulling and retrying");
                    pull(&repo, &credentials)?;
                    write_file(&clone_dir, &config)?;
                    commit_and_push(&repo, &config.release_message, &credentials)
                }
                other => other,
            }
        })
        .await
    }

    async fn git_pull(&self, clone_dir: &Path, repo_url: &str, app_name: &str) -> Result<()> {
        let key = clone_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| app_name.to_string());
        let clone_dir = clone_dir.to_path_buf();
        let fallback_dir = self.settings.working_dir.join(app_name);
        let url = repo_url.to_string();
        let credentials = self.credentials.clone();

        self.locked(&key, move || {
            let pulled = Repository::open(&clone_dir)
                .map_err(GitError::from)
                .and_then(|repo| pull(&repo, &credentials));
            if let Err(e) = pulled {
                warn!(dir = %clone_dir.display(), error = %e, "Pull failed, cloning again");
                if fallback_dir.exists() {
                    std::fs::remove_dir_all(&fallback_dir)?;
                }
                open_or_clone(&fallback_dir, &url, &credentials)?;
            }
            Ok(())
        })
        .await
    }

    fn clone_dir(&self, chart_name: &str) -> PathBuf {
        self.settings.working_dir.join(chart_dir_name(chart_name))
    }
}

fn callbacks(credentials: &Credentials) -> RemoteCallbacks<'_> {
    let mut callbacks = RemoteCallbacks::new();
    if let Some(token) = credentials.token.as_deref() {
        let username = credentials.username.as_deref().unwrap_or("git");
        callbacks.credentials(move |_url, _username_from_url, _allowed| {
            Cred::userpass_plaintext(username, token)
        });
    }
    callbacks.push_update_reference(|refname, status| match status {
        Some(reason) => Err(git2::Error::new(
            ErrorCode::NotFastForward,
            ErrorClass::Reference,
            format!("push of {refname} rejected: {reason}"),
        )),
        None => Ok(()),
    });
    callbacks
}

fn fetch_options(credentials: &Credentials) -> FetchOptions<'_> {
    let mut options = FetchOptions::new();
    options.remote_callbacks(callbacks(credentials));
    options
}

fn open_or_clone(dir: &Path, url: &str, credentials: &Credentials) -> Result<Repository> {
    if dir.join(".git").exists() {
        return Ok(Repository::open(dir)?);
    }
    if let Some(parent) = dir.parent() {
        std::fs::create_dir_all(parent)?;
    }
    info!(url = %url, dir = %dir.display(), "Cloning chart repository");
    let mut builder = RepoBuilder::new();
    builder.fetch_options(fetch_options(credentials));
    Ok(builder.clone(url, dir)?)
}

/// Branch HEAD points at, born or not.
fn current_branch(repo: &Repository) -> String {
    if let Ok(head) = repo.head() {
        if let Some(name) = head.shorthand() {
            return name.to_string();
        }
    }
    repo.find_reference("HEAD")
        .ok()
        .and_then(|r| r.symbolic_target().map(str::to_string))
        .and_then(|t| t.strip_prefix("refs/heads/").map(str::to_string))
        .unwrap_or_else(|| DEFAULT_BRANCH.to_string())
}

/// Fetch origin and move the local branch and work tree to the remote tip.
///
/// An empty remote leaves the mirror untouched.
fn pull(repo: &Repository, credentials: &Credentials) -> Result<()> {
    let branch = current_branch(repo);
    let mut remote = repo.find_remote("origin")?;
    remote.fetch(
        &["+refs/heads/*:refs/remotes/origin/*"],
        Some(&mut fetch_options(credentials)),
        None,
    )?;

    let tip = match repo.find_reference(&format!("refs/remotes/origin/{branch}")) {
        Ok(reference) => reference.peel_to_commit()?,
        Err(e) if e.code() == ErrorCode::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let local = format!("refs/heads/{branch}");
    repo.reference(&local, tip.id(), true, "pull: reset to origin")?;
    repo.set_head(&local)?;
    repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
    Ok(())
}

/// Stage everything, commit on HEAD and push the branch.
///
/// Returns the new commit, or the current one when nothing changed.
fn commit_and_push(repo: &Repository, message: &str, credentials: &Credentials) -> Result<String> {
    let mut index = repo.index()?;
    index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
    index.write()?;
    let tree_id = index.write_tree()?;

    let parent = match repo.head() {
        Ok(head) => Some(head.peel_to_commit()?),
        Err(_) => None,
    };
    if let Some(parent) = &parent {
        if parent.tree_id() == tree_id {
            debug!(commit = %parent.id(), "Nothing to commit");
            return Ok(parent.id().to_string());
        }
    }

    let tree = repo.find_tree(tree_id)?;
    let signature = Signature::now(COMMIT_AUTHOR_NAME, COMMIT_AUTHOR_EMAIL)?;
    let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
    let oid = repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;

    let branch = current_branch(repo);
    let mut remote = repo.find_remote("origin")?;
    let mut options = PushOptions::new();
    options.remote_callbacks(callbacks(credentials));
    remote.push(
        &[format!("refs/heads/{branch}:refs/heads/{branch}")],
        Some(&mut options),
    )?;

    Ok(oid.to_string())
}

fn write_file(clone_dir: &Path, config: &ChartConfig) -> Result<()> {
    let dir = clone_dir.join(&config.chart_location);
    std::fs::create_dir_all(&dir)?;
    std::fs::write(dir.join(&config.file_name), config.file_content.as_bytes())?;
    Ok(())
}

fn write_chart(clone_dir: &Path, chart_location: &str, chart: &ProxyChart) -> Result<()> {
    let root = clone_dir.join(chart_location);
    for file in &chart.files {
        let target = root.join(&file.path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(target, &file.content)?;
    }
    Ok(())
}
