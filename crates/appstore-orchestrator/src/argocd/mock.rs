// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory [`ArgoCdClient`] for tests and local runs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::types::{AppTemplate, Application, ApplicationTree, ResourceQuery};
use super::{ArgoCdClient, ArgoCdError, Result};

/// Call kinds that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    ResourceTree,
    GetResource,
    Get,
    Update,
    Sync,
    Patch,
    Delete,
    Create,
    Register,
}

/// What a failing delete returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteFailure {
    /// Application already gone
    NotFound,
    /// Any other server error
    Internal,
}

#[derive(Debug, Default)]
struct State {
    applications: HashMap<String, Application>,
    repositories: Vec<String>,
    trees: HashMap<String, ApplicationTree>,
    resources: HashMap<(String, String), Value>,
    slow_resources: HashSet<String>,
    failing: HashMap<MockOp, usize>,
    delete_failure: Option<DeleteFailure>,
    calls: Vec<String>,
}

impl State {
    fn take_failure(&mut self, op: MockOp) -> bool {
        match self.failing.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

/// Recording ArgoCD client.
#[derive(Debug, Clone, Default)]
pub struct MockArgoCdClient {
    state: Arc<Mutex<State>>,
}

impl MockArgoCdClient {
    /// Create a client whose calls all succeed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` calls of `op`.
    pub async fn fail(&self, op: MockOp, times: usize) {
        self.state.lock().await.failing.insert(op, times);
    }

    /// Client whose application creation fails once.
    pub async fn failing_create() -> Self {
        let client = Self::new();
        client.fail(MockOp::Create, 1).await;
        client
    }

    /// Make every delete return `failure`.
    pub async fn fail_delete_with(&self, failure: DeleteFailure) {
        self.state.lock().await.delete_failure = Some(failure);
    }

    /// Serve `tree` for `app_name`.
    pub async fn set_tree(&self, app_name: &str, tree: ApplicationTree) {
        self.state
            .lock()
            .await
            .trees
            .insert(app_name.to_string(), tree);
    }

    /// Serve `manifest` for the resource `kind`/`name`.
    pub async fn set_resource(&self, kind: &str, name: &str, manifest: Value) {
        self.state
            .lock()
            .await
            .resources
            .insert((kind.to_string(), name.to_string()), manifest);
    }

    /// Make fetches of resource `name` hang for two minutes.
    pub async fn stall_resource(&self, name: &str) {
        self.state
            .lock()
            .await
            .slow_resources
            .insert(name.to_string());
    }

    /// Seed an existing application.
    pub async fn insert_application(&self, app: Application) {
        self.state
            .lock()
            .await
            .applications
            .insert(app.metadata.name.clone(), app);
    }

    /// Application by name.
    pub async fn application(&self, name: &str) -> Option<Application> {
        self.state.lock().await.applications.get(name).cloned()
    }

    /// Registered repository URLs in call order.
    pub async fn repositories(&self) -> Vec<String> {
        self.state.lock().await.repositories.clone()
    }

    /// Every call as `"<op> <target>"`.
    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    /// Calls starting with `prefix`.
    pub async fn calls_of(&self, prefix: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    async fn enter(&self, op: MockOp, call: String) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(call.clone());
        if state.take_failure(op) {
            return Err(ArgoCdError::Injected(call));
        }
        Ok(())
    }
}

#[async_trait]
impl ArgoCdClient for MockArgoCdClient {
    async fn resource_tree(&self, app_name: &str) -> Result<ApplicationTree> {
        self.enter(MockOp::ResourceTree, format!("resource_tree {app_name}"))
            .await?;
        self.state
            .lock()
            .await
            .trees
            .get(app_name)
            .cloned()
            .ok_or_else(|| ArgoCdError::NotFound(app_name.to_string()))
    }

    async fn get_resource(&self, query: &ResourceQuery) -> Result<Value> {
        self.enter(
            MockOp::GetResource,
            format!("get_resource {}/{}", query.kind, query.resource_name),
        )
        .await?;
        let stalled = self
            .state
            .lock()
            .await
            .slow_resources
            .contains(&query.resource_name);
        if stalled {
            tokio::time::sleep(Duration::from_secs(120)).await;
        }
        self.state
            .lock()
            .await
            .resources
            .get(&(query.kind.clone(), query.resource_name.clone()))
            .cloned()
            .ok_or_else(|| ArgoCdError::NotFound(format!("{}/{}", query.kind, query.resource_name)))
    }

    async fn get(&self, app_name: &str) -> Result<Application> {
        self.enter(MockOp::Get, format!("get {app_name}")).await?;
        self.application(app_name)
            .await
            .ok_or_else(|| ArgoCdError::NotFound(app_name.to_string()))
    }

    async fn update(&self, app: &Application) -> Result<Application> {
        self.enter(MockOp::Update, format!("update {}", app.metadata.name))
            .await?;
        let mut state = self.state.lock().await;
        if !state.applications.contains_key(&app.metadata.name) {
            return Err(ArgoCdError::NotFound(app.metadata.name.clone()));
        }
        state
            .applications
            .insert(app.metadata.name.clone(), app.clone());
        Ok(app.clone())
    }

    async fn sync(&self, app_name: &str) -> Result<()> {
        self.enter(MockOp::Sync, format!("sync {app_name}")).await
    }

    async fn patch(&self, app_name: &str, patch: &Value) -> Result<Application> {
        self.enter(MockOp::Patch, format!("patch {app_name}")).await?;
        let mut state = self.state.lock().await;
        let app = state
            .applications
            .get_mut(app_name)
            .ok_or_else(|| ArgoCdError::NotFound(app_name.to_string()))?;
        let source = &patch["spec"]["source"];
        if let Some(repo_url) = source["repoURL"].as_str() {
            app.spec.source.repo_url = repo_url.to_string();
        }
        if let Some(path) = source["path"].as_str() {
            app.spec.source.path = path.to_string();
        }
        Ok(app.clone())
    }

    async fn terminate_operation(&self, app_name: &str) -> Result<()> {
        self.state
            .lock()
            .await
            .calls
            .push(format!("terminate {app_name}"));
        Ok(())
    }

    async fn delete(&self, app_name: &str, cascade: bool) -> Result<()> {
        self.enter(MockOp::Delete, format!("delete {app_name} cascade={cascade}"))
            .await?;
        let mut state = self.state.lock().await;
        match state.delete_failure {
            Some(DeleteFailure::NotFound) => {
                return Err(ArgoCdError::NotFound(app_name.to_string()));
            }
            Some(DeleteFailure::Internal) => {
                return Err(ArgoCdError::Api {
                    status: 500,
                    message: "internal".to_string(),
                });
            }
            None => {}
        }
        state
            .applications
            .remove(app_name)
            .map(|_| ())
            .ok_or_else(|| ArgoCdError::NotFound(app_name.to_string()))
    }

    async fn create_application(&self, template: &AppTemplate) -> Result<String> {
        self.enter(
            MockOp::Create,
            format!("create {}", template.application_name),
        )
        .await?;
        let mut state = self.state.lock().await;
        if state.applications.contains_key(&template.application_name) {
            return Err(ArgoCdError::AlreadyExists(
                template.application_name.clone(),
            ));
        }
        state.applications.insert(
            template.application_name.clone(),
            template.to_application(),
        );
        Ok(template.application_name.clone())
    }

    async fn register_repository(&self, repo_url: &str) -> Result<()> {
        self.enter(MockOp::Register, format!("register {repo_url}"))
            .await?;
        let mut state = self.state.lock().await;
        if !state.repositories.iter().any(|r| r == repo_url) {
            state.repositories.push(repo_url.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::argocd::types::source_patch;

    fn template() -> AppTemplate {
        AppTemplate {
            application_name: "redis-dev".to_string(),
            namespace: "devtroncd".to_string(),
            target_namespace: "dev".to_string(),
            target_server: "https://k8s".to_string(),
            project: "default".to_string(),
            values_file: "values.yaml".to_string(),
            repo_path: "redis-dev".to_string(),
            repo_url: "https://git/a.git".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_twice_reports_already_exists() {
        let acd = MockArgoCdClient::new();
        acd.create_application(&template()).await.unwrap();
        let err = acd.create_application(&template()).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_patch_rewrites_source() {
        let acd = MockArgoCdClient::new();
        acd.create_application(&template()).await.unwrap();
        acd.patch("redis-dev", &source_patch("https://git/b.git", "redis-dev"))
            .await
            .unwrap();
        let app = acd.application("redis-dev").await.unwrap();
        assert_eq!(app.spec.source.repo_url, "https://git/b.git");
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let acd = MockArgoCdClient::new();
        assert!(acd.delete("nope", true).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_injected_failure_is_consumed() {
        let acd = MockArgoCdClient::failing_create().await;
        assert!(acd.create_application(&template()).await.is_err());
        assert!(acd.create_application(&template()).await.is_ok());
        assert_eq!(acd.calls_of("create").await.len(), 2);
    }
}
