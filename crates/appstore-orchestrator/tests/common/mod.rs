// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for orchestrator scenarios.
//!
//! Wires an [`AppStoreService`] to the in-memory repository, the recording
//! Git and ArgoCD clients and the in-process bus, with a seeded catalog.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use appstore_core::models::{AppStoreVersion, Cluster, Environment, Team};
use appstore_core::{DeploymentStatus, MemoryRepository, ReferenceValueKind, Repository};
use appstore_orchestrator::api::InstallAppVersionDTO;
use appstore_orchestrator::argocd::MockArgoCdClient;
use appstore_orchestrator::bus::InMemoryBus;
use appstore_orchestrator::chart::CHART_PROXY_TEMPLATE;
use appstore_orchestrator::git::MockGitClient;
use appstore_orchestrator::{AppStoreService, ServiceSettings};
use tempfile::TempDir;

pub const CHART_NAME: &str = "nginx-ingress";
pub const CHART_REPO_URL: &str = "https://kubernetes.github.io/ingress-nginx";
pub const DEFAULT_VALUES: &str = "controller:\n  replicaCount: 1\n";
pub const ENV_ID: i32 = 7;
pub const APP_STORE_VERSION_ID: i32 = 42;
pub const USER_ID: i32 = 2;

/// Seeded catalog rows.
pub struct Catalog {
    pub team: Team,
    pub cluster: Cluster,
    pub environment: Environment,
    pub chart_repo_id: i32,
    pub app_store_id: i32,
    pub app_store_version: AppStoreVersion,
}

/// Service plus handles on every fake collaborator.
pub struct TestContext {
    pub repo: MemoryRepository,
    pub git: MockGitClient,
    pub argocd: MockArgoCdClient,
    pub bus: InMemoryBus,
    pub service: Arc<AppStoreService>,
    pub catalog: Catalog,
    pub settings: ServiceSettings,
    _dir: TempDir,
}

impl TestContext {
    /// Seed the catalog and lay out a reference chart on disk.
    pub fn new() -> Self {
        Self::with_git(MockGitClient::new())
    }

    /// Same as [`new`](Self::new) with a prepared Git client.
    pub fn with_git(git: MockGitClient) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let proxy = dir.path().join("charts").join(CHART_PROXY_TEMPLATE);
        std::fs::create_dir_all(proxy.join("templates")).expect("create chart dir");
        std::fs::write(
            proxy.join("Chart.yaml"),
            "apiVersion: v2\nname: reference-chart-proxy\nversion: 1.0.0\n",
        )
        .expect("write Chart.yaml");
        std::fs::write(proxy.join("templates").join("NOTES.txt"), "proxy chart\n")
            .expect("write NOTES.txt");

        let repo = MemoryRepository::new();
        let team = repo.add_team("platform");
        let cluster = repo.add_cluster("default_cluster", "https://kubernetes.default.svc");
        let environment = repo.add_environment_with_id(ENV_ID, "prod", cluster.id, "prod");
        let chart_repo_id = repo.add_chart_repo("ingress-nginx", CHART_REPO_URL);
        let app_store_id = repo.add_app_store(CHART_NAME, chart_repo_id);
        let app_store_version = repo.add_app_store_version_with_id(
            APP_STORE_VERSION_ID,
            app_store_id,
            "4.0.1",
            DEFAULT_VALUES,
        );
        repo.set_gitops_config("GITHUB", "");

        let settings = ServiceSettings {
            ref_chart_dir: dir.path().join("charts"),
            argocd_namespace: "devtroncd".to_string(),
            cluster_component_dir: dir.path().join("components"),
        };
        let argocd = MockArgoCdClient::new();
        let bus = InMemoryBus::new();
        let service = Arc::new(AppStoreService::new(
            Arc::new(repo.clone()),
            Arc::new(git.clone()),
            Arc::new(argocd.clone()),
            Arc::new(bus.clone()),
            settings.clone(),
        ));

        Self {
            repo,
            git,
            argocd,
            bus,
            service,
            catalog: Catalog {
                team,
                cluster,
                environment,
                chart_repo_id,
                app_store_id,
                app_store_version,
            },
            settings,
            _dir: dir,
        }
    }

    /// Install request for `app_name` on the seeded environment and version.
    pub fn install_request(&self, app_name: &str) -> InstallAppVersionDTO {
        InstallAppVersionDTO {
            app_name: app_name.to_string(),
            team_id: self.catalog.team.id,
            environment_id: ENV_ID,
            app_store_version: APP_STORE_VERSION_ID,
            values_override_yaml: "controller:\n  replicaCount: 2\n".to_string(),
            reference_value_kind: ReferenceValueKind::Default,
            user_id: USER_ID,
            ..Default::default()
        }
    }

    /// Write a default cluster component values file.
    pub fn write_component(&self, stem: &str, values: &str) -> PathBuf {
        std::fs::create_dir_all(&self.settings.cluster_component_dir).expect("create component dir");
        let path = self
            .settings
            .cluster_component_dir
            .join(format!("{stem}.yaml"));
        std::fs::write(&path, values).expect("write component values");
        path
    }

    /// Current status of an installed app.
    pub async fn status_of(&self, installed_app_id: i32) -> DeploymentStatus {
        self.repo
            .get_installed_app(installed_app_id)
            .await
            .expect("read installed app")
            .expect("installed app exists")
            .status
    }

    /// Statuses recorded in history for a version, oldest first.
    pub async fn history_of(&self, installed_app_version_id: i32) -> Vec<DeploymentStatus> {
        self.repo
            .list_installed_app_history(installed_app_version_id)
            .await
            .expect("read history")
            .into_iter()
            .map(|h| h.status)
            .collect()
    }

    /// Poll until `installed_app_id` reaches `status` or the deadline passes.
    pub async fn wait_for_status(
        &self,
        installed_app_id: i32,
        status: DeploymentStatus,
        deadline: Duration,
    ) -> bool {
        let start = tokio::time::Instant::now();
        while start.elapsed() < deadline {
            if self.status_of(installed_app_id).await == status {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}
