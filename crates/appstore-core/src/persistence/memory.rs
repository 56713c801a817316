// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory repository.
//!
//! Mirrors the PostgreSQL backend closely enough to drive the orchestrator
//! end to end in tests. A transaction works on a private snapshot of the
//! committed tables and records every row it writes; commit replays those
//! rows onto the shared state under one lock, rollback or drop discards them.
//! Ids come from per-table sequences shared by all transactions, so ids of
//! rolled back rows are burnt as they would be with `SERIAL`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Repository, Transaction, TxContext};
use crate::error::{PersistenceError, Result};
use crate::models::*;
use crate::status::{DeploymentStatus, ReferenceValueKind};

#[derive(Debug, Clone)]
struct EnvironmentRow {
    id: i32,
    environment_name: String,
    cluster_id: i32,
    namespace: String,
    active: bool,
}

#[derive(Debug, Clone)]
struct AppStoreRow {
    id: i32,
    name: String,
    chart_repo_id: i32,
    active: bool,
}

#[derive(Debug, Clone)]
struct ChartRepoRow {
    id: i32,
    name: String,
    url: String,
    active: bool,
}

#[derive(Debug, Clone)]
struct AppStoreVersionRow {
    id: i32,
    app_store_id: i32,
    version: String,
    values_yaml: String,
    readme: String,
    deprecated: bool,
    latest: bool,
}

#[derive(Debug, Clone)]
struct ValuesTemplateRow {
    values_yaml: String,
    deleted: bool,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    apps: BTreeMap<i32, App>,
    teams: BTreeMap<i32, Team>,
    clusters: BTreeMap<i32, Cluster>,
    environments: BTreeMap<i32, EnvironmentRow>,
    chart_repos: BTreeMap<i32, ChartRepoRow>,
    app_stores: BTreeMap<i32, AppStoreRow>,
    app_store_versions: BTreeMap<i32, AppStoreVersionRow>,
    values_templates: BTreeMap<i32, ValuesTemplateRow>,
    gitops_configs: BTreeMap<i32, GitOpsConfig>,
    installed_apps: BTreeMap<i32, InstalledApp>,
    installed_app_versions: BTreeMap<i32, InstalledAppVersion>,
    chart_group_deployments: BTreeMap<i32, ChartGroupDeployment>,
    cluster_installed_apps: BTreeMap<i32, ClusterInstalledApp>,
    history: BTreeMap<i32, InstalledAppHistory>,
}

/// A row written by a transaction, replayed on commit.
#[derive(Debug, Clone)]
enum RowWrite {
    App(App),
    Team(Team),
    Environment(EnvironmentRow),
    InstalledApp(InstalledApp),
    InstalledAppVersion(InstalledAppVersion),
    ChartGroupDeployment(ChartGroupDeployment),
    ClusterInstalledApp(ClusterInstalledApp),
    History(InstalledAppHistory),
}

impl Tables {
    fn apply(&mut self, write: RowWrite) {
        match write {
            RowWrite::App(row) => {
                self.apps.insert(row.id, row);
            }
            RowWrite::Team(row) => {
                self.teams.insert(row.id, row);
            }
            RowWrite::Environment(row) => {
                self.environments.insert(row.id, row);
            }
            RowWrite::InstalledApp(row) => {
                self.installed_apps.insert(row.id, row);
            }
            RowWrite::InstalledAppVersion(row) => {
                self.installed_app_versions.insert(row.id, row);
            }
            RowWrite::ChartGroupDeployment(row) => {
                self.chart_group_deployments.insert(row.id, row);
            }
            RowWrite::ClusterInstalledApp(row) => {
                self.cluster_installed_apps.insert(row.id, row);
            }
            RowWrite::History(row) => {
                self.history.insert(row.id, row);
            }
        }
    }

    fn environment(&self, id: i32) -> Option<Environment> {
        let env = self.environments.get(&id)?;
        let cluster = self.clusters.get(&env.cluster_id)?;
        Some(Environment {
            id: env.id,
            environment_name: env.environment_name.clone(),
            cluster_id: env.cluster_id,
            cluster_name: cluster.cluster_name.clone(),
            cluster_server_url: cluster.server_url.clone(),
            namespace: env.namespace.clone(),
            active: env.active,
        })
    }

    fn app_store_version(&self, id: i32) -> Option<AppStoreVersion> {
        let version = self.app_store_versions.get(&id)?;
        let store = self.app_stores.get(&version.app_store_id)?;
        let repo = self.chart_repos.get(&store.chart_repo_id)?;
        Some(AppStoreVersion {
            id: version.id,
            version: version.version.clone(),
            values_yaml: version.values_yaml.clone(),
            readme: version.readme.clone(),
            deprecated: version.deprecated,
            app_store_id: store.id,
            app_store_name: store.name.clone(),
            chart_repo_id: repo.id,
            chart_repo_name: repo.name.clone(),
            chart_repo_url: repo.url.clone(),
        })
    }

    fn active_apps_by_name(&self, name: &str) -> Vec<App> {
        self.apps
            .values()
            .filter(|a| a.active && a.app_name == name)
            .cloned()
            .collect()
    }

    fn version_detail(&self, version: &InstalledAppVersion) -> Option<InstalledAppVersionDetail> {
        let installed = self.installed_apps.get(&version.installed_app_id)?;
        let app = self.apps.get(&installed.app_id)?;
        let env = self.environment(installed.environment_id)?;
        let asv = self.app_store_version(version.app_store_application_version_id)?;
        Some(InstalledAppVersionDetail {
            id: version.id,
            installed_app_id: installed.id,
            app_id: app.id,
            app_name: app.app_name.clone(),
            team_id: app.team_id,
            environment_id: env.id,
            environment_name: env.environment_name,
            namespace: env.namespace,
            cluster_id: env.cluster_id,
            cluster_server_url: env.cluster_server_url,
            app_store_application_version_id: asv.id,
            app_store_version: asv.version,
            app_store_id: asv.app_store_id,
            app_store_name: asv.app_store_name,
            chart_repo_id: asv.chart_repo_id,
            chart_repo_url: asv.chart_repo_url,
            readme: asv.readme,
            deprecated: asv.deprecated,
            values_yaml_raw: version.values_yaml_raw.clone(),
            reference_value_id: version.reference_value_id,
            reference_value_kind: version.reference_value_kind,
            status: installed.status,
        })
    }

    /// Active versions of active installed apps with their join context.
    fn active_version_details(&self) -> Vec<InstalledAppVersionDetail> {
        self.installed_app_versions
            .values()
            .filter(|v| v.active)
            .filter(|v| {
                self.installed_apps
                    .get(&v.installed_app_id)
                    .is_some_and(|ia| ia.active)
            })
            .filter_map(|v| self.version_detail(v))
            .collect()
    }
}

#[derive(Debug, Default)]
struct Sequences {
    app: AtomicI32,
    team: AtomicI32,
    cluster: AtomicI32,
    environment: AtomicI32,
    chart_repo: AtomicI32,
    app_store: AtomicI32,
    app_store_version: AtomicI32,
    values_template: AtomicI32,
    gitops_config: AtomicI32,
    installed_app: AtomicI32,
    installed_app_version: AtomicI32,
    chart_group_deployment: AtomicI32,
    cluster_installed_app: AtomicI32,
    history: AtomicI32,
}

fn next_id(seq: &AtomicI32) -> i32 {
    seq.fetch_add(1, Ordering::SeqCst) + 1
}

#[derive(Debug, Default)]
struct Shared {
    tables: Mutex<Tables>,
    seq: Sequences,
    fail_status_updates: AtomicUsize,
    fail_commits: AtomicUsize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Tables> {
        // A poisoned lock only means a test panicked mid-write; the data is still usable.
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_fault(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// In-memory [`Repository`] with seeding helpers and fault injection.
#[derive(Clone, Default)]
pub struct MemoryRepository {
    shared: Arc<Shared>,
}

impl MemoryRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next app insert use `id`.
    pub fn set_next_app_id(&self, id: i32) {
        self.shared.seq.app.store(id - 1, Ordering::SeqCst);
    }

    /// Fail the next `n` conditional status updates.
    pub fn fail_status_updates(&self, n: usize) {
        self.shared.fail_status_updates.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` commits. A failed commit discards the transaction.
    pub fn fail_commits(&self, n: usize) {
        self.shared.fail_commits.store(n, Ordering::SeqCst);
    }

    // ------------------------------------------------------------------
    // Seeding
    // ------------------------------------------------------------------

    /// Insert a team.
    pub fn add_team(&self, name: &str) -> Team {
        let team = Team {
            id: next_id(&self.shared.seq.team),
            name: name.to_string(),
            active: true,
        };
        self.shared.lock().teams.insert(team.id, team.clone());
        team
    }

    /// Insert a cluster.
    pub fn add_cluster(&self, name: &str, server_url: &str) -> Cluster {
        let cluster = Cluster {
            id: next_id(&self.shared.seq.cluster),
            cluster_name: name.to_string(),
            server_url: server_url.to_string(),
            active: true,
        };
        self.shared
            .lock()
            .clusters
            .insert(cluster.id, cluster.clone());
        cluster
    }

    /// Insert an environment with a chosen id.
    pub fn add_environment_with_id(
        &self,
        id: i32,
        name: &str,
        cluster_id: i32,
        namespace: &str,
    ) -> Environment {
        self.shared.seq.environment.fetch_max(id, Ordering::SeqCst);
        let mut tables = self.shared.lock();
        tables.environments.insert(
            id,
            EnvironmentRow {
                id,
                environment_name: name.to_string(),
                cluster_id,
                namespace: namespace.to_string(),
                active: true,
            },
        );
        let cluster = tables.clusters.get(&cluster_id);
        Environment {
            id,
            environment_name: name.to_string(),
            cluster_id,
            cluster_name: cluster.map(|c| c.cluster_name.clone()).unwrap_or_default(),
            cluster_server_url: cluster.map(|c| c.server_url.clone()).unwrap_or_default(),
            namespace: namespace.to_string(),
            active: true,
        }
    }

    /// Insert an environment.
    pub fn add_environment(&self, name: &str, cluster_id: i32, namespace: &str) -> Environment {
        let id = next_id(&self.shared.seq.environment);
        self.add_environment_with_id(id, name, cluster_id, namespace)
    }

    /// Insert a chart repository and return its id.
    pub fn add_chart_repo(&self, name: &str, url: &str) -> i32 {
        let id = next_id(&self.shared.seq.chart_repo);
        self.shared.lock().chart_repos.insert(
            id,
            ChartRepoRow {
                id,
                name: name.to_string(),
                url: url.to_string(),
                active: true,
            },
        );
        id
    }

    /// Insert an app store and return its id.
    pub fn add_app_store(&self, name: &str, chart_repo_id: i32) -> i32 {
        let id = next_id(&self.shared.seq.app_store);
        self.shared.lock().app_stores.insert(
            id,
            AppStoreRow {
                id,
                name: name.to_string(),
                chart_repo_id,
                active: true,
            },
        );
        id
    }

    /// Insert an app store version with a chosen id.
    pub fn add_app_store_version_with_id(
        &self,
        id: i32,
        app_store_id: i32,
        version: &str,
        values_yaml: &str,
    ) -> AppStoreVersion {
        self.shared
            .seq
            .app_store_version
            .fetch_max(id, Ordering::SeqCst);
        let mut tables = self.shared.lock();
        for row in tables.app_store_versions.values_mut() {
            if row.app_store_id == app_store_id {
                row.latest = false;
            }
        }
        tables.app_store_versions.insert(
            id,
            AppStoreVersionRow {
                id,
                app_store_id,
                version: version.to_string(),
                values_yaml: values_yaml.to_string(),
                readme: String::new(),
                deprecated: false,
                latest: true,
            },
        );
        let store = tables.app_stores.get(&app_store_id);
        let repo = store.and_then(|s| tables.chart_repos.get(&s.chart_repo_id));
        AppStoreVersion {
            id,
            version: version.to_string(),
            values_yaml: values_yaml.to_string(),
            readme: String::new(),
            deprecated: false,
            app_store_id,
            app_store_name: store.map(|s| s.name.clone()).unwrap_or_default(),
            chart_repo_id: repo.map(|r| r.id).unwrap_or_default(),
            chart_repo_name: repo.map(|r| r.name.clone()).unwrap_or_default(),
            chart_repo_url: repo.map(|r| r.url.clone()).unwrap_or_default(),
        }
    }

    /// Insert an app store version.
    pub fn add_app_store_version(
        &self,
        app_store_id: i32,
        version: &str,
        values_yaml: &str,
    ) -> AppStoreVersion {
        let id = next_id(&self.shared.seq.app_store_version);
        self.add_app_store_version_with_id(id, app_store_id, version, values_yaml)
    }

    /// Insert a saved values template and return its id.
    pub fn add_values_template(&self, values_yaml: &str) -> i32 {
        let id = next_id(&self.shared.seq.values_template);
        self.shared.lock().values_templates.insert(
            id,
            ValuesTemplateRow {
                values_yaml: values_yaml.to_string(),
                deleted: false,
            },
        );
        id
    }

    /// Insert the active GitOps config.
    pub fn set_gitops_config(&self, provider: &str, bitbucket_workspace_id: &str) -> GitOpsConfig {
        let config = GitOpsConfig {
            id: next_id(&self.shared.seq.gitops_config),
            provider: provider.to_string(),
            host: String::new(),
            bitbucket_workspace_id: bitbucket_workspace_id.to_string(),
            active: true,
        };
        let mut tables = self.shared.lock();
        for existing in tables.gitops_configs.values_mut() {
            existing.active = false;
        }
        tables.gitops_configs.insert(config.id, config.clone());
        config
    }

    /// Overwrite the status of an installed app outside any transaction.
    pub fn force_status(&self, installed_app_id: i32, status: DeploymentStatus) {
        if let Some(row) = self.shared.lock().installed_apps.get_mut(&installed_app_id) {
            row.status = status;
        }
    }

    /// Number of installed app rows, active or not.
    pub fn installed_app_count(&self) -> usize {
        self.shared.lock().installed_apps.len()
    }

    /// Number of installed app version rows, active or not.
    pub fn installed_app_version_count(&self) -> usize {
        self.shared.lock().installed_app_versions.len()
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        f(&self.shared.lock())
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn begin(&self) -> Result<TxContext> {
        let working = self.shared.lock().clone();
        Ok(Box::new(MemoryTransaction {
            shared: self.shared.clone(),
            working,
            writes: Vec::new(),
            started_at: Utc::now(),
        }))
    }

    async fn get_app_store_version(&self, id: i32) -> Result<Option<AppStoreVersion>> {
        Ok(self.read(|t| t.app_store_version(id)))
    }

    async fn find_app_store_version_by_store_name(
        &self,
        app_store_name: &str,
    ) -> Result<Option<AppStoreVersion>> {
        Ok(self.read(|t| {
            let store = t
                .app_stores
                .values()
                .find(|s| s.active && s.name == app_store_name)?;
            t.app_store_versions
                .values()
                .filter(|v| v.app_store_id == store.id)
                .max_by_key(|v| (v.latest, v.id))
                .and_then(|v| t.app_store_version(v.id))
        }))
    }

    async fn get_environment(&self, id: i32) -> Result<Option<Environment>> {
        Ok(self.read(|t| t.environment(id).filter(|e| e.active)))
    }

    async fn find_environment_by_name(&self, name: &str) -> Result<Option<Environment>> {
        Ok(self.read(|t| {
            t.environments
                .values()
                .find(|e| e.active && e.environment_name == name)
                .and_then(|e| t.environment(e.id))
        }))
    }

    async fn get_cluster(&self, id: i32) -> Result<Option<Cluster>> {
        Ok(self.read(|t| t.clusters.get(&id).filter(|c| c.active).cloned()))
    }

    async fn find_cluster_by_name(&self, name: &str) -> Result<Option<Cluster>> {
        Ok(self.read(|t| {
            t.clusters
                .values()
                .find(|c| c.active && c.cluster_name == name)
                .cloned()
        }))
    }

    async fn get_team(&self, id: i32) -> Result<Option<Team>> {
        Ok(self.read(|t| t.teams.get(&id).filter(|team| team.active).cloned()))
    }

    async fn find_team_by_name(&self, name: &str) -> Result<Option<Team>> {
        Ok(self.read(|t| {
            t.teams
                .values()
                .find(|team| team.active && team.name == name)
                .cloned()
        }))
    }

    async fn find_active_app_by_name(&self, name: &str) -> Result<Option<App>> {
        Ok(self.read(|t| t.active_apps_by_name(name).into_iter().next()))
    }

    async fn find_values_by_id_and_kind(
        &self,
        id: i32,
        kind: ReferenceValueKind,
    ) -> Result<Option<String>> {
        Ok(self.read(|t| match kind {
            ReferenceValueKind::Default => t
                .app_store_versions
                .get(&id)
                .map(|v| v.values_yaml.clone()),
            ReferenceValueKind::Template => t
                .values_templates
                .get(&id)
                .filter(|v| !v.deleted)
                .map(|v| v.values_yaml.clone()),
            ReferenceValueKind::Deployed => t
                .installed_app_versions
                .get(&id)
                .map(|v| v.values_yaml_raw.clone()),
            ReferenceValueKind::Existing => None,
        }))
    }

    async fn get_active_gitops_config(&self) -> Result<Option<GitOpsConfig>> {
        Ok(self.read(|t| t.gitops_configs.values().rev().find(|c| c.active).cloned()))
    }

    async fn get_installed_app(&self, id: i32) -> Result<Option<InstalledAppDetail>> {
        Ok(self.read(|t| {
            let installed = t.installed_apps.get(&id).filter(|ia| ia.active)?;
            let app = t.apps.get(&installed.app_id)?;
            let env = t.environment(installed.environment_id)?;
            Some(InstalledAppDetail {
                id: installed.id,
                app_id: app.id,
                app_name: app.app_name.clone(),
                team_id: app.team_id,
                environment_id: env.id,
                environment_name: env.environment_name,
                namespace: env.namespace,
                cluster_id: env.cluster_id,
                cluster_server_url: env.cluster_server_url,
                status: installed.status,
            })
        }))
    }

    async fn get_installed_app_version(
        &self,
        id: i32,
    ) -> Result<Option<InstalledAppVersionDetail>> {
        Ok(self.read(|t| t.active_version_details().into_iter().find(|d| d.id == id)))
    }

    async fn get_all_installed_apps(&self, env_ids: &[i32]) -> Result<Vec<InstalledAppListRow>> {
        Ok(self.read(|t| {
            let mut rows: Vec<InstalledAppListRow> = t
                .active_version_details()
                .into_iter()
                .filter(|d| env_ids.is_empty() || env_ids.contains(&d.environment_id))
                .filter(|d| t.apps.get(&d.app_id).is_some_and(|a| a.active))
                .map(|d| {
                    let version = &t.installed_app_versions[&d.id];
                    let chart_repo_name = t
                        .chart_repos
                        .get(&d.chart_repo_id)
                        .map(|r| r.name.clone())
                        .unwrap_or_default();
                    InstalledAppListRow {
                        installed_app_id: d.installed_app_id,
                        installed_app_version_id: d.id,
                        app_id: d.app_id,
                        app_name: d.app_name,
                        environment_id: d.environment_id,
                        environment_name: d.environment_name,
                        app_store_application_version_id: d.app_store_application_version_id,
                        app_store_name: d.app_store_name,
                        chart_repo_name,
                        status: d.status,
                        updated_on: version.updated_on,
                    }
                })
                .collect();
            rows.sort_by_key(|r| r.installed_app_id);
            rows
        }))
    }

    async fn get_installed_app_version_by_installed_app_id_and_env_id(
        &self,
        installed_app_id: i32,
        env_id: i32,
    ) -> Result<Option<InstalledAppVersionDetail>> {
        Ok(self.read(|t| {
            t.active_version_details()
                .into_iter()
                .find(|d| d.installed_app_id == installed_app_id && d.environment_id == env_id)
        }))
    }

    async fn list_helm_apps(&self, filter: &AppStoreFilter) -> Result<Vec<HelmAppRow>> {
        Ok(self.read(|t| {
            let contains = |needle: &Option<String>, hay: &str| match needle.as_deref() {
                Some(n) if !n.is_empty() => hay.contains(n),
                _ => true,
            };
            let mut rows: Vec<HelmAppRow> = t
                .active_version_details()
                .into_iter()
                .filter(|d| d.team_id != 0)
                .filter(|d| !filter.only_deprecated || d.deprecated)
                .filter(|d| contains(&filter.app_store_name, &d.app_store_name))
                .filter(|d| contains(&filter.app_name, &d.app_name))
                .filter(|d| {
                    filter.chart_repo_ids.is_empty() || filter.chart_repo_ids.contains(&d.chart_repo_id)
                })
                .filter(|d| {
                    filter.environment_ids.is_empty()
                        || filter.environment_ids.contains(&d.environment_id)
                })
                .filter(|d| {
                    filter.cluster_ids.is_empty() || filter.cluster_ids.contains(&d.cluster_id)
                })
                .map(|d| HelmAppRow {
                    installed_app_id: d.installed_app_id,
                    installed_app_version_id: d.id,
                    app_id: d.app_id,
                    app_name: d.app_name,
                    team_id: d.team_id,
                    environment_id: d.environment_id,
                    environment_name: d.environment_name,
                    namespace: d.namespace,
                    cluster_id: d.cluster_id,
                    cluster_name: t
                        .clusters
                        .get(&d.cluster_id)
                        .map(|c| c.cluster_name.clone())
                        .unwrap_or_default(),
                    app_store_application_version_id: d.app_store_application_version_id,
                    app_store_id: d.app_store_id,
                    app_store_name: d.app_store_name,
                    chart_version: d.app_store_version,
                    chart_repo_name: t
                        .chart_repos
                        .get(&d.chart_repo_id)
                        .map(|r| r.name.clone())
                        .unwrap_or_default(),
                    deprecated: d.deprecated,
                    status: d.status,
                    updated_on: t.installed_app_versions[&d.id].updated_on,
                })
                .collect();
            rows.sort_by(|a, b| {
                a.app_store_name
                    .cmp(&b.app_store_name)
                    .then(a.installed_app_id.cmp(&b.installed_app_id))
            });
            if filter.size > 0 {
                rows.into_iter()
                    .skip(filter.offset.max(0) as usize)
                    .take(filter.size as usize)
                    .collect()
            } else {
                rows
            }
        }))
    }

    async fn list_installed_app_versions(
        &self,
        installed_app_id: i32,
    ) -> Result<Vec<InstalledAppVersion>> {
        Ok(self.read(|t| {
            t.installed_app_versions
                .values()
                .filter(|v| v.installed_app_id == installed_app_id)
                .cloned()
                .collect()
        }))
    }

    async fn list_chart_group_deployments(
        &self,
        installed_app_id: i32,
    ) -> Result<Vec<ChartGroupDeployment>> {
        Ok(self.read(|t| {
            t.chart_group_deployments
                .values()
                .filter(|d| d.installed_app_id == installed_app_id)
                .cloned()
                .collect()
        }))
    }

    async fn list_cluster_installed_apps(
        &self,
        cluster_id: i32,
    ) -> Result<Vec<ClusterInstalledApp>> {
        Ok(self.read(|t| {
            t.cluster_installed_apps
                .values()
                .filter(|c| c.cluster_id == cluster_id)
                .cloned()
                .collect()
        }))
    }

    async fn list_installed_app_history(
        &self,
        installed_app_version_id: i32,
    ) -> Result<Vec<InstalledAppHistory>> {
        Ok(self.read(|t| {
            t.history
                .values()
                .filter(|h| h.installed_app_version_id == installed_app_version_id)
                .cloned()
                .collect()
        }))
    }

    async fn get_installed_app_row(&self, id: i32) -> Result<Option<InstalledApp>> {
        Ok(self.read(|t| t.installed_apps.get(&id).cloned()))
    }

    async fn get_app(&self, id: i32) -> Result<Option<App>> {
        Ok(self.read(|t| t.apps.get(&id).cloned()))
    }
}

/// Transaction handle of [`MemoryRepository`].
pub struct MemoryTransaction {
    shared: Arc<Shared>,
    working: Tables,
    writes: Vec<RowWrite>,
    /// Timestamp of every write in the transaction, like Postgres `NOW()`.
    started_at: DateTime<Utc>,
}

impl MemoryTransaction {
    fn write(&mut self, row: RowWrite) {
        self.working.apply(row.clone());
        self.writes.push(row);
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn find_active_apps_by_name(&mut self, name: &str) -> Result<Vec<App>> {
        Ok(self.working.active_apps_by_name(name))
    }

    async fn insert_app(&mut self, app: &NewApp) -> Result<App> {
        let now = self.started_at;
        let row = App {
            id: next_id(&self.shared.seq.app),
            app_name: app.app_name.clone(),
            team_id: app.team_id,
            app_store: true,
            active: true,
            created_on: now,
            created_by: app.user_id,
            updated_on: now,
            updated_by: app.user_id,
        };
        self.write(RowWrite::App(row.clone()));
        Ok(row)
    }

    async fn set_app_active(&mut self, app_id: i32, active: bool, user_id: i32) -> Result<bool> {
        let Some(mut row) = self.working.apps.get(&app_id).cloned() else {
            return Ok(false);
        };
        row.active = active;
        row.updated_by = user_id;
        row.updated_on = self.started_at;
        self.write(RowWrite::App(row));
        Ok(true)
    }

    async fn insert_environment(&mut self, env: &NewEnvironment) -> Result<Environment> {
        let row = EnvironmentRow {
            id: next_id(&self.shared.seq.environment),
            environment_name: env.environment_name.clone(),
            cluster_id: env.cluster_id,
            namespace: env.namespace.clone(),
            active: true,
        };
        let id = row.id;
        self.write(RowWrite::Environment(row));
        self.working
            .environment(id)
            .ok_or_else(|| PersistenceError::not_found("cluster", env.cluster_id))
    }

    async fn insert_team(&mut self, name: &str, _user_id: i32) -> Result<Team> {
        let row = Team {
            id: next_id(&self.shared.seq.team),
            name: name.to_string(),
            active: true,
        };
        self.write(RowWrite::Team(row.clone()));
        Ok(row)
    }

    async fn get_installed_app(&mut self, id: i32) -> Result<Option<InstalledApp>> {
        Ok(self.working.installed_apps.get(&id).cloned())
    }

    async fn insert_installed_app(&mut self, new: &NewInstalledApp) -> Result<InstalledApp> {
        let clash = self.working.installed_apps.values().any(|ia| {
            ia.active && ia.app_id == new.app_id && ia.environment_id == new.environment_id
        });
        if clash {
            return Err(PersistenceError::Conflict(format!(
                "active installed app exists for app {} in environment {}",
                new.app_id, new.environment_id
            )));
        }
        let now = self.started_at;
        let row = InstalledApp {
            id: next_id(&self.shared.seq.installed_app),
            app_id: new.app_id,
            environment_id: new.environment_id,
            status: new.status,
            active: true,
            created_on: now,
            created_by: new.user_id,
            updated_on: now,
            updated_by: new.user_id,
        };
        self.write(RowWrite::InstalledApp(row.clone()));
        Ok(row)
    }

    async fn update_installed_app(&mut self, app: &InstalledApp) -> Result<()> {
        let Some(mut row) = self.working.installed_apps.get(&app.id).cloned() else {
            return Err(PersistenceError::not_found("installed_app", app.id));
        };
        row.status = app.status;
        row.active = app.active;
        row.updated_by = app.updated_by;
        row.updated_on = self.started_at;
        self.write(RowWrite::InstalledApp(row));
        Ok(())
    }

    async fn update_installed_app_status_if(
        &mut self,
        id: i32,
        next: DeploymentStatus,
        allowed: &[DeploymentStatus],
        user_id: i32,
    ) -> Result<bool> {
        if Shared::take_fault(&self.shared.fail_status_updates) {
            return Err(PersistenceError::Injected(format!(
                "status update of installed app {id}"
            )));
        }
        // Read committed state unless this transaction already wrote the row.
        let own_write = self
            .writes
            .iter()
            .any(|w| matches!(w, RowWrite::InstalledApp(row) if row.id == id));
        let current = if own_write {
            self.working.installed_apps.get(&id).cloned()
        } else {
            self.shared.lock().installed_apps.get(&id).cloned()
        };
        let Some(mut row) = current else {
            return Ok(false);
        };
        if !allowed.contains(&row.status) {
            return Ok(false);
        }
        row.status = next;
        row.updated_by = user_id;
        row.updated_on = self.started_at;
        self.write(RowWrite::InstalledApp(row));
        Ok(true)
    }

    async fn get_installed_app_version(&mut self, id: i32) -> Result<Option<InstalledAppVersion>> {
        Ok(self.working.installed_app_versions.get(&id).cloned())
    }

    async fn insert_installed_app_version(
        &mut self,
        new: &NewInstalledAppVersion,
    ) -> Result<InstalledAppVersion> {
        let clash = self
            .working
            .installed_app_versions
            .values()
            .any(|v| v.active && v.installed_app_id == new.installed_app_id);
        if clash {
            return Err(PersistenceError::Conflict(format!(
                "active version exists for installed app {}",
                new.installed_app_id
            )));
        }
        let now = self.started_at;
        let row = InstalledAppVersion {
            id: next_id(&self.shared.seq.installed_app_version),
            installed_app_id: new.installed_app_id,
            app_store_application_version_id: new.app_store_application_version_id,
            values_yaml_raw: new.values_yaml_raw.clone(),
            reference_value_id: new.reference_value_id,
            reference_value_kind: new.reference_value_kind,
            active: true,
            created_on: now,
            created_by: new.user_id,
            updated_on: now,
            updated_by: new.user_id,
        };
        self.write(RowWrite::InstalledAppVersion(row.clone()));
        Ok(row)
    }

    async fn update_installed_app_version(&mut self, version: &InstalledAppVersion) -> Result<()> {
        let Some(mut row) = self.working.installed_app_versions.get(&version.id).cloned() else {
            return Err(PersistenceError::not_found(
                "installed_app_version",
                version.id,
            ));
        };
        row.app_store_application_version_id = version.app_store_application_version_id;
        row.values_yaml_raw = version.values_yaml_raw.clone();
        row.reference_value_id = version.reference_value_id;
        row.reference_value_kind = version.reference_value_kind;
        row.active = version.active;
        row.updated_by = version.updated_by;
        row.updated_on = self.started_at;
        self.write(RowWrite::InstalledAppVersion(row));
        Ok(())
    }

    async fn deactivate_installed_app_versions(
        &mut self,
        installed_app_id: i32,
        user_id: i32,
    ) -> Result<u64> {
        let now = self.started_at;
        let rows: Vec<InstalledAppVersion> = self
            .working
            .installed_app_versions
            .values()
            .filter(|v| v.installed_app_id == installed_app_id && v.active)
            .cloned()
            .collect();
        let count = rows.len() as u64;
        for mut row in rows {
            row.active = false;
            row.updated_by = user_id;
            row.updated_on = now;
            self.write(RowWrite::InstalledAppVersion(row));
        }
        Ok(count)
    }

    async fn insert_cluster_installed_app(
        &mut self,
        cluster_id: i32,
        installed_app_id: i32,
        user_id: i32,
    ) -> Result<ClusterInstalledApp> {
        let row = ClusterInstalledApp {
            id: next_id(&self.shared.seq.cluster_installed_app),
            cluster_id,
            installed_app_id,
            created_on: self.started_at,
            created_by: user_id,
        };
        self.write(RowWrite::ClusterInstalledApp(row.clone()));
        Ok(row)
    }

    async fn insert_chart_group_deployment(
        &mut self,
        new: &NewChartGroupDeployment,
    ) -> Result<ChartGroupDeployment> {
        let row = ChartGroupDeployment {
            id: next_id(&self.shared.seq.chart_group_deployment),
            chart_group_id: new.chart_group_id,
            chart_group_entry_id: new.chart_group_entry_id,
            installed_app_id: new.installed_app_id,
            group_installation_id: new.group_installation_id.clone(),
            deleted: false,
            created_on: self.started_at,
            created_by: new.user_id,
        };
        self.write(RowWrite::ChartGroupDeployment(row.clone()));
        Ok(row)
    }

    async fn mark_chart_group_deployments_deleted(
        &mut self,
        installed_app_id: i32,
        _user_id: i32,
    ) -> Result<u64> {
        let rows: Vec<ChartGroupDeployment> = self
            .working
            .chart_group_deployments
            .values()
            .filter(|d| d.installed_app_id == installed_app_id && !d.deleted)
            .cloned()
            .collect();
        let count = rows.len() as u64;
        for mut row in rows {
            row.deleted = true;
            self.write(RowWrite::ChartGroupDeployment(row));
        }
        Ok(count)
    }

    async fn insert_installed_app_history(
        &mut self,
        installed_app_version_id: i32,
        status: DeploymentStatus,
        values_yaml_raw: &str,
        user_id: i32,
    ) -> Result<()> {
        let row = InstalledAppHistory {
            id: next_id(&self.shared.seq.history),
            installed_app_version_id,
            status,
            values_yaml_raw: values_yaml_raw.to_string(),
            created_on: self.started_at,
            created_by: user_id,
        };
        self.write(RowWrite::History(row));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        if Shared::take_fault(&self.shared.fail_commits) {
            return Err(PersistenceError::Injected("commit".to_string()));
        }
        let MemoryTransaction { shared, writes, .. } = *self;
        let mut tables = shared.lock();
        for write in writes {
            tables.apply(write);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> (MemoryRepository, Environment, AppStoreVersion) {
        let repo = MemoryRepository::new();
        let cluster = repo.add_cluster("default_cluster", "https://kubernetes.default.svc");
        let env = repo.add_environment("prod", cluster.id, "apps");
        let chart_repo = repo.add_chart_repo("bitnami", "https://charts.bitnami.com/bitnami");
        let store = repo.add_app_store("nginx-ingress", chart_repo);
        let version = repo.add_app_store_version(store, "4.0.1", "replicaCount: 1\n");
        (repo, env, version)
    }

    async fn install(repo: &MemoryRepository, env: &Environment, version: &AppStoreVersion) -> (App, InstalledApp, InstalledAppVersion) {
        let mut tx = repo.begin().await.unwrap();
        let app = tx
            .insert_app(&NewApp {
                app_name: "nginx".to_string(),
                team_id: 1,
                user_id: 1,
            })
            .await
            .unwrap();
        let installed = tx
            .insert_installed_app(&NewInstalledApp {
                app_id: app.id,
                environment_id: env.id,
                status: DeploymentStatus::DeployInit,
                user_id: 1,
            })
            .await
            .unwrap();
        let installed_version = tx
            .insert_installed_app_version(&NewInstalledAppVersion {
                installed_app_id: installed.id,
                app_store_application_version_id: version.id,
                values_yaml_raw: "replicaCount: 3\n".to_string(),
                reference_value_id: version.id,
                reference_value_kind: ReferenceValueKind::Default,
                user_id: 1,
            })
            .await
            .unwrap();
        tx.commit().await.unwrap();
        (app, installed, installed_version)
    }

    #[tokio::test]
    async fn test_commit_makes_writes_visible() {
        let (repo, env, version) = seeded();
        let (_, installed, installed_version) = install(&repo, &env, &version).await;

        let detail = repo
            .get_installed_app_version(installed_version.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(detail.installed_app_id, installed.id);
        assert_eq!(detail.app_name, "nginx");
        assert_eq!(detail.environment_name, "prod");
        assert_eq!(detail.app_store_name, "nginx-ingress");
        assert_eq!(detail.chart_repo_url, "https://charts.bitnami.com/bitnami");
        assert_eq!(detail.status, DeploymentStatus::DeployInit);
    }

    #[tokio::test]
    async fn test_dropped_transaction_discards_writes() {
        let (repo, env, _) = seeded();
        {
            let mut tx = repo.begin().await.unwrap();
            let app = tx
                .insert_app(&NewApp {
                    app_name: "ghost".to_string(),
                    team_id: 1,
                    user_id: 1,
                })
                .await
                .unwrap();
            tx.insert_installed_app(&NewInstalledApp {
                app_id: app.id,
                environment_id: env.id,
                status: DeploymentStatus::DeployInit,
                user_id: 1,
            })
            .await
            .unwrap();
        }
        assert_eq!(repo.installed_app_count(), 0);
        assert!(repo.find_active_app_by_name("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_active_version_is_rejected() {
        let (repo, env, version) = seeded();
        let (_, installed, _) = install(&repo, &env, &version).await;

        let mut tx = repo.begin().await.unwrap();
        let err = tx
            .insert_installed_app_version(&NewInstalledAppVersion {
                installed_app_id: installed.id,
                app_store_application_version_id: version.id,
                values_yaml_raw: String::new(),
                reference_value_id: 0,
                reference_value_kind: ReferenceValueKind::Default,
                user_id: 1,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Conflict(_)));

        assert_eq!(tx.deactivate_installed_app_versions(installed.id, 1).await.unwrap(), 1);
        tx.insert_installed_app_version(&NewInstalledAppVersion {
            installed_app_id: installed.id,
            app_store_application_version_id: version.id,
            values_yaml_raw: "a: 1\n".to_string(),
            reference_value_id: 0,
            reference_value_kind: ReferenceValueKind::Default,
            user_id: 1,
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let versions = repo.list_installed_app_versions(installed.id).await.unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions.iter().filter(|v| v.active).count(), 1);
    }

    #[tokio::test]
    async fn test_writes_in_one_transaction_share_a_timestamp() {
        let (repo, env, version) = seeded();
        let (_, installed, _) = install(&repo, &env, &version).await;

        let mut tx = repo.begin().await.unwrap();
        tx.deactivate_installed_app_versions(installed.id, 1).await.unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let replacement = tx
            .insert_installed_app_version(&NewInstalledAppVersion {
                installed_app_id: installed.id,
                app_store_application_version_id: version.id,
                values_yaml_raw: "a: 1\n".to_string(),
                reference_value_id: 0,
                reference_value_kind: ReferenceValueKind::Default,
                user_id: 1,
            })
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let versions = repo.list_installed_app_versions(installed.id).await.unwrap();
        let previous = versions.iter().find(|v| !v.active).unwrap();
        assert_eq!(previous.updated_on, replacement.created_on);
        assert!(previous.updated_on >= replacement.created_on);
    }

    #[tokio::test]
    async fn test_conditional_status_update() {
        let (repo, env, version) = seeded();
        let (_, installed, _) = install(&repo, &env, &version).await;

        let mut tx = repo.begin().await.unwrap();
        let applied = tx
            .update_installed_app_status_if(
                installed.id,
                DeploymentStatus::Enqueued,
                &DeploymentStatus::ENQUEUEABLE,
                1,
            )
            .await
            .unwrap();
        assert!(applied);
        tx.commit().await.unwrap();

        repo.force_status(installed.id, DeploymentStatus::DeploySuccess);
        let mut tx = repo.begin().await.unwrap();
        let applied = tx
            .update_installed_app_status_if(
                installed.id,
                DeploymentStatus::QueError,
                &DeploymentStatus::ENQUEUEABLE,
                1,
            )
            .await
            .unwrap();
        assert!(!applied);
        tx.commit().await.unwrap();

        let row = repo.get_installed_app_row(installed.id).await.unwrap().unwrap();
        assert_eq!(row.status, DeploymentStatus::DeploySuccess);
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let (repo, env, version) = seeded();
        let (_, installed, _) = install(&repo, &env, &version).await;

        repo.fail_status_updates(1);
        let mut tx = repo.begin().await.unwrap();
        assert!(
            tx.update_installed_app_status_if(installed.id, DeploymentStatus::Enqueued, &DeploymentStatus::ENQUEUEABLE, 1)
                .await
                .is_err()
        );
        assert!(
            tx.update_installed_app_status_if(installed.id, DeploymentStatus::Enqueued, &DeploymentStatus::ENQUEUEABLE, 1)
                .await
                .unwrap()
        );

        repo.fail_commits(1);
        assert!(tx.commit().await.is_err());
        let row = repo.get_installed_app_row(installed.id).await.unwrap().unwrap();
        assert_eq!(row.status, DeploymentStatus::DeployInit);
    }

    #[tokio::test]
    async fn test_values_lookup_by_kind() {
        let (repo, env, version) = seeded();
        let template = repo.add_values_template("fromTemplate: true\n");
        let (_, _, installed_version) = install(&repo, &env, &version).await;

        let default = repo
            .find_values_by_id_and_kind(version.id, ReferenceValueKind::Default)
            .await
            .unwrap();
        assert_eq!(default.as_deref(), Some("replicaCount: 1\n"));

        let templated = repo
            .find_values_by_id_and_kind(template, ReferenceValueKind::Template)
            .await
            .unwrap();
        assert_eq!(templated.as_deref(), Some("fromTemplate: true\n"));

        let deployed = repo
            .find_values_by_id_and_kind(installed_version.id, ReferenceValueKind::Deployed)
            .await
            .unwrap();
        assert_eq!(deployed.as_deref(), Some("replicaCount: 3\n"));
    }

    #[tokio::test]
    async fn test_helm_app_listing_filters_and_pages() {
        let (repo, env, version) = seeded();
        install(&repo, &env, &version).await;

        let all = repo.list_helm_apps(&AppStoreFilter::default()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].cluster_name, "default_cluster");
        assert_eq!(all[0].chart_repo_name, "bitnami");

        let filter = AppStoreFilter {
            app_store_name: Some("redis".to_string()),
            ..Default::default()
        };
        assert!(repo.list_helm_apps(&filter).await.unwrap().is_empty());

        let filter = AppStoreFilter {
            offset: 1,
            size: 10,
            ..Default::default()
        };
        assert!(repo.list_helm_apps(&filter).await.unwrap().is_empty());
    }
}
