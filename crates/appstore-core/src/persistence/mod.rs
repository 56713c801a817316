// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Installed-app repository.
//!
//! Reads go through [`Repository`] on the shared pool. Every write that
//! transitions a status or toggles `active` goes through a [`TxContext`]
//! obtained from [`Repository::begin`] and handed down by the caller; the
//! repository never opens a transaction of its own for a write path.
//!
//! Dropping a [`TxContext`] without calling [`Transaction::commit`] discards
//! all of its writes.

pub mod memory;
pub mod postgres;

pub use self::memory::MemoryRepository;
pub use self::postgres::PostgresRepository;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::*;
use crate::status::{DeploymentStatus, ReferenceValueKind};

/// Open transaction threaded through a deployment flow.
pub type TxContext = Box<dyn Transaction>;

/// Pool-level reads plus the transaction factory.
#[allow(missing_docs)]
#[async_trait]
pub trait Repository: Send + Sync {
    /// Begin a transaction.
    async fn begin(&self) -> Result<TxContext>;

    // ------------------------------------------------------------------
    // Catalog
    // ------------------------------------------------------------------

    async fn get_app_store_version(&self, id: i32) -> Result<Option<AppStoreVersion>>;

    /// Latest non-deprecated version of the app store with this name.
    async fn find_app_store_version_by_store_name(
        &self,
        app_store_name: &str,
    ) -> Result<Option<AppStoreVersion>>;

    async fn get_environment(&self, id: i32) -> Result<Option<Environment>>;

    async fn find_environment_by_name(&self, name: &str) -> Result<Option<Environment>>;

    async fn get_cluster(&self, id: i32) -> Result<Option<Cluster>>;

    async fn find_cluster_by_name(&self, name: &str) -> Result<Option<Cluster>>;

    async fn get_team(&self, id: i32) -> Result<Option<Team>>;

    async fn find_team_by_name(&self, name: &str) -> Result<Option<Team>>;

    async fn find_active_app_by_name(&self, name: &str) -> Result<Option<App>>;

    /// Values yaml referenced by `(id, kind)`: chart defaults for `DEFAULT`,
    /// a saved template for `TEMPLATE`, another installed version for `DEPLOYED`.
    async fn find_values_by_id_and_kind(
        &self,
        id: i32,
        kind: ReferenceValueKind,
    ) -> Result<Option<String>>;

    async fn get_active_gitops_config(&self) -> Result<Option<GitOpsConfig>>;

    // ------------------------------------------------------------------
    // Installed apps
    // ------------------------------------------------------------------

    /// Active installed app joined with app and environment.
    async fn get_installed_app(&self, id: i32) -> Result<Option<InstalledAppDetail>>;

    /// Active installed app version with the full deployment context.
    async fn get_installed_app_version(&self, id: i32) -> Result<Option<InstalledAppVersionDetail>>;

    /// All active installed apps, optionally restricted to environments.
    async fn get_all_installed_apps(&self, env_ids: &[i32]) -> Result<Vec<InstalledAppListRow>>;

    async fn get_installed_app_version_by_installed_app_id_and_env_id(
        &self,
        installed_app_id: i32,
        env_id: i32,
    ) -> Result<Option<InstalledAppVersionDetail>>;

    async fn list_helm_apps(&self, filter: &AppStoreFilter) -> Result<Vec<HelmAppRow>>;

    /// Every version row of an installed app, active or not, oldest first.
    async fn list_installed_app_versions(
        &self,
        installed_app_id: i32,
    ) -> Result<Vec<InstalledAppVersion>>;

    async fn list_chart_group_deployments(
        &self,
        installed_app_id: i32,
    ) -> Result<Vec<ChartGroupDeployment>>;

    async fn list_cluster_installed_apps(&self, cluster_id: i32)
    -> Result<Vec<ClusterInstalledApp>>;

    async fn list_installed_app_history(
        &self,
        installed_app_version_id: i32,
    ) -> Result<Vec<InstalledAppHistory>>;

    /// Raw installed app row regardless of `active`.
    async fn get_installed_app_row(&self, id: i32) -> Result<Option<InstalledApp>>;

    /// Raw app row regardless of `active`.
    async fn get_app(&self, id: i32) -> Result<Option<App>>;
}

/// Write operations inside one database transaction.
#[allow(missing_docs)]
#[async_trait]
pub trait Transaction: Send {
    /// Active apps with this name, oldest first.
    async fn find_active_apps_by_name(&mut self, name: &str) -> Result<Vec<App>>;

    async fn insert_app(&mut self, app: &NewApp) -> Result<App>;

    async fn set_app_active(&mut self, app_id: i32, active: bool, user_id: i32) -> Result<bool>;

    async fn insert_environment(&mut self, env: &NewEnvironment) -> Result<Environment>;

    async fn insert_team(&mut self, name: &str, user_id: i32) -> Result<Team>;

    async fn get_installed_app(&mut self, id: i32) -> Result<Option<InstalledApp>>;

    async fn insert_installed_app(&mut self, new: &NewInstalledApp) -> Result<InstalledApp>;

    /// Persist `status`, `active` and `updated_by` of an installed app.
    async fn update_installed_app(&mut self, app: &InstalledApp) -> Result<()>;

    /// Set the status only if the current one is in `allowed`.
    ///
    /// Returns `false` when the row was not in an allowed status.
    async fn update_installed_app_status_if(
        &mut self,
        id: i32,
        next: DeploymentStatus,
        allowed: &[DeploymentStatus],
        user_id: i32,
    ) -> Result<bool>;

    async fn get_installed_app_version(&mut self, id: i32) -> Result<Option<InstalledAppVersion>>;

    async fn insert_installed_app_version(
        &mut self,
        new: &NewInstalledAppVersion,
    ) -> Result<InstalledAppVersion>;

    /// Persist values, reference, chart version and `active` of a version row.
    async fn update_installed_app_version(&mut self, version: &InstalledAppVersion) -> Result<()>;

    /// Flip every active version of an installed app to inactive.
    async fn deactivate_installed_app_versions(
        &mut self,
        installed_app_id: i32,
        user_id: i32,
    ) -> Result<u64>;

    async fn insert_cluster_installed_app(
        &mut self,
        cluster_id: i32,
        installed_app_id: i32,
        user_id: i32,
    ) -> Result<ClusterInstalledApp>;

    async fn insert_chart_group_deployment(
        &mut self,
        new: &NewChartGroupDeployment,
    ) -> Result<ChartGroupDeployment>;

    async fn mark_chart_group_deployments_deleted(
        &mut self,
        installed_app_id: i32,
        user_id: i32,
    ) -> Result<u64>;

    async fn insert_installed_app_history(
        &mut self,
        installed_app_version_id: i32,
        status: DeploymentStatus,
        values_yaml_raw: &str,
        user_id: i32,
    ) -> Result<()>;

    /// Make every write of this transaction visible.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard every write of this transaction.
    async fn rollback(self: Box<Self>) -> Result<()>;
}
