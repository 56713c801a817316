// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Row types read and written by the repository.
//!
//! Plain rows mirror one table. `*Detail` and `*Row` types are join views
//! used by the orchestrator's read paths.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::{DeploymentStatus, ReferenceValueKind};

// ============================================================================
// Catalog rows
// ============================================================================

/// Application row. App-store installs own one app each.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct App {
    /// Primary key.
    pub id: i32,
    /// Unique (among active rows) application name.
    pub app_name: String,
    /// Owning team.
    pub team_id: i32,
    /// Whether the app was created through the app store.
    pub app_store: bool,
    /// Soft-delete flag.
    pub active: bool,
    /// When the row was created.
    pub created_on: DateTime<Utc>,
    /// User that created the row.
    pub created_by: i32,
    /// When the row was last updated.
    pub updated_on: DateTime<Utc>,
    /// User that last updated the row.
    pub updated_by: i32,
}

/// Insert payload for [`App`].
#[derive(Debug, Clone)]
pub struct NewApp {
    /// Application name.
    pub app_name: String,
    /// Owning team.
    pub team_id: i32,
    /// Acting user.
    pub user_id: i32,
}

/// Team row.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Team {
    /// Primary key.
    pub id: i32,
    /// Team name.
    pub name: String,
    /// Soft-delete flag.
    pub active: bool,
}

/// Cluster row.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Cluster {
    /// Primary key.
    pub id: i32,
    /// Cluster name.
    pub cluster_name: String,
    /// Kubernetes API server URL used as ArgoCD destination.
    pub server_url: String,
    /// Soft-delete flag.
    pub active: bool,
}

/// Environment joined with its cluster.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Environment {
    /// Primary key.
    pub id: i32,
    /// Environment name.
    pub environment_name: String,
    /// Cluster the environment lives on.
    pub cluster_id: i32,
    /// Name of that cluster.
    pub cluster_name: String,
    /// API server URL of that cluster.
    pub cluster_server_url: String,
    /// Target namespace. Empty means `default`.
    pub namespace: String,
    /// Soft-delete flag.
    pub active: bool,
}

/// Insert payload for an environment.
#[derive(Debug, Clone)]
pub struct NewEnvironment {
    /// Environment name.
    pub environment_name: String,
    /// Cluster id.
    pub cluster_id: i32,
    /// Target namespace.
    pub namespace: String,
    /// Acting user.
    pub user_id: i32,
}

/// App store version joined with its app store and chart repo.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct AppStoreVersion {
    /// Primary key of `app_store_application_version`.
    pub id: i32,
    /// Chart version string.
    pub version: String,
    /// Default chart values.
    pub values_yaml: String,
    /// Chart readme.
    pub readme: String,
    /// Whether this version is deprecated.
    pub deprecated: bool,
    /// Parent app store.
    pub app_store_id: i32,
    /// Name of the app store, also the chart name.
    pub app_store_name: String,
    /// Chart repository id.
    pub chart_repo_id: i32,
    /// Chart repository name.
    pub chart_repo_name: String,
    /// Chart repository URL.
    pub chart_repo_url: String,
}

/// Active GitOps provider settings.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct GitOpsConfig {
    /// Primary key.
    pub id: i32,
    /// Provider name (`GITHUB`, `GITLAB`, `BITBUCKET_CLOUD`, `AZURE_DEVOPS`).
    pub provider: String,
    /// Provider host.
    pub host: String,
    /// Bitbucket workspace, empty for other providers.
    pub bitbucket_workspace_id: String,
    /// Whether this config is in use.
    pub active: bool,
}

// ============================================================================
// Installed app rows
// ============================================================================

/// One binding of an app to an environment.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct InstalledApp {
    /// Primary key.
    pub id: i32,
    /// Installed application.
    pub app_id: i32,
    /// Target environment.
    pub environment_id: i32,
    /// Deployment status.
    pub status: DeploymentStatus,
    /// Soft-delete flag.
    pub active: bool,
    /// When the row was created.
    pub created_on: DateTime<Utc>,
    /// User that created the row.
    pub created_by: i32,
    /// When the row was last updated.
    pub updated_on: DateTime<Utc>,
    /// User that last updated the row.
    pub updated_by: i32,
}

/// Insert payload for [`InstalledApp`].
#[derive(Debug, Clone)]
pub struct NewInstalledApp {
    /// Installed application.
    pub app_id: i32,
    /// Target environment.
    pub environment_id: i32,
    /// Initial status.
    pub status: DeploymentStatus,
    /// Acting user.
    pub user_id: i32,
}

/// One values revision of an installed app.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct InstalledAppVersion {
    /// Primary key.
    pub id: i32,
    /// Parent installed app.
    pub installed_app_id: i32,
    /// Deployed chart version.
    pub app_store_application_version_id: i32,
    /// Values override as supplied by the user.
    pub values_yaml_raw: String,
    /// Id of the values source.
    pub reference_value_id: i32,
    /// Kind of the values source.
    pub reference_value_kind: ReferenceValueKind,
    /// At most one active row per installed app.
    pub active: bool,
    /// When the row was created.
    pub created_on: DateTime<Utc>,
    /// User that created the row.
    pub created_by: i32,
    /// When the row was last updated.
    pub updated_on: DateTime<Utc>,
    /// User that last updated the row.
    pub updated_by: i32,
}

/// Insert payload for [`InstalledAppVersion`].
#[derive(Debug, Clone)]
pub struct NewInstalledAppVersion {
    /// Parent installed app.
    pub installed_app_id: i32,
    /// Deployed chart version.
    pub app_store_application_version_id: i32,
    /// Values override.
    pub values_yaml_raw: String,
    /// Id of the values source.
    pub reference_value_id: i32,
    /// Kind of the values source.
    pub reference_value_kind: ReferenceValueKind,
    /// Acting user.
    pub user_id: i32,
}

/// Membership of an installed app in a bulk deploy.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ChartGroupDeployment {
    /// Primary key.
    pub id: i32,
    /// Chart group.
    pub chart_group_id: i32,
    /// Entry of the chart group.
    pub chart_group_entry_id: i32,
    /// Installed app created by the bulk deploy.
    pub installed_app_id: i32,
    /// Deterministic id shared by all members of one bulk deploy.
    pub group_installation_id: String,
    /// Set when the installed app is deleted.
    pub deleted: bool,
    /// When the row was created.
    pub created_on: DateTime<Utc>,
    /// User that created the row.
    pub created_by: i32,
}

/// Insert payload for [`ChartGroupDeployment`].
#[derive(Debug, Clone)]
pub struct NewChartGroupDeployment {
    /// Chart group.
    pub chart_group_id: i32,
    /// Entry of the chart group.
    pub chart_group_entry_id: i32,
    /// Installed app.
    pub installed_app_id: i32,
    /// Group installation id.
    pub group_installation_id: String,
    /// Acting user.
    pub user_id: i32,
}

/// Default component installed on a cluster.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ClusterInstalledApp {
    /// Primary key.
    pub id: i32,
    /// Cluster.
    pub cluster_id: i32,
    /// Installed app.
    pub installed_app_id: i32,
    /// When the row was created.
    pub created_on: DateTime<Utc>,
    /// User that created the row.
    pub created_by: i32,
}

/// Audit trail entry written with every status change.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct InstalledAppHistory {
    /// Primary key.
    pub id: i32,
    /// Version the status applies to.
    pub installed_app_version_id: i32,
    /// Status written.
    pub status: DeploymentStatus,
    /// Values at the time of the write.
    pub values_yaml_raw: String,
    /// When the row was created.
    pub created_on: DateTime<Utc>,
    /// Acting user.
    pub created_by: i32,
}

// ============================================================================
// Join views
// ============================================================================

/// Installed app joined with app and environment.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct InstalledAppDetail {
    /// Installed app id.
    pub id: i32,
    /// Application id.
    pub app_id: i32,
    /// Application name.
    pub app_name: String,
    /// Owning team.
    pub team_id: i32,
    /// Environment id.
    pub environment_id: i32,
    /// Environment name.
    pub environment_name: String,
    /// Target namespace.
    pub namespace: String,
    /// Cluster id.
    pub cluster_id: i32,
    /// Cluster API server URL.
    pub cluster_server_url: String,
    /// Deployment status.
    pub status: DeploymentStatus,
}

/// Installed app version joined with everything needed to deploy it.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct InstalledAppVersionDetail {
    /// Installed app version id.
    pub id: i32,
    /// Installed app id.
    pub installed_app_id: i32,
    /// Application id.
    pub app_id: i32,
    /// Application name.
    pub app_name: String,
    /// Owning team.
    pub team_id: i32,
    /// Environment id.
    pub environment_id: i32,
    /// Environment name.
    pub environment_name: String,
    /// Target namespace.
    pub namespace: String,
    /// Cluster id.
    pub cluster_id: i32,
    /// Cluster API server URL.
    pub cluster_server_url: String,
    /// Chart version id.
    pub app_store_application_version_id: i32,
    /// Chart version string.
    pub app_store_version: String,
    /// App store id.
    pub app_store_id: i32,
    /// App store name (chart name).
    pub app_store_name: String,
    /// Chart repository id.
    pub chart_repo_id: i32,
    /// Chart repository URL.
    pub chart_repo_url: String,
    /// Chart readme.
    pub readme: String,
    /// Whether the chart version is deprecated.
    pub deprecated: bool,
    /// Values override.
    pub values_yaml_raw: String,
    /// Id of the values source.
    pub reference_value_id: i32,
    /// Kind of the values source.
    pub reference_value_kind: ReferenceValueKind,
    /// Status of the installed app.
    pub status: DeploymentStatus,
}

/// Row of the installed app listing used by environment views.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct InstalledAppListRow {
    /// Installed app id.
    pub installed_app_id: i32,
    /// Active version id.
    pub installed_app_version_id: i32,
    /// Application id.
    pub app_id: i32,
    /// Application name.
    pub app_name: String,
    /// Environment id.
    pub environment_id: i32,
    /// Environment name.
    pub environment_name: String,
    /// Chart version id.
    pub app_store_application_version_id: i32,
    /// App store name.
    pub app_store_name: String,
    /// Chart repository name.
    pub chart_repo_name: String,
    /// Deployment status.
    pub status: DeploymentStatus,
    /// Last update of the version row.
    pub updated_on: DateTime<Utc>,
}

/// Row of the helm app listing.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct HelmAppRow {
    /// Installed app id.
    pub installed_app_id: i32,
    /// Active version id.
    pub installed_app_version_id: i32,
    /// Application id.
    pub app_id: i32,
    /// Application name.
    pub app_name: String,
    /// Owning team.
    pub team_id: i32,
    /// Environment id.
    pub environment_id: i32,
    /// Environment name.
    pub environment_name: String,
    /// Target namespace.
    pub namespace: String,
    /// Cluster id.
    pub cluster_id: i32,
    /// Cluster name.
    pub cluster_name: String,
    /// Chart version id.
    pub app_store_application_version_id: i32,
    /// App store id.
    pub app_store_id: i32,
    /// App store name.
    pub app_store_name: String,
    /// Chart version string.
    pub chart_version: String,
    /// Chart repository name.
    pub chart_repo_name: String,
    /// Whether the chart version is deprecated.
    pub deprecated: bool,
    /// Deployment status.
    pub status: DeploymentStatus,
    /// Last update of the version row.
    pub updated_on: DateTime<Utc>,
}

/// Filter for the helm app listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppStoreFilter {
    /// Only list deprecated chart versions.
    pub only_deprecated: bool,
    /// Restrict to these chart repositories.
    pub chart_repo_ids: Vec<i32>,
    /// Substring of the app store name.
    pub app_store_name: Option<String>,
    /// Substring of the application name.
    pub app_name: Option<String>,
    /// Restrict to these environments.
    pub environment_ids: Vec<i32>,
    /// Restrict to these clusters.
    pub cluster_ids: Vec<i32>,
    /// Rows to skip.
    pub offset: i64,
    /// Page size, 0 for no limit.
    pub size: i64,
}
