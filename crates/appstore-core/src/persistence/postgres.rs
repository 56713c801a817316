// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL repository.
//!
//! Every query is a free function generic over the executor so the same SQL
//! runs against the pool (reads) and against an open transaction (writes).

use async_trait::async_trait;
use sqlx::{PgExecutor, PgPool, Postgres, QueryBuilder};

use super::{Repository, Transaction, TxContext};
use crate::error::{PersistenceError, Result};
use crate::models::*;
use crate::status::{DeploymentStatus, ReferenceValueKind};

/// PostgreSQL-backed repository.
#[derive(Clone)]
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Create a repository on a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Transaction handle of [`PostgresRepository`].
pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

// ============================================================================
// Shared SELECT lists
// ============================================================================

const ENVIRONMENT_SELECT: &str = r#"
    SELECT e.id, e.environment_name, e.cluster_id, c.cluster_name,
           c.server_url AS cluster_server_url, e.namespace, e.active
    FROM environment e
    INNER JOIN cluster c ON c.id = e.cluster_id
"#;

const APP_STORE_VERSION_SELECT: &str = r#"
    SELECT asv.id, asv.version, asv.values_yaml, asv.readme, asv.deprecated,
           asv.app_store_id, aps.name AS app_store_name, aps.chart_repo_id,
           cr.name AS chart_repo_name, cr.url AS chart_repo_url
    FROM app_store_application_version asv
    INNER JOIN app_store aps ON aps.id = asv.app_store_id
    INNER JOIN chart_repo cr ON cr.id = aps.chart_repo_id
"#;

const INSTALLED_APP_VERSION_DETAIL_SELECT: &str = r#"
    SELECT iav.id, iav.installed_app_id, ia.app_id, a.app_name, a.team_id,
           ia.environment_id, e.environment_name, e.namespace, e.cluster_id,
           c.server_url AS cluster_server_url,
           iav.app_store_application_version_id, asv.version AS app_store_version,
           asv.app_store_id, aps.name AS app_store_name, aps.chart_repo_id,
           cr.url AS chart_repo_url, asv.readme, asv.deprecated,
           iav.values_yaml_raw, iav.reference_value_id, iav.reference_value_kind,
           ia.status
    FROM installed_app_versions iav
    INNER JOIN installed_apps ia ON ia.id = iav.installed_app_id
    INNER JOIN app a ON a.id = ia.app_id
    INNER JOIN environment e ON e.id = ia.environment_id
    INNER JOIN cluster c ON c.id = e.cluster_id
    INNER JOIN app_store_application_version asv ON asv.id = iav.app_store_application_version_id
    INNER JOIN app_store aps ON aps.id = asv.app_store_id
    INNER JOIN chart_repo cr ON cr.id = aps.chart_repo_id
"#;

const APP_COLUMNS: &str =
    "id, app_name, team_id, app_store, active, created_on, created_by, updated_on, updated_by";

const INSTALLED_APP_COLUMNS: &str =
    "id, app_id, environment_id, status, active, created_on, created_by, updated_on, updated_by";

const INSTALLED_APP_VERSION_COLUMNS: &str = "id, installed_app_id, app_store_application_version_id, values_yaml_raw, \
     reference_value_id, reference_value_kind, active, created_on, created_by, updated_on, updated_by";

// ============================================================================
// Catalog
// ============================================================================

/// Get an app store version with its store and chart repo.
pub async fn get_app_store_version<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i32,
) -> Result<Option<AppStoreVersion>> {
    let sql = format!("{APP_STORE_VERSION_SELECT} WHERE asv.id = $1");
    let record = sqlx::query_as::<_, AppStoreVersion>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await?;
    Ok(record)
}

/// Latest version of an active app store found by name.
pub async fn find_app_store_version_by_store_name<'e, E: PgExecutor<'e>>(
    executor: E,
    app_store_name: &str,
) -> Result<Option<AppStoreVersion>> {
    let sql = format!(
        "{APP_STORE_VERSION_SELECT} WHERE aps.name = $1 AND aps.active = true \
         ORDER BY asv.latest DESC, asv.created_on DESC, asv.id DESC LIMIT 1"
    );
    let record = sqlx::query_as::<_, AppStoreVersion>(&sql)
        .bind(app_store_name)
        .fetch_optional(executor)
        .await?;
    Ok(record)
}

/// Get an environment with its cluster.
pub async fn get_environment<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i32,
) -> Result<Option<Environment>> {
    let sql = format!("{ENVIRONMENT_SELECT} WHERE e.id = $1 AND e.active = true");
    let record = sqlx::query_as::<_, Environment>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await?;
    Ok(record)
}

/// Find an active environment by name.
pub async fn find_environment_by_name<'e, E: PgExecutor<'e>>(
    executor: E,
    name: &str,
) -> Result<Option<Environment>> {
    let sql = format!("{ENVIRONMENT_SELECT} WHERE e.environment_name = $1 AND e.active = true");
    let record = sqlx::query_as::<_, Environment>(&sql)
        .bind(name)
        .fetch_optional(executor)
        .await?;
    Ok(record)
}

/// Get a cluster by id.
pub async fn get_cluster<'e, E: PgExecutor<'e>>(executor: E, id: i32) -> Result<Option<Cluster>> {
    let record = sqlx::query_as::<_, Cluster>(
        r#"
        SELECT id, cluster_name, server_url, active
        FROM cluster
        WHERE id = $1 AND active = true
        "#,
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;
    Ok(record)
}

/// Find an active cluster by name.
pub async fn find_cluster_by_name<'e, E: PgExecutor<'e>>(
    executor: E,
    name: &str,
) -> Result<Option<Cluster>> {
    let record = sqlx::query_as::<_, Cluster>(
        r#"
        SELECT id, cluster_name, server_url, active
        FROM cluster
        WHERE cluster_name = $1 AND active = true
        "#,
    )
    .bind(name)
    .fetch_optional(executor)
    .await?;
    Ok(record)
}

/// Get a team by id.
pub async fn get_team<'e, E: PgExecutor<'e>>(executor: E, id: i32) -> Result<Option<Team>> {
    let record = sqlx::query_as::<_, Team>(
        "SELECT id, name, active FROM team WHERE id = $1 AND active = true",
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;
    Ok(record)
}

/// Find an active team by name.
pub async fn find_team_by_name<'e, E: PgExecutor<'e>>(
    executor: E,
    name: &str,
) -> Result<Option<Team>> {
    let record = sqlx::query_as::<_, Team>(
        "SELECT id, name, active FROM team WHERE name = $1 AND active = true",
    )
    .bind(name)
    .fetch_optional(executor)
    .await?;
    Ok(record)
}

/// Insert a team.
pub async fn insert_team<'e, E: PgExecutor<'e>>(
    executor: E,
    name: &str,
    user_id: i32,
) -> Result<Team> {
    let record = sqlx::query_as::<_, Team>(
        r#"
        INSERT INTO team (name, active, created_on, created_by, updated_on, updated_by)
        VALUES ($1, true, NOW(), $2, NOW(), $2)
        RETURNING id, name, active
        "#,
    )
    .bind(name)
    .bind(user_id)
    .fetch_one(executor)
    .await?;
    Ok(record)
}

/// Insert an environment row and return its id.
pub async fn insert_environment_row<'e, E: PgExecutor<'e>>(
    executor: E,
    env: &NewEnvironment,
) -> Result<i32> {
    let (id,): (i32,) = sqlx::query_as(
        r#"
        INSERT INTO environment (environment_name, cluster_id, namespace, active,
                                 created_on, created_by, updated_on, updated_by)
        VALUES ($1, $2, $3, true, NOW(), $4, NOW(), $4)
        RETURNING id
        "#,
    )
    .bind(&env.environment_name)
    .bind(env.cluster_id)
    .bind(&env.namespace)
    .bind(env.user_id)
    .fetch_one(executor)
    .await?;
    Ok(id)
}

/// Active apps with a name, oldest first.
pub async fn find_active_apps_by_name<'e, E: PgExecutor<'e>>(
    executor: E,
    name: &str,
) -> Result<Vec<App>> {
    let sql = format!(
        "SELECT {APP_COLUMNS} FROM app WHERE app_name = $1 AND active = true ORDER BY id ASC"
    );
    let records = sqlx::query_as::<_, App>(&sql)
        .bind(name)
        .fetch_all(executor)
        .await?;
    Ok(records)
}

/// Get an app row regardless of `active`.
pub async fn get_app<'e, E: PgExecutor<'e>>(executor: E, id: i32) -> Result<Option<App>> {
    let sql = format!("SELECT {APP_COLUMNS} FROM app WHERE id = $1");
    let record = sqlx::query_as::<_, App>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await?;
    Ok(record)
}

/// Insert an app-store app.
pub async fn insert_app<'e, E: PgExecutor<'e>>(executor: E, app: &NewApp) -> Result<App> {
    let sql = format!(
        "INSERT INTO app (app_name, team_id, app_store, active, created_on, created_by, updated_on, updated_by) \
         VALUES ($1, $2, true, true, NOW(), $3, NOW(), $3) RETURNING {APP_COLUMNS}"
    );
    let record = sqlx::query_as::<_, App>(&sql)
        .bind(&app.app_name)
        .bind(app.team_id)
        .bind(app.user_id)
        .fetch_one(executor)
        .await?;
    Ok(record)
}

/// Toggle `app.active`.
pub async fn set_app_active<'e, E: PgExecutor<'e>>(
    executor: E,
    app_id: i32,
    active: bool,
    user_id: i32,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE app
        SET active = $2, updated_on = NOW(), updated_by = $3
        WHERE id = $1
        "#,
    )
    .bind(app_id)
    .bind(active)
    .bind(user_id)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Resolve a values reference.
pub async fn find_values_by_id_and_kind<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i32,
    kind: ReferenceValueKind,
) -> Result<Option<String>> {
    let sql = match kind {
        ReferenceValueKind::Default => {
            "SELECT values_yaml FROM app_store_application_version WHERE id = $1"
        }
        ReferenceValueKind::Template => {
            "SELECT values_yaml FROM app_store_version_values WHERE id = $1 AND deleted = false"
        }
        ReferenceValueKind::Deployed => {
            "SELECT values_yaml_raw FROM installed_app_versions WHERE id = $1"
        }
        ReferenceValueKind::Existing => return Ok(None),
    };
    let record: Option<(String,)> = sqlx::query_as(sql)
        .bind(id)
        .fetch_optional(executor)
        .await?;
    Ok(record.map(|(values,)| values))
}

/// The active GitOps config, if any.
pub async fn get_active_gitops_config<'e, E: PgExecutor<'e>>(
    executor: E,
) -> Result<Option<GitOpsConfig>> {
    let record = sqlx::query_as::<_, GitOpsConfig>(
        r#"
        SELECT id, provider, host, bitbucket_workspace_id, active
        FROM gitops_config
        WHERE active = true
        ORDER BY id DESC
        LIMIT 1
        "#,
    )
    .fetch_optional(executor)
    .await?;
    Ok(record)
}

// ============================================================================
// Installed apps
// ============================================================================

/// Active installed app joined with app and environment.
pub async fn get_installed_app_detail<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i32,
) -> Result<Option<InstalledAppDetail>> {
    let record = sqlx::query_as::<_, InstalledAppDetail>(
        r#"
        SELECT ia.id, ia.app_id, a.app_name, a.team_id, ia.environment_id,
               e.environment_name, e.namespace, e.cluster_id,
               c.server_url AS cluster_server_url, ia.status
        FROM installed_apps ia
        INNER JOIN app a ON a.id = ia.app_id
        INNER JOIN environment e ON e.id = ia.environment_id
        INNER JOIN cluster c ON c.id = e.cluster_id
        WHERE ia.id = $1 AND ia.active = true
        "#,
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;
    Ok(record)
}

/// Raw installed app row.
pub async fn get_installed_app<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i32,
) -> Result<Option<InstalledApp>> {
    let sql = format!("SELECT {INSTALLED_APP_COLUMNS} FROM installed_apps WHERE id = $1");
    let record = sqlx::query_as::<_, InstalledApp>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await?;
    Ok(record)
}

/// Insert an installed app.
pub async fn insert_installed_app<'e, E: PgExecutor<'e>>(
    executor: E,
    new: &NewInstalledApp,
) -> Result<InstalledApp> {
    let sql = format!(
        "INSERT INTO installed_apps (app_id, environment_id, status, active, created_on, created_by, updated_on, updated_by) \
         VALUES ($1, $2, $3, true, NOW(), $4, NOW(), $4) RETURNING {INSTALLED_APP_COLUMNS}"
    );
    let record = sqlx::query_as::<_, InstalledApp>(&sql)
        .bind(new.app_id)
        .bind(new.environment_id)
        .bind(new.status)
        .bind(new.user_id)
        .fetch_one(executor)
        .await?;
    Ok(record)
}

/// Persist status and `active` of an installed app.
pub async fn update_installed_app<'e, E: PgExecutor<'e>>(
    executor: E,
    app: &InstalledApp,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE installed_apps
        SET status = $2, active = $3, updated_on = NOW(), updated_by = $4
        WHERE id = $1
        "#,
    )
    .bind(app.id)
    .bind(app.status)
    .bind(app.active)
    .bind(app.updated_by)
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Err(PersistenceError::not_found("installed_app", app.id));
    }
    Ok(())
}

/// Conditional status update; `false` when the current status is not allowed.
pub async fn update_installed_app_status_if<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i32,
    next: DeploymentStatus,
    allowed: &[DeploymentStatus],
    user_id: i32,
) -> Result<bool> {
    let allowed: Vec<i32> = allowed.iter().map(|s| s.code()).collect();
    let result = sqlx::query(
        r#"
        UPDATE installed_apps
        SET status = $2, updated_on = NOW(), updated_by = $4
        WHERE id = $1 AND status = ANY($3)
        "#,
    )
    .bind(id)
    .bind(next)
    .bind(&allowed)
    .bind(user_id)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Raw installed app version row.
pub async fn get_installed_app_version<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i32,
) -> Result<Option<InstalledAppVersion>> {
    let sql =
        format!("SELECT {INSTALLED_APP_VERSION_COLUMNS} FROM installed_app_versions WHERE id = $1");
    let record = sqlx::query_as::<_, InstalledAppVersion>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await?;
    Ok(record)
}

/// Insert an active installed app version.
pub async fn insert_installed_app_version<'e, E: PgExecutor<'e>>(
    executor: E,
    new: &NewInstalledAppVersion,
) -> Result<InstalledAppVersion> {
    let sql = format!(
        "INSERT INTO installed_app_versions (installed_app_id, app_store_application_version_id, values_yaml_raw, \
         reference_value_id, reference_value_kind, active, created_on, created_by, updated_on, updated_by) \
         VALUES ($1, $2, $3, $4, $5, true, NOW(), $6, NOW(), $6) RETURNING {INSTALLED_APP_VERSION_COLUMNS}"
    );
    let record = sqlx::query_as::<_, InstalledAppVersion>(&sql)
        .bind(new.installed_app_id)
        .bind(new.app_store_application_version_id)
        .bind(&new.values_yaml_raw)
        .bind(new.reference_value_id)
        .bind(new.reference_value_kind)
        .bind(new.user_id)
        .fetch_one(executor)
        .await?;
    Ok(record)
}

/// Persist the mutable columns of a version row.
pub async fn update_installed_app_version<'e, E: PgExecutor<'e>>(
    executor: E,
    version: &InstalledAppVersion,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE installed_app_versions
        SET app_store_application_version_id = $2, values_yaml_raw = $3,
            reference_value_id = $4, reference_value_kind = $5, active = $6,
            updated_on = NOW(), updated_by = $7
        WHERE id = $1
        "#,
    )
    .bind(version.id)
    .bind(version.app_store_application_version_id)
    .bind(&version.values_yaml_raw)
    .bind(version.reference_value_id)
    .bind(version.reference_value_kind)
    .bind(version.active)
    .bind(version.updated_by)
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Err(PersistenceError::not_found(
            "installed_app_version",
            version.id,
        ));
    }
    Ok(())
}

/// Deactivate all active versions of an installed app.
pub async fn deactivate_installed_app_versions<'e, E: PgExecutor<'e>>(
    executor: E,
    installed_app_id: i32,
    user_id: i32,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE installed_app_versions
        SET active = false, updated_on = NOW(), updated_by = $2
        WHERE installed_app_id = $1 AND active = true
        "#,
    )
    .bind(installed_app_id)
    .bind(user_id)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

/// Insert a cluster default component link.
pub async fn insert_cluster_installed_app<'e, E: PgExecutor<'e>>(
    executor: E,
    cluster_id: i32,
    installed_app_id: i32,
    user_id: i32,
) -> Result<ClusterInstalledApp> {
    let record = sqlx::query_as::<_, ClusterInstalledApp>(
        r#"
        INSERT INTO cluster_installed_apps (cluster_id, installed_app_id, created_on, created_by)
        VALUES ($1, $2, NOW(), $3)
        RETURNING id, cluster_id, installed_app_id, created_on, created_by
        "#,
    )
    .bind(cluster_id)
    .bind(installed_app_id)
    .bind(user_id)
    .fetch_one(executor)
    .await?;
    Ok(record)
}

/// Insert a bulk deploy membership row.
pub async fn insert_chart_group_deployment<'e, E: PgExecutor<'e>>(
    executor: E,
    new: &NewChartGroupDeployment,
) -> Result<ChartGroupDeployment> {
    let record = sqlx::query_as::<_, ChartGroupDeployment>(
        r#"
        INSERT INTO chart_group_deployment (chart_group_id, chart_group_entry_id, installed_app_id,
                                            group_installation_id, deleted,
                                            created_on, created_by, updated_on, updated_by)
        VALUES ($1, $2, $3, $4, false, NOW(), $5, NOW(), $5)
        RETURNING id, chart_group_id, chart_group_entry_id, installed_app_id,
                  group_installation_id, deleted, created_on, created_by
        "#,
    )
    .bind(new.chart_group_id)
    .bind(new.chart_group_entry_id)
    .bind(new.installed_app_id)
    .bind(&new.group_installation_id)
    .bind(new.user_id)
    .fetch_one(executor)
    .await?;
    Ok(record)
}

/// Mark every bulk deploy membership of an installed app as deleted.
pub async fn mark_chart_group_deployments_deleted<'e, E: PgExecutor<'e>>(
    executor: E,
    installed_app_id: i32,
    user_id: i32,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE chart_group_deployment
        SET deleted = true, updated_on = NOW(), updated_by = $2
        WHERE installed_app_id = $1 AND deleted = false
        "#,
    )
    .bind(installed_app_id)
    .bind(user_id)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

/// Append a status history row.
pub async fn insert_installed_app_history<'e, E: PgExecutor<'e>>(
    executor: E,
    installed_app_version_id: i32,
    status: DeploymentStatus,
    values_yaml_raw: &str,
    user_id: i32,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO installed_app_history (installed_app_version_id, status, values_yaml_raw,
                                           created_on, created_by)
        VALUES ($1, $2, $3, NOW(), $4)
        "#,
    )
    .bind(installed_app_version_id)
    .bind(status)
    .bind(values_yaml_raw)
    .bind(user_id)
    .execute(executor)
    .await?;
    Ok(())
}

/// Active installed app version with its full deployment context.
pub async fn get_installed_app_version_detail<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i32,
) -> Result<Option<InstalledAppVersionDetail>> {
    let sql = format!(
        "{INSTALLED_APP_VERSION_DETAIL_SELECT} WHERE iav.id = $1 AND iav.active = true AND ia.active = true"
    );
    let record = sqlx::query_as::<_, InstalledAppVersionDetail>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await?;
    Ok(record)
}

/// Active version of an installed app in an environment.
pub async fn get_installed_app_version_by_installed_app_id_and_env_id<'e, E: PgExecutor<'e>>(
    executor: E,
    installed_app_id: i32,
    env_id: i32,
) -> Result<Option<InstalledAppVersionDetail>> {
    let sql = format!(
        "{INSTALLED_APP_VERSION_DETAIL_SELECT} \
         WHERE ia.id = $1 AND ia.environment_id = $2 AND iav.active = true AND ia.active = true"
    );
    let record = sqlx::query_as::<_, InstalledAppVersionDetail>(&sql)
        .bind(installed_app_id)
        .bind(env_id)
        .fetch_optional(executor)
        .await?;
    Ok(record)
}

/// All active installed apps, restricted to `env_ids` when non-empty.
pub async fn get_all_installed_apps<'e, E: PgExecutor<'e>>(
    executor: E,
    env_ids: &[i32],
) -> Result<Vec<InstalledAppListRow>> {
    let mut qb = QueryBuilder::<Postgres>::new(
        r#"
        SELECT ia.id AS installed_app_id, iav.id AS installed_app_version_id, a.id AS app_id,
               a.app_name, e.id AS environment_id, e.environment_name,
               asv.id AS app_store_application_version_id, aps.name AS app_store_name,
               cr.name AS chart_repo_name, ia.status, iav.updated_on
        FROM installed_app_versions iav
        INNER JOIN installed_apps ia ON iav.installed_app_id = ia.id
        INNER JOIN app a ON a.id = ia.app_id
        INNER JOIN environment e ON ia.environment_id = e.id
        INNER JOIN app_store_application_version asv ON iav.app_store_application_version_id = asv.id
        INNER JOIN app_store aps ON aps.id = asv.app_store_id
        INNER JOIN chart_repo cr ON aps.chart_repo_id = cr.id
        WHERE ia.active = true AND iav.active = true AND a.active = true
          AND e.active = true AND aps.active = true AND cr.active = true
        "#,
    );
    if !env_ids.is_empty() {
        qb.push(" AND ia.environment_id = ANY(")
            .push_bind(env_ids.to_vec())
            .push(")");
    }
    qb.push(" ORDER BY ia.id ASC");

    let records = qb
        .build_query_as::<InstalledAppListRow>()
        .fetch_all(executor)
        .await?;
    Ok(records)
}

/// Filtered helm app listing ordered by app store name.
pub async fn list_helm_apps<'e, E: PgExecutor<'e>>(
    executor: E,
    filter: &AppStoreFilter,
) -> Result<Vec<HelmAppRow>> {
    let mut qb = QueryBuilder::<Postgres>::new(
        r#"
        SELECT ia.id AS installed_app_id, iav.id AS installed_app_version_id, a.id AS app_id,
               a.app_name, a.team_id, e.id AS environment_id, e.environment_name, e.namespace,
               c.id AS cluster_id, c.cluster_name,
               asv.id AS app_store_application_version_id, aps.id AS app_store_id,
               aps.name AS app_store_name, asv.version AS chart_version,
               cr.name AS chart_repo_name, asv.deprecated, ia.status, iav.updated_on
        FROM installed_app_versions iav
        INNER JOIN installed_apps ia ON iav.installed_app_id = ia.id
        INNER JOIN app a ON a.id = ia.app_id
        INNER JOIN environment e ON ia.environment_id = e.id
        INNER JOIN cluster c ON c.id = e.cluster_id
        INNER JOIN app_store_application_version asv ON iav.app_store_application_version_id = asv.id
        INNER JOIN app_store aps ON aps.id = asv.app_store_id
        INNER JOIN chart_repo cr ON aps.chart_repo_id = cr.id
        WHERE ia.active = true AND iav.active = true AND a.team_id <> 0
        "#,
    );
    if filter.only_deprecated {
        qb.push(" AND asv.deprecated = true");
    }
    if let Some(name) = filter.app_store_name.as_deref().filter(|n| !n.is_empty()) {
        qb.push(" AND aps.name LIKE ").push_bind(format!("%{name}%"));
    }
    if let Some(name) = filter.app_name.as_deref().filter(|n| !n.is_empty()) {
        qb.push(" AND a.app_name LIKE ").push_bind(format!("%{name}%"));
    }
    if !filter.chart_repo_ids.is_empty() {
        qb.push(" AND cr.id = ANY(")
            .push_bind(filter.chart_repo_ids.clone())
            .push(")");
    }
    if !filter.environment_ids.is_empty() {
        qb.push(" AND e.id = ANY(")
            .push_bind(filter.environment_ids.clone())
            .push(")");
    }
    if !filter.cluster_ids.is_empty() {
        qb.push(" AND c.id = ANY(")
            .push_bind(filter.cluster_ids.clone())
            .push(")");
    }
    qb.push(" ORDER BY aps.name ASC, ia.id ASC");
    if filter.size > 0 {
        qb.push(" OFFSET ")
            .push_bind(filter.offset)
            .push(" LIMIT ")
            .push_bind(filter.size);
    }

    let records = qb
        .build_query_as::<HelmAppRow>()
        .fetch_all(executor)
        .await?;
    Ok(records)
}

/// Every version row of an installed app, oldest first.
pub async fn list_installed_app_versions<'e, E: PgExecutor<'e>>(
    executor: E,
    installed_app_id: i32,
) -> Result<Vec<InstalledAppVersion>> {
    let sql = format!(
        "SELECT {INSTALLED_APP_VERSION_COLUMNS} FROM installed_app_versions \
         WHERE installed_app_id = $1 ORDER BY id ASC"
    );
    let records = sqlx::query_as::<_, InstalledAppVersion>(&sql)
        .bind(installed_app_id)
        .fetch_all(executor)
        .await?;
    Ok(records)
}

/// Bulk deploy memberships of an installed app.
pub async fn list_chart_group_deployments<'e, E: PgExecutor<'e>>(
    executor: E,
    installed_app_id: i32,
) -> Result<Vec<ChartGroupDeployment>> {
    let records = sqlx::query_as::<_, ChartGroupDeployment>(
        r#"
        SELECT id, chart_group_id, chart_group_entry_id, installed_app_id,
               group_installation_id, deleted, created_on, created_by
        FROM chart_group_deployment
        WHERE installed_app_id = $1
        ORDER BY id ASC
        "#,
    )
    .bind(installed_app_id)
    .fetch_all(executor)
    .await?;
    Ok(records)
}

/// Default components installed on a cluster.
pub async fn list_cluster_installed_apps<'e, E: PgExecutor<'e>>(
    executor: E,
    cluster_id: i32,
) -> Result<Vec<ClusterInstalledApp>> {
    let records = sqlx::query_as::<_, ClusterInstalledApp>(
        r#"
        SELECT id, cluster_id, installed_app_id, created_on, created_by
        FROM cluster_installed_apps
        WHERE cluster_id = $1
        ORDER BY id ASC
        "#,
    )
    .bind(cluster_id)
    .fetch_all(executor)
    .await?;
    Ok(records)
}

/// Status history of a version, oldest first.
pub async fn list_installed_app_history<'e, E: PgExecutor<'e>>(
    executor: E,
    installed_app_version_id: i32,
) -> Result<Vec<InstalledAppHistory>> {
    let records = sqlx::query_as::<_, InstalledAppHistory>(
        r#"
        SELECT id, installed_app_version_id, status, values_yaml_raw, created_on, created_by
        FROM installed_app_history
        WHERE installed_app_version_id = $1
        ORDER BY id ASC
        "#,
    )
    .bind(installed_app_version_id)
    .fetch_all(executor)
    .await?;
    Ok(records)
}

// ============================================================================
// Trait implementations
// ============================================================================

#[async_trait]
impl Repository for PostgresRepository {
    async fn begin(&self) -> Result<TxContext> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn get_app_store_version(&self, id: i32) -> Result<Option<AppStoreVersion>> {
        get_app_store_version(&self.pool, id).await
    }

    async fn find_app_store_version_by_store_name(
        &self,
        app_store_name: &str,
    ) -> Result<Option<AppStoreVersion>> {
        find_app_store_version_by_store_name(&self.pool, app_store_name).await
    }

    async fn get_environment(&self, id: i32) -> Result<Option<Environment>> {
        get_environment(&self.pool, id).await
    }

    async fn find_environment_by_name(&self, name: &str) -> Result<Option<Environment>> {
        find_environment_by_name(&self.pool, name).await
    }

    async fn get_cluster(&self, id: i32) -> Result<Option<Cluster>> {
        get_cluster(&self.pool, id).await
    }

    async fn find_cluster_by_name(&self, name: &str) -> Result<Option<Cluster>> {
        find_cluster_by_name(&self.pool, name).await
    }

    async fn get_team(&self, id: i32) -> Result<Option<Team>> {
        get_team(&self.pool, id).await
    }

    async fn find_team_by_name(&self, name: &str) -> Result<Option<Team>> {
        find_team_by_name(&self.pool, name).await
    }

    async fn find_active_app_by_name(&self, name: &str) -> Result<Option<App>> {
        Ok(find_active_apps_by_name(&self.pool, name)
            .await?
            .into_iter()
            .next())
    }

    async fn find_values_by_id_and_kind(
        &self,
        id: i32,
        kind: ReferenceValueKind,
    ) -> Result<Option<String>> {
        find_values_by_id_and_kind(&self.pool, id, kind).await
    }

    async fn get_active_gitops_config(&self) -> Result<Option<GitOpsConfig>> {
        get_active_gitops_config(&self.pool).await
    }

    async fn get_installed_app(&self, id: i32) -> Result<Option<InstalledAppDetail>> {
        get_installed_app_detail(&self.pool, id).await
    }

    async fn get_installed_app_version(
        &self,
        id: i32,
    ) -> Result<Option<InstalledAppVersionDetail>> {
        get_installed_app_version_detail(&self.pool, id).await
    }

    async fn get_all_installed_apps(&self, env_ids: &[i32]) -> Result<Vec<InstalledAppListRow>> {
        get_all_installed_apps(&self.pool, env_ids).await
    }

    async fn get_installed_app_version_by_installed_app_id_and_env_id(
        &self,
        installed_app_id: i32,
        env_id: i32,
    ) -> Result<Option<InstalledAppVersionDetail>> {
        get_installed_app_version_by_installed_app_id_and_env_id(
            &self.pool,
            installed_app_id,
            env_id,
        )
        .await
    }

    async fn list_helm_apps(&self, filter: &AppStoreFilter) -> Result<Vec<HelmAppRow>> {
        list_helm_apps(&self.pool, filter).await
    }

    async fn list_installed_app_versions(
        &self,
        installed_app_id: i32,
    ) -> Result<Vec<InstalledAppVersion>> {
        list_installed_app_versions(&self.pool, installed_app_id).await
    }

    async fn list_chart_group_deployments(
        &self,
        installed_app_id: i32,
    ) -> Result<Vec<ChartGroupDeployment>> {
        list_chart_group_deployments(&self.pool, installed_app_id).await
    }

    async fn list_cluster_installed_apps(
        &self,
        cluster_id: i32,
    ) -> Result<Vec<ClusterInstalledApp>> {
        list_cluster_installed_apps(&self.pool, cluster_id).await
    }

    async fn list_installed_app_history(
        &self,
        installed_app_version_id: i32,
    ) -> Result<Vec<InstalledAppHistory>> {
        list_installed_app_history(&self.pool, installed_app_version_id).await
    }

    async fn get_installed_app_row(&self, id: i32) -> Result<Option<InstalledApp>> {
        get_installed_app(&self.pool, id).await
    }

    async fn get_app(&self, id: i32) -> Result<Option<App>> {
        get_app(&self.pool, id).await
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn find_active_apps_by_name(&mut self, name: &str) -> Result<Vec<App>> {
        find_active_apps_by_name(&mut *self.tx, name).await
    }

    async fn insert_app(&mut self, app: &NewApp) -> Result<App> {
        insert_app(&mut *self.tx, app).await
    }

    async fn set_app_active(&mut self, app_id: i32, active: bool, user_id: i32) -> Result<bool> {
        set_app_active(&mut *self.tx, app_id, active, user_id).await
    }

    async fn insert_environment(&mut self, env: &NewEnvironment) -> Result<Environment> {
        let id = insert_environment_row(&mut *self.tx, env).await?;
        get_environment(&mut *self.tx, id)
            .await?
            .ok_or_else(|| PersistenceError::not_found("environment", id))
    }

    async fn insert_team(&mut self, name: &str, user_id: i32) -> Result<Team> {
        insert_team(&mut *self.tx, name, user_id).await
    }

    async fn get_installed_app(&mut self, id: i32) -> Result<Option<InstalledApp>> {
        get_installed_app(&mut *self.tx, id).await
    }

    async fn insert_installed_app(&mut self, new: &NewInstalledApp) -> Result<InstalledApp> {
        insert_installed_app(&mut *self.tx, new).await
    }

    async fn update_installed_app(&mut self, app: &InstalledApp) -> Result<()> {
        update_installed_app(&mut *self.tx, app).await
    }

    async fn update_installed_app_status_if(
        &mut self,
        id: i32,
        next: DeploymentStatus,
        allowed: &[DeploymentStatus],
        user_id: i32,
    ) -> Result<bool> {
        update_installed_app_status_if(&mut *self.tx, id, next, allowed, user_id).await
    }

    async fn get_installed_app_version(&mut self, id: i32) -> Result<Option<InstalledAppVersion>> {
        get_installed_app_version(&mut *self.tx, id).await
    }

    async fn insert_installed_app_version(
        &mut self,
        new: &NewInstalledAppVersion,
    ) -> Result<InstalledAppVersion> {
        insert_installed_app_version(&mut *self.tx, new).await
    }

    async fn update_installed_app_version(&mut self, version: &InstalledAppVersion) -> Result<()> {
        update_installed_app_version(&mut *self.tx, version).await
    }

    async fn deactivate_installed_app_versions(
        &mut self,
        installed_app_id: i32,
        user_id: i32,
    ) -> Result<u64> {
        deactivate_installed_app_versions(&mut *self.tx, installed_app_id, user_id).await
    }

    async fn insert_cluster_installed_app(
        &mut self,
        cluster_id: i32,
        installed_app_id: i32,
        user_id: i32,
    ) -> Result<ClusterInstalledApp> {
        insert_cluster_installed_app(&mut *self.tx, cluster_id, installed_app_id, user_id).await
    }

    async fn insert_chart_group_deployment(
        &mut self,
        new: &NewChartGroupDeployment,
    ) -> Result<ChartGroupDeployment> {
        insert_chart_group_deployment(&mut *self.tx, new).await
    }

    async fn mark_chart_group_deployments_deleted(
        &mut self,
        installed_app_id: i32,
        user_id: i32,
    ) -> Result<u64> {
        mark_chart_group_deployments_deleted(&mut *self.tx, installed_app_id, user_id).await
    }

    async fn insert_installed_app_history(
        &mut self,
        installed_app_version_id: i32,
        status: DeploymentStatus,
        values_yaml_raw: &str,
        user_id: i32,
    ) -> Result<()> {
        insert_installed_app_history(
            &mut *self.tx,
            installed_app_version_id,
            status,
            values_yaml_raw,
            user_id,
        )
        .await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
