// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bulk installs.
//!
//! A batch is written in one transaction and then handed to the bus one
//! message per member. Publishing and marking the row are two separate
//! steps; a member whose mark fails stays in `DEPLOY_INIT`, which the
//! subscriber resumes like any other.

use std::path::Path;

use appstore_core::DeploymentStatus;
use appstore_core::ReferenceValueKind;
use appstore_core::models::{Cluster, NewChartGroupDeployment, NewEnvironment};
use sha1::{Digest, Sha1};
use tracing::{error, info, warn};

use crate::api::{
    ChartGroupInstallAppRes, ChartGroupInstallChartRequest, ChartGroupInstallRequest,
    InstallAppVersionDTO,
};
use crate::bus::publish_bulk_deploy;
use crate::deployment::{AppStoreService, validate_install};
use crate::error::{Error, Result};

/// Namespace, team and environment suffix of default cluster components.
pub const DEFAULT_COMPONENT_NAMESPACE: &str = "devtron";

/// Deterministic id of a batch: SHA-1 hex of the concatenated decimal app ids.
pub fn group_installation_id(app_ids: &[i32]) -> Result<String> {
    let mut concatenated = String::new();
    for app_id in app_ids {
        if *app_id == 0 {
            return Err(Error::InvalidRequest("app ID not present".to_string()));
        }
        concatenated.push_str(&app_id.to_string());
    }
    Ok(hex::encode(Sha1::digest(concatenated.as_bytes())))
}

impl AppStoreService {
    /// Install every member in one transaction and enqueue each for deployment.
    pub async fn deploy_bulk(
        &self,
        request: ChartGroupInstallRequest,
    ) -> Result<ChartGroupInstallAppRes> {
        let (members, group_installation_id) = self.install_batch(&request).await?;

        for member in &members {
            let published = match publish_bulk_deploy(self.bus.as_ref(), member.id).await {
                Ok(()) => true,
                Err(e) => {
                    error!(installed_app_version_id = member.id, error = %e, "Failed to publish bulk deploy");
                    false
                }
            };
            let next = if published {
                DeploymentStatus::Enqueued
            } else {
                DeploymentStatus::QueError
            };
            if let Err(e) = self.mark_enqueue_result(member, next).await {
                error!(
                    installed_app_id = member.installed_app_id,
                    status = %next,
                    error = %e,
                    "Failed to record enqueue result"
                );
            }
        }

        info!(
            members = members.len(),
            chart_group_id = request.chart_group_id,
            "Bulk deploy enqueued"
        );
        Ok(ChartGroupInstallAppRes {
            installed_app_version_ids: members.iter().map(|m| m.id).collect(),
            group_installation_id,
        })
    }

    /// Install every member and deploy them inline, one after another.
    ///
    /// A member that fails to deploy is moved to `QUE_ERROR`; the rest of the
    /// batch still runs.
    pub async fn deploy_default_component(
        &self,
        request: ChartGroupInstallRequest,
    ) -> Result<ChartGroupInstallAppRes> {
        let (members, group_installation_id) = self.install_batch(&request).await?;

        for member in &members {
            if let Err(e) = self.perform_deploy_stage(member.id, member.user_id).await {
                error!(
                    installed_app_version_id = member.id,
                    error = %e,
                    "Default component deployment failed"
                );
                if let Err(e) = self.update_status(member, DeploymentStatus::QueError).await {
                    error!(installed_app_version_id = member.id, error = %e, "Failed to mark QUE_ERROR");
                }
            }
        }

        Ok(ChartGroupInstallAppRes {
            installed_app_version_ids: members.iter().map(|m| m.id).collect(),
            group_installation_id,
        })
    }

    /// Install every `*.yaml` of the cluster component directory on `cluster`.
    ///
    /// Returns `false` when the directory does not exist.
    pub async fn deploy_default_chart_on_cluster(
        &self,
        cluster: &Cluster,
        user_id: i32,
    ) -> Result<bool> {
        let dir = self.settings.cluster_component_dir.clone();
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            warn!(dir = %dir.display(), "Cluster component directory missing, skipping");
            return Ok(false);
        }

        let environment_name = format!("{}-{DEFAULT_COMPONENT_NAMESPACE}", cluster.cluster_name);
        let mut tx = self.repository.begin().await?;
        let environment = match self
            .repository
            .find_environment_by_name(&environment_name)
            .await?
        {
            Some(environment) => environment,
            None => {
                tx.insert_environment(&NewEnvironment {
                    environment_name: environment_name.clone(),
                    cluster_id: cluster.id,
                    namespace: DEFAULT_COMPONENT_NAMESPACE.to_string(),
                    user_id,
                })
                .await?
            }
        };
        let team = match self
            .repository
            .find_team_by_name(DEFAULT_COMPONENT_NAMESPACE)
            .await?
        {
            Some(team) => team,
            None => tx.insert_team(DEFAULT_COMPONENT_NAMESPACE, user_id).await?,
        };
        tx.commit().await?;

        let mut members = Vec::new();
        for (stem, values) in read_component_values(&dir).await? {
            let Some(app_store_version) = self
                .repository
                .find_app_store_version_by_store_name(&stem)
                .await?
            else {
                warn!(app_store = %stem, "No app store version for cluster component, skipping");
                continue;
            };
            members.push(ChartGroupInstallChartRequest {
                app_name: format!(
                    "{}-{}-{stem}",
                    cluster.cluster_name, environment.environment_name
                ),
                environment_id: environment.id,
                app_store_version: app_store_version.id,
                values_override_yaml: values,
                reference_value_id: app_store_version.id,
                reference_value_kind: ReferenceValueKind::Default,
                chart_group_entry_id: 0,
                default_cluster_component: true,
            });
        }
        if members.is_empty() {
            info!(cluster = %cluster.cluster_name, "No default components to install");
            return Ok(true);
        }

        self.deploy_default_component(ChartGroupInstallRequest {
            project_id: team.id,
            chart_group_id: 0,
            chart_group_install_chart_request: members,
            user_id,
        })
        .await?;
        Ok(true)
    }

    /// Validate, resolve values and write the DB leg of every member in one
    /// transaction, linking the members when the batch belongs to a chart
    /// group.
    async fn install_batch(
        &self,
        request: &ChartGroupInstallRequest,
    ) -> Result<(Vec<InstallAppVersionDTO>, Option<String>)> {
        if request.chart_group_install_chart_request.is_empty() {
            return Err(Error::InvalidRequest("no charts to install".to_string()));
        }

        let mut members = Vec::with_capacity(request.chart_group_install_chart_request.len());
        for chart in &request.chart_group_install_chart_request {
            let mut member = InstallAppVersionDTO {
                app_name: chart.app_name.clone(),
                team_id: request.project_id,
                environment_id: chart.environment_id,
                app_store_version: chart.app_store_version,
                values_override_yaml: chart.values_override_yaml.clone(),
                reference_value_id: chart.reference_value_id,
                reference_value_kind: chart.reference_value_kind,
                chart_group_entry_id: chart.chart_group_entry_id,
                default_cluster_component: chart.default_cluster_component,
                user_id: request.user_id,
                ..Default::default()
            };
            validate_install(&member)?;
            self.resolve_values(&mut member).await?;
            members.push(member);
        }

        let mut tx = self.repository.begin().await?;
        for member in &mut members {
            self.deploy_db(&mut *tx, member).await?;
        }

        let mut group_id = None;
        if request.chart_group_id > 0 {
            let app_ids: Vec<i32> = members.iter().map(|m| m.app_id).collect();
            let id = group_installation_id(&app_ids)?;
            for member in &members {
                tx.insert_chart_group_deployment(&NewChartGroupDeployment {
                    chart_group_id: request.chart_group_id,
                    chart_group_entry_id: member.chart_group_entry_id,
                    installed_app_id: member.installed_app_id,
                    group_installation_id: id.clone(),
                    user_id: request.user_id,
                })
                .await?;
            }
            group_id = Some(id);
        }
        tx.commit().await?;

        Ok((members, group_id))
    }

    /// Move a freshly enqueued member to `next` unless a worker already
    /// advanced it.
    async fn mark_enqueue_result(
        &self,
        member: &InstallAppVersionDTO,
        next: DeploymentStatus,
    ) -> Result<()> {
        let mut tx = self.repository.begin().await?;
        let updated = tx
            .update_installed_app_status_if(
                member.installed_app_id,
                next,
                &DeploymentStatus::ENQUEUEABLE,
                member.user_id,
            )
            .await?;
        if !updated {
            info!(installed_app_id = member.installed_app_id, status = %next, "Row already advanced, not marking");
            return Ok(());
        }
        tx.insert_installed_app_history(member.id, next, &member.values_override_yaml, member.user_id)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

/// `(file stem, content)` of every `*.yaml` in `dir`, sorted by stem.
async fn read_component_values(dir: &Path) -> Result<Vec<(String, String)>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let content = tokio::fs::read_to_string(&path).await?;
        files.push((stem.to_string(), content));
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_id_is_sha1_of_concatenated_ids() {
        let expected = hex::encode(Sha1::digest(b"101102103"));
        assert_eq!(group_installation_id(&[101, 102, 103]).unwrap(), expected);
        assert_eq!(expected.len(), 40);
    }

    #[test]
    fn test_group_id_depends_on_order_only() {
        let a = group_installation_id(&[101, 102, 103]).unwrap();
        let b = group_installation_id(&[101, 102, 103]).unwrap();
        let c = group_installation_id(&[103, 102, 101]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_group_id_rejects_missing_app_id() {
        let err = group_installation_id(&[101, 0]).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(m) if m == "app ID not present"));
    }

    #[tokio::test]
    async fn test_component_values_are_yaml_files_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("redis.yaml"), "replicas: 1\n").unwrap();
        std::fs::write(dir.path().join("metrics-server.yaml"), "").unwrap();
        std::fs::write(dir.path().join("README.md"), "docs").unwrap();

        let files = read_component_values(dir.path()).await.unwrap();
        assert_eq!(
            files,
            vec![
                ("metrics-server".to_string(), String::new()),
                ("redis".to_string(), "replicas: 1\n".to_string()),
            ]
        );
    }
}
