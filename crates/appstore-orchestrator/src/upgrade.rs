// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Updates, cross-repo upgrades and deletes of installed apps.
//!
//! | Request                              | Plan                                         |
//! |--------------------------------------|----------------------------------------------|
//! | `id == 0`                            | new version row, full GIT leg, patch ArgoCD   |
//! | `id > 0`, chart version changed      | new version row, requirements + values commit |
//! | `id > 0`, same chart version         | values commit only                            |
//!
//! Version-row writes of every plan share one transaction that is committed
//! only after Git and ArgoCD succeeded.

use appstore_core::models::{InstalledAppVersion, NewInstalledAppVersion};
use appstore_core::{DeploymentStatus, Transaction};
use tracing::{info, warn};

use crate::api::{DeleteResponse, InstallAppVersionDTO, acd_app_name};
use crate::argocd::ArgoCdError;
use crate::argocd::types::source_patch;
use crate::chart::{REQUIREMENTS_YAML_FILE, VALUES_YAML_FILE, requirements_yaml, values_yaml};
use crate::deployment::{ACD_REGISTER_TIMEOUT, AppStoreService, release_message};
use crate::error::{Error, Result};
use crate::git::{ChartConfig, ChartGitAttribute};

/// User message when ArgoCD no longer knows the application.
pub const ACD_APP_NOT_FOUND_MESSAGE: &str = "Could not delete as application not found in argocd";

/// User message when a forced delete ignored an ArgoCD failure.
pub const ACD_FORCE_DELETE_MESSAGE: &str = "Could not delete application in argocd, removed anyway";

/// Path through the state machine an upgrade takes in one go.
const UPGRADE_PATH: [DeploymentStatus; 4] = [
    DeploymentStatus::DeployInit,
    DeploymentStatus::GitSuccess,
    DeploymentStatus::AcdSuccess,
    DeploymentStatus::DeploySuccess,
];

impl AppStoreService {
    /// Apply new values or a new chart version to an installed app.
    pub async fn update_installed_app(
        &self,
        mut request: InstallAppVersionDTO,
    ) -> Result<InstallAppVersionDTO> {
        if request.installed_app_id <= 0 {
            return Err(Error::InvalidRequest("installed app id is required".to_string()));
        }
        if request.app_store_version <= 0 {
            return Err(Error::InvalidRequest(
                "app store version id is required".to_string(),
            ));
        }
        self.resolve_values(&mut request).await?;

        let installed_app = self
            .repository
            .get_installed_app(request.installed_app_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("installed app {}", request.installed_app_id)))?;
        let app_store_version = self
            .repository
            .get_app_store_version(request.app_store_version)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("app store version {}", request.app_store_version))
            })?;

        request.app_id = installed_app.app_id;
        request.app_name = installed_app.app_name.clone();
        request.team_id = installed_app.team_id;
        request.environment_id = installed_app.environment_id;
        request.environment_name = installed_app.environment_name.clone();
        request.namespace = installed_app.namespace.clone();
        request.cluster_id = installed_app.cluster_id;
        request.app_store_id = app_store_version.app_store_id;
        request.app_store_name = app_store_version.app_store_name.clone();
        request.deprecated = app_store_version.deprecated;
        request.acd_app_name = acd_app_name(&installed_app.app_name, &installed_app.environment_name);

        let mut tx = self.repository.begin().await?;
        if request.id == 0 {
            self.upgrade(&mut *tx, &mut request).await?;
        } else {
            self.update_values(&mut *tx, &mut request, installed_app.status)
                .await?;
        }
        tx.commit().await?;

        info!(
            installed_app_id = request.installed_app_id,
            installed_app_version_id = request.id,
            app_store_version = request.app_store_version,
            "Installed app updated"
        );
        Ok(request)
    }

    /// Move the installed app onto another chart, possibly in another chart
    /// repository, and point the ArgoCD application at the new location.
    async fn upgrade(
        &self,
        tx: &mut dyn Transaction,
        request: &mut InstallAppVersionDTO,
    ) -> Result<()> {
        let mut installed_app = tx
            .get_installed_app(request.installed_app_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("installed app {}", request.installed_app_id)))?;

        let deactivated = tx
            .deactivate_installed_app_versions(request.installed_app_id, request.user_id)
            .await?;
        let version = tx
            .insert_installed_app_version(&NewInstalledAppVersion {
                installed_app_id: request.installed_app_id,
                app_store_application_version_id: request.app_store_version,
                values_yaml_raw: request.values_override_yaml.clone(),
                reference_value_id: request.reference_value_id,
                reference_value_kind: request.reference_value_kind,
                user_id: request.user_id,
            })
            .await?;
        request.id = version.id;
        info!(
            installed_app_id = request.installed_app_id,
            deactivated,
            installed_app_version_id = version.id,
            "Upgrading installed app"
        );

        let attribute = self.deploy_git(request).await?;
        self.patch_acd_app(&request.acd_app_name, &attribute).await?;
        self.sync_best_effort(&request.acd_app_name).await;

        let mut status = installed_app.status;
        for step in UPGRADE_PATH {
            status = status.transition(step)?;
        }
        installed_app.status = status;
        installed_app.updated_by = request.user_id;
        tx.update_installed_app(&installed_app).await?;
        tx.insert_installed_app_history(
            version.id,
            status,
            &version.values_yaml_raw,
            request.user_id,
        )
        .await?;
        request.status = Some(status);
        Ok(())
    }

    /// Register the new repository and patch the application source.
    async fn patch_acd_app(&self, application_name: &str, attribute: &ChartGitAttribute) -> Result<()> {
        let patch = source_patch(&attribute.repo_url, &attribute.chart_location);
        tokio::time::timeout(ACD_REGISTER_TIMEOUT, async {
            self.argocd.register_repository(&attribute.repo_url).await?;
            self.argocd.patch(application_name, &patch).await
        })
        .await
        .map_err(|_| ArgoCdError::Timeout("patch"))??;
        info!(
            application = %application_name,
            repo_url = %attribute.repo_url,
            path = %attribute.chart_location,
            "ArgoCD application patched"
        );
        Ok(())
    }

    /// Values edit, with a chart version bump when the requested version
    /// differs from the active one.
    async fn update_values(
        &self,
        tx: &mut dyn Transaction,
        request: &mut InstallAppVersionDTO,
        status: DeploymentStatus,
    ) -> Result<()> {
        let current = tx
            .get_installed_app_version(request.id)
            .await?
            .filter(|v| v.active && v.installed_app_id == request.installed_app_id)
            .ok_or_else(|| Error::NotFound(format!("installed app version {}", request.id)))?;

        let app_store_version = self
            .repository
            .get_app_store_version(request.app_store_version)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("app store version {}", request.app_store_version))
            })?;
        let chart_name = app_store_version.app_store_name.clone();
        let message = release_message(app_store_version.id, request.environment_id);
        let workspace_id = self.workspace_id().await?;
        let repo_url = self.git.get_repo_url(&chart_name, &workspace_id).await?;

        let mut version = if current.app_store_application_version_id != app_store_version.id {
            let previous = InstalledAppVersion {
                active: false,
                updated_by: request.user_id,
                ..current
            };
            tx.update_installed_app_version(&previous).await?;
            let version = tx
                .insert_installed_app_version(&NewInstalledAppVersion {
                    installed_app_id: request.installed_app_id,
                    app_store_application_version_id: app_store_version.id,
                    values_yaml_raw: request.values_override_yaml.clone(),
                    reference_value_id: request.reference_value_id,
                    reference_value_kind: request.reference_value_kind,
                    user_id: request.user_id,
                })
                .await?;
            info!(
                installed_app_id = request.installed_app_id,
                from = previous.app_store_application_version_id,
                to = app_store_version.id,
                "Chart version changed"
            );

            let requirements = requirements_yaml(
                &chart_name,
                &app_store_version.version,
                &app_store_version.chart_repo_url,
            )?;
            self.git
                .commit_values(
                    &ChartConfig {
                        file_name: REQUIREMENTS_YAML_FILE.to_string(),
                        file_content: requirements,
                        chart_name: chart_name.clone(),
                        chart_location: request.acd_app_name.clone(),
                        release_message: message.clone(),
                    },
                    &workspace_id,
                )
                .await?;
            self.pull(&chart_name, &repo_url).await?;
            version
        } else {
            current
        };

        let values = values_yaml(&chart_name, &request.values_override_yaml)?;
        self.git
            .commit_values(
                &ChartConfig {
                    file_name: VALUES_YAML_FILE.to_string(),
                    file_content: values,
                    chart_name: chart_name.clone(),
                    chart_location: request.acd_app_name.clone(),
                    release_message: message,
                },
                &workspace_id,
            )
            .await?;
        self.pull(&chart_name, &repo_url).await?;
        self.sync_best_effort(&request.acd_app_name).await;

        version.values_yaml_raw = request.values_override_yaml.clone();
        version.reference_value_id = request.reference_value_id;
        version.reference_value_kind = request.reference_value_kind;
        version.updated_by = request.user_id;
        tx.update_installed_app_version(&version).await?;
        tx.insert_installed_app_history(
            version.id,
            status,
            &version.values_yaml_raw,
            request.user_id,
        )
        .await?;

        request.id = version.id;
        request.status = Some(status);
        Ok(())
    }

    /// Soft-delete an installed app and remove its ArgoCD application.
    ///
    /// An application ArgoCD no longer knows is treated as deleted. Any other
    /// ArgoCD failure aborts the delete unless `force_delete` is set.
    pub async fn delete_installed_app(
        &self,
        request: &InstallAppVersionDTO,
    ) -> Result<DeleteResponse> {
        let mut installed_app = self
            .repository
            .get_installed_app_row(request.installed_app_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("installed app {}", request.installed_app_id)))?;
        let app = self
            .repository
            .get_app(installed_app.app_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("app {}", installed_app.app_id)))?;
        let environment = self
            .repository
            .get_environment(installed_app.environment_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("environment {}", installed_app.environment_id))
            })?;
        let application_name = acd_app_name(&app.app_name, &environment.environment_name);

        let mut tx = self.repository.begin().await?;
        tx.set_app_active(app.id, false, request.user_id).await?;
        installed_app.active = false;
        installed_app.updated_by = request.user_id;
        tx.update_installed_app(&installed_app).await?;
        tx.deactivate_installed_app_versions(installed_app.id, request.user_id)
            .await?;

        let message = match self.argocd.delete(&application_name, true).await {
            Ok(()) => None,
            Err(e) if e.is_not_found() => {
                warn!(application = %application_name, "ArgoCD application not found, deleting anyway");
                Some(ACD_APP_NOT_FOUND_MESSAGE.to_string())
            }
            Err(e) if request.force_delete => {
                warn!(application = %application_name, error = %e, "ArgoCD delete failed, forcing");
                Some(ACD_FORCE_DELETE_MESSAGE.to_string())
            }
            Err(e) => {
                return Err(Error::DeleteFailed {
                    app_name: application_name,
                    source: e,
                });
            }
        };

        let unlinked = tx
            .mark_chart_group_deployments_deleted(installed_app.id, request.user_id)
            .await?;
        tx.commit().await?;

        info!(
            installed_app_id = installed_app.id,
            application = %application_name,
            chart_group_links = unlinked,
            "Installed app deleted"
        );
        Ok(DeleteResponse {
            installed_app_id: installed_app.id,
            message,
        })
    }
}
