// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployment state machine.
//!
//! An install runs three legs, each persisting its outcome on the installed
//! app row:
//!
//! ```text
//!  DB leg (caller's tx)      GIT leg                     ACD leg
//!  ─────────────────────     ────────────────────────    ─────────────────────────
//!  app + installed_app   ──► proxy chart, requirements ─► register repo, create app,
//!  + version (DEPLOY_INIT)   values.yaml (GIT_SUCCESS)    sync (ACD_SUCCESS)
//!                                                              │
//!                                                              ▼
//!                                                        DEPLOY_SUCCESS
//! ```
//!
//! [`AppStoreService::perform_deploy_stage`] re-reads the status and runs only
//! the legs that have not completed, so a crashed or redelivered attempt never
//! duplicates work that already succeeded.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use appstore_core::models::{NewApp, NewInstalledApp, NewInstalledAppVersion};
use appstore_core::{DeploymentStatus, ReferenceValueKind, Repository, Transaction};
use tracing::{debug, error, info, warn};

use crate::api::{InstallAppVersionDTO, acd_app_name};
use crate::argocd::{AppTemplate, ArgoCdClient, ArgoCdError};
use crate::bus::MessageBus;
use crate::chart::{
    ChartTemplater, REQUIREMENTS_YAML_FILE, VALUES_YAML_FILE, requirements_yaml, values_yaml,
};
use crate::error::{Error, Result};
use crate::git::{ChartConfig, ChartGitAttribute, GitClient, chart_dir_name};

/// Deadline wrapped around repository registration and application patches.
pub const ACD_REGISTER_TIMEOUT: Duration = Duration::from_secs(60);

/// User recorded on writes made by background workers.
pub const SYSTEM_USER_ID: i32 = 1;

const DEFAULT_PROJECT: &str = "default";
const DEFAULT_TARGET_NAMESPACE: &str = "default";

/// Settings of [`AppStoreService`].
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Directory holding `reference-chart-proxy`.
    ///
    /// Default: `scripts/devtron-reference-helm-charts`
    pub ref_chart_dir: PathBuf,
    /// Namespace ArgoCD keeps its applications in.
    ///
    /// Default: `devtroncd`
    pub argocd_namespace: String,
    /// Per-cluster default component values files.
    ///
    /// Default: `scripts/devtron-cluster-components`
    pub cluster_component_dir: PathBuf,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            ref_chart_dir: PathBuf::from("scripts/devtron-reference-helm-charts"),
            argocd_namespace: "devtroncd".to_string(),
            cluster_component_dir: PathBuf::from("scripts/devtron-cluster-components"),
        }
    }
}

/// Which legs a resumed attempt still has to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumePlan {
    /// GIT leg, ACD leg, then finalize.
    Full,
    /// ACD leg with the chart location rebuilt from Git, then finalize.
    FromAcd,
    /// Only the final status write.
    Finalize,
    /// Already deployed.
    Done,
}

impl ResumePlan {
    /// Plan for a row read back in `status`.
    pub fn for_status(status: DeploymentStatus) -> Result<Self> {
        use DeploymentStatus::*;
        match status {
            DeployInit | Enqueued | QueError | GitError | DequeError | TriggerError => {
                Ok(ResumePlan::Full)
            }
            GitSuccess | AcdError => Ok(ResumePlan::FromAcd),
            AcdSuccess => Ok(ResumePlan::Finalize),
            DeploySuccess => Ok(ResumePlan::Done),
            WfUnknown | RequestAccepted => Err(Error::InvalidRequest(format!(
                "deployment in status {status} cannot be resumed"
            ))),
        }
    }
}

/// App store deployment orchestration over the repository, Git, ArgoCD and
/// the bus.
pub struct AppStoreService {
    pub(crate) repository: Arc<dyn Repository>,
    pub(crate) git: Arc<dyn GitClient>,
    pub(crate) argocd: Arc<dyn ArgoCdClient>,
    pub(crate) bus: Arc<dyn MessageBus>,
    pub(crate) templater: ChartTemplater,
    pub(crate) settings: ServiceSettings,
}

impl AppStoreService {
    pub fn new(
        repository: Arc<dyn Repository>,
        git: Arc<dyn GitClient>,
        argocd: Arc<dyn ArgoCdClient>,
        bus: Arc<dyn MessageBus>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            repository,
            git,
            argocd,
            bus,
            templater: ChartTemplater::new(settings.ref_chart_dir.clone()),
            settings,
        }
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    pub fn argocd(&self) -> &Arc<dyn ArgoCdClient> {
        &self.argocd
    }

    pub fn bus(&self) -> &Arc<dyn MessageBus> {
        &self.bus
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    // ========================================================================
    // Single install
    // ========================================================================

    /// Install one app store version and deploy it inline.
    ///
    /// The database rows are committed before Git is touched, so a failing
    /// leg leaves a resumable row in `GIT_ERROR` or `ACD_ERROR` and the error
    /// is returned.
    pub async fn install_app(
        &self,
        mut request: InstallAppVersionDTO,
    ) -> Result<InstallAppVersionDTO> {
        validate_install(&request)?;
        self.resolve_values(&mut request).await?;

        let mut tx = self.repository.begin().await?;
        self.deploy_db(&mut *tx, &mut request).await?;
        tx.commit().await?;

        info!(
            installed_app_id = request.installed_app_id,
            app_name = %request.app_name,
            environment_id = request.environment_id,
            "Installed app created, deploying"
        );
        self.perform_deploy_stage(request.id, request.user_id).await
    }

    /// Fill blank values from the referenced values source.
    pub(crate) async fn resolve_values(&self, request: &mut InstallAppVersionDTO) -> Result<()> {
        if !request.values_override_yaml.trim().is_empty() {
            return Ok(());
        }
        let id = match request.reference_value_kind {
            ReferenceValueKind::Default if request.reference_value_id == 0 => {
                request.app_store_version
            }
            _ => request.reference_value_id,
        };
        let values = self
            .repository
            .find_values_by_id_and_kind(id, request.reference_value_kind)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "{} values with id {id}",
                    request.reference_value_kind
                ))
            })?;
        request.values_override_yaml = values;
        Ok(())
    }

    // ========================================================================
    // DB leg
    // ========================================================================

    /// Insert the app, installed app and version rows inside `tx`.
    ///
    /// Fills `id`, `installed_app_id`, `app_id` and the environment and app
    /// store fields of `request`.
    pub async fn deploy_db(
        &self,
        tx: &mut dyn Transaction,
        request: &mut InstallAppVersionDTO,
    ) -> Result<()> {
        if self
            .repository
            .find_active_app_by_name(&request.app_name)
            .await?
            .is_some()
        {
            return Err(Error::AppAlreadyExists(request.app_name.clone()));
        }

        let environment = self
            .repository
            .get_environment(request.environment_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("environment {}", request.environment_id)))?;
        let app_store_version = self
            .repository
            .get_app_store_version(request.app_store_version)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("app store version {}", request.app_store_version))
            })?;

        let app = tx
            .insert_app(&NewApp {
                app_name: request.app_name.clone(),
                team_id: request.team_id,
                user_id: request.user_id,
            })
            .await?;

        // Two concurrent installs of the same name can both pass the check
        // above. The oldest row wins.
        let same_name = tx.find_active_apps_by_name(&request.app_name).await?;
        if same_name.len() > 1 && same_name.first().map(|a| a.id) != Some(app.id) {
            warn!(app_name = %request.app_name, app_id = app.id, "Duplicate app name, deactivating new app");
            tx.set_app_active(app.id, false, request.user_id).await?;
            return Err(Error::AppAlreadyExists(request.app_name.clone()));
        }

        let installed_app = tx
            .insert_installed_app(&NewInstalledApp {
                app_id: app.id,
                environment_id: environment.id,
                status: DeploymentStatus::DeployInit,
                user_id: request.user_id,
            })
            .await?;
        let version = tx
            .insert_installed_app_version(&NewInstalledAppVersion {
                installed_app_id: installed_app.id,
                app_store_application_version_id: app_store_version.id,
                values_yaml_raw: request.values_override_yaml.clone(),
                reference_value_id: request.reference_value_id,
                reference_value_kind: request.reference_value_kind,
                user_id: request.user_id,
            })
            .await?;
        tx.insert_installed_app_history(
            version.id,
            DeploymentStatus::DeployInit,
            &version.values_yaml_raw,
            request.user_id,
        )
        .await?;

        if request.default_cluster_component {
            tx.insert_cluster_installed_app(
                environment.cluster_id,
                installed_app.id,
                request.user_id,
            )
            .await?;
        }

        request.id = version.id;
        request.installed_app_id = installed_app.id;
        request.app_id = app.id;
        request.environment_name = environment.environment_name.clone();
        request.namespace = environment.namespace.clone();
        request.cluster_id = environment.cluster_id;
        request.app_store_id = app_store_version.app_store_id;
        request.app_store_name = app_store_version.app_store_name.clone();
        request.deprecated = app_store_version.deprecated;
        request.acd_app_name = acd_app_name(&request.app_name, &environment.environment_name);
        request.status = Some(DeploymentStatus::DeployInit);

        debug!(
            installed_app_id = installed_app.id,
            installed_app_version_id = version.id,
            "DB leg done"
        );
        Ok(())
    }

    // ========================================================================
    // GIT leg
    // ========================================================================

    /// Commit the proxy chart, `requirements.yaml` and `values.yaml`.
    pub async fn deploy_git(&self, request: &InstallAppVersionDTO) -> Result<ChartGitAttribute> {
        let app_store_version = self
            .repository
            .get_app_store_version(request.app_store_version)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("app store version {}", request.app_store_version))
            })?;
        let environment = self
            .repository
            .get_environment(request.environment_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("environment {}", request.environment_id)))?;

        let chart_name = app_store_version.app_store_name.as_str();
        let chart_location = acd_app_name(&request.app_name, &environment.environment_name);
        let message = release_message(app_store_version.id, environment.id);
        let workspace_id = self.workspace_id().await?;

        let chart = self.templater.proxy_chart(chart_name)?;
        let attribute = self
            .git
            .commit_chart(&chart, &chart_location, &message, &workspace_id)
            .await?;

        let requirements = requirements_yaml(
            chart_name,
            &app_store_version.version,
            &app_store_version.chart_repo_url,
        )?;
        self.git
            .commit_values(
                &ChartConfig {
                    file_name: REQUIREMENTS_YAML_FILE.to_string(),
                    file_content: requirements,
                    chart_name: chart_name.to_string(),
                    chart_location: chart_location.clone(),
                    release_message: message.clone(),
                },
                &workspace_id,
            )
            .await?;
        self.pull(chart_name, &attribute.repo_url).await?;

        let values = values_yaml(chart_name, &request.values_override_yaml)?;
        self.git
            .commit_values(
                &ChartConfig {
                    file_name: VALUES_YAML_FILE.to_string(),
                    file_content: values,
                    chart_name: chart_name.to_string(),
                    chart_location: chart_location.clone(),
                    release_message: message,
                },
                &workspace_id,
            )
            .await?;
        self.pull(chart_name, &attribute.repo_url).await?;

        info!(
            installed_app_id = request.installed_app_id,
            repo_url = %attribute.repo_url,
            chart_location = %attribute.chart_location,
            "Chart committed"
        );
        Ok(attribute)
    }

    /// Rebuild where an earlier attempt committed the chart.
    pub async fn chart_git_attribute(
        &self,
        request: &InstallAppVersionDTO,
    ) -> Result<ChartGitAttribute> {
        let workspace_id = self.workspace_id().await?;
        let repo_url = self
            .git
            .get_repo_url(&request.app_store_name, &workspace_id)
            .await?;
        Ok(ChartGitAttribute {
            repo_url,
            chart_location: acd_app_name(&request.app_name, &request.environment_name),
        })
    }

    pub(crate) async fn workspace_id(&self) -> Result<String> {
        Ok(self
            .repository
            .get_active_gitops_config()
            .await?
            .map(|c| c.bitbucket_workspace_id)
            .unwrap_or_default())
    }

    pub(crate) async fn pull(&self, chart_name: &str, repo_url: &str) -> Result<()> {
        let clone_dir = self.git.clone_dir(chart_name);
        self.git
            .git_pull(&clone_dir, repo_url, &chart_dir_name(chart_name))
            .await?;
        Ok(())
    }

    // ========================================================================
    // ACD leg
    // ========================================================================

    /// Register the chart repository and create the ArgoCD application.
    ///
    /// An application that already exists counts as created. Sync is best
    /// effort.
    pub async fn deploy_acd(
        &self,
        request: &InstallAppVersionDTO,
        attribute: &ChartGitAttribute,
    ) -> Result<()> {
        let environment = self
            .repository
            .get_environment(request.environment_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("environment {}", request.environment_id)))?;
        let application_name = acd_app_name(&request.app_name, &environment.environment_name);

        self.register_in_argo(&attribute.repo_url).await?;

        let target_namespace = if environment.namespace.is_empty() {
            DEFAULT_TARGET_NAMESPACE.to_string()
        } else {
            environment.namespace.clone()
        };
        let template = AppTemplate {
            application_name: application_name.clone(),
            namespace: self.settings.argocd_namespace.clone(),
            target_namespace,
            target_server: environment.cluster_server_url.clone(),
            project: DEFAULT_PROJECT.to_string(),
            values_file: VALUES_YAML_FILE.to_string(),
            repo_path: attribute.chart_location.clone(),
            repo_url: attribute.repo_url.clone(),
        };
        match self.argocd.create_application(&template).await {
            Ok(_) => info!(application = %application_name, "ArgoCD application created"),
            Err(e) if e.is_already_exists() => {
                info!(application = %application_name, "ArgoCD application already exists")
            }
            Err(e) => return Err(e.into()),
        }

        self.sync_best_effort(&application_name).await;
        Ok(())
    }

    /// Upsert the repository in ArgoCD under [`ACD_REGISTER_TIMEOUT`].
    pub(crate) async fn register_in_argo(&self, repo_url: &str) -> Result<()> {
        tokio::time::timeout(ACD_REGISTER_TIMEOUT, self.argocd.register_repository(repo_url))
            .await
            .map_err(|_| ArgoCdError::Timeout("register_repository"))??;
        Ok(())
    }

    pub(crate) async fn sync_best_effort(&self, application_name: &str) {
        if let Err(e) = self.argocd.sync(application_name).await {
            error!(application = %application_name, error = %e, "ArgoCD sync failed");
        }
    }

    // ========================================================================
    // Status
    // ========================================================================

    /// Move an installed app to `next` in a fresh transaction and append a
    /// history row for the version.
    pub async fn update_status(
        &self,
        request: &InstallAppVersionDTO,
        next: DeploymentStatus,
    ) -> Result<()> {
        let mut tx = self.repository.begin().await?;
        let mut installed_app = tx
            .get_installed_app(request.installed_app_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("installed app {}", request.installed_app_id)))?;
        installed_app.status = installed_app.status.transition(next)?;
        installed_app.updated_by = request.user_id;
        tx.update_installed_app(&installed_app).await?;
        tx.insert_installed_app_history(
            request.id,
            next,
            &request.values_override_yaml,
            request.user_id,
        )
        .await?;
        tx.commit().await?;
        debug!(installed_app_id = request.installed_app_id, status = %next, "Status updated");
        Ok(())
    }

    async fn record_failure(&self, request: &InstallAppVersionDTO, status: DeploymentStatus) {
        if let Err(e) = self.update_status(request, status).await {
            error!(
                installed_app_id = request.installed_app_id,
                status = %status,
                error = %e,
                "Failed to record deployment failure"
            );
        }
    }

    // ========================================================================
    // Resumption
    // ========================================================================

    /// Run whatever legs the installed app version still needs.
    ///
    /// A leg failure is recorded on the row (`GIT_ERROR` or `ACD_ERROR`) and
    /// returned. A row already in `DEPLOY_SUCCESS` is left untouched.
    pub async fn perform_deploy_stage(
        &self,
        installed_app_version_id: i32,
        user_id: i32,
    ) -> Result<InstallAppVersionDTO> {
        let detail = self
            .repository
            .get_installed_app_version(installed_app_version_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("installed app version {installed_app_version_id}"))
            })?;
        let mut request = InstallAppVersionDTO::from(detail);
        request.user_id = user_id;

        let status = request.status.unwrap_or(DeploymentStatus::WfUnknown);
        let plan = ResumePlan::for_status(status)?;
        debug!(installed_app_version_id, status = %status, plan = ?plan, "Resuming deployment");

        match plan {
            ResumePlan::Done => {
                info!(installed_app_version_id, "Already deployed, nothing to do");
                return Ok(request);
            }
            ResumePlan::Full => {
                let attribute = match self.deploy_git(&request).await {
                    Ok(attribute) => attribute,
                    Err(e) => {
                        error!(installed_app_version_id, error = %e, "GIT leg failed");
                        self.record_failure(&request, DeploymentStatus::GitError).await;
                        return Err(e);
                    }
                };
                self.update_status(&request, DeploymentStatus::GitSuccess).await?;
                self.run_acd_leg(&request, Some(attribute)).await?;
            }
            ResumePlan::FromAcd => self.run_acd_leg(&request, None).await?,
            ResumePlan::Finalize => {}
        }

        self.update_status(&request, DeploymentStatus::DeploySuccess).await?;
        request.status = Some(DeploymentStatus::DeploySuccess);
        info!(
            installed_app_version_id,
            application = %request.acd_app_name,
            "Deployment succeeded"
        );
        Ok(request)
    }

    async fn run_acd_leg(
        &self,
        request: &InstallAppVersionDTO,
        attribute: Option<ChartGitAttribute>,
    ) -> Result<()> {
        let outcome = match attribute {
            Some(attribute) => self.deploy_acd(request, &attribute).await,
            None => match self.chart_git_attribute(request).await {
                Ok(attribute) => self.deploy_acd(request, &attribute).await,
                Err(e) => Err(e),
            },
        };
        if let Err(e) = outcome {
            error!(installed_app_id = request.installed_app_id, error = %e, "ACD leg failed");
            self.record_failure(request, DeploymentStatus::AcdError).await;
            return Err(e);
        }
        self.update_status(request, DeploymentStatus::AcdSuccess).await
    }
}

/// Commit message of a release.
pub fn release_message(app_store_version_id: i32, environment_id: i32) -> String {
    format!("release-{app_store_version_id}-env-{environment_id}")
}

pub(crate) fn validate_install(request: &InstallAppVersionDTO) -> Result<()> {
    if request.app_name.trim().is_empty() {
        return Err(Error::InvalidRequest("app name is required".to_string()));
    }
    if request.environment_id <= 0 {
        return Err(Error::InvalidRequest("environment id is required".to_string()));
    }
    if request.app_store_version <= 0 {
        return Err(Error::InvalidRequest(
            "app store version id is required".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_plan_covers_every_status() {
        use DeploymentStatus::*;
        let plans: Vec<_> = DeploymentStatus::ALL
            .iter()
            .map(|s| (*s, ResumePlan::for_status(*s).ok()))
            .collect();
        for (status, plan) in plans {
            let expected = match status {
                DeployInit | Enqueued | QueError | GitError | DequeError | TriggerError => {
                    Some(ResumePlan::Full)
                }
                GitSuccess | AcdError => Some(ResumePlan::FromAcd),
                AcdSuccess => Some(ResumePlan::Finalize),
                DeploySuccess => Some(ResumePlan::Done),
                WfUnknown | RequestAccepted => None,
            };
            assert_eq!(plan, expected, "{status}");
        }
    }

    #[test]
    fn test_release_message() {
        assert_eq!(release_message(42, 7), "release-42-env-7");
    }

    #[test]
    fn test_validate_install() {
        let mut request = InstallAppVersionDTO {
            app_name: "redis".to_string(),
            environment_id: 1,
            app_store_version: 3,
            ..Default::default()
        };
        assert!(validate_install(&request).is_ok());

        request.app_name = "  ".to_string();
        assert!(matches!(validate_install(&request), Err(Error::InvalidRequest(_))));

        request.app_name = "redis".to_string();
        request.environment_id = 0;
        assert!(matches!(validate_install(&request), Err(Error::InvalidRequest(_))));
    }
}
