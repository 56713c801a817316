// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Read paths over installed apps.

use appstore_core::models::AppStoreFilter;
use rand::Rng;
use tracing::warn;

use crate::api::{
    ApiResponse, AppDetailContainer, AppNameCheck, DeploymentDetail, HelmAppDetail,
    InstallAppVersionDTO, InstalledAppInfo, acd_app_name,
};
use crate::deployment::AppStoreService;
use crate::error::{Error, Result};
use crate::tree::{ResourceTreeResponse, analyze};

const SUGGESTION_SUFFIX_LEN: usize = 5;

/// Deployment detail with the tree error, if the tree could not be read.
#[derive(Debug)]
pub struct AppDetails {
    pub container: AppDetailContainer,
    pub tree_error: Option<Error>,
}

impl AppDetails {
    /// Envelope carrying the detail, and the tree error when there is one.
    pub fn into_response(self) -> ApiResponse<AppDetailContainer> {
        match self.tree_error {
            None => ApiResponse::ok(self.container),
            Some(e) => ApiResponse::partial(self.container, e.to_api_error()),
        }
    }
}

impl AppStoreService {
    /// Whether each name is taken, with a free alternative for taken names.
    pub async fn check_app_exists(&self, names: &[String]) -> Result<Vec<AppNameCheck>> {
        let mut checks = Vec::with_capacity(names.len());
        for name in names {
            let exists = self.repository.find_active_app_by_name(name).await?.is_some();
            checks.push(AppNameCheck {
                name: name.clone(),
                exists,
                suggested_name: if exists {
                    suggest_name(name)
                } else {
                    String::new()
                },
            });
        }
        Ok(checks)
    }

    pub async fn get_installed_app(&self, installed_app_id: i32) -> Result<InstalledAppInfo> {
        let app = self
            .repository
            .get_installed_app(installed_app_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("installed app {installed_app_id}")))?;
        Ok(InstalledAppInfo {
            environment_id: app.environment_id,
            installed_app_id: app.id,
            app_id: app.app_id,
        })
    }

    pub async fn get_installed_app_version(
        &self,
        installed_app_version_id: i32,
    ) -> Result<InstallAppVersionDTO> {
        self.repository
            .get_installed_app_version(installed_app_version_id)
            .await?
            .map(InstallAppVersionDTO::from)
            .ok_or_else(|| {
                Error::NotFound(format!("installed app version {installed_app_version_id}"))
            })
    }

    /// Installed helm apps matching `filter`. Rows without a team are skipped.
    pub async fn get_all(&self, filter: &AppStoreFilter) -> Result<Vec<HelmAppDetail>> {
        Ok(self
            .repository
            .list_helm_apps(filter)
            .await?
            .into_iter()
            .filter(|row| row.team_id != 0)
            .map(HelmAppDetail::from)
            .collect())
    }

    /// Deployment detail plus the analyzed resource tree.
    ///
    /// A tree that cannot be read does not fail the call: the detail comes
    /// back with an empty tree and the error alongside.
    pub async fn find_app_details(
        &self,
        installed_app_id: i32,
        environment_id: i32,
    ) -> Result<AppDetails> {
        let detail = self
            .repository
            .get_installed_app_version_by_installed_app_id_and_env_id(
                installed_app_id,
                environment_id,
            )
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "installed app {installed_app_id} in environment {environment_id}"
                ))
            })?;
        let application_name = acd_app_name(&detail.app_name, &detail.environment_name);

        let (resource_tree, tree_error) = match analyze(self.argocd.clone(), &application_name).await {
            Ok(tree) => (tree, None),
            Err(e) => {
                warn!(application = %application_name, error = %e, "Resource tree not available");
                let error = Error::ResourceTreeNotFound {
                    app_name: application_name,
                    source: e,
                };
                (ResourceTreeResponse::default(), Some(error))
            }
        };

        Ok(AppDetails {
            container: AppDetailContainer {
                deployment_detail: DeploymentDetail::from(&detail),
                resource_tree,
            },
            tree_error,
        })
    }
}

/// `name` with a random lowercase suffix.
fn suggest_name(name: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUGGESTION_SUFFIX_LEN)
        .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
        .collect();
    format!("{name}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suggested_name_has_lowercase_suffix() {
        let suggestion = suggest_name("redis");
        let suffix = suggestion.strip_prefix("redis-").unwrap();
        assert_eq!(suffix.len(), SUGGESTION_SUFFIX_LEN);
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase()));
    }
}
