// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request and response payloads.
//!
//! Every handler answers with an [`ApiResponse`]:
//!
//! ```text
//! {"code": 200, "status": "OK", "result": {...}}
//! {"code": 409, "status": "Conflict", "errors": [{"code": "AppAlreadyExists", ...}]}
//! ```

use appstore_core::models::{HelmAppRow, InstalledAppVersionDetail};
use appstore_core::{DeploymentStatus, ReferenceValueKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tree::ResourceTreeResponse;

/// Stable error codes.
pub mod codes {
    pub const APP_ALREADY_EXISTS: &str = "AppAlreadyExists";
    pub const APP_DETAIL_RESOURCE_TREE_NOT_FOUND: &str = "AppDetailResourceTreeNotFound";
    pub const NOT_FOUND: &str = "NotFound";
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
    pub const GIT_ERROR: &str = "GitError";
    pub const ACD_ERROR: &str = "AcdError";
    pub const BUS_ERROR: &str = "BusError";
    pub const INTERNAL_ERROR: &str = "InternalError";
}

/// A collaborator or validation failure ready to be surfaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub http_status: u16,
    pub code: String,
    /// Logged, never shown to users
    pub internal_message: String,
    /// Stable text returned in the response body
    pub user_message: String,
}

impl ApiError {
    pub fn new(
        http_status: u16,
        code: &str,
        internal_message: impl Into<String>,
        user_message: impl Into<String>,
    ) -> Self {
        Self {
            http_status,
            code: code.to_string(),
            internal_message: internal_message.into(),
            user_message: user_message.into(),
        }
    }
}

/// One entry of the `errors` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    pub code: String,
    pub internal_message: String,
    pub user_message: String,
}

impl From<ApiError> for ErrorDetail {
    fn from(err: ApiError) -> Self {
        Self {
            code: err.code,
            internal_message: err.internal_message,
            user_message: err.user_message,
        }
    }
}

/// Response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: u16,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ErrorDetail>>,
}

impl<T> ApiResponse<T> {
    /// 200 with a result.
    pub fn ok(result: T) -> Self {
        Self {
            code: 200,
            status: status_text(200).to_string(),
            result: Some(result),
            errors: None,
        }
    }

    /// Error without a result.
    pub fn error(err: ApiError) -> Self {
        Self {
            code: err.http_status,
            status: status_text(err.http_status).to_string(),
            result: None,
            errors: Some(vec![err.into()]),
        }
    }

    /// Error that still carries a partial result.
    pub fn partial(result: T, err: ApiError) -> Self {
        Self {
            result: Some(result),
            ..Self::error(err)
        }
    }
}

impl<T> From<crate::error::Result<T>> for ApiResponse<T> {
    fn from(result: crate::error::Result<T>) -> Self {
        match result {
            Ok(value) => ApiResponse::ok(value),
            Err(e) => ApiResponse::error(e.to_api_error()),
        }
    }
}

fn status_text(code: u16) -> &'static str {
    match code {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        409 => "Conflict",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

// ============================================================================
// Install requests
// ============================================================================

/// An install of one app store version into one environment.
///
/// `id` is the installed app version id once the row exists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstallAppVersionDTO {
    pub id: i32,
    pub app_id: i32,
    pub app_name: String,
    pub team_id: i32,
    pub environment_id: i32,
    pub environment_name: String,
    pub namespace: String,
    pub cluster_id: i32,
    pub installed_app_id: i32,
    /// App store application version id
    pub app_store_version: i32,
    pub app_store_id: i32,
    pub app_store_name: String,
    pub deprecated: bool,
    pub values_override_yaml: String,
    pub readme: String,
    pub reference_value_id: i32,
    pub reference_value_kind: ReferenceValueKind,
    /// `<app>-<env>`, set by the git leg
    pub acd_app_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DeploymentStatus>,
    pub chart_group_entry_id: i32,
    pub default_cluster_component: bool,
    pub force_delete: bool,
    pub user_id: i32,
}

impl From<InstalledAppVersionDetail> for InstallAppVersionDTO {
    fn from(detail: InstalledAppVersionDetail) -> Self {
        Self {
            id: detail.id,
            app_id: detail.app_id,
            acd_app_name: acd_app_name(&detail.app_name, &detail.environment_name),
            app_name: detail.app_name,
            team_id: detail.team_id,
            environment_id: detail.environment_id,
            environment_name: detail.environment_name,
            namespace: detail.namespace,
            cluster_id: detail.cluster_id,
            installed_app_id: detail.installed_app_id,
            app_store_version: detail.app_store_application_version_id,
            app_store_id: detail.app_store_id,
            app_store_name: detail.app_store_name,
            deprecated: detail.deprecated,
            values_override_yaml: detail.values_yaml_raw,
            readme: detail.readme,
            reference_value_id: detail.reference_value_id,
            reference_value_kind: detail.reference_value_kind,
            status: Some(detail.status),
            ..Default::default()
        }
    }
}

/// ArgoCD application name of an install.
pub fn acd_app_name(app_name: &str, environment_name: &str) -> String {
    format!("{app_name}-{environment_name}")
}

/// One member of a bulk install.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChartGroupInstallChartRequest {
    pub app_name: String,
    pub environment_id: i32,
    pub app_store_version: i32,
    pub values_override_yaml: String,
    pub reference_value_id: i32,
    pub reference_value_kind: ReferenceValueKind,
    pub chart_group_entry_id: i32,
    pub default_cluster_component: bool,
}

/// Bulk install request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChartGroupInstallRequest {
    /// Team owning the created apps
    pub project_id: i32,
    /// Zero for ad-hoc batches without a chart group
    pub chart_group_id: i32,
    pub chart_group_install_chart_request: Vec<ChartGroupInstallChartRequest>,
    pub user_id: i32,
}

/// Result of a bulk install.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartGroupInstallAppRes {
    pub installed_app_version_ids: Vec<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_installation_id: Option<String>,
}

/// Delete outcome. `message` is set when the delete proceeded despite an
/// ArgoCD error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub installed_app_id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// ============================================================================
// Read payloads
// ============================================================================

/// Availability of an app name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppNameCheck {
    pub name: String,
    pub exists: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub suggested_name: String,
}

/// Identifiers of an installed app.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledAppInfo {
    pub environment_id: i32,
    pub installed_app_id: i32,
    pub app_id: i32,
}

/// A listed helm app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmAppDetail {
    pub installed_app_id: i32,
    pub installed_app_version_id: i32,
    pub app_id: i32,
    pub app_name: String,
    pub team_id: i32,
    pub environment_id: i32,
    pub environment_name: String,
    pub namespace: String,
    pub cluster_id: i32,
    pub cluster_name: String,
    pub app_store_application_version_id: i32,
    pub app_store_id: i32,
    pub app_store_name: String,
    pub chart_version: String,
    pub chart_repo_name: String,
    pub deprecated: bool,
    pub status: DeploymentStatus,
    pub last_deployed_at: DateTime<Utc>,
}

impl From<HelmAppRow> for HelmAppDetail {
    fn from(row: HelmAppRow) -> Self {
        Self {
            installed_app_id: row.installed_app_id,
            installed_app_version_id: row.installed_app_version_id,
            app_id: row.app_id,
            app_name: row.app_name,
            team_id: row.team_id,
            environment_id: row.environment_id,
            environment_name: row.environment_name,
            namespace: row.namespace,
            cluster_id: row.cluster_id,
            cluster_name: row.cluster_name,
            app_store_application_version_id: row.app_store_application_version_id,
            app_store_id: row.app_store_id,
            app_store_name: row.app_store_name,
            chart_version: row.chart_version,
            chart_repo_name: row.chart_repo_name,
            deprecated: row.deprecated,
            status: row.status,
            last_deployed_at: row.updated_on,
        }
    }
}

/// Deployment detail of one installed app in one environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentDetail {
    pub installed_app_id: i32,
    pub installed_app_version_id: i32,
    pub app_id: i32,
    pub app_name: String,
    pub environment_id: i32,
    pub environment_name: String,
    pub namespace: String,
    pub cluster_id: i32,
    pub app_store_application_version_id: i32,
    pub app_store_id: i32,
    pub app_store_app_name: String,
    pub app_store_app_version: String,
    pub chart_repo_url: String,
    pub deprecated: bool,
    pub status: DeploymentStatus,
}

impl From<&InstalledAppVersionDetail> for DeploymentDetail {
    fn from(detail: &InstalledAppVersionDetail) -> Self {
        Self {
            installed_app_id: detail.installed_app_id,
            installed_app_version_id: detail.id,
            app_id: detail.app_id,
            app_name: detail.app_name.clone(),
            environment_id: detail.environment_id,
            environment_name: detail.environment_name.clone(),
            namespace: detail.namespace.clone(),
            cluster_id: detail.cluster_id,
            app_store_application_version_id: detail.app_store_application_version_id,
            app_store_id: detail.app_store_id,
            app_store_app_name: detail.app_store_name.clone(),
            app_store_app_version: detail.app_store_version.clone(),
            chart_repo_url: detail.chart_repo_url.clone(),
            deprecated: detail.deprecated,
            status: detail.status,
        }
    }
}

/// Deployment detail plus the analyzed resource tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppDetailContainer {
    #[serde(flatten)]
    pub deployment_detail: DeploymentDetail,
    pub resource_tree: ResourceTreeResponse,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_envelope_shape() {
        let response: ApiResponse<()> = ApiResponse::error(ApiError::new(
            409,
            codes::APP_ALREADY_EXISTS,
            "duplicate row",
            "app already exists with name redis",
        ));
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(
            value,
            json!({
                "code": 409,
                "status": "Conflict",
                "errors": [{
                    "code": "AppAlreadyExists",
                    "internalMessage": "duplicate row",
                    "userMessage": "app already exists with name redis"
                }]
            })
        );
    }

    #[test]
    fn test_ok_envelope_omits_errors() {
        let value = serde_json::to_value(ApiResponse::ok(InstalledAppInfo {
            environment_id: 7,
            installed_app_id: 3,
            app_id: 11,
        }))
        .unwrap();
        assert_eq!(value["status"], "OK");
        assert_eq!(value["result"]["installedAppId"], 3);
        assert!(value.get("errors").is_none());
    }

    #[test]
    fn test_install_request_accepts_partial_payload() {
        let dto: InstallAppVersionDTO = serde_json::from_value(json!({
            "appName": "nginx-ingress",
            "teamId": 1,
            "environmentId": 7,
            "appStoreVersion": 42,
            "valuesOverrideYaml": "replicaCount: 3\n",
            "referenceValueKind": "DEFAULT"
        }))
        .unwrap();
        assert_eq!(dto.app_store_version, 42);
        assert_eq!(dto.id, 0);
        assert_eq!(dto.reference_value_kind, ReferenceValueKind::Default);
        assert_eq!(dto.status, None);
    }
}
