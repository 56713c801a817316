// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for appstore-orchestrator.

use std::path::PathBuf;
use std::time::Duration;

/// Orchestrator configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string
    pub database_url: String,
    /// Maximum pool connections
    pub db_max_connections: u32,
    /// NATS server URL
    pub nats_url: String,
    /// JetStream stream that carries the bulk deploy subject
    pub nats_stream_name: String,
    /// ArgoCD settings
    pub argocd: ArgoCdSettings,
    /// GitOps settings
    pub gitops: GitOpsSettings,
    /// Directory holding `reference-chart-proxy`
    pub ref_chart_dir: PathBuf,
    /// Directory with per-cluster default component values files
    pub cluster_component_dir: PathBuf,
    /// Bulk deploy subscriber concurrency
    pub bulk_max_inflight: usize,
    /// Redelivery deadline for unacked bulk deploy messages
    pub bulk_ack_wait: Duration,
}

/// ArgoCD connection settings.
#[derive(Debug, Clone)]
pub struct ArgoCdSettings {
    /// API base URL, e.g. `https://argocd.example.com`
    pub server_url: String,
    /// Static bearer token. When absent a session is opened with user/password.
    pub token: Option<String>,
    /// Session login user
    pub username: String,
    /// Session login password
    pub password: Option<String>,
    /// Namespace written into created applications
    pub namespace: String,
    /// Timeout for get/update/sync/patch/terminate
    pub timeout_fast: Duration,
    /// Timeout for delete
    pub timeout_slow: Duration,
}

impl Default for ArgoCdSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".to_string(),
            token: None,
            username: "admin".to_string(),
            password: None,
            namespace: "devtroncd".to_string(),
            timeout_fast: Duration::from_secs(10),
            timeout_slow: Duration::from_secs(30),
        }
    }
}

/// Git provider settings.
#[derive(Debug, Clone)]
pub struct GitOpsSettings {
    /// Base URL of the Git provider or a local directory
    pub host: String,
    /// Organisation or group holding chart repositories
    pub org: String,
    /// Push user
    pub username: Option<String>,
    /// Push token
    pub token: Option<String>,
    /// Root of the local mirrors
    pub working_dir: PathBuf,
}

impl Default for GitOpsSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            org: String::new(),
            username: None,
            token: None,
            working_dir: PathBuf::from("/tmp/gitops/"),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("APPSTORE_DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("APPSTORE_DATABASE_URL"))?;

        let db_max_connections = parse_var("APPSTORE_DB_MAX_CONNECTIONS", "10")?;

        let nats_url =
            std::env::var("NATS_URL").unwrap_or_else(|_| "nats://127.0.0.1:4222".to_string());
        let nats_stream_name =
            std::env::var("NATS_STREAM_NAME").unwrap_or_else(|_| "ORCHESTRATOR".to_string());

        let argocd = ArgoCdSettings {
            server_url: std::env::var("ARGOCD_SERVER_URL")
                .map_err(|_| ConfigError::MissingEnvVar("ARGOCD_SERVER_URL"))?,
            token: optional_var("ARGOCD_TOKEN"),
            username: std::env::var("ARGOCD_USERNAME").unwrap_or_else(|_| "admin".to_string()),
            password: optional_var("ARGOCD_PASSWORD"),
            namespace: std::env::var("ARGOCD_NAMESPACE")
                .unwrap_or_else(|_| "devtroncd".to_string()),
            timeout_fast: Duration::from_secs(parse_var("ARGOCD_TIMEOUT_FAST_SECS", "10")?),
            timeout_slow: Duration::from_secs(parse_var("ARGOCD_TIMEOUT_SLOW_SECS", "30")?),
        };

        let gitops = GitOpsSettings {
            host: std::env::var("GITOPS_HOST")
                .map_err(|_| ConfigError::MissingEnvVar("GITOPS_HOST"))?,
            org: std::env::var("GITOPS_ORG").unwrap_or_default(),
            username: optional_var("GITOPS_USERNAME"),
            token: optional_var("GITOPS_TOKEN"),
            working_dir: PathBuf::from(
                std::env::var("GIT_WORKING_DIR").unwrap_or_else(|_| "/tmp/gitops/".to_string()),
            ),
        };

        let ref_chart_dir = PathBuf::from(
            std::env::var("REF_CHART_DIR")
                .unwrap_or_else(|_| "scripts/devtron-reference-helm-charts".to_string()),
        );
        let cluster_component_dir = PathBuf::from(
            std::env::var("CLUSTER_COMPONENT_DIR")
                .unwrap_or_else(|_| "scripts/devtron-cluster-components".to_string()),
        );

        let bulk_max_inflight = parse_var("BULK_DEPLOY_MAX_INFLIGHT", "3")?;
        let bulk_ack_wait = Duration::from_secs(parse_var("BULK_DEPLOY_ACK_WAIT_SECS", "200")?);

        Ok(Self {
            database_url,
            db_max_connections,
            nats_url,
            nats_stream_name,
            argocd,
            gitops,
            ref_chart_dir,
            cluster_component_dir,
            bulk_max_inflight,
            bulk_ack_wait,
        })
    }
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: &str) -> Result<T, ConfigError> {
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ConfigError::InvalidNumber(name))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// A numeric variable could not be parsed.
    #[error("Invalid number in environment variable: {0}")]
    InvalidNumber(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var_uses_default_when_unset() {
        let value: u64 = parse_var("APPSTORE_TEST_SURELY_UNSET_VAR", "42").unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_parse_var_rejects_garbage_default() {
        let err = parse_var::<u32>("APPSTORE_TEST_SURELY_UNSET_VAR", "ten").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber("APPSTORE_TEST_SURELY_UNSET_VAR")));
    }

    #[test]
    fn test_defaults() {
        let argocd = ArgoCdSettings::default();
        assert_eq!(argocd.namespace, "devtroncd");
        assert_eq!(argocd.timeout_fast, Duration::from_secs(10));
        assert_eq!(argocd.timeout_slow, Duration::from_secs(30));
        assert_eq!(GitOpsSettings::default().working_dir, PathBuf::from("/tmp/gitops/"));
    }
}
