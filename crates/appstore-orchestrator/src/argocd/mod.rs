// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! ArgoCD client contract.
//!
//! | Method | Timeout |
//! |--------|---------|
//! | `resource_tree` | caller controlled |
//! | `get_resource` | 60 s |
//! | `get`, `update`, `sync`, `patch`, `terminate_operation` | fast |
//! | `delete`, `create_application`, `register_repository` | slow |

pub mod http;
pub mod mock;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use self::http::HttpArgoCdClient;
pub use self::mock::{DeleteFailure, MockArgoCdClient, MockOp};
pub use self::types::{
    AppTemplate, Application, ApplicationTree, ResourceNode, ResourceQuery, ResourceRef,
};

/// Timeout of a single `get_resource` call.
pub const RESOURCE_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// ArgoCD client errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ArgoCdError {
    /// The application or resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The object already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The server rejected the credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The call did not finish in time.
    #[error("{0} timed out")]
    Timeout(&'static str),

    /// Any other error response.
    #[error("ArgoCD returned {status}: {message}")]
    Api {
        /// HTTP status
        status: u16,
        /// Server message
        message: String,
    },

    /// Transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// The configured server URL is unusable.
    #[error("invalid server URL: {0}")]
    InvalidUrl(String),

    /// Injected failure from the mock client.
    #[error("injected ArgoCD failure: {0}")]
    Injected(String),
}

impl ArgoCdError {
    /// Whether the error means the object is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ArgoCdError::NotFound(_))
    }

    /// Whether the error means the object already exists.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, ArgoCdError::AlreadyExists(_))
    }
}

/// Result type for ArgoCD calls.
pub type Result<T> = std::result::Result<T, ArgoCdError>;

/// Operations on ArgoCD applications, repositories and resource trees.
#[async_trait]
pub trait ArgoCdClient: Send + Sync {
    /// Live resource tree of an application.
    async fn resource_tree(&self, app_name: &str) -> Result<ApplicationTree>;

    /// Manifest of a single managed resource.
    async fn get_resource(&self, query: &ResourceQuery) -> Result<Value>;

    /// Fetch an application.
    async fn get(&self, app_name: &str) -> Result<Application>;

    /// Replace an application spec.
    async fn update(&self, app: &Application) -> Result<Application>;

    /// Trigger a sync.
    async fn sync(&self, app_name: &str) -> Result<()>;

    /// Apply a JSON merge patch.
    async fn patch(&self, app_name: &str, patch: &Value) -> Result<Application>;

    /// Stop the running operation.
    async fn terminate_operation(&self, app_name: &str) -> Result<()>;

    /// Delete an application and, when `cascade`, its resources.
    async fn delete(&self, app_name: &str, cascade: bool) -> Result<()>;

    /// Create an application. Returns its name.
    async fn create_application(&self, template: &AppTemplate) -> Result<String>;

    /// Register a chart repository, updating it when present.
    async fn register_repository(&self, repo_url: &str) -> Result<()>;

    /// Drop cached connections and credentials.
    async fn teardown(&self) {}
}
