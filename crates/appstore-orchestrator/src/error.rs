// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for appstore-orchestrator.

use appstore_core::PersistenceError;
use appstore_core::status::InvalidTransition;
use thiserror::Error;

use crate::api::{ApiError, codes};
use crate::argocd::ArgoCdError;
use crate::bus::BusError;
use crate::chart::ChartError;
use crate::git::GitError;

/// Orchestrator errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Repository operation failed.
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// A status write was rejected by the state machine.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    /// Git commit client failed.
    #[error("Git error: {0}")]
    Git(#[from] GitError),

    /// ArgoCD client failed.
    #[error("ArgoCD error: {0}")]
    ArgoCd(#[from] ArgoCdError),

    /// Bus client failed.
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// Proxy chart materialisation failed.
    #[error("Chart error: {0}")]
    Chart(#[from] ChartError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An active app with this name exists.
    #[error("app already exists with name {0}")]
    AppAlreadyExists(String),

    /// The ArgoCD application could not be deleted.
    #[error("Could not delete application {app_name}: {source}")]
    DeleteFailed {
        /// ArgoCD application name
        app_name: String,
        /// Cause reported by ArgoCD
        #[source]
        source: ArgoCdError,
    },

    /// Resource tree of a deployed app could not be read.
    #[error("resource tree not found for {app_name}: {source}")]
    ResourceTreeNotFound {
        /// ArgoCD application name
        app_name: String,
        /// Cause reported by ArgoCD
        #[source]
        source: ArgoCdError,
    },

    /// A requested row does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request validation failed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type using the orchestrator Error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Map onto the API error taxonomy.
    pub fn to_api_error(&self) -> ApiError {
        let internal = self.to_string();
        match self {
            Error::InvalidRequest(_) => {
                ApiError::new(400, codes::VALIDATION_FAILED, internal, "invalid request")
            }
            Error::NotFound(what) => {
                ApiError::new(404, codes::NOT_FOUND, internal, format!("{what} not found"))
            }
            Error::Persistence(e) if e.is_not_found() => {
                ApiError::new(404, codes::NOT_FOUND, internal, "requested resource not found")
            }
            Error::Persistence(PersistenceError::Conflict(_)) => {
                ApiError::new(409, codes::VALIDATION_FAILED, internal, "conflicting request")
            }
            Error::AppAlreadyExists(name) => ApiError::new(
                409,
                codes::APP_ALREADY_EXISTS,
                internal,
                format!("app already exists with name {name}"),
            ),
            Error::InvalidTransition(e) => ApiError::new(
                409,
                codes::VALIDATION_FAILED,
                internal,
                format!("deployment cannot move from {} to {}", e.from, e.to),
            ),
            Error::Git(_) => {
                ApiError::new(500, codes::GIT_ERROR, internal, "failed to commit chart to git")
            }
            Error::ArgoCd(e) if e.is_not_found() => {
                ApiError::new(404, codes::NOT_FOUND, internal, "application not found in argocd")
            }
            Error::ArgoCd(_) => {
                ApiError::new(500, codes::ACD_ERROR, internal, "argocd request failed")
            }
            Error::DeleteFailed { .. } => {
                ApiError::new(500, codes::ACD_ERROR, internal, "Could not delete application")
            }
            Error::ResourceTreeNotFound { .. } => ApiError::new(
                404,
                codes::APP_DETAIL_RESOURCE_TREE_NOT_FOUND,
                internal,
                "resource tree not found",
            ),
            Error::Bus(_) => {
                ApiError::new(500, codes::BUS_ERROR, internal, "failed to enqueue deployment")
            }
            Error::Config(_)
            | Error::Persistence(_)
            | Error::Chart(_)
            | Error::Io(_) => {
                ApiError::new(500, codes::INTERNAL_ERROR, internal, "internal server error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appstore_core::DeploymentStatus;

    #[test]
    fn test_app_already_exists_mapping() {
        let api = Error::AppAlreadyExists("redis".to_string()).to_api_error();
        assert_eq!(api.http_status, 409);
        assert_eq!(api.code, "AppAlreadyExists");
        assert_eq!(api.user_message, "app already exists with name redis");
    }

    #[test]
    fn test_collaborator_errors_keep_internal_message() {
        let api = Error::from(GitError::Network("connection reset".to_string())).to_api_error();
        assert_eq!(api.code, "GitError");
        assert_eq!(api.http_status, 500);
        assert!(api.internal_message.contains("connection reset"));

        let api = Error::from(ArgoCdError::NotFound("web-prod".to_string())).to_api_error();
        assert_eq!((api.http_status, api.code.as_str()), (404, "NotFound"));

        let api = Error::from(PersistenceError::not_found("installed_app", 7)).to_api_error();
        assert_eq!(api.http_status, 404);
    }

    #[test]
    fn test_invalid_transition_is_a_client_error() {
        let err = DeploymentStatus::DeploySuccess
            .transition(DeploymentStatus::GitError)
            .unwrap_err();
        let api = Error::from(err).to_api_error();
        assert_eq!(api.http_status, 409);
        assert_eq!(api.user_message, "deployment cannot move from DEPLOY_SUCCESS to GIT_ERROR");
    }
}
