// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for appstore-core.

use thiserror::Error;

use crate::status::InvalidTransition;

/// Persistence errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PersistenceError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Applying migrations failed.
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// A row expected to exist was not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Table or entity name.
        entity: &'static str,
        /// Key that was looked up.
        id: String,
    },

    /// A write would violate a uniqueness rule.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A status write was rejected by the state machine.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    /// Injected failure from the in-memory backend.
    #[error("Injected failure: {0}")]
    Injected(String),
}

impl PersistenceError {
    /// Build a [`PersistenceError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        PersistenceError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether this is a missing-row error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PersistenceError::NotFound { .. })
    }
}

/// Result type using [`PersistenceError`].
pub type Result<T> = std::result::Result<T, PersistenceError>;
