// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! App Store Core - Installed-App Persistence
//!
//! This crate owns the durable state of app-store deployments: the installed
//! apps, their versions, chart group bookkeeping and the deployment status
//! state machine. It is shared by the orchestrator service and its tests.
//!
//! # Data Model
//!
//! ```text
//! app (1) ──── (1) installed_apps (1) ──── (n) installed_app_versions
//!                      │    │                        │ (exactly one active)
//!                      │    └── chart_group_deployment
//!                      └─────── cluster_installed_apps
//!
//! environment ── cluster        app_store_application_version ── app_store ── chart_repo
//! ```
//!
//! # Deployment Status
//!
//! ```text
//!   DEPLOY_INIT ──► ENQUEUED ──► GIT_SUCCESS ──► ACD_SUCCESS ──► DEPLOY_SUCCESS
//!        │             │              │               │                │
//!        ▼             ▼              ▼               ▼                │
//!    QUE_ERROR      GIT_ERROR      ACD_ERROR      (re-deploy) ◄────────┘
//! ```
//!
//! Statuses are stored as integers; see [`status::DeploymentStatus`] for the
//! wire values and the full transition table.
//!
//! # Backends
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`persistence::PostgresRepository`] | Production, migrations in `./migrations` |
//! | [`persistence::MemoryRepository`] | Tests, with fault injection |
//!
//! # Transactions
//!
//! Every multi-row write runs inside a [`persistence::TxContext`] opened by the
//! caller. The repository never commits on its own.

#![deny(missing_docs)]

/// Error types for persistence operations.
pub mod error;

/// Embedded PostgreSQL migrations.
pub mod migrations;

/// Row types and join views.
pub mod models;

/// Repository and transaction traits with PostgreSQL and in-memory backends.
pub mod persistence;

/// Deployment status state machine and reference value kinds.
pub mod status;

pub use error::PersistenceError;
pub use persistence::{MemoryRepository, PostgresRepository, Repository, Transaction, TxContext};
pub use status::{DeploymentStatus, ReferenceValueKind};
