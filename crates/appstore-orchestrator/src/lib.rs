// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! App Store Orchestrator - GitOps Deployment of Helm Charts
//!
//! This crate installs, upgrades and deletes app-store Helm charts on
//! Kubernetes clusters. A deployment is a proxy chart committed to a GitOps
//! repository plus an ArgoCD application pointing at it; progress is
//! recorded on the installed-app row so every deployment can be resumed.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        REST layer / CLI callers                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    AppStoreService (This Crate)                          │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐     │
//! │  │   Install   │  │    Bulk     │  │  Upgrade /  │  │   Resource  │     │
//! │  │  DB/GIT/ACD │  │   Deploy    │  │   Delete    │  │    Tree     │     │
//! │  └─────────────┘  └─────────────┘  └─────────────┘  └─────────────┘     │
//! └─────────────────────────────────────────────────────────────────────────┘
//!        │               │      ▲              │                 │
//!        │       publish │      │ subscribe    │ commit          │ apps, tree
//!        ▼               ▼      │              ▼                 ▼
//! ┌─────────────┐  ┌───────────────────┐  ┌─────────────┐  ┌─────────────┐
//! │ PostgreSQL  │  │  NATS JetStream   │  │  GitOps     │  │   ArgoCD    │
//! │ (apps, rows │  │ BULK-DEPLOY topic │  │ repository  │  │  REST API   │
//! │  history)   │  └───────────────────┘  └─────────────┘  └─────────────┘
//! └─────────────┘
//! ```
//!
//! # Deployment Status State Machine
//!
//! ```text
//!   DEPLOY_INIT ──► ENQUEUED ──► DEPLOY_INIT (worker picked up)
//!       │  ▲  │
//!       │  │  └──► QUE_ERROR ──► DEPLOY_INIT
//!       │  │
//!       ├──┴──────► GIT_ERROR ──► DEPLOY_INIT
//!       ▼
//!   GIT_SUCCESS ──► ACD_ERROR ──► GIT_SUCCESS
//!       │
//!       ▼
//!   ACD_SUCCESS ──► DEPLOY_SUCCESS
//! ```
//!
//! Every leg starts from the status its predecessor left behind, so a
//! redelivered bulk deploy message or a retried install resumes where the
//! last attempt stopped.
//!
//! # Configuration
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `APPSTORE_DATABASE_URL` | Yes | - | PostgreSQL connection string |
//! | `NATS_URL` | No | `nats://127.0.0.1:4222` | NATS server |
//! | `ARGOCD_SERVER_URL` | Yes | - | ArgoCD API base URL |
//! | `ARGOCD_TOKEN` | No | - | Static bearer token |
//! | `GITOPS_HOST` | Yes | - | Git provider base URL or local directory |
//! | `GIT_WORKING_DIR` | No | `/tmp/gitops/` | Root of local mirrors |
//! | `REF_CHART_DIR` | No | `scripts/devtron-reference-helm-charts` | Proxy chart template |
//! | `BULK_DEPLOY_MAX_INFLIGHT` | No | `3` | Concurrent bulk deployments |
//!
//! # Modules
//!
//! - [`deployment`]: single installs and the resumable deploy stage
//! - [`bulk`]: chart group installs and default cluster components
//! - [`upgrade`]: value edits, chart upgrades and deletes
//! - [`queries`]: read paths and the resource tree endpoint
//! - [`git`], [`argocd`], [`bus`]: external collaborators behind traits
//! - [`tree`]: resource tree analysis
//! - [`runtime`]: embeddable runtime with the bulk deploy subscriber

/// Response envelope and request/response DTOs.
pub mod api;

/// ArgoCD application and repository client.
pub mod argocd;

/// Chart group installs.
pub mod bulk;

/// Message bus abstraction with NATS and in-memory backends.
pub mod bus;

/// Proxy chart templating.
pub mod chart;

/// Configuration loaded from environment variables.
pub mod config;

/// Install pipeline and deployment resume.
pub mod deployment;

/// Error types for orchestrator operations.
pub mod error;

/// GitOps repository client.
pub mod git;

/// Read operations over installed apps.
pub mod queries;

/// Embeddable runtime.
pub mod runtime;

/// Bulk deploy queue subscriber.
pub mod subscriber;

/// Resource tree analysis.
pub mod tree;

/// Upgrades and deletes.
pub mod upgrade;

pub use deployment::{AppStoreService, ServiceSettings};
pub use error::{Error, Result};
pub use runtime::{OrchestratorRuntime, OrchestratorRuntimeBuilder};
