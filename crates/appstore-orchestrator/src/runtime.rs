// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for appstore-orchestrator.
//!
//! [`OrchestratorRuntime`] owns the [`AppStoreService`] and the bulk deploy
//! subscriber. Collaborators are passed in as trait objects, so the same
//! runtime runs against PostgreSQL, Git and NATS in production and against
//! the in-memory backends in tests.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use appstore_core::PostgresRepository;
//! use appstore_orchestrator::argocd::HttpArgoCdClient;
//! use appstore_orchestrator::bus::NatsBus;
//! use appstore_orchestrator::git::LibGitClient;
//! use appstore_orchestrator::runtime::OrchestratorRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = sqlx::PgPool::connect("postgres://...").await?;
//!
//!     let runtime = OrchestratorRuntime::builder()
//!         .repository(Arc::new(PostgresRepository::new(pool)))
//!         .git(Arc::new(LibGitClient::new(gitops_settings)))
//!         .argocd(Arc::new(HttpArgoCdClient::new(argocd_settings)?))
//!         .bus(Arc::new(NatsBus::connect(nats_url, "ORCHESTRATOR", &subjects).await?))
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     let installed = runtime.service().install_app(request).await?;
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use appstore_core::Repository;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::argocd::ArgoCdClient;
use crate::bus::{DEFAULT_ACK_WAIT, DEFAULT_MAX_INFLIGHT, MessageBus};
use crate::deployment::{AppStoreService, ServiceSettings};
use crate::git::GitClient;
use crate::subscriber::{BulkDeployWorker, BulkDeployWorkerConfig};

/// Builder for creating an [`OrchestratorRuntime`].
pub struct OrchestratorRuntimeBuilder {
    repository: Option<Arc<dyn Repository>>,
    git: Option<Arc<dyn GitClient>>,
    argocd: Option<Arc<dyn ArgoCdClient>>,
    bus: Option<Arc<dyn MessageBus>>,
    settings: ServiceSettings,
    ack_wait: Duration,
    max_inflight: usize,
    subscriber: bool,
}

impl Default for OrchestratorRuntimeBuilder {
    fn default() -> Self {
        Self {
            repository: None,
            git: None,
            argocd: None,
            bus: None,
            settings: ServiceSettings::default(),
            ack_wait: DEFAULT_ACK_WAIT,
            max_inflight: DEFAULT_MAX_INFLIGHT,
            subscriber: true,
        }
    }
}

impl OrchestratorRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the installed-app repository (required).
    pub fn repository(mut self, repository: Arc<dyn Repository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Set the Git commit client (required).
    pub fn git(mut self, git: Arc<dyn GitClient>) -> Self {
        self.git = Some(git);
        self
    }

    /// Set the ArgoCD client (required).
    pub fn argocd(mut self, argocd: Arc<dyn ArgoCdClient>) -> Self {
        self.argocd = Some(argocd);
        self
    }

    /// Set the message bus (required).
    pub fn bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Set the directory holding the proxy chart template.
    ///
    /// Default: `scripts/devtron-reference-helm-charts`
    pub fn ref_chart_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.settings.ref_chart_dir = dir.into();
        self
    }

    /// Set the namespace ArgoCD keeps its applications in.
    ///
    /// Default: `devtroncd`
    pub fn argocd_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.settings.argocd_namespace = namespace.into();
        self
    }

    /// Set the directory of default cluster component values.
    ///
    /// Default: `scripts/devtron-cluster-components`
    pub fn cluster_component_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.settings.cluster_component_dir = dir.into();
        self
    }

    /// Set how long the bus waits for an ack before redelivering.
    ///
    /// Default: 200 seconds
    pub fn ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = ack_wait;
        self
    }

    /// Set how many bulk deployments run at once.
    ///
    /// Default: 3
    pub fn max_inflight(mut self, max_inflight: usize) -> Self {
        self.max_inflight = max_inflight;
        self
    }

    /// Enable or disable the bulk deploy subscriber.
    ///
    /// Default: enabled
    pub fn subscriber(mut self, enabled: bool) -> Self {
        self.subscriber = enabled;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<OrchestratorRuntimeConfig> {
        let repository = self
            .repository
            .ok_or_else(|| anyhow::anyhow!("repository is required"))?;
        let git = self.git.ok_or_else(|| anyhow::anyhow!("git is required"))?;
        let argocd = self
            .argocd
            .ok_or_else(|| anyhow::anyhow!("argocd is required"))?;
        let bus = self.bus.ok_or_else(|| anyhow::anyhow!("bus is required"))?;

        Ok(OrchestratorRuntimeConfig {
            repository,
            git,
            argocd,
            bus,
            settings: self.settings,
            worker: BulkDeployWorkerConfig {
                ack_wait: self.ack_wait,
                max_inflight: self.max_inflight,
            },
            subscriber: self.subscriber,
        })
    }
}

/// Configuration for an [`OrchestratorRuntime`].
pub struct OrchestratorRuntimeConfig {
    repository: Arc<dyn Repository>,
    git: Arc<dyn GitClient>,
    argocd: Arc<dyn ArgoCdClient>,
    bus: Arc<dyn MessageBus>,
    settings: ServiceSettings,
    worker: BulkDeployWorkerConfig,
    subscriber: bool,
}

impl OrchestratorRuntimeConfig {
    /// Start the runtime, spawning the bulk deploy subscriber.
    pub async fn start(self) -> Result<OrchestratorRuntime> {
        let service = Arc::new(AppStoreService::new(
            self.repository,
            self.git,
            self.argocd,
            self.bus,
            self.settings,
        ));

        let worker = if self.subscriber {
            let worker = BulkDeployWorker::new(service.clone(), self.worker);
            let shutdown = worker.shutdown_handle();
            let handle = tokio::spawn(async move { worker.run().await });
            Some((handle, shutdown))
        } else {
            None
        };

        info!(
            subscriber = worker.is_some(),
            argocd_namespace = %service.settings().argocd_namespace,
            "OrchestratorRuntime started"
        );

        Ok(OrchestratorRuntime { service, worker })
    }
}

/// A running orchestrator: the service plus its background subscriber.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct OrchestratorRuntime {
    service: Arc<AppStoreService>,
    worker: Option<(JoinHandle<crate::error::Result<()>>, Arc<Notify>)>,
}

impl OrchestratorRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> OrchestratorRuntimeBuilder {
        OrchestratorRuntimeBuilder::new()
    }

    /// The deployment service.
    pub fn service(&self) -> &Arc<AppStoreService> {
        &self.service
    }

    /// Gracefully shut down the runtime.
    ///
    /// Stops the subscriber, waits for in-flight deployments and tears down
    /// the ArgoCD session.
    pub async fn shutdown(self) -> Result<()> {
        info!("OrchestratorRuntime shutting down...");

        let mut result = Ok(());
        if let Some((handle, shutdown)) = self.worker {
            shutdown.notify_one();
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("Bulk deploy worker error during shutdown: {}", e);
                    result = Err(e.into());
                }
                Err(e) => {
                    error!("Bulk deploy worker task panicked: {}", e);
                    result = Err(anyhow::anyhow!("bulk deploy worker panicked: {}", e));
                }
            }
        }

        self.service.argocd().teardown().await;
        info!("OrchestratorRuntime shutdown complete");
        result
    }

    /// Check if the subscriber is still running.
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_none_or(|(handle, _)| !handle.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::argocd::MockArgoCdClient;
    use crate::bus::InMemoryBus;
    use crate::git::MockGitClient;
    use appstore_core::MemoryRepository;

    fn builder() -> OrchestratorRuntimeBuilder {
        OrchestratorRuntime::builder()
            .repository(Arc::new(MemoryRepository::new()))
            .git(Arc::new(MockGitClient::new()))
            .argocd(Arc::new(MockArgoCdClient::new()))
            .bus(Arc::new(InMemoryBus::new()))
    }

    #[test]
    fn test_build_requires_collaborators() {
        let err = OrchestratorRuntime::builder()
            .git(Arc::new(MockGitClient::new()))
            .build()
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "repository is required");
        assert!(builder().build().is_ok());
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let runtime = builder()
            .max_inflight(1)
            .ack_wait(Duration::from_secs(5))
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();
        assert!(runtime.is_running());
        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_runtime_without_subscriber() {
        let runtime = builder()
            .subscriber(false)
            .argocd_namespace("argocd")
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();
        assert_eq!(runtime.service().settings().argocd_namespace, "argocd");
        runtime.shutdown().await.unwrap();
    }
}
