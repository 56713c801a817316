// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! App Store Orchestrator server
//!
//! Runs the bulk deploy subscriber against PostgreSQL, the GitOps provider,
//! ArgoCD and NATS until interrupted.

use std::sync::Arc;
use tracing::{info, warn};

use appstore_core::PostgresRepository;
use appstore_orchestrator::argocd::HttpArgoCdClient;
use appstore_orchestrator::bus::{BULK_APPSTORE_DEPLOY_TOPIC, NatsBus};
use appstore_orchestrator::config::Config;
use appstore_orchestrator::git::LibGitClient;
use appstore_orchestrator::runtime::OrchestratorRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "appstore_orchestrator=info,appstore_core=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        argocd = %config.argocd.server_url,
        gitops_host = %config.gitops.host,
        nats = %config.nats_url,
        "Starting App Store Orchestrator"
    );

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await?;
    info!("Connected to database");

    appstore_core::migrations::run(&pool).await?;
    info!("Database migrations applied");

    let argocd = HttpArgoCdClient::new(config.argocd.clone())?;
    let bus = NatsBus::connect(
        &config.nats_url,
        &config.nats_stream_name,
        &[BULK_APPSTORE_DEPLOY_TOPIC],
    )
    .await?;
    info!(stream = %config.nats_stream_name, "Connected to NATS");

    let runtime = OrchestratorRuntime::builder()
        .repository(Arc::new(PostgresRepository::new(pool)))
        .git(Arc::new(LibGitClient::new(config.gitops.clone())))
        .argocd(Arc::new(argocd))
        .bus(Arc::new(bus))
        .ref_chart_dir(&config.ref_chart_dir)
        .argocd_namespace(&config.argocd.namespace)
        .cluster_component_dir(&config.cluster_component_dir)
        .ack_wait(config.bulk_ack_wait)
        .max_inflight(config.bulk_max_inflight)
        .build()?
        .start()
        .await?;

    info!("Orchestrator ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("App Store Orchestrator shut down");

    Ok(())
}
