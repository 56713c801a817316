// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker draining the bulk deploy topic.
//!
//! Each delivery names an installed app version. The worker resumes its
//! deployment and acks the message whatever the outcome: failures are
//! recorded on the row, and a redelivery of a finished deployment is a no-op.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::bus::{
    BULK_APPSTORE_DEPLOY_GROUP, BULK_APPSTORE_DEPLOY_TOPIC, BulkDeployPayload, DEFAULT_ACK_WAIT,
    DEFAULT_MAX_INFLIGHT, Delivery, SubscribeOptions,
};
use crate::deployment::{AppStoreService, SYSTEM_USER_ID};
use crate::error::Result;

/// Configuration for the bulk deploy worker.
#[derive(Debug, Clone)]
pub struct BulkDeployWorkerConfig {
    /// Time the bus waits for an ack before redelivering.
    pub ack_wait: Duration,
    /// Deployments processed at once.
    pub max_inflight: usize,
}

impl Default for BulkDeployWorkerConfig {
    fn default() -> Self {
        Self {
            ack_wait: DEFAULT_ACK_WAIT,
            max_inflight: DEFAULT_MAX_INFLIGHT,
        }
    }
}

/// Queue-group subscriber running `perform_deploy_stage` per message.
pub struct BulkDeployWorker {
    service: Arc<AppStoreService>,
    config: BulkDeployWorkerConfig,
    shutdown: Arc<Notify>,
}

impl BulkDeployWorker {
    /// Create a new bulk deploy worker.
    pub fn new(service: Arc<AppStoreService>, config: BulkDeployWorkerConfig) -> Self {
        Self {
            service,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Subscribe and process deliveries until shutdown.
    ///
    /// In-flight deployments are awaited before returning.
    pub async fn run(&self) -> Result<()> {
        let options =
            SubscribeOptions::bulk_deploy(self.config.ack_wait, self.config.max_inflight);
        let mut subscription = self
            .service
            .bus()
            .queue_subscribe(BULK_APPSTORE_DEPLOY_TOPIC, BULK_APPSTORE_DEPLOY_GROUP, options)
            .await?;

        let max_inflight = self.config.max_inflight.max(1);
        let permits = Arc::new(Semaphore::new(max_inflight));
        let mut tasks = JoinSet::new();

        info!(
            topic = BULK_APPSTORE_DEPLOY_TOPIC,
            group = BULK_APPSTORE_DEPLOY_GROUP,
            max_inflight,
            ack_wait_secs = self.config.ack_wait.as_secs(),
            "Bulk deploy worker started"
        );

        loop {
            let permit = tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Bulk deploy worker received shutdown signal");
                    break;
                }

                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    error!(error = %e, "Bulk deploy task panicked");
                }
            }

            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Bulk deploy worker received shutdown signal");
                    break;
                }

                next = subscription.next() => match next {
                    Some(Ok(delivery)) => {
                        let service = self.service.clone();
                        tasks.spawn(async move {
                            handle_delivery(&service, delivery).await;
                            drop(permit);
                        });
                    }
                    Some(Err(e)) => error!(error = %e, "Bulk deploy subscription error"),
                    None => {
                        warn!("Bulk deploy subscription closed");
                        break;
                    }
                },
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Bulk deploy task panicked");
            }
        }
        info!("Bulk deploy worker stopped");
        Ok(())
    }
}

/// Deploy the named version, then ack.
pub async fn handle_delivery(service: &AppStoreService, delivery: Delivery) {
    match delivery.decode::<BulkDeployPayload>() {
        Ok(payload) => {
            debug!(
                installed_app_version_id = payload.installed_app_version_id,
                redeliveries = delivery.redeliveries,
                "Bulk deploy message received"
            );
            if let Err(e) = service
                .perform_deploy_stage(payload.installed_app_version_id, SYSTEM_USER_ID)
                .await
            {
                error!(
                    installed_app_version_id = payload.installed_app_version_id,
                    error = %e,
                    "Bulk deploy failed"
                );
            }
        }
        Err(e) => error!(error = %e, "Undecodable bulk deploy payload, dropping"),
    }

    if let Err(e) = delivery.ack().await {
        warn!(error = %e, "Failed to ack bulk deploy message");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::argocd::MockArgoCdClient;
    use crate::bus::{Acker, InMemoryBus};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use crate::deployment::ServiceSettings;
    use crate::git::MockGitClient;
    use appstore_core::MemoryRepository;

    fn service(bus: &InMemoryBus) -> Arc<AppStoreService> {
        Arc::new(AppStoreService::new(
            Arc::new(MemoryRepository::new()),
            Arc::new(MockGitClient::new()),
            Arc::new(MockArgoCdClient::new()),
            Arc::new(bus.clone()),
            ServiceSettings::default(),
        ))
    }

    struct FlagAcker(Arc<AtomicBool>);

    #[async_trait]
    impl Acker for FlagAcker {
        async fn ack(self: Box<Self>) -> crate::bus::Result<()> {
            self.0.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn delivery(payload: &[u8], acked: &Arc<AtomicBool>) -> Delivery {
        Delivery::new(
            BULK_APPSTORE_DEPLOY_TOPIC.to_string(),
            payload.to_vec(),
            0,
            Box::new(FlagAcker(acked.clone())),
        )
    }

    #[tokio::test]
    async fn test_bad_and_unknown_payloads_are_acked() {
        let service = service(&InMemoryBus::new());

        let acked = Arc::new(AtomicBool::new(false));
        handle_delivery(&service, delivery(b"not json", &acked)).await;
        assert!(acked.load(Ordering::SeqCst));

        let acked = Arc::new(AtomicBool::new(false));
        handle_delivery(&service, delivery(br#"{"installedAppVersionId": 999}"#, &acked)).await;
        assert!(acked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_worker_stops_on_shutdown() {
        let bus = InMemoryBus::new();
        let worker = BulkDeployWorker::new(service(&bus), BulkDeployWorkerConfig::default());
        let shutdown = worker.shutdown_handle();
        let handle = tokio::spawn(async move { worker.run().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.notify_one();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker should stop")
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_default_config() {
        let config = BulkDeployWorkerConfig::default();
        assert_eq!(config.ack_wait, Duration::from_secs(200));
        assert_eq!(config.max_inflight, 3);
    }
}
