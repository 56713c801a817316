// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Durable message bus used by bulk deploys.
//!
//! Delivery is at least once: a message that is not acked within the ack
//! wait is delivered again, possibly to another member of the queue group.

pub mod memory;
pub mod nats;

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::memory::InMemoryBus;
pub use self::nats::NatsBus;

/// Subject bulk deploy payloads are published on.
pub const BULK_APPSTORE_DEPLOY_TOPIC: &str = "ORCHESTRATOR.APP-STORE.BULK-DEPLOY";

/// Queue group shared by all orchestrator replicas.
pub const BULK_APPSTORE_DEPLOY_GROUP: &str = "ORCHESTRATOR.APP-STORE.BULK-DEPLOY-GROUP-1";

/// Durable consumer name, so restarts resume from the last ack.
pub const BULK_APPSTORE_DEPLOY_DURABLE: &str = "ORCHESTRATOR.APP-STORE.BULK-DEPLOY.DURABLE-1";

/// Default redelivery deadline.
pub const DEFAULT_ACK_WAIT: Duration = Duration::from_secs(200);

/// Default number of unacked deliveries per subscriber.
pub const DEFAULT_MAX_INFLIGHT: usize = 3;

/// Payload of a bulk deploy message. The handler re-reads the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkDeployPayload {
    pub installed_app_version_id: i32,
}

/// Bus errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BusError {
    #[error("failed to connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("publish to {subject} failed: {message}")]
    Publish { subject: String, message: String },

    #[error("subscribe to {subject} failed: {message}")]
    Subscribe { subject: String, message: String },

    #[error("ack failed: {0}")]
    Ack(String),

    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("{0} timed out")]
    Timeout(&'static str),
}

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Subscription settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Consumer name kept across restarts
    pub durable_name: String,
    /// Start from the last stored message instead of new ones only
    pub start_with_last_received: bool,
    /// Redelivery deadline for unacked messages
    pub ack_wait: Duration,
    /// Maximum unacked deliveries at once
    pub max_inflight: usize,
}

impl SubscribeOptions {
    /// Options of the bulk deploy subscription.
    pub fn bulk_deploy(ack_wait: Duration, max_inflight: usize) -> Self {
        Self {
            durable_name: BULK_APPSTORE_DEPLOY_DURABLE.to_string(),
            start_with_last_received: true,
            ack_wait,
            max_inflight,
        }
    }
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self::bulk_deploy(DEFAULT_ACK_WAIT, DEFAULT_MAX_INFLIGHT)
    }
}

/// Acknowledges one delivery.
#[async_trait]
pub trait Acker: Send {
    async fn ack(self: Box<Self>) -> Result<()>;
}

/// A delivered message awaiting ack.
pub struct Delivery {
    /// Subject the message was published on
    pub subject: String,
    /// Raw payload
    pub payload: Vec<u8>,
    /// Number of earlier deliveries of the same message
    pub redeliveries: u64,
    acker: Box<dyn Acker>,
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("subject", &self.subject)
            .field("payload_len", &self.payload.len())
            .field("redeliveries", &self.redeliveries)
            .finish()
    }
}

impl Delivery {
    /// Wrap a message with its acker.
    pub fn new(subject: String, payload: Vec<u8>, redeliveries: u64, acker: Box<dyn Acker>) -> Self {
        Self {
            subject,
            payload,
            redeliveries,
            acker,
        }
    }

    /// Decode the JSON payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Ack the message so it is not redelivered.
    pub async fn ack(self) -> Result<()> {
        self.acker.ack().await
    }
}

/// Stream of deliveries of one subscription.
pub type Subscription = BoxStream<'static, Result<Delivery>>;

/// Publish/subscribe over a durable topic.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish `payload` on `topic`. Returns once the bus stored the message.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Join queue group `group` on `topic`. Each message goes to one member.
    async fn queue_subscribe(
        &self,
        topic: &str,
        group: &str,
        options: SubscribeOptions,
    ) -> Result<Subscription>;
}

/// Encode and publish a bulk deploy payload.
pub async fn publish_bulk_deploy(bus: &dyn MessageBus, installed_app_version_id: i32) -> Result<()> {
    let payload = serde_json::to_vec(&BulkDeployPayload {
        installed_app_version_id,
    })?;
    bus.publish(BULK_APPSTORE_DEPLOY_TOPIC, payload).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_wire_format() {
        let json = serde_json::to_string(&BulkDeployPayload {
            installed_app_version_id: 17,
        })
        .unwrap();
        assert_eq!(json, r#"{"installedAppVersionId":17}"#);
    }

    #[test]
    fn test_bulk_deploy_options() {
        let options = SubscribeOptions::default();
        assert_eq!(options.durable_name, BULK_APPSTORE_DEPLOY_DURABLE);
        assert!(options.start_with_last_received);
        assert_eq!(options.ack_wait, Duration::from_secs(200));
        assert_eq!(options.max_inflight, 3);
    }
}
