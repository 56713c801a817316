// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! NATS JetStream implementation of [`MessageBus`].
//!
//! A queue group maps onto a shared durable pull consumer: every replica
//! pulls from the same consumer, so each message is handed to one of them.

use async_nats::jetstream::{self, consumer, stream};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::time::{Duration, timeout};
use tracing::{debug, info};

use super::{Acker, BusError, Delivery, MessageBus, Result, SubscribeOptions, Subscription};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// JetStream backed bus.
pub struct NatsBus {
    jetstream: jetstream::Context,
    stream_name: String,
}

impl NatsBus {
    /// Connect and make sure the stream holding `subjects` exists.
    pub async fn connect(url: &str, stream_name: &str, subjects: &[&str]) -> Result<Self> {
        info!("Connecting to NATS server at: {}", url);
        let client = timeout(CONNECT_TIMEOUT, async_nats::connect(url))
            .await
            .map_err(|_| BusError::Timeout("connect"))?
            .map_err(|e| BusError::Connect {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        let jetstream = jetstream::new(client);

        jetstream
            .get_or_create_stream(stream::Config {
                name: stream_name.to_string(),
                subjects: subjects.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            })
            .await
            .map_err(|e| BusError::Connect {
                url: url.to_string(),
                message: format!("stream {stream_name}: {e}"),
            })?;
        info!(stream = %stream_name, "Connected to NATS JetStream");

        Ok(Self {
            jetstream,
            stream_name: stream_name.to_string(),
        })
    }
}

/// Consumer names may not contain `.`.
fn consumer_name(durable_name: &str) -> String {
    durable_name.replace('.', "_")
}

struct NatsAcker(jetstream::Message);

#[async_trait]
impl Acker for NatsAcker {
    async fn ack(self: Box<Self>) -> Result<()> {
        self.0.ack().await.map_err(|e| BusError::Ack(e.to_string()))
    }
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let publish_error = |message: String| BusError::Publish {
            subject: topic.to_string(),
            message,
        };
        let ack = timeout(
            PUBLISH_TIMEOUT,
            self.jetstream.publish(topic.to_string(), payload.into()),
        )
        .await
        .map_err(|_| BusError::Timeout("publish"))?
        .map_err(|e| publish_error(e.to_string()))?;
        ack.await.map_err(|e| publish_error(e.to_string()))?;
        debug!(subject = %topic, "Published message");
        Ok(())
    }

    async fn queue_subscribe(
        &self,
        topic: &str,
        group: &str,
        options: SubscribeOptions,
    ) -> Result<Subscription> {
        let subscribe_error = |message: String| BusError::Subscribe {
            subject: topic.to_string(),
            message,
        };
        let stream = self
            .jetstream
            .get_stream(&self.stream_name)
            .await
            .map_err(|e| subscribe_error(e.to_string()))?;

        let name = consumer_name(&options.durable_name);
        let deliver_policy = if options.start_with_last_received {
            consumer::DeliverPolicy::Last
        } else {
            consumer::DeliverPolicy::New
        };
        let consumer: consumer::PullConsumer = stream
            .get_or_create_consumer(
                &name,
                consumer::pull::Config {
                    durable_name: Some(name.clone()),
                    description: Some(format!("queue group {group}")),
                    deliver_policy,
                    ack_policy: consumer::AckPolicy::Explicit,
                    ack_wait: options.ack_wait,
                    max_ack_pending: options.max_inflight as i64,
                    filter_subject: topic.to_string(),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| subscribe_error(e.to_string()))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| subscribe_error(e.to_string()))?;
        info!(subject = %topic, consumer = %name, group = %group, "Subscribed");

        let subject = topic.to_string();
        Ok(messages
            .map(move |message| match message {
                Ok(message) => {
                    let redeliveries = message
                        .info()
                        .map(|info| info.delivered.saturating_sub(1) as u64)
                        .unwrap_or(0);
                    Ok(Delivery::new(
                        message.subject.to_string(),
                        message.payload.to_vec(),
                        redeliveries,
                        Box::new(NatsAcker(message)),
                    ))
                }
                Err(e) => Err(BusError::Subscribe {
                    subject: subject.clone(),
                    message: e.to_string(),
                }),
            })
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumer_name_has_no_dots() {
        assert_eq!(
            consumer_name(super::super::BULK_APPSTORE_DEPLOY_DURABLE),
            "ORCHESTRATOR_APP-STORE_BULK-DEPLOY_DURABLE-1"
        );
    }
}
