// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process [`MessageBus`] with queue groups and ack-wait redelivery.
//!
//! Messages published to a topic nobody subscribes to yet are kept and handed
//! to the first queue group that joins.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::debug;

use super::{Acker, BusError, Delivery, MessageBus, Result, SubscribeOptions, Subscription};

#[derive(Debug, Clone)]
struct Message {
    subject: String,
    payload: Vec<u8>,
}

struct Group {
    topic: String,
    options: SubscribeOptions,
    members: Vec<mpsc::UnboundedSender<Delivery>>,
    next_member: usize,
    pending: VecDeque<(Message, u64)>,
}

#[derive(Default)]
struct Topics {
    groups: HashMap<(String, String), Group>,
    backlog: HashMap<String, Vec<Message>>,
    published: Vec<Message>,
}

#[derive(Default)]
struct Inner {
    topics: Mutex<Topics>,
    fail_publishes: AtomicUsize,
    unacked: AtomicUsize,
}

impl Inner {
    fn topics(&self) -> MutexGuard<'_, Topics> {
        self.topics.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Bus living in the current process.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    inner: Arc<Inner>,
}

struct MemoryAcker {
    acked: Arc<AtomicBool>,
    inner: Arc<Inner>,
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(self: Box<Self>) -> Result<()> {
        if !self.acked.swap(true, Ordering::SeqCst) {
            self.inner.unacked.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl InMemoryBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` publishes.
    pub fn fail_next_publishes(&self, times: usize) {
        self.inner.fail_publishes.store(times, Ordering::SeqCst);
    }

    /// Payloads published on `topic`, in order.
    pub fn published(&self, topic: &str) -> Vec<Vec<u8>> {
        self.inner
            .topics()
            .published
            .iter()
            .filter(|m| m.subject == topic)
            .map(|m| m.payload.clone())
            .collect()
    }

    /// Deliveries handed out and not acked yet.
    pub fn unacked(&self) -> usize {
        self.inner.unacked.load(Ordering::SeqCst)
    }

    fn take_publish_failure(&self) -> bool {
        self.inner
            .fail_publishes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Hand `message` to the next live member of `key`, or park it on the group.
fn deliver(inner: &Arc<Inner>, key: &(String, String), message: Message, redeliveries: u64) {
    let mut topics = inner.topics();
    let Some(group) = topics.groups.get_mut(key) else {
        return;
    };

    let mut message = Some(message);
    while !group.members.is_empty() {
        let index = group.next_member % group.members.len();
        let Some(current) = message.take() else {
            return;
        };
        let acked = Arc::new(AtomicBool::new(false));
        let delivery = Delivery::new(
            current.subject.clone(),
            current.payload.clone(),
            redeliveries,
            Box::new(MemoryAcker {
                acked: acked.clone(),
                inner: inner.clone(),
            }),
        );
        if group.members[index].send(delivery).is_ok() {
            group.next_member = index + 1;
            inner.unacked.fetch_add(1, Ordering::SeqCst);
            schedule_redelivery(inner, key, current, redeliveries, acked, group.options.ack_wait);
            return;
        }
        group.members.remove(index);
        message = Some(current);
    }

    if let Some(message) = message {
        group.pending.push_back((message, redeliveries));
    }
}

fn schedule_redelivery(
    inner: &Arc<Inner>,
    key: &(String, String),
    message: Message,
    redeliveries: u64,
    acked: Arc<AtomicBool>,
    ack_wait: std::time::Duration,
) {
    let inner = inner.clone();
    let key = key.clone();
    tokio::spawn(async move {
        tokio::time::sleep(ack_wait).await;
        if acked.swap(true, Ordering::SeqCst) {
            return;
        }
        inner.unacked.fetch_sub(1, Ordering::SeqCst);
        debug!(subject = %message.subject, redeliveries = redeliveries + 1, "Ack wait expired, redelivering");
        deliver(&inner, &key, message, redeliveries + 1);
    });
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        if self.take_publish_failure() {
            return Err(BusError::Publish {
                subject: topic.to_string(),
                message: "injected failure".to_string(),
            });
        }

        let message = Message {
            subject: topic.to_string(),
            payload,
        };
        let keys: Vec<(String, String)> = {
            let mut topics = self.inner.topics();
            topics.published.push(message.clone());
            let keys: Vec<_> = topics
                .groups
                .iter()
                .filter(|(_, g)| g.topic == topic)
                .map(|(k, _)| k.clone())
                .collect();
            if keys.is_empty() {
                topics
                    .backlog
                    .entry(topic.to_string())
                    .or_default()
                    .push(message.clone());
            }
            keys
        };

        for key in keys {
            deliver(&self.inner, &key, message.clone(), 0);
        }
        Ok(())
    }

    async fn queue_subscribe(
        &self,
        topic: &str,
        group: &str,
        options: SubscribeOptions,
    ) -> Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let key = (topic.to_string(), group.to_string());

        let replay: Vec<(Message, u64)> = {
            let mut topics = self.inner.topics();
            let backlog = topics.backlog.remove(topic).unwrap_or_default();
            let entry = topics.groups.entry(key.clone()).or_insert_with(|| Group {
                topic: topic.to_string(),
                options,
                members: Vec::new(),
                next_member: 0,
                pending: VecDeque::new(),
            });
            entry.members.push(tx);
            let mut replay: Vec<_> = entry.pending.drain(..).collect();
            replay.extend(backlog.into_iter().map(|m| (m, 0)));
            replay
        };
        for (message, redeliveries) in replay {
            deliver(&self.inner, &key, message, redeliveries);
        }

        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|delivery| (Ok(delivery), rx))
        })
        .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BULK_APPSTORE_DEPLOY_GROUP, BULK_APPSTORE_DEPLOY_TOPIC, BulkDeployPayload};
    use std::time::Duration;

    fn options(ack_wait_secs: u64) -> SubscribeOptions {
        SubscribeOptions::bulk_deploy(Duration::from_secs(ack_wait_secs), 3)
    }

    #[tokio::test]
    async fn test_backlog_goes_to_first_group() {
        let bus = InMemoryBus::new();
        crate::bus::publish_bulk_deploy(&bus, 5).await.unwrap();

        let mut sub = bus
            .queue_subscribe(BULK_APPSTORE_DEPLOY_TOPIC, BULK_APPSTORE_DEPLOY_GROUP, options(200))
            .await
            .unwrap();
        let delivery = sub.next().await.unwrap().unwrap();
        let payload: BulkDeployPayload = delivery.decode().unwrap();
        assert_eq!(payload.installed_app_version_id, 5);
        delivery.ack().await.unwrap();
        assert_eq!(bus.unacked(), 0);
    }

    #[tokio::test]
    async fn test_queue_group_members_share_messages() {
        let bus = InMemoryBus::new();
        let mut a = bus
            .queue_subscribe("t", "g", options(200))
            .await
            .unwrap();
        let mut b = bus
            .queue_subscribe("t", "g", options(200))
            .await
            .unwrap();

        bus.publish("t", b"1".to_vec()).await.unwrap();
        bus.publish("t", b"2".to_vec()).await.unwrap();

        let first = a.next().await.unwrap().unwrap();
        let second = b.next().await.unwrap().unwrap();
        assert_eq!(first.payload, b"1");
        assert_eq!(second.payload, b"2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacked_message_is_redelivered_after_ack_wait() {
        let bus = InMemoryBus::new();
        let mut sub = bus.queue_subscribe("t", "g", options(200)).await.unwrap();
        bus.publish("t", b"x".to_vec()).await.unwrap();

        let first = sub.next().await.unwrap().unwrap();
        assert_eq!(first.redeliveries, 0);
        drop(first);

        tokio::time::sleep(Duration::from_secs(201)).await;
        let again = sub.next().await.unwrap().unwrap();
        assert_eq!(again.redeliveries, 1);
        again.ack().await.unwrap();

        tokio::time::sleep(Duration::from_secs(500)).await;
        assert_eq!(bus.unacked(), 0);
    }

    #[tokio::test]
    async fn test_injected_publish_failure() {
        let bus = InMemoryBus::new();
        bus.fail_next_publishes(1);
        assert!(bus.publish("t", b"x".to_vec()).await.is_err());
        assert!(bus.publish("t", b"y".to_vec()).await.is_ok());
        assert_eq!(bus.published("t"), vec![b"y".to_vec()]);
    }
}
