// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// This file is part of Conduit.
//
// Conduit is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// Conduit is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with Conduit. If not, see <https://www.gnu.org/licenses/>.

//! In-memory partitioned broker using Tokio MPSC channels

use crate::client::{Client, Handler, MqError, MqResult};
use crate::config::MemoryConfig;
use crate::delay::spawn_delayed;
use crate::message::{deliver, Delivery, Extra, MessageRef, Metadata, NoopAck};
use crate::observability::{record_dropped, record_publish};
use crate::options::{PublishOptions, SubscribeOptions};
use crate::partition::{partition_for_key, target_partitions};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const BACKEND: &str = "memory";

/// One (group, partition) channel. Subscribers of the same group share the
/// receiver and compete for messages.
struct PartitionChannel {
    tx: mpsc::Sender<MessageRef>,
    rx: Arc<Mutex<mpsc::Receiver<MessageRef>>>,
}

struct ConsumerGroup {
    name: String,
    partitions: Vec<PartitionChannel>,
    token: CancellationToken,
}

impl ConsumerGroup {
    fn new(name: String, partition_count: usize, buffer: usize, root: &CancellationToken) -> Self {
        let partitions = (0..partition_count)
            .map(|_| {
                let (tx, rx) = mpsc::channel(buffer);
                PartitionChannel {
                    tx,
                    rx: Arc::new(Mutex::new(rx)),
                }
            })
            .collect();
        Self {
            name,
            partitions,
            token: root.child_token(),
        }
    }
}

struct TopicState {
    partition_count: usize,
    groups: Vec<ConsumerGroup>,
    group_index: HashMap<String, usize>,
}

impl TopicState {
    fn new(partition_count: usize) -> Self {
        Self {
            partition_count,
            groups: Vec::new(),
            group_index: HashMap::new(),
        }
    }

    /// Partition of `key` and the sender of that partition in every group
    fn route(&self, key: &str) -> (usize, Vec<(String, mpsc::Sender<MessageRef>)>) {
        let partition = partition_for_key(key, self.partition_count);
        let senders = self
            .groups
            .iter()
            .map(|g| (g.name.clone(), g.partitions[partition].tx.clone()))
            .collect();
        (partition, senders)
    }

    fn remove_group(&mut self, name: &str) -> bool {
        let Some(index) = self.group_index.remove(name) else {
            return false;
        };
        let group = self.groups.remove(index);
        group.token.cancel();
        for i in self.group_index.values_mut() {
            if *i > index {
                *i -= 1;
            }
        }
        true
    }
}

struct Inner {
    config: MemoryConfig,
    topics: RwLock<HashMap<String, TopicState>>,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

/// In-process partitioned broker
///
/// ## Purpose
/// Reference implementation of [`Client`]: every consumer group of a topic
/// owns one bounded channel per partition, and a publish fans out to the
/// matching partition channel of each group.
///
/// ## Design Decisions
/// - **Lossy under backpressure**: a full partition buffer drops the message
///   for that group only
/// - **At-most-once**: ack/nack are no-ops, handler errors are logged
/// - **Lazy topics**: created on first publish or subscribe
/// - **Non-Persistent**: messages published before a group exists are not
///   delivered to it
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Broker with default partitions (4) and buffer (100)
    pub fn new() -> Self {
        Self::with_config(MemoryConfig::default())
    }

    /// Broker with explicit settings. Zero partitions or a zero buffer fall
    /// back to the defaults, as with the [`MemoryConfig`] builders.
    pub fn with_config(config: MemoryConfig) -> Self {
        let config = MemoryConfig::default()
            .with_partitions(config.default_partitions)
            .with_buffer(config.partition_buffer);
        Self {
            inner: Arc::new(Inner {
                config,
                topics: RwLock::new(HashMap::new()),
                closed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Create a topic with a fixed partition count before first use.
    ///
    /// ## Errors
    /// - [`MqError::InvalidConfiguration`]: zero partitions, or the topic
    ///   already exists with a different count
    pub async fn create_topic(&self, topic: &str, partitions: usize) -> MqResult<()> {
        self.inner.ensure_open()?;
        if partitions == 0 {
            return Err(MqError::InvalidConfiguration(
                "partition count must be positive".to_string(),
            ));
        }
        let mut topics = self.inner.topics.write().await;
        match topics.get(topic) {
            Some(existing) if existing.partition_count != partitions => {
                Err(MqError::InvalidConfiguration(format!(
                    "topic '{}' already exists with {} partitions",
                    topic, existing.partition_count
                )))
            }
            Some(_) => Ok(()),
            None => {
                topics.insert(topic.to_string(), TopicState::new(partitions));
                Ok(())
            }
        }
    }

    /// Partition count of an existing topic
    pub async fn partition_count(&self, topic: &str) -> Option<usize> {
        self.inner
            .topics
            .read()
            .await
            .get(topic)
            .map(|t| t.partition_count)
    }

    /// Names of all known topics, sorted
    pub async fn list_topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.topics.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Consumer groups of a topic in creation order
    pub async fn list_groups(&self, topic: &str) -> Vec<String> {
        self.inner
            .topics
            .read()
            .await
            .get(topic)
            .map(|t| t.groups.iter().map(|g| g.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Remove a consumer group; its consumer tasks stop. Returns whether it existed.
    pub async fn remove_group(&self, topic: &str, group: &str) -> bool {
        let removed = match self.inner.topics.write().await.get_mut(topic) {
            Some(state) => state.remove_group(group),
            None => false,
        };
        if removed {
            debug!(topic = %topic, group = %group, "Removed consumer group");
        }
        removed
    }

    /// Remove a topic and all of its groups. Returns whether it existed.
    pub async fn remove_topic(&self, topic: &str) -> bool {
        match self.inner.topics.write().await.remove(topic) {
            Some(state) => {
                for group in &state.groups {
                    group.token.cancel();
                }
                debug!(topic = %topic, groups = state.groups.len(), "Removed topic");
                true
            }
            None => false,
        }
    }
}

impl Inner {
    fn ensure_open(&self) -> MqResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(MqError::BrokerClosed)
        } else {
            Ok(())
        }
    }

    async fn publish_now(&self, topic: &str, payload: Vec<u8>, key: String, extra: Extra) -> MqResult<()> {
        self.ensure_open()?;

        let existing = self.topics.read().await.get(topic).map(|state| state.route(&key));
        let (partition, senders) = match existing {
            Some(routed) => routed,
            None => self
                .topics
                .write()
                .await
                .entry(topic.to_string())
                .or_insert_with(|| TopicState::new(self.config.default_partitions))
                .route(&key),
        };

        let metadata = Metadata {
            topic: topic.to_string(),
            key,
            partition,
            message_id: ulid::Ulid::new().to_string(),
            timestamp: SystemTime::now(),
            extra: if extra.is_empty() { None } else { Some(extra) },
        };
        record_publish(topic, &metadata.key, partition, BACKEND);

        let message: MessageRef = Arc::new(Delivery::new(payload, metadata, NoopAck));
        for (group, tx) in senders {
            if tx.try_send(message.clone()).is_err() {
                record_dropped(topic, &group, partition, BACKEND);
            }
        }
        Ok(())
    }
}

async fn consume_loop(
    topic: String,
    group: String,
    partition: usize,
    rx: Arc<Mutex<mpsc::Receiver<MessageRef>>>,
    handler: Arc<dyn Handler>,
    opts: SubscribeOptions,
    stop: CancellationToken,
) {
    debug!(topic = %topic, group = %group, partition = partition, "Consumer started");
    loop {
        let message = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            next = async { rx.lock().await.recv().await } => match next {
                Some(message) => message,
                None => break,
            },
        };

        deliver(message, handler.as_ref(), &opts, BACKEND).await;
    }
    debug!(topic = %topic, group = %group, partition = partition, "Consumer stopped");
}

#[async_trait]
impl Client for MemoryBroker {
    async fn publish(&self, topic: &str, payload: Vec<u8>, opts: PublishOptions) -> MqResult<()> {
        self.inner.ensure_open()?;
        let PublishOptions { key, delay, extra } = opts;

        if !delay.is_zero() {
            let inner = self.inner.clone();
            let owned_topic = topic.to_string();
            spawn_delayed(
                BACKEND,
                topic.to_string(),
                delay,
                self.inner.shutdown.clone(),
                async move { inner.publish_now(&owned_topic, payload, key, extra).await },
            );
            return Ok(());
        }

        self.inner.publish_now(topic, payload, key, extra).await
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn Handler>,
        opts: SubscribeOptions,
    ) -> MqResult<()> {
        self.inner.ensure_open()?;
        let group = opts.resolved_group();

        let (receivers, group_token) = {
            let mut topics = self.inner.topics.write().await;
            let state = topics
                .entry(topic.to_string())
                .or_insert_with(|| TopicState::new(self.inner.config.default_partitions));
            let partitions =
                target_partitions(opts.specific_partitions.as_deref(), state.partition_count)?;

            let index = match state.group_index.get(&group) {
                Some(index) => *index,
                None => {
                    state.groups.push(ConsumerGroup::new(
                        group.clone(),
                        state.partition_count,
                        self.inner.config.partition_buffer,
                        &self.inner.shutdown,
                    ));
                    let index = state.groups.len() - 1;
                    state.group_index.insert(group.clone(), index);
                    index
                }
            };
            let consumer_group = &state.groups[index];
            let receivers: Vec<(usize, Arc<Mutex<mpsc::Receiver<MessageRef>>>)> = partitions
                .into_iter()
                .map(|p| (p, consumer_group.partitions[p].rx.clone()))
                .collect();
            (receivers, consumer_group.token.clone())
        };

        let stop = opts.stop_token(&group_token);
        info!(
            topic = %topic,
            group = %group,
            partitions = receivers.len(),
            backend = BACKEND,
            "Subscribed"
        );
        for (partition, rx) in receivers {
            tokio::spawn(consume_loop(
                topic.to_string(),
                group.clone(),
                partition,
                rx,
                handler.clone(),
                opts.clone(),
                stop.clone(),
            ));
        }
        Ok(())
    }

    async fn close(&self) -> MqResult<()> {
        if self
            .inner
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }
        self.inner.shutdown.cancel();
        self.inner.topics.write().await.clear();
        info!(backend = BACKEND, "Broker closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn backend(&self) -> &'static str {
        BACKEND
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::handler_fn;
    use std::time::Duration;

    /// Handler that forwards every message into a channel
    fn collector() -> (Arc<dyn Handler>, mpsc::UnboundedReceiver<MessageRef>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = handler_fn(move |msg: MessageRef| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(msg);
                Ok(())
            }
        });
        (handler, rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<MessageRef>) -> MessageRef {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("handler channel closed")
    }

    async fn assert_silent(rx: &mut mpsc::UnboundedReceiver<MessageRef>) {
        // a timeout or a closed channel both mean nothing was delivered
        let got = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(!matches!(got, Ok(Some(_))), "unexpected message delivered");
    }

    #[tokio::test]
    async fn test_publish_subscribe_round_trip() {
        let broker = MemoryBroker::new();
        let (handler, mut rx) = collector();
        broker
            .subscribe("orders", handler, SubscribeOptions::new().with_group("g"))
            .await
            .unwrap();

        broker
            .publish(
                "orders",
                b"hello".to_vec(),
                PublishOptions::new().with_key("user1").with_extra("amount", 42),
            )
            .await
            .unwrap();

        let msg = next(&mut rx).await;
        let meta = msg.metadata();
        assert_eq!(msg.payload(), b"hello");
        assert_eq!(meta.topic, "orders");
        assert_eq!(meta.key, "user1");
        assert_eq!(meta.partition, partition_for_key("user1", 4));
        assert!(!meta.message_id.is_empty());
        assert_eq!(meta.extra_value("amount"), Some(&serde_json::json!(42)));

        assert!(msg.ack().await.is_ok());
        assert!(msg.nack(true).await.is_ok());
    }

    #[tokio::test]
    async fn test_empty_key_goes_to_partition_zero() {
        let broker = MemoryBroker::new();
        let (handler, mut rx) = collector();
        broker
            .subscribe("t", handler, SubscribeOptions::new().with_partitions([0]))
            .await
            .unwrap();

        broker.publish("t", b"x".to_vec(), PublishOptions::new()).await.unwrap();
        let msg = next(&mut rx).await;
        assert_eq!(msg.metadata().partition, 0);
        assert_eq!(msg.metadata().extra, None);
    }

    #[tokio::test]
    async fn test_each_group_gets_full_copy() {
        let broker = MemoryBroker::new();
        let (h1, mut rx1) = collector();
        let (h2, mut rx2) = collector();
        broker
            .subscribe("events", h1, SubscribeOptions::new().with_group("audit"))
            .await
            .unwrap();
        broker
            .subscribe("events", h2, SubscribeOptions::new().with_group("billing"))
            .await
            .unwrap();

        for i in 0..5 {
            broker
                .publish("events", vec![i], PublishOptions::new().with_key(format!("k{}", i)))
                .await
                .unwrap();
        }

        for rx in [&mut rx1, &mut rx2] {
            let mut payloads = Vec::new();
            for _ in 0..5 {
                payloads.push(next(rx).await.payload()[0]);
            }
            payloads.sort_unstable();
            assert_eq!(payloads, vec![0, 1, 2, 3, 4]);
            assert_silent(rx).await;
        }
    }

    #[tokio::test]
    async fn test_same_key_handled_by_partition_owner() {
        let broker = MemoryBroker::new();
        let owned = partition_for_key("user1", 4);
        let others: Vec<usize> = (0..4).filter(|p| *p != owned).collect();

        let (owner, mut owner_rx) = collector();
        let (rest, mut rest_rx) = collector();
        broker
            .subscribe("t", owner, SubscribeOptions::new().with_group("g").with_partitions([owned]))
            .await
            .unwrap();
        broker
            .subscribe("t", rest, SubscribeOptions::new().with_group("g").with_partitions(others))
            .await
            .unwrap();

        for i in 0..10u8 {
            broker
                .publish("t", vec![i], PublishOptions::new().with_key("user1"))
                .await
                .unwrap();
        }

        for i in 0..10u8 {
            let msg = next(&mut owner_rx).await;
            // single partition consumer preserves publish order
            assert_eq!(msg.payload(), &[i]);
            assert_eq!(msg.metadata().partition, owned);
        }
        assert_silent(&mut rest_rx).await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let broker = MemoryBroker::new();
        let (handler, mut rx) = collector();
        broker
            .subscribe("t", handler.clone(), SubscribeOptions::new())
            .await
            .unwrap();

        broker.close().await.unwrap();
        broker.close().await.unwrap();
        assert!(broker.is_closed());

        assert_eq!(
            broker.publish("t", b"x".to_vec(), PublishOptions::new()).await,
            Err(MqError::BrokerClosed)
        );
        assert_eq!(
            broker.subscribe("t", handler, SubscribeOptions::new()).await,
            Err(MqError::BrokerClosed)
        );
        // consumer tasks have exited and dropped their handler clones
        assert!(tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_invalid_partition_starts_nothing() {
        let broker = MemoryBroker::new();
        let (handler, _rx) = collector();
        let result = broker
            .subscribe(
                "t",
                handler,
                SubscribeOptions::new().with_group("g").with_partitions([1, 9]),
            )
            .await;
        assert_eq!(
            result,
            Err(MqError::InvalidPartition {
                partition: 9,
                partition_count: 4
            })
        );
        assert!(broker.list_groups("t").await.is_empty());
    }

    #[tokio::test]
    async fn test_composed_filter_rejects_all() {
        let broker = MemoryBroker::new();
        let (handler, mut rx) = collector();
        broker
            .subscribe(
                "t",
                handler,
                SubscribeOptions::new()
                    .with_filter(|m| m.metadata().key == "A")
                    .with_filter(|_| false),
            )
            .await
            .unwrap();

        for key in ["A", "A", "B"] {
            broker
                .publish("t", b"x".to_vec(), PublishOptions::new().with_key(key))
                .await
                .unwrap();
        }
        assert_silent(&mut rx).await;
    }

    #[tokio::test]
    async fn test_filter_keeps_matching_messages() {
        let broker = MemoryBroker::new();
        let (handler, mut rx) = collector();
        broker
            .subscribe(
                "t",
                handler,
                SubscribeOptions::new().with_filter(|m| m.metadata().key == "A"),
            )
            .await
            .unwrap();

        for key in ["B", "A", "C"] {
            broker
                .publish("t", key.as_bytes().to_vec(), PublishOptions::new().with_key(key))
                .await
                .unwrap();
        }
        assert_eq!(next(&mut rx).await.payload(), b"A");
        assert_silent(&mut rx).await;
    }

    #[tokio::test]
    async fn test_handler_error_does_not_stop_consumer() {
        let broker = MemoryBroker::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler = handler_fn(move |msg: MessageRef| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(msg.payload().to_vec());
                Err("always fails".into())
            }
        });
        broker
            .subscribe("t", handler, SubscribeOptions::new().with_partitions([0]))
            .await
            .unwrap();

        broker.publish("t", b"1".to_vec(), PublishOptions::new()).await.unwrap();
        broker.publish("t", b"2".to_vec(), PublishOptions::new()).await.unwrap();

        let timeout = Duration::from_secs(2);
        assert_eq!(tokio::time::timeout(timeout, rx.recv()).await.unwrap().unwrap(), b"1");
        assert_eq!(tokio::time::timeout(timeout, rx.recv()).await.unwrap().unwrap(), b"2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_publish() {
        let broker = MemoryBroker::new();
        let (handler, mut rx) = collector();
        broker.subscribe("t", handler, SubscribeOptions::new()).await.unwrap();

        broker
            .publish(
                "t",
                b"later".to_vec(),
                PublishOptions::new().with_delay(Duration::from_secs(5)),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(rx.try_recv().is_err());

        let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.payload(), b"later");
    }

    #[tokio::test]
    async fn test_full_buffer_drops_messages() {
        let broker = MemoryBroker::with_config(MemoryConfig::default().with_partitions(1).with_buffer(2));
        let (handler, mut rx) = collector();

        // create the group without an active consumer
        let stopped = CancellationToken::new();
        stopped.cancel();
        broker
            .subscribe(
                "t",
                handler.clone(),
                SubscribeOptions::new().with_group("g").with_cancellation(stopped),
            )
            .await
            .unwrap();

        for i in 0..5u8 {
            broker.publish("t", vec![i], PublishOptions::new()).await.unwrap();
        }

        broker
            .subscribe("t", handler, SubscribeOptions::new().with_group("g"))
            .await
            .unwrap();
        assert_eq!(next(&mut rx).await.payload(), &[0]);
        assert_eq!(next(&mut rx).await.payload(), &[1]);
        assert_silent(&mut rx).await;
    }

    #[tokio::test]
    async fn test_zero_config_values_fall_back_to_defaults() {
        let broker = MemoryBroker::with_config(MemoryConfig {
            default_partitions: 0,
            partition_buffer: 0,
        });
        let (handler, mut rx) = collector();
        broker.subscribe("t", handler, SubscribeOptions::new()).await.unwrap();
        assert_eq!(broker.partition_count("t").await, Some(4));

        broker
            .publish("t", b"x".to_vec(), PublishOptions::new().with_key("user1"))
            .await
            .unwrap();
        let msg = next(&mut rx).await;
        assert_eq!(msg.metadata().partition, partition_for_key("user1", 4));
    }

    #[tokio::test]
    async fn test_publish_to_existing_topic_keeps_partition_count() {
        let broker = MemoryBroker::new();
        broker.create_topic("wide", 8).await.unwrap();
        let (handler, mut rx) = collector();
        broker.subscribe("wide", handler, SubscribeOptions::new()).await.unwrap();

        for key in ["a", "b", "user1"] {
            broker
                .publish("wide", key.as_bytes().to_vec(), PublishOptions::new().with_key(key))
                .await
                .unwrap();
            let msg = next(&mut rx).await;
            assert_eq!(msg.metadata().partition, partition_for_key(key, 8));
        }
        assert_eq!(broker.partition_count("wide").await, Some(8));
        assert_eq!(broker.list_topics().await, vec!["wide"]);
    }

    #[tokio::test]
    async fn test_subscription_cancellation() {
        let broker = MemoryBroker::new();
        let token = CancellationToken::new();
        let (h1, mut rx1) = collector();
        let (h2, mut rx2) = collector();
        broker
            .subscribe("t", h1, SubscribeOptions::new().with_cancellation(token.clone()))
            .await
            .unwrap();
        broker.subscribe("t", h2, SubscribeOptions::new()).await.unwrap();

        token.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;

        broker.publish("t", b"x".to_vec(), PublishOptions::new()).await.unwrap();
        assert_eq!(next(&mut rx2).await.payload(), b"x");
        assert_silent(&mut rx1).await;
    }

    #[tokio::test]
    async fn test_remove_group_renumbers() {
        let broker = MemoryBroker::new();
        let (ha, mut rxa) = collector();
        let (hb, mut rxb) = collector();
        let (hc, mut rxc) = collector();
        broker.subscribe("t", ha, SubscribeOptions::new().with_group("a")).await.unwrap();
        broker.subscribe("t", hb, SubscribeOptions::new().with_group("b")).await.unwrap();
        broker.subscribe("t", hc, SubscribeOptions::new().with_group("c")).await.unwrap();

        assert!(broker.remove_group("t", "a").await);
        assert!(!broker.remove_group("t", "a").await);
        assert_eq!(broker.list_groups("t").await, vec!["b", "c"]);

        // a second subscriber of "c" must join the existing group, not "b"
        let (hc2, mut rxc2) = collector();
        broker.subscribe("t", hc2, SubscribeOptions::new().with_group("c")).await.unwrap();
        assert_eq!(broker.list_groups("t").await, vec!["b", "c"]);

        broker.publish("t", b"x".to_vec(), PublishOptions::new()).await.unwrap();
        assert_eq!(next(&mut rxb).await.payload(), b"x");

        let from_c = tokio::select! {
            m = rxc.recv() => m,
            m = rxc2.recv() => m,
        };
        assert_eq!(from_c.unwrap().payload(), b"x");
        assert_silent(&mut rxc).await;
        assert_silent(&mut rxc2).await;

        // the removed group's consumers have exited
        assert!(tokio::time::timeout(Duration::from_secs(2), rxa.recv())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_topic_administration() {
        let broker = MemoryBroker::new();
        broker.create_topic("wide", 8).await.unwrap();
        broker.create_topic("wide", 8).await.unwrap();
        assert!(matches!(
            broker.create_topic("wide", 2).await,
            Err(MqError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            broker.create_topic("zero", 0).await,
            Err(MqError::InvalidConfiguration(_))
        ));
        assert_eq!(broker.partition_count("wide").await, Some(8));

        let (handler, _rx) = collector();
        assert!(broker
            .subscribe("wide", handler, SubscribeOptions::new().with_partitions([7]))
            .await
            .is_ok());

        broker.publish("lazy", b"x".to_vec(), PublishOptions::new()).await.unwrap();
        assert_eq!(broker.partition_count("lazy").await, Some(4));
        assert_eq!(broker.list_topics().await, vec!["lazy", "wide"]);

        assert!(broker.remove_topic("lazy").await);
        assert!(!broker.remove_topic("lazy").await);
        assert_eq!(broker.list_topics().await, vec!["wide"]);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let broker = MemoryBroker::new();
        broker.publish("nobody", b"x".to_vec(), PublishOptions::new()).await.unwrap();
        assert!(broker.list_groups("nobody").await.is_empty());
    }
}
