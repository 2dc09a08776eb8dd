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

//! Kafka backend
//!
//! ## Purpose
//! Pub/sub on Kafka topics. Partition placement is left to librdkafka's
//! `fnv1a` partitioner. A key always lands on the same partition of a topic,
//! but librdkafka takes the absolute value of the signed hash, so the index
//! can differ from [`partition_for_key`](crate::partition_for_key).
//!
//! ## Design Decisions
//! - **rdkafka**: librdkafka bindings, `FutureProducer` + `StreamConsumer`
//! - **Group mode**: one consumer per subscription, Kafka coordinates partitions,
//!   manual commit on ack
//! - **Assign mode**: one consumer per requested partition, no group id, no
//!   commits; `nack(true)` seeks back to the message
//! - **Extra metadata**: JSON in a single `extra` header
//!
//! ## Limitations
//! In group mode `nack(true)` does not seek: the message is redelivered only
//! after a restart or rebalance, since the offset is never committed.

use crate::client::{Client, Handler, MqError, MqResult};
use crate::config::KafkaConfig;
use crate::delay::spawn_delayed;
use crate::message::{decode_extra, deliver, encode_extra, Acknowledger, Delivery, Extra, Metadata};
use crate::observability::{record_ack, record_backend_error, record_nack, record_publish};
use crate::options::{PublishOptions, SubscribeOptions};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Header, Headers, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::{Message as KafkaMessage, Offset, TopicPartitionList};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const BACKEND: &str = "kafka";
const EXTRA_HEADER: &str = "extra";
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(500);
const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderMode {
    Group,
    Assign,
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

fn producer_config(config: &KafkaConfig) -> ClientConfig {
    let mut cc = ClientConfig::new();
    cc.set("bootstrap.servers", config.bootstrap_servers())
        .set("partitioner", "fnv1a")
        .set("message.timeout.ms", config.send_timeout.as_millis().to_string());
    for (key, value) in &config.producer_properties {
        cc.set(key, value);
    }
    cc
}

fn consumer_config(config: &KafkaConfig, group: Option<&str>, instance_id: Option<&str>) -> ClientConfig {
    let mut cc = ClientConfig::new();
    cc.set("bootstrap.servers", config.bootstrap_servers())
        .set("fetch.min.bytes", config.fetch_min_bytes.to_string())
        .set("fetch.max.bytes", config.fetch_max_bytes.to_string())
        .set("fetch.wait.max.ms", config.fetch_wait_max.as_millis().to_string())
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest");
    if let Some(group) = group {
        cc.set("group.id", group);
        if let Some(instance_id) = instance_id {
            cc.set("group.instance.id", instance_id);
        }
    }
    for (key, value) in &config.consumer_properties {
        cc.set(key, value);
    }
    cc
}

/// Convert requested partitions to Kafka partition ids
fn assign_partitions(requested: &[usize]) -> MqResult<Vec<i32>> {
    let mut partitions = Vec::with_capacity(requested.len());
    for p in requested {
        let id = i32::try_from(*p).map_err(|_| MqError::InvalidPartition {
            partition: *p,
            partition_count: i32::MAX as usize,
        })?;
        if !partitions.contains(&id) {
            partitions.push(id);
        }
    }
    Ok(partitions)
}

/// Copy a received record into owned payload and metadata
fn message_parts<M: KafkaMessage>(m: &M) -> (Vec<u8>, Metadata) {
    let extra = m.headers().and_then(|headers| {
        headers
            .iter()
            .find(|h| h.key == EXTRA_HEADER)
            .and_then(|h| h.value)
            .and_then(decode_extra)
    });
    let timestamp = match m.timestamp().to_millis() {
        Some(ms) if ms > 0 => UNIX_EPOCH + Duration::from_millis(ms as u64),
        _ => SystemTime::now(),
    };
    let metadata = Metadata {
        topic: m.topic().to_string(),
        key: m
            .key()
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .unwrap_or_default(),
        partition: m.partition().max(0) as usize,
        message_id: m.offset().to_string(),
        timestamp,
        extra,
    };
    (m.payload().map(<[u8]>::to_vec).unwrap_or_default(), metadata)
}

/// Ack strategy for one consumed record
struct KafkaAck {
    consumer: Arc<StreamConsumer>,
    mode: ReaderMode,
    offset: i64,
}

impl KafkaAck {
    fn commit(&self, metadata: &Metadata) -> MqResult<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &metadata.topic,
            metadata.partition as i32,
            Offset::Offset(self.offset + 1),
        )
        .map_err(|e| MqError::Backend(format!("Failed to build commit offsets: {}", e)))?;
        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| MqError::Backend(format!("Failed to commit offset: {}", e)))
    }

    async fn seek_back(&self, metadata: &Metadata) -> MqResult<()> {
        let consumer = self.consumer.clone();
        let topic = metadata.topic.clone();
        let partition = metadata.partition as i32;
        let offset = self.offset;
        tokio::task::spawn_blocking(move || {
            consumer.seek(&topic, partition, Offset::Offset(offset), SEEK_TIMEOUT)
        })
        .await
        .map_err(|e| MqError::Backend(format!("Seek task failed: {}", e)))?
        .map_err(|e| MqError::Backend(format!("Failed to seek: {}", e)))
    }
}

#[async_trait]
impl Acknowledger for KafkaAck {
    async fn ack(&self, metadata: &Metadata, _payload: &[u8]) -> MqResult<()> {
        if self.mode == ReaderMode::Group {
            self.commit(metadata)?;
        }
        record_ack(&metadata.topic, &metadata.message_id, BACKEND);
        Ok(())
    }

    async fn nack(&self, metadata: &Metadata, _payload: &[u8], requeue: bool) -> MqResult<()> {
        match (self.mode, requeue) {
            (ReaderMode::Group, true) => {
                debug!(
                    topic = %metadata.topic,
                    offset = self.offset,
                    "Offset left uncommitted, redelivery after restart or rebalance"
                );
            }
            (ReaderMode::Group, false) => self.commit(metadata)?,
            (ReaderMode::Assign, true) => self.seek_back(metadata).await?,
            (ReaderMode::Assign, false) => {}
        }
        record_nack(&metadata.topic, &metadata.message_id, requeue, BACKEND);
        Ok(())
    }
}

struct Inner {
    config: KafkaConfig,
    producer: FutureProducer,
    consumers: Mutex<Vec<Arc<StreamConsumer>>>,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

/// Kafka client
///
/// ## Purpose
/// Pub/sub over Kafka topics with consumer groups (group mode) or explicit
/// partition assignment (assign mode).
pub struct KafkaClient {
    inner: Arc<Inner>,
}

impl KafkaClient {
    /// Create a client. Brokers are contacted lazily.
    ///
    /// ## Errors
    /// - [`MqError::InvalidConfiguration`]: No brokers, or librdkafka rejected a property
    pub fn new(config: KafkaConfig) -> MqResult<Self> {
        if config.brokers.is_empty() {
            return Err(MqError::InvalidConfiguration(
                "at least one Kafka broker is required".to_string(),
            ));
        }
        let producer: FutureProducer = producer_config(&config).create().map_err(|e| {
            MqError::InvalidConfiguration(format!("Failed to create Kafka producer: {}", e))
        })?;

        info!(brokers = %config.bootstrap_servers(), "Kafka client created");
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                producer,
                consumers: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        })
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

        let extra = encode_extra(&extra);
        let mut record: FutureRecord<'_, String, Vec<u8>> = FutureRecord::to(topic)
            .payload(&payload)
            .timestamp(now_millis());
        record = if key.is_empty() {
            record.partition(0)
        } else {
            record.key(&key)
        };
        if let Some(json) = extra.as_deref() {
            record = record.headers(OwnedHeaders::new().insert(Header {
                key: EXTRA_HEADER,
                value: Some(json),
            }));
        }

        let (partition, _offset) = self
            .producer
            .send(record, self.config.send_timeout)
            .await
            .map_err(|(e, _)| MqError::Backend(format!("Failed to send to Kafka: {}", e)))?;
        record_publish(topic, &key, partition.max(0) as usize, BACKEND);
        Ok(())
    }

    fn create_consumer(&self, group: Option<&str>, instance_id: Option<&str>) -> MqResult<Arc<StreamConsumer>> {
        let consumer: StreamConsumer = consumer_config(&self.config, group, instance_id)
            .create()
            .map_err(|e| MqError::Backend(format!("Failed to create Kafka consumer: {}", e)))?;
        Ok(Arc::new(consumer))
    }
}

async fn consume_loop(
    consumer: Arc<StreamConsumer>,
    mode: ReaderMode,
    label: String,
    handler: Arc<dyn Handler>,
    opts: SubscribeOptions,
    stop: CancellationToken,
) {
    debug!(reader = %label, mode = ?mode, "Kafka consumer started");
    loop {
        let received = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            m = consumer.recv() => m.map(|m| (m.offset(), message_parts(&m))),
        };

        match received {
            Ok((offset, (payload, metadata))) => {
                let acker = KafkaAck {
                    consumer: consumer.clone(),
                    mode,
                    offset,
                };
                let message = Arc::new(Delivery::new(payload, metadata, acker));
                deliver(message, handler.as_ref(), &opts, BACKEND).await;
            }
            Err(e) => {
                record_backend_error(&label, "recv", &e.to_string(), BACKEND);
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(RECV_ERROR_BACKOFF) => {}
                }
            }
        }
    }
    debug!(reader = %label, "Kafka consumer stopped");
}

#[async_trait]
impl Client for KafkaClient {
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

        let readers: Vec<(Arc<StreamConsumer>, ReaderMode, String)> = match opts.specific_partitions.as_deref() {
            Some(requested) => {
                let partitions = assign_partitions(requested)?;
                let mut readers = Vec::with_capacity(partitions.len());
                for partition in partitions {
                    let consumer = self.inner.create_consumer(None, None)?;
                    let mut tpl = TopicPartitionList::new();
                    tpl.add_partition_offset(topic, partition, Offset::Beginning)
                        .map_err(|e| MqError::Backend(format!("Failed to build assignment: {}", e)))?;
                    consumer
                        .assign(&tpl)
                        .map_err(|e| MqError::Backend(format!("Failed to assign partition: {}", e)))?;
                    readers.push((consumer, ReaderMode::Assign, format!("{}[{}]", topic, partition)));
                }
                readers
            }
            None => {
                let group = opts.resolved_group();
                let instance_id = (!opts.consumer_id.is_empty()).then_some(opts.consumer_id.as_str());
                let consumer = self.inner.create_consumer(Some(&group), instance_id)?;
                consumer
                    .subscribe(&[topic])
                    .map_err(|e| MqError::Backend(format!("Failed to subscribe: {}", e)))?;
                vec![(consumer, ReaderMode::Group, format!("{}@{}", topic, group))]
            }
        };

        self.inner
            .consumers
            .lock()
            .await
            .extend(readers.iter().map(|(consumer, _, _)| consumer.clone()));

        let stop = opts.stop_token(&self.inner.shutdown);
        info!(topic = %topic, readers = readers.len(), backend = BACKEND, "Subscribed");
        for (consumer, mode, label) in readers {
            tokio::spawn(consume_loop(
                consumer,
                mode,
                label,
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

        let consumers: Vec<Arc<StreamConsumer>> = self.inner.consumers.lock().await.drain(..).collect();
        for consumer in &consumers {
            consumer.unsubscribe();
        }

        let producer = self.inner.producer.clone();
        let timeout = self.inner.config.send_timeout;
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| MqError::Backend(format!("Flush task failed: {}", e)))?
            .map_err(|e| MqError::Backend(format!("Failed to flush producer: {}", e)))?;

        info!(backend = BACKEND, consumers = consumers.len(), "Kafka client closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn backend(&self) -> &'static str {
        BACKEND
    }
}
