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

//! Redis Streams backend
//!
//! ## Purpose
//! Distributed, persistent pub/sub on Redis Streams. Every topic partition is
//! its own stream and every consumer group is a Redis consumer group on each
//! of those streams.
//!
//! ## Design Decisions
//! - **XADD for publish**: fields `payload`, `key`, `ts` (ns) and optional `extra` (JSON)
//! - **XREADGROUP for consume**: `>` only, COUNT 10, BLOCK 5s, one dedicated
//!   connection per stream loop
//! - **XACK for ack**: also used for `nack(false)`
//! - **XACK + XADD for nack(true)**: the entry is re-appended with a new id,
//!   so per-key order is not preserved across a requeue
//!
//! ## Stream keys
//! `{prefix}{topic}:{partition}`, e.g. `mq:orders:2`

use crate::client::{Client, Handler, MqError, MqResult};
use crate::config::RedisConfig;
use crate::delay::spawn_delayed;
use crate::message::{decode_extra, deliver, encode_extra, Acknowledger, Delivery, Extra, MessageRef, Metadata};
use crate::observability::{record_ack, record_backend_error, record_nack, record_publish};
use crate::options::{PublishOptions, SubscribeOptions};
use crate::partition::{partition_for_key, target_partitions};
use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::streams::{StreamId, StreamReadReply};
use redis::RedisResult;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const BACKEND: &str = "redis";
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Stream key of one topic partition
pub fn stream_key(prefix: &str, topic: &str, partition: usize) -> String {
    format!("{}{}:{}", prefix, topic, partition)
}

/// Recover `(topic, partition)` from a stream key
pub fn parse_stream_key(prefix: &str, key: &str) -> Option<(String, usize)> {
    let rest = key.strip_prefix(prefix)?;
    let (topic, partition) = rest.rsplit_once(':')?;
    Some((topic.to_string(), partition.parse().ok()?))
}

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default()
}

fn timestamp_from_nanos(ts: Option<i64>) -> SystemTime {
    match ts {
        Some(ns) if ns > 0 => UNIX_EPOCH + Duration::from_nanos(ns as u64),
        _ => SystemTime::now(),
    }
}

/// XADD one entry and return its id
async fn append_entry(
    conn: &mut ConnectionManager,
    stream: &str,
    payload: &[u8],
    key: &str,
    extra: Option<&[u8]>,
) -> MqResult<String> {
    let mut cmd = redis::cmd("XADD");
    cmd.arg(stream)
        .arg("*")
        .arg("payload")
        .arg(payload)
        .arg("key")
        .arg(key)
        .arg("ts")
        .arg(now_nanos());
    if let Some(extra) = extra {
        cmd.arg("extra").arg(extra);
    }

    cmd.query_async(conn)
        .await
        .map_err(|e| MqError::Backend(format!("Failed to append to stream {}: {}", stream, e)))
}

/// Ack strategy for one stream entry
struct RedisAck {
    conn: ConnectionManager,
    stream: String,
    group: String,
    entry_id: String,
    raw_extra: Option<Vec<u8>>,
}

impl RedisAck {
    async fn xack(&self) -> MqResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("XACK")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(&self.entry_id)
            .query_async(&mut conn)
            .await
            .map_err(|e| MqError::Backend(format!("Failed to ack message: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl Acknowledger for RedisAck {
    async fn ack(&self, metadata: &Metadata, _payload: &[u8]) -> MqResult<()> {
        self.xack().await?;
        record_ack(&metadata.topic, &self.entry_id, BACKEND);
        Ok(())
    }

    async fn nack(&self, metadata: &Metadata, payload: &[u8], requeue: bool) -> MqResult<()> {
        self.xack().await?;
        if requeue {
            let mut conn = self.conn.clone();
            append_entry(
                &mut conn,
                &self.stream,
                payload,
                &metadata.key,
                self.raw_extra.as_deref(),
            )
            .await?;
        }
        record_nack(&metadata.topic, &self.entry_id, requeue, BACKEND);
        Ok(())
    }
}

struct Inner {
    config: RedisConfig,
    client: redis::Client,
    conn: ConnectionManager,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

/// Redis Streams client
///
/// ## Purpose
/// Persistent, at-least-once pub/sub across processes. Subscribers in the
/// same group share the entries of each stream; distinct groups each see
/// every entry.
pub struct RedisClient {
    inner: Arc<Inner>,
}

impl RedisClient {
    /// Connect to Redis
    ///
    /// ## Errors
    /// - [`MqError::InvalidConfiguration`]: Unparsable URL
    /// - [`MqError::Backend`]: Connection failed
    pub async fn new(config: RedisConfig) -> MqResult<Self> {
        let client = redis::Client::open(config.url.as_str()).map_err(|e| {
            MqError::InvalidConfiguration(format!("Failed to create Redis client: {}", e))
        })?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| MqError::Backend(format!("Failed to connect to Redis: {}", e)))?;

        info!(
            url = %config.url,
            partitions = config.partitions,
            prefix = %config.prefix,
            "Redis client connected"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                client,
                conn,
                closed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        })
    }

    /// Partitions (streams) per topic
    pub fn partitions(&self) -> usize {
        self.inner.config.partitions
    }

    /// Stream key prefix
    pub fn prefix(&self) -> &str {
        &self.inner.config.prefix
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
        let partition = partition_for_key(&key, self.config.partitions);
        let stream = stream_key(&self.config.prefix, topic, partition);
        let extra = encode_extra(&extra);

        let mut conn = self.conn.clone();
        append_entry(&mut conn, &stream, &payload, &key, extra.as_deref().map(str::as_bytes)).await?;
        record_publish(topic, &key, partition, BACKEND);
        Ok(())
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> MqResult<()> {
        let mut conn = self.conn.clone();
        let created: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match created {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(MqError::Backend(format!(
                "Failed to create consumer group {} on {}: {}",
                group, stream, e
            ))),
        }
    }

    fn to_delivery(&self, stream: &str, group: &str, entry: StreamId) -> MessageRef {
        let (topic, partition) = parse_stream_key(&self.config.prefix, stream)
            .unwrap_or_else(|| (stream.to_string(), 0));
        let payload: Vec<u8> = entry.get("payload").unwrap_or_default();
        let key: String = entry.get("key").unwrap_or_default();
        let raw_extra: Option<Vec<u8>> = entry.get("extra");

        let metadata = Metadata {
            topic,
            key,
            partition,
            message_id: entry.id.clone(),
            timestamp: timestamp_from_nanos(entry.get("ts")),
            extra: raw_extra.as_deref().and_then(decode_extra),
        };
        let acker = RedisAck {
            conn: self.conn.clone(),
            stream: stream.to_string(),
            group: group.to_string(),
            entry_id: entry.id,
            raw_extra,
        };
        Arc::new(Delivery::new(payload, metadata, acker))
    }

    async fn read_batch(
        &self,
        conn: &mut MultiplexedConnection,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> MqResult<Option<StreamReadReply>> {
        redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("COUNT")
            .arg(self.config.batch_size)
            .arg("BLOCK")
            .arg(self.config.block_timeout.as_millis() as u64)
            .arg("STREAMS")
            .arg(stream)
            .arg(">")
            .query_async(conn)
            .await
            .map_err(|e| MqError::Backend(format!("Failed to read from stream {}: {}", stream, e)))
    }
}

struct StreamConsumer {
    stream: String,
    group: String,
    consumer: String,
    conn: MultiplexedConnection,
}

async fn consume_loop(
    inner: Arc<Inner>,
    mut reader: StreamConsumer,
    handler: Arc<dyn Handler>,
    opts: SubscribeOptions,
    stop: CancellationToken,
) {
    debug!(stream = %reader.stream, group = %reader.group, consumer = %reader.consumer, "Stream consumer started");
    loop {
        let read = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            read = inner.read_batch(&mut reader.conn, &reader.stream, &reader.group, &reader.consumer) => read,
        };

        match read {
            Ok(Some(reply)) => {
                for stream in reply.keys {
                    for entry in stream.ids {
                        let message = inner.to_delivery(&stream.key, &reader.group, entry);
                        deliver(message, handler.as_ref(), &opts, BACKEND).await;
                    }
                }
            }
            // block timeout elapsed without entries
            Ok(None) => {}
            Err(e) => {
                record_backend_error(&reader.stream, "read", &e.to_string(), BACKEND);
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(READ_ERROR_BACKOFF) => {}
                }
            }
        }
    }
    debug!(stream = %reader.stream, group = %reader.group, "Stream consumer stopped");
}

#[async_trait]
impl Client for RedisClient {
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
        let partitions =
            target_partitions(opts.specific_partitions.as_deref(), self.inner.config.partitions)?;
        let group = opts.resolved_group();
        let consumer = if opts.consumer_id.is_empty() {
            ulid::Ulid::new().to_string()
        } else {
            opts.consumer_id.clone()
        };

        let streams: Vec<String> = partitions
            .iter()
            .map(|p| stream_key(&self.inner.config.prefix, topic, *p))
            .collect();

        futures::future::try_join_all(streams.iter().map(|s| self.inner.ensure_group(s, &group))).await?;

        let connections = futures::future::try_join_all(streams.iter().map(|_| async {
            self.inner
                .client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| MqError::Backend(format!("Failed to open stream connection: {}", e)))
        }))
        .await?;

        let stop = opts.stop_token(&self.inner.shutdown);
        info!(
            topic = %topic,
            group = %group,
            consumer = %consumer,
            streams = streams.len(),
            backend = BACKEND,
            "Subscribed"
        );
        for (stream, conn) in streams.into_iter().zip(connections) {
            let reader = StreamConsumer {
                stream,
                group: group.clone(),
                consumer: consumer.clone(),
                conn,
            };
            tokio::spawn(consume_loop(
                self.inner.clone(),
                reader,
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
        info!(backend = BACKEND, "Redis client closed");
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

    #[test]
    fn test_stream_key_round_trip() {
        assert_eq!(stream_key("mq:", "orders", 2), "mq:orders:2");
        assert_eq!(
            parse_stream_key("mq:", "mq:orders:2"),
            Some(("orders".to_string(), 2))
        );
        // topics may themselves contain ':'
        assert_eq!(
            parse_stream_key("mq:", "mq:billing:eu:11"),
            Some(("billing:eu".to_string(), 11))
        );
        assert_eq!(parse_stream_key("mq:", "other:orders:1"), None);
        assert_eq!(parse_stream_key("mq:", "mq:orders"), None);
        assert_eq!(parse_stream_key("mq:", "mq:orders:x"), None);
    }

    #[test]
    fn test_timestamp_from_nanos() {
        let ts = timestamp_from_nanos(Some(1_700_000_000_000_000_000));
        assert_eq!(
            ts.duration_since(UNIX_EPOCH).unwrap(),
            Duration::from_secs(1_700_000_000)
        );
        assert!(timestamp_from_nanos(None) > UNIX_EPOCH);
    }

    #[test]
    fn test_now_nanos_is_positive() {
        assert!(now_nanos() > 0);
    }
}
