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

//! # Conduit MQ
//!
//! ## Purpose
//! A backend-agnostic publish/subscribe client. Producers publish keyed
//! payloads to partitioned topics; consumers subscribe a handler as part of a
//! consumer group. The same [`Client`] contract runs on an in-process broker,
//! Redis Streams and Kafka.
//!
//! ### Component Diagram
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     Application                      │
//! │   publish(topic, payload, PublishOptions)            │
//! │   subscribe(topic, handler, SubscribeOptions)        │
//! ├──────────────────────────────────────────────────────┤
//! │               dyn Client (this crate)                │
//! ├──────────────────┬──────────────────┬────────────────┤
//! │  MemoryBroker    │  RedisClient     │  KafkaClient   │
//! │  (mpsc fan-out)  │ (XADD/XREADGROUP)│  (rdkafka)     │
//! └──────────────────┴──────────────────┴────────────────┘
//! ```
//!
//! ## Key Components
//! - [`Client`]: publish / subscribe / close
//! - [`Message`] and [`Metadata`]: what a handler receives
//! - [`PublishOptions`] / [`SubscribeOptions`]: key, delay, extra, group,
//!   partitions, filters
//! - [`MemoryBroker`]: in-process reference backend
//! - [`MqConfig`] / [`create_client`]: environment driven backend selection
//!
//! ## Partitioning
//! A routing key maps to `fnv1a32(key) % partition_count`; the empty key always
//! maps to partition 0. Kafka leaves placement to librdkafka, which keeps a
//! key on one partition but may pick a different index. Within a consumer group every message of a key is
//! handled by the consumer of that partition, so per-key order is kept.
//!
//! ## Examples
//!
//! ```rust
//! use conduit_mq::*;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = MemoryBroker::new();
//!
//! let handler = handler_fn(|msg: MessageRef| async move {
//!     println!("{}: {:?}", msg.metadata().key, msg.payload());
//!     msg.ack().await?;
//!     Ok(())
//! });
//! client
//!     .subscribe("orders", handler, SubscribeOptions::new().with_group("shipping"))
//!     .await?;
//!
//! client
//!     .publish(
//!         "orders",
//!         b"order #1".to_vec(),
//!         PublishOptions::new()
//!             .with_key("user1")
//!             .with_extra("amount", 42)
//!             .with_delay(Duration::from_millis(10)),
//!     )
//!     .await?;
//!
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
mod delay;
pub mod in_memory;
pub mod message;
pub mod observability;
pub mod options;
pub mod partition;

#[cfg(feature = "redis-backend")]
pub mod redis_backend;

#[cfg(feature = "kafka-backend")]
pub mod kafka_backend;

pub use client::{handler_fn, Client, Handler, HandlerError, HandlerResult, MqError, MqResult};
pub use config::{
    create_client, create_client_from_env, BackendType, KafkaConfig, MemoryConfig, MqConfig,
    RedisConfig,
};
pub use in_memory::MemoryBroker;
pub use message::{Acknowledger, Delivery, Extra, Message, MessageRef, Metadata, NoopAck};
pub use options::{FilterFn, PublishOptions, SubscribeOptions};
pub use partition::{fnv1a32, partition_for_key};
pub use tokio_util::sync::CancellationToken;

#[cfg(feature = "redis-backend")]
pub use redis_backend::RedisClient;

#[cfg(feature = "kafka-backend")]
pub use kafka_backend::KafkaClient;
