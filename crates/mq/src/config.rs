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

//! Backend configuration and client construction.
//!
//! ## Environment Variables
//!
//! ### Backend Selection
//! - `CONDUIT_MQ_BACKEND`: Backend type (default: "in-memory")
//!   - "in-memory" | "memory" → [`MemoryBroker`]
//!   - "redis" → `RedisClient`
//!   - "kafka" → `KafkaClient`
//! - `CONDUIT_MQ_PARTITIONS`: Partitions per topic for in-memory and Redis (default: 4)
//!
//! ### In-Memory Configuration
//! - `CONDUIT_MQ_BUFFER`: Per-partition buffer of each consumer group (default: 100)
//!
//! ### Redis Configuration
//! - `CONDUIT_MQ_REDIS_URL`: Redis server URL (default: "redis://localhost:6379")
//! - `CONDUIT_MQ_REDIS_PREFIX`: Stream key prefix (default: "mq:")
//!
//! ### Kafka Configuration
//! - `CONDUIT_MQ_KAFKA_BROKERS`: Comma separated bootstrap servers (default: "localhost:9092")
//!
//! ## Examples
//! ```bash
//! export CONDUIT_MQ_BACKEND=redis
//! export CONDUIT_MQ_REDIS_URL=redis://localhost:6379
//! export CONDUIT_MQ_REDIS_PREFIX=orders:
//! cargo run --example orders --features redis-backend
//! ```

use crate::client::{Client, MqError, MqResult};
use crate::in_memory::MemoryBroker;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Default partitions per topic (in-memory and Redis)
pub const DEFAULT_PARTITIONS: usize = 4;
/// Default per-partition buffer of an in-memory consumer group
pub const DEFAULT_PARTITION_BUFFER: usize = 100;
/// Default Redis stream key prefix
pub const DEFAULT_REDIS_PREFIX: &str = "mq:";

/// In-memory broker settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryConfig {
    /// Partition count for lazily created topics
    pub default_partitions: usize,
    /// Bounded buffer of each (group, partition) channel
    pub partition_buffer: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            default_partitions: DEFAULT_PARTITIONS,
            partition_buffer: DEFAULT_PARTITION_BUFFER,
        }
    }
}

impl MemoryConfig {
    /// Set the partition count of new topics (ignored when 0)
    pub fn with_partitions(mut self, partitions: usize) -> Self {
        if partitions > 0 {
            self.default_partitions = partitions;
        }
        self
    }

    /// Set the per-partition buffer (ignored when 0)
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        if buffer > 0 {
            self.partition_buffer = buffer;
        }
        self
    }
}

/// Redis Streams settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    /// Connection URL
    pub url: String,
    /// Streams per topic
    pub partitions: usize,
    /// Stream key prefix
    pub prefix: String,
    /// XREADGROUP block timeout
    pub block_timeout: Duration,
    /// XREADGROUP COUNT
    pub batch_size: usize,
}

impl RedisConfig {
    /// Settings for the server at `url` with default partitions and prefix
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            partitions: DEFAULT_PARTITIONS,
            prefix: DEFAULT_REDIS_PREFIX.to_string(),
            block_timeout: Duration::from_secs(5),
            batch_size: 10,
        }
    }

    /// Settings from `host:port`, optional password and database index
    pub fn from_addr(addr: &str, password: &str, db: i64) -> Self {
        let url = if password.is_empty() {
            format!("redis://{}/{}", addr, db)
        } else {
            format!("redis://:{}@{}/{}", password, addr, db)
        };
        Self::new(url)
    }

    /// Set streams per topic (ignored when 0)
    pub fn with_partitions(mut self, partitions: usize) -> Self {
        if partitions > 0 {
            self.partitions = partitions;
        }
        self
    }

    /// Set the stream key prefix (ignored when empty)
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        if !prefix.is_empty() {
            self.prefix = prefix;
        }
        self
    }

    /// Set the XREADGROUP block timeout
    pub fn with_block_timeout(mut self, timeout: Duration) -> Self {
        self.block_timeout = timeout;
        self
    }

    /// Set the XREADGROUP batch size (ignored when 0)
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        if batch_size > 0 {
            self.batch_size = batch_size;
        }
        self
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self::new("redis://localhost:6379")
    }
}

/// Kafka settings
///
/// `producer_properties` and `consumer_properties` are applied last and
/// override anything derived from the typed fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaConfig {
    /// Bootstrap servers
    pub brokers: Vec<String>,
    /// `fetch.min.bytes`
    pub fetch_min_bytes: usize,
    /// `fetch.max.bytes`
    pub fetch_max_bytes: usize,
    /// `fetch.wait.max.ms`
    pub fetch_wait_max: Duration,
    /// Producer send timeout
    pub send_timeout: Duration,
    /// Extra librdkafka producer properties
    pub producer_properties: HashMap<String, String>,
    /// Extra librdkafka consumer properties
    pub consumer_properties: HashMap<String, String>,
}

impl KafkaConfig {
    /// Settings for the given bootstrap servers
    pub fn new<I, S>(brokers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            brokers: brokers.into_iter().map(Into::into).collect(),
            fetch_min_bytes: 1_000,
            fetch_max_bytes: 10_000_000,
            fetch_wait_max: Duration::from_secs(5),
            send_timeout: Duration::from_secs(5),
            producer_properties: HashMap::new(),
            consumer_properties: HashMap::new(),
        }
    }

    /// Override a producer property
    pub fn with_producer_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.producer_properties.insert(key.into(), value.into());
        self
    }

    /// Override a consumer property
    pub fn with_consumer_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.consumer_properties.insert(key.into(), value.into());
        self
    }

    /// `bootstrap.servers` value
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self::new(["localhost:9092"])
    }
}

/// Backend selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendType {
    /// In-process broker (always available)
    InMemory(MemoryConfig),
    /// Redis Streams (requires redis-backend feature)
    Redis(RedisConfig),
    /// Kafka (requires kafka-backend feature)
    Kafka(KafkaConfig),
}

impl Default for BackendType {
    fn default() -> Self {
        Self::InMemory(MemoryConfig::default())
    }
}

/// Messaging configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MqConfig {
    /// Backend type
    pub backend: BackendType,
}

impl MqConfig {
    /// Configuration with an explicit backend
    pub fn new(backend: BackendType) -> Self {
        Self { backend }
    }

    /// Create configuration from environment variables.
    ///
    /// ## Errors
    /// - [`MqError::InvalidConfiguration`]: Unknown backend or unparsable number
    pub fn from_env() -> MqResult<Self> {
        let backend_str = std::env::var("CONDUIT_MQ_BACKEND")
            .unwrap_or_else(|_| "in-memory".to_string())
            .to_lowercase();

        let partitions = env_usize("CONDUIT_MQ_PARTITIONS", DEFAULT_PARTITIONS)?;

        let backend = match backend_str.as_str() {
            "in-memory" | "memory" => BackendType::InMemory(
                MemoryConfig::default()
                    .with_partitions(partitions)
                    .with_buffer(env_usize("CONDUIT_MQ_BUFFER", DEFAULT_PARTITION_BUFFER)?),
            ),

            "redis" => {
                let url = std::env::var("CONDUIT_MQ_REDIS_URL")
                    .unwrap_or_else(|_| "redis://localhost:6379".to_string());
                let prefix = std::env::var("CONDUIT_MQ_REDIS_PREFIX")
                    .unwrap_or_else(|_| DEFAULT_REDIS_PREFIX.to_string());
                BackendType::Redis(
                    RedisConfig::new(url)
                        .with_partitions(partitions)
                        .with_prefix(prefix),
                )
            }

            "kafka" => {
                let brokers = std::env::var("CONDUIT_MQ_KAFKA_BROKERS")
                    .unwrap_or_else(|_| "localhost:9092".to_string());
                BackendType::Kafka(KafkaConfig::new(
                    brokers
                        .split(',')
                        .map(str::trim)
                        .filter(|b| !b.is_empty()),
                ))
            }

            other => {
                return Err(MqError::InvalidConfiguration(format!(
                    "Unknown backend type: {}. Valid options: in-memory, redis, kafka",
                    other
                )));
            }
        };

        Ok(Self { backend })
    }
}

fn env_usize(name: &str, default: usize) -> MqResult<usize> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            MqError::InvalidConfiguration(format!("{} must be a non-negative integer, got '{}'", name, raw))
        }),
        Err(_) => Ok(default),
    }
}

/// Create a client from environment configuration
pub async fn create_client_from_env() -> MqResult<Arc<dyn Client>> {
    create_client(MqConfig::from_env()?).await
}

/// Create a client from explicit configuration.
///
/// ## Errors
/// - [`MqError::InvalidConfiguration`]: Backend feature not compiled in
/// - [`MqError::Backend`]: Connecting to the backend failed
///
/// ## Examples
/// ```rust
/// use conduit_mq::{create_client, MqConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = create_client(MqConfig::default()).await?;
/// assert_eq!(client.backend(), "memory");
/// # Ok(())
/// # }
/// ```
pub async fn create_client(config: MqConfig) -> MqResult<Arc<dyn Client>> {
    match config.backend {
        BackendType::InMemory(memory) => Ok(Arc::new(MemoryBroker::with_config(memory))),

        #[cfg(feature = "redis-backend")]
        BackendType::Redis(redis) => {
            let client = crate::redis_backend::RedisClient::new(redis).await?;
            Ok(Arc::new(client))
        }

        #[cfg(not(feature = "redis-backend"))]
        BackendType::Redis(_) => Err(MqError::InvalidConfiguration(
            "Redis backend requires 'redis-backend' feature".to_string(),
        )),

        #[cfg(feature = "kafka-backend")]
        BackendType::Kafka(kafka) => {
            let client = crate::kafka_backend::KafkaClient::new(kafka)?;
            Ok(Arc::new(client))
        }

        #[cfg(not(feature = "kafka-backend"))]
        BackendType::Kafka(_) => Err(MqError::InvalidConfiguration(
            "Kafka backend requires 'kafka-backend' feature".to_string(),
        )),
    }
}
