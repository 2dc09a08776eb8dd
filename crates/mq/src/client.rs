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

//! Client trait, handler trait and error types

use crate::message::MessageRef;
use crate::options::{PublishOptions, SubscribeOptions};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during messaging operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MqError {
    /// Operation attempted after `close()`
    #[error("mq: broker is closed")]
    BrokerClosed,

    /// Requested partition index is outside the topic's partition range
    #[error("mq: invalid partition index {partition} (partition count {partition_count})")]
    InvalidPartition {
        /// Requested partition
        partition: usize,
        /// Partition count of the topic
        partition_count: usize,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Backend-specific error (network, protocol, client library)
    #[error("Backend error: {0}")]
    Backend(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for messaging operations
pub type MqResult<T> = Result<T, MqError>;

/// Error type returned by subscriber handlers.
///
/// Handler errors never reach the caller of `subscribe`; they only decide
/// whether a delivery is acked or nacked.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type returned by subscriber handlers
pub type HandlerResult = Result<(), HandlerError>;

/// Callback invoked once per delivered (and filter-accepted) message.
///
/// Any `Fn(MessageRef) -> impl Future<Output = HandlerResult>` closure is a
/// handler; [`handler_fn`] wraps one into the shared form `subscribe` takes:
///
/// ```rust
/// use conduit_mq::*;
///
/// let handler = handler_fn(|msg: MessageRef| async move {
///     println!("got {} bytes", msg.payload().len());
///     Ok(())
/// });
/// ```
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Process one message
    async fn handle(&self, message: MessageRef) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(MessageRef) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, message: MessageRef) -> HandlerResult {
        (self)(message).await
    }
}

/// Wrap a closure as a shared handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(MessageRef) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(f)
}

/// Core publish/subscribe contract implemented by every backend
///
/// ## Purpose
/// One interface over three delivery models: in-process channel fan-out,
/// Kafka consumer groups, and Redis Streams consumer groups.
///
/// ## Invariants
/// - A given routing key always lands on the same partition of a topic
/// - The empty key always lands on partition 0
/// - Distinct consumer groups each see every message of a topic
/// - After `close()`, `publish` and `subscribe` fail with [`MqError::BrokerClosed`]
#[async_trait]
pub trait Client: Send + Sync {
    /// Publish a payload to a topic
    ///
    /// ## Errors
    /// - [`MqError::BrokerClosed`]: Client has been closed
    /// - [`MqError::Backend`]: Backend rejected the write
    ///
    /// ## Design Notes
    /// A non-zero delay schedules the publish on a timer task and returns
    /// immediately. Errors of the deferred publish are logged, not returned.
    async fn publish(&self, topic: &str, payload: Vec<u8>, opts: PublishOptions) -> MqResult<()>;

    /// Register a handler and start background consumption
    ///
    /// Returns once the consume tasks are running, not once messages have
    /// been processed.
    ///
    /// ## Errors
    /// - [`MqError::BrokerClosed`]: Client has been closed
    /// - [`MqError::InvalidPartition`]: Requested partition out of range
    /// - [`MqError::Backend`]: Consumer group or reader setup failed
    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn Handler>,
        opts: SubscribeOptions,
    ) -> MqResult<()>;

    /// Stop all background consumption and release backend resources.
    /// Safe to call more than once.
    async fn close(&self) -> MqResult<()>;

    /// Check if the client is closed
    fn is_closed(&self) -> bool;

    /// Backend name used in logs
    fn backend(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Delivery, Metadata, NoopAck};

    #[tokio::test]
    async fn test_closure_is_handler() {
        let handler = handler_fn(|msg: MessageRef| async move {
            if msg.payload() == b"boom" {
                return Err(HandlerError::from("boom"));
            }
            Ok(())
        });

        let ok = Delivery::new(b"fine".to_vec(), Metadata::new("t"), NoopAck);
        assert!(handler.handle(Arc::new(ok)).await.is_ok());

        let bad = Delivery::new(b"boom".to_vec(), Metadata::new("t"), NoopAck);
        assert!(handler.handle(Arc::new(bad)).await.is_err());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(MqError::BrokerClosed.to_string(), "mq: broker is closed");
        let err = MqError::InvalidPartition {
            partition: 9,
            partition_count: 4,
        };
        assert!(err.to_string().contains("invalid partition index 9"));
    }
}
