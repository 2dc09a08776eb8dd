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

//! Message envelope shared by every backend
//!
//! ## Purpose
//! [`Metadata`] is the wire-independent description of a delivered message and
//! [`Message`] is what a subscriber handler receives. Backends only differ in
//! what ack/nack do, which is captured by the [`Acknowledger`] they plug into
//! [`Delivery`].

use crate::client::{Handler, MqResult};
use crate::observability::{record_backend_error, record_filtered, record_handler_error, record_latency};
use crate::options::SubscribeOptions;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tokio::sync::OnceCell;
use tracing::warn;

/// Application metadata carried alongside a payload
pub type Extra = HashMap<String, serde_json::Value>;

/// Standard metadata of a delivered message
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    /// Topic the message was published to
    pub topic: String,
    /// Routing key (decides the partition), may be empty
    pub key: String,
    /// Partition the message landed in
    pub partition: usize,
    /// Backend-assigned message id
    pub message_id: String,
    /// Message creation time
    pub timestamp: SystemTime,
    /// Application metadata; `None` when absent or undecodable
    pub extra: Option<Extra>,
}

impl Metadata {
    /// Metadata for `topic` with an empty key, partition 0 and the current time
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            key: String::new(),
            partition: 0,
            message_id: String::new(),
            timestamp: SystemTime::now(),
            extra: None,
        }
    }

    /// Look up one extra field
    pub fn extra_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.extra.as_ref().and_then(|extra| extra.get(key))
    }
}

/// A delivered message
///
/// ## Invariants
/// - `ack`/`nack` perform their side effect at most once; repeated or
///   concurrent calls return the outcome of the first one
#[async_trait]
pub trait Message: Send + Sync {
    /// Message body
    fn payload(&self) -> &[u8];

    /// Structured metadata
    fn metadata(&self) -> &Metadata;

    /// Positive acknowledgement
    async fn ack(&self) -> MqResult<()>;

    /// Negative acknowledgement; `requeue` asks for redelivery
    async fn nack(&self, requeue: bool) -> MqResult<()>;
}

/// Shared handle to a delivered message
pub type MessageRef = Arc<dyn Message>;

/// Backend-specific acknowledgement actions
#[async_trait]
pub trait Acknowledger: Send + Sync + 'static {
    /// Acknowledge the delivery described by `metadata`
    async fn ack(&self, metadata: &Metadata, payload: &[u8]) -> MqResult<()>;

    /// Negatively acknowledge the delivery described by `metadata`
    async fn nack(&self, metadata: &Metadata, payload: &[u8], requeue: bool) -> MqResult<()>;
}

/// Acknowledger for deliveries that cannot be redelivered (in-memory backend)
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAck;

#[async_trait]
impl Acknowledger for NoopAck {
    async fn ack(&self, _metadata: &Metadata, _payload: &[u8]) -> MqResult<()> {
        Ok(())
    }

    async fn nack(&self, _metadata: &Metadata, _payload: &[u8], _requeue: bool) -> MqResult<()> {
        Ok(())
    }
}

/// One delivery attempt of a message
pub struct Delivery<A: Acknowledger> {
    payload: Vec<u8>,
    metadata: Metadata,
    acker: A,
    outcome: OnceCell<MqResult<()>>,
}

impl<A: Acknowledger> Delivery<A> {
    /// Create a delivery
    pub fn new(payload: Vec<u8>, metadata: Metadata, acker: A) -> Self {
        Self {
            payload,
            metadata,
            acker,
            outcome: OnceCell::new(),
        }
    }

    /// Whether ack or nack has already been called
    pub fn is_settled(&self) -> bool {
        self.outcome.initialized()
    }
}

impl<A: Acknowledger> std::fmt::Debug for Delivery<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("metadata", &self.metadata)
            .field("payload_len", &self.payload.len())
            .field("settled", &self.is_settled())
            .finish()
    }
}

#[async_trait]
impl<A: Acknowledger> Message for Delivery<A> {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    async fn ack(&self) -> MqResult<()> {
        self.outcome
            .get_or_init(|| self.acker.ack(&self.metadata, &self.payload))
            .await
            .clone()
    }

    async fn nack(&self, requeue: bool) -> MqResult<()> {
        self.outcome
            .get_or_init(|| self.acker.nack(&self.metadata, &self.payload, requeue))
            .await
            .clone()
    }
}

/// Encode extra fields as a JSON string; `None` for an empty map.
///
/// Encoding is best-effort: a failure is logged and the field is left out.
pub fn encode_extra(extra: &Extra) -> Option<String> {
    if extra.is_empty() {
        return None;
    }
    match serde_json::to_string(extra) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!(error = %e, "Failed to encode extra metadata, publishing without it");
            None
        }
    }
}

/// Decode extra fields; `None` when empty or not a JSON object
pub fn decode_extra(raw: &[u8]) -> Option<Extra> {
    if raw.is_empty() {
        return None;
    }
    serde_json::from_slice(raw).ok()
}

/// Run one delivery through a subscription: filter, handler, then ack/nack.
///
/// Filtered messages are acked so they are not redelivered. A handler error
/// is logged and turns into `nack(true)`.
pub(crate) async fn deliver(
    message: MessageRef,
    handler: &dyn Handler,
    opts: &SubscribeOptions,
    backend: &'static str,
) {
    let topic = message.metadata().topic.clone();
    let message_id = message.metadata().message_id.clone();

    if !opts.accepts(message.as_ref()) {
        record_filtered(&topic, &message_id, backend);
        if let Err(e) = message.ack().await {
            record_backend_error(&topic, "ack", &e.to_string(), backend);
        }
        return;
    }

    let started = Instant::now();
    let outcome = handler.handle(message.clone()).await;
    record_latency(&topic, "handle", started.elapsed(), backend);

    let settled = match outcome {
        Ok(()) => message.ack().await,
        Err(e) => {
            record_handler_error(&topic, &message_id, &e.to_string(), backend);
            message.nack(true).await
        }
    };
    if let Err(e) = settled {
        record_backend_error(&topic, "settle", &e.to_string(), backend);
    }
}
