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

//! Messaging observability helpers
//!
//! ## Purpose
//! Structured `tracing` events for publish, delivery and acknowledgement so
//! every backend reports the same fields (`topic`, `backend`, `operation`).
//!
//! ## Usage
//! ```rust
//! use conduit_mq::observability::*;
//!
//! record_publish("orders", "user1", 2, "memory");
//! record_ack("orders", "1700000000000-0", "redis");
//! record_nack("orders", "42", true, "kafka");
//! ```

use std::time::Duration;
use tracing::{debug, trace, warn};

/// Record a published message
pub fn record_publish(topic: &str, key: &str, partition: usize, backend: &str) {
    trace!(
        topic = %topic,
        key = %key,
        partition = partition,
        backend = %backend,
        operation = "publish",
        "Message published"
    );
}

/// Record a message dropped because a consumer group's partition buffer is full
///
/// ## Observability
/// - Logs at debug level; drops are expected under backpressure
pub fn record_dropped(topic: &str, group: &str, partition: usize, backend: &str) {
    debug!(
        topic = %topic,
        group = %group,
        partition = partition,
        backend = %backend,
        operation = "drop",
        "Partition buffer full, message dropped for group"
    );
}

/// Record a message rejected by a subscription filter
pub fn record_filtered(topic: &str, message_id: &str, backend: &str) {
    trace!(
        topic = %topic,
        message_id = %message_id,
        backend = %backend,
        operation = "filter",
        "Message skipped by filter"
    );
}

/// Record a successful ACK
pub fn record_ack(topic: &str, message_id: &str, backend: &str) {
    debug!(
        topic = %topic,
        message_id = %message_id,
        backend = %backend,
        operation = "ack",
        "Message acknowledged"
    );
}

/// Record a NACK
pub fn record_nack(topic: &str, message_id: &str, requeue: bool, backend: &str) {
    debug!(
        topic = %topic,
        message_id = %message_id,
        requeue = requeue,
        backend = %backend,
        operation = "nack",
        "Message nacked (requeue={})",
        requeue
    );
}

/// Record a handler failure
///
/// ## Observability
/// - Logs at warn level; the error never reaches the subscriber's caller
pub fn record_handler_error(topic: &str, message_id: &str, error: &str, backend: &str) {
    warn!(
        topic = %topic,
        message_id = %message_id,
        error = %error,
        backend = %backend,
        operation = "handle",
        "Handler failed: {}",
        error
    );
}

/// Record a backend operation error
///
/// ## Arguments
/// * `topic` - Topic (or stream) involved
/// * `operation` - Operation that failed (e.g., "publish", "read", "ack")
/// * `error` - Error message
/// * `backend` - Backend name
pub fn record_backend_error(topic: &str, operation: &str, error: &str, backend: &str) {
    tracing::error!(
        topic = %topic,
        operation = %operation,
        error = %error,
        backend = %backend,
        "Operation '{}' failed: {}",
        operation,
        error
    );
}

/// Record operation latency
pub fn record_latency(topic: &str, operation: &str, duration: Duration, backend: &str) {
    let latency_us = duration.as_micros() as u64;

    trace!(
        topic = %topic,
        operation = %operation,
        latency_us = latency_us,
        backend = %backend,
        "Operation latency"
    );
}
