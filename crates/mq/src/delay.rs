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

//! Deferred publishing shared by all backends

use crate::client::MqResult;
use crate::observability::record_backend_error;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Run `publish` after `delay` on a background task.
///
/// The task is detached from the caller: dropping the caller's future does not
/// cancel it. Client shutdown (`shutdown` cancelled) abandons it. Errors are
/// logged because nobody is left to receive them.
pub(crate) fn spawn_delayed<F>(
    backend: &'static str,
    topic: String,
    delay: Duration,
    shutdown: CancellationToken,
    publish: F,
) -> JoinHandle<()>
where
    F: Future<Output = MqResult<()>> + Send + 'static,
{
    debug!(topic = %topic, backend = %backend, delay_ms = delay.as_millis() as u64, "Scheduling delayed publish");
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!(topic = %topic, backend = %backend, "Delayed publish abandoned on shutdown");
            }
            _ = tokio::time::sleep(delay) => {
                if let Err(e) = publish.await {
                    record_backend_error(&topic, "delayed_publish", &e.to_string(), backend);
                }
            }
        }
    })
}
