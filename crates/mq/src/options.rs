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

//! Publish and subscribe option builders

use crate::message::{Extra, Message};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Client-side message predicate; `true` keeps the message
pub type FilterFn = Arc<dyn Fn(&dyn Message) -> bool + Send + Sync>;

/// Options for a single publish
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Routing key; decides the partition
    pub key: String,
    /// Deferred delivery; zero publishes immediately
    pub delay: Duration,
    /// Application metadata
    pub extra: Extra,
}

impl PublishOptions {
    /// Empty options: no key, no delay, empty extra map
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the routing key
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Defer the publish by `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Attach one extra field. A value that cannot be converted to JSON is
    /// skipped with a warning.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        let key = key.into();
        match serde_json::to_value(value) {
            Ok(v) => {
                self.extra.insert(key, v);
            }
            Err(e) => warn!(key = %key, error = %e, "Skipping extra field that is not JSON-encodable"),
        }
        self
    }
}

/// Options for a subscription
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    /// Consumer group; empty means a private auto-named group
    pub group: String,
    /// Consumer name inside the group
    pub consumer_id: String,
    /// Partitions to consume; `None` means all
    pub specific_partitions: Option<Vec<usize>>,
    /// Client-side filter
    pub filter: Option<FilterFn>,
    /// Stops this subscription when cancelled
    pub cancellation: Option<CancellationToken>,
}

impl std::fmt::Debug for SubscribeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("group", &self.group)
            .field("consumer_id", &self.consumer_id)
            .field("specific_partitions", &self.specific_partitions)
            .field("filter", &self.filter.is_some())
            .field("cancellation", &self.cancellation.is_some())
            .finish()
    }
}

impl SubscribeOptions {
    /// Empty options: private group, all partitions, no filter
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the named consumer group
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// Name this consumer inside its group
    pub fn with_consumer_id(mut self, consumer_id: impl Into<String>) -> Self {
        self.consumer_id = consumer_id.into();
        self
    }

    /// Consume only the given partitions. An empty list clears the assignment.
    pub fn with_partitions(mut self, partitions: impl IntoIterator<Item = usize>) -> Self {
        let partitions: Vec<usize> = partitions.into_iter().collect();
        self.specific_partitions = if partitions.is_empty() {
            None
        } else {
            Some(partitions)
        };
        self
    }

    /// Add a filter. Repeated calls combine with logical AND.
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&dyn Message) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(match self.filter.take() {
            None => Arc::new(filter),
            Some(prev) => Arc::new(move |msg: &dyn Message| prev(msg) && filter(msg)),
        });
        self
    }

    /// Stop the subscription when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Whether `message` passes the filter
    pub fn accepts(&self, message: &dyn Message) -> bool {
        self.filter.as_ref().map_or(true, |f| f(message))
    }

    /// Group name to use, generating a private one when unset
    pub(crate) fn resolved_group(&self) -> String {
        if self.group.is_empty() {
            format!("default_{}", ulid::Ulid::new())
        } else {
            self.group.clone()
        }
    }

    /// Token that fires on client close or on this subscription's own token
    pub(crate) fn stop_token(&self, root: &CancellationToken) -> CancellationToken {
        let token = root.child_token();
        if let Some(own) = self.cancellation.clone() {
            if own.is_cancelled() {
                token.cancel();
                return token;
            }
            let linked = token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = own.cancelled() => linked.cancel(),
                    _ = linked.cancelled() => {}
                }
            });
        }
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Delivery, Metadata, NoopAck};

    fn keyed(key: &str) -> Delivery<NoopAck> {
        let mut meta = Metadata::new("t");
        meta.key = key.to_string();
        Delivery::new(b"x".to_vec(), meta, NoopAck)
    }

    #[test]
    fn test_publish_defaults() {
        let opts = PublishOptions::new();
        assert!(opts.key.is_empty());
        assert_eq!(opts.delay, Duration::ZERO);
        assert!(opts.extra.is_empty());
    }

    #[test]
    fn test_with_extra() {
        let opts = PublishOptions::new()
            .with_key("user1")
            .with_extra("amount", 42)
            .with_extra("tags", vec!["a", "b"]);
        assert_eq!(opts.extra.len(), 2);
        assert_eq!(opts.extra["amount"], serde_json::json!(42));

        // non-string map keys cannot become JSON
        let mut bad = std::collections::HashMap::new();
        bad.insert((1, 2), "v");
        let opts = opts.with_extra("bad", bad);
        assert!(!opts.extra.contains_key("bad"));
    }

    #[test]
    fn test_with_partitions() {
        let opts = SubscribeOptions::new().with_partitions([0, 2]);
        assert_eq!(opts.specific_partitions, Some(vec![0, 2]));

        let opts = opts.with_partitions(Vec::<usize>::new());
        assert_eq!(opts.specific_partitions, None);
    }

    #[test]
    fn test_filters_compose_with_and() {
        let opts = SubscribeOptions::new()
            .with_filter(|m| m.metadata().key == "A")
            .with_filter(|m| m.payload() == b"x");
        assert!(opts.accepts(&keyed("A")));
        assert!(!opts.accepts(&keyed("B")));

        let opts = opts.with_filter(|_| false);
        assert!(!opts.accepts(&keyed("A")));

        assert!(SubscribeOptions::new().accepts(&keyed("anything")));
    }

    #[test]
    fn test_resolved_group() {
        let named = SubscribeOptions::new().with_group("billing");
        assert_eq!(named.resolved_group(), "billing");

        let anon = SubscribeOptions::new();
        let a = anon.resolved_group();
        let b = anon.resolved_group();
        assert!(a.starts_with("default_"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_stop_token_follows_both_sources() {
        let root = CancellationToken::new();
        let own = CancellationToken::new();
        let opts = SubscribeOptions::new().with_cancellation(own.clone());

        let stop = opts.stop_token(&root);
        assert!(!stop.is_cancelled());
        own.cancel();
        tokio::time::timeout(Duration::from_secs(1), stop.cancelled())
            .await
            .unwrap();
        assert!(!root.is_cancelled());

        let stop = SubscribeOptions::new().stop_token(&root);
        root.cancel();
        assert!(stop.is_cancelled());
    }
}
