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

//! Order processing walk-through
//!
//! An `audit` group only looks at large orders from VIP customers (two composed
//! filters); a `shipping` group processes everything. One order is scheduled
//! with a delay.
//!
//! ```bash
//! RUST_LOG=info cargo run -p conduit-mq --example orders
//! CONDUIT_MQ_BACKEND=redis RUST_LOG=debug cargo run -p conduit-mq --example orders --features redis-backend
//! ```

use conduit_mq::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Serialize, Deserialize)]
struct Order {
    id: u32,
    customer: String,
    amount: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = MqConfig::from_env()?;
    let client = create_client(config).await?;
    info!(backend = client.backend(), "Client ready");

    let audit = handler_fn(|msg: MessageRef| async move {
        let order: Order = serde_json::from_slice(msg.payload())?;
        info!(order_id = order.id, amount = order.amount, "audit: large VIP order");
        Ok(())
    });
    client
        .subscribe(
            "orders",
            audit,
            SubscribeOptions::new()
                .with_group("audit")
                .with_filter(|m| {
                    m.metadata()
                        .extra_value("tier")
                        .and_then(|v| v.as_str())
                        .map_or(false, |tier| tier == "vip")
                })
                .with_filter(|m| {
                    m.metadata()
                        .extra_value("amount")
                        .and_then(|v| v.as_u64())
                        .map_or(false, |amount| amount >= 1_000)
                }),
        )
        .await?;

    let shipping = handler_fn(|msg: MessageRef| async move {
        let order: Order = serde_json::from_slice(msg.payload())?;
        info!(
            order_id = order.id,
            customer = %order.customer,
            partition = msg.metadata().partition,
            "shipping: order packed"
        );
        Ok(())
    });
    client
        .subscribe("orders", shipping, SubscribeOptions::new().with_group("shipping"))
        .await?;

    let orders = [
        (Order { id: 1, customer: "alice".into(), amount: 250 }, "regular"),
        (Order { id: 2, customer: "bob".into(), amount: 4_200 }, "vip"),
        (Order { id: 3, customer: "alice".into(), amount: 1_800 }, "vip"),
    ];
    for (order, tier) in &orders {
        client
            .publish(
                "orders",
                serde_json::to_vec(order)?,
                PublishOptions::new()
                    .with_key(order.customer.clone())
                    .with_extra("tier", tier)
                    .with_extra("amount", order.amount),
            )
            .await?;
    }

    let late = Order { id: 4, customer: "carol".into(), amount: 90 };
    client
        .publish(
            "orders",
            serde_json::to_vec(&late)?,
            PublishOptions::new()
                .with_key(late.customer.clone())
                .with_delay(Duration::from_millis(500)),
        )
        .await?;

    tokio::time::sleep(Duration::from_secs(2)).await;
    client.close().await?;
    info!("done");
    Ok(())
}
