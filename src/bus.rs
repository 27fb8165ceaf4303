// Copyright 2024-2026 Parity Technologies (UK) Ltd.
// This file is part of policy-reminder.

// policy-reminder is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// policy-reminder is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with policy-reminder.  If not, see <http://www.gnu.org/licenses/>.

//! The outbound message-bus edge. One durable topic exchange, one message
//! per reminded entity, routing key equal to the entity id. Delivery is
//! at-least-once; consumers must be idempotent per entity id.

use std::sync::Arc;

use async_amqp::*;
use lapin::{
	options::{BasicPublishOptions, ExchangeDeclareOptions},
	types::FieldTable,
	BasicProperties, Connection, ConnectionProperties, ExchangeKind,
};
use serde::Deserialize;

use crate::{error::Result, types::ReconcileRequest};

/// Topic the reconciliation requests are published on.
pub const RECONCILE_TOPIC: &str = "entity.reconcile.request";

#[derive(Clone, Debug, Deserialize)]
pub struct BusConfig {
	/// AMQP url, e.g. `amqp://localhost:5672`.
	pub addr: String,
	#[serde(default = "default_exchange")]
	pub exchange: String,
}

fn default_exchange() -> String {
	RECONCILE_TOPIC.to_string()
}

/// Thin wrapper over a `Channel` on a shared connection.
#[derive(Clone)]
pub struct BusHandle {
	// keeps the connection alive for as long as any handle exists
	_conn: Arc<Connection>,
	channel: lapin::Channel,
	exchange: String,
}

impl BusHandle {
	/// Connect and declare the exchange.
	pub async fn connect(conf: &BusConfig) -> Result<Self> {
		let conn = Connection::connect(&conf.addr, ConnectionProperties::default().with_async_std()).await?;
		let channel = conn.create_channel().await?;
		channel
			.exchange_declare(
				conf.exchange.as_str(),
				ExchangeKind::Topic,
				ExchangeDeclareOptions { durable: true, ..Default::default() },
				FieldTable::default(),
			)
			.await?;
		Ok(Self { _conn: Arc::new(conn), channel, exchange: conf.exchange.clone() })
	}

	/// Publish one reconciliation request, keyed by its entity id.
	pub async fn publish(&self, request: &ReconcileRequest) -> Result<()> {
		let payload = serde_json::to_vec(request)?;
		let key = request.entity_id.to_string();
		self.channel
			.basic_publish(
				self.exchange.as_str(),
				key.as_str(),
				BasicPublishOptions::default(),
				payload,
				BasicProperties::default(),
			)
			.await?;
		log::trace!("published reconcile request for entity {}", request.entity_id);
		Ok(())
	}
}
