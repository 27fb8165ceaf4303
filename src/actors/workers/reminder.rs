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

use std::time::{Duration, Instant};

use chrono::Utc;
use sqlx::postgres::PgPool;
use xtra::prelude::*;

use crate::{
	actors::ControlConfig,
	bus::BusHandle,
	database::{flush, history, locks},
	error::Result,
	types::{Die, ReconcileRequest, StaleRef},
};

/// The periodic reminder loop. Every `interval` (or on an external wake-up)
/// it pages through stale evaluation rows, claims each entity behind the
/// per-entity execution lock, coalesces a flush entry and emits one
/// reconciliation request on the bus.
///
/// Per-entity failures never stop a cycle; they are logged and the entity is
/// retried once its lock lease expires.
pub struct ReminderWorker {
	pool: PgPool,
	bus: BusHandle,
	control: ControlConfig,
}

impl ReminderWorker {
	pub fn new(pool: PgPool, bus: BusHandle, control: ControlConfig) -> Self {
		Self { pool, bus, control }
	}

	async fn cycle(&self) -> Result<u32> {
		let deadline = Instant::now() + Duration::from_secs(self.control.cycle_deadline);
		let threshold = Utc::now() - chrono::Duration::seconds(self.control.staleness_threshold as i64);
		let mut emitted = 0;
		let mut cursor = None;

		loop {
			let batch = {
				let mut conn = self.pool.acquire().await?;
				history::list_stale_from(&mut conn, threshold, cursor, self.control.batch_size as i64).await?
			};
			let full_page = batch.len() as u32 == self.control.batch_size;
			cursor = batch.last().map(history::StaleCursor::of);

			for stale in &batch {
				if Instant::now() >= deadline {
					log::debug!("cycle deadline elapsed after {} reminders", emitted);
					return Ok(emitted);
				}
				if let Some(cap) = self.control.max_per_cycle {
					if emitted >= cap {
						log::debug!("per-cycle cap of {} reminders reached", cap);
						return Ok(emitted);
					}
				}
				match self.remind_one(stale).await {
					Ok(true) => emitted += 1,
					// somebody else holds the lock; theirs to remind
					Ok(false) => {}
					Err(e) => log::warn!("reminder for entity {} failed: {}", stale.entity_id, e),
				}
			}

			if !full_page {
				return Ok(emitted);
			}
		}
	}

	/// Claim one stale entity and emit its reconciliation request.
	/// Returns false when the lock is held and still fresh.
	async fn remind_one(&self, stale: &StaleRef) -> Result<bool> {
		let mut conn = self.pool.acquire().await?;
		let lock = match locks::acquire_if_expired(
			&mut conn,
			stale.entity_id,
			stale.project_id,
			stale.kind,
			self.control.lock_threshold_seconds,
		)
		.await?
		{
			Some(lock) => lock,
			None => return Ok(false),
		};

		match flush::enqueue(&mut conn, stale.entity_id, stale.project_id, stale.kind).await? {
			Some(entry) => log::trace!("queued flush {} for entity {}", entry.id, entry.entity_id),
			None => log::trace!("flush for entity {} already queued", stale.entity_id),
		}
		// the publish can be slow; give the connection back to the pool first
		drop(conn);

		let request = ReconcileRequest::from_stale(stale);
		if let Err(e) = self.bus.publish(&request).await {
			// drop the lock so a future cycle retries this entity
			let mut conn = self.pool.acquire().await?;
			locks::release(&mut conn, stale.entity_id, lock.locked_by).await?;
			return Err(e);
		}
		Ok(true)
	}
}

#[async_trait::async_trait]
impl Actor for ReminderWorker {
	async fn started(&mut self, ctx: &mut Context<Self>) {
		// first pass right away, then on every tick
		ctx.address()
			.expect("Actor just started")
			.do_send(Tick)
			.expect("Actor cannot be disconnected; just started");

		ctx.notify_interval(Duration::from_secs(self.control.interval), || Tick);
	}
}

struct Tick;
impl Message for Tick {
	type Result = ();
}

#[async_trait::async_trait]
impl Handler<Tick> for ReminderWorker {
	async fn handle(&mut self, _: Tick, _: &mut Context<Self>) {
		let now = Instant::now();
		match self.cycle().await {
			Ok(0) => {}
			Ok(n) => log::info!("emitted {} reminders in {:?}", n, now.elapsed()),
			Err(e) => log::error!("{}", e.to_string()),
		}
	}
}

/// External wake-up, e.g. from the entity listener.
pub struct Wake;
impl Message for Wake {
	type Result = ();
}

#[async_trait::async_trait]
impl Handler<Wake> for ReminderWorker {
	async fn handle(&mut self, _: Wake, _: &mut Context<Self>) {
		log::debug!("woken up outside the timer");
		if let Err(e) = self.cycle().await {
			log::error!("{}", e.to_string());
		}
	}
}

#[async_trait::async_trait]
impl Handler<Die> for ReminderWorker {
	async fn handle(&mut self, _: Die, ctx: &mut Context<Self>) {
		ctx.stop();
	}
}
