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

//! Actor harness for the reminder service. `System::new` wires the database
//! actor, the reminder loop and the Postgres wake-up listener together and
//! owns their lifecycle.

mod workers;

use futures::{future::BoxFuture, FutureExt};
use serde::Deserialize;
use xtra::{prelude::*, spawn::Smol, Disconnected};

pub use self::workers::{DatabaseActor, GetState, ReminderWorker, StateResponse, Wake};
use crate::{
	bus::{BusConfig, BusHandle},
	database::{Channel, Database, DatabaseConfig, Listener},
	error::Result,
	types::Die,
};

/// Provides parameters that are passed in from the user.
/// Provides context that every actor may use
#[derive(Clone, Debug, Deserialize)]
pub struct SystemConfig {
	pub database: DatabaseConfig,
	pub bus: BusConfig,
	#[serde(default)]
	pub control: ControlConfig,
}

#[derive(Copy, Clone, Debug, Deserialize)]
pub struct ControlConfig {
	/// Seconds between reminder cycles.
	#[serde(default = "default_interval")]
	pub(crate) interval: u64,
	/// Upper bound on stale refs fetched per page.
	#[serde(default = "default_batch_size")]
	pub(crate) batch_size: u32,
	/// How old (seconds) an evaluation must be to count as stale.
	#[serde(default = "default_staleness_threshold")]
	pub(crate) staleness_threshold: u64,
	/// Minimum age (seconds) of an existing lock before it may be stolen.
	#[serde(default = "default_lock_threshold")]
	pub(crate) lock_threshold_seconds: u64,
	/// Optional safety cap on reminders per cycle.
	#[serde(default)]
	pub(crate) max_per_cycle: Option<u32>,
	/// Seconds a single cycle may keep paging before yielding.
	#[serde(default = "default_cycle_deadline")]
	pub(crate) cycle_deadline: u64,
}

impl Default for ControlConfig {
	fn default() -> Self {
		Self {
			interval: default_interval(),
			batch_size: default_batch_size(),
			staleness_threshold: default_staleness_threshold(),
			lock_threshold_seconds: default_lock_threshold(),
			max_per_cycle: None,
			cycle_deadline: default_cycle_deadline(),
		}
	}
}

const fn default_interval() -> u64 {
	60
}

const fn default_batch_size() -> u32 {
	100
}

const fn default_staleness_threshold() -> u64 {
	3600
}

const fn default_lock_threshold() -> u64 {
	60
}

const fn default_cycle_deadline() -> u64 {
	30
}

struct Actors {
	db: Address<DatabaseActor>,
	reminder: Address<ReminderWorker>,
}

/// Control the execution of the reminder service.
/// Will exit on Drop.
pub struct System {
	config: SystemConfig,
	start_tx: flume::Sender<()>,
	kill_tx: flume::Sender<()>,
	/// handle to the thread driving the actors
	handle: jod_thread::JoinHandle<Result<()>>,
}

impl System {
	pub fn new(config: SystemConfig) -> Result<Self> {
		let (start_tx, kill_tx, handle) = Self::start(config.clone());
		Ok(Self { config, start_tx, kill_tx, handle })
	}

	pub(crate) fn drive(&self) {
		self.start_tx.send(()).expect("Could not start actors");
	}

	/// Start the actors and begin driving their execution
	fn start(conf: SystemConfig) -> (flume::Sender<()>, flume::Sender<()>, jod_thread::JoinHandle<Result<()>>) {
		let (tx_start, rx_start) = flume::bounded(1);
		let (tx_kill, rx_kill) = flume::bounded(1);

		let handle = jod_thread::spawn(move || {
			// block until we receive the message to start
			let _ = rx_start.recv();

			smol::block_on(Self::main_loop(conf, rx_kill))?;
			Ok(())
		});

		(tx_start, tx_kill, handle)
	}

	async fn main_loop(conf: SystemConfig, rx: flume::Receiver<()>) -> Result<()> {
		let actors = Self::spawn_actors(&conf).await?;
		let listener = Self::init_listener(conf.database.url.as_str(), actors.reminder.clone()).await?;

		// everything from here on is message-driven; park until the kill signal
		let _ = rx.recv_async().await;

		Self::kill_actors(actors).await?;
		listener.kill_async().await;
		Ok(())
	}

	async fn spawn_actors(conf: &SystemConfig) -> Result<Actors> {
		let database = Database::new(conf.database.url.as_str()).await?;
		let db = DatabaseActor::new(database).create(None).spawn(&mut Smol::Global);
		let pool = db.send(GetState::Pool).await??.pool();
		let bus = BusHandle::connect(&conf.bus).await?;
		let reminder = ReminderWorker::new(pool, bus, conf.control).create(None).spawn(&mut Smol::Global);

		Ok(Actors { db, reminder })
	}

	async fn init_listener(pg_url: &str, reminder: Address<ReminderWorker>) -> Result<Listener> {
		Listener::builder(pg_url, move |notif, _conn| {
			let reminder = reminder.clone();
			async move {
				log::debug!("entity {} changed; waking the reminder loop", notif.id);
				reminder.send(Wake).await?;
				Ok(())
			}
			.boxed()
		})
		.listen_on(Channel::Entities)
		.spawn()
		.await
	}

	async fn kill_actors(actors: Actors) -> Result<()> {
		let fut: Vec<BoxFuture<'_, Result<(), Disconnected>>> =
			vec![Box::pin(actors.reminder.send(Die)), Box::pin(actors.db.send(Die))];
		futures::future::join_all(fut).await;
		Ok(())
	}

	pub(crate) fn stop(self) -> Result<()> {
		let _ = self.kill_tx.send(());
		self.handle.join()
	}

	pub(crate) fn config(&self) -> &SystemConfig {
		&self.config
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn control_defaults_match_documentation() {
		let control = ControlConfig::default();
		assert_eq!(control.interval, 60);
		assert_eq!(control.batch_size, 100);
		assert_eq!(control.staleness_threshold, 3600);
		assert_eq!(control.lock_threshold_seconds, 60);
		assert_eq!(control.max_per_cycle, None);
		assert_eq!(control.cycle_deadline, 30);
	}

	#[test]
	fn control_deserializes_with_partial_keys() {
		let control: ControlConfig = serde_json::from_str(r#"{ "interval": 5, "max_per_cycle": 10 }"#).unwrap();
		assert_eq!(control.interval, 5);
		assert_eq!(control.max_per_cycle, Some(10));
		assert_eq!(control.batch_size, default_batch_size());
	}
}
