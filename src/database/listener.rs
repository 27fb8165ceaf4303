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

//! A PostgreSQL listener.
//! Listens on the notification channels fed by the row triggers and runs
//! the registered task on each wakeup; the reminder system uses it to get
//! freshly onboarded entities reconciled ahead of the next timer tick.

use std::time::Duration;

use async_std::{
	future::timeout,
	task::{self, JoinHandle},
};
use futures::{future::BoxFuture, FutureExt, StreamExt};
use serde::Deserialize;
use sqlx::{
	postgres::{PgConnection, PgListener, PgNotification},
	prelude::*,
};
use uuid::Uuid;

use crate::error::{ReminderError, Result};

/// A notification from Postgres about a changed row
#[derive(PartialEq, Debug, Deserialize)]
pub struct Notif {
	pub table: Table,
	pub action: Action,
	pub id: Uuid,
}

#[derive(PartialEq, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
	Entities,
}

#[derive(PartialEq, Debug, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
	Insert,
	Update,
	Delete,
}

pub enum Channel {
	/// Listen on the entities table for new INSERTS
	Entities,
}

impl From<&Channel> for String {
	fn from(chan: &Channel) -> String {
		match chan {
			Channel::Entities => "entity_update".to_string(),
		}
	}
}

pub struct Builder<F>
where
	F: 'static + Send + Sync + for<'a> Fn(Notif, &'a mut PgConnection) -> BoxFuture<'a, Result<()>>,
{
	task: F,
	channels: Vec<Channel>,
	pg_url: String,
}

impl<F> Builder<F>
where
	F: 'static + Send + Sync + for<'a> Fn(Notif, &'a mut PgConnection) -> BoxFuture<'a, Result<()>>,
{
	pub fn new(url: &str, f: F) -> Self {
		Self { task: f, channels: Vec::new(), pg_url: url.to_string() }
	}

	#[must_use]
	pub fn listen_on(mut self, channel: Channel) -> Self {
		self.channels.push(channel);
		self
	}

	/// Spawns this listener which will work on its assigned tasks in the background
	pub async fn spawn(self) -> Result<Listener> {
		let (tx, rx) = flume::bounded(1);
		let pg_url = self.pg_url.clone();

		// Connect and LISTEN before the task is spawned so that a
		// notification sent right after `spawn` returns cannot be missed.
		let mut listener = PgListener::connect(&pg_url).await?;
		let channels = self.channels.iter().map(String::from).collect::<Vec<String>>();
		listener.listen_all(channels.iter().map(|s| s.as_ref())).await?;

		let fut = async move {
			let mut conn = PgConnection::connect(&pg_url).await?;
			let mut listener = listener.into_stream();

			loop {
				let mut listen_fut = listener.next().fuse();

				futures::select! {
					notif = listen_fut => {
						match notif {
							Some(Ok(v)) => self.handle_listen_event(v, &mut conn).await,
							Some(Err(e)) => {
								log::error!("{:?}", e);
							},
							None => {
								break;
							},
						}
					},
					r = rx.recv_async() => {
						match r {
							Ok(_) => break,
							Err(e) => {
								log::warn!("Ending due to: {:?}", e);
							}
						}
					},
					complete => break,
				};
			}

			// collect the rest of the notifications before exiting, as long
			// as the collection completes in a reasonable amount of time
			let gather_unfinished = async {
				for msg in listener.collect::<Vec<_>>().await {
					match msg {
						Ok(v) => self.handle_listen_event(v, &mut conn).await,
						Err(e) => log::error!("{:?}", e),
					}
				}
			};
			if timeout(Duration::from_secs(1), gather_unfinished).await.is_err() {
				log::warn!("clean-up notification collection timed out")
			}
			Ok::<(), ReminderError>(())
		};

		let handle = Some(task::spawn(fut));
		Ok(Listener { tx, handle })
	}

	/// Handle a listen event from Postgres. A payload that does not decode
	/// is logged and skipped, never fatal to the listener.
	async fn handle_listen_event(&self, notif: PgNotification, conn: &mut PgConnection) {
		let payload: Notif = match serde_json::from_str(notif.payload()) {
			Ok(p) => p,
			Err(e) => {
				log::warn!("malformed notification on `{}`: {}", notif.channel(), e);
				return;
			}
		};
		if let Err(e) = (self.task)(payload, conn).await {
			log::error!("listener task failed: {}", e);
		}
	}
}

/// A Postgres listener which listens for events on postgres channels using
/// the LISTEN/NOTIFY pattern. Dropping this will kill the listener.
pub struct Listener {
	// Shutdown signal
	tx: flume::Sender<()>,
	handle: Option<JoinHandle<Result<()>>>,
}

impl Listener {
	pub fn builder<F>(pg_url: &str, f: F) -> Builder<F>
	where
		F: 'static + Send + Sync + for<'a> Fn(Notif, &'a mut PgConnection) -> BoxFuture<'a, Result<()>>,
	{
		Builder::new(pg_url, f)
	}

	pub async fn kill(&mut self) -> Result<()> {
		let _ = self.tx.try_send(());
		if let Some(handle) = self.handle.take() {
			handle.await?;
		}
		Ok(())
	}

	pub async fn kill_async(mut self) {
		if let Err(e) = self.kill().await {
			log::error!("failed to terminate listener {}", e);
		}
	}
}

impl Drop for Listener {
	fn drop(&mut self) {
		if self.handle.is_some() {
			if let Err(e) = task::block_on(self.kill()) {
				log::error!("failed to terminate listener {}", e)
			}
		}
	}
}
