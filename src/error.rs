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

use std::io;

use thiserror::Error;
use uuid::Uuid;

pub type Result<T, E = ReminderError> = std::result::Result<T, E>;

/// Policy Reminder Error Enum
#[derive(Debug, Error)]
pub enum ReminderError {
	// Rust std io error
	#[error(transparent)]
	Io(#[from] io::Error),

	// encoding error
	#[error(transparent)]
	Serialization(#[from] serde_json::Error),

	// database error
	#[error("sqlx error: {0}")]
	Sql(#[from] sqlx::Error),
	#[error("migration error: {0}")]
	Migration(#[from] sqlx::migrate::MigrateError),

	// message bus error
	#[error("bus error: {0}")]
	Bus(#[from] lapin::Error),

	// actor and channel error
	#[error("Trying to send to disconnected actor")]
	Disconnected,
	#[error("Sending on a disconnected channel")]
	Channel,

	/// A stored property envelope declared a version this build does not speak.
	#[error("property envelope version `{0}` is not supported")]
	BadPropertyVersion(String),

	/// Unique-key violation outside the designed lock/flush signals.
	#[error("conflict: {0}")]
	Conflict(String),

	/// `delete_by_ids` refused a row still referenced by a latest-evaluation pointer.
	#[error("evaluation status {0} is still referenced by a latest-evaluation pointer")]
	StatusReferenced(Uuid),

	#[error("unknown entity kind `{0}`")]
	UnknownEntityKind(String),
	#[error("unknown evaluation status `{0}`")]
	UnknownStatus(String),

	#[error("{0}")]
	Shutdown(String),
}

impl From<xtra::Disconnected> for ReminderError {
	fn from(_: xtra::Disconnected) -> Self {
		Self::Disconnected
	}
}

impl<T> From<flume::SendError<T>> for ReminderError {
	fn from(_: flume::SendError<T>) -> Self {
		Self::Channel
	}
}
