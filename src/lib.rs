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

//! A background service which keeps policy evaluations fresh: it
//! periodically discovers entities whose evaluations went stale, claims
//! them under a leased per-entity lock and emits reconciliation requests
//! onto a message bus for the downstream evaluator. The same crate holds
//! the evaluation-history ledger those reminders are derived from.

#![forbid(unsafe_code)]
#![deny(dead_code)]

mod actors;
pub mod bus;
pub mod database;
mod error;
mod logger;
mod service;
mod types;
mod util;

pub use self::actors::{ControlConfig, DatabaseActor, GetState, StateResponse, System, SystemConfig, Wake};
pub use self::bus::{BusConfig, BusHandle, RECONCILE_TOPIC};
pub use self::database::{queries, Database, DatabaseConfig};
pub use self::error::{ReminderError, Result};
pub use self::logger::init as init_logger;
pub use self::service::{LogConfig, Reminder, ReminderBuilder, ReminderConfig};
pub use self::types::*;
