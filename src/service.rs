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

use serde::Deserialize;

use crate::{
	actors::{ControlConfig, System, SystemConfig},
	bus::BusConfig,
	database::{self, DatabaseConfig},
	error::Result,
};

/// The control interface of a running reminder service.
#[async_trait::async_trait(?Send)]
pub trait Reminder {
	/// start driving the reminder loop
	fn drive(&mut self) -> Result<()>;

	/// this method will block indefinitely
	async fn block_until_stopped(&self);

	/// shutdown the system
	fn shutdown(self) -> Result<()>;

	/// Shutdown the system when self is boxed (useful when erasing the types of the runtime)
	fn boxed_shutdown(self: Box<Self>) -> Result<()>;

	/// Get a reference to the config the actors are using
	fn context(&self) -> &SystemConfig;
}

#[async_trait::async_trait(?Send)]
impl Reminder for System {
	fn drive(&mut self) -> Result<()> {
		System::drive(self);
		Ok(())
	}

	async fn block_until_stopped(&self) {
		loop {
			smol::Timer::after(std::time::Duration::from_secs(1)).await;
		}
	}

	fn shutdown(self) -> Result<()> {
		self.stop()
	}

	fn boxed_shutdown(self: Box<Self>) -> Result<()> {
		self.stop()
	}

	fn context(&self) -> &SystemConfig {
		self.config()
	}
}

/// Logging section of the service configuration. The level string is parsed
/// by the launcher; anything unknown falls back to `info`.
#[derive(Clone, Debug, Deserialize)]
pub struct LogConfig {
	#[serde(default = "default_log_level")]
	pub level: String,
}

impl Default for LogConfig {
	fn default() -> Self {
		Self { level: default_log_level() }
	}
}

fn default_log_level() -> String {
	"info".to_string()
}

/// Top-level service configuration, usually deserialized from a TOML file.
#[derive(Clone, Debug, Deserialize)]
pub struct ReminderConfig {
	pub database: DatabaseConfig,
	pub bus: BusConfig,
	#[serde(default)]
	pub control: ControlConfig,
	#[serde(default)]
	pub logging: LogConfig,
}

/// Assembles a [`System`] out of a [`ReminderConfig`], running the
/// database migrations first.
pub struct ReminderBuilder {
	config: ReminderConfig,
}

impl ReminderBuilder {
	pub fn with_config(config: ReminderConfig) -> Self {
		Self { config }
	}

	pub async fn build(self) -> Result<System> {
		database::migrate(&self.config.database.url).await?;

		let conf = SystemConfig {
			database: self.config.database,
			bus: self.config.bus,
			control: self.config.control,
		};
		System::new(conf)
	}
}
