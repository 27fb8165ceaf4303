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

use std::path::Path;

use anyhow::{Context, Result};

use policy_reminder::ReminderConfig;

use crate::cli_opts::CliOpts;

#[derive(Debug, Clone)]
pub struct Config {
	cli: CliOpts,
	reminder: ReminderConfig,
}

impl Config {
	pub fn new() -> Result<Self> {
		let cli = CliOpts::parse();
		let file = cli.file.clone().context("a configuration file is required (pass it with --config)")?;
		let reminder = Self::parse_file(file.as_path())?;
		log::debug!("{:?}", reminder);

		Ok(Self { cli, reminder })
	}

	fn parse_file(path: &Path) -> Result<ReminderConfig> {
		let toml_str = std::fs::read_to_string(path)
			.with_context(|| format!("could not read config file {}", path.display()))?;
		toml::from_str(toml_str.as_str()).context("malformed config file")
	}

	/// Stdout log level: CLI verbosity wins over the `logging.level` key.
	pub fn log_level(&self) -> log::LevelFilter {
		if self.cli.log_level > log::LevelFilter::Info {
			return self.cli.log_level;
		}
		match self.reminder.logging.level.as_str() {
			"off" => log::LevelFilter::Off,
			"error" => log::LevelFilter::Error,
			"warn" => log::LevelFilter::Warn,
			"debug" => log::LevelFilter::Debug,
			"trace" => log::LevelFilter::Trace,
			_ => log::LevelFilter::Info,
		}
	}

	pub fn reminder(&self) -> &ReminderConfig {
		&self.reminder
	}
}
