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

use clap::{load_yaml, App};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct CliOpts {
	pub file: Option<PathBuf>,
	pub log_level: log::LevelFilter,
}

impl CliOpts {
	pub fn parse() -> Self {
		let yaml = load_yaml!("cli_opts.yaml");
		let matches = App::from(yaml).get_matches();
		let log_level = match matches.occurrences_of("verbose") {
			0 | 1 | 2 => log::LevelFilter::Info,
			3 => log::LevelFilter::Debug,
			_ => log::LevelFilter::Trace,
		};
		let file = matches.value_of("config");

		CliOpts { file: file.map(PathBuf::from), log_level }
	}
}
