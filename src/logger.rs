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

//! logging

use std::io;

use fern::colors::{Color, ColoredLevelConfig};

use crate::util::{create_dir, reminder_dir};

pub fn init(std: log::LevelFilter, file: log::LevelFilter) -> io::Result<()> {
	let colors = ColoredLevelConfig::new()
		.info(Color::Green)
		.warn(Color::Yellow)
		.error(Color::Red)
		.debug(Color::Blue)
		.trace(Color::Magenta);

	let mut log_dir = reminder_dir()?;
	create_dir(log_dir.as_path())?;
	log_dir.push("reminder.logs");

	let stdout_dispatcher = fern::Dispatch::new()
		.level_for("policy_reminder", std)
		.level_for("sqlx", log::LevelFilter::Error)
		.level_for("lapin", log::LevelFilter::Warn)
		.level_for("", log::LevelFilter::Error)
		.format(move |out, message, record| {
			out.finish(format_args!(
				"{} {} {}",
				chrono::Local::now().format("[%H:%M]"),
				colors.color(record.level()),
				message,
			))
		})
		.chain(fern::Dispatch::new().level(std).chain(std::io::stdout()));

	let file_dispatcher = fern::Dispatch::new()
		.level(file)
		.level_for("policy_reminder", file)
		.level_for("sqlx", log::LevelFilter::Warn)
		.level_for("lapin", log::LevelFilter::Warn)
		.format(move |out, message, record| {
			out.finish(format_args!(
				"{} [{}][{}] {}::{};{}",
				chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
				record.target(),
				record.level(),
				message,
				format_opt(record.file().map(|s| s.to_string())),
				format_opt(record.line().map(|n| n.to_string()))
			))
		})
		.chain(fern::log_file(log_dir).expect("Failed to create policy_reminder.logs file"));

	fern::Dispatch::new().chain(stdout_dispatcher).chain(file_dispatcher).apply().expect("Could not init logging");
	Ok(())
}

fn format_opt(file: Option<String>) -> String {
	match file {
		None => "".to_string(),
		Some(f) => f,
	}
}
