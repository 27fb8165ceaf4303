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

mod cli_opts;
mod config;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use policy_reminder::{Reminder, ReminderBuilder};

pub fn main() -> Result<()> {
	let config = config::Config::new()?;
	policy_reminder::init_logger(config.log_level(), log::LevelFilter::Debug)?;

	let mut system = smol::block_on(ReminderBuilder::with_config(config.reminder().clone()).build())?;
	system.drive()?;
	log::info!("reminder loop started");

	let running = Arc::new(AtomicBool::new(true));
	let r = running.clone();

	ctrlc::set_handler(move || {
		r.store(false, Ordering::SeqCst);
	})
	.expect("Error setting Ctrl-C handler");
	while running.load(Ordering::SeqCst) {
		std::thread::sleep(Duration::from_millis(100));
	}
	log::info!("shutting down");
	system.shutdown()?;

	Ok(())
}
