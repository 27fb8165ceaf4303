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

use std::{fs, io, path::Path, path::PathBuf};

/// Get the path to a local directory where we can save data.
/// Platform | Value | Example
/// -- | -- | --
/// Linux | $XDG_DATA_HOME or $HOME/.local/share/policy_reminder | /home/alice/.local/share/policy_reminder/
/// macOS | $HOME/Library/Application Support/policy_reminder | /Users/Alice/Library/Application Support/policy_reminder/
/// Windows | {FOLDERID_LocalAppData}\policy_reminder | C:\Users\Alice\AppData\Local\policy_reminder
pub(crate) fn reminder_dir() -> io::Result<PathBuf> {
	let base_dirs = dirs::BaseDirs::new()
		.ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Invalid home directory path"))?;
	let mut path = base_dirs.data_local_dir().to_path_buf();
	path.push("policy_reminder");
	Ok(path)
}

/// Create a directory, ignoring an already-existing one.
pub(crate) fn create_dir(path: &Path) -> io::Result<()> {
	if let Err(e) = fs::create_dir_all(path) {
		if e.kind() != io::ErrorKind::AlreadyExists {
			return Err(e);
		}
	}
	Ok(())
}
