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

//! Direct database representations of rows returned by the read queries.
//! Status and kind columns are stored as text; the accessors fail closed on
//! values this build does not know.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
	error::Result,
	types::{ActionMode, EntityKind, EvalStatus, EventStatus},
};

/// Struct modeling data returned from the database when querying for an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct EntityModel {
	pub id: Uuid,
	pub kind: String,
	pub project_id: Uuid,
	pub provider_id: Uuid,
	pub name: String,
	pub originated_from: Option<Uuid>,
	pub created_at: DateTime<Utc>,
}

impl EntityModel {
	pub fn kind(&self) -> Result<EntityKind> {
		self.kind.parse()
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ProfileModel {
	pub id: Uuid,
	pub project_id: Uuid,
	pub name: String,
	pub labels: Vec<String>,
	pub remediate: Option<String>,
	pub alert: Option<String>,
}

impl ProfileModel {
	pub fn remediate_mode(&self) -> ActionMode {
		ActionMode::remediate_from(self.remediate.as_deref())
	}

	pub fn alert_mode(&self) -> ActionMode {
		ActionMode::alert_from(self.alert.as_deref())
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PropertyModel {
	pub id: Uuid,
	pub entity_id: Uuid,
	pub key: String,
	pub value: Vec<u8>,
	pub updated_at: DateTime<Utc>,
}

/// One row of the evaluation-history listing; entity, profile and
/// side-channel columns come pre-joined.
#[derive(Debug, Clone, FromRow)]
pub struct HistoryRow {
	pub id: Uuid,
	pub status: String,
	pub details: String,
	pub checkpoint: serde_json::Value,
	pub evaluation_time: DateTime<Utc>,
	pub entity_id: Uuid,
	pub entity_kind: String,
	pub entity_name: String,
	pub profile_id: Uuid,
	pub profile_name: String,
	pub profile_labels: Vec<String>,
	pub rule_entity_id: Uuid,
	pub rule_name: String,
	pub alert_status: Option<String>,
	pub remediation_status: Option<String>,
}

impl HistoryRow {
	pub fn status(&self) -> Result<EvalStatus> {
		self.status.parse()
	}

	pub fn entity_kind(&self) -> Result<EntityKind> {
		self.entity_kind.parse()
	}

	pub fn alert_status(&self) -> Result<Option<EventStatus>> {
		self.alert_status.as_deref().map(str::parse).transpose()
	}

	pub fn remediation_status(&self) -> Result<Option<EventStatus>> {
		self.remediation_status.as_deref().map(str::parse).transpose()
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ExecutionLockModel {
	pub id: Uuid,
	pub entity_id: Uuid,
	pub project_id: Uuid,
	pub entity_kind: String,
	pub locked_by: Uuid,
	pub last_lock_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct FlushEntryModel {
	pub id: Uuid,
	pub entity_id: Uuid,
	pub project_id: Uuid,
	pub entity_kind: String,
	pub queued_at: DateTime<Utc>,
}

impl FlushEntryModel {
	pub fn entity_kind(&self) -> Result<EntityKind> {
		self.entity_kind.parse()
	}
}
