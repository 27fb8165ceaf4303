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

//! Core domain types shared between the stores, the reminder loop and the bus edge.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use xtra::Message;

use crate::error::ReminderError;

/// Kind of an entity under policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
	Repository,
	Artifact,
	PullRequest,
}

impl EntityKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			EntityKind::Repository => "repository",
			EntityKind::Artifact => "artifact",
			EntityKind::PullRequest => "pull_request",
		}
	}
}

impl FromStr for EntityKind {
	type Err = ReminderError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"repository" => Ok(EntityKind::Repository),
			"artifact" => Ok(EntityKind::Artifact),
			"pull_request" => Ok(EntityKind::PullRequest),
			other => Err(ReminderError::UnknownEntityKind(other.to_string())),
		}
	}
}

/// Outcome of a single rule-entity evaluation.
///
/// The variant order encodes the aggregation lattice: a profile's derived
/// status is the most severe status among its latest evaluations, with
/// `error > failure > success > skipped > pending`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalStatus {
	Pending,
	Skipped,
	Success,
	Failure,
	Error,
}

impl EvalStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			EvalStatus::Pending => "pending",
			EvalStatus::Skipped => "skipped",
			EvalStatus::Success => "success",
			EvalStatus::Failure => "failure",
			EvalStatus::Error => "error",
		}
	}

	fn severity(self) -> u8 {
		match self {
			EvalStatus::Pending => 0,
			EvalStatus::Skipped => 1,
			EvalStatus::Success => 2,
			EvalStatus::Failure => 3,
			EvalStatus::Error => 4,
		}
	}

	/// Collapse a set of latest statuses into one profile-level status.
	/// An empty set aggregates to `pending`.
	pub fn aggregate<I: IntoIterator<Item = EvalStatus>>(statuses: I) -> EvalStatus {
		statuses
			.into_iter()
			.fold(EvalStatus::Pending, |acc, s| if s.severity() > acc.severity() { s } else { acc })
	}
}

impl FromStr for EvalStatus {
	type Err = ReminderError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"pending" => Ok(EvalStatus::Pending),
			"skipped" => Ok(EvalStatus::Skipped),
			"success" => Ok(EvalStatus::Success),
			"failure" => Ok(EvalStatus::Failure),
			"error" => Ok(EvalStatus::Error),
			other => Err(ReminderError::UnknownStatus(other.to_string())),
		}
	}
}

/// Status of an alert or remediation side-record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
	Pending,
	Skipped,
	Success,
	Failure,
	Error,
	NotAvailable,
}

impl EventStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			EventStatus::Pending => "pending",
			EventStatus::Skipped => "skipped",
			EventStatus::Success => "success",
			EventStatus::Failure => "failure",
			EventStatus::Error => "error",
			EventStatus::NotAvailable => "not_available",
		}
	}
}

impl FromStr for EventStatus {
	type Err = ReminderError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"pending" => Ok(EventStatus::Pending),
			"skipped" => Ok(EventStatus::Skipped),
			"success" => Ok(EventStatus::Success),
			"failure" => Ok(EventStatus::Failure),
			"error" => Ok(EventStatus::Error),
			"not_available" => Ok(EventStatus::NotAvailable),
			other => Err(ReminderError::UnknownStatus(other.to_string())),
		}
	}
}

/// How a profile acts on findings. Unset columns default per action:
/// remediation defaults to `off`, alerting to `on`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionMode {
	On,
	Off,
	DryRun,
}

impl ActionMode {
	pub fn as_str(&self) -> &'static str {
		match self {
			ActionMode::On => "on",
			ActionMode::Off => "off",
			ActionMode::DryRun => "dry_run",
		}
	}

	/// Remediation mode for a stored (possibly NULL) column value.
	pub fn remediate_from(stored: Option<&str>) -> ActionMode {
		stored.and_then(|s| s.parse().ok()).unwrap_or(ActionMode::Off)
	}

	/// Alert mode for a stored (possibly NULL) column value.
	pub fn alert_from(stored: Option<&str>) -> ActionMode {
		stored.and_then(|s| s.parse().ok()).unwrap_or(ActionMode::On)
	}
}

impl FromStr for ActionMode {
	type Err = ReminderError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"on" => Ok(ActionMode::On),
			"off" => Ok(ActionMode::Off),
			"dry_run" => Ok(ActionMode::DryRun),
			other => Err(ReminderError::UnknownStatus(other.to_string())),
		}
	}
}

/// A first-class object under policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Entity {
	pub id: Uuid,
	pub kind: EntityKind,
	pub project_id: Uuid,
	pub provider_id: Uuid,
	pub name: String,
	pub originated_from: Option<Uuid>,
}

impl Entity {
	pub fn new(project_id: Uuid, provider_id: Uuid, kind: EntityKind, name: impl Into<String>) -> Self {
		Self { id: Uuid::new_v4(), kind, project_id, provider_id, name: name.into(), originated_from: None }
	}

	pub fn originated_from(mut self, parent: Uuid) -> Self {
		self.originated_from = Some(parent);
		self
	}
}

/// A named group of rule instances applied to a project's entities.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Profile {
	pub id: Uuid,
	pub project_id: Uuid,
	pub name: String,
	pub labels: Vec<String>,
	pub remediate: Option<ActionMode>,
	pub alert: Option<ActionMode>,
}

impl Profile {
	pub fn new(project_id: Uuid, name: impl Into<String>, labels: Vec<String>) -> Self {
		Self { id: Uuid::new_v4(), project_id, name: name.into(), labels, remediate: None, alert: None }
	}
}

/// A project-scoped rule definition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuleType {
	pub id: Uuid,
	pub project_id: Uuid,
	pub name: String,
}

impl RuleType {
	pub fn new(project_id: Uuid, name: impl Into<String>) -> Self {
		Self { id: Uuid::new_v4(), project_id, name: name.into() }
	}
}

/// A parameterised binding of a rule type inside a profile.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuleInstance {
	pub id: Uuid,
	pub profile_id: Uuid,
	pub rule_type_id: Uuid,
	pub name: String,
	pub params: serde_json::Value,
}

impl RuleInstance {
	pub fn new(profile_id: Uuid, rule_type_id: Uuid, name: impl Into<String>) -> Self {
		Self {
			id: Uuid::new_v4(),
			profile_id,
			rule_type_id,
			name: name.into(),
			params: serde_json::Value::Object(Default::default()),
		}
	}
}

/// A superseded evaluation row old enough to count as stale.
#[derive(Clone, Debug, PartialEq)]
pub struct StaleRef {
	pub status_id: Uuid,
	pub rule_entity_id: Uuid,
	pub rule_id: Uuid,
	pub entity_id: Uuid,
	pub project_id: Uuid,
	pub provider_id: Uuid,
	pub kind: EntityKind,
	pub evaluation_time: DateTime<Utc>,
}

/// Payload of the outbound reconciliation message (one per reminded entity).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconcileRequest {
	pub entity_id: Uuid,
	pub project_id: Uuid,
	pub entity_kind: EntityKind,
	pub provider_id: Uuid,
	pub emitted_at: DateTime<Utc>,
}

impl ReconcileRequest {
	pub fn from_stale(stale: &StaleRef) -> Self {
		Self {
			entity_id: stale.entity_id,
			project_id: stale.project_id,
			entity_kind: stale.kind,
			provider_id: stale.provider_id,
			emitted_at: Utc::now(),
		}
	}
}

/// An alert or remediation side-record attached to one evaluation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SideEvent {
	pub status: EventStatus,
	pub details: String,
	pub metadata: serde_json::Value,
}

impl SideEvent {
	pub fn new(status: EventStatus, details: impl Into<String>) -> Self {
		Self { status, details: details.into(), metadata: serde_json::Value::Object(Default::default()) }
	}
}

/// One finished evaluation: appended to the ledger and promoted to the
/// latest pointer in a single transaction by the database actor.
#[derive(Clone, Debug)]
pub struct EvaluationOutcome {
	pub rule_entity_id: Uuid,
	pub profile_id: Uuid,
	pub status: EvalStatus,
	pub details: String,
	pub checkpoint: serde_json::Value,
	pub alert: Option<SideEvent>,
	pub remediation: Option<SideEvent>,
}

impl EvaluationOutcome {
	pub fn new(rule_entity_id: Uuid, profile_id: Uuid, status: EvalStatus, details: impl Into<String>) -> Self {
		Self {
			rule_entity_id,
			profile_id,
			status,
			details: details.into(),
			checkpoint: serde_json::Value::Object(Default::default()),
			alert: None,
			remediation: None,
		}
	}
}

impl Message for EvaluationOutcome {
	type Result = ();
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Die;
impl Message for Die {
	type Result = ();
}
