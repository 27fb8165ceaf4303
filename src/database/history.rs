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

//! The evaluation-history ledger: append-only status rows per rule-entity
//! with a latest-evaluation pointer, the filtered bidirectionally-paginated
//! listing over them, the stale-row scan feeding the reminder loop, and the
//! profile-status rollup.
//!
//! Every predicate in the listing is parameterised; optional include/exclude
//! lists are bound as nullable arrays and guarded with `IS NULL`, so the SQL
//! text is fixed for a given pagination direction.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::{Connection, Done, PgConnection};
use uuid::Uuid;

use crate::{
	database::models::HistoryRow,
	error::{ReminderError, Result},
	types::{EntityKind, EvalStatus, EvaluationOutcome, EventStatus, SideEvent, StaleRef},
};

/// Register the (rule instance, entity) pair as an evaluation unit.
/// Idempotent: re-inserting an existing pair returns the existing id.
pub async fn insert_rule_entity(conn: &mut PgConnection, rule_instance_id: Uuid, entity_id: Uuid) -> Result<Uuid> {
	let (id,): (Uuid,) = sqlx::query_as(
		r#"
        INSERT INTO rule_entities (id, rule_instance_id, entity_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (rule_instance_id, entity_id) DO UPDATE
        SET entity_id = EXCLUDED.entity_id
        RETURNING id
    "#,
	)
	.bind(Uuid::new_v4())
	.bind(rule_instance_id)
	.bind(entity_id)
	.fetch_one(conn)
	.await?;
	Ok(id)
}

/// Append one status row to the ledger. `evaluation_time` is assigned by the
/// store so rows of a rule-entity are totally ordered.
pub async fn insert_status(
	conn: &mut PgConnection,
	rule_entity_id: Uuid,
	status: EvalStatus,
	details: &str,
	checkpoint: &serde_json::Value,
) -> Result<Uuid> {
	let id = Uuid::new_v4();
	sqlx::query(
		r#"
        INSERT INTO evaluation_statuses (id, rule_entity_id, status, details, checkpoint)
        VALUES ($1, $2, $3, $4, $5)
    "#,
	)
	.bind(id)
	.bind(rule_entity_id)
	.bind(status.as_str())
	.bind(details)
	.bind(sqlx::types::Json(checkpoint))
	.execute(conn)
	.await?;
	Ok(id)
}

/// Point the rule-entity at its most recent status.
pub async fn upsert_latest(
	conn: &mut PgConnection,
	rule_entity_id: Uuid,
	status_id: Uuid,
	profile_id: Uuid,
) -> Result<()> {
	sqlx::query(
		r#"
        INSERT INTO latest_evaluations (rule_entity_id, evaluation_id, profile_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (rule_entity_id) DO UPDATE
        SET evaluation_id = EXCLUDED.evaluation_id, profile_id = EXCLUDED.profile_id
    "#,
	)
	.bind(rule_entity_id)
	.bind(status_id)
	.bind(profile_id)
	.execute(conn)
	.await?;
	Ok(())
}

/// Attach an alert side-record to an evaluation.
pub async fn insert_alert_event(conn: &mut PgConnection, evaluation_id: Uuid, event: &SideEvent) -> Result<()> {
	insert_side_event(conn, "alert_events", evaluation_id, event).await
}

/// Attach a remediation side-record to an evaluation.
pub async fn insert_remediation_event(conn: &mut PgConnection, evaluation_id: Uuid, event: &SideEvent) -> Result<()> {
	insert_side_event(conn, "remediation_events", evaluation_id, event).await
}

async fn insert_side_event(
	conn: &mut PgConnection,
	table: &'static str,
	evaluation_id: Uuid,
	event: &SideEvent,
) -> Result<()> {
	let query = match table {
		"alert_events" => {
			r#"
            INSERT INTO alert_events (id, evaluation_id, status, details, metadata)
            VALUES ($1, $2, $3, $4, $5)
        "#
		}
		_ => {
			r#"
            INSERT INTO remediation_events (id, evaluation_id, status, details, metadata)
            VALUES ($1, $2, $3, $4, $5)
        "#
		}
	};
	sqlx::query(query)
		.bind(Uuid::new_v4())
		.bind(evaluation_id)
		.bind(event.status.as_str())
		.bind(event.details.as_str())
		.bind(sqlx::types::Json(&event.metadata))
		.execute(conn)
		.await?;
	Ok(())
}

/// Record one finished evaluation: status insert, latest-pointer upsert and
/// side-records, all in one transaction so readers never observe a pointer
/// to a missing status.
pub async fn record_outcome(conn: &mut PgConnection, outcome: &EvaluationOutcome) -> Result<Uuid> {
	let mut tx = conn.begin().await?;
	let status_id =
		insert_status(&mut *tx, outcome.rule_entity_id, outcome.status, &outcome.details, &outcome.checkpoint).await?;
	upsert_latest(&mut *tx, outcome.rule_entity_id, status_id, outcome.profile_id).await?;
	if let Some(alert) = &outcome.alert {
		insert_alert_event(&mut *tx, status_id, alert).await?;
	}
	if let Some(remediation) = &outcome.remediation {
		insert_remediation_event(&mut *tx, status_id, remediation).await?;
	}
	tx.commit().await?;
	Ok(status_id)
}

/// Delete ledger rows by id. Refuses the whole batch if any id is still
/// referenced by a latest-evaluation pointer; the foreign key from
/// `latest_evaluations` backstops the check against races.
pub async fn delete_by_ids(conn: &mut PgConnection, ids: &[Uuid]) -> Result<u64> {
	let mut tx = conn.begin().await?;
	let referenced: Option<(Uuid,)> = sqlx::query_as(
		r#"
        SELECT evaluation_id FROM latest_evaluations
        WHERE evaluation_id = ANY($1)
        LIMIT 1
    "#,
	)
	.bind(ids.to_vec())
	.fetch_optional(&mut *tx)
	.await?;
	if let Some((id,)) = referenced {
		return Err(ReminderError::StatusReferenced(id));
	}

	let done = sqlx::query(
		r#"
        DELETE FROM evaluation_statuses
        WHERE id = ANY($1)
    "#,
	)
	.bind(ids.to_vec())
	.execute(&mut *tx)
	.await?;
	tx.commit().await?;
	Ok(done.rows_affected())
}

/// Resume point for paging through the stale scan: the sort key of the last
/// row of the previous page.
#[derive(Clone, Copy, Debug)]
pub struct StaleCursor {
	pub evaluation_time: DateTime<Utc>,
	pub rule_id: Uuid,
	pub entity_id: Uuid,
}

impl StaleCursor {
	pub fn of(stale: &StaleRef) -> Self {
		Self { evaluation_time: stale.evaluation_time, rule_id: stale.rule_id, entity_id: stale.entity_id }
	}
}

/// The oldest superseded status rows: rows older than `threshold` that the
/// latest pointer of their rule-entity no longer references. Ordered
/// ascending by (evaluation_time, rule id, entity id).
pub async fn list_stale(conn: &mut PgConnection, threshold: DateTime<Utc>, size: i64) -> Result<Vec<StaleRef>> {
	list_stale_from(conn, threshold, None, size).await
}

/// `list_stale` resuming strictly after `after`; this is how a single cycle
/// pages through more than `size` stale rows without re-reading a page.
pub async fn list_stale_from(
	conn: &mut PgConnection,
	threshold: DateTime<Utc>,
	after: Option<StaleCursor>,
	size: i64,
) -> Result<Vec<StaleRef>> {
	#[derive(sqlx::FromRow)]
	struct StaleRow {
		status_id: Uuid,
		rule_entity_id: Uuid,
		rule_id: Uuid,
		entity_id: Uuid,
		project_id: Uuid,
		provider_id: Uuid,
		kind: String,
		evaluation_time: DateTime<Utc>,
	}

	let rows: Vec<StaleRow> = sqlx::query_as(
		r#"
        SELECT es.id AS status_id, es.rule_entity_id, ri.id AS rule_id, re.entity_id,
            e.project_id, e.provider_id, e.kind, es.evaluation_time
        FROM evaluation_statuses es
        JOIN rule_entities re ON re.id = es.rule_entity_id
        JOIN rule_instances ri ON ri.id = re.rule_instance_id
        JOIN entities e ON e.id = re.entity_id
        WHERE es.evaluation_time < $1
            AND NOT EXISTS (SELECT 1 FROM latest_evaluations le WHERE le.evaluation_id = es.id)
            AND ($2::timestamptz IS NULL
                OR (es.evaluation_time, ri.id, re.entity_id) > ($2, $3::uuid, $4::uuid))
        ORDER BY es.evaluation_time ASC, ri.id ASC, re.entity_id ASC
        LIMIT $5
    "#,
	)
	.bind(threshold)
	.bind(after.map(|c| c.evaluation_time))
	.bind(after.map(|c| c.rule_id))
	.bind(after.map(|c| c.entity_id))
	.bind(size)
	.fetch_all(conn)
	.await?;

	rows.into_iter()
		.map(|r| {
			Ok(StaleRef {
				status_id: r.status_id,
				rule_entity_id: r.rule_entity_id,
				rule_id: r.rule_id,
				entity_id: r.entity_id,
				project_id: r.project_id,
				provider_id: r.provider_id,
				kind: r.kind.parse()?,
				evaluation_time: r.evaluation_time,
			})
		})
		.collect()
}

/// Collapse all latest per-rule-entity statuses of a profile into one
/// status via the severity lattice. Computed on read; `pending` when the
/// profile has no evaluations at all.
pub async fn profile_status(conn: &mut PgConnection, profile_id: Uuid, project_id: Uuid) -> Result<EvalStatus> {
	let rows: Vec<(String,)> = sqlx::query_as(
		r#"
        SELECT es.status
        FROM latest_evaluations le
        JOIN evaluation_statuses es ON es.id = le.evaluation_id
        JOIN profiles p ON p.id = le.profile_id
        WHERE le.profile_id = $1 AND p.project_id = $2
    "#,
	)
	.bind(profile_id)
	.bind(project_id)
	.fetch_all(conn)
	.await?;

	let statuses = rows.into_iter().map(|(s,)| s.parse()).collect::<Result<Vec<EvalStatus>>>()?;
	Ok(EvalStatus::aggregate(statuses))
}

/// All optional listing filters; fields combine with AND. `project_id` is
/// the mandatory scope.
#[derive(Clone, Debug)]
pub struct HistoryFilter {
	pub project_id: Uuid,
	pub entity_kinds: Vec<EntityKind>,
	pub not_entity_kinds: Vec<EntityKind>,
	pub entity_names: Vec<String>,
	pub not_entity_names: Vec<String>,
	pub profile_names: Vec<String>,
	pub not_profile_names: Vec<String>,
	pub statuses: Vec<EvalStatus>,
	pub not_statuses: Vec<EvalStatus>,
	pub remediation_statuses: Vec<EventStatus>,
	pub not_remediation_statuses: Vec<EventStatus>,
	pub alert_statuses: Vec<EventStatus>,
	pub not_alert_statuses: Vec<EventStatus>,
	/// Half-open window `[from_ts, to_ts)` on evaluation time.
	pub from_ts: Option<DateTime<Utc>>,
	pub to_ts: Option<DateTime<Utc>>,
	/// Empty: only rows whose profile has zero labels. `["*"]`: any labels.
	/// Otherwise: rows whose profile labels intersect this set.
	pub labels: Vec<String>,
	/// Exclude rows whose profile labels intersect this set.
	pub not_labels: Vec<String>,
}

impl HistoryFilter {
	pub fn new(project_id: Uuid) -> Self {
		Self {
			project_id,
			entity_kinds: Vec::new(),
			not_entity_kinds: Vec::new(),
			entity_names: Vec::new(),
			not_entity_names: Vec::new(),
			profile_names: Vec::new(),
			not_profile_names: Vec::new(),
			statuses: Vec::new(),
			not_statuses: Vec::new(),
			remediation_statuses: Vec::new(),
			not_remediation_statuses: Vec::new(),
			alert_statuses: Vec::new(),
			not_alert_statuses: Vec::new(),
			from_ts: None,
			to_ts: None,
			labels: Vec::new(),
			not_labels: Vec::new(),
		}
	}
}

/// The profile-label filter mode derived from `HistoryFilter::labels`.
#[derive(Clone, Copy, Debug, PartialEq)]
enum LabelMode {
	/// Only profiles with zero labels (filter missing or empty).
	ZeroOnly,
	/// Any profile regardless of labels (the `["*"]` wildcard).
	Any,
	/// Profiles whose labels intersect the given set.
	Overlap,
}

impl LabelMode {
	fn of(labels: &[String]) -> LabelMode {
		if labels.is_empty() {
			LabelMode::ZeroOnly
		} else if labels.len() == 1 && labels[0] == "*" {
			LabelMode::Any
		} else {
			LabelMode::Overlap
		}
	}

	fn as_str(self) -> &'static str {
		match self {
			LabelMode::ZeroOnly => "zero",
			LabelMode::Any => "any",
			LabelMode::Overlap => "overlap",
		}
	}
}

/// Cursor over `evaluation_time`. `Next(ts)` pages backwards in time from
/// `ts` (newest first); `Prev(ts)` pages forwards from `ts` (oldest first),
/// and the caller reverses for display. Both relations are strict.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Cursor {
	Next(DateTime<Utc>),
	Prev(DateTime<Utc>),
}

impl Cursor {
	/// Unbounded `next`: start from the newest row.
	pub fn newest() -> Self {
		Cursor::Next(far_future())
	}

	/// Unbounded `prev`: start from the oldest row.
	pub fn oldest() -> Self {
		Cursor::Prev(Utc.timestamp_opt(0, 0).single().expect("epoch is representable"))
	}

	fn timestamp(self) -> DateTime<Utc> {
		match self {
			Cursor::Next(ts) | Cursor::Prev(ts) => ts,
		}
	}
}

// The far-future "unbounded next" sentinel. Year 9999 keeps well inside
// both chrono's and Postgres' timestamp ranges.
fn far_future() -> DateTime<Utc> {
	Utc.timestamp_opt(253_402_300_799, 0).single().expect("year 9999 is representable")
}

#[derive(Clone, Copy, Debug)]
pub struct Page {
	pub cursor: Cursor,
	pub size: i64,
}

impl Page {
	pub fn new(cursor: Cursor, size: i64) -> Self {
		Self { cursor, size }
	}
}

const HISTORY_SELECT: &str = r#"
    SELECT es.id, es.status, es.details, es.checkpoint, es.evaluation_time,
        e.id AS entity_id, e.kind AS entity_kind, e.name AS entity_name,
        p.id AS profile_id, p.name AS profile_name, p.labels AS profile_labels,
        re.id AS rule_entity_id, ri.name AS rule_name,
        ae.status AS alert_status, rem.status AS remediation_status
    FROM evaluation_statuses es
    JOIN rule_entities re ON re.id = es.rule_entity_id
    JOIN rule_instances ri ON ri.id = re.rule_instance_id
    JOIN profiles p ON p.id = ri.profile_id
    JOIN entities e ON e.id = re.entity_id
    LEFT JOIN alert_events ae ON ae.evaluation_id = es.id
    LEFT JOIN remediation_events rem ON rem.evaluation_id = es.id
    WHERE e.project_id = $1
        AND ($2::text[] IS NULL OR e.kind = ANY($2))
        AND ($3::text[] IS NULL OR NOT (e.kind = ANY($3)))
        AND ($4::text[] IS NULL OR e.name = ANY($4))
        AND ($5::text[] IS NULL OR NOT (e.name = ANY($5)))
        AND ($6::text[] IS NULL OR p.name = ANY($6))
        AND ($7::text[] IS NULL OR NOT (p.name = ANY($7)))
        AND ($8::text[] IS NULL OR es.status = ANY($8))
        AND ($9::text[] IS NULL OR NOT (es.status = ANY($9)))
        AND ($10::text[] IS NULL OR rem.status = ANY($10))
        AND ($11::text[] IS NULL OR rem.status IS NULL OR NOT (rem.status = ANY($11)))
        AND ($12::text[] IS NULL OR ae.status = ANY($12))
        AND ($13::text[] IS NULL OR ae.status IS NULL OR NOT (ae.status = ANY($13)))
        AND ($14::timestamptz IS NULL OR es.evaluation_time >= $14)
        AND ($15::timestamptz IS NULL OR es.evaluation_time < $15)
        AND (CASE $16::text
            WHEN 'any' THEN TRUE
            WHEN 'zero' THEN cardinality(p.labels) = 0
            ELSE p.labels && $17::text[] END)
        AND ($18::text[] IS NULL OR NOT (p.labels && $18))
"#;

const HISTORY_NEXT: &str = r#"
        AND es.evaluation_time < $19
    ORDER BY es.evaluation_time DESC, es.id DESC
    LIMIT $20
"#;

const HISTORY_PREV: &str = r#"
        AND es.evaluation_time > $19
    ORDER BY es.evaluation_time ASC, es.id ASC
    LIMIT $20
"#;

fn include_list(values: Vec<String>) -> Option<Vec<String>> {
	if values.is_empty() {
		None
	} else {
		Some(values)
	}
}

/// Ledger rows matching `filter`, one page at a time.
pub async fn list_history(conn: &mut PgConnection, filter: &HistoryFilter, page: Page) -> Result<Vec<HistoryRow>> {
	let tail = match page.cursor {
		Cursor::Next(_) => HISTORY_NEXT,
		Cursor::Prev(_) => HISTORY_PREV,
	};
	let query = [HISTORY_SELECT, tail].concat();

	let label_mode = LabelMode::of(&filter.labels);
	let strs = |v: &[EntityKind]| v.iter().map(|k| k.as_str().to_string()).collect::<Vec<_>>();
	let eval_strs = |v: &[EvalStatus]| v.iter().map(|s| s.as_str().to_string()).collect::<Vec<_>>();
	let event_strs = |v: &[EventStatus]| v.iter().map(|s| s.as_str().to_string()).collect::<Vec<_>>();

	sqlx::query_as::<_, HistoryRow>(query.as_str())
		.bind(filter.project_id)
		.bind(include_list(strs(&filter.entity_kinds)))
		.bind(include_list(strs(&filter.not_entity_kinds)))
		.bind(include_list(filter.entity_names.clone()))
		.bind(include_list(filter.not_entity_names.clone()))
		.bind(include_list(filter.profile_names.clone()))
		.bind(include_list(filter.not_profile_names.clone()))
		.bind(include_list(eval_strs(&filter.statuses)))
		.bind(include_list(eval_strs(&filter.not_statuses)))
		.bind(include_list(event_strs(&filter.remediation_statuses)))
		.bind(include_list(event_strs(&filter.not_remediation_statuses)))
		.bind(include_list(event_strs(&filter.alert_statuses)))
		.bind(include_list(event_strs(&filter.not_alert_statuses)))
		.bind(filter.from_ts)
		.bind(filter.to_ts)
		.bind(label_mode.as_str())
		.bind(filter.labels.clone())
		.bind(include_list(filter.not_labels.clone()))
		.bind(page.cursor.timestamp())
		.bind(page.size)
		.fetch_all(conn)
		.await
		.map_err(Into::into)
}
