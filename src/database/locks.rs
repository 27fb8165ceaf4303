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

//! Per-entity execution locks. This is the only cross-process coordination
//! primitive in the system: acquisition is a single atomic upsert whose
//! UPDATE arm is guarded by the lease age, so of N concurrent callers
//! exactly one sees a returned row and every other caller sees an empty
//! result.

use sqlx::{Done, PgConnection};
use uuid::Uuid;

use crate::{
	database::models::ExecutionLockModel,
	error::Result,
	types::EntityKind,
};

/// Proof of lock ownership. The token is stamped at acquisition and must be
/// presented to `renew` and `release`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lock {
	pub entity_id: Uuid,
	pub locked_by: Uuid,
}

/// Take the lock for `entity_id` if nobody holds it, or steal it if the
/// current lease is older than `threshold_seconds`. Returns `None` when the
/// existing lock is still fresh; the fresh row is left untouched.
pub async fn acquire_if_expired(
	conn: &mut PgConnection,
	entity_id: Uuid,
	project_id: Uuid,
	kind: EntityKind,
	threshold_seconds: u64,
) -> Result<Option<Lock>> {
	let locked_by = Uuid::new_v4();
	let row: Option<(Uuid, Uuid)> = sqlx::query_as(
		r#"
        INSERT INTO evaluation_locks (id, entity_id, project_id, entity_kind, locked_by, last_lock_time)
        VALUES ($1, $2, $3, $4, $5, now())
        ON CONFLICT (entity_id) DO UPDATE
        SET locked_by = EXCLUDED.locked_by, last_lock_time = now()
        WHERE evaluation_locks.last_lock_time < now() - ($6 * interval '1 second')
        RETURNING entity_id, locked_by
    "#,
	)
	.bind(Uuid::new_v4())
	.bind(entity_id)
	.bind(project_id)
	.bind(kind.as_str())
	.bind(locked_by)
	.bind(threshold_seconds as f64)
	.fetch_optional(conn)
	.await?;

	Ok(row.map(|(entity_id, locked_by)| Lock { entity_id, locked_by }))
}

/// Refresh the lease. Silent no-op unless `locked_by` still owns the lock.
pub async fn renew(conn: &mut PgConnection, entity_id: Uuid, locked_by: Uuid) -> Result<()> {
	let done = sqlx::query(
		r#"
        UPDATE evaluation_locks SET last_lock_time = now()
        WHERE entity_id = $1 AND locked_by = $2
    "#,
	)
	.bind(entity_id)
	.bind(locked_by)
	.execute(conn)
	.await?;
	if done.rows_affected() == 0 {
		log::trace!("renew for entity {} skipped; lock not held by {}", entity_id, locked_by);
	}
	Ok(())
}

/// Drop the lock. Owner-only and idempotent; releasing a lock someone else
/// holds (or no lock at all) does nothing.
pub async fn release(conn: &mut PgConnection, entity_id: Uuid, locked_by: Uuid) -> Result<()> {
	sqlx::query(
		r#"
        DELETE FROM evaluation_locks
        WHERE entity_id = $1 AND locked_by = $2
    "#,
	)
	.bind(entity_id)
	.bind(locked_by)
	.execute(conn)
	.await?;
	Ok(())
}

/// Fetch the raw lock row. Diagnostic.
pub async fn get(conn: &mut PgConnection, entity_id: Uuid) -> Result<Option<ExecutionLockModel>> {
	sqlx::query_as::<_, ExecutionLockModel>(
		r#"
        SELECT id, entity_id, project_id, entity_kind, locked_by, last_lock_time
        FROM evaluation_locks
        WHERE entity_id = $1
    "#,
	)
	.bind(entity_id)
	.fetch_optional(conn)
	.await
	.map_err(Into::into)
}
