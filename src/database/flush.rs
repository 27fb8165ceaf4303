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

//! The flush cache coalesces reconciliation bursts: at most one pending
//! entry exists per entity, and concurrent enqueues for the same entity
//! collapse into a single row.

use sqlx::PgConnection;
use uuid::Uuid;

use crate::{database::models::FlushEntryModel, error::Result, types::EntityKind};

/// Queue a flush for `entity_id`. Returns `None` when an entry is already
/// pending (the insert is a no-op on conflict).
pub async fn enqueue(
	conn: &mut PgConnection,
	entity_id: Uuid,
	project_id: Uuid,
	kind: EntityKind,
) -> Result<Option<FlushEntryModel>> {
	sqlx::query_as::<_, FlushEntryModel>(
		r#"
        INSERT INTO flush_cache (id, entity_id, project_id, entity_kind)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (entity_id) DO NOTHING
        RETURNING id, entity_id, project_id, entity_kind, queued_at
    "#,
	)
	.bind(Uuid::new_v4())
	.bind(entity_id)
	.bind(project_id)
	.bind(kind.as_str())
	.fetch_optional(conn)
	.await
	.map_err(Into::into)
}

/// Take the pending entry for `entity_id` off the queue, if any. The
/// consumer side of the coalescing cache.
pub async fn pop(conn: &mut PgConnection, entity_id: Uuid) -> Result<Option<FlushEntryModel>> {
	sqlx::query_as::<_, FlushEntryModel>(
		r#"
        DELETE FROM flush_cache
        WHERE entity_id = $1
        RETURNING id, entity_id, project_id, entity_kind, queued_at
    "#,
	)
	.bind(entity_id)
	.fetch_optional(conn)
	.await
	.map_err(Into::into)
}

/// All pending entries, unordered. Diagnostic.
pub async fn list(conn: &mut PgConnection) -> Result<Vec<FlushEntryModel>> {
	sqlx::query_as::<_, FlushEntryModel>(
		r#"
        SELECT id, entity_id, project_id, entity_kind, queued_at
        FROM flush_cache
    "#,
	)
	.fetch_all(conn)
	.await
	.map_err(Into::into)
}
