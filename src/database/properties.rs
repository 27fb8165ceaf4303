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

//! Entity property bag. Values are arbitrary JSON wrapped in a versioned
//! envelope; the envelope is sealed and opened at this single boundary, so
//! nothing outside this module ever sees the stored bytes. Readers fail
//! closed on an envelope version this build does not speak.

use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::{
	database::models::EntityModel,
	error::{ReminderError, Result},
	types::EntityKind,
};

const ENVELOPE_VERSION: &str = "v1";

#[derive(Serialize, Deserialize)]
struct Envelope {
	version: String,
	value: serde_json::Value,
}

fn seal(value: &serde_json::Value) -> Result<Vec<u8>> {
	let envelope = Envelope { version: ENVELOPE_VERSION.to_string(), value: value.clone() };
	serde_json::to_vec(&envelope).map_err(Into::into)
}

fn open(bytes: &[u8]) -> Result<serde_json::Value> {
	let envelope: Envelope = serde_json::from_slice(bytes)?;
	if envelope.version != ENVELOPE_VERSION {
		return Err(ReminderError::BadPropertyVersion(envelope.version));
	}
	Ok(envelope.value)
}

/// Upsert one property. Last writer wins; `updated_at` advances.
pub async fn put(conn: &mut PgConnection, entity_id: Uuid, key: &str, value: &serde_json::Value) -> Result<()> {
	let bytes = seal(value)?;
	sqlx::query(
		r#"
        INSERT INTO properties (id, entity_id, key, value, updated_at)
        VALUES ($1, $2, $3, $4, now())
        ON CONFLICT (entity_id, key) DO UPDATE
        SET value = EXCLUDED.value, updated_at = now()
    "#,
	)
	.bind(Uuid::new_v4())
	.bind(entity_id)
	.bind(key)
	.bind(bytes)
	.execute(conn)
	.await?;
	Ok(())
}

/// Read one property. `None` when no row exists; `BadPropertyVersion` when a
/// row exists but carries an unknown envelope.
pub async fn get(conn: &mut PgConnection, entity_id: Uuid, key: &str) -> Result<Option<serde_json::Value>> {
	let bytes: Option<(Vec<u8>,)> = sqlx::query_as(
		r#"
        SELECT value FROM properties
        WHERE entity_id = $1 AND key = $2
    "#,
	)
	.bind(entity_id)
	.bind(key)
	.fetch_optional(conn)
	.await?;

	bytes.map(|(b,)| open(&b)).transpose()
}

/// All properties of an entity, decoded.
pub async fn get_all(conn: &mut PgConnection, entity_id: Uuid) -> Result<Vec<(String, serde_json::Value)>> {
	let rows: Vec<(String, Vec<u8>)> = sqlx::query_as(
		r#"
        SELECT key, value FROM properties
        WHERE entity_id = $1
        ORDER BY key
    "#,
	)
	.bind(entity_id)
	.fetch_all(conn)
	.await?;

	rows.into_iter().map(|(key, bytes)| Ok((key, open(&bytes)?))).collect()
}

/// Find entities of `kind` in a project whose property `key` equals `value`.
/// The probe value runs through the same v1 codec as the stored envelopes,
/// so the comparison happens on sealed bytes and callers never deal with
/// envelopes themselves.
pub async fn find_entities(
	conn: &mut PgConnection,
	project_id: Uuid,
	kind: EntityKind,
	key: &str,
	value: &serde_json::Value,
) -> Result<Vec<EntityModel>> {
	let probe = seal(value)?;
	sqlx::query_as::<_, EntityModel>(
		r#"
        SELECT e.id, e.kind, e.project_id, e.provider_id, e.name, e.originated_from, e.created_at
        FROM entities e
        JOIN properties p ON p.entity_id = e.id
        WHERE e.project_id = $1 AND e.kind = $2 AND p.key = $3 AND p.value = $4
    "#,
	)
	.bind(project_id)
	.bind(kind.as_str())
	.bind(key)
	.bind(probe)
	.fetch_all(conn)
	.await
	.map_err(Into::into)
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn envelope_round_trips() {
		for value in &[json!("main"), json!(42), json!(true), json!({ "depth": 1, "shallow": false }), json!(null)] {
			let sealed = seal(value).unwrap();
			assert_eq!(&open(&sealed).unwrap(), value);
		}
	}

	#[test]
	fn unknown_version_fails_closed() {
		let bytes = serde_json::to_vec(&json!({ "version": "v2", "value": "main" })).unwrap();
		match open(&bytes) {
			Err(ReminderError::BadPropertyVersion(v)) => assert_eq!(v, "v2"),
			other => panic!("expected BadPropertyVersion, got {:?}", other.map(|_| ())),
		}
	}

	#[test]
	fn corrupted_envelope_is_a_typed_error() {
		assert!(matches!(open(b"not-json"), Err(ReminderError::Serialization(_))));
		// valid json, wrong shape
		let bytes = serde_json::to_vec(&json!({ "ver": "v1" })).unwrap();
		assert!(matches!(open(&bytes), Err(ReminderError::Serialization(_))));
	}

	#[test]
	fn probe_bytes_match_sealed_bytes() {
		let value = json!("release/4.2");
		assert_eq!(seal(&value).unwrap(), seal(&value.clone()).unwrap());
	}
}
