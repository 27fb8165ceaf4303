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

//! Common SQL queries on the reminder database abstracted into rust functions

use sqlx::PgConnection;
use uuid::Uuid;

use crate::{
	database::models::{EntityModel, ProfileModel},
	error::Result,
	types::EntityKind,
};

/// Get an entity by id.
pub async fn get_entity(conn: &mut PgConnection, id: Uuid) -> Result<Option<EntityModel>> {
	sqlx::query_as::<_, EntityModel>(
		r#"
        SELECT id, kind, project_id, provider_id, name, originated_from, created_at
        FROM entities
        WHERE id = $1
    "#,
	)
	.bind(id)
	.fetch_optional(conn)
	.await
	.map_err(Into::into)
}

/// Look an entity up by its unique (project, kind, name) triple.
pub async fn entity_by_name(
	conn: &mut PgConnection,
	project_id: Uuid,
	kind: EntityKind,
	name: &str,
) -> Result<Option<EntityModel>> {
	sqlx::query_as::<_, EntityModel>(
		r#"
        SELECT id, kind, project_id, provider_id, name, originated_from, created_at
        FROM entities
        WHERE project_id = $1 AND kind = $2 AND name = $3
    "#,
	)
	.bind(project_id)
	.bind(kind.as_str())
	.bind(name)
	.fetch_optional(conn)
	.await
	.map_err(Into::into)
}

/// All entities of a project, ordered by name.
pub async fn list_entities(conn: &mut PgConnection, project_id: Uuid) -> Result<Vec<EntityModel>> {
	sqlx::query_as::<_, EntityModel>(
		r#"
        SELECT id, kind, project_id, provider_id, name, originated_from, created_at
        FROM entities
        WHERE project_id = $1
        ORDER BY name
    "#,
	)
	.bind(project_id)
	.fetch_all(conn)
	.await
	.map_err(Into::into)
}

/// Get a profile by id.
pub async fn get_profile(conn: &mut PgConnection, id: Uuid) -> Result<Option<ProfileModel>> {
	sqlx::query_as::<_, ProfileModel>(
		r#"
        SELECT id, project_id, name, labels, remediate, alert
        FROM profiles
        WHERE id = $1
    "#,
	)
	.bind(id)
	.fetch_optional(conn)
	.await
	.map_err(Into::into)
}

/// All profiles of a project, ordered by name.
pub async fn list_profiles(conn: &mut PgConnection, project_id: Uuid) -> Result<Vec<ProfileModel>> {
	sqlx::query_as::<_, ProfileModel>(
		r#"
        SELECT id, project_id, name, labels, remediate, alert
        FROM profiles
        WHERE project_id = $1
        ORDER BY name
    "#,
	)
	.bind(project_id)
	.fetch_all(conn)
	.await
	.map_err(Into::into)
}
