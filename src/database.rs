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

//! IO for the PostgreSQL database backing the reminder service.
//! Handles pool setup, migrations and inserts of the bookkeeping rows.

pub mod flush;
pub mod history;
pub mod listener;
pub mod locks;
pub mod models;
pub mod properties;
pub mod queries;

use std::{fmt, time::Duration};

use serde::Deserialize;
use sqlx::{
	pool::PoolConnection,
	postgres::{PgConnection, PgPool, PgPoolOptions, Postgres},
	Connection, Done,
};

pub use self::listener::{Channel, Listener};
use crate::error::{ReminderError, Result};
use crate::types::{Entity, Profile, RuleInstance, RuleType};

/// Run all the migrations.
pub async fn migrate<T: AsRef<str>>(url: T) -> Result<()> {
	let mut conn = PgConnection::connect(url.as_ref()).await?;
	sqlx::migrate!("./src/migrations/").run(&mut conn).await?;
	Ok(())
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DatabaseConfig {
	/// PostgreSQL url.
	pub url: String,
}

impl fmt::Display for DatabaseConfig {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", self.url)
	}
}

#[derive(Clone)]
pub struct Database {
	/// pool of database connections
	pool: PgPool,
}

impl Database {
	/// Connect to the database
	pub async fn new(url: &str) -> Result<Self> {
		let pool = PgPoolOptions::new()
			.min_connections(2)
			.max_connections(16)
			.idle_timeout(Duration::from_secs(30))
			.connect(url)
			.await?;
		Ok(Self { pool })
	}

	/// Start the database with a pre-defined pool
	pub fn with_pool(pool: PgPool) -> Self {
		Self { pool }
	}

	pub async fn insert(&self, data: impl Insert) -> Result<u64> {
		let mut conn = self.pool.acquire().await?;
		let res = data.insert(&mut conn).await?;
		Ok(res)
	}

	pub async fn conn(&self) -> Result<DbConn> {
		self.pool.acquire().await.map_err(Into::into)
	}

	pub fn pool(&self) -> &sqlx::PgPool {
		&self.pool
	}
}

pub type DbReturn = Result<u64>;
pub type DbConn = PoolConnection<Postgres>;

#[async_trait::async_trait]
pub trait Insert: Send + Sized {
	async fn insert(mut self, conn: &mut DbConn) -> DbReturn;
}

#[async_trait::async_trait]
impl Insert for Entity {
	async fn insert(mut self, conn: &mut DbConn) -> DbReturn {
		log::trace!("Inserting entity {} ({})", self.name, self.kind.as_str());
		sqlx::query(
			r#"
            INSERT INTO entities (id, kind, project_id, provider_id, name, originated_from)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT DO NOTHING
        "#,
		)
		.bind(self.id)
		.bind(self.kind.as_str())
		.bind(self.project_id)
		.bind(self.provider_id)
		.bind(self.name.as_str())
		.bind(self.originated_from)
		.execute(conn)
		.await
		.map(|d| d.rows_affected())
		.map_err(Into::into)
	}
}

#[async_trait::async_trait]
impl Insert for Profile {
	async fn insert(mut self, conn: &mut DbConn) -> DbReturn {
		// `*` is reserved for list filters and must never be stored
		if self.labels.iter().any(|l| l == "*") {
			return Err(ReminderError::Conflict("profile labels may not contain the `*` sentinel".into()));
		}
		sqlx::query(
			r#"
            INSERT INTO profiles (id, project_id, name, labels, remediate, alert)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT DO NOTHING
        "#,
		)
		.bind(self.id)
		.bind(self.project_id)
		.bind(self.name.as_str())
		.bind(self.labels.clone())
		.bind(self.remediate.map(|m| m.as_str()))
		.bind(self.alert.map(|m| m.as_str()))
		.execute(conn)
		.await
		.map(|d| d.rows_affected())
		.map_err(Into::into)
	}
}

#[async_trait::async_trait]
impl Insert for RuleType {
	async fn insert(mut self, conn: &mut DbConn) -> DbReturn {
		sqlx::query(
			r#"
            INSERT INTO rule_types (id, project_id, name)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
        "#,
		)
		.bind(self.id)
		.bind(self.project_id)
		.bind(self.name.as_str())
		.execute(conn)
		.await
		.map(|d| d.rows_affected())
		.map_err(Into::into)
	}
}

#[async_trait::async_trait]
impl Insert for RuleInstance {
	async fn insert(mut self, conn: &mut DbConn) -> DbReturn {
		sqlx::query(
			r#"
            INSERT INTO rule_instances (id, profile_id, rule_type_id, name, params)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT DO NOTHING
        "#,
		)
		.bind(self.id)
		.bind(self.profile_id)
		.bind(self.rule_type_id)
		.bind(self.name.as_str())
		.bind(sqlx::types::Json(&self.params))
		.execute(conn)
		.await
		.map(|d| d.rows_affected())
		.map_err(Into::into)
	}
}
