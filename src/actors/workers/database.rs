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

use xtra::prelude::*;

use crate::{
	database::{history, Database, DbConn},
	error::Result,
	types::{Die, EvaluationOutcome},
};

/// Owns the connection pool and serialises evaluation-outcome writes: the
/// status insert and latest-pointer upsert of one outcome land in a single
/// transaction.
#[derive(Clone)]
pub struct DatabaseActor {
	db: Database,
}

impl DatabaseActor {
	pub fn new(db: Database) -> Self {
		Self { db }
	}

	async fn outcome_handler(&self, outcome: EvaluationOutcome) -> Result<()> {
		let mut conn = self.db.conn().await?;
		let status_id = history::record_outcome(&mut conn, &outcome).await?;
		log::debug!(
			"recorded {} evaluation {} for rule-entity {}",
			outcome.status.as_str(),
			status_id,
			outcome.rule_entity_id
		);
		Ok(())
	}
}

impl Actor for DatabaseActor {}

#[async_trait::async_trait]
impl Handler<EvaluationOutcome> for DatabaseActor {
	async fn handle(&mut self, outcome: EvaluationOutcome, _: &mut Context<Self>) {
		if let Err(e) = self.outcome_handler(outcome).await {
			log::error!("{}", e.to_string())
		}
	}
}

#[async_trait::async_trait]
impl Handler<Die> for DatabaseActor {
	async fn handle(&mut self, _: Die, ctx: &mut Context<Self>) {
		ctx.stop();
	}
}

// this is an enum in case there is some more state
// that might be needed in the future
/// Get Some State from the Database Actor
#[derive(Debug)]
pub enum GetState {
	// Get a single connection
	Conn,
	// Get the Connection Pool
	Pool,
}

/// A response to `GetState`
/// it is the callers responsibility to make sure to call the
/// correct method on the implement after receiving the message
#[derive(Debug)]
pub enum StateResponse {
	Conn(DbConn),
	Pool(sqlx::PgPool),
}

impl StateResponse {
	/// Pull a connection out of the enum
	///
	/// # Panics
	/// panics if the enum is not actually of the `Conn` type
	pub fn conn(self) -> DbConn {
		match self {
			StateResponse::Conn(v) => v,
			StateResponse::Pool(_) => panic!("Not a connection"),
		}
	}

	/// Pull a pool out of the enum
	///
	/// # Panics
	/// panics if the enum is not actually of the 'pool' type
	pub fn pool(self) -> sqlx::PgPool {
		match self {
			StateResponse::Pool(v) => v,
			StateResponse::Conn(_) => panic!("Not a pool"),
		}
	}
}

impl Message for GetState {
	type Result = Result<StateResponse>;
}

#[async_trait::async_trait]
impl Handler<GetState> for DatabaseActor {
	async fn handle(&mut self, msg: GetState, _: &mut Context<Self>) -> Result<StateResponse> {
		match msg {
			GetState::Conn => {
				let conn = self.db.conn().await?;
				Ok(StateResponse::Conn(conn))
			}
			GetState::Pool => {
				let pool = self.db.pool().clone();
				Ok(StateResponse::Pool(pool))
			}
		}
	}
}
