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

//! End-to-end scenarios against a live Postgres (and, for the loop test, a
//! live RabbitMQ). Run them with
//! `DATABASE_URL=postgres://… AMQP_URL=amqp://… cargo test -- --ignored`.
//!
//! Every scenario works inside its own throwaway project id, so the suite
//! can share a database without cross-test interference.

use std::{sync::Once, time::Duration};

use anyhow::Error;
use async_std::task;
use chrono::Utc;
use once_cell::sync::Lazy;
use serde_json::json;
use uuid::Uuid;

use policy_reminder::{
	database::{flush, history, locks, properties, queries, Database},
	Entity, EntityKind, EvalStatus, EvaluationOutcome, Profile, ReminderError, RuleInstance, RuleType,
};

static DATABASE_URL: Lazy<String> = Lazy::new(|| {
	dotenv::dotenv().ok();
	std::env::var("DATABASE_URL").expect("DATABASE_URL must point to a test database")
});

static INIT: Once = Once::new();

/// Guard that should be called at the beginning of every test.
fn initialize() {
	INIT.call_once(|| {
		let _ = pretty_env_logger::try_init();
		task::block_on(async {
			policy_reminder::database::migrate(&*DATABASE_URL).await.unwrap();
		});
	});
}

async fn database() -> Result<Database, Error> {
	Ok(Database::new(&DATABASE_URL).await?)
}

struct Fixture {
	project_id: Uuid,
	provider_id: Uuid,
}

impl Fixture {
	fn new() -> Self {
		Self { project_id: Uuid::new_v4(), provider_id: Uuid::new_v4() }
	}

	async fn entity(&self, db: &Database, name: &str) -> Result<Entity, Error> {
		let entity = Entity::new(self.project_id, self.provider_id, EntityKind::Repository, name);
		db.insert(entity.clone()).await?;
		Ok(entity)
	}

	/// A profile with a single rule instance, ready for rule-entities.
	async fn profile_with_rule(
		&self,
		db: &Database,
		name: &str,
		labels: Vec<String>,
	) -> Result<(Profile, RuleInstance), Error> {
		let profile = Profile::new(self.project_id, name, labels);
		db.insert(profile.clone()).await?;
		let rule_type = RuleType::new(self.project_id, format!("{}_rule", name));
		db.insert(rule_type.clone()).await?;
		let instance = RuleInstance::new(profile.id, rule_type.id, "default");
		db.insert(instance.clone()).await?;
		Ok((profile, instance))
	}
}

async fn evaluate(
	db: &Database,
	rule_entity_id: Uuid,
	profile_id: Uuid,
	status: EvalStatus,
) -> Result<Uuid, Error> {
	let mut conn = db.conn().await?;
	let outcome = EvaluationOutcome::new(rule_entity_id, profile_id, status, "scenario");
	Ok(history::record_outcome(&mut conn, &outcome).await?)
}

#[test]
#[ignore = "requires postgres"]
fn single_rule_lifecycle_drives_profile_status() -> Result<(), Error> {
	initialize();
	task::block_on(async {
		let db = database().await?;
		let fix = Fixture::new();
		let entity = fix.entity(&db, "stacklok/demo").await?;
		let (profile, instance) = fix.profile_with_rule(&db, "health", vec![]).await?;

		let mut conn = db.conn().await?;
		let rule_entity = history::insert_rule_entity(&mut conn, instance.id, entity.id).await?;

		evaluate(&db, rule_entity, profile.id, EvalStatus::Success).await?;
		assert_eq!(
			history::profile_status(&mut conn, profile.id, fix.project_id).await?,
			EvalStatus::Success
		);

		evaluate(&db, rule_entity, profile.id, EvalStatus::Failure).await?;
		assert_eq!(
			history::profile_status(&mut conn, profile.id, fix.project_id).await?,
			EvalStatus::Failure
		);

		// a bare status append does not move the aggregate until the
		// latest pointer is upserted
		let checkpoint = json!({});
		let newer =
			history::insert_status(&mut conn, rule_entity, EvalStatus::Success, "scenario", &checkpoint).await?;
		assert_eq!(
			history::profile_status(&mut conn, profile.id, fix.project_id).await?,
			EvalStatus::Failure
		);
		history::upsert_latest(&mut conn, rule_entity, newer, profile.id).await?;
		assert_eq!(
			history::profile_status(&mut conn, profile.id, fix.project_id).await?,
			EvalStatus::Success
		);
		Ok(())
	})
}

#[test]
#[ignore = "requires postgres"]
fn deleting_the_dominant_rule_demotes_the_aggregate() -> Result<(), Error> {
	initialize();
	task::block_on(async {
		let db = database().await?;
		let fix = Fixture::new();
		let entity = fix.entity(&db, "stacklok/two-rules").await?;
		let (profile, instance1) = fix.profile_with_rule(&db, "strict", vec![]).await?;
		let rule_type = RuleType::new(fix.project_id, "strict_second_rule");
		db.insert(rule_type.clone()).await?;
		let instance2 = RuleInstance::new(profile.id, rule_type.id, "default");
		db.insert(instance2.clone()).await?;

		let mut conn = db.conn().await?;
		let re1 = history::insert_rule_entity(&mut conn, instance1.id, entity.id).await?;
		let re2 = history::insert_rule_entity(&mut conn, instance2.id, entity.id).await?;

		evaluate(&db, re1, profile.id, EvalStatus::Error).await?;
		evaluate(&db, re2, profile.id, EvalStatus::Failure).await?;
		assert_eq!(history::profile_status(&mut conn, profile.id, fix.project_id).await?, EvalStatus::Error);

		// dropping the rule-entity carrying the error cascades its ledger
		// rows and its latest pointer
		sqlx::query("DELETE FROM rule_entities WHERE id = $1").bind(re1).execute(&mut conn).await?;
		assert_eq!(
			history::profile_status(&mut conn, profile.id, fix.project_id).await?,
			EvalStatus::Failure
		);

		// and with the second one gone the profile is back to pending
		sqlx::query("DELETE FROM rule_entities WHERE id = $1").bind(re2).execute(&mut conn).await?;
		assert_eq!(
			history::profile_status(&mut conn, profile.id, fix.project_id).await?,
			EvalStatus::Pending
		);
		Ok(())
	})
}

#[test]
#[ignore = "requires postgres"]
fn label_filters_distinguish_empty_wildcard_and_overlap() -> Result<(), Error> {
	initialize();
	task::block_on(async {
		let db = database().await?;
		let fix = Fixture::new();

		let labelled: [(&str, &[&str]); 5] = [
			("a", &["stacklok:health"]),
			("b", &["stacklok:health", "obsolete"]),
			("c", &["obsolete"]),
			("d", &[]),
			("e", &[]),
		];
		let mut conn = db.conn().await?;
		for (name, labels) in &labelled {
			let entity = fix.entity(&db, &format!("stacklok/{}", name)).await?;
			let labels = labels.iter().map(|l| l.to_string()).collect();
			let (profile, instance) = fix.profile_with_rule(&db, name, labels).await?;
			let rule_entity = history::insert_rule_entity(&mut conn, instance.id, entity.id).await?;
			evaluate(&db, rule_entity, profile.id, EvalStatus::Success).await?;
		}
		assert_eq!(queries::list_profiles(&mut conn, fix.project_id).await?.len(), 5);
		assert!(queries::entity_by_name(&mut conn, fix.project_id, EntityKind::Repository, "stacklok/a")
			.await?
			.is_some());

		let profiles_for = |labels: Vec<&str>, not_labels: Vec<&str>| {
			let mut filter = history::HistoryFilter::new(fix.project_id);
			filter.labels = labels.into_iter().map(String::from).collect();
			filter.not_labels = not_labels.into_iter().map(String::from).collect();
			let db = db.clone();
			async move {
				let mut conn = db.conn().await?;
				let page = history::Page::new(history::Cursor::newest(), 50);
				let rows = history::list_history(&mut conn, &filter, page).await?;
				let mut names: Vec<String> = rows.into_iter().map(|r| r.profile_name).collect();
				names.sort();
				names.dedup();
				Ok::<_, Error>(names)
			}
		};

		assert_eq!(profiles_for(vec!["*"], vec![]).await?, vec!["a", "b", "c", "d", "e"]);
		assert_eq!(profiles_for(vec![], vec![]).await?, vec!["d", "e"]);
		assert_eq!(
			profiles_for(vec!["stacklok:health", "obsolete"], vec![]).await?,
			vec!["a", "b", "c"]
		);
		assert_eq!(profiles_for(vec!["*"], vec!["obsolete"]).await?, vec!["a", "d", "e"]);
		Ok(())
	})
}

#[test]
#[ignore = "requires postgres"]
fn wildcard_label_is_rejected_as_a_stored_value() -> Result<(), Error> {
	initialize();
	task::block_on(async {
		let db = database().await?;
		let fix = Fixture::new();
		let profile = Profile::new(fix.project_id, "greedy", vec!["*".to_string()]);
		match db.insert(profile).await {
			Err(ReminderError::Conflict(_)) => {}
			other => panic!("expected Conflict, got {:?}", other),
		}
		Ok(())
	})
}

#[test]
#[ignore = "requires postgres"]
fn concurrent_acquires_and_enqueues_pick_one_winner() -> Result<(), Error> {
	initialize();
	task::block_on(async {
		let db = database().await?;
		let fix = Fixture::new();
		let entity = fix.entity(&db, "stacklok/contended").await?;

		let acquire = |entity_id| {
			let db = db.clone();
			let project_id = fix.project_id;
			async move {
				let mut conn = db.conn().await?;
				Ok::<_, Error>(
					locks::acquire_if_expired(&mut conn, entity_id, project_id, EntityKind::Repository, 1).await?,
				)
			}
		};

		let results =
			futures::future::join_all((0..10).map(|_| acquire(entity.id)).collect::<Vec<_>>()).await;
		let locks_won =
			results.into_iter().collect::<Result<Vec<_>, _>>()?.into_iter().flatten().collect::<Vec<_>>();
		assert_eq!(locks_won.len(), 1, "exactly one of ten concurrent acquires may win");

		let enqueue = || {
			let db = db.clone();
			let project_id = fix.project_id;
			let entity_id = entity.id;
			async move {
				let mut conn = db.conn().await?;
				Ok::<_, Error>(flush::enqueue(&mut conn, entity_id, project_id, EntityKind::Repository).await?)
			}
		};
		let results = futures::future::join_all((0..9).map(|_| enqueue()).collect::<Vec<_>>()).await;
		let entries =
			results.into_iter().collect::<Result<Vec<_>, _>>()?.into_iter().flatten().collect::<Vec<_>>();
		assert_eq!(entries.len(), 1, "exactly one of nine concurrent enqueues may win");

		// once the lease has aged past the threshold an eleventh worker steals it
		task::sleep(Duration::from_millis(1100)).await;
		let stolen = acquire(entity.id).await?;
		assert!(stolen.is_some());
		assert_ne!(stolen.unwrap().locked_by, locks_won[0].locked_by);
		Ok(())
	})
}

#[test]
#[ignore = "requires postgres"]
fn fresh_locks_are_left_untouched_and_release_is_idempotent() -> Result<(), Error> {
	initialize();
	task::block_on(async {
		let db = database().await?;
		let fix = Fixture::new();
		let entity = fix.entity(&db, "stacklok/leases").await?;
		let mut conn = db.conn().await?;

		let lock = locks::acquire_if_expired(&mut conn, entity.id, fix.project_id, EntityKind::Repository, 600)
			.await?
			.expect("no lock exists yet");
		let before = locks::get(&mut conn, entity.id).await?.expect("lock row exists");

		// a second acquire against a fresh lock neither changes the owner
		// nor bumps the lease
		let refused =
			locks::acquire_if_expired(&mut conn, entity.id, fix.project_id, EntityKind::Repository, 600).await?;
		assert!(refused.is_none());
		let after = locks::get(&mut conn, entity.id).await?.expect("lock row still exists");
		assert_eq!(before.locked_by, after.locked_by);
		assert_eq!(before.last_lock_time, after.last_lock_time);

		locks::renew(&mut conn, entity.id, lock.locked_by).await?;
		let renewed = locks::get(&mut conn, entity.id).await?.expect("lock row still exists");
		assert!(renewed.last_lock_time >= after.last_lock_time);

		// renew with the wrong token is a silent no-op
		locks::renew(&mut conn, entity.id, Uuid::new_v4()).await?;
		let unchanged = locks::get(&mut conn, entity.id).await?.expect("lock row still exists");
		assert_eq!(renewed.last_lock_time, unchanged.last_lock_time);

		locks::release(&mut conn, entity.id, lock.locked_by).await?;
		assert!(locks::get(&mut conn, entity.id).await?.is_none());
		// the second release is a no-op
		locks::release(&mut conn, entity.id, lock.locked_by).await?;
		Ok(())
	})
}

#[test]
#[ignore = "requires postgres"]
fn history_pages_in_both_directions_with_strict_cursors() -> Result<(), Error> {
	initialize();
	task::block_on(async {
		let db = database().await?;
		let fix = Fixture::new();
		let entity = fix.entity(&db, "stacklok/paged").await?;
		let (profile, instance) = fix.profile_with_rule(&db, "paging", vec![]).await?;
		let mut conn = db.conn().await?;
		let rule_entity = history::insert_rule_entity(&mut conn, instance.id, entity.id).await?;

		for _ in 0..10 {
			evaluate(&db, rule_entity, profile.id, EvalStatus::Success).await?;
			// keep evaluation times strictly increasing
			task::sleep(Duration::from_millis(10)).await;
		}

		let filter = history::HistoryFilter::new(fix.project_id);
		let newest = history::list_history(&mut conn, &filter, history::Page::new(history::Cursor::newest(), 5))
			.await?;
		assert_eq!(newest.len(), 5);
		for pair in newest.windows(2) {
			assert!(pair[0].evaluation_time >= pair[1].evaluation_time);
		}

		// the second page starts strictly below the last row of the first
		let boundary = newest.last().unwrap().evaluation_time;
		let older = history::list_history(
			&mut conn,
			&filter,
			history::Page::new(history::Cursor::Next(boundary), 5),
		)
		.await?;
		assert_eq!(older.len(), 5);
		assert!(older.iter().all(|r| r.evaluation_time < boundary));

		let oldest = history::list_history(&mut conn, &filter, history::Page::new(history::Cursor::oldest(), 5))
			.await?;
		assert_eq!(oldest.len(), 5);
		for pair in oldest.windows(2) {
			assert!(pair[0].evaluation_time <= pair[1].evaluation_time);
		}
		// ascending-from-epoch and descending-from-infinity meet in the middle
		assert_eq!(
			oldest.iter().map(|r| r.id).collect::<Vec<_>>(),
			older.iter().rev().map(|r| r.id).collect::<Vec<_>>()
		);

		// both cursor relations are strict
		let at = oldest.last().unwrap().evaluation_time;
		let after = history::list_history(&mut conn, &filter, history::Page::new(history::Cursor::Prev(at), 50))
			.await?;
		assert!(after.iter().all(|r| r.evaluation_time > at));
		Ok(())
	})
}

#[test]
#[ignore = "requires postgres"]
fn stale_scan_only_sees_old_superseded_rows() -> Result<(), Error> {
	initialize();
	task::block_on(async {
		let db = database().await?;
		let fix = Fixture::new();
		let entity = fix.entity(&db, "stacklok/stale").await?;
		let (profile, instance) = fix.profile_with_rule(&db, "staleness", vec![]).await?;
		let mut conn = db.conn().await?;
		let rule_entity = history::insert_rule_entity(&mut conn, instance.id, entity.id).await?;

		// three appends; the pointer ends on the last one
		let first = evaluate(&db, rule_entity, profile.id, EvalStatus::Success).await?;
		let second = evaluate(&db, rule_entity, profile.id, EvalStatus::Failure).await?;
		let latest = evaluate(&db, rule_entity, profile.id, EvalStatus::Success).await?;

		let stale = history::list_stale(&mut conn, Utc::now(), 50).await?;
		let ours: Vec<_> = stale.iter().filter(|s| s.entity_id == entity.id).collect();
		assert_eq!(ours.iter().map(|s| s.status_id).collect::<Vec<_>>(), vec![first, second]);
		for pair in ours.windows(2) {
			assert!(pair[0].evaluation_time <= pair[1].evaluation_time);
		}

		// the pointed-to row cannot be deleted
		match history::delete_by_ids(&mut conn, &[latest]).await {
			Err(ReminderError::StatusReferenced(id)) => assert_eq!(id, latest),
			other => panic!("expected StatusReferenced, got {:?}", other),
		}
		// the superseded rows can
		assert_eq!(history::delete_by_ids(&mut conn, &[first, second]).await?, 2);
		let stale = history::list_stale(&mut conn, Utc::now(), 50).await?;
		assert!(stale.iter().all(|s| s.entity_id != entity.id));
		Ok(())
	})
}

#[test]
#[ignore = "requires postgres"]
fn properties_round_trip_and_reject_foreign_versions() -> Result<(), Error> {
	initialize();
	task::block_on(async {
		let db = database().await?;
		let fix = Fixture::new();
		let entity = fix.entity(&db, "stacklok/props").await?;
		let mut conn = db.conn().await?;

		properties::put(&mut conn, entity.id, "default_branch", &json!("main")).await?;
		properties::put(&mut conn, entity.id, "stars", &json!(128)).await?;
		assert_eq!(properties::get(&mut conn, entity.id, "default_branch").await?, Some(json!("main")));

		// last writer wins
		properties::put(&mut conn, entity.id, "default_branch", &json!("trunk")).await?;
		assert_eq!(properties::get(&mut conn, entity.id, "default_branch").await?, Some(json!("trunk")));
		assert_eq!(properties::get(&mut conn, entity.id, "missing").await?, None);
		assert_eq!(properties::get_all(&mut conn, entity.id).await?.len(), 2);

		let found = properties::find_entities(
			&mut conn,
			fix.project_id,
			EntityKind::Repository,
			"default_branch",
			&json!("trunk"),
		)
		.await?;
		assert_eq!(found.len(), 1);
		assert_eq!(found[0].id, entity.id);

		// a row written by some future version fails closed on read
		let foreign = serde_json::to_vec(&json!({ "version": "v2", "value": 1 }))?;
		sqlx::query(
			"INSERT INTO properties (id, entity_id, key, value) VALUES ($1, $2, $3, $4)
             ON CONFLICT (entity_id, key) DO UPDATE SET value = EXCLUDED.value",
		)
		.bind(Uuid::new_v4())
		.bind(entity.id)
		.bind("from_the_future")
		.bind(foreign)
		.execute(&mut conn)
		.await?;
		match properties::get(&mut conn, entity.id, "from_the_future").await {
			Err(ReminderError::BadPropertyVersion(v)) => assert_eq!(v, "v2"),
			other => panic!("expected BadPropertyVersion, got {:?}", other.map(|_| ())),
		}
		Ok(())
	})
}

#[test]
#[ignore = "requires postgres"]
fn flush_queue_pops_exactly_what_was_queued() -> Result<(), Error> {
	initialize();
	task::block_on(async {
		let db = database().await?;
		let fix = Fixture::new();
		let entity = fix.entity(&db, "stacklok/flush").await?;
		let mut conn = db.conn().await?;

		let entry = flush::enqueue(&mut conn, entity.id, fix.project_id, EntityKind::Repository)
			.await?
			.expect("queue is empty");
		assert!(flush::enqueue(&mut conn, entity.id, fix.project_id, EntityKind::Repository).await?.is_none());
		assert!(flush::list(&mut conn).await?.iter().any(|e| e.id == entry.id));

		let popped = flush::pop(&mut conn, entity.id).await?.expect("entry was queued");
		assert_eq!(popped.id, entry.id);
		assert_eq!(popped.entity_kind()?, EntityKind::Repository);
		assert!(flush::pop(&mut conn, entity.id).await?.is_none());
		Ok(())
	})
}

#[test]
#[ignore = "requires postgres and rabbitmq"]
fn stale_rows_drive_bus_emission() -> Result<(), Error> {
	use lapin::{options::*, types::FieldTable};
	use policy_reminder::{Reminder, ReminderBuilder, ReminderConfig};

	initialize();
	let amqp_url = std::env::var("AMQP_URL").unwrap_or_else(|_| "amqp://localhost:5672".to_string());

	let (fix, entity) = task::block_on(async {
		let db = database().await?;
		let fix = Fixture::new();
		let entity = fix.entity(&db, "stacklok/driven").await?;
		let (_profile, instance) = fix.profile_with_rule(&db, "driven", vec![]).await?;
		let mut conn = db.conn().await?;
		let rule_entity = history::insert_rule_entity(&mut conn, instance.id, entity.id).await?;
		// a bare status append, never promoted to the latest pointer,
		// i.e. a stale row the loop should pick up
		history::insert_status(&mut conn, rule_entity, EvalStatus::Success, "stale", &json!({})).await?;
		Ok::<_, Error>((fix, entity))
	})?;

	// a queue bound before the system starts collects the emissions
	let queue_name = format!("scenario-{}", Uuid::new_v4());
	let conn = task::block_on(async {
		use async_amqp::*;
		Ok::<_, Error>(
			lapin::Connection::connect(&amqp_url, lapin::ConnectionProperties::default().with_async_std()).await?,
		)
	})?;
	let channel = task::block_on(conn.create_channel())?;
	task::block_on(async {
		channel
			.exchange_declare(
				policy_reminder::RECONCILE_TOPIC,
				lapin::ExchangeKind::Topic,
				ExchangeDeclareOptions { durable: true, ..Default::default() },
				FieldTable::default(),
			)
			.await?;
		channel
			.queue_declare(
				&queue_name,
				QueueDeclareOptions { auto_delete: true, ..Default::default() },
				FieldTable::default(),
			)
			.await?;
		channel
			.queue_bind(
				&queue_name,
				policy_reminder::RECONCILE_TOPIC,
				"#",
				QueueBindOptions::default(),
				FieldTable::default(),
			)
			.await?;
		Ok::<_, Error>(())
	})?;

	let config: ReminderConfig = toml::from_str(&format!(
		r#"
        [database]
        url = "{}"

        [bus]
        addr = "{}"

        [control]
        interval = 1
        staleness_threshold = 1
        lock_threshold_seconds = 2
        batch_size = 50
    "#,
		&*DATABASE_URL, amqp_url
	))?;

	let mut system = task::block_on(ReminderBuilder::with_config(config).build())?;
	system.drive()?;
	std::thread::sleep(Duration::from_secs(3));

	// at most one message per lock_threshold_seconds despite several ticks
	let mut ours = 0;
	while let Some(message) = task::block_on(channel.basic_get(&queue_name, BasicGetOptions::default()))? {
		let request: policy_reminder::ReconcileRequest = serde_json::from_slice(&message.delivery.data)?;
		if request.entity_id == entity.id {
			assert_eq!(request.project_id, fix.project_id);
			assert_eq!(request.provider_id, fix.provider_id);
			ours += 1;
		}
		task::block_on(channel.basic_ack(message.delivery.delivery_tag, BasicAckOptions::default()))?;
	}
	assert!(ours >= 1, "the stale row must drive at least one emission");
	assert!(ours <= 2, "the execution lock must throttle re-emission");

	// the flush entry was coalesced for the evaluator to pop
	task::block_on(async {
		let db = database().await?;
		let mut conn = db.conn().await?;
		let entry = flush::pop(&mut conn, entity.id).await?;
		assert!(entry.is_some());
		Ok::<_, Error>(())
	})?;

	system.shutdown()?;
	Ok(())
}
