// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable rows of the send queue.
//!
//! Each row is one delivery request: a crash envelope or a sealed trace,
//! stored as the JSON it is delivered with, plus its failed attempt count.

use async_trait::async_trait;
use beacon_trace_core::{PayloadKind, QueueRow, QueueStore, RowUpdate};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;

use crate::error::{DbError, Result};

type RawRow = (String, String, String, i64, String);

#[derive(Clone)]
pub struct QueueRepository {
	pool: SqlitePool,
}

impl QueueRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, row), fields(row_id = %row.id, kind = %row.kind))]
	pub async fn create_row(&self, row: &QueueRow) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO send_queue (id, kind, payload, sent_attempts, enqueued_at)
			VALUES (?, ?, ?, ?, ?)
			"#,
		)
		.bind(&row.id)
		.bind(row.kind.as_str())
		.bind(&row.payload)
		.bind(i64::from(row.sent_attempts))
		.bind(row.enqueued_at.to_rfc3339_opts(SecondsFormat::Nanos, true))
		.execute(&self.pool)
		.await
		.map_err(|e| match e {
			sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
				DbError::Conflict(row.id.clone())
			}
			_ => DbError::Sqlx(e),
		})?;

		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_oldest(&self, limit: usize) -> Result<Vec<QueueRow>> {
		let limit = i64::try_from(limit).unwrap_or(i64::MAX);
		let rows = sqlx::query_as::<_, RawRow>(
			r#"
			SELECT id, kind, payload, sent_attempts, enqueued_at
			FROM send_queue
			ORDER BY seq ASC
			LIMIT ?
			"#,
		)
		.bind(limit)
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(parse_row).collect()
	}

	#[tracing::instrument(skip(self, updates), fields(count = updates.len()))]
	pub async fn apply_updates(&self, updates: &[RowUpdate]) -> Result<()> {
		if updates.is_empty() {
			return Ok(());
		}

		let mut tx = self.pool.begin().await?;

		for update in updates {
			match update {
				RowUpdate::SetAttempts { id, attempts } => {
					sqlx::query("UPDATE send_queue SET sent_attempts = ? WHERE id = ?")
						.bind(i64::from(*attempts))
						.bind(id)
						.execute(&mut *tx)
						.await?;
				}
				RowUpdate::Delete { id } => {
					sqlx::query("DELETE FROM send_queue WHERE id = ?")
						.bind(id)
						.execute(&mut *tx)
						.await?;
				}
			}
		}

		tx.commit().await?;
		tracing::debug!(count = updates.len(), "applied queue updates");
		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn count_rows(&self) -> Result<i64> {
		let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM send_queue")
			.fetch_one(&self.pool)
			.await?;
		Ok(count)
	}
}

fn parse_row((id, kind, payload, sent_attempts, enqueued_at): RawRow) -> Result<QueueRow> {
	let kind: PayloadKind = kind.parse()?;
	let sent_attempts = u32::try_from(sent_attempts)
		.map_err(|_| DbError::Internal(format!("invalid sent_attempts {sent_attempts} for row {id}")))?;
	let enqueued_at = DateTime::parse_from_rfc3339(&enqueued_at)
		.map_err(|e| DbError::Internal(format!("invalid enqueued_at for row {id}: {e}")))?
		.with_timezone(&Utc);

	Ok(QueueRow {
		id,
		kind,
		payload,
		sent_attempts,
		enqueued_at,
	})
}

#[async_trait]
impl QueueStore for QueueRepository {
	async fn put(&self, row: QueueRow) -> beacon_trace_core::Result<()> {
		Ok(self.create_row(&row).await?)
	}

	async fn oldest(&self, limit: usize) -> beacon_trace_core::Result<Vec<QueueRow>> {
		Ok(self.list_oldest(limit).await?)
	}

	async fn apply(&self, updates: &[RowUpdate]) -> beacon_trace_core::Result<()> {
		Ok(self.apply_updates(updates).await?)
	}

	async fn len(&self) -> beacon_trace_core::Result<usize> {
		let count = self.count_rows().await?;
		Ok(usize::try_from(count).unwrap_or(0))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{create_file_test_pool, create_queue_test_pool};
	use beacon_trace_core::TraceCoreError;
	use proptest::prelude::*;
	use std::collections::HashSet;
	use std::sync::Arc;

	fn crash_row(id: &str) -> QueueRow {
		QueueRow::new(id, PayloadKind::Crash, format!("{{\"id\":\"{id}\"}}"))
	}

	#[tokio::test]
	async fn test_put_and_list_oldest() {
		let repo = QueueRepository::new(create_queue_test_pool().await);

		repo.put(crash_row("a")).await.unwrap();
		repo
			.put(QueueRow::new("b", PayloadKind::Trace, "{}"))
			.await
			.unwrap();

		let rows = repo.oldest(10).await.unwrap();
		assert_eq!(rows.len(), 2);
		assert_eq!(rows[0].id, "a");
		assert_eq!(rows[0].kind, PayloadKind::Crash);
		assert_eq!(rows[0].sent_attempts, 0);
		assert_eq!(rows[1].kind, PayloadKind::Trace);
		assert_eq!(QueueStore::len(&repo).await.unwrap(), 2);
	}

	#[tokio::test]
	async fn test_oldest_first_respects_limit() {
		let repo = QueueRepository::new(create_queue_test_pool().await);

		for id in ["t1", "t2", "t3"] {
			repo.put(crash_row(id)).await.unwrap();
		}

		let rows = repo.oldest(2).await.unwrap();
		let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
		assert_eq!(ids, vec!["t1", "t2"]);
	}

	#[tokio::test]
	async fn test_duplicate_id_is_rejected() {
		let repo = QueueRepository::new(create_queue_test_pool().await);

		repo.put(crash_row("dup")).await.unwrap();
		let err = repo.put(crash_row("dup")).await.unwrap_err();

		assert!(matches!(err, TraceCoreError::DuplicateRow(id) if id == "dup"));
		assert_eq!(QueueStore::len(&repo).await.unwrap(), 1);
	}

	#[tokio::test]
	async fn test_apply_updates_and_deletes() {
		let repo = QueueRepository::new(create_queue_test_pool().await);

		for id in ["a", "b", "c"] {
			repo.put(crash_row(id)).await.unwrap();
		}

		repo
			.apply(&[
				RowUpdate::SetAttempts {
					id: "a".to_string(),
					attempts: 3,
				},
				RowUpdate::Delete {
					id: "b".to_string(),
				},
				RowUpdate::Delete {
					id: "missing".to_string(),
				},
			])
			.await
			.unwrap();

		let rows = repo.oldest(10).await.unwrap();
		assert_eq!(rows.len(), 2);
		assert_eq!(rows[0].id, "a");
		assert_eq!(rows[0].sent_attempts, 3);
		assert_eq!(rows[1].id, "c");
	}

	#[tokio::test]
	async fn test_updates_keep_insertion_order() {
		let repo = QueueRepository::new(create_queue_test_pool().await);

		for id in ["first", "second"] {
			repo.put(crash_row(id)).await.unwrap();
		}
		repo
			.apply(&[RowUpdate::SetAttempts {
				id: "first".to_string(),
				attempts: 1,
			}])
			.await
			.unwrap();

		let rows = repo.oldest(1).await.unwrap();
		assert_eq!(rows[0].id, "first");
	}

	#[tokio::test]
	async fn test_rows_survive_reopen() {
		let dir = tempfile::tempdir().unwrap();
		{
			let repo = QueueRepository::new(create_file_test_pool(&dir).await);
			repo.put(crash_row("persisted")).await.unwrap();
		}

		let repo = QueueRepository::new(create_file_test_pool(&dir).await);
		let rows = repo.oldest(10).await.unwrap();
		assert_eq!(rows.len(), 1);
		assert_eq!(rows[0].id, "persisted");
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn test_concurrent_inserts_lose_nothing() {
		let dir = tempfile::tempdir().unwrap();
		let repo = Arc::new(QueueRepository::new(create_file_test_pool(&dir).await));

		let mut handles = Vec::new();
		for worker in 0..10 {
			let repo = Arc::clone(&repo);
			handles.push(tokio::spawn(async move {
				for n in 0..10 {
					repo.put(crash_row(&format!("w{worker}-{n}"))).await.unwrap();
				}
			}));
		}
		for handle in handles {
			handle.await.unwrap();
		}

		let rows = repo.oldest(1000).await.unwrap();
		let ids: HashSet<_> = rows.iter().map(|r| r.id.clone()).collect();
		assert_eq!(rows.len(), 100);
		assert_eq!(ids.len(), 100);
	}

	proptest! {
		#![proptest_config(ProptestConfig::with_cases(16))]

		#[test]
		fn prop_oldest_returns_insertion_prefix(count in 1usize..20, limit in 0usize..25) {
			let runtime = tokio::runtime::Builder::new_current_thread()
				.enable_all()
				.build()
				.unwrap();
			let ids = runtime.block_on(async {
				let repo = QueueRepository::new(create_queue_test_pool().await);
				for n in 0..count {
					repo.put(crash_row(&format!("row-{n:03}"))).await.unwrap();
				}
				repo.oldest(limit).await.unwrap()
			});

			let expected: Vec<String> = (0..count.min(limit)).map(|n| format!("row-{n:03}")).collect();
			let actual: Vec<String> = ids.into_iter().map(|r| r.id).collect();
			prop_assert_eq!(actual, expected);
		}
	}
}
