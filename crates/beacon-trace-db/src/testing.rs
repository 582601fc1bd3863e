// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::SqlitePool;

use crate::pool::{create_pool, migrate};

pub async fn create_test_pool() -> SqlitePool {
	SqlitePool::connect(":memory:").await.unwrap()
}

pub async fn create_queue_test_pool() -> SqlitePool {
	let pool = create_test_pool().await;
	migrate(&pool).await.unwrap();
	pool
}

/// File-backed pool for tests that need several connections to see the
/// same database.
pub async fn create_file_test_pool(dir: &tempfile::TempDir) -> SqlitePool {
	let url = format!("sqlite:{}", dir.path().join("queue.db").display());
	let pool = create_pool(&url).await.unwrap();
	migrate(&pool).await.unwrap();
	pool
}
