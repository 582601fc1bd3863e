// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! # beacon-trace-db
//!
//! SQLite persistence for the Beacon send queue.
//!
//! [`QueueRepository`] holds a `SqlitePool` and implements the
//! [`beacon_trace_core::QueueStore`] contract by delegating to its inherent
//! methods. Rows keep their insertion order through an autoincrement `seq`
//! column, so `oldest` never depends on clock resolution.
//!
//! ```rust,ignore
//! let pool = beacon_trace_db::create_pool("sqlite:./beacon-queue.db").await?;
//! beacon_trace_db::migrate(&pool).await?;
//! let store = Arc::new(QueueRepository::new(pool));
//! ```

mod error;
pub mod pool;
pub mod queue;

#[cfg(test)]
pub mod testing;

pub use error::{DbError, Result};
pub use pool::{create_pool, migrate};
pub use queue::QueueRepository;
