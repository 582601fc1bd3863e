// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Row-store contract behind the durable send queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, TraceCoreError};

/// What a queued payload decodes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
	Crash,
	Trace,
}

impl PayloadKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			PayloadKind::Crash => "crash",
			PayloadKind::Trace => "trace",
		}
	}
}

impl fmt::Display for PayloadKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for PayloadKind {
	type Err = TraceCoreError;

	fn from_str(s: &str) -> Result<Self> {
		match s {
			"crash" => Ok(PayloadKind::Crash),
			"trace" => Ok(PayloadKind::Trace),
			_ => Err(TraceCoreError::InvalidPayloadKind(s.to_string())),
		}
	}
}

/// A persisted, not yet acknowledged delivery request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueRow {
	pub id: String,
	pub kind: PayloadKind,
	pub payload: String,
	pub sent_attempts: u32,
	pub enqueued_at: DateTime<Utc>,
}

impl QueueRow {
	/// A fresh row with no delivery attempts.
	pub fn new(id: impl Into<String>, kind: PayloadKind, payload: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			kind,
			payload: payload.into(),
			sent_attempts: 0,
			enqueued_at: Utc::now(),
		}
	}
}

/// Change applied to an existing row by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowUpdate {
	SetAttempts { id: String, attempts: u32 },
	Delete { id: String },
}

impl RowUpdate {
	pub fn id(&self) -> &str {
		match self {
			RowUpdate::SetAttempts { id, .. } | RowUpdate::Delete { id } => id,
		}
	}
}

/// Storage engine contract for queued rows.
///
/// `oldest` returns rows in insertion order. Updates naming a missing id
/// are ignored.
#[async_trait]
pub trait QueueStore: Send + Sync {
	/// Fails with [`TraceCoreError::DuplicateRow`] when the id already exists.
	async fn put(&self, row: QueueRow) -> Result<()>;

	async fn oldest(&self, limit: usize) -> Result<Vec<QueueRow>>;

	async fn apply(&self, updates: &[RowUpdate]) -> Result<()>;

	async fn len(&self) -> Result<usize>;

	async fn is_empty(&self) -> Result<bool> {
		Ok(self.len().await? == 0)
	}
}
