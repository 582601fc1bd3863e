// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use beacon_trace_core::TraceCoreError;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
	#[error("Database error: {0}")]
	Sqlx(#[from] sqlx::Error),

	#[error("Conflict: {0}")]
	Conflict(String),

	#[error("Internal: {0}")]
	Internal(String),

	#[error(transparent)]
	Core(#[from] TraceCoreError),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl From<DbError> for TraceCoreError {
	fn from(err: DbError) -> Self {
		match err {
			DbError::Conflict(id) => TraceCoreError::DuplicateRow(id),
			DbError::Core(inner) => inner,
			other => TraceCoreError::Storage(other.to_string()),
		}
	}
}
