// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the telemetry core.

use thiserror::Error;

/// Errors raised by the core data model and the row-store contract.
#[derive(Debug, Error)]
pub enum TraceCoreError {
	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("invalid payload kind: {0}")]
	InvalidPayloadKind(String),

	#[error("invalid timestamp: {0} ms")]
	InvalidTimestamp(i64),

	#[error("queue row already exists: {0}")]
	DuplicateRow(String),

	#[error("storage error: {0}")]
	Storage(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, TraceCoreError>;
