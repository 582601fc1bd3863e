// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the telemetry agent.
//!
//! Only [`AgentError`] and [`ConfigError`] reach callers. [`SourceError`],
//! [`FormatError`] and [`DeliveryError`] are converted into log events and a
//! local recovery step by the component that observes them.

use std::path::PathBuf;
use std::time::Duration;

use beacon_common_http::RetryableError;
use beacon_trace_core::TraceCoreError;
use thiserror::Error;

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("TOML parse error in {path}: {source}")]
	TomlParse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	#[error("TOML parse error: {0}")]
	Toml(#[from] toml::de::Error),

	#[error("Missing required field: {0}")]
	MissingField(String),

	#[error("Invalid value for {field}: {message}")]
	InvalidValue { field: String, message: String },
}

impl ConfigError {
	pub fn missing_field(field: impl Into<String>) -> Self {
		Self::MissingField(field.into())
	}

	pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
		Self::InvalidValue {
			field: field.into(),
			message: message.into(),
		}
	}
}

/// A source failed to produce an observation for one cycle.
#[derive(Debug, Error)]
pub enum SourceError {
	#[error("source unavailable: {0}")]
	Unavailable(String),

	#[error("listener already started")]
	AlreadyStarted,
}

/// A normalizer could not interpret an observation.
#[derive(Debug, Error)]
pub enum FormatError {
	#[error("unexpected content for {source_type}: {message}")]
	UnexpectedContent {
		source_type: String,
		message: String,
	},

	#[error("invalid timestamp: {0} ms")]
	InvalidTimestamp(i64),
}

/// A delivery attempt failed.
#[derive(Debug, Error)]
pub enum DeliveryError {
	#[error("HTTP request failed: {0}")]
	Http(#[from] reqwest::Error),

	#[error("server returned {status}: {message}")]
	Status { status: u16, message: String },

	#[error("delivery timed out after {0:?}")]
	Timeout(Duration),

	#[error("transport error: {0}")]
	Transport(String),
}

impl RetryableError for DeliveryError {
	fn is_retryable(&self) -> bool {
		match self {
			DeliveryError::Http(e) => e.is_retryable(),
			DeliveryError::Status { status, .. } => *status == 408 || *status == 429 || *status >= 500,
			DeliveryError::Timeout(_) => true,
			DeliveryError::Transport(_) => false,
		}
	}
}

/// Errors surfaced by the agent API.
#[derive(Debug, Error)]
pub enum AgentError {
	#[error(transparent)]
	Config(#[from] ConfigError),

	#[error(transparent)]
	Core(#[from] TraceCoreError),

	#[error(transparent)]
	Delivery(#[from] DeliveryError),

	#[error("queue intake is closed")]
	IntakeClosed,

	#[error("crash was not persisted within {0:?}")]
	PersistTimeout(Duration),
}

/// Result type for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn status_errors_follow_retryable_statuses() {
		let retryable = |status| DeliveryError::Status {
			status,
			message: String::new(),
		};
		assert!(retryable(503).is_retryable());
		assert!(retryable(429).is_retryable());
		assert!(!retryable(400).is_retryable());
		assert!(!retryable(401).is_retryable());
		assert!(DeliveryError::Timeout(Duration::from_secs(1)).is_retryable());
		assert!(!DeliveryError::Transport("closed".into()).is_retryable());
	}

	#[test]
	fn config_error_helpers_render_field() {
		let err = ConfigError::invalid_value("flush_interval_ms", "must be greater than zero");
		assert_eq!(
			err.to_string(),
			"Invalid value for flush_interval_ms: must be greater than zero"
		);
		assert_eq!(
			ConfigError::missing_field("endpoint").to_string(),
			"Missing required field: endpoint"
		);
	}
}
