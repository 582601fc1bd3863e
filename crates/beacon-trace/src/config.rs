// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Agent configuration.
//!
//! Loaded from TOML. Every key except `endpoint` has a default:
//!
//! ```toml
//! debug_mode = true
//! platform = "android"
//! flush_interval_ms = 10000
//!
//! [endpoint]
//! base_url = "https://collector.example.com"
//!
//! [collector_interval_overrides]
//! "device.network_type" = 30000
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use beacon_trace_core::SourceType;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// Environment variable that overrides `endpoint.token`.
pub const TOKEN_ENV: &str = "BEACON_TOKEN";

const DEFAULT_PLATFORM: &str = "android";
const DEFAULT_FLUSH_INTERVAL_MS: u64 = 10_000;
const DEFAULT_MAX_BATCH_ITEMS: usize = 20;
const DEFAULT_MAX_SEND_ATTEMPTS: u32 = 5;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Backend the agent delivers to.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
	pub base_url: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub token: Option<String>,
}

impl EndpointConfig {
	pub fn new(base_url: impl Into<String>) -> Self {
		Self {
			base_url: base_url.into(),
			token: None,
		}
	}

	pub fn with_token(mut self, token: impl Into<String>) -> Self {
		self.token = Some(token.into());
		self
	}
}

impl fmt::Debug for EndpointConfig {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("EndpointConfig")
			.field("base_url", &self.base_url)
			.field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
			.finish()
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
	/// Turns on debug logging for the agent's own targets.
	#[serde(default)]
	pub debug_mode: bool,
	/// Poll interval per source tag, in milliseconds. Zero collects once.
	#[serde(default)]
	pub collector_interval_overrides: BTreeMap<String, u64>,
	pub endpoint: EndpointConfig,
	/// Value of the `app.platform` resource label.
	#[serde(default = "default_platform")]
	pub platform: String,
	#[serde(default = "default_flush_interval_ms")]
	pub flush_interval_ms: u64,
	/// Upper bound on queue rows carried by one flush.
	#[serde(default = "default_max_batch_items")]
	pub max_batch_items: usize,
	/// Failed attempts a row may accumulate before it is abandoned.
	#[serde(default = "default_max_send_attempts")]
	pub max_send_attempts: u32,
	#[serde(default = "default_request_timeout_ms")]
	pub request_timeout_ms: u64,
	/// Bridge Rust panics into the fault handler chain on start.
	#[serde(default = "default_capture_panics")]
	pub capture_panics: bool,
}

fn default_platform() -> String {
	DEFAULT_PLATFORM.to_string()
}

fn default_flush_interval_ms() -> u64 {
	DEFAULT_FLUSH_INTERVAL_MS
}

fn default_max_batch_items() -> usize {
	DEFAULT_MAX_BATCH_ITEMS
}

fn default_max_send_attempts() -> u32 {
	DEFAULT_MAX_SEND_ATTEMPTS
}

fn default_request_timeout_ms() -> u64 {
	DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_capture_panics() -> bool {
	true
}

impl AgentConfig {
	/// Configuration with defaults for everything but the endpoint.
	pub fn new(endpoint: EndpointConfig) -> Self {
		Self {
			debug_mode: false,
			collector_interval_overrides: BTreeMap::new(),
			endpoint,
			platform: default_platform(),
			flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
			max_batch_items: DEFAULT_MAX_BATCH_ITEMS,
			max_send_attempts: DEFAULT_MAX_SEND_ATTEMPTS,
			request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
			capture_panics: true,
		}
	}

	/// Parses and validates a TOML document. Environment overrides are not
	/// applied.
	pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
		let config: AgentConfig = toml::from_str(contents)?;
		config.validate()?;
		Ok(config)
	}

	/// Reads a TOML file, applies environment overrides and validates.
	pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let contents = std::fs::read_to_string(path)?;
		let mut config: AgentConfig =
			toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
				path: path.to_path_buf(),
				source,
			})?;
		config.apply_env_overrides(|key| std::env::var(key).ok());
		config.validate()?;

		debug!(path = %path.display(), "loaded agent configuration");
		Ok(config)
	}

	/// Applies overrides from `lookup`, normally backed by the process
	/// environment.
	pub fn apply_env_overrides<F>(&mut self, lookup: F)
	where
		F: Fn(&str) -> Option<String>,
	{
		if let Some(token) = lookup(TOKEN_ENV).filter(|t| !t.is_empty()) {
			self.endpoint.token = Some(token);
		}
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		let base_url = self.endpoint.base_url.trim();
		if base_url.is_empty() {
			return Err(ConfigError::missing_field("endpoint.base_url"));
		}
		if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
			return Err(ConfigError::invalid_value(
				"endpoint.base_url",
				"must start with http:// or https://",
			));
		}
		if self.platform.trim().is_empty() {
			return Err(ConfigError::invalid_value("platform", "must not be empty"));
		}
		if self.flush_interval_ms == 0 {
			return Err(ConfigError::invalid_value(
				"flush_interval_ms",
				"must be greater than zero",
			));
		}
		if self.max_batch_items == 0 {
			return Err(ConfigError::invalid_value(
				"max_batch_items",
				"must be greater than zero",
			));
		}
		if self.request_timeout_ms == 0 {
			return Err(ConfigError::invalid_value(
				"request_timeout_ms",
				"must be greater than zero",
			));
		}
		Ok(())
	}

	pub fn flush_interval(&self) -> Duration {
		Duration::from_millis(self.flush_interval_ms)
	}

	pub fn request_timeout(&self) -> Duration {
		Duration::from_millis(self.request_timeout_ms)
	}

	/// Configured poll interval for `source`, if overridden.
	pub fn interval_override(&self, source: &SourceType) -> Option<Duration> {
		self
			.collector_interval_overrides
			.get(source.as_str())
			.map(|ms| Duration::from_millis(*ms))
	}
}
