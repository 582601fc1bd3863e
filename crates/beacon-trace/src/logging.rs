// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Logging setup for hosts that do not install their own subscriber.

use tracing_subscriber::EnvFilter;

use crate::config::AgentConfig;

/// Environment variable holding an `EnvFilter` directive.
pub const LOG_ENV: &str = "BEACON_LOG";

const AGENT_TARGETS: [&str; 3] = ["beacon_trace", "beacon_trace_db", "beacon_common_http"];

/// Directive used when [`LOG_ENV`] is unset or unparsable.
pub fn default_directive(debug_mode: bool) -> String {
	if debug_mode {
		let mut directive = String::from("info");
		for target in AGENT_TARGETS {
			directive.push(',');
			directive.push_str(target);
			directive.push_str("=debug");
		}
		directive
	} else {
		"info".to_string()
	}
}

pub fn env_filter(config: &AgentConfig) -> EnvFilter {
	EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_directive(config.debug_mode)))
}

/// Installs a global fmt subscriber. Returns false when one is already set.
pub fn init(config: &AgentConfig) -> bool {
	tracing_subscriber::fmt()
		.with_env_filter(env_filter(config))
		.with_target(true)
		.try_init()
		.is_ok()
}
