// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Identifier generation for sessions, traces, spans and queue rows.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of a span id in hex characters.
pub const SPAN_ID_LENGTH: usize = 16;
/// Length of a trace id in hex characters.
pub const TRACE_ID_LENGTH: usize = 32;

/// Identifier of a session.
///
/// A UUIDv7 in lowercase hyphenated form. The leading 48 bits are the Unix
/// timestamp in milliseconds, so string order equals creation order. The
/// process-wide generator behind [`uuid7::uuid7`] keeps ids strictly
/// increasing within the same millisecond and fills the remaining bits from
/// a cryptographically seeded generator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
	#[must_use]
	pub fn generate() -> Self {
		Self(uuid7::uuid7().to_string())
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for SessionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl std::str::FromStr for SessionId {
	type Err = uuid7::ParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let parsed: uuid7::Uuid = s.parse()?;
		Ok(Self(parsed.to_string()))
	}
}

/// Random 16 hex character span id.
pub fn make_span_id() -> String {
	format!("{:016x}", fastrand::u64(1..))
}

/// Random 32 hex character trace id.
pub fn make_trace_id() -> String {
	format!("{:016x}{:016x}", fastrand::u64(1..), fastrand::u64(..))
}

/// Unique, time-ordered id of a queue row. Crash envelopes carry it as
/// their `uuid`.
pub fn make_row_id() -> String {
	uuid7::uuid7().to_string()
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;
	use std::collections::HashSet;

	#[test]
	fn span_and_trace_ids_have_fixed_lengths() {
		for _ in 0..100 {
			let span = make_span_id();
			let trace = make_trace_id();
			assert_eq!(span.len(), SPAN_ID_LENGTH);
			assert_eq!(trace.len(), TRACE_ID_LENGTH);
			assert!(span.chars().all(|c| c.is_ascii_hexdigit()));
			assert!(trace.chars().all(|c| c.is_ascii_hexdigit()));
		}
	}

	#[test]
	fn session_ids_are_unique_and_sorted_under_threads() {
		let handles: Vec<_> = (0..8)
			.map(|_| {
				std::thread::spawn(|| (0..500).map(|_| SessionId::generate()).collect::<Vec<_>>())
			})
			.collect();

		let mut all = HashSet::new();
		for handle in handles {
			let ids = handle.join().unwrap();
			assert!(ids.windows(2).all(|w| w[0] < w[1]));
			for id in ids {
				assert!(all.insert(id));
			}
		}
		assert_eq!(all.len(), 8 * 500);
	}

	#[test]
	fn session_id_parses_its_own_rendering() {
		let id = SessionId::generate();
		let parsed: SessionId = id.as_str().parse().unwrap();
		assert_eq!(parsed, id);
	}

	#[test]
	fn row_ids_are_unique() {
		let ids: HashSet<String> = (0..1000).map(|_| make_row_id()).collect();
		assert_eq!(ids.len(), 1000);
	}

	proptest! {
		#[test]
		fn session_ids_are_monotonic(count in 1usize..200) {
			let ids: Vec<SessionId> = (0..count).map(|_| SessionId::generate()).collect();
			for pair in ids.windows(2) {
				prop_assert!(pair[0] < pair[1]);
			}
		}
	}
}
