// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Screen lifecycle observations.
//!
//! An [`ActivityView`] records when each lifecycle state of one screen was
//! reached. A [`FragmentView`] records every state transition of an embedded
//! view, which may be shown and hidden many times while its screen is alive.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
	Created,
	Started,
	Resumed,
	Paused,
	Stopped,
	Restarted,
}

/// Lifecycle of one screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityView {
	pub name: Option<String>,
	pub span_id: String,
	/// Unix timestamp in milliseconds of each state reached.
	pub states: BTreeMap<ActivityState, i64>,
}

impl ActivityView {
	pub fn new(span_id: impl Into<String>) -> Self {
		Self {
			name: None,
			span_id: span_id.into(),
			states: BTreeMap::new(),
		}
	}

	pub fn with_name(mut self, name: impl Into<String>) -> Self {
		self.name = Some(name.into());
		self
	}

	pub fn with_state(mut self, state: ActivityState, at_ms: i64) -> Self {
		self.states.insert(state, at_ms);
		self
	}

	/// A restarted screen is started without being created again.
	pub fn start_ms(&self) -> Option<i64> {
		self
			.states
			.get(&ActivityState::Created)
			.or_else(|| self.states.get(&ActivityState::Started))
			.copied()
	}

	/// A screen killed in the background is paused but never stopped.
	pub fn end_ms(&self) -> Option<i64> {
		self
			.states
			.get(&ActivityState::Stopped)
			.or_else(|| self.states.get(&ActivityState::Paused))
			.copied()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentState {
	Attached,
	Created,
	ViewCreated,
	ActivityCreated,
	Started,
	Resumed,
	Paused,
	Stopped,
	ViewDestroyed,
	Destroyed,
	Detached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentStateEntry {
	pub state: FragmentState,
	/// Unix timestamp in milliseconds.
	pub at_ms: i64,
}

/// State transitions of one embedded view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentView {
	pub name: Option<String>,
	pub span_id: String,
	/// Span of the screen hosting this view.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub parent_span_id: Option<String>,
	pub states: Vec<FragmentStateEntry>,
}

impl FragmentView {
	pub fn new(span_id: impl Into<String>) -> Self {
		Self {
			name: None,
			span_id: span_id.into(),
			parent_span_id: None,
			states: Vec::new(),
		}
	}

	pub fn with_name(mut self, name: impl Into<String>) -> Self {
		self.name = Some(name.into());
		self
	}

	pub fn with_parent(mut self, parent_span_id: impl Into<String>) -> Self {
		self.parent_span_id = Some(parent_span_id.into());
		self
	}

	pub fn with_state(mut self, state: FragmentState, at_ms: i64) -> Self {
		self.states.push(FragmentStateEntry { state, at_ms });
		self
	}

	/// Timestamps of every entry in `state`, oldest first.
	pub fn times_of(&self, state: FragmentState) -> Vec<i64> {
		let mut times: Vec<i64> = self
			.states
			.iter()
			.filter(|entry| entry.state == state)
			.map(|entry| entry.at_ms)
			.collect();
		times.sort_unstable();
		times
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn activity_start_prefers_created_over_started() {
		let view = ActivityView::new("a1")
			.with_state(ActivityState::Started, 20)
			.with_state(ActivityState::Created, 10);
		assert_eq!(view.start_ms(), Some(10));

		let restarted = ActivityView::new("a2").with_state(ActivityState::Started, 20);
		assert_eq!(restarted.start_ms(), Some(20));
	}

	#[test]
	fn activity_end_falls_back_to_paused() {
		let view = ActivityView::new("a1").with_state(ActivityState::Paused, 30);
		assert_eq!(view.end_ms(), Some(30));

		let stopped = view.with_state(ActivityState::Stopped, 40);
		assert_eq!(stopped.end_ms(), Some(40));
		assert_eq!(ActivityView::new("a3").end_ms(), None);
	}

	#[test]
	fn fragment_times_are_sorted() {
		let view = FragmentView::new("f1")
			.with_state(FragmentState::Paused, 50)
			.with_state(FragmentState::ViewCreated, 5)
			.with_state(FragmentState::Paused, 20);
		assert_eq!(view.times_of(FragmentState::Paused), vec![20, 50]);
		assert_eq!(view.times_of(FragmentState::ViewCreated), vec![5]);
		assert!(view.times_of(FragmentState::Detached).is_empty());
	}

	#[test]
	fn activity_states_serialize_as_map() {
		let view = ActivityView::new("a1")
			.with_name("MainActivity")
			.with_state(ActivityState::Created, 1);
		let json = serde_json::to_string(&view).unwrap();
		assert_eq!(
			json,
			r#"{"name":"MainActivity","span_id":"a1","states":{"created":1}}"#
		);
	}
}
