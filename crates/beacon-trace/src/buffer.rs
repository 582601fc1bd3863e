// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory holder of the current resource labels and the active trace.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use beacon_trace_core::{
	labels, make_trace_id, Resource, ResourceAttribute, SessionId, Span, TraceEnvelope, WireRecord,
};
use tracing::debug;

struct ActiveTrace {
	trace_id: String,
	spans: Vec<Span>,
}

impl ActiveTrace {
	fn new() -> Self {
		Self {
			trace_id: make_trace_id(),
			spans: Vec::new(),
		}
	}
}

struct BufferState {
	labels: BTreeMap<String, String>,
	trace: ActiveTrace,
}

/// Normalized records waiting to be sealed into the send queue.
///
/// Resource labels persist until [`RecordBuffer::clear`]; spans belong to the
/// active trace until [`RecordBuffer::seal`] takes them.
pub struct RecordBuffer {
	platform: String,
	state: Mutex<BufferState>,
}

impl RecordBuffer {
	pub fn new(platform: impl Into<String>) -> Self {
		Self {
			platform: platform.into(),
			state: Mutex::new(BufferState {
				labels: BTreeMap::new(),
				trace: ActiveTrace::new(),
			}),
		}
	}

	fn lock(&self) -> MutexGuard<'_, BufferState> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	pub fn add(&self, record: WireRecord) {
		match record {
			WireRecord::Span(span) => self.add_span(span),
			WireRecord::ResourceAttribute(attribute) => self.set_resource(attribute),
		}
	}

	/// Adds a span to the active trace, stamping it with the trace id.
	pub fn add_span(&self, mut span: Span) {
		let mut state = self.lock();
		span.trace_id = state.trace.trace_id.clone();
		state.trace.spans.push(span);
	}

	pub fn set_resource(&self, attribute: ResourceAttribute) {
		self.lock().labels.insert(attribute.label, attribute.value);
	}

	pub fn current_trace_id(&self) -> String {
		self.lock().trace.trace_id.clone()
	}

	pub fn last_span_id(&self) -> Option<String> {
		self.lock().trace.spans.last().map(|s| s.span_id.clone())
	}

	pub fn pending_spans(&self) -> usize {
		self.lock().trace.spans.len()
	}

	/// Resource labels plus the platform and, when given, the session id.
	pub fn resource(&self, session: Option<&SessionId>) -> Resource {
		let labels = self.lock().labels.clone();
		self.resource_from(labels, session)
	}

	fn resource_from(&self, mut resource_labels: BTreeMap<String, String>, session: Option<&SessionId>) -> Resource {
		resource_labels.insert(labels::APP_PLATFORM.to_string(), self.platform.clone());
		if let Some(session) = session {
			resource_labels.insert(labels::APP_SESSION_ID.to_string(), session.to_string());
		}
		Resource::mobile(resource_labels)
	}

	/// Takes the spans of the active trace and starts a fresh one. Returns
	/// `None` when the active trace has no spans.
	pub fn seal(&self, session: Option<&SessionId>) -> Option<TraceEnvelope> {
		let (labels, trace) = {
			let mut state = self.lock();
			if state.trace.spans.is_empty() {
				return None;
			}
			let trace = std::mem::replace(&mut state.trace, ActiveTrace::new());
			(state.labels.clone(), trace)
		};

		debug!(trace_id = %trace.trace_id, spans = trace.spans.len(), "sealed trace");
		Some(TraceEnvelope {
			resource: self.resource_from(labels, session),
			spans: trace.spans,
		})
	}

	/// Drops resource labels and pending spans.
	pub fn clear(&self) {
		let mut state = self.lock();
		state.labels.clear();
		state.trace = ActiveTrace::new();
	}
}
