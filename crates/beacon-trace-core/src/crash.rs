// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Crash and trace envelopes.
//!
//! The JSON produced here is both the delivery payload and the durable
//! storage encoding of a queue row, so field order is fixed by declaration
//! order and every map is a [`BTreeMap`].

use chrono::{Local, SecondsFormat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;
use crate::ids::make_row_id;
use crate::record::Span;

/// Resource type reported for every envelope.
pub const RESOURCE_TYPE_MOBILE: &str = "mobile";

/// Labels describing the device and application that produced an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
	pub labels: BTreeMap<String, String>,
	#[serde(rename = "type")]
	pub resource_type: String,
}

impl Resource {
	pub fn mobile(labels: BTreeMap<String, String>) -> Self {
		Self {
			labels,
			resource_type: RESOURCE_TYPE_MOBILE.to_string(),
		}
	}
}

impl Default for Resource {
	fn default() -> Self {
		Self::mobile(BTreeMap::new())
	}
}

/// A single stack frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashFrame {
	#[serde(rename = "package")]
	pub package: String,
	#[serde(rename = "function")]
	pub function: String,
	#[serde(rename = "filename")]
	pub filename: String,
	/// `-1` when the line is unknown.
	#[serde(rename = "lineno")]
	pub line_number: i32,
	/// Zero-based position of the frame, innermost first.
	#[serde(rename = "sequencenumber")]
	pub sequence_number: u32,
}

/// The captured stack of one thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashThread {
	#[serde(rename = "threadId")]
	pub thread_id: u64,
	/// True for the thread that raised the fault.
	#[serde(rename = "isRequesting")]
	pub is_requesting: bool,
	pub frames: Vec<CrashFrame>,
}

/// A captured fault before it is wrapped for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashReport {
	pub threads: Vec<CrashThread>,
	pub throwable_class_name: String,
	pub description: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub all_exception_names: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrashMetadata {
	pub throwable_class_name: String,
	pub description: String,
	/// RFC 3339 with the local UTC offset.
	pub timestamp: String,
	pub uuid: String,
	pub trace_id: String,
	pub span_id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub all_exception_names: Option<String>,
}

/// Payload of a queued crash row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashEnvelope {
	pub resource: Resource,
	pub crash: Vec<CrashThread>,
	pub metadata: CrashMetadata,
}

impl CrashEnvelope {
	/// Wraps a report with a fresh id and the current local timestamp.
	pub fn new(
		report: CrashReport,
		resource: Resource,
		trace_id: impl Into<String>,
		span_id: impl Into<String>,
	) -> Self {
		let metadata = CrashMetadata {
			throwable_class_name: report.throwable_class_name,
			description: report.description,
			timestamp: Local::now().to_rfc3339_opts(SecondsFormat::Millis, false),
			uuid: make_row_id(),
			trace_id: trace_id.into(),
			span_id: span_id.into(),
			all_exception_names: report.all_exception_names,
		};
		Self {
			resource,
			crash: report.threads,
			metadata,
		}
	}

	/// Queue row id of this envelope.
	pub fn id(&self) -> &str {
		&self.metadata.uuid
	}

	pub fn to_json(&self) -> Result<String> {
		Ok(serde_json::to_string(self)?)
	}

	pub fn from_json(json: &str) -> Result<Self> {
		Ok(serde_json::from_str(json)?)
	}
}

/// Payload of a queued trace row: the spans of one sealed trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEnvelope {
	pub resource: Resource,
	pub spans: Vec<Span>,
}

impl TraceEnvelope {
	pub fn trace_id(&self) -> Option<&str> {
		self.spans.first().map(|span| span.trace_id.as_str())
	}

	pub fn to_json(&self) -> Result<String> {
		Ok(serde_json::to_string(self)?)
	}

	pub fn from_json(json: &str) -> Result<Self> {
		Ok(serde_json::from_str(json)?)
	}
}
