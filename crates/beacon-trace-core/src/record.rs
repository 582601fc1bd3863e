// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Normalized wire records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Resource label names attached to every delivered request.
pub mod labels {
	pub const APP_BUILD: &str = "app.build";
	pub const APP_VERSION: &str = "app.version";
	pub const APP_PLATFORM: &str = "app.platform";
	pub const APP_SESSION_ID: &str = "app.session.id";
	pub const DEVICE_CARRIER: &str = "device.carrier";
	pub const DEVICE_ID: &str = "device.id";
	pub const DEVICE_LOCALE: &str = "device.locale";
	pub const DEVICE_NETWORK: &str = "device.network";
	pub const DEVICE_ROOTED: &str = "device.rooted";
	pub const DEVICE_TYPE: &str = "device.type";
	pub const OS_VERSION: &str = "os.version";

	pub const HTTP_METHOD: &str = "http.method";
	pub const HTTP_URL: &str = "http.url";
	pub const HTTP_STATUS_CODE: &str = "http.status_code";
	pub const HTTP_REQUEST_SIZE: &str = "http.request_size";
	pub const HTTP_RESPONSE_SIZE: &str = "http.response_size";
}

/// Kind of span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
	#[default]
	Internal,
	Client,
	Server,
}

/// A timed operation within a trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
	/// Empty until the span is added to an active trace.
	pub trace_id: String,
	pub span_id: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub parent_span_id: Option<String>,
	pub name: String,
	#[serde(default)]
	pub kind: SpanKind,
	pub start_time: DateTime<Utc>,
	pub end_time: DateTime<Utc>,
	#[serde(default)]
	pub attributes: BTreeMap<String, String>,
}

/// A static property of the device or application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceAttribute {
	pub label: String,
	pub value: String,
}

impl ResourceAttribute {
	pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
		Self {
			label: label.into(),
			value: value.into(),
		}
	}
}

/// A record ready for transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireRecord {
	Span(Span),
	ResourceAttribute(ResourceAttribute),
}

impl WireRecord {
	pub fn as_span(&self) -> Option<&Span> {
		match self {
			WireRecord::Span(span) => Some(span),
			WireRecord::ResourceAttribute(_) => None,
		}
	}

	pub fn as_resource(&self) -> Option<&ResourceAttribute> {
		match self {
			WireRecord::ResourceAttribute(attribute) => Some(attribute),
			WireRecord::Span(_) => None,
		}
	}
}
