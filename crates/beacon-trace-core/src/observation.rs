// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Raw observations produced by collectors and listeners.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crash::CrashReport;
use crate::view::{ActivityView, FragmentView};

/// Type tag of the source that produced an observation.
///
/// Normalizers are looked up by this tag and collector interval overrides
/// are keyed by its string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum SourceType {
	AppVersionName,
	AppVersionCode,
	DeviceCarrier,
	DeviceId,
	DeviceLocale,
	DeviceModel,
	DeviceOs,
	DeviceRooted,
	DeviceNetworkType,
	NetworkCall,
	ViewActivity,
	ViewFragment,
	Crash,
	Other(String),
}

impl SourceType {
	pub fn as_str(&self) -> &str {
		match self {
			SourceType::AppVersionName => "app.version_name",
			SourceType::AppVersionCode => "app.version_code",
			SourceType::DeviceCarrier => "device.carrier",
			SourceType::DeviceId => "device.id",
			SourceType::DeviceLocale => "device.locale",
			SourceType::DeviceModel => "device.model",
			SourceType::DeviceOs => "device.os",
			SourceType::DeviceRooted => "device.rooted",
			SourceType::DeviceNetworkType => "device.network_type",
			SourceType::NetworkCall => "network.http",
			SourceType::ViewActivity => "view.activity",
			SourceType::ViewFragment => "view.fragment",
			SourceType::Crash => "crash",
			SourceType::Other(tag) => tag,
		}
	}
}

impl From<&str> for SourceType {
	fn from(tag: &str) -> Self {
		match tag {
			"app.version_name" => SourceType::AppVersionName,
			"app.version_code" => SourceType::AppVersionCode,
			"device.carrier" => SourceType::DeviceCarrier,
			"device.id" => SourceType::DeviceId,
			"device.locale" => SourceType::DeviceLocale,
			"device.model" => SourceType::DeviceModel,
			"device.os" => SourceType::DeviceOs,
			"device.rooted" => SourceType::DeviceRooted,
			"device.network_type" => SourceType::DeviceNetworkType,
			"network.http" => SourceType::NetworkCall,
			"view.activity" => SourceType::ViewActivity,
			"view.fragment" => SourceType::ViewFragment,
			"crash" => SourceType::Crash,
			other => SourceType::Other(other.to_string()),
		}
	}
}

impl From<String> for SourceType {
	fn from(tag: String) -> Self {
		SourceType::from(tag.as_str())
	}
}

impl From<SourceType> for String {
	fn from(source: SourceType) -> Self {
		source.as_str().to_string()
	}
}

impl fmt::Display for SourceType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A completed HTTP call observed by a network interceptor.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkCall {
	pub method: String,
	pub url: String,
	pub status_code: u16,
	/// Unix timestamp in milliseconds.
	pub start_ms: i64,
	/// Unix timestamp in milliseconds.
	pub end_ms: i64,
	pub request_size: u64,
	pub response_size: u64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub span_id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub parent_span_id: Option<String>,
}

/// Typed payload of an observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Content {
	Text(String),
	Integer(i64),
	Boolean(bool),
	Network(NetworkCall),
	Activity(ActivityView),
	/// Every embedded view tracked since the last report.
	Fragments(Vec<FragmentView>),
	Crash(CrashReport),
}

/// A single raw data point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
	pub source: SourceType,
	pub content: Option<Content>,
	pub captured_at_ms: i64,
}

impl Observation {
	/// Creates an observation stamped with the current time.
	pub fn new(source: SourceType, content: Option<Content>) -> Self {
		Self {
			source,
			content,
			captured_at_ms: Utc::now().timestamp_millis(),
		}
	}

	/// Creates an observation carrying no value.
	pub fn empty(source: SourceType) -> Self {
		Self::new(source, None)
	}

	pub fn is_crash(&self) -> bool {
		self.source == SourceType::Crash || matches!(self.content, Some(Content::Crash(_)))
	}
}
