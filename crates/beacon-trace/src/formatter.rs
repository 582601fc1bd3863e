// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Normalizers turn raw observations into wire records.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use beacon_trace_core::{
	labels, make_span_id, ActivityView, Content, FragmentState, FragmentView, NetworkCall,
	Observation, ResourceAttribute, SourceType, Span, SpanKind, WireRecord,
};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::FormatError;

/// Maps one observation to zero or more wire records.
///
/// Implementations never fail the pipeline: content they cannot interpret
/// yields an empty list.
pub trait Normalizer: Send + Sync {
	fn try_format(&self, observation: &Observation) -> Result<Vec<WireRecord>, FormatError>;

	fn format(&self, observation: &Observation) -> Vec<WireRecord> {
		match self.try_format(observation) {
			Ok(records) => records,
			Err(e) => {
				warn!(source_type = %observation.source, error = %e, "observation could not be normalized");
				Vec::new()
			}
		}
	}
}

/// Emits one resource attribute carrying the observation's value.
#[derive(Debug, Clone)]
pub struct ResourceNormalizer {
	label: String,
}

impl ResourceNormalizer {
	pub fn new(label: impl Into<String>) -> Self {
		Self {
			label: label.into(),
		}
	}

	pub fn label(&self) -> &str {
		&self.label
	}
}

impl Normalizer for ResourceNormalizer {
	fn try_format(&self, observation: &Observation) -> Result<Vec<WireRecord>, FormatError> {
		let value = match &observation.content {
			None => return Ok(Vec::new()),
			Some(Content::Text(text)) => text.clone(),
			Some(Content::Integer(n)) => n.to_string(),
			Some(Content::Boolean(b)) => b.to_string(),
			Some(
				Content::Network(_)
				| Content::Activity(_)
				| Content::Fragments(_)
				| Content::Crash(_),
			) => {
				return Err(FormatError::UnexpectedContent {
					source_type: observation.source.to_string(),
					message: "expected a scalar value".to_string(),
				});
			}
		};

		Ok(vec![WireRecord::ResourceAttribute(ResourceAttribute::new(
			self.label.clone(),
			value,
		))])
	}
}

/// Emits one client span per completed HTTP call.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkSpanNormalizer;

impl NetworkSpanNormalizer {
	fn span_for(call: &NetworkCall) -> Result<Span, FormatError> {
		let start_time = timestamp(call.start_ms)?;
		let end_time = timestamp(call.end_ms)?;
		if end_time < start_time {
			return Err(FormatError::InvalidTimestamp(call.end_ms));
		}

		let mut attributes = BTreeMap::new();
		attributes.insert(labels::HTTP_METHOD.to_string(), call.method.clone());
		attributes.insert(labels::HTTP_URL.to_string(), call.url.clone());
		attributes.insert(
			labels::HTTP_STATUS_CODE.to_string(),
			call.status_code.to_string(),
		);
		if call.request_size > 0 {
			attributes.insert(
				labels::HTTP_REQUEST_SIZE.to_string(),
				call.request_size.to_string(),
			);
		}
		if call.response_size > 0 {
			attributes.insert(
				labels::HTTP_RESPONSE_SIZE.to_string(),
				call.response_size.to_string(),
			);
		}

		Ok(Span {
			trace_id: String::new(),
			span_id: call.span_id.clone().unwrap_or_else(make_span_id),
			parent_span_id: call.parent_span_id.clone(),
			name: call.url.clone(),
			kind: SpanKind::Client,
			start_time,
			end_time,
			attributes,
		})
	}
}

fn timestamp(ms: i64) -> Result<DateTime<Utc>, FormatError> {
	if ms < 0 {
		return Err(FormatError::InvalidTimestamp(ms));
	}
	DateTime::from_timestamp_millis(ms).ok_or(FormatError::InvalidTimestamp(ms))
}

impl Normalizer for NetworkSpanNormalizer {
	fn try_format(&self, observation: &Observation) -> Result<Vec<WireRecord>, FormatError> {
		match &observation.content {
			None => Ok(Vec::new()),
			Some(Content::Network(call)) => Ok(vec![WireRecord::Span(Self::span_for(call)?)]),
			Some(_) => Err(FormatError::UnexpectedContent {
				source_type: observation.source.to_string(),
				message: "expected a network call".to_string(),
			}),
		}
	}
}

fn view_span(
	name: &str,
	start_ms: i64,
	end_ms: i64,
	span_id: String,
	parent_span_id: Option<String>,
) -> Result<Span, FormatError> {
	let start_time = timestamp(start_ms)?;
	let end_time = timestamp(end_ms)?;
	if end_time < start_time {
		return Err(FormatError::InvalidTimestamp(end_ms));
	}

	Ok(Span {
		trace_id: String::new(),
		span_id,
		parent_span_id,
		name: name.to_string(),
		kind: SpanKind::Client,
		start_time,
		end_time,
		attributes: BTreeMap::new(),
	})
}

/// Emits one span covering a screen from creation (or restart) to stop
/// (or pause). Screens without a name or either bound yield nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActivitySpanNormalizer;

impl ActivitySpanNormalizer {
	fn span_for(view: &ActivityView) -> Result<Vec<WireRecord>, FormatError> {
		let (Some(name), Some(start_ms), Some(end_ms)) = (&view.name, view.start_ms(), view.end_ms())
		else {
			debug!(span_id = %view.span_id, "incomplete activity lifecycle skipped");
			return Ok(Vec::new());
		};
		let span = view_span(name, start_ms, end_ms, view.span_id.clone(), None)?;
		Ok(vec![WireRecord::Span(span)])
	}
}

impl Normalizer for ActivitySpanNormalizer {
	fn try_format(&self, observation: &Observation) -> Result<Vec<WireRecord>, FormatError> {
		match &observation.content {
			None => Ok(Vec::new()),
			Some(Content::Activity(view)) => Self::span_for(view),
			Some(_) => Err(FormatError::UnexpectedContent {
				source_type: observation.source.to_string(),
				message: "expected an activity view".to_string(),
			}),
		}
	}
}

/// Emits one span per time an embedded view was shown, from each
/// view-created state to the matching paused state, parented to the
/// hosting screen.
///
/// The first span carries the view's own span id; repeated showings get
/// fresh ids. Paused states at or before the first view-created state are
/// discarded, and surplus states of either kind are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct FragmentSpanNormalizer;

impl FragmentSpanNormalizer {
	fn spans_for(view: &FragmentView) -> Result<Vec<Span>, FormatError> {
		let Some(name) = &view.name else {
			debug!(span_id = %view.span_id, "unnamed fragment skipped");
			return Ok(Vec::new());
		};

		let created = view.times_of(FragmentState::ViewCreated);
		let paused = view.times_of(FragmentState::Paused);
		if created.len() != paused.len() {
			warn!(
				fragment = %name,
				view_created = created.len(),
				paused = paused.len(),
				"fragment lifecycle is incomplete"
			);
		}
		let Some(&first_created) = created.first() else {
			return Ok(Vec::new());
		};

		let Some(first_valid) = paused.iter().position(|&at| at > first_created) else {
			warn!(fragment = %name, "fragment was never paused after its view was created");
			return Ok(Vec::new());
		};

		created
			.iter()
			.zip(&paused[first_valid..])
			.enumerate()
			.map(|(i, (&start_ms, &end_ms))| {
				let span_id = if i == 0 {
					view.span_id.clone()
				} else {
					make_span_id()
				};
				view_span(name, start_ms, end_ms, span_id, view.parent_span_id.clone())
			})
			.collect()
	}
}

impl Normalizer for FragmentSpanNormalizer {
	fn try_format(&self, observation: &Observation) -> Result<Vec<WireRecord>, FormatError> {
		match &observation.content {
			None => Ok(Vec::new()),
			Some(Content::Fragments(views)) => {
				let mut records = Vec::new();
				for view in views {
					records.extend(Self::spans_for(view)?.into_iter().map(WireRecord::Span));
				}
				Ok(records)
			}
			Some(_) => Err(FormatError::UnexpectedContent {
				source_type: observation.source.to_string(),
				message: "expected fragment views".to_string(),
			}),
		}
	}
}

/// Normalizers keyed by source type.
#[derive(Clone, Default)]
pub struct NormalizerRegistry {
	normalizers: HashMap<SourceType, Arc<dyn Normalizer>>,
}

impl NormalizerRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Resource labels for the built-in device and application sources, and
	/// spans for network calls and screen lifecycles.
	pub fn with_defaults() -> Self {
		let mut registry = Self::new();
		let resources = [
			(SourceType::AppVersionName, labels::APP_VERSION),
			(SourceType::AppVersionCode, labels::APP_BUILD),
			(SourceType::DeviceCarrier, labels::DEVICE_CARRIER),
			(SourceType::DeviceId, labels::DEVICE_ID),
			(SourceType::DeviceLocale, labels::DEVICE_LOCALE),
			(SourceType::DeviceModel, labels::DEVICE_TYPE),
			(SourceType::DeviceOs, labels::OS_VERSION),
			(SourceType::DeviceRooted, labels::DEVICE_ROOTED),
			(SourceType::DeviceNetworkType, labels::DEVICE_NETWORK),
		];
		for (source_type, label) in resources {
			registry.register(source_type, Arc::new(ResourceNormalizer::new(label)));
		}
		registry.register(SourceType::NetworkCall, Arc::new(NetworkSpanNormalizer));
		registry.register(SourceType::ViewActivity, Arc::new(ActivitySpanNormalizer));
		registry.register(SourceType::ViewFragment, Arc::new(FragmentSpanNormalizer));
		registry
	}

	/// Adds or replaces the normalizer for `source_type`.
	pub fn register(&mut self, source_type: SourceType, normalizer: Arc<dyn Normalizer>) {
		self.normalizers.insert(source_type, normalizer);
	}

	pub fn get(&self, source_type: &SourceType) -> Option<&Arc<dyn Normalizer>> {
		self.normalizers.get(source_type)
	}

	pub fn len(&self) -> usize {
		self.normalizers.len()
	}

	pub fn is_empty(&self) -> bool {
		self.normalizers.is_empty()
	}

	/// `None` when no normalizer is registered for the observation's source.
	pub fn format(&self, observation: &Observation) -> Option<Vec<WireRecord>> {
		self
			.get(&observation.source)
			.map(|normalizer| normalizer.format(observation))
	}
}
