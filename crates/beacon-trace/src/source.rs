// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Observation sources.
//!
//! A source is either polled ([`Collector`]) on a fixed cadence by the
//! registry, or event-driven ([`Listener`]) and pushes observations into an
//! [`ObservationSink`] whenever its underlying event fires.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beacon_trace_core::{Content, CrashReport, Observation, SourceType};

use crate::error::SourceError;

/// Receiver of observations. Implementations must be callable from any
/// thread and must not block.
pub trait ObservationSink: Send + Sync {
	fn on_observation(&self, observation: Observation);

	/// Records a crash and waits up to `timeout` for it to be persisted.
	/// Returns true once the crash is durable.
	fn persist_crash(&self, report: CrashReport, timeout: Duration) -> bool {
		let _ = timeout;
		self.on_observation(Observation::new(
			SourceType::Crash,
			Some(Content::Crash(report)),
		));
		false
	}
}

/// A polled source.
#[async_trait]
pub trait Collector: Send + Sync {
	fn source_type(&self) -> SourceType;

	async fn collect(&self) -> Result<Observation, SourceError>;

	/// Zero means collect once per session.
	fn poll_interval(&self) -> Duration {
		Duration::ZERO
	}

	fn required_permissions(&self) -> Vec<String> {
		Vec::new()
	}
}

/// An event-driven source.
pub trait Listener: Send + Sync {
	fn source_type(&self) -> SourceType;

	fn start(&self, sink: Arc<dyn ObservationSink>) -> Result<(), SourceError>;

	fn stop(&self);

	fn required_permissions(&self) -> Vec<String> {
		Vec::new()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
	Polled,
	EventDriven,
}

#[derive(Clone)]
pub enum Source {
	Polled(Arc<dyn Collector>),
	EventDriven(Arc<dyn Listener>),
}

impl Source {
	pub fn polled(collector: impl Collector + 'static) -> Self {
		Source::Polled(Arc::new(collector))
	}

	pub fn event_driven(listener: impl Listener + 'static) -> Self {
		Source::EventDriven(Arc::new(listener))
	}

	pub fn kind(&self) -> SourceKind {
		match self {
			Source::Polled(_) => SourceKind::Polled,
			Source::EventDriven(_) => SourceKind::EventDriven,
		}
	}

	pub fn source_type(&self) -> SourceType {
		match self {
			Source::Polled(collector) => collector.source_type(),
			Source::EventDriven(listener) => listener.source_type(),
		}
	}

	pub fn required_permissions(&self) -> Vec<String> {
		match self {
			Source::Polled(collector) => collector.required_permissions(),
			Source::EventDriven(listener) => listener.required_permissions(),
		}
	}

	/// Two sources with the same identity are never both registered.
	pub fn identity(&self) -> (SourceKind, SourceType) {
		(self.kind(), self.source_type())
	}
}

impl std::fmt::Debug for Source {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Source")
			.field("kind", &self.kind())
			.field("source_type", &self.source_type())
			.finish()
	}
}

/// Decides whether a platform permission is granted.
pub trait PermissionChecker: Send + Sync {
	fn is_granted(&self, permission: &str) -> bool;
}

/// Grants every permission.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PermissionChecker for AllowAll {
	fn is_granted(&self, _permission: &str) -> bool {
		true
	}
}

/// Collector that reports a value known up front, such as the application
/// version.
#[derive(Debug, Clone)]
pub struct StaticCollector {
	source_type: SourceType,
	content: Option<Content>,
	interval: Duration,
}

impl StaticCollector {
	pub fn new(source_type: SourceType, content: Option<Content>) -> Self {
		Self {
			source_type,
			content,
			interval: Duration::ZERO,
		}
	}

	pub fn text(source_type: SourceType, value: impl Into<String>) -> Self {
		Self::new(source_type, Some(Content::Text(value.into())))
	}

	pub fn with_interval(mut self, interval: Duration) -> Self {
		self.interval = interval;
		self
	}
}

#[async_trait]
impl Collector for StaticCollector {
	fn source_type(&self) -> SourceType {
		self.source_type.clone()
	}

	async fn collect(&self) -> Result<Observation, SourceError> {
		Ok(Observation::new(self.source_type.clone(), self.content.clone()))
	}

	fn poll_interval(&self) -> Duration {
		self.interval
	}
}
