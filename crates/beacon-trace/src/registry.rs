// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Registry of observation sources and their cadence.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use beacon_trace_core::SourceType;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::source::{Collector, Listener, ObservationSink, PermissionChecker, Source};

#[derive(Default)]
struct RunState {
	sink: Option<Arc<dyn ObservationSink>>,
	tasks: Vec<JoinHandle<()>>,
	listeners: Vec<Arc<dyn Listener>>,
	active: Vec<SourceType>,
}

/// Holds the registered sources and drives them while a session runs.
///
/// Polled sources each get one Tokio task. The first collection happens
/// immediately, then at a fixed rate; an interval of zero collects once.
pub struct CollectorRegistry {
	sources: Mutex<Vec<Source>>,
	permissions: Arc<dyn PermissionChecker>,
	interval_overrides: HashMap<SourceType, Duration>,
	state: Mutex<RunState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CollectorRegistry {
	pub fn new(
		permissions: Arc<dyn PermissionChecker>,
		interval_overrides: HashMap<SourceType, Duration>,
	) -> Self {
		Self {
			sources: Mutex::new(Vec::new()),
			permissions,
			interval_overrides,
			state: Mutex::new(RunState::default()),
		}
	}

	/// Adds a source. Returns false when a source with the same identity is
	/// already registered. A source registered while running starts at once.
	pub fn register(&self, source: Source) -> bool {
		{
			let mut sources = lock(&self.sources);
			if sources.iter().any(|s| s.identity() == source.identity()) {
				debug!(source_type = %source.source_type(), kind = ?source.kind(), "duplicate source ignored");
				return false;
			}
			sources.push(source.clone());
		}

		let mut state = lock(&self.state);
		if let Some(sink) = state.sink.clone() {
			self.start_source(&mut state, &source, sink);
		}
		true
	}

	pub fn len(&self) -> usize {
		lock(&self.sources).len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn is_running(&self) -> bool {
		lock(&self.state).sink.is_some()
	}

	/// Source types started by the last `start`.
	pub fn active_sources(&self) -> Vec<SourceType> {
		lock(&self.state).active.clone()
	}

	/// Starts every permitted source. Must be called from within a Tokio
	/// runtime. Calling it while running is a no-op.
	#[instrument(skip(self, sink))]
	pub fn start(&self, sink: Arc<dyn ObservationSink>) {
		let mut state = lock(&self.state);
		if state.sink.is_some() {
			debug!("collector registry already running");
			return;
		}
		state.sink = Some(Arc::clone(&sink));

		let sources = lock(&self.sources).clone();
		for source in &sources {
			self.start_source(&mut state, source, Arc::clone(&sink));
		}

		info!(
			active = state.active.len(),
			registered = sources.len(),
			"collector registry started"
		);
	}

	/// Stops listeners and cancels polling tasks.
	#[instrument(skip(self))]
	pub fn stop(&self) {
		let mut state = lock(&self.state);
		if state.sink.take().is_none() {
			return;
		}

		for listener in state.listeners.drain(..) {
			listener.stop();
		}
		for task in state.tasks.drain(..) {
			task.abort();
		}
		state.active.clear();

		info!("collector registry stopped");
	}

	fn start_source(&self, state: &mut RunState, source: &Source, sink: Arc<dyn ObservationSink>) {
		let source_type = source.source_type();

		if let Some(missing) = source
			.required_permissions()
			.into_iter()
			.find(|p| !self.permissions.is_granted(p))
		{
			info!(source_type = %source_type, permission = %missing, "permission not granted; source skipped");
			return;
		}

		match source {
			Source::Polled(collector) => {
				let interval = self
					.interval_overrides
					.get(&source_type)
					.copied()
					.unwrap_or_else(|| collector.poll_interval());
				let collector = Arc::clone(collector);
				state.tasks.push(tokio::spawn(poll(collector, sink, interval)));
			}
			Source::EventDriven(listener) => {
				if let Err(e) = listener.start(sink) {
					warn!(source_type = %source_type, error = %e, "listener failed to start");
					return;
				}
				state.listeners.push(Arc::clone(listener));
			}
		}

		debug!(source_type = %source_type, "source started");
		state.active.push(source_type);
	}
}

async fn poll(collector: Arc<dyn Collector>, sink: Arc<dyn ObservationSink>, interval: Duration) {
	if interval.is_zero() {
		collect_once(collector.as_ref(), sink.as_ref()).await;
		return;
	}

	let mut ticker = tokio::time::interval(interval);
	ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
	loop {
		ticker.tick().await;
		collect_once(collector.as_ref(), sink.as_ref()).await;
	}
}

async fn collect_once(collector: &dyn Collector, sink: &dyn ObservationSink) {
	match collector.collect().await {
		Ok(observation) => sink.on_observation(observation),
		Err(e) => {
			warn!(source_type = %collector.source_type(), error = %e, "collection failed; skipping cycle");
		}
	}
}
