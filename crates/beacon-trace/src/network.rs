// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Push source for completed HTTP calls.

use std::sync::{Arc, PoisonError, RwLock};

use beacon_trace_core::{Content, NetworkCall, Observation, SourceType};
use tracing::trace;

use crate::error::SourceError;
use crate::source::{Listener, ObservationSink};

/// Listener fed by HTTP client interceptors through [`NetworkListener::record`].
///
/// Calls recorded while the listener is stopped are dropped.
#[derive(Default)]
pub struct NetworkListener {
	sink: RwLock<Option<Arc<dyn ObservationSink>>>,
}

impl NetworkListener {
	pub fn new() -> Self {
		Self::default()
	}

	/// Forwards a completed call. Returns false when the listener is not
	/// started.
	pub fn record(&self, call: NetworkCall) -> bool {
		let sink = self.sink.read().unwrap_or_else(PoisonError::into_inner).clone();
		let Some(sink) = sink else {
			trace!(url = %call.url, "network listener stopped; call dropped");
			return false;
		};

		sink.on_observation(Observation::new(
			SourceType::NetworkCall,
			Some(Content::Network(call)),
		));
		true
	}

	pub fn is_started(&self) -> bool {
		self.sink.read().unwrap_or_else(PoisonError::into_inner).is_some()
	}
}

impl Listener for NetworkListener {
	fn source_type(&self) -> SourceType {
		SourceType::NetworkCall
	}

	fn start(&self, sink: Arc<dyn ObservationSink>) -> Result<(), SourceError> {
		let mut current = self.sink.write().unwrap_or_else(PoisonError::into_inner);
		if current.is_some() {
			return Err(SourceError::AlreadyStarted);
		}
		*current = Some(sink);
		Ok(())
	}

	fn stop(&self) {
		self.sink.write().unwrap_or_else(PoisonError::into_inner).take();
	}
}
