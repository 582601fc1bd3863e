// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Session authority.
//!
//! Owns the identifier that correlates every record produced while the
//! agent runs. All operations share one critical section, so an id read
//! through [`SessionAuthority::with_active`] stays current until the
//! closure returns.

use std::sync::{Mutex, MutexGuard, PoisonError};

use beacon_trace_core::SessionId;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct SessionAuthority {
	current: Mutex<Option<SessionId>>,
}

impl SessionAuthority {
	pub fn new() -> Self {
		Self::default()
	}

	fn lock(&self) -> MutexGuard<'_, Option<SessionId>> {
		self.current.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Starts a session, or returns the active one unchanged.
	pub fn start(&self) -> SessionId {
		let mut current = self.lock();
		if let Some(id) = current.as_ref() {
			debug!(session_id = %id, "session already active");
			return id.clone();
		}

		let id = SessionId::generate();
		info!(session_id = %id, "session started");
		*current = Some(id.clone());
		id
	}

	/// Discards the active session. Returns false when none was active.
	pub fn stop(&self) -> bool {
		match self.lock().take() {
			Some(id) => {
				info!(session_id = %id, "session stopped");
				true
			}
			None => false,
		}
	}

	pub fn active(&self) -> Option<SessionId> {
		self.lock().clone()
	}

	/// Runs `f` while holding the session lock.
	pub fn with_active<R>(&self, f: impl FnOnce(Option<&SessionId>) -> R) -> R {
		let current = self.lock();
		f(current.as_ref())
	}

	/// Drops any session state without logging a lifecycle event.
	pub fn reset(&self) {
		*self.lock() = None;
	}
}
