// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Routes observations to normalizers, the record buffer and the send queue.

use std::sync::Arc;
use std::time::Duration;

use beacon_trace_core::{Content, CrashEnvelope, CrashReport, Observation, QueueRow, SourceType};
use tracing::{debug, error, info, warn};

use crate::buffer::RecordBuffer;
use crate::error::Result;
use crate::formatter::NormalizerRegistry;
use crate::queue::{DeliveryPayload, QueueIntake};
use crate::session::SessionAuthority;
use crate::source::ObservationSink;

/// Entry point for every observation.
///
/// `on_observation` never blocks on I/O: crash envelopes go through the
/// queue intake and everything else lands in the in-memory buffer.
pub struct DataCoordinator {
	normalizers: Arc<NormalizerRegistry>,
	buffer: Arc<RecordBuffer>,
	session: Arc<SessionAuthority>,
	intake: QueueIntake,
}

impl DataCoordinator {
	pub fn new(
		normalizers: Arc<NormalizerRegistry>,
		buffer: Arc<RecordBuffer>,
		session: Arc<SessionAuthority>,
		intake: QueueIntake,
	) -> Self {
		Self {
			normalizers,
			buffer,
			session,
			intake,
		}
	}

	/// Wraps a crash report with the current resource labels, session and
	/// trace context.
	pub fn crash_envelope(&self, report: CrashReport) -> CrashEnvelope {
		self.session.with_active(|session| {
			let resource = self.buffer.resource(session);
			let trace_id = self.buffer.current_trace_id();
			let span_id = self.buffer.last_span_id().unwrap_or_default();
			CrashEnvelope::new(report, resource, trace_id, span_id)
		})
	}

	fn crash_row(&self, report: CrashReport) -> Result<QueueRow> {
		let envelope = self.crash_envelope(report);
		Ok(DeliveryPayload::Crash(envelope).into_row()?)
	}

	/// Queues a crash without waiting for it to be stored.
	pub fn record_crash(&self, report: CrashReport) -> Result<()> {
		let row = self.crash_row(report)?;
		let id = row.id.clone();
		self.intake.submit(row)?;
		info!(row_id = %id, "crash queued");
		Ok(())
	}

	/// Queues a crash and blocks the calling thread until it is stored or
	/// `timeout` elapses.
	pub fn record_crash_blocking(&self, report: CrashReport, timeout: Duration) -> Result<()> {
		let row = self.crash_row(report)?;
		let id = row.id.clone();
		self.intake.submit_blocking(row, timeout)?;
		info!(row_id = %id, "crash persisted");
		Ok(())
	}

	fn normalize(&self, observation: &Observation) {
		let Some(records) = self.normalizers.format(observation) else {
			debug!(source_type = %observation.source, "no normalizer registered; observation dropped");
			return;
		};
		for record in records {
			self.buffer.add(record);
		}
	}
}

impl ObservationSink for DataCoordinator {
	fn on_observation(&self, observation: Observation) {
		match observation.content {
			Some(Content::Crash(report)) => {
				if let Err(e) = self.record_crash(report) {
					error!(error = %e, "failed to queue crash");
				}
			}
			_ if observation.source == SourceType::Crash => {
				warn!("crash observation without a crash report dropped");
			}
			_ => self.normalize(&observation),
		}
	}

	fn persist_crash(&self, report: CrashReport, timeout: Duration) -> bool {
		match self.record_crash_blocking(report, timeout) {
			Ok(()) => true,
			Err(e) => {
				error!(error = %e, "crash was not persisted");
				false
			}
		}
	}
}
