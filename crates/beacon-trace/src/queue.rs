// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable send queue.
//!
//! Rows move through `Pending(n)` until they are delivered (deleted) or
//! their failed attempts exceed `max_send_attempts` (abandoned, deleted and
//! logged at error level). Reading a batch and acknowledging it happen under
//! one flush lock; insertion never takes that lock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use beacon_trace_core::{
	CrashEnvelope, PayloadKind, QueueRow, QueueStore, RowUpdate, TraceCoreError, TraceEnvelope,
};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{AgentError, Result};

/// Row store kept in process memory, in insertion order.
#[derive(Default)]
pub struct MemoryQueueStore {
	rows: tokio::sync::Mutex<Vec<QueueRow>>,
}

impl MemoryQueueStore {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
	async fn put(&self, row: QueueRow) -> beacon_trace_core::Result<()> {
		let mut rows = self.rows.lock().await;
		if rows.iter().any(|r| r.id == row.id) {
			return Err(TraceCoreError::DuplicateRow(row.id));
		}
		rows.push(row);
		Ok(())
	}

	async fn oldest(&self, limit: usize) -> beacon_trace_core::Result<Vec<QueueRow>> {
		Ok(self.rows.lock().await.iter().take(limit).cloned().collect())
	}

	async fn apply(&self, updates: &[RowUpdate]) -> beacon_trace_core::Result<()> {
		let mut rows = self.rows.lock().await;
		for update in updates {
			match update {
				RowUpdate::SetAttempts { id, attempts } => {
					if let Some(row) = rows.iter_mut().find(|r| &r.id == id) {
						row.sent_attempts = *attempts;
					}
				}
				RowUpdate::Delete { id } => rows.retain(|r| &r.id != id),
			}
		}
		Ok(())
	}

	async fn len(&self) -> beacon_trace_core::Result<usize> {
		Ok(self.rows.lock().await.len())
	}
}

/// Decoded payload of a queue row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryPayload {
	Crash(CrashEnvelope),
	Trace(TraceEnvelope),
}

impl DeliveryPayload {
	pub fn kind(&self) -> PayloadKind {
		match self {
			DeliveryPayload::Crash(_) => PayloadKind::Crash,
			DeliveryPayload::Trace(_) => PayloadKind::Trace,
		}
	}

	/// Encodes the payload into a fresh queue row.
	pub fn into_row(self) -> beacon_trace_core::Result<QueueRow> {
		match self {
			DeliveryPayload::Crash(envelope) => Ok(QueueRow::new(
				envelope.id(),
				PayloadKind::Crash,
				envelope.to_json()?,
			)),
			DeliveryPayload::Trace(envelope) => Ok(QueueRow::new(
				beacon_trace_core::make_row_id(),
				PayloadKind::Trace,
				envelope.to_json()?,
			)),
		}
	}

	fn decode(row: &QueueRow) -> beacon_trace_core::Result<Self> {
		match row.kind {
			PayloadKind::Crash => Ok(DeliveryPayload::Crash(CrashEnvelope::from_json(&row.payload)?)),
			PayloadKind::Trace => Ok(DeliveryPayload::Trace(TraceEnvelope::from_json(&row.payload)?)),
		}
	}
}

/// One row's delivery attempt, built at flush time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRequest {
	pub id: String,
	pub sent_attempts: u32,
	pub payload: DeliveryPayload,
	/// Encoded payload as stored.
	pub body: String,
}

impl DeliveryRequest {
	pub fn kind(&self) -> PayloadKind {
		self.payload.kind()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
	Delivered,
	Failed,
}

/// Result of delivering one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
	pub id: String,
	pub sent_attempts: u32,
	pub status: DeliveryStatus,
}

impl DeliveryOutcome {
	pub fn delivered(request: &DeliveryRequest) -> Self {
		Self {
			id: request.id.clone(),
			sent_attempts: request.sent_attempts,
			status: DeliveryStatus::Delivered,
		}
	}

	pub fn failed(request: &DeliveryRequest) -> Self {
		Self {
			id: request.id.clone(),
			sent_attempts: request.sent_attempts,
			status: DeliveryStatus::Failed,
		}
	}
}

/// Counts produced by acknowledging a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckSummary {
	pub delivered: usize,
	pub failed: usize,
	pub abandoned: usize,
}

enum IntakeCommand {
	Insert {
		row: QueueRow,
		ack: Option<std::sync::mpsc::SyncSender<bool>>,
	},
	Barrier(oneshot::Sender<()>),
}

/// Non-blocking handle for inserting rows from any thread.
#[derive(Clone)]
pub struct QueueIntake {
	tx: mpsc::UnboundedSender<IntakeCommand>,
}

impl QueueIntake {
	/// Hands a row to the writer task without waiting.
	pub fn submit(&self, row: QueueRow) -> Result<()> {
		self
			.tx
			.send(IntakeCommand::Insert { row, ack: None })
			.map_err(|_| AgentError::IntakeClosed)
	}

	/// Hands a row to the writer task and blocks the calling thread until
	/// it is stored or `timeout` elapses. Must not be called from a
	/// current-thread runtime that also runs the writer.
	pub fn submit_blocking(&self, row: QueueRow, timeout: Duration) -> Result<()> {
		let (ack_tx, ack_rx) = std::sync::mpsc::sync_channel(1);
		self
			.tx
			.send(IntakeCommand::Insert {
				row,
				ack: Some(ack_tx),
			})
			.map_err(|_| AgentError::IntakeClosed)?;

		match ack_rx.recv_timeout(timeout) {
			Ok(true) => Ok(()),
			Ok(false) => Err(AgentError::Core(TraceCoreError::Storage(
				"row was rejected by the store".to_string(),
			))),
			Err(_) => Err(AgentError::PersistTimeout(timeout)),
		}
	}
}

struct Writer {
	shutdown: Arc<Notify>,
	handle: JoinHandle<mpsc::UnboundedReceiver<IntakeCommand>>,
}

pub struct SendQueue {
	store: Arc<dyn QueueStore>,
	max_send_attempts: u32,
	flush_lock: tokio::sync::Mutex<()>,
	intake: QueueIntake,
	intake_rx: Mutex<Option<mpsc::UnboundedReceiver<IntakeCommand>>>,
	writer: Mutex<Option<Writer>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SendQueue {
	pub fn new(store: Arc<dyn QueueStore>, max_send_attempts: u32) -> Self {
		let (tx, rx) = mpsc::unbounded_channel();
		Self {
			store,
			max_send_attempts,
			flush_lock: tokio::sync::Mutex::new(()),
			intake: QueueIntake { tx },
			intake_rx: Mutex::new(Some(rx)),
			writer: Mutex::new(None),
		}
	}

	pub fn intake(&self) -> QueueIntake {
		self.intake.clone()
	}

	pub fn max_send_attempts(&self) -> u32 {
		self.max_send_attempts
	}

	/// Stores a row directly.
	#[instrument(skip(self, row), fields(row_id = %row.id, kind = %row.kind))]
	pub async fn insert(&self, row: QueueRow) -> Result<()> {
		self.store.put(row).await?;
		debug!("row enqueued");
		Ok(())
	}

	pub async fn len(&self) -> Result<usize> {
		Ok(self.store.len().await?)
	}

	pub async fn is_empty(&self) -> Result<bool> {
		Ok(self.len().await? == 0)
	}

	pub fn is_writer_running(&self) -> bool {
		lock(&self.writer).is_some()
	}

	/// Waits until rows submitted through the intake so far are stored.
	/// Returns immediately when the writer is not running.
	pub async fn settle(&self) {
		if !self.is_writer_running() {
			return;
		}
		let (tx, rx) = oneshot::channel();
		if self.intake.tx.send(IntakeCommand::Barrier(tx)).is_ok() {
			let _ = rx.await;
		}
	}

	/// Spawns the task that drains the intake into the store. Must be called
	/// from within a Tokio runtime. No-op when already running.
	pub fn start_writer(&self) {
		let mut writer = lock(&self.writer);
		if writer.is_some() {
			return;
		}
		let Some(rx) = lock(&self.intake_rx).take() else {
			return;
		};

		let shutdown = Arc::new(Notify::new());
		let handle = tokio::spawn(run_writer(Arc::clone(&self.store), rx, Arc::clone(&shutdown)));
		*writer = Some(Writer { shutdown, handle });
		debug!("queue writer started");
	}

	/// Stores everything already submitted, then stops the writer task.
	pub async fn stop_writer(&self) {
		let Some(writer) = lock(&self.writer).take() else {
			return;
		};

		writer.shutdown.notify_one();
		match writer.handle.await {
			Ok(rx) => *lock(&self.intake_rx) = Some(rx),
			Err(e) => error!(error = %e, "queue writer task failed"),
		}
		debug!("queue writer stopped");
	}

	/// Takes the flush lock. Batches read through the guard stay claimed
	/// until it is dropped.
	pub async fn begin_flush(&self) -> FlushGuard<'_> {
		FlushGuard {
			queue: self,
			_guard: self.flush_lock.lock().await,
		}
	}

	/// Oldest rows first, decoded. Takes the flush lock for the read only.
	pub async fn next_batch(&self, limit: usize) -> Result<Vec<DeliveryRequest>> {
		self.begin_flush().await.next_batch(limit).await
	}

	/// Applies delivery outcomes. Takes the flush lock for the update only.
	pub async fn acknowledge(&self, outcomes: &[DeliveryOutcome]) -> Result<AckSummary> {
		self.begin_flush().await.acknowledge(outcomes).await
	}
}

/// Exclusive access to the read/mark half of the queue.
pub struct FlushGuard<'a> {
	queue: &'a SendQueue,
	_guard: tokio::sync::MutexGuard<'a, ()>,
}

impl FlushGuard<'_> {
	/// Returns up to `limit` of the oldest rows. Rows whose payload cannot be
	/// decoded are deleted with a warning and do not count toward `limit`.
	pub async fn next_batch(&self, limit: usize) -> Result<Vec<DeliveryRequest>> {
		loop {
			let rows = self.queue.store.oldest(limit).await?;
			let fetched = rows.len();
			let mut batch = Vec::with_capacity(fetched);
			let mut undecodable = Vec::new();

			for row in rows {
				match DeliveryPayload::decode(&row) {
					Ok(payload) => batch.push(DeliveryRequest {
						id: row.id,
						sent_attempts: row.sent_attempts,
						payload,
						body: row.payload,
					}),
					Err(e) => {
						warn!(row_id = %row.id, kind = %row.kind, error = %e, "dropping undecodable queue row");
						undecodable.push(RowUpdate::Delete { id: row.id });
					}
				}
			}

			if undecodable.is_empty() || fetched < limit {
				if !undecodable.is_empty() {
					self.queue.store.apply(&undecodable).await?;
				}
				return Ok(batch);
			}

			self.queue.store.apply(&undecodable).await?;
			if !batch.is_empty() {
				return Ok(batch);
			}
		}
	}

	/// Delivered rows are deleted. Failed rows gain one attempt, or are
	/// abandoned once their attempts exceed the ceiling.
	pub async fn acknowledge(&self, outcomes: &[DeliveryOutcome]) -> Result<AckSummary> {
		let mut summary = AckSummary::default();
		let mut updates = Vec::with_capacity(outcomes.len());

		for outcome in outcomes {
			match outcome.status {
				DeliveryStatus::Delivered => {
					summary.delivered += 1;
					updates.push(RowUpdate::Delete {
						id: outcome.id.clone(),
					});
				}
				DeliveryStatus::Failed => {
					let attempts = outcome.sent_attempts.saturating_add(1);
					if attempts > self.queue.max_send_attempts {
						summary.abandoned += 1;
						error!(
							row_id = %outcome.id,
							attempts,
							max_send_attempts = self.queue.max_send_attempts,
							"delivery abandoned after exceeding attempt ceiling"
						);
						updates.push(RowUpdate::Delete {
							id: outcome.id.clone(),
						});
					} else {
						summary.failed += 1;
						updates.push(RowUpdate::SetAttempts {
							id: outcome.id.clone(),
							attempts,
						});
					}
				}
			}
		}

		self.queue.store.apply(&updates).await?;
		if summary.delivered > 0 || summary.failed > 0 || summary.abandoned > 0 {
			info!(
				delivered = summary.delivered,
				failed = summary.failed,
				abandoned = summary.abandoned,
				"acknowledged delivery batch"
			);
		}
		Ok(summary)
	}
}

async fn store_row(store: &dyn QueueStore, row: QueueRow) -> bool {
	let id = row.id.clone();
	match store.put(row).await {
		Ok(()) => {
			debug!(row_id = %id, "row enqueued");
			true
		}
		Err(TraceCoreError::DuplicateRow(_)) => {
			warn!(row_id = %id, "duplicate queue row ignored");
			true
		}
		Err(e) => {
			error!(row_id = %id, error = %e, "failed to enqueue row");
			false
		}
	}
}

async fn handle_command(store: &dyn QueueStore, command: IntakeCommand) {
	match command {
		IntakeCommand::Insert { row, ack } => {
			let stored = store_row(store, row).await;
			if let Some(ack) = ack {
				let _ = ack.try_send(stored);
			}
		}
		IntakeCommand::Barrier(done) => {
			let _ = done.send(());
		}
	}
}

async fn run_writer(
	store: Arc<dyn QueueStore>,
	mut rx: mpsc::UnboundedReceiver<IntakeCommand>,
	shutdown: Arc<Notify>,
) -> mpsc::UnboundedReceiver<IntakeCommand> {
	loop {
		tokio::select! {
			command = rx.recv() => match command {
				Some(command) => handle_command(store.as_ref(), command).await,
				None => break,
			},
			_ = shutdown.notified() => {
				while let Ok(command) = rx.try_recv() {
					handle_command(store.as_ref(), command).await;
				}
				break;
			}
		}
	}
	rx
}
