// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Delivery scheduler.
//!
//! Every flush interval, or when woken through [`DeliveryScheduler::notify`],
//! the scheduler seals the active trace into the send queue and, when the
//! device is online, delivers one batch of the oldest rows. After a flush
//! with failures the next wait grows with capped exponential backoff.
//! Stopping cancels a delivery in flight; rows it did not finish stay pending.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use beacon_common_http::{backoff_delay, RetryConfig};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::buffer::RecordBuffer;
use crate::error::Result;
use crate::queue::{AckSummary, DeliveryPayload, SendQueue};
use crate::sender::Sender;
use crate::session::SessionAuthority;

/// Reports whether the backend can be reached at all.
pub trait Connectivity: Send + Sync {
	fn is_online(&self) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

impl Connectivity for AlwaysOnline {
	fn is_online(&self) -> bool {
		true
	}
}

/// Connectivity state pushed by the host application.
#[derive(Debug)]
pub struct ConnectivityFlag {
	online: AtomicBool,
}

impl ConnectivityFlag {
	pub fn new(online: bool) -> Self {
		Self {
			online: AtomicBool::new(online),
		}
	}

	pub fn set_online(&self, online: bool) {
		self.online.store(online, Ordering::SeqCst);
	}
}

impl Default for ConnectivityFlag {
	fn default() -> Self {
		Self::new(true)
	}
}

impl Connectivity for ConnectivityFlag {
	fn is_online(&self) -> bool {
		self.online.load(Ordering::SeqCst)
	}
}

/// What one flush cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
	/// A trace was sealed into the queue.
	pub sealed: bool,
	/// Delivery was skipped because the device was offline.
	pub offline: bool,
	/// Rows handed to the transport.
	pub attempted: usize,
	pub summary: AckSummary,
	/// Delivery was cut short by shutdown.
	pub cancelled: bool,
}

/// Backoff applied between flushes that keep failing.
pub fn default_backoff() -> RetryConfig {
	RetryConfig {
		max_attempts: u32::MAX,
		base_delay: Duration::from_secs(1),
		max_delay: Duration::from_secs(300),
		backoff_factor: 2.0,
		jitter: true,
	}
}

struct Running {
	shutdown: watch::Sender<bool>,
	handle: JoinHandle<()>,
}

pub struct DeliveryScheduler {
	queue: Arc<SendQueue>,
	sender: Sender,
	buffer: Arc<RecordBuffer>,
	session: Arc<SessionAuthority>,
	connectivity: Arc<dyn Connectivity>,
	flush_interval: Duration,
	max_batch_items: usize,
	backoff: RetryConfig,
	consecutive_failures: AtomicU32,
	wake: Notify,
	running: Mutex<Option<Running>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DeliveryScheduler {
	pub fn new(
		queue: Arc<SendQueue>,
		sender: Sender,
		buffer: Arc<RecordBuffer>,
		session: Arc<SessionAuthority>,
		connectivity: Arc<dyn Connectivity>,
		flush_interval: Duration,
		max_batch_items: usize,
	) -> Self {
		Self {
			queue,
			sender,
			buffer,
			session,
			connectivity,
			flush_interval,
			max_batch_items,
			backoff: default_backoff(),
			consecutive_failures: AtomicU32::new(0),
			wake: Notify::new(),
			running: Mutex::new(None),
		}
	}

	pub fn with_backoff(mut self, backoff: RetryConfig) -> Self {
		self.backoff = backoff;
		self
	}

	pub fn is_running(&self) -> bool {
		lock(&self.running).is_some()
	}

	pub fn consecutive_failures(&self) -> u32 {
		self.consecutive_failures.load(Ordering::SeqCst)
	}

	/// Wait before the next cycle: the flush interval, stretched by backoff
	/// while flushes keep failing.
	pub fn next_delay(&self) -> Duration {
		match self.consecutive_failures() {
			0 => self.flush_interval,
			failures => self
				.flush_interval
				.max(backoff_delay(&self.backoff, failures - 1)),
		}
	}

	/// Requests an early flush.
	pub fn notify(&self) {
		self.wake.notify_one();
	}

	/// Moves the active trace into the queue. Returns true when a trace was
	/// sealed.
	pub async fn seal_pending(&self) -> Result<bool> {
		let Some(envelope) = self.session.with_active(|session| self.buffer.seal(session)) else {
			return Ok(false);
		};
		let row = DeliveryPayload::Trace(envelope).into_row()?;
		self.queue.insert(row).await?;
		Ok(true)
	}

	/// Runs one cycle: seal, then deliver up to `max_batch_items` rows.
	pub async fn flush_now(&self) -> Result<FlushReport> {
		self.flush(std::future::pending()).await
	}

	/// One cycle whose delivery stops once `cancelled` resolves. Sealing is
	/// never interrupted.
	#[instrument(skip(self, cancelled))]
	async fn flush(&self, cancelled: impl Future<Output = ()>) -> Result<FlushReport> {
		let mut report = FlushReport {
			sealed: self.seal_pending().await?,
			..FlushReport::default()
		};
		self.queue.settle().await;

		if !self.connectivity.is_online() {
			debug!("offline; delivery skipped");
			report.offline = true;
			return Ok(report);
		}

		let guard = self.queue.begin_flush().await;
		let batch = guard.next_batch(self.max_batch_items).await?;
		if batch.is_empty() {
			return Ok(report);
		}

		let sent = self.sender.send_until(&batch, cancelled).await;
		report.attempted = sent.outcomes.len();
		report.summary = guard.acknowledge(&sent.outcomes).await?;
		drop(guard);

		if sent.cancelled {
			info!(
				pending = batch.len() - sent.outcomes.len(),
				"delivery cancelled; remaining rows left pending"
			);
			report.cancelled = true;
			return Ok(report);
		}

		if report.summary.failed > 0 || report.summary.abandoned > 0 {
			let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
			warn!(
				failures,
				next_delay_ms = self.next_delay().as_millis() as u64,
				"flush completed with failures"
			);
		} else {
			self.consecutive_failures.store(0, Ordering::SeqCst);
		}

		Ok(report)
	}

	/// Spawns the scheduling loop. Must be called from within a Tokio
	/// runtime. No-op when already running.
	pub fn start(self: &Arc<Self>) {
		let mut running = lock(&self.running);
		if running.is_some() {
			return;
		}

		let (shutdown, stop_rx) = watch::channel(false);
		let handle = tokio::spawn(Arc::clone(self).run(stop_rx));
		*running = Some(Running { shutdown, handle });
		info!(
			flush_interval_ms = self.flush_interval.as_millis() as u64,
			max_batch_items = self.max_batch_items,
			"delivery scheduler started"
		);
	}

	/// Stops the loop, cancelling any delivery in flight, then seals the
	/// active trace so it survives in the queue. Nothing more is delivered.
	pub async fn stop(&self) {
		let running = lock(&self.running).take();
		if let Some(running) = running {
			running.shutdown.send_replace(true);
			if let Err(e) = running.handle.await {
				warn!(error = %e, "delivery scheduler task failed");
			}
			info!("delivery scheduler stopped");
		}

		if let Err(e) = self.seal_pending().await {
			warn!(error = %e, "failed to seal pending trace on stop");
		}
	}

	async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
		loop {
			let delay = self.next_delay();
			tokio::select! {
				_ = shutdown.wait_for(|stop| *stop) => break,
				_ = tokio::time::sleep(delay) => {}
				_ = self.wake.notified() => {}
			}

			let mut stop_rx = shutdown.clone();
			let stopping = async move {
				let _ = stop_rx.wait_for(|stop| *stop).await;
			};
			match self.flush(stopping).await {
				Ok(report) if report.cancelled => break,
				Ok(_) => {}
				Err(e) => warn!(error = %e, "flush failed"),
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::DeliveryError;
	use crate::queue::{DeliveryRequest, MemoryQueueStore};
	use crate::sender::Transport;
	use async_trait::async_trait;
	use beacon_trace_core::{QueueStore, Resource, Span, SpanKind, TraceEnvelope};
	use chrono::Utc;
	use std::collections::BTreeMap;
	use std::sync::atomic::AtomicUsize;

	#[derive(Default)]
	struct CountingTransport {
		calls: AtomicUsize,
		fail: AtomicBool,
	}

	#[async_trait]
	impl Transport for CountingTransport {
		async fn deliver(&self, _request: &DeliveryRequest) -> std::result::Result<(), DeliveryError> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			if self.fail.load(Ordering::SeqCst) {
				Err(DeliveryError::Transport("down".into()))
			} else {
				Ok(())
			}
		}
	}

	#[derive(Default)]
	struct HangingTransport {
		calls: AtomicUsize,
	}

	#[async_trait]
	impl Transport for HangingTransport {
		async fn deliver(&self, _request: &DeliveryRequest) -> std::result::Result<(), DeliveryError> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			tokio::time::sleep(Duration::from_secs(3600)).await;
			Ok(())
		}
	}

	struct Harness {
		store: Arc<MemoryQueueStore>,
		buffer: Arc<RecordBuffer>,
		connectivity: Arc<ConnectivityFlag>,
		scheduler: Arc<DeliveryScheduler>,
	}

	fn harness(transport: Arc<dyn Transport>, timeout: Duration) -> Harness {
		let store = Arc::new(MemoryQueueStore::new());
		let queue = Arc::new(SendQueue::new(store.clone(), 3));
		let buffer = Arc::new(RecordBuffer::new("android"));
		let session = Arc::new(SessionAuthority::new());
		session.start();
		let connectivity = Arc::new(ConnectivityFlag::new(true));
		let scheduler = Arc::new(
			DeliveryScheduler::new(
				queue,
				Sender::new(transport, timeout),
				Arc::clone(&buffer),
				session,
				connectivity.clone(),
				Duration::from_secs(10),
				20,
			)
			.with_backoff(RetryConfig {
				max_attempts: u32::MAX,
				base_delay: Duration::from_secs(20),
				max_delay: Duration::from_secs(60),
				backoff_factor: 2.0,
				jitter: false,
			}),
		);
		Harness {
			store,
			buffer,
			connectivity,
			scheduler,
		}
	}

	fn span(id: &str) -> Span {
		let now = Utc::now();
		Span {
			trace_id: String::new(),
			span_id: id.to_string(),
			parent_span_id: None,
			name: "https://example.com".to_string(),
			kind: SpanKind::Client,
			start_time: now,
			end_time: now,
			attributes: BTreeMap::new(),
		}
	}

	#[tokio::test]
	async fn flush_seals_and_delivers() {
		let transport = Arc::new(CountingTransport::default());
		let h = harness(transport.clone(), Duration::from_secs(1));
		h.buffer.add_span(span("a"));
		h.buffer.add_span(span("b"));

		let report = h.scheduler.flush_now().await.unwrap();
		assert!(report.sealed);
		assert_eq!(report.attempted, 1);
		assert_eq!(report.summary.delivered, 1);
		assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
		assert_eq!(h.store.len().await.unwrap(), 0);
	}

	#[tokio::test]
	async fn offline_does_not_flush() {
		let transport = Arc::new(CountingTransport::default());
		let h = harness(transport.clone(), Duration::from_secs(1));
		h.connectivity.set_online(false);
		h.buffer.add_span(span("a"));

		let report = h.scheduler.flush_now().await.unwrap();
		assert!(report.offline);
		assert!(report.sealed);
		assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
		assert_eq!(h.store.len().await.unwrap(), 1);

		h.connectivity.set_online(true);
		let report = h.scheduler.flush_now().await.unwrap();
		assert_eq!(report.summary.delivered, 1);
		assert_eq!(h.store.len().await.unwrap(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn transport_timeout_counts_as_failure() {
		let h = harness(Arc::new(HangingTransport::default()), Duration::from_millis(100));
		h.buffer.add_span(span("a"));

		let report = h.scheduler.flush_now().await.unwrap();
		assert_eq!(report.summary.failed, 1);
		assert_eq!(h.scheduler.consecutive_failures(), 1);

		let rows = h.store.oldest(10).await.unwrap();
		assert_eq!(rows.len(), 1);
		assert_eq!(rows[0].sent_attempts, 1);
	}

	#[tokio::test]
	async fn failures_stretch_the_next_delay() {
		let transport = Arc::new(CountingTransport::default());
		transport.fail.store(true, Ordering::SeqCst);
		let h = harness(transport.clone(), Duration::from_secs(1));
		assert_eq!(h.scheduler.next_delay(), Duration::from_secs(10));

		h.buffer.add_span(span("a"));
		h.scheduler.flush_now().await.unwrap();
		assert_eq!(h.scheduler.next_delay(), Duration::from_secs(20));

		h.scheduler.flush_now().await.unwrap();
		assert_eq!(h.scheduler.next_delay(), Duration::from_secs(40));

		transport.fail.store(false, Ordering::SeqCst);
		h.scheduler.flush_now().await.unwrap();
		assert_eq!(h.scheduler.consecutive_failures(), 0);
		assert_eq!(h.scheduler.next_delay(), Duration::from_secs(10));
	}

	#[tokio::test(start_paused = true)]
	async fn loop_flushes_on_notify() {
		let transport = Arc::new(CountingTransport::default());
		let h = harness(transport.clone(), Duration::from_secs(1));
		h.scheduler.start();
		assert!(h.scheduler.is_running());

		h.buffer.add_span(span("a"));
		h.scheduler.notify();

		for _ in 0..100 {
			if transport.calls.load(Ordering::SeqCst) > 0 {
				break;
			}
			tokio::time::sleep(Duration::from_millis(1)).await;
		}
		assert_eq!(transport.calls.load(Ordering::SeqCst), 1);

		h.scheduler.stop().await;
		assert!(!h.scheduler.is_running());
	}

	#[tokio::test(start_paused = true)]
	async fn loop_flushes_on_interval() {
		let transport = Arc::new(CountingTransport::default());
		let h = harness(transport.clone(), Duration::from_secs(1));
		h.buffer.add_span(span("a"));
		h.scheduler.start();

		tokio::time::sleep(Duration::from_secs(11)).await;
		assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
		h.scheduler.stop().await;
	}

	#[tokio::test]
	async fn stop_seals_without_delivering() {
		let transport = Arc::new(CountingTransport::default());
		let h = harness(transport.clone(), Duration::from_secs(1));
		h.scheduler.start();
		h.buffer.add_span(span("a"));

		h.scheduler.stop().await;

		assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
		assert_eq!(h.store.len().await.unwrap(), 1);
		assert_eq!(h.buffer.pending_spans(), 0);
	}

	fn trace_row(span_id: &str) -> beacon_trace_core::QueueRow {
		DeliveryPayload::Trace(TraceEnvelope {
			resource: Resource::default(),
			spans: vec![span(span_id)],
		})
		.into_row()
		.unwrap()
	}

	#[tokio::test]
	async fn failed_row_blocks_newer_rows_in_the_batch() {
		let transport = Arc::new(CountingTransport::default());
		transport.fail.store(true, Ordering::SeqCst);
		let h = harness(transport.clone(), Duration::from_secs(1));
		let older = trace_row("a");
		let newer = trace_row("b");
		h.store.put(older.clone()).await.unwrap();
		h.store.put(newer.clone()).await.unwrap();

		let report = h.scheduler.flush_now().await.unwrap();
		assert_eq!(report.attempted, 1);
		assert_eq!(report.summary.failed, 1);
		assert_eq!(transport.calls.load(Ordering::SeqCst), 1);

		let rows = h.store.oldest(10).await.unwrap();
		assert_eq!(rows[0].id, older.id);
		assert_eq!(rows[0].sent_attempts, 1);
		assert_eq!(rows[1].id, newer.id);
		assert_eq!(rows[1].sent_attempts, 0);
	}

	#[tokio::test(start_paused = true)]
	async fn stop_cancels_a_hanging_delivery() {
		let transport = Arc::new(HangingTransport::default());
		let h = harness(transport.clone(), Duration::from_secs(30));
		for i in 0..20 {
			h.store.put(trace_row(&format!("s{i}"))).await.unwrap();
		}

		h.scheduler.start();
		h.scheduler.notify();
		tokio::time::sleep(Duration::from_secs(1)).await;
		assert_eq!(transport.calls.load(Ordering::SeqCst), 1);

		let started = tokio::time::Instant::now();
		h.scheduler.stop().await;
		assert!(started.elapsed() < Duration::from_secs(1));
		assert!(!h.scheduler.is_running());

		let rows = h.store.oldest(50).await.unwrap();
		assert_eq!(rows.len(), 20);
		assert!(rows.iter().all(|row| row.sent_attempts == 0));
	}
}
