// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Agent context.
//!
//! [`Agent`] owns every service of the pipeline. Nothing is global except
//! the optional panic hook, which feeds the agent's fault-handler chain.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use beacon_trace_core::{Observation, QueueStore, SessionId, SourceType};
use tracing::{debug, info, instrument};

use crate::buffer::RecordBuffer;
use crate::config::AgentConfig;
use crate::coordinator::DataCoordinator;
use crate::error::Result;
use crate::fault::{install_panic_hook, CrashListener, FaultHandlerChain};
use crate::formatter::{Normalizer, NormalizerRegistry};
use crate::network::NetworkListener;
use crate::queue::{MemoryQueueStore, SendQueue};
use crate::registry::CollectorRegistry;
use crate::scheduler::{AlwaysOnline, Connectivity, DeliveryScheduler, FlushReport};
use crate::sender::{HttpTransport, Sender, Transport};
use crate::session::SessionAuthority;
use crate::source::{AllowAll, ObservationSink, PermissionChecker, Source};

pub struct AgentBuilder {
	config: AgentConfig,
	store: Option<Arc<dyn QueueStore>>,
	transport: Option<Arc<dyn Transport>>,
	connectivity: Arc<dyn Connectivity>,
	permissions: Arc<dyn PermissionChecker>,
	sources: Vec<Source>,
	normalizers: NormalizerRegistry,
	fault_chain: Option<Arc<FaultHandlerChain>>,
}

impl AgentBuilder {
	pub fn new(config: AgentConfig) -> Self {
		Self {
			config,
			store: None,
			transport: None,
			connectivity: Arc::new(AlwaysOnline),
			permissions: Arc::new(AllowAll),
			sources: Vec::new(),
			normalizers: NormalizerRegistry::with_defaults(),
			fault_chain: None,
		}
	}

	/// Row store backing the send queue. Defaults to process memory.
	pub fn store(mut self, store: Arc<dyn QueueStore>) -> Self {
		self.store = Some(store);
		self
	}

	/// Defaults to [`HttpTransport`] against the configured endpoint.
	pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
		self.transport = Some(transport);
		self
	}

	pub fn connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
		self.connectivity = connectivity;
		self
	}

	pub fn permissions(mut self, permissions: Arc<dyn PermissionChecker>) -> Self {
		self.permissions = permissions;
		self
	}

	pub fn source(mut self, source: Source) -> Self {
		self.sources.push(source);
		self
	}

	/// Adds or replaces the normalizer for `source_type`.
	pub fn normalizer(mut self, source_type: SourceType, normalizer: Arc<dyn Normalizer>) -> Self {
		self.normalizers.register(source_type, normalizer);
		self
	}

	/// Chain the crash listener installs into. Defaults to a fresh chain.
	pub fn fault_chain(mut self, chain: Arc<FaultHandlerChain>) -> Self {
		self.fault_chain = Some(chain);
		self
	}

	pub fn build(self) -> Result<Agent> {
		self.config.validate()?;
		let config = self.config;

		let store: Arc<dyn QueueStore> = match self.store {
			Some(store) => store,
			None => Arc::new(MemoryQueueStore::new()),
		};
		let transport: Arc<dyn Transport> = match self.transport {
			Some(transport) => transport,
			None => Arc::new(HttpTransport::new(&config.endpoint, config.request_timeout())?),
		};

		let session = Arc::new(SessionAuthority::new());
		let buffer = Arc::new(RecordBuffer::new(config.platform.clone()));
		let queue = Arc::new(SendQueue::new(store, config.max_send_attempts));

		let coordinator = Arc::new(DataCoordinator::new(
			Arc::new(self.normalizers),
			Arc::clone(&buffer),
			Arc::clone(&session),
			queue.intake(),
		));

		let overrides: HashMap<SourceType, Duration> = config
			.collector_interval_overrides
			.iter()
			.map(|(tag, ms)| (SourceType::from(tag.as_str()), Duration::from_millis(*ms)))
			.collect();
		let registry = CollectorRegistry::new(self.permissions, overrides);

		let fault_chain = self
			.fault_chain
			.unwrap_or_else(|| Arc::new(FaultHandlerChain::new()));
		let network = Arc::new(NetworkListener::new());
		registry.register(Source::EventDriven(network.clone()));
		registry.register(Source::event_driven(CrashListener::new(Arc::clone(&fault_chain))));
		for source in self.sources {
			registry.register(source);
		}

		let scheduler = Arc::new(DeliveryScheduler::new(
			Arc::clone(&queue),
			Sender::new(transport, config.request_timeout()),
			Arc::clone(&buffer),
			Arc::clone(&session),
			self.connectivity,
			config.flush_interval(),
			config.max_batch_items,
		));

		debug!(sources = registry.len(), "agent built");
		Ok(Agent {
			config,
			session,
			buffer,
			queue,
			registry,
			coordinator,
			scheduler,
			network,
			fault_chain,
			panic_hook_installed: AtomicBool::new(false),
		})
	}
}

pub struct Agent {
	config: AgentConfig,
	session: Arc<SessionAuthority>,
	buffer: Arc<RecordBuffer>,
	queue: Arc<SendQueue>,
	registry: CollectorRegistry,
	coordinator: Arc<DataCoordinator>,
	scheduler: Arc<DeliveryScheduler>,
	network: Arc<NetworkListener>,
	fault_chain: Arc<FaultHandlerChain>,
	panic_hook_installed: AtomicBool,
}

impl Agent {
	pub fn builder(config: AgentConfig) -> AgentBuilder {
		AgentBuilder::new(config)
	}

	/// Starts a session and every background service. Must be called from
	/// within a Tokio runtime. Returns the active session when already
	/// running.
	#[instrument(skip(self))]
	pub fn start(&self) -> SessionId {
		let session_id = self.session.start();
		if self.registry.is_running() {
			return session_id;
		}

		self.queue.start_writer();
		let sink: Arc<dyn ObservationSink> = self.coordinator.clone();
		self.registry.start(sink);
		self.scheduler.start();

		if self.config.capture_panics && !self.panic_hook_installed.swap(true, Ordering::SeqCst) {
			install_panic_hook(Arc::clone(&self.fault_chain));
		}

		info!(session_id = %session_id, platform = %self.config.platform, "agent started");
		session_id
	}

	/// Stops listeners (restoring the fault-handler chain), timers and the
	/// queue writer, then ends the session. Queued rows stay in the store.
	#[instrument(skip(self))]
	pub async fn stop(&self) {
		self.registry.stop();
		self.scheduler.stop().await;
		self.queue.stop_writer().await;
		self.buffer.clear();
		if self.session.stop() {
			info!("agent stopped");
		}
	}

	/// Stops everything and drops in-memory state.
	pub async fn reset(&self) {
		self.stop().await;
		self.session.reset();
	}

	pub fn is_running(&self) -> bool {
		self.registry.is_running()
	}

	pub fn config(&self) -> &AgentConfig {
		&self.config
	}

	pub fn active_session(&self) -> Option<SessionId> {
		self.session.active()
	}

	pub fn session(&self) -> &Arc<SessionAuthority> {
		&self.session
	}

	pub fn buffer(&self) -> &Arc<RecordBuffer> {
		&self.buffer
	}

	pub fn queue(&self) -> &Arc<SendQueue> {
		&self.queue
	}

	pub fn registry(&self) -> &CollectorRegistry {
		&self.registry
	}

	pub fn scheduler(&self) -> &Arc<DeliveryScheduler> {
		&self.scheduler
	}

	/// Push API for HTTP client interceptors.
	pub fn network(&self) -> &Arc<NetworkListener> {
		&self.network
	}

	pub fn fault_chain(&self) -> &Arc<FaultHandlerChain> {
		&self.fault_chain
	}

	pub fn sink(&self) -> Arc<dyn ObservationSink> {
		self.coordinator.clone()
	}

	/// Adds a source; it starts immediately when the agent is running.
	pub fn register_source(&self, source: Source) -> bool {
		self.registry.register(source)
	}

	/// Feeds one observation into the pipeline.
	pub fn record(&self, observation: Observation) {
		self.coordinator.on_observation(observation);
	}

	/// Runs one delivery cycle now.
	pub async fn flush_now(&self) -> Result<FlushReport> {
		self.scheduler.flush_now().await
	}

	/// Asks the background scheduler for an early flush.
	pub fn request_flush(&self) {
		self.scheduler.notify();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::EndpointConfig;
	use crate::error::{AgentError, ConfigError, DeliveryError};
	use crate::fault::{Fault, FaultHandler};
	use crate::queue::DeliveryRequest;
	use crate::scheduler::ConnectivityFlag;
	use crate::source::StaticCollector;
	use async_trait::async_trait;
	use beacon_trace_core::{
		Content, CrashFrame, CrashReport, CrashThread, NetworkCall, TraceEnvelope,
	};
	use std::sync::atomic::AtomicUsize;
	use std::sync::Mutex;
	use wiremock::matchers::{method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	fn config(base_url: &str) -> AgentConfig {
		let mut config = AgentConfig::new(EndpointConfig::new(base_url).with_token("test-token"));
		config.capture_panics = false;
		config
	}

	#[derive(Default)]
	struct CountingTransport {
		calls: AtomicUsize,
	}

	#[async_trait]
	impl Transport for CountingTransport {
		async fn deliver(&self, _request: &DeliveryRequest) -> std::result::Result<(), DeliveryError> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			Ok(())
		}
	}

	#[derive(Default)]
	struct RecordingHandler {
		faults: Mutex<Vec<Fault>>,
	}

	impl FaultHandler for RecordingHandler {
		fn handle(&self, fault: &Fault) {
			self.faults.lock().unwrap().push(fault.clone());
		}
	}

	fn network_call() -> NetworkCall {
		NetworkCall {
			method: "GET".to_string(),
			url: "https://api.example.com/items".to_string(),
			status_code: 200,
			start_ms: 1_700_000_000_000,
			end_ms: 1_700_000_000_120,
			..Default::default()
		}
	}

	fn crash_report() -> CrashReport {
		CrashReport {
			threads: vec![CrashThread {
				thread_id: 1,
				is_requesting: true,
				frames: vec![CrashFrame {
					package: "app::worker".to_string(),
					function: "run".to_string(),
					filename: "src/worker.rs".to_string(),
					line_number: 12,
					sequence_number: 0,
				}],
			}],
			throwable_class_name: "panic".to_string(),
			description: "worker failed".to_string(),
			all_exception_names: None,
		}
	}

	#[test]
	fn invalid_config_is_rejected() {
		let result = Agent::builder(config("ftp://collector")).build();
		assert!(matches!(
			result,
			Err(AgentError::Config(ConfigError::InvalidValue { .. }))
		));
	}

	#[tokio::test]
	async fn end_to_end_delivery() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/api/v1/trace"))
			.respond_with(ResponseTemplate::new(200))
			.expect(1)
			.mount(&server)
			.await;
		Mock::given(method("POST"))
			.and(path("/api/v1/crashes"))
			.respond_with(ResponseTemplate::new(200))
			.expect(1)
			.mount(&server)
			.await;

		let agent = Agent::builder(config(&server.uri()))
			.source(Source::polled(StaticCollector::text(
				SourceType::AppVersionName,
				"1.4.0",
			)))
			.build()
			.unwrap();

		let session = agent.start();
		tokio::time::sleep(Duration::from_millis(50)).await;

		assert!(agent.network().record(network_call()));
		agent.record(Observation::new(
			SourceType::Crash,
			Some(Content::Crash(crash_report())),
		));

		let report = agent.flush_now().await.unwrap();
		assert!(report.sealed);
		assert_eq!(report.attempted, 2);
		assert_eq!(report.summary.delivered, 2);
		assert!(agent.queue().is_empty().await.unwrap());

		let received = server.received_requests().await.unwrap();
		let trace = received
			.iter()
			.find(|r| r.url.path() == "/api/v1/trace")
			.unwrap();
		let envelope: TraceEnvelope = serde_json::from_slice(&trace.body).unwrap();
		assert_eq!(envelope.spans.len(), 1);
		assert_eq!(envelope.spans[0].name, "https://api.example.com/items");
		assert_eq!(envelope.resource.labels["app.version"], "1.4.0");
		assert_eq!(envelope.resource.labels["app.session.id"], session.as_str());

		agent.stop().await;
		assert!(agent.active_session().is_none());
	}

	#[tokio::test]
	async fn start_is_idempotent_and_stop_ends_the_session() {
		let agent = Agent::builder(config("https://collector.example.com"))
			.transport(Arc::new(CountingTransport::default()))
			.build()
			.unwrap();

		let first = agent.start();
		assert!(agent.is_running());
		assert_eq!(agent.start(), first);

		agent.stop().await;
		assert!(!agent.is_running());
		assert!(agent.active_session().is_none());

		let second = agent.start();
		assert_ne!(second, first);
		agent.stop().await;
	}

	#[tokio::test]
	async fn stop_restores_the_fault_chain() {
		let chain = Arc::new(FaultHandlerChain::new());
		let previous = Arc::new(RecordingHandler::default());
		chain.replace(Some(previous.clone() as Arc<dyn FaultHandler>));

		let agent = Agent::builder(config("https://collector.example.com"))
			.transport(Arc::new(CountingTransport::default()))
			.fault_chain(Arc::clone(&chain))
			.build()
			.unwrap();

		agent.start();
		let installed = chain.head().unwrap();
		assert!(!std::ptr::eq(
			Arc::as_ptr(&installed) as *const (),
			Arc::as_ptr(&previous) as *const ()
		));

		agent.stop().await;
		let restored = chain.head().unwrap();
		assert!(std::ptr::eq(
			Arc::as_ptr(&restored) as *const (),
			Arc::as_ptr(&previous) as *const ()
		));
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn faults_are_persisted_before_the_previous_handler_runs() {
		let chain = Arc::new(FaultHandlerChain::new());
		let previous = Arc::new(RecordingHandler::default());
		chain.replace(Some(previous.clone() as Arc<dyn FaultHandler>));

		let agent = Arc::new(
			Agent::builder(config("https://collector.example.com"))
				.transport(Arc::new(CountingTransport::default()))
				.connectivity(Arc::new(ConnectivityFlag::new(false)))
				.fault_chain(Arc::clone(&chain))
				.build()
				.unwrap(),
		);
		agent.start();

		let fault = Fault {
			thread_id: 3,
			thread_name: Some("worker".to_string()),
			class_name: "panic".to_string(),
			message: "worker failed".to_string(),
			location: None,
			frames: Vec::new(),
		};
		let dispatch_chain = Arc::clone(&chain);
		tokio::task::spawn_blocking(move || dispatch_chain.dispatch(&fault))
			.await
			.unwrap();

		assert_eq!(agent.queue().len().await.unwrap(), 1);
		assert_eq!(previous.faults.lock().unwrap().len(), 1);
		agent.stop().await;
	}

	#[tokio::test]
	async fn queue_survives_restart_on_sqlite() {
		let dir = tempfile::tempdir().unwrap();
		let url = format!("sqlite:{}", dir.path().join("queue.db").display());

		{
			let pool = beacon_trace_db::create_pool(&url).await.unwrap();
			beacon_trace_db::migrate(&pool).await.unwrap();
			let agent = Agent::builder(config("https://collector.example.com"))
				.store(Arc::new(beacon_trace_db::QueueRepository::new(pool.clone())))
				.transport(Arc::new(CountingTransport::default()))
				.connectivity(Arc::new(ConnectivityFlag::new(false)))
				.build()
				.unwrap();

			agent.start();
			agent.network().record(network_call());
			agent.stop().await;
			assert_eq!(agent.queue().len().await.unwrap(), 1);
			pool.close().await;
		}

		let pool = beacon_trace_db::create_pool(&url).await.unwrap();
		beacon_trace_db::migrate(&pool).await.unwrap();
		let transport = Arc::new(CountingTransport::default());
		let agent = Agent::builder(config("https://collector.example.com"))
			.store(Arc::new(beacon_trace_db::QueueRepository::new(pool)))
			.transport(transport.clone())
			.build()
			.unwrap();

		let report = agent.flush_now().await.unwrap();
		assert_eq!(report.summary.delivered, 1);
		assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
		assert!(agent.queue().is_empty().await.unwrap());
	}

	#[tokio::test]
	async fn interval_overrides_apply_to_collectors() {
		let mut config = config("https://collector.example.com");
		config
			.collector_interval_overrides
			.insert("app.version_name".to_string(), 0);
		let agent = Agent::builder(config)
			.transport(Arc::new(CountingTransport::default()))
			.source(Source::polled(
				StaticCollector::text(SourceType::AppVersionName, "2.0.0")
					.with_interval(Duration::from_millis(5)),
			))
			.build()
			.unwrap();

		agent.start();
		tokio::time::sleep(Duration::from_millis(50)).await;
		assert_eq!(agent.buffer().resource(None).labels["app.version"], "2.0.0");
		assert!(agent.registry().active_sources().contains(&SourceType::AppVersionName));
		agent.stop().await;
	}
}
