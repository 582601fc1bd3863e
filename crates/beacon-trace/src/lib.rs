// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Telemetry agent for mobile instrumentation.
//!
//! Observations flow from sources through the coordinator into either the
//! record buffer (resource labels and trace spans) or, for crashes, straight
//! into the durable send queue. The delivery scheduler seals the active
//! trace into the queue and delivers the oldest rows with bounded retry.
//!
//! # Example
//!
//! ```rust,ignore
//! use beacon_trace::{Agent, AgentConfig, EndpointConfig};
//!
//! let config = AgentConfig::new(EndpointConfig::new("https://collector.example.com"));
//! beacon_trace::logging::init(&config);
//!
//! let agent = Agent::builder(config).build()?;
//! agent.start();
//! agent.network().record(call);
//! agent.stop().await;
//! ```

pub mod agent;
pub mod backtrace;
pub mod buffer;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fault;
pub mod formatter;
pub mod logging;
pub mod network;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod sender;
pub mod session;
pub mod source;

pub use agent::{Agent, AgentBuilder};
pub use buffer::RecordBuffer;
pub use config::{AgentConfig, EndpointConfig};
pub use coordinator::DataCoordinator;
pub use error::{AgentError, ConfigError, DeliveryError, FormatError, Result, SourceError};
pub use fault::{install_panic_hook, CrashListener, Fault, FaultHandler, FaultHandlerChain};
pub use formatter::{
	ActivitySpanNormalizer, FragmentSpanNormalizer, NetworkSpanNormalizer, Normalizer,
	NormalizerRegistry, ResourceNormalizer,
};
pub use network::NetworkListener;
pub use queue::{
	AckSummary, DeliveryOutcome, DeliveryPayload, DeliveryRequest, DeliveryStatus, MemoryQueueStore,
	QueueIntake, SendQueue,
};
pub use registry::CollectorRegistry;
pub use scheduler::{AlwaysOnline, Connectivity, ConnectivityFlag, DeliveryScheduler, FlushReport};
pub use sender::{BatchOutcome, HttpTransport, Sender, Transport};
pub use session::SessionAuthority;
pub use source::{
	AllowAll, Collector, Listener, ObservationSink, PermissionChecker, Source, SourceKind,
	StaticCollector,
};
