// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Uncaught-fault handling.
//!
//! Handlers form an explicit chain: each installed handler holds the handler
//! that was the head before it and calls it after doing its own work. The
//! [`CrashListener`] records the fault as a crash and restores the previous
//! head when stopped. [`install_panic_hook`] feeds Rust panics into a chain.

use std::panic::PanicHookInfo;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use beacon_trace_core::{CrashFrame, CrashReport, CrashThread, SourceType};
use tracing::{debug, error, info, warn};

use crate::backtrace::capture_frames;
use crate::error::SourceError;
use crate::source::{Listener, ObservationSink};

/// Class name reported for Rust panics.
pub const PANIC_CLASS_NAME: &str = "panic";

/// Maximum wait for a crash row to be persisted from the faulting thread.
pub const DEFAULT_PERSIST_TIMEOUT: Duration = Duration::from_secs(2);

/// An uncaught fault on one thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
	pub thread_id: u64,
	pub thread_name: Option<String>,
	pub class_name: String,
	pub message: String,
	/// `file:line:column` where the fault was raised.
	pub location: Option<String>,
	/// Stack of the faulting thread, innermost first.
	pub frames: Vec<CrashFrame>,
}

impl Fault {
	pub fn from_panic(info: &PanicHookInfo<'_>, frames: Vec<CrashFrame>) -> Self {
		let thread = std::thread::current();
		Self {
			thread_id: thread_number(),
			thread_name: thread.name().map(str::to_string),
			class_name: PANIC_CLASS_NAME.to_string(),
			message: extract_panic_message(info),
			location: info
				.location()
				.map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column())),
			frames,
		}
	}

	/// Only the faulting thread is reported.
	pub fn to_report(&self) -> CrashReport {
		CrashReport {
			threads: vec![CrashThread {
				thread_id: self.thread_id,
				is_requesting: true,
				frames: self.frames.clone(),
			}],
			throwable_class_name: self.class_name.clone(),
			description: self.message.clone(),
			all_exception_names: None,
		}
	}
}

static NEXT_THREAD_NUMBER: AtomicU64 = AtomicU64::new(1);

thread_local! {
	static THREAD_NUMBER: u64 = NEXT_THREAD_NUMBER.fetch_add(1, Ordering::Relaxed);
}

/// Process-unique number of the calling thread, assigned on first use.
/// Zero once the thread's locals have been torn down.
pub fn thread_number() -> u64 {
	THREAD_NUMBER.try_with(|n| *n).unwrap_or(0)
}

fn extract_panic_message(info: &PanicHookInfo<'_>) -> String {
	if let Some(s) = info.payload().downcast_ref::<&str>() {
		s.to_string()
	} else if let Some(s) = info.payload().downcast_ref::<String>() {
		s.clone()
	} else {
		"Box<dyn Any>".to_string()
	}
}

pub trait FaultHandler: Send + Sync {
	fn handle(&self, fault: &Fault);
}

/// Holder of the current head of the handler chain.
#[derive(Default)]
pub struct FaultHandlerChain {
	head: RwLock<Option<Arc<dyn FaultHandler>>>,
}

impl FaultHandlerChain {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn head(&self) -> Option<Arc<dyn FaultHandler>> {
		self.head.read().unwrap_or_else(PoisonError::into_inner).clone()
	}

	/// Sets the head, returning the one it replaced.
	pub fn replace(&self, handler: Option<Arc<dyn FaultHandler>>) -> Option<Arc<dyn FaultHandler>> {
		let mut head = self.head.write().unwrap_or_else(PoisonError::into_inner);
		std::mem::replace(&mut *head, handler)
	}

	/// Hands the fault to the head handler, if any.
	pub fn dispatch(&self, fault: &Fault) {
		if let Some(head) = self.head() {
			head.handle(fault);
		}
	}
}

fn same_handler(a: &Arc<dyn FaultHandler>, b: &Arc<dyn FaultHandler>) -> bool {
	std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

fn same_head(a: Option<&Arc<dyn FaultHandler>>, b: Option<&Arc<dyn FaultHandler>>) -> bool {
	match (a, b) {
		(Some(a), Some(b)) => same_handler(a, b),
		(None, None) => true,
		_ => false,
	}
}

/// Records a fault as a crash, then calls `next`.
pub struct CrashFaultHandler {
	sink: Arc<dyn ObservationSink>,
	next: Option<Arc<dyn FaultHandler>>,
	timeout: Duration,
}

impl CrashFaultHandler {
	pub fn new(
		sink: Arc<dyn ObservationSink>,
		next: Option<Arc<dyn FaultHandler>>,
		timeout: Duration,
	) -> Self {
		Self {
			sink,
			next,
			timeout,
		}
	}
}

impl FaultHandler for CrashFaultHandler {
	fn handle(&self, fault: &Fault) {
		error!(
			thread_id = fault.thread_id,
			thread_name = fault.thread_name.as_deref().unwrap_or("<unnamed>"),
			class_name = %fault.class_name,
			location = fault.location.as_deref().unwrap_or("<unknown>"),
			message = %fault.message,
			"uncaught fault"
		);

		if !self.sink.persist_crash(fault.to_report(), self.timeout) {
			warn!(timeout_ms = self.timeout.as_millis() as u64, "crash may not have been persisted");
		}

		if let Some(next) = &self.next {
			next.handle(fault);
		}
	}
}

struct Installed {
	handler: Arc<dyn FaultHandler>,
	previous: Option<Arc<dyn FaultHandler>>,
}

/// Event-driven crash source backed by a fault-handler chain.
pub struct CrashListener {
	chain: Arc<FaultHandlerChain>,
	timeout: Duration,
	installed: Mutex<Option<Installed>>,
}

impl CrashListener {
	pub fn new(chain: Arc<FaultHandlerChain>) -> Self {
		Self {
			chain,
			timeout: DEFAULT_PERSIST_TIMEOUT,
			installed: Mutex::new(None),
		}
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	fn lock(&self) -> MutexGuard<'_, Option<Installed>> {
		self.installed.lock().unwrap_or_else(PoisonError::into_inner)
	}

	pub fn is_installed(&self) -> bool {
		self.lock().is_some()
	}
}

impl Listener for CrashListener {
	fn source_type(&self) -> SourceType {
		SourceType::Crash
	}

	fn start(&self, sink: Arc<dyn ObservationSink>) -> Result<(), SourceError> {
		let mut installed = self.lock();
		if installed.is_some() {
			return Err(SourceError::AlreadyStarted);
		}

		let previous = self.chain.head();
		let handler: Arc<dyn FaultHandler> =
			Arc::new(CrashFaultHandler::new(sink, previous.clone(), self.timeout));
		self.chain.replace(Some(Arc::clone(&handler)));
		*installed = Some(Installed { handler, previous });

		info!("crash handler installed");
		Ok(())
	}

	fn stop(&self) {
		let Some(installed) = self.lock().take() else {
			return;
		};

		let replaced = self.chain.replace(installed.previous);
		if !same_head(replaced.as_ref(), Some(&installed.handler)) {
			warn!("fault handler chain head changed while the crash handler was installed");
		}
		info!("crash handler removed");
	}
}

/// Routes Rust panics into `chain`, then runs the previously installed
/// panic hook.
pub fn install_panic_hook(chain: Arc<FaultHandlerChain>) {
	let previous_hook = std::panic::take_hook();

	std::panic::set_hook(Box::new(move |info| {
		let fault = Fault::from_panic(info, capture_frames());
		chain.dispatch(&fault);
		previous_hook(info);
	}));
	debug!("panic hook installed");
}
