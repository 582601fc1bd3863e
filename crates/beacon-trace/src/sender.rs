// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Delivery of queued requests.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beacon_common_http::{retry, RetryConfig};
use beacon_trace_core::PayloadKind;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tracing::{debug, instrument, warn};

use crate::config::EndpointConfig;
use crate::error::DeliveryError;
use crate::queue::{DeliveryOutcome, DeliveryRequest};

pub const TRACE_PATH: &str = "/api/v1/trace";
pub const CRASH_PATH: &str = "/api/v1/crashes";

/// Moves one request to the backend.
#[async_trait]
pub trait Transport: Send + Sync {
	async fn deliver(&self, request: &DeliveryRequest) -> Result<(), DeliveryError>;
}

/// Posts envelopes as JSON with bearer authentication.
///
/// Transient failures (timeouts, connection errors, 408/429/5xx) are retried
/// in place according to the configured [`RetryConfig`].
pub struct HttpTransport {
	client: Client,
	base_url: String,
	token: Option<String>,
	retry_config: RetryConfig,
}

impl HttpTransport {
	pub fn new(endpoint: &EndpointConfig, timeout: Duration) -> Result<Self, DeliveryError> {
		let client = beacon_common_http::new_client_with_timeout(timeout)?;
		Ok(Self {
			client,
			base_url: endpoint.base_url.trim_end_matches('/').to_string(),
			token: endpoint.token.clone(),
			retry_config: RetryConfig::default(),
		})
	}

	pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
		self.retry_config = retry_config;
		self
	}

	pub fn url_for(&self, kind: PayloadKind) -> String {
		let path = match kind {
			PayloadKind::Crash => CRASH_PATH,
			PayloadKind::Trace => TRACE_PATH,
		};
		format!("{}{}", self.base_url, path)
	}

	async fn post(&self, url: &str, body: &str) -> Result<(), DeliveryError> {
		let mut request = self
			.client
			.post(url)
			.header(CONTENT_TYPE, "application/json")
			.body(body.to_string());
		if let Some(token) = &self.token {
			request = request.bearer_auth(token);
		}

		let response = request.send().await?;
		let status = response.status();
		if status.is_success() {
			return Ok(());
		}

		let message = response.text().await.unwrap_or_default();
		Err(DeliveryError::Status {
			status: status.as_u16(),
			message,
		})
	}
}

#[async_trait]
impl Transport for HttpTransport {
	#[instrument(skip(self, request), fields(row_id = %request.id, kind = %request.kind()))]
	async fn deliver(&self, request: &DeliveryRequest) -> Result<(), DeliveryError> {
		let url = self.url_for(request.kind());
		retry(&self.retry_config, || self.post(&url, &request.body)).await
	}
}

/// What [`Sender::send_until`] got through before stopping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
	/// One outcome per attempted request, in request order.
	pub outcomes: Vec<DeliveryOutcome>,
	/// Delivery stopped because the cancellation future resolved.
	pub cancelled: bool,
}

/// Runs a transport with a fixed per-request timeout and reports one
/// outcome per attempted request.
#[derive(Clone)]
pub struct Sender {
	transport: Arc<dyn Transport>,
	timeout: Duration,
}

impl Sender {
	pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
		Self { transport, timeout }
	}

	pub fn timeout(&self) -> Duration {
		self.timeout
	}

	/// Delivers `requests` oldest first and stops at the first failure, so
	/// a newer row never reaches the backend ahead of an older pending one.
	/// Requests after the failure get no outcome. Expiry of the timeout
	/// counts as a failure.
	pub async fn send(&self, requests: &[DeliveryRequest]) -> Vec<DeliveryOutcome> {
		self.send_until(requests, std::future::pending()).await.outcomes
	}

	/// Like [`Sender::send`], but gives up as soon as `cancelled` resolves.
	/// The request in flight at that point gets no outcome.
	pub async fn send_until(
		&self,
		requests: &[DeliveryRequest],
		cancelled: impl Future<Output = ()>,
	) -> BatchOutcome {
		tokio::pin!(cancelled);
		let mut outcomes = Vec::with_capacity(requests.len());

		for request in requests {
			let result = tokio::select! {
				biased;
				_ = &mut cancelled => {
					debug!(remaining = requests.len() - outcomes.len(), "delivery cancelled");
					return BatchOutcome {
						outcomes,
						cancelled: true,
					};
				}
				result = tokio::time::timeout(self.timeout, self.transport.deliver(request)) => {
					match result {
						Ok(result) => result,
						Err(_) => Err(DeliveryError::Timeout(self.timeout)),
					}
				}
			};

			match result {
				Ok(()) => {
					debug!(row_id = %request.id, kind = %request.kind(), "delivered");
					outcomes.push(DeliveryOutcome::delivered(request));
				}
				Err(e) => {
					outcomes.push(DeliveryOutcome::failed(request));
					warn!(
						row_id = %request.id,
						kind = %request.kind(),
						attempts = request.sent_attempts,
						skipped = requests.len() - outcomes.len(),
						error = %e,
						"delivery failed"
					);
					break;
				}
			}
		}

		BatchOutcome {
			outcomes,
			cancelled: false,
		}
	}
}
