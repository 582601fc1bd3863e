// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Retry logic with exponential backoff for HTTP requests.

use reqwest::StatusCode;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryConfig {
	pub max_attempts: u32,
	pub base_delay: Duration,
	pub max_delay: Duration,
	pub backoff_factor: f64,
	pub jitter: bool,
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			max_attempts: 2,
			base_delay: Duration::from_millis(200),
			max_delay: Duration::from_secs(5),
			backoff_factor: 2.0,
			jitter: true,
		}
	}
}

pub trait RetryableError {
	fn is_retryable(&self) -> bool;
}

const RETRYABLE_STATUSES: [StatusCode; 6] = [
	StatusCode::TOO_MANY_REQUESTS,
	StatusCode::REQUEST_TIMEOUT,
	StatusCode::INTERNAL_SERVER_ERROR,
	StatusCode::BAD_GATEWAY,
	StatusCode::SERVICE_UNAVAILABLE,
	StatusCode::GATEWAY_TIMEOUT,
];

impl RetryableError for reqwest::Error {
	fn is_retryable(&self) -> bool {
		if self.is_timeout() || self.is_connect() {
			return true;
		}

		self
			.status()
			.map(|status| RETRYABLE_STATUSES.contains(&status))
			.unwrap_or(false)
	}
}

/// Capped exponential delay for the given zero-based attempt.
///
/// With jitter enabled the result is scaled by a random factor in
/// `[0.5, 1.5)`.
pub fn backoff_delay(cfg: &RetryConfig, attempt: u32) -> Duration {
	let exponential_delay =
		cfg.base_delay.as_secs_f64() * cfg.backoff_factor.powi(attempt.min(i32::MAX as u32) as i32);
	let capped_delay = exponential_delay.min(cfg.max_delay.as_secs_f64());

	let final_delay = if cfg.jitter {
		let jitter_factor = 0.5 + fastrand::f64();
		capped_delay * jitter_factor
	} else {
		capped_delay
	};

	Duration::from_secs_f64(final_delay)
}

pub async fn retry<F, Fut, T, E>(cfg: &RetryConfig, mut f: F) -> Result<T, E>
where
	F: FnMut() -> Fut,
	Fut: std::future::Future<Output = Result<T, E>>,
	E: RetryableError + std::fmt::Debug,
{
	let mut attempt = 0;

	loop {
		match f().await {
			Ok(result) => return Ok(result),
			Err(err) => {
				attempt += 1;

				if !err.is_retryable() {
					warn!(
							error = ?err,
							attempt = attempt,
							"non-retryable error encountered"
					);
					return Err(err);
				}

				if attempt >= cfg.max_attempts {
					warn!(
							error = ?err,
							attempt = attempt,
							max_attempts = cfg.max_attempts,
							"max retry attempts exhausted"
					);
					return Err(err);
				}

				let delay = backoff_delay(cfg, attempt - 1);
				warn!(
						error = ?err,
						attempt = attempt,
						max_attempts = cfg.max_attempts,
						delay_ms = delay.as_millis(),
						"retrying after error"
				);

				tokio::time::sleep(delay).await;
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicU32, Ordering};
	use std::sync::Arc;

	#[derive(Debug)]
	struct MockError {
		retryable: bool,
	}

	impl RetryableError for MockError {
		fn is_retryable(&self) -> bool {
			self.retryable
		}
	}

	fn fast_config(max_attempts: u32) -> RetryConfig {
		RetryConfig {
			max_attempts,
			base_delay: Duration::from_millis(1),
			max_delay: Duration::from_millis(10),
			backoff_factor: 2.0,
			jitter: false,
		}
	}

	#[tokio::test]
	async fn test_non_retryable_error_fails_immediately() {
		let attempt_count = Arc::new(AtomicU32::new(0));
		let attempt_count_clone = Arc::clone(&attempt_count);

		let result: Result<(), MockError> = retry(&fast_config(3), || {
			let count = Arc::clone(&attempt_count_clone);
			async move {
				count.fetch_add(1, Ordering::SeqCst);
				Err(MockError { retryable: false })
			}
		})
		.await;

		assert!(result.is_err());
		assert_eq!(
			attempt_count.load(Ordering::SeqCst),
			1,
			"non-retryable error should only attempt once"
		);
	}

	#[tokio::test]
	async fn test_retryable_error_retries_up_to_max_attempts() {
		let attempt_count = Arc::new(AtomicU32::new(0));
		let attempt_count_clone = Arc::clone(&attempt_count);

		let result: Result<(), MockError> = retry(&fast_config(3), || {
			let count = Arc::clone(&attempt_count_clone);
			async move {
				count.fetch_add(1, Ordering::SeqCst);
				Err(MockError { retryable: true })
			}
		})
		.await;

		assert!(result.is_err());
		assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn test_succeeds_after_retries() {
		let attempt_count = Arc::new(AtomicU32::new(0));
		let attempt_count_clone = Arc::clone(&attempt_count);

		let result: Result<&str, MockError> = retry(&fast_config(5), || {
			let count = Arc::clone(&attempt_count_clone);
			async move {
				let current = count.fetch_add(1, Ordering::SeqCst);
				if current < 2 {
					Err(MockError { retryable: true })
				} else {
					Ok("success")
				}
			}
		})
		.await;

		assert_eq!(result.unwrap(), "success");
		assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
	}

	#[test]
	fn test_jitter_adds_randomness() {
		let cfg_with_jitter = RetryConfig {
			max_attempts: 3,
			base_delay: Duration::from_millis(100),
			max_delay: Duration::from_secs(5),
			backoff_factor: 2.0,
			jitter: true,
		};

		let cfg_without_jitter = RetryConfig {
			jitter: false,
			..cfg_with_jitter.clone()
		};

		let delays_without_jitter: Vec<Duration> = (0..10)
			.map(|_| backoff_delay(&cfg_without_jitter, 1))
			.collect();
		let delays_with_jitter: Vec<Duration> = (0..10)
			.map(|_| backoff_delay(&cfg_with_jitter, 1))
			.collect();

		assert!(delays_without_jitter.windows(2).all(|w| w[0] == w[1]));
		assert!(!delays_with_jitter.windows(2).all(|w| w[0] == w[1]));
	}

	#[test]
	fn test_delay_respects_max_delay() {
		let cfg = RetryConfig {
			max_attempts: 10,
			base_delay: Duration::from_secs(1),
			max_delay: Duration::from_secs(5),
			backoff_factor: 10.0,
			jitter: false,
		};

		for attempt in 0..40 {
			let delay = backoff_delay(&cfg, attempt);
			assert!(
				delay <= Duration::from_secs(5),
				"delay {delay:?} at attempt {attempt} exceeds max_delay"
			);
		}
	}

	#[test]
	fn test_delay_grows_exponentially_before_cap() {
		let cfg = RetryConfig {
			jitter: false,
			..RetryConfig::default()
		};

		assert_eq!(backoff_delay(&cfg, 0), Duration::from_millis(200));
		assert_eq!(backoff_delay(&cfg, 1), Duration::from_millis(400));
		assert_eq!(backoff_delay(&cfg, 2), Duration::from_millis(800));
	}
}
