// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Shared HTTP utilities for the Beacon agent.
//!
//! This crate provides:
//! - A pre-configured HTTP client with a consistent User-Agent header
//! - Retry logic with exponential backoff for transient failures
//! - The capped backoff calculation reused by the delivery scheduler

mod client;
mod retry;

pub use client::{builder, new_client_with_timeout, user_agent};
pub use retry::{backoff_delay, retry, RetryConfig, RetryableError};
