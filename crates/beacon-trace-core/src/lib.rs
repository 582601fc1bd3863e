// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the Beacon telemetry pipeline.
//!
//! This crate provides the data model shared by the agent (`beacon-trace`)
//! and the storage backends (`beacon-trace-db`):
//!
//! - Observations produced by collectors and listeners, including screen
//!   lifecycle views
//! - Wire records (spans and resource attributes) produced by normalizers
//! - The crash and trace envelopes that are queued and delivered
//! - Session and span/trace identifiers
//! - The row-store contract the durable send queue is built on

pub mod crash;
pub mod error;
pub mod ids;
pub mod observation;
pub mod queue;
pub mod record;
pub mod view;

pub use crash::{
	CrashEnvelope, CrashFrame, CrashMetadata, CrashReport, CrashThread, Resource, TraceEnvelope,
	RESOURCE_TYPE_MOBILE,
};
pub use error::{Result, TraceCoreError};
pub use ids::{make_row_id, make_span_id, make_trace_id, SessionId};
pub use observation::{Content, NetworkCall, Observation, SourceType};
pub use queue::{PayloadKind, QueueRow, QueueStore, RowUpdate};
pub use record::{labels, ResourceAttribute, Span, SpanKind, WireRecord};
pub use view::{ActivityState, ActivityView, FragmentState, FragmentStateEntry, FragmentView};
