// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # vimwatch-core
//!
//! Core abstractions shared by every vimwatch crate.
//!
//! - **Error**: the [`VimError`] taxonomy (configuration, trust, auth,
//!   transport, server fault, cache, cancellation)
//! - **Types**: [`ManagedObjectReference`], [`Value`], [`Endpoint`], [`Secret`]
//! - **Collector**: property filter specs and update sets
//! - **RPC**: typed [`Request`]/[`Response`] and the [`Transport`] trait
//! - **Retry**: [`RetryTransport`], bounded retry of idempotent requests
//!
//! ## Example
//!
//! ```rust,ignore
//! use vimwatch_core::{Envelope, Request, RetryTransport, Transport};
//!
//! let transport = RetryTransport::new(my_transport);
//! let now = transport
//!     .round_trip(&Envelope::anonymous(Request::CurrentTime))
//!     .await?
//!     .into_time()?;
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod collector;
pub mod error;
pub mod retry;
pub mod rpc;
pub mod types;

// =============================================================================
// Re-exports for convenience
// =============================================================================

pub use collector::{
    ChangeOp, FilterSpec, ObjectSpec, ObjectUpdate, ObjectUpdateKind, PropertyChange,
    PropertyFilterUpdate, PropertySpec, TraversalSpec, UpdateSet, WaitOptions,
};
pub use error::{
    ErrorCategory, ErrorCode, ErrorSeverity, FaultKind, TransportErrorKind, VimError, VimResult,
};
pub use retry::{RetryMetrics, RetryMetricsSnapshot, RetryTransport, DEFAULT_MAX_ATTEMPTS};
pub use rpc::{
    AboutInfo, Envelope, LoginResult, Request, Response, Transport, UserSession, Verification,
};
pub use types::{Endpoint, ManagedObjectReference, Secret, Value};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
