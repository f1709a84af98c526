// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # vimwatch-client
//!
//! Session lifecycle and property subscriptions against a remote
//! managed-object service.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     connect() / SessionHandle                │
//! └──────────────┬──────────────────────────────┬────────────────┘
//!                │                              │
//!        ┌───────▼────────┐            ┌────────▼─────────┐
//!        │ SessionManager │◀───────────│ PropertyEngine   │
//!        │ (login, cache, │  relogin   │ (filter, wait,   │
//!        │  relogin)      │◀──┐        │  pages, resync)  │
//!        └───────┬────────┘   │        └────────┬─────────┘
//!                │            │                 │
//!        ┌───────▼────────┐ ┌─┴────────────┐    │
//!        │ RetryTransport │ │  Keepalive   │    │
//!        └───────┬────────┘ └──────────────┘    │
//!                │                               │
//!        ┌───────▼────────┐          ┌──────────▼────────────┐
//!        │ HttpTransport  │          │ CancellationCoordinator│
//!        │  + TrustStore  │          └───────────────────────┘
//!        └────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use vimwatch_client::{connect, ConnectOptions, CredentialSpec, Filter, FnHandler, WatchPolicy};
//! use vimwatch_client::trust::TrustPolicy;
//!
//! let handle = connect(endpoint, CredentialSpec::password("root", "secret"),
//!     TrustPolicy::default(), ConnectOptions::default()).await?;
//!
//! let filter = Filter::builder()
//!     .root("VirtualMachine:vm-42".parse()?)
//!     .property("VirtualMachine", "runtime.powerState")
//!     .build()?;
//! let mut print = FnHandler(|batch: &ChangeBatch| {
//!     println!("{:?}", batch.updates);
//!     Ok(Flow::Continue)
//! });
//! handle.watch(&filter, &WatchPolicy::new().count(2), &mut print).await?;
//! handle.close().await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Modules
// =============================================================================

pub mod cancel;
pub mod connect;
pub mod property;
pub mod session;
pub mod transport;
pub mod trust;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use cancel::{CancellationCoordinator, CtrlC, InterruptSource, ManualInterrupt};
#[cfg(feature = "http")]
pub use connect::connect;
pub use connect::{connect_with_transport, ConnectOptions, SessionHandle};
pub use property::{
    build_filter, BatchHandler, ChangeBatch, ChannelHandler, Filter, FilterBuilder, FilterRoot,
    Flow, FnHandler, PropertyEngine, PropertyMatch, StopReason, WatchPolicy, WatchSummary,
};
pub use session::{
    CredentialKind, CredentialSource, CredentialSpec, KeepaliveController, KeepaliveState,
    Session, SessionHealth, SessionManager, SessionOptions, SessionState,
};
pub use trust::{TrustPolicy, TrustRecord, TrustStore};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
