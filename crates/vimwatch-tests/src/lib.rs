// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # vimwatch Integration Tests
//!
//! End-to-end tests of the client against [`SimulatedService`], an
//! in-memory object service that speaks the same request vocabulary as a
//! real server.
//!
//! [`SimulatedService`]: common::mocks::SimulatedService
//!
//! ## Running Tests
//!
//! ```bash
//! # Run all integration tests
//! cargo test -p vimwatch-tests
//!
//! # Run specific test suite
//! cargo test -p vimwatch-tests --test integration_session
//! cargo test -p vimwatch-tests --test integration_watch
//!
//! # Run with log output
//! RUST_LOG=vimwatch=trace cargo test -p vimwatch-tests -- --nocapture
//! ```
//!
//! ## Test Categories
//!
//! ### Session Tests (`integration_session.rs`)
//! - Cache persistence and restore
//! - Login strategies and clone ticket handoff
//! - Logout and passthrough close
//!
//! ### Retry Tests (`integration_retry.rs`)
//! - Transient failures on idempotent requests
//! - Non-idempotent requests fail fast
//!
//! ### Watch Tests (`integration_watch.rs`)
//! - Initial state, updates, paging, predicates
//! - Container views
//! - Transparent re-login and resynchronization
//!
//! ### Keepalive Tests (`integration_keepalive.rs`)
//! - Tick cadence, re-login, terminal failure
//!
//! ### Cancellation Tests (`integration_cancel.rs`)
//! - Interrupt during a blocked wait
//!
//! ### Config Tests (`integration_config.rs`)
//! - Layered loading from files and environment
//!
//! ## Writing New Tests
//!
//! ```rust,ignore
//! use vimwatch_tests::prelude::*;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let service = InventoryFixtures::service();
//!     let handle = connect_to(&service, CredentialFixtures::root(), OptionFixtures::passthrough())
//!         .await
//!         .unwrap();
//!     // ... test logic
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod common;

/// Re-export commonly used items for convenience.
pub mod prelude {
    pub use crate::common::fixtures::*;
    pub use crate::common::mocks::*;
    pub use crate::common::{init_test_logging, temp_test_dir};
}
