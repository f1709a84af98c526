// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # vimwatch-bin
//!
//! The `vimwatch` command-line client.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         main.rs                             │
//! └─────────────────────────┬───────────────────────────────────┘
//!                           │
//!                    ┌──────▼──────┐
//!                    │   cli.rs    │
//!                    └──────┬──────┘
//!                           │
//!               ┌───────────┼───────────┐
//!               ▼           ▼           ▼
//!        ┌──────────┐ ┌──────────┐ ┌──────────┐
//!        │ settings │ │ logging  │ │ commands │
//!        └──────────┘ └──────────┘ └────┬─────┘
//!                                       │
//!                              ┌────────▼────────┐
//!                              │ vimwatch-client │
//!                              └─────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Log in once; later invocations reuse the cached session
//! vimwatch -u https://admin@vc.example.com login
//!
//! # Wait until a VM powers on
//! vimwatch watch VirtualMachine:vm-42 -p runtime.powerState \
//!     --match runtime.powerState=poweredOn
//!
//! # Pin a server certificate
//! vimwatch trust vc.example.com
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Modules
// =============================================================================

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
pub mod settings;

// =============================================================================
// Re-exports
// =============================================================================

pub use cli::{Cli, Commands};
pub use commands::{execute, Completion};
pub use error::{report_error, report_error_and_exit, BinError, BinResult};
pub use logging::init_logging;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
