// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Concrete transports.

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::{fetch_thumbprint, HttpTransport, DEFAULT_HANDSHAKE_TIMEOUT, SESSION_COOKIE};
