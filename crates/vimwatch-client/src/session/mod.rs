// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Session lifecycle: credentials, login strategies, the on-disk cache and
//! keepalive.

pub mod cache;
pub mod credentials;
pub mod keepalive;
pub mod manager;

pub use cache::{CachedSession, SessionCache};
pub use credentials::{CredentialKind, CredentialSource, CredentialSpec};
pub use keepalive::{KeepaliveController, KeepaliveState, KeepaliveStats, MIN_KEEPALIVE_INTERVAL};
pub use manager::{
    AuthState, Session, SessionHealth, SessionManager, SessionOptions, SessionState, SessionStats,
    DEFAULT_SESSION_TIMEOUT,
};
