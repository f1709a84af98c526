// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Entry point for command code: connect once, then watch and close.
//!
//! ```text
//! connect(endpoint, credentials, trust)
//!     │
//!     ├── TrustStore ──▶ HttpTransport ──▶ RetryTransport
//!     ├── SessionManager::connect   (restore or login)
//!     └── KeepaliveController::start
//!             │
//!             ▼
//!       SessionHandle ── watch / watch_cancellable / close / logout
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use vimwatch_core::{
    RetryMetricsSnapshot, RetryTransport, Secret, Transport, Verification, VimError, VimResult,
    DEFAULT_MAX_ATTEMPTS,
};

use crate::cancel::{CancellationCoordinator, InterruptSource};
use crate::property::{BatchHandler, Filter, PropertyEngine, WatchPolicy, WatchSummary};
use crate::session::{
    CredentialSpec, KeepaliveController, Session, SessionManager, SessionOptions,
};

#[cfg(feature = "http")]
use crate::{
    transport::{HttpTransport, DEFAULT_HANDSHAKE_TIMEOUT},
    trust::{TrustPolicy, TrustStore},
};
#[cfg(feature = "http")]
use vimwatch_core::Endpoint;

/// Connection settings beyond credentials and trust.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Persist and reuse sessions.
    pub persist: bool,
    /// Session cache directory.
    pub cache_dir: Option<PathBuf>,
    /// Run the keepalive timer.
    pub keepalive: bool,
    /// Keepalive interval override.
    pub keepalive_interval: Option<Duration>,
    /// Total attempts for idempotent requests.
    pub max_attempts: u32,
    /// Connect and TLS handshake timeout.
    pub handshake_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            persist: true,
            cache_dir: None,
            keepalive: true,
            keepalive_interval: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// Connects over HTTPS, verifying the server according to `trust`.
#[cfg(feature = "http")]
pub async fn connect(
    endpoint: Endpoint,
    credentials: CredentialSpec,
    trust: TrustPolicy,
    options: ConnectOptions,
) -> VimResult<SessionHandle> {
    let store = Arc::new(TrustStore::from_policy(&trust).await?);
    let identity = credentials
        .client_certificate()
        .or(trust.client_certificate.as_ref());
    let timeout = if options.handshake_timeout.is_zero() {
        DEFAULT_HANDSHAKE_TIMEOUT
    } else {
        options.handshake_timeout
    };
    let transport = HttpTransport::new(endpoint, store, identity, timeout)?;
    connect_with_transport(Arc::new(transport), credentials, trust.insecure, options).await
}

/// Connects over an existing transport. `insecure` records whether the
/// transport skips certificate verification; it is part of the cache key.
pub async fn connect_with_transport(
    transport: Arc<dyn Transport>,
    credentials: CredentialSpec,
    insecure: bool,
    options: ConnectOptions,
) -> VimResult<SessionHandle> {
    if options.max_attempts == 0 {
        return Err(VimError::configuration("retry.max_attempts", "must be at least 1"));
    }

    let retry = Arc::new(RetryTransport::with_max_attempts(
        transport,
        options.max_attempts,
    ));
    let manager = Arc::new(SessionManager::new(
        retry.clone(),
        credentials,
        SessionOptions {
            persist: options.persist,
            insecure,
            cache_dir: options.cache_dir,
        },
    ));

    let session = manager.connect().await?;
    tracing::info!(
        endpoint = %manager.endpoint(),
        restored = session.restored,
        api_version = %session.api_version,
        "Connected"
    );

    let keepalive = if options.keepalive {
        let controller = KeepaliveController::new(manager.clone(), options.keepalive_interval);
        controller.start().await?;
        Some(controller)
    } else {
        None
    };

    Ok(SessionHandle {
        engine: PropertyEngine::new(manager.clone()),
        manager,
        keepalive,
        retry,
    })
}

// =============================================================================
// SessionHandle
// =============================================================================

/// A live session with its keepalive timer.
#[derive(Debug)]
pub struct SessionHandle {
    manager: Arc<SessionManager>,
    keepalive: Option<KeepaliveController>,
    engine: PropertyEngine,
    retry: Arc<RetryTransport<Arc<dyn Transport>>>,
}

impl SessionHandle {
    /// The session manager.
    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// The property engine bound to this session.
    pub fn engine(&self) -> &PropertyEngine {
        &self.engine
    }

    /// The keepalive timer, when enabled.
    pub fn keepalive(&self) -> Option<&KeepaliveController> {
        self.keepalive.as_ref()
    }

    /// Current session.
    pub async fn session(&self) -> Option<Session> {
        self.manager.current().await
    }

    /// Current session cookie.
    pub async fn cookie(&self) -> Option<Secret> {
        self.manager.cookie().await
    }

    /// How the server identity was established.
    pub fn verification(&self) -> Verification {
        self.manager.verification()
    }

    /// Retry counters of the underlying transport.
    pub fn retry_metrics(&self) -> RetryMetricsSnapshot {
        self.retry.metrics().snapshot()
    }

    /// Issues a clone ticket for handing the session to another process.
    pub async fn clone_ticket(&self) -> VimResult<Secret> {
        self.manager.acquire_clone_ticket().await
    }

    /// Watches until the policy is satisfied or an error occurs.
    pub async fn watch<H>(
        &self,
        filter: &Filter,
        policy: &WatchPolicy,
        handler: &mut H,
    ) -> VimResult<WatchSummary>
    where
        H: BatchHandler + ?Sized,
    {
        self.engine
            .watch(filter, policy, handler, &CancellationToken::new())
            .await
    }

    /// Watches under `coordinator`, so an interrupt ends the watch after its
    /// cleanup has run.
    pub async fn watch_cancellable<S, H>(
        &self,
        coordinator: &CancellationCoordinator<S>,
        filter: &Filter,
        policy: &WatchPolicy,
        handler: &mut H,
    ) -> VimResult<WatchSummary>
    where
        S: InterruptSource,
        H: BatchHandler + ?Sized,
    {
        coordinator
            .run_cancellable(|token| async move {
                self.engine.watch(filter, policy, handler, &token).await
            })
            .await
    }

    /// Stops the keepalive timer and releases the session. A persistent
    /// session stays valid on the server for the next invocation.
    pub async fn close(self) -> VimResult<()> {
        if let Some(keepalive) = &self.keepalive {
            keepalive.stop().await;
        }
        self.manager.close().await
    }

    /// Stops the keepalive timer and ends the session on the server.
    pub async fn logout(self) -> VimResult<()> {
        if let Some(keepalive) = &self.keepalive {
            keepalive.stop().await;
        }
        self.manager.logout().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{KeepaliveState, SessionState};
    use crate::testing::FakeServer;

    fn options(keepalive: bool) -> ConnectOptions {
        ConnectOptions {
            persist: false,
            keepalive,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_connect_and_close_passthrough() {
        let server = FakeServer::new();
        let handle = connect_with_transport(
            server.clone(),
            CredentialSpec::password("root", "secret"),
            false,
            options(false),
        )
        .await
        .unwrap();

        assert!(handle.session().await.unwrap().is_authenticated());
        assert!(handle.keepalive().is_none());
        assert_eq!(handle.verification(), Verification::Verified);

        let manager = handle.manager().clone();
        handle.close().await.unwrap();
        assert_eq!(server.count("Logout"), 1);
        assert_eq!(manager.state().await, SessionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_keepalive() {
        let server = FakeServer::new();
        let handle = connect_with_transport(
            server.clone(),
            CredentialSpec::password("root", "secret"),
            false,
            options(true),
        )
        .await
        .unwrap();
        assert_eq!(
            handle.keepalive().map(|k| k.state()),
            Some(KeepaliveState::Running)
        );

        handle.close().await.unwrap();
        let ticks = server.count("CurrentTime");
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(server.count("CurrentTime"), ticks);
    }

    #[tokio::test]
    async fn test_bad_credentials_fail_connect() {
        let server = FakeServer::new();
        let err = connect_with_transport(
            server,
            CredentialSpec::password("root", "nope"),
            false,
            options(true),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, VimError::Auth { .. }));
    }

    #[tokio::test]
    async fn test_zero_attempts_rejected() {
        let server = FakeServer::new();
        let err = connect_with_transport(
            server.clone(),
            CredentialSpec::password("root", "secret"),
            false,
            ConnectOptions {
                max_attempts: 0,
                ..options(false)
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, VimError::Configuration { .. }));
        assert_eq!(server.count("Login"), 0);
    }
}
