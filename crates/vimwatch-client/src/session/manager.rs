// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Session lifecycle management.
//!
//! The [`SessionManager`] owns the credentials, the authenticated session
//! handle and the on-disk cache. It is the only component that mutates the
//! session; keepalive and the property engine read the cookie and ask the
//! manager to re-login when the server reports expiry.
//!
//! ```text
//!  Disconnected ──login/restore──▶ Connecting ──ok──▶ Authenticated
//!                                      │                 │    ▲
//!                                      │ err             │    │ ok
//!                                      ▼        expired  ▼    │
//!                                   Failed ◀──err──── Renewing
//!
//!  Authenticated ──logout/close──▶ Closed
//! ```
//!
//! Re-login is serialized by an authentication lock. A caller passes the
//! cookie it saw fail; if another task already replaced it, the fresh
//! session is returned without a second login.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, RwLock};
use vimwatch_core::{
    Endpoint, Envelope, FaultKind, Request, Response, Secret, Transport, Verification, VimError,
    VimResult,
};

use super::cache::{CachedSession, SessionCache};
use super::credentials::{CredentialKind, CredentialSpec};

/// Session timeout assumed when the server does not advertise one.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

// =============================================================================
// SessionState
// =============================================================================

/// Lifecycle state of the managed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session yet.
    #[default]
    Disconnected,

    /// Login or restore in progress.
    Connecting,

    /// Session is authenticated and usable.
    Authenticated,

    /// Re-login after expiry in progress.
    Renewing,

    /// Session was closed or logged out.
    Closed,

    /// Login or re-login failed.
    Failed,
}

impl SessionState {
    /// Returns `true` if requests can be issued.
    #[inline]
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Authenticated | Self::Renewing)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Authenticated => write!(f, "Authenticated"),
            Self::Renewing => write!(f, "Renewing"),
            Self::Closed => write!(f, "Closed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

// =============================================================================
// Session
// =============================================================================

/// Authentication state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    /// Connected but not logged in.
    #[default]
    Anonymous,
    /// Logged in.
    Authenticated,
}

/// An established session.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Endpoint the session belongs to.
    pub endpoint: Endpoint,
    /// Negotiated API version.
    pub api_version: String,
    /// Authentication state.
    pub auth: AuthState,
    /// Whether the session is written to the cache and survives `close`.
    pub persistent: bool,
    /// Session cookie.
    pub cookie: Option<Secret>,
    /// Server-reported user name.
    pub user: Option<String>,
    /// Server idle timeout, when advertised.
    pub session_timeout: Option<Duration>,
    /// `true` when the session was adopted from the cache.
    pub restored: bool,
}

impl Session {
    /// Returns `true` when logged in.
    pub fn is_authenticated(&self) -> bool {
        self.auth == AuthState::Authenticated && self.cookie.is_some()
    }

    /// Idle timeout, falling back to [`DEFAULT_SESSION_TIMEOUT`].
    pub fn effective_timeout(&self) -> Duration {
        self.session_timeout.unwrap_or(DEFAULT_SESSION_TIMEOUT)
    }
}

/// Health signal observed by long-running consumers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionHealth {
    /// Session usable.
    #[default]
    Healthy,
    /// Session expired and could not be repaired.
    Lost {
        /// Why re-login failed.
        reason: String,
    },
}

// =============================================================================
// SessionOptions
// =============================================================================

/// Construction options for [`SessionManager`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Persist sessions to the cache and keep them alive across `close`.
    pub persist: bool,
    /// The transport skips certificate verification; part of the cache key.
    pub insecure: bool,
    /// Cache directory. Without one, persistence is disabled.
    pub cache_dir: Option<PathBuf>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            persist: true,
            insecure: false,
            cache_dir: None,
        }
    }
}

// =============================================================================
// SessionManager
// =============================================================================

/// Owns the authenticated session for one endpoint.
///
/// # Thread Safety
///
/// The manager is shared as `Arc<SessionManager>` between the caller, the
/// keepalive task and the property engine.
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    credentials: CredentialSpec,
    insecure: bool,
    cache: Option<SessionCache>,
    state: RwLock<SessionState>,
    session: RwLock<Option<Session>>,
    auth_lock: Mutex<()>,
    health: watch::Sender<SessionHealth>,
    stats: SessionStats,
}

impl SessionManager {
    /// Creates a manager. No network traffic happens until [`SessionManager::login`]
    /// or [`SessionManager::restore`].
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: CredentialSpec,
        options: SessionOptions,
    ) -> Self {
        let cache = match (options.persist, options.cache_dir) {
            (true, Some(dir)) => Some(SessionCache::new(dir)),
            (true, None) => {
                tracing::debug!("No session cache directory; persistence disabled");
                None
            }
            (false, _) => None,
        };
        let (health, _) = watch::channel(SessionHealth::Healthy);

        Self {
            transport,
            credentials,
            insecure: options.insecure,
            cache,
            state: RwLock::new(SessionState::Disconnected),
            session: RwLock::new(None),
            auth_lock: Mutex::new(()),
            health,
            stats: SessionStats::new(),
        }
    }

    /// The endpoint.
    pub fn endpoint(&self) -> &Endpoint {
        self.transport.endpoint()
    }

    /// The transport requests go through.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// How the transport verified the server.
    pub fn verification(&self) -> Verification {
        self.transport.verification()
    }

    /// The login strategy in use.
    pub fn credential_kind(&self) -> CredentialKind {
        self.credentials.kind()
    }

    /// Returns `true` when sessions are cached and survive `close`.
    pub fn is_persistent(&self) -> bool {
        self.cache.is_some()
    }

    /// The cache, when persistence is enabled.
    pub fn cache(&self) -> Option<&SessionCache> {
        self.cache.as_ref()
    }

    /// Cache key for this endpoint and identity.
    pub fn cache_key(&self) -> String {
        SessionCache::key(self.endpoint(), self.credentials.identity(), self.insecure)
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    /// The current session, if any.
    pub async fn current(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    /// The current session cookie, if authenticated.
    pub async fn cookie(&self) -> Option<Secret> {
        self.session
            .read()
            .await
            .as_ref()
            .filter(|s| s.is_authenticated())
            .and_then(|s| s.cookie.clone())
    }

    /// Session statistics.
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Subscribes to health changes.
    pub fn subscribe_health(&self) -> watch::Receiver<SessionHealth> {
        self.health.subscribe()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Restores a cached session, falling back to a fresh login, and
    /// persists the result.
    pub async fn connect(&self) -> VimResult<Session> {
        if self.credentials.kind() != CredentialKind::Cookie {
            match self.restore().await {
                Ok(session) => return Ok(session),
                Err(VimError::NotFound { .. }) => {}
                Err(e @ VimError::Cache { .. }) => e.log("session restore"),
                Err(e) => return Err(e),
            }
        }

        let session = self.login().await?;
        if let Err(e) = self.persist(&session).await {
            e.log("session persist");
        }
        Ok(session)
    }

    /// Logs in with the configured credentials.
    pub async fn login(&self) -> VimResult<Session> {
        let _guard = self.auth_lock.lock().await;
        self.login_locked(false).await
    }

    /// Adopts a cached session for this endpoint and identity after
    /// confirming it is still alive.
    ///
    /// Returns [`VimError::NotFound`] in passthrough mode, on a cache miss,
    /// and when the server no longer recognizes the session (the entry is
    /// removed in that case).
    pub async fn restore(&self) -> VimResult<Session> {
        let key = self.cache_key();
        let Some(cache) = &self.cache else {
            return Err(VimError::not_found(key));
        };

        let _guard = self.auth_lock.lock().await;

        let Some(mut entry) = cache.load(&key).await? else {
            self.stats.record_restore_miss();
            return Err(VimError::not_found(key));
        };

        if entry.endpoint != *self.endpoint() {
            tracing::warn!(key = %key, "Cached session belongs to another endpoint");
            cache.remove(&key).await?;
            self.stats.record_restore_miss();
            return Err(VimError::not_found(key));
        }

        let liveness = self
            .transport
            .round_trip(&Envelope::with_cookie(Request::UserSession, entry.cookie.clone()))
            .await
            .and_then(Response::into_session);

        let user_session = match liveness {
            Ok(Some(user_session)) => user_session,
            Ok(None) => return self.discard(cache, &key, "no current user").await,
            Err(e) if is_dead_session(&e) => {
                return self.discard(cache, &key, &e.to_string()).await
            }
            Err(e) => return Err(e),
        };

        entry.last_verified = Utc::now();
        entry.user = entry.user.or(Some(user_session.user_name.clone()));
        if let Err(e) = cache.store(&key, &entry).await {
            e.log("session cache refresh");
        }

        let session = Session {
            endpoint: entry.endpoint,
            api_version: entry.api_version,
            auth: AuthState::Authenticated,
            persistent: true,
            cookie: Some(entry.cookie),
            user: Some(user_session.user_name),
            session_timeout: entry.session_timeout_secs.map(Duration::from_secs),
            restored: true,
        };
        self.install(session.clone()).await;
        self.stats.record_restore();

        tracing::info!(
            endpoint = %self.endpoint(),
            user = session.user.as_deref().unwrap_or(""),
            "Restored cached session"
        );
        Ok(session)
    }

    /// Writes `session` to the cache. No-op in passthrough mode.
    pub async fn persist(&self, session: &Session) -> VimResult<()> {
        let (Some(cache), true) = (&self.cache, session.persistent) else {
            return Ok(());
        };
        let Some(cookie) = session.cookie.clone() else {
            return Ok(());
        };

        let entry = CachedSession {
            endpoint: session.endpoint.clone(),
            user: self
                .credentials
                .identity()
                .map(str::to_string)
                .or_else(|| session.user.clone()),
            cookie,
            api_version: session.api_version.clone(),
            session_timeout_secs: session.session_timeout.map(|t| t.as_secs()),
            insecure: self.insecure,
            last_verified: Utc::now(),
        };
        cache.store(&self.cache_key(), &entry).await
    }

    /// Ends the session server-side and removes the cache entry.
    pub async fn logout(&self) -> VimResult<()> {
        let _guard = self.auth_lock.lock().await;

        if let Some(cookie) = self.cookie().await {
            match self
                .transport
                .round_trip(&Envelope::with_cookie(Request::Logout, cookie))
                .await
            {
                Ok(_) => {}
                Err(e) if is_dead_session(&e) => {
                    tracing::debug!("Session already gone at logout");
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(cache) = &self.cache {
            cache.remove(&self.cache_key()).await?;
        }

        *self.session.write().await = None;
        self.stats.record_logout();
        self.set_state(SessionState::Closed).await;

        tracing::info!(endpoint = %self.endpoint(), "Logged out");
        Ok(())
    }

    /// Releases the session.
    ///
    /// A persistent session stays alive server-side so the next invocation
    /// can restore it; in passthrough mode this is a real logout.
    pub async fn close(&self) -> VimResult<()> {
        if self.is_persistent() {
            self.set_state(SessionState::Closed).await;
            tracing::debug!(endpoint = %self.endpoint(), "Closed persistent session locally");
            return Ok(());
        }
        self.logout().await
    }

    /// Re-authenticates after `stale` was rejected by the server.
    ///
    /// If the current cookie differs from `stale`, another task already
    /// renewed the session and it is returned unchanged. On failure the
    /// session is marked lost for every health subscriber.
    pub async fn relogin(&self, stale: Option<&Secret>) -> VimResult<Session> {
        let _guard = self.auth_lock.lock().await;

        if let Some(current) = self.session.read().await.as_ref() {
            if current.is_authenticated() && current.cookie.as_ref() != stale {
                return Ok(current.clone());
            }
        }

        self.set_state(SessionState::Renewing).await;
        self.stats.record_relogin();
        tracing::info!(endpoint = %self.endpoint(), "Session expired, logging in again");

        let result = match &self.credentials {
            CredentialSpec::Cookie { .. } => Err(VimError::auth(
                "session cookie expired and cannot be renewed",
            )),
            CredentialSpec::Ticket { .. } => Err(VimError::auth(
                "clone ticket already used; session cannot be renewed",
            )),
            CredentialSpec::Password { .. }
            | CredentialSpec::Certificate { .. }
            | CredentialSpec::Token { .. } => self.login_locked(true).await,
        };

        match result {
            Ok(session) => {
                if let Err(e) = self.persist(&session).await {
                    e.log("session persist after relogin");
                }
                Ok(session)
            }
            Err(e) => {
                self.stats.record_relogin_failure();
                self.set_state(SessionState::Failed).await;
                self.mark_lost(e.to_string());
                Err(e)
            }
        }
    }

    /// Sends `request` with the current session cookie.
    pub async fn call(&self, request: Request) -> VimResult<Response> {
        let cookie = self.cookie().await.ok_or_else(VimError::not_authenticated)?;
        self.transport
            .round_trip(&Envelope::with_cookie(request, cookie))
            .await
    }

    /// Issues a one-time clone ticket for the current session.
    pub async fn acquire_clone_ticket(&self) -> VimResult<Secret> {
        self.call(Request::AcquireCloneTicket).await?.into_ticket()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn login_locked(&self, renewing: bool) -> VimResult<Session> {
        if !renewing {
            self.set_state(SessionState::Connecting).await;
        }

        let result = self.authenticate().await;
        match result {
            Ok(session) => {
                self.install(session.clone()).await;
                self.stats.record_login();
                tracing::info!(
                    endpoint = %self.endpoint(),
                    strategy = %self.credentials.kind(),
                    api_version = %session.api_version,
                    "Logged in"
                );
                Ok(session)
            }
            Err(e) => {
                self.stats.record_login_failure();
                if !renewing {
                    self.set_state(SessionState::Failed).await;
                }
                e.log("login");
                Err(e)
            }
        }
    }

    async fn authenticate(&self) -> VimResult<Session> {
        let about = self
            .transport
            .round_trip(&Envelope::anonymous(Request::RetrieveServiceContent))
            .await?
            .into_about()?;

        let (cookie, user) = match &self.credentials {
            CredentialSpec::Cookie { cookie } => {
                let current = self
                    .transport
                    .round_trip(&Envelope::with_cookie(Request::UserSession, cookie.clone()))
                    .await
                    .and_then(Response::into_session)
                    .map_err(into_auth_error)?
                    .ok_or_else(|| VimError::auth("session cookie is not authenticated"))?;
                (cookie.clone(), current.user_name)
            }
            CredentialSpec::Password { username, password } => {
                self.exchange(Request::Login {
                    user_name: username.clone(),
                    password: password.clone(),
                })
                .await?
            }
            CredentialSpec::Certificate { extension_key, .. } => {
                self.exchange(Request::LoginExtensionByCertificate {
                    extension_key: extension_key.clone(),
                })
                .await?
            }
            CredentialSpec::Ticket { ticket } => {
                self.exchange(Request::CloneSession {
                    clone_ticket: ticket.clone(),
                })
                .await?
            }
            CredentialSpec::Token { token } => {
                self.exchange(Request::LoginByToken {
                    token: token.clone(),
                })
                .await?
            }
        };

        Ok(Session {
            endpoint: self.endpoint().clone(),
            api_version: about.api_version,
            auth: AuthState::Authenticated,
            persistent: self.is_persistent(),
            cookie: Some(cookie),
            user: Some(user),
            session_timeout: about.session_timeout_secs.map(Duration::from_secs),
            restored: false,
        })
    }

    async fn exchange(&self, request: Request) -> VimResult<(Secret, String)> {
        let result = self
            .transport
            .round_trip(&Envelope::anonymous(request))
            .await
            .and_then(Response::into_login)
            .map_err(into_auth_error)?;
        Ok((result.cookie, result.session.user_name))
    }

    async fn install(&self, session: Session) {
        *self.session.write().await = Some(session);
        self.set_state(SessionState::Authenticated).await;
        self.health.send_replace(SessionHealth::Healthy);
    }

    async fn discard(&self, cache: &SessionCache, key: &str, reason: &str) -> VimResult<Session> {
        tracing::info!(key = %key, reason, "Cached session is no longer valid");
        cache.remove(key).await?;
        self.stats.record_restore_miss();
        Err(VimError::not_found(key))
    }

    fn mark_lost(&self, reason: String) {
        tracing::warn!(endpoint = %self.endpoint(), reason = %reason, "Session lost");
        self.health.send_replace(SessionHealth::Lost { reason });
    }

    async fn set_state(&self, new_state: SessionState) {
        let old_state = {
            let mut state = self.state.write().await;
            let old = *state;
            *state = new_state;
            old
        };

        if old_state != new_state {
            tracing::trace!(
                old_state = %old_state,
                new_state = %new_state,
                "Session state changed"
            );
        }
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("endpoint", self.endpoint())
            .field("credentials", &self.credentials.kind())
            .field("persistent", &self.is_persistent())
            .finish()
    }
}

/// Faults meaning the server no longer knows the session.
fn is_dead_session(err: &VimError) -> bool {
    err.is_session_expired()
        || matches!(
            err,
            VimError::Fault {
                fault: FaultKind::ManagedObjectNotFound,
                ..
            }
        )
}

/// Credential rejections become [`VimError::Auth`] with the server's reason;
/// trust and network failures keep their own kind.
fn into_auth_error(err: VimError) -> VimError {
    match err {
        VimError::Fault {
            fault: FaultKind::InvalidLogin | FaultKind::NotAuthenticated,
            message,
        } => VimError::auth(message),
        other => other,
    }
}

// =============================================================================
// SessionStats
// =============================================================================

/// Statistics for session operations.
#[derive(Debug, Default)]
pub struct SessionStats {
    logins: AtomicU64,
    login_failures: AtomicU64,
    restores: AtomicU64,
    restore_misses: AtomicU64,
    relogins: AtomicU64,
    relogin_failures: AtomicU64,
    logouts: AtomicU64,
}

impl SessionStats {
    /// Creates zeroed statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successful login.
    pub fn record_login(&self) {
        self.logins.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed login.
    pub fn record_login_failure(&self) {
        self.login_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a restored session.
    pub fn record_restore(&self) {
        self.restores.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a restore that found nothing usable.
    pub fn record_restore_miss(&self) {
        self.restore_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a re-login attempt.
    pub fn record_relogin(&self) {
        self.relogins.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed re-login.
    pub fn record_relogin_failure(&self) {
        self.relogin_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a logout.
    pub fn record_logout(&self) {
        self.logouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Successful logins, including re-logins.
    pub fn logins(&self) -> u64 {
        self.logins.load(Ordering::Relaxed)
    }

    /// Failed logins.
    pub fn login_failures(&self) -> u64 {
        self.login_failures.load(Ordering::Relaxed)
    }

    /// Sessions adopted from the cache.
    pub fn restores(&self) -> u64 {
        self.restores.load(Ordering::Relaxed)
    }

    /// Restores that found no usable session.
    pub fn restore_misses(&self) -> u64 {
        self.restore_misses.load(Ordering::Relaxed)
    }

    /// Re-login attempts.
    pub fn relogins(&self) -> u64 {
        self.relogins.load(Ordering::Relaxed)
    }

    /// Failed re-logins.
    pub fn relogin_failures(&self) -> u64 {
        self.relogin_failures.load(Ordering::Relaxed)
    }

    /// Logouts.
    pub fn logouts(&self) -> u64 {
        self.logouts.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeServer;

    fn manager(server: &Arc<FakeServer>, cache_dir: Option<PathBuf>) -> SessionManager {
        SessionManager::new(
            server.clone(),
            CredentialSpec::password("root", "secret"),
            SessionOptions {
                persist: cache_dir.is_some(),
                insecure: false,
                cache_dir,
            },
        )
    }

    #[tokio::test]
    async fn test_login_authenticates() {
        let server = FakeServer::new();
        let mgr = manager(&server, None);

        let session = mgr.login().await.unwrap();
        assert!(session.is_authenticated());
        assert_eq!(session.api_version, "8.0");
        assert_eq!(session.session_timeout, Some(Duration::from_secs(600)));
        assert_eq!(mgr.state().await, SessionState::Authenticated);
        assert_eq!(mgr.stats().logins(), 1);
    }

    #[tokio::test]
    async fn test_bad_password_is_auth_error() {
        let server = FakeServer::new();
        let mgr = SessionManager::new(
            server.clone(),
            CredentialSpec::password("root", "wrong"),
            SessionOptions::default(),
        );

        let err = mgr.login().await.unwrap_err();
        assert!(matches!(err, VimError::Auth { ref reason } if reason == "bad password"));
        assert_eq!(mgr.state().await, SessionState::Failed);
    }

    #[tokio::test]
    async fn test_persist_and_restore_without_login() {
        let dir = tempfile::tempdir().unwrap();
        let server = FakeServer::new();

        let first = manager(&server, Some(dir.path().to_path_buf()));
        let session = first.connect().await.unwrap();
        assert!(!session.restored);
        first.close().await.unwrap();

        let second = manager(&server, Some(dir.path().to_path_buf()));
        let restored = second.connect().await.unwrap();
        assert!(restored.restored);
        assert_eq!(restored.cookie, session.cookie);
        assert_eq!(server.count("Login"), 1);
    }

    #[tokio::test]
    async fn test_restore_discards_expired_entry() {
        let dir = tempfile::tempdir().unwrap();
        let server = FakeServer::new();

        let first = manager(&server, Some(dir.path().to_path_buf()));
        first.connect().await.unwrap();
        server.expire_all();

        let second = manager(&server, Some(dir.path().to_path_buf()));
        assert!(matches!(
            second.restore().await,
            Err(VimError::NotFound { .. })
        ));
        let key = second.cache_key();
        assert!(!second.cache().unwrap().entry_path(&key).exists());
    }

    #[tokio::test]
    async fn test_passthrough_never_restores() {
        let server = FakeServer::new();
        let mgr = manager(&server, None);
        assert!(!mgr.is_persistent());
        assert!(matches!(mgr.restore().await, Err(VimError::NotFound { .. })));

        mgr.login().await.unwrap();
        mgr.close().await.unwrap();
        assert_eq!(server.count("Logout"), 1);
        assert!(mgr.current().await.is_none());
    }

    #[tokio::test]
    async fn test_relogin_is_shared() {
        let server = FakeServer::new();
        let mgr = manager(&server, None);
        let stale = mgr.login().await.unwrap().cookie;
        server.expire_all();

        let renewed = mgr.relogin(stale.as_ref()).await.unwrap();
        assert_ne!(renewed.cookie, stale);

        // A second caller holding the same stale cookie gets the new session.
        let again = mgr.relogin(stale.as_ref()).await.unwrap();
        assert_eq!(again.cookie, renewed.cookie);
        assert_eq!(server.count("Login"), 2);
    }

    #[tokio::test]
    async fn test_cookie_relogin_marks_session_lost() {
        let server = FakeServer::new();
        let cookie_source = manager(&server, None);
        let cookie = cookie_source.login().await.unwrap().cookie.unwrap();

        let mgr = SessionManager::new(
            server.clone(),
            CredentialSpec::Cookie { cookie: cookie.clone() },
            SessionOptions::default(),
        );
        mgr.login().await.unwrap();
        let mut health = mgr.subscribe_health();

        server.expire_all();
        let err = mgr.relogin(Some(&cookie)).await.unwrap_err();
        assert!(matches!(err, VimError::Auth { .. }));
        assert!(health.has_changed().unwrap());
        assert!(matches!(*health.borrow_and_update(), SessionHealth::Lost { .. }));
    }
}
