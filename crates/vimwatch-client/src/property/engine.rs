// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The property subscription loop.
//!
//! # Flow
//!
//! ```text
//! register filter (view first for container roots)
//!        │
//!        ▼
//! ┌──▶ WaitForUpdates(version) ──── cancel / deadline ──▶ CancelWaitForUpdates,
//! │          │                                           await the poll, return
//! │          ▼
//! │    page ──▶ handler.on_batch
//! │          │
//! │    truncated? ──yes──▶ same batch, next page (not counted)
//! │          │ no
//! │          ▼
//! │    batch complete: count, match, handler stop, deadline
//! └──────────┘
//!        │
//!        ▼
//! destroy filter and view (every exit path)
//! ```
//!
//! A `NotAuthenticated` fault from the wait triggers one re-login. The
//! filter is registered again and the server replays the full state, which
//! is reduced against a [`Snapshot`] so the handler only sees what actually
//! changed while the session was gone. A session that has already lapsed
//! when the watch registers gets the same single re-login. A second expiry
//! straight after a re-login is reported as [`VimError::Auth`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use vimwatch_core::{
    Envelope, ManagedObjectReference, ObjectUpdate, Request, Response, Secret, VimError,
    VimResult, WaitOptions,
};

use super::filter::{Filter, FilterRoot};
use super::handler::{BatchHandler, Flow};
use super::policy::WatchPolicy;
use super::update::{group_updates, ChangeBatch, Snapshot};
use crate::session::{SessionHealth, SessionManager};

// =============================================================================
// Summary
// =============================================================================

/// Why a watch ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The policy's batch count was reached.
    CountReached,
    /// A batch matched the predicate.
    Matched,
    /// The policy timeout elapsed.
    TimedOut,
    /// The handler asked to stop.
    HandlerStopped,
    /// A single-check wait found nothing more.
    Exhausted,
}

/// Outcome of a completed watch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchSummary {
    /// Logical batches delivered, including the initial state.
    pub batches: u64,
    /// Pages delivered.
    pub pages: u64,
    /// Transparent re-logins performed.
    pub relogins: u32,
    /// Why the watch ended.
    pub reason: StopReason,
}

// =============================================================================
// PropertyEngine
// =============================================================================

/// Runs watches against the session's property collector.
#[derive(Debug, Clone)]
pub struct PropertyEngine {
    session: Arc<SessionManager>,
    stats: Arc<EngineStats>,
}

#[derive(Debug)]
struct Registration {
    filter: ManagedObjectReference,
    view: Option<ManagedObjectReference>,
}

enum Interrupt {
    Cancelled,
    Deadline,
    Lost(String),
    Done(VimResult<Response>),
}

/// Per-watch loop state.
struct Cursor {
    version: String,
    sequence: u64,
    page: u32,
    in_batch: bool,
    initial: bool,
    delivered: u64,
    pages: u64,
    relogins: u32,
    matched: bool,
    stop_requested: bool,
    snapshot: Snapshot,
    replay: Option<Vec<ObjectUpdate>>,
}

impl Cursor {
    fn new() -> Self {
        Self {
            version: String::new(),
            sequence: 0,
            page: 0,
            in_batch: false,
            initial: true,
            delivered: 0,
            pages: 0,
            relogins: 0,
            matched: false,
            stop_requested: false,
            snapshot: Snapshot::new(),
            replay: None,
        }
    }

    fn summary(&self, reason: StopReason) -> WatchSummary {
        WatchSummary {
            batches: self.delivered,
            pages: self.pages,
            relogins: self.relogins,
            reason,
        }
    }
}

impl PropertyEngine {
    /// Creates an engine over `session`.
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self {
            session,
            stats: Arc::new(EngineStats::default()),
        }
    }

    /// Engine statistics.
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Watches `filter` until `policy` is satisfied, the handler stops, an
    /// error occurs, or `cancel` fires.
    ///
    /// The first batch is the current state of every selected property.
    /// Cancellation returns [`VimError::Cancelled`] once the in-flight poll
    /// has finished and the filter is destroyed.
    pub async fn watch<H>(
        &self,
        filter: &Filter,
        policy: &WatchPolicy,
        handler: &mut H,
        cancel: &CancellationToken,
    ) -> VimResult<WatchSummary>
    where
        H: BatchHandler + ?Sized,
    {
        policy.validate()?;
        if cancel.is_cancelled() {
            return Err(VimError::cancelled("watch cancelled before start"));
        }

        self.stats.watches.fetch_add(1, Ordering::Relaxed);
        let (mut registration, relogins) = self.register_renewing(filter).await?;
        tracing::debug!(filter = %registration.filter, paths = filter.path_count(), "Watch started");

        let result = self
            .run(filter, policy, handler, cancel, &mut registration, relogins)
            .await;

        self.unregister(&registration).await;

        match &result {
            Ok(summary) => tracing::debug!(
                reason = ?summary.reason,
                batches = summary.batches,
                pages = summary.pages,
                "Watch finished"
            ),
            Err(e) if e.is_cancelled() => {
                self.stats.cancellations.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Watch cancelled");
            }
            Err(e) => e.log("watch"),
        }
        result
    }

    async fn run<H>(
        &self,
        filter: &Filter,
        policy: &WatchPolicy,
        handler: &mut H,
        cancel: &CancellationToken,
        registration: &mut Registration,
        relogins: u32,
    ) -> VimResult<WatchSummary>
    where
        H: BatchHandler + ?Sized,
    {
        let predicate = policy.predicate.as_ref().or(filter.predicate());
        let deadline = policy.timeout.map(|t| Instant::now() + t);
        let options = WaitOptions {
            max_wait_seconds: policy
                .max_wait
                .map(|d| u32::try_from(d.as_secs()).unwrap_or(u32::MAX)),
            max_object_updates: policy.max_object_updates,
        };
        let single_check = policy.max_wait == Some(Duration::ZERO);

        let mut health = self.session.subscribe_health();
        let mut health_open = true;
        let mut cursor = Cursor::new();
        cursor.relogins = relogins;
        let mut relogged = relogins > 0;

        loop {
            if cancel.is_cancelled() {
                return Err(VimError::cancelled("watch cancelled"));
            }
            if !cursor.in_batch && deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(cursor.summary(StopReason::TimedOut));
            }
            if let Some(reason) = lost_reason(&mut health) {
                return Err(VimError::auth(reason));
            }

            let cookie = self
                .session
                .cookie()
                .await
                .ok_or_else(VimError::not_authenticated)?;
            let request = Envelope::with_cookie(
                Request::WaitForUpdates {
                    filter: registration.filter.clone(),
                    version: cursor.version.clone(),
                    options,
                },
                cookie.clone(),
            );
            let transport = self.session.transport().clone();
            let mut wait = transport.round_trip(&request);

            // The wait is polled first so a cancel never fires before the
            // request has been sent.
            let interrupt = loop {
                let deadline_at = deadline.unwrap_or_else(Instant::now);
                tokio::select! {
                    biased;
                    result = &mut wait => break Interrupt::Done(result),
                    _ = cancel.cancelled() => break Interrupt::Cancelled,
                    _ = tokio::time::sleep_until(deadline_at), if deadline.is_some() && !cursor.in_batch => {
                        break Interrupt::Deadline
                    }
                    changed = health.changed(), if health_open => {
                        if changed.is_err() {
                            health_open = false;
                        } else if let Some(reason) = lost_reason(&mut health) {
                            break Interrupt::Lost(reason);
                        }
                    }
                }
            };

            let result = match interrupt {
                Interrupt::Done(result) => result,
                Interrupt::Cancelled => {
                    self.abort_wait(registration, &cookie, wait).await;
                    return Err(VimError::cancelled("watch cancelled"));
                }
                Interrupt::Deadline => {
                    self.abort_wait(registration, &cookie, wait).await;
                    return Ok(cursor.summary(StopReason::TimedOut));
                }
                Interrupt::Lost(reason) => {
                    drop(wait);
                    return Err(VimError::auth(reason));
                }
            };

            let set = match result {
                Ok(response) => {
                    relogged = false;
                    response.into_updates()?
                }
                Err(e) if e.is_session_expired() => {
                    if relogged {
                        return Err(expired_again(e));
                    }
                    relogged = true;
                    self.recover(filter, registration, &cookie, &mut cursor)
                        .await?;
                    continue;
                }
                Err(e) if e.is_cancelled() => {
                    return Err(VimError::cancelled(format!("wait cancelled by server: {}", e)));
                }
                Err(e) => return Err(e),
            };

            let Some(set) = set else {
                if single_check && !cursor.in_batch {
                    return Ok(cursor.summary(StopReason::Exhausted));
                }
                continue;
            };

            cursor.version = set.version.clone();
            let truncated = set.truncated;
            let mut updates = group_updates(set.updates_for(&registration.filter).cloned());
            self.stats.pages.fetch_add(1, Ordering::Relaxed);

            if let Some(replay) = cursor.replay.as_mut() {
                replay.extend(updates);
                if truncated {
                    continue;
                }
                let replay = cursor.replay.take().unwrap_or_default();
                updates = cursor.snapshot.resync(&replay);
                tracing::debug!(changes = updates.len(), "Resynchronized after re-login");
            } else {
                cursor.snapshot.apply(&updates);
            }

            let last_page = !truncated;
            if updates.is_empty() && !cursor.initial && !cursor.in_batch && last_page {
                continue;
            }

            let batch = ChangeBatch {
                sequence: cursor.sequence,
                page: cursor.page,
                last_page,
                initial: cursor.initial,
                version: cursor.version.clone(),
                updates,
            };
            if predicate.is_some_and(|p| p.matches(&batch.updates)) {
                cursor.matched = true;
            }

            tracing::trace!(
                sequence = batch.sequence,
                page = batch.page,
                updates = batch.updates.len(),
                truncated,
                version = %batch.version,
                "Delivering change page"
            );
            if handler.on_batch(&batch).await? == Flow::Stop {
                cursor.stop_requested = true;
            }
            cursor.pages += 1;

            if !last_page {
                cursor.in_batch = true;
                cursor.page += 1;
                continue;
            }

            cursor.in_batch = false;
            cursor.page = 0;
            cursor.initial = false;
            cursor.sequence += 1;
            cursor.delivered += 1;
            self.stats.batches.fetch_add(1, Ordering::Relaxed);

            if cursor.matched {
                return Ok(cursor.summary(StopReason::Matched));
            }
            if cursor.stop_requested {
                return Ok(cursor.summary(StopReason::HandlerStopped));
            }
            if policy.count_reached(cursor.delivered) {
                return Ok(cursor.summary(StopReason::CountReached));
            }
        }
    }

    /// Re-login after expiry, register the filter again and start a replay.
    async fn recover(
        &self,
        filter: &Filter,
        registration: &mut Registration,
        stale: &Secret,
        cursor: &mut Cursor,
    ) -> VimResult<()> {
        tracing::info!(filter = %registration.filter, "Session expired during watch, recovering");
        self.session.relogin(Some(stale)).await?;
        self.stats.relogins.fetch_add(1, Ordering::Relaxed);
        cursor.relogins += 1;

        *registration = self.register(filter).await.map_err(|e| {
            if e.is_session_expired() {
                expired_again(e)
            } else {
                e
            }
        })?;
        cursor.version.clear();
        cursor.replay = Some(Vec::new());
        Ok(())
    }

    /// Asks the server to end the pending wait, then waits for it so no
    /// poll outlives the watch. If the cancel cannot be delivered the
    /// pending call is abandoned instead.
    async fn abort_wait<F>(&self, registration: &Registration, cookie: &Secret, wait: F)
    where
        F: std::future::Future<Output = VimResult<Response>>,
    {
        let cancel = Envelope::with_cookie(
            Request::CancelWaitForUpdates {
                filter: registration.filter.clone(),
            },
            cookie.clone(),
        );
        match self.session.transport().round_trip(&cancel).await {
            Ok(_) => {
                if let Err(e) = wait.await {
                    if !e.is_cancelled() {
                        tracing::debug!(error = %e, "Pending wait ended with error after cancel");
                    }
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "CancelWaitForUpdates failed, abandoning pending wait");
            }
        }
    }

    /// Registers `filter`, logging in again once if the session lapsed
    /// before the watch started. Returns the re-logins performed.
    async fn register_renewing(&self, filter: &Filter) -> VimResult<(Registration, u32)> {
        let stale = self.session.cookie().await;
        match self.register(filter).await {
            Err(e) if e.is_session_expired() => {
                tracing::info!(error = %e, "Session expired before watch registration, recovering");
                self.session.relogin(stale.as_ref()).await?;
                self.stats.relogins.fetch_add(1, Ordering::Relaxed);
                match self.register(filter).await {
                    Ok(registration) => Ok((registration, 1)),
                    Err(e) if e.is_session_expired() => Err(expired_again(e)),
                    Err(e) => Err(e),
                }
            }
            other => other.map(|registration| (registration, 0)),
        }
    }

    async fn register(&self, filter: &Filter) -> VimResult<Registration> {
        let view = match filter.root() {
            FilterRoot::Container {
                container,
                types,
                recursive,
            } => Some(
                self.session
                    .call(Request::CreateContainerView {
                        container: container.clone(),
                        types: types.clone(),
                        recursive: *recursive,
                    })
                    .await?
                    .into_reference()?,
            ),
            FilterRoot::Objects { .. } => None,
        };

        let created = match filter.spec(view.as_ref()) {
            Ok(spec) => self
                .session
                .call(Request::CreateFilter {
                    spec,
                    partial_updates: false,
                })
                .await
                .and_then(Response::into_reference),
            Err(e) => Err(e),
        };

        match created {
            Ok(filter) => Ok(Registration { filter, view }),
            Err(e) => {
                if let Some(view) = view {
                    self.destroy(Request::DestroyView { view }).await;
                }
                Err(e)
            }
        }
    }

    async fn unregister(&self, registration: &Registration) {
        self.destroy(Request::DestroyFilter {
            filter: registration.filter.clone(),
        })
        .await;
        if let Some(view) = &registration.view {
            self.destroy(Request::DestroyView { view: view.clone() })
                .await;
        }
    }

    async fn destroy(&self, request: Request) {
        let name = request.name();
        if let Err(e) = self.session.call(request).await {
            tracing::debug!(request = name, error = %e, "Cleanup call failed");
        }
    }
}

fn expired_again(e: VimError) -> VimError {
    VimError::auth(format!("session expired again after re-login: {}", e))
}

fn lost_reason(health: &mut watch::Receiver<SessionHealth>) -> Option<String> {
    match &*health.borrow_and_update() {
        SessionHealth::Lost { reason } => Some(reason.clone()),
        SessionHealth::Healthy => None,
    }
}

// =============================================================================
// EngineStats
// =============================================================================

/// Counters across all watches of an engine.
#[derive(Debug, Default)]
pub struct EngineStats {
    watches: AtomicU64,
    pages: AtomicU64,
    batches: AtomicU64,
    relogins: AtomicU64,
    cancellations: AtomicU64,
}

impl EngineStats {
    /// Watches started.
    pub fn watches(&self) -> u64 {
        self.watches.load(Ordering::Relaxed)
    }

    /// Pages received from the server.
    pub fn pages(&self) -> u64 {
        self.pages.load(Ordering::Relaxed)
    }

    /// Logical batches delivered.
    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    /// Transparent re-logins.
    pub fn relogins(&self) -> u64 {
        self.relogins.load(Ordering::Relaxed)
    }

    /// Watches ended by cancellation.
    pub fn cancellations(&self) -> u64 {
        self.cancellations.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::handler::FnHandler;
    use crate::session::{CredentialSpec, SessionOptions};
    use crate::testing::FakeServer;
    use vimwatch_core::FaultKind;

    async fn engine(server: &Arc<FakeServer>) -> PropertyEngine {
        let manager = Arc::new(SessionManager::new(
            server.clone(),
            CredentialSpec::password("root", "secret"),
            SessionOptions {
                persist: false,
                ..Default::default()
            },
        ));
        manager.login().await.unwrap();
        PropertyEngine::new(manager)
    }

    fn filter() -> Filter {
        Filter::builder()
            .root(ManagedObjectReference::new("VirtualMachine", "vm-1"))
            .property("VirtualMachine", "name")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_invalid_policy_rejected_before_registration() {
        let server = FakeServer::new();
        let engine = engine(&server).await;
        let mut handler = FnHandler(|_: &ChangeBatch| Ok(Flow::Continue));

        let err = engine
            .watch(&filter(), &WatchPolicy::new().count(0), &mut handler, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, VimError::Configuration { .. }));
        assert_eq!(server.count("CreateFilter"), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_never_registers() {
        let server = FakeServer::new();
        let engine = engine(&server).await;
        let mut handler = FnHandler(|_: &ChangeBatch| Ok(Flow::Continue));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = engine
            .watch(&filter(), &WatchPolicy::new(), &mut handler, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(server.count("CreateFilter"), 0);
        assert_eq!(engine.stats().watches(), 0);
    }

    #[tokio::test]
    async fn test_registration_failure_is_reported() {
        let server = FakeServer::new();
        let engine = engine(&server).await;
        let mut handler = FnHandler(|_: &ChangeBatch| Ok(Flow::Continue));

        // The fake server does not implement CreateFilter.
        let err = engine
            .watch(&filter(), &WatchPolicy::new(), &mut handler, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VimError::Fault {
                fault: FaultKind::InvalidArgument,
                ..
            }
        ));
        assert_eq!(server.count("CreateFilter"), 1);
        assert_eq!(server.count("WaitForUpdatesEx"), 0);
        assert_eq!(engine.stats().relogins(), 0);
    }

    #[tokio::test]
    async fn test_registration_on_lapsed_session_relogs_in_once() {
        let server = FakeServer::new();
        let engine = engine(&server).await;
        let mut handler = FnHandler(|_: &ChangeBatch| Ok(Flow::Continue));
        server.expire_all();

        // The fresh session reaches CreateFilter, which the fake rejects.
        let err = engine
            .watch(&filter(), &WatchPolicy::new(), &mut handler, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(!err.is_session_expired());
        assert_eq!(server.count("Login"), 2);
        assert_eq!(server.count("CreateFilter"), 2);
        assert_eq!(engine.stats().relogins(), 1);
    }
}
