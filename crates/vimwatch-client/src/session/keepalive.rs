// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Background keepalive for an idle session.
//!
//! ```text
//!            start()
//!   Idle ───────────────▶ Running ──tick──▶ CurrentTime
//!    ▲                      │  ▲              │
//!    │ stop()               │  └──ok──────────┤
//!    │ relogin failed       │                 │ NotAuthenticated
//!    └──────────────────────┘◀──relogin err───┤
//!                              relogin ok ────┘ (stay Running)
//! ```
//!
//! A transient failure is logged and retried on the next tick. `stop`
//! cancels the timer and waits for the task to finish, including a tick
//! already in flight, so nothing touches the session after it returns.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vimwatch_core::{Envelope, Request, VimError, VimResult};

use super::manager::SessionManager;

/// Lower bound for the tick interval.
pub const MIN_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(1);

/// Keepalive lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeepaliveState {
    /// No timer.
    #[default]
    Idle,
    /// Timer running.
    Running,
}

struct Worker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Keeps a session from expiring while it is idle.
pub struct KeepaliveController {
    manager: Arc<SessionManager>,
    interval: Option<Duration>,
    state: Arc<RwLock<KeepaliveState>>,
    terminal: Arc<RwLock<Option<String>>>,
    stats: Arc<KeepaliveStats>,
    worker: Mutex<Option<Worker>>,
}

impl KeepaliveController {
    /// Creates a stopped controller. `interval` overrides the default of
    /// half the server session timeout.
    pub fn new(manager: Arc<SessionManager>, interval: Option<Duration>) -> Self {
        Self {
            manager,
            interval,
            state: Arc::new(RwLock::new(KeepaliveState::Idle)),
            terminal: Arc::new(RwLock::new(None)),
            stats: Arc::new(KeepaliveStats::default()),
            worker: Mutex::new(None),
        }
    }

    /// Current state.
    pub fn state(&self) -> KeepaliveState {
        *self.state.read()
    }

    /// Returns `true` while the timer runs.
    pub fn is_running(&self) -> bool {
        self.state() == KeepaliveState::Running
    }

    /// The error that stopped the timer, if it stopped on its own.
    pub fn terminal_error(&self) -> Option<String> {
        self.terminal.read().clone()
    }

    /// Tick statistics.
    pub fn stats(&self) -> &KeepaliveStats {
        &self.stats
    }

    /// Starts the timer. Starting a running controller is a no-op.
    ///
    /// Fails when the manager holds no authenticated session.
    pub async fn start(&self) -> VimResult<()> {
        let mut worker = self.worker.lock().await;
        if worker.is_some() && self.is_running() {
            return Ok(());
        }
        if let Some(finished) = worker.take() {
            // Timer stopped on its own after a failed re-login.
            let _ = finished.handle.await;
        }

        let session = self
            .manager
            .current()
            .await
            .filter(|s| s.is_authenticated())
            .ok_or_else(VimError::not_authenticated)?;
        let interval = self
            .interval
            .unwrap_or_else(|| session.effective_timeout() / 2)
            .max(MIN_KEEPALIVE_INTERVAL);

        let token = CancellationToken::new();
        *self.state.write() = KeepaliveState::Running;
        *self.terminal.write() = None;

        let handle = tokio::spawn(run(
            self.manager.clone(),
            interval,
            token.clone(),
            self.state.clone(),
            self.terminal.clone(),
            self.stats.clone(),
        ));
        *worker = Some(Worker { token, handle });

        tracing::info!(interval_secs = interval.as_secs(), "Keepalive started");
        Ok(())
    }

    /// Stops the timer and waits until it has fully quiesced.
    ///
    /// Safe to call any number of times, also concurrently; every caller
    /// returns only after the task is gone.
    pub async fn stop(&self) {
        let mut worker = self.worker.lock().await;
        if let Some(Worker { token, handle }) = worker.take() {
            token.cancel();
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Keepalive task ended abnormally");
            }
            tracing::info!("Keepalive stopped");
        }
        *self.state.write() = KeepaliveState::Idle;
    }
}

impl Drop for KeepaliveController {
    fn drop(&mut self) {
        if let Ok(mut worker) = self.worker.try_lock() {
            if let Some(worker) = worker.take() {
                worker.token.cancel();
            }
        }
    }
}

impl std::fmt::Debug for KeepaliveController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeepaliveController")
            .field("interval", &self.interval)
            .field("state", &self.state())
            .finish()
    }
}

async fn run(
    manager: Arc<SessionManager>,
    interval: Duration,
    token: CancellationToken,
    state: Arc<RwLock<KeepaliveState>>,
    terminal: Arc<RwLock<Option<String>>>,
    stats: Arc<KeepaliveStats>,
) {
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let Some(cookie) = manager.cookie().await else {
            tracing::debug!("Session closed, keepalive exiting");
            break;
        };

        stats.ticks.fetch_add(1, Ordering::Relaxed);
        let result = manager
            .transport()
            .round_trip(&Envelope::with_cookie(Request::CurrentTime, cookie.clone()))
            .await;

        match result {
            Ok(_) => {
                tracing::trace!("Keepalive tick ok");
            }
            Err(e) if e.is_session_expired() => match manager.relogin(Some(&cookie)).await {
                Ok(_) => {
                    stats.relogins.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    e.log("keepalive relogin");
                    *terminal.write() = Some(e.to_string());
                    break;
                }
            },
            Err(e) => {
                stats.failures.fetch_add(1, Ordering::Relaxed);
                e.log("keepalive tick");
            }
        }
    }

    *state.write() = KeepaliveState::Idle;
}

/// Keepalive counters.
#[derive(Debug, Default)]
pub struct KeepaliveStats {
    ticks: AtomicU64,
    failures: AtomicU64,
    relogins: AtomicU64,
}

impl KeepaliveStats {
    /// Ticks issued.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Ticks that failed without ending the session.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Successful re-logins triggered by a tick.
    pub fn relogins(&self) -> u64 {
        self.relogins.load(Ordering::Relaxed)
    }
}
