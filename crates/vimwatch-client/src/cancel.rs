// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Cooperative cancellation of long-running operations.
//!
//! [`CancellationCoordinator::run_cancellable`] runs one operation against a
//! fresh [`CancellationToken`] and races it against an [`InterruptSource`].
//! On interrupt the token is cancelled and the coordinator keeps waiting
//! until the operation has returned, so no background work is still running
//! when control comes back to the caller.
//!
//! ```text
//! run_cancellable(f)
//!     │
//!     ├── f(token) ─────────────────────────────┐
//!     │                                          ▼
//!     └── interrupt ──▶ token.cancel() ──▶ await f ──▶ f's result
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vimwatch_core::{VimError, VimResult};

// =============================================================================
// Interrupt sources
// =============================================================================

/// Something that eventually asks the current operation to stop.
#[async_trait]
pub trait InterruptSource: Send + Sync {
    /// Resolves when an interrupt is requested.
    async fn interrupted(&self);
}

/// Process interrupt (Ctrl+C / SIGINT).
#[derive(Debug, Clone, Copy, Default)]
pub struct CtrlC;

#[async_trait]
impl InterruptSource for CtrlC {
    async fn interrupted(&self) {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received interrupt"),
            Err(e) => {
                warn!(error = %e, "Failed to register interrupt handler");
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Interrupt triggered from code.
#[derive(Debug, Clone, Default)]
pub struct ManualInterrupt {
    token: CancellationToken,
}

impl ManualInterrupt {
    /// Creates an untriggered interrupt.
    pub fn new() -> Self {
        Self::default()
    }

    /// Triggers the interrupt. Later waits resolve immediately.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Returns `true` once triggered.
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[async_trait]
impl InterruptSource for ManualInterrupt {
    async fn interrupted(&self) {
        self.token.cancelled().await;
    }
}

// =============================================================================
// CancellationCoordinator
// =============================================================================

/// Runs one cancellable operation at a time.
#[derive(Debug)]
pub struct CancellationCoordinator<S = CtrlC> {
    source: S,
    active: AtomicBool,
    interrupts: AtomicU64,
}

impl CancellationCoordinator<CtrlC> {
    /// Coordinator driven by the process interrupt.
    pub fn ctrl_c() -> Self {
        Self::new(CtrlC)
    }
}

impl<S: InterruptSource> CancellationCoordinator<S> {
    /// Creates a coordinator over `source`.
    pub fn new(source: S) -> Self {
        Self {
            source,
            active: AtomicBool::new(false),
            interrupts: AtomicU64::new(0),
        }
    }

    /// Returns `true` while an operation is running.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Interrupts observed so far.
    pub fn interrupts(&self) -> u64 {
        self.interrupts.load(Ordering::Relaxed)
    }

    /// Runs `f` with a token that is cancelled on interrupt.
    ///
    /// Returns `f`'s result. If the interrupt arrives before `f` has started,
    /// `f` is never run and [`VimError::Cancelled`] is returned. Only one
    /// operation may run per coordinator; a nested call is a configuration
    /// error.
    pub async fn run_cancellable<F, Fut, T>(&self, f: F) -> VimResult<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = VimResult<T>>,
    {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(VimError::configuration(
                "cancellation",
                "another cancellable operation is already running",
            ));
        }
        let _active = ActiveGuard(&self.active);

        let token = CancellationToken::new();
        let started = AtomicBool::new(false);
        let work = async {
            started.store(true, Ordering::SeqCst);
            f(token.clone()).await
        };
        tokio::pin!(work);

        tokio::select! {
            biased;
            _ = self.source.interrupted() => {
                self.interrupts.fetch_add(1, Ordering::Relaxed);
                token.cancel();
                if !started.load(Ordering::SeqCst) {
                    return Err(VimError::cancelled("interrupted before the operation started"));
                }
                info!("Interrupt received, waiting for the operation to finish");
                work.await
            }
            result = &mut work => result,
        }
    }
}

struct ActiveGuard<'a>(&'a AtomicBool);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
