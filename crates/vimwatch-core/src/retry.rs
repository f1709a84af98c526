// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Transparent retry of idempotent requests on transient network errors.
//!
//! [`RetryTransport`] wraps any [`Transport`]. A request is repeated only
//! when both hold:
//!
//! - the request is idempotent ([`Request::is_idempotent`])
//! - the failure is transient ([`VimError::is_transient`]): connection
//!   reset, handshake timeout or premature EOF
//!
//! There is no backoff between attempts. When the attempts are exhausted
//! the last error is returned unchanged. The bound is a property of the
//! transport, not of individual calls; callers wanting different behavior
//! wrap the whole operation themselves.
//!
//! ```text
//! attempt 1 ──reset──▶ attempt 2 ──reset──▶ attempt 3 ──ok──▶ Response
//!                                               └──err──▶ last error
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::VimResult;
use crate::rpc::{Envelope, Response, Transport, Verification};
use crate::types::Endpoint;

/// Default total number of attempts (one try plus two retries).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

// =============================================================================
// RetryTransport
// =============================================================================

/// A transport decorator that retries idempotent requests.
pub struct RetryTransport<T> {
    inner: T,
    max_attempts: u32,
    metrics: RetryMetrics,
}

impl<T: Transport> RetryTransport<T> {
    /// Wraps `inner` with the default bound of three attempts.
    pub fn new(inner: T) -> Self {
        Self::with_max_attempts(inner, DEFAULT_MAX_ATTEMPTS)
    }

    /// Wraps `inner` with a custom total attempt bound (minimum 1).
    pub fn with_max_attempts(inner: T, max_attempts: u32) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            metrics: RetryMetrics::default(),
        }
    }

    /// Total attempts per request.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the wrapped transport.
    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Returns retry metrics.
    pub fn metrics(&self) -> &RetryMetrics {
        &self.metrics
    }
}

impl<T> std::fmt::Debug for RetryTransport<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryTransport")
            .field("max_attempts", &self.max_attempts)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<T: Transport> Transport for RetryTransport<T> {
    async fn round_trip(&self, envelope: &Envelope) -> VimResult<Response> {
        let method = envelope.request.name();
        let retryable = envelope.request.is_idempotent();
        let mut attempt = 1;

        loop {
            match self.inner.round_trip(envelope).await {
                Ok(response) => {
                    if attempt == 1 {
                        self.metrics.record_first_try_success();
                    } else {
                        self.metrics.record_retry_success(attempt - 1);
                        tracing::debug!(method, attempt, "Request succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(err) if retryable && err.is_transient() && attempt < self.max_attempts => {
                    tracing::debug!(
                        method,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "Transient failure, retrying"
                    );
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_transient() && retryable {
                        self.metrics.record_exhausted(attempt - 1);
                        tracing::warn!(method, attempts = attempt, error = %err, "Retries exhausted");
                    } else {
                        self.metrics.record_not_retried();
                    }
                    return Err(err);
                }
            }
        }
    }

    fn endpoint(&self) -> &Endpoint {
        self.inner.endpoint()
    }

    fn verification(&self) -> Verification {
        self.inner.verification()
    }
}

// =============================================================================
// Retry Metrics
// =============================================================================

/// Metrics for retried requests.
#[derive(Debug, Default)]
pub struct RetryMetrics {
    total_requests: AtomicU64,
    first_try_success: AtomicU64,
    retry_success: AtomicU64,
    exhausted: AtomicU64,
    not_retried: AtomicU64,
    total_retries: AtomicU64,
}

impl RetryMetrics {
    fn record_first_try_success(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.first_try_success.fetch_add(1, Ordering::Relaxed);
    }

    fn record_retry_success(&self, retries: u32) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.retry_success.fetch_add(1, Ordering::Relaxed);
        self.total_retries.fetch_add(retries as u64, Ordering::Relaxed);
    }

    fn record_exhausted(&self, retries: u32) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.exhausted.fetch_add(1, Ordering::Relaxed);
        self.total_retries.fetch_add(retries as u64, Ordering::Relaxed);
    }

    fn record_not_retried(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.not_retried.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of the metrics.
    pub fn snapshot(&self) -> RetryMetricsSnapshot {
        RetryMetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            first_try_success: self.first_try_success.load(Ordering::Relaxed),
            retry_success: self.retry_success.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            not_retried: self.not_retried.load(Ordering::Relaxed),
            total_retries: self.total_retries.load(Ordering::Relaxed),
        }
    }
}

/// A snapshot of retry metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryMetricsSnapshot {
    /// Requests sent through the transport.
    pub total_requests: u64,
    /// Requests that succeeded on the first attempt.
    pub first_try_success: u64,
    /// Requests that succeeded after at least one retry.
    pub retry_success: u64,
    /// Requests that failed transiently on every attempt.
    pub exhausted: u64,
    /// Requests that failed without being eligible for retry.
    pub not_retried: u64,
    /// Total extra attempts.
    pub total_retries: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{TransportErrorKind, VimError};
    use crate::rpc::Request;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    struct ScriptedTransport {
        endpoint: Endpoint,
        script: Mutex<VecDeque<VimResult<Response>>>,
        calls: AtomicU64,
    }

    impl ScriptedTransport {
        fn new(script: Vec<VimResult<Response>>) -> Self {
            Self {
                endpoint: Endpoint::parse("https://vc.test/sdk").unwrap(),
                script: Mutex::new(script.into()),
                calls: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn round_trip(&self, _envelope: &Envelope) -> VimResult<Response> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(VimError::protocol("script exhausted")))
        }

        fn endpoint(&self) -> &Endpoint {
            &self.endpoint
        }
    }

    fn reset() -> VimResult<Response> {
        Err(VimError::transport(
            TransportErrorKind::ConnectionReset,
            "connection reset by peer",
        ))
    }

    #[tokio::test]
    async fn test_two_resets_then_success() {
        let transport = RetryTransport::new(ScriptedTransport::new(vec![
            reset(),
            reset(),
            Ok(Response::Empty),
        ]));
        let envelope = Envelope::anonymous(Request::CurrentTime);

        let response = transport.round_trip(&envelope).await.unwrap();
        assert_eq!(response, Response::Empty);
        assert_eq!(transport.inner().calls.load(Ordering::SeqCst), 3);

        let snapshot = transport.metrics().snapshot();
        assert_eq!(snapshot.retry_success, 1);
        assert_eq!(snapshot.total_retries, 2);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error_verbatim() {
        let transport = RetryTransport::new(ScriptedTransport::new(vec![
            reset(),
            reset(),
            Err(VimError::transport(TransportErrorKind::UnexpectedEof, "third")),
            Ok(Response::Empty),
        ]));
        let envelope = Envelope::anonymous(Request::CurrentTime);

        let err = transport.round_trip(&envelope).await.unwrap_err();
        assert!(err.to_string().contains("third"));
        assert_eq!(transport.inner().calls.load(Ordering::SeqCst), 3);
        assert_eq!(transport.metrics().snapshot().exhausted, 1);
    }

    #[tokio::test]
    async fn test_non_idempotent_request_is_not_retried() {
        let transport = RetryTransport::new(ScriptedTransport::new(vec![reset(), Ok(Response::Empty)]));
        let envelope = Envelope::anonymous(Request::Logout);

        assert!(transport.round_trip(&envelope).await.is_err());
        assert_eq!(transport.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_transient_error_is_not_retried() {
        let transport = RetryTransport::new(ScriptedTransport::new(vec![
            Err(VimError::auth("bad password")),
            Ok(Response::Empty),
        ]));
        let envelope = Envelope::anonymous(Request::CurrentTime);

        assert!(matches!(
            transport.round_trip(&envelope).await,
            Err(VimError::Auth { .. })
        ));
        assert_eq!(transport.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_max_attempts_floor() {
        let transport = RetryTransport::with_max_attempts(ScriptedTransport::new(vec![]), 0);
        assert_eq!(transport.max_attempts(), 1);
    }
}
