// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Unified error taxonomy for vimwatch.
//!
//! Every layer of the client reports failures through [`VimError`]. The
//! variants are chosen so a caller can decide what to do next without
//! string matching:
//!
//! # Error Hierarchy
//!
//! ```text
//! VimError (root)
//! ├── Configuration  - conflicting/missing credentials, invalid filter
//! ├── Trust          - server certificate could not be verified (host, thumbprint)
//! ├── Auth           - bad credentials or unrepairable session expiry
//! ├── Transport      - network failure, transient or not (see TransportErrorKind)
//! ├── Fault          - fault reported by the remote service
//! ├── NotFound       - no usable cached session
//! ├── Cache          - local session cache I/O failure
//! ├── Cancelled      - operation short-circuited by cancellation
//! ├── Protocol       - response did not match the request
//! └── Internal       - invariant violated inside the client
//! ```
//!
//! # Examples
//!
//! ```
//! use vimwatch_core::error::{TransportErrorKind, VimError};
//!
//! let error = VimError::transport(TransportErrorKind::ConnectionReset, "peer reset");
//! assert!(error.is_transient());
//!
//! let error = VimError::configuration("credentials", "password and token both set");
//! assert!(!error.is_retryable());
//! ```

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Level;

/// Result alias used across vimwatch crates.
pub type VimResult<T> = Result<T, VimError>;

// =============================================================================
// VimError - Root Error Type
// =============================================================================

/// The root error type for vimwatch.
#[derive(Debug, Error)]
pub enum VimError {
    /// Invalid or conflicting configuration. Never retried.
    #[error("Configuration error in '{field}': {message}")]
    Configuration {
        /// The offending field or input.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// The server certificate could not be verified.
    #[error("Certificate for '{host}' is not trusted (thumbprint {thumbprint}): {reason}")]
    Trust {
        /// Host name (with port when non-default) the certificate was presented for.
        host: String,
        /// SHA-1 thumbprint of the leaf certificate, colon separated.
        thumbprint: String,
        /// Why verification failed.
        reason: String,
    },

    /// Authentication failed or could not be repaired.
    #[error("Authentication failed: {reason}")]
    Auth {
        /// The reason stated by the server.
        reason: String,
    },

    /// Network-level failure.
    #[error("Transport error ({kind}): {message}")]
    Transport {
        /// Classification of the failure.
        kind: TransportErrorKind,
        /// Underlying message.
        message: String,
    },

    /// Fault returned by the remote service.
    #[error("Server fault {fault}: {message}")]
    Fault {
        /// Fault classification.
        fault: FaultKind,
        /// Fault message.
        message: String,
    },

    /// No cached session available for the requested identity.
    #[error("No cached session for '{key}'")]
    NotFound {
        /// Cache key or identity that was looked up.
        key: String,
    },

    /// Local session cache I/O failure.
    #[error("Session cache error at '{path}': {message}")]
    Cache {
        /// Path involved.
        path: PathBuf,
        /// Error message.
        message: String,
        /// Underlying I/O error.
        #[source]
        source: Option<std::io::Error>,
    },

    /// The operation was cancelled.
    #[error("Operation cancelled: {reason}")]
    Cancelled {
        /// What triggered the cancellation.
        reason: String,
    },

    /// The remote side answered with an unexpected response shape.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A client-side invariant was violated (task panicked, channel closed).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl VimError {
    // =========================================================================
    // Factory Methods
    // =========================================================================

    /// Creates a configuration error.
    pub fn configuration(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a trust error.
    pub fn trust(
        host: impl Into<String>,
        thumbprint: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Trust {
            host: host.into(),
            thumbprint: thumbprint.into(),
            reason: reason.into(),
        }
    }

    /// Creates an authentication error.
    pub fn auth(reason: impl Into<String>) -> Self {
        Self::Auth {
            reason: reason.into(),
        }
    }

    /// Creates a transport error.
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self::Transport {
            kind,
            message: message.into(),
        }
    }

    /// Creates a server fault.
    pub fn fault(fault: FaultKind, message: impl Into<String>) -> Self {
        Self::Fault {
            fault,
            message: message.into(),
        }
    }

    /// Creates a "not authenticated" fault, the server's signal for an expired session.
    pub fn not_authenticated() -> Self {
        Self::fault(FaultKind::NotAuthenticated, "session is not authenticated")
    }

    /// Creates a not-found error.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates a cache error.
    pub fn cache(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Cache {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a cache error wrapping an I/O error.
    pub fn cache_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Cache {
            path: path.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Creates a cancellation error.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    // =========================================================================
    // Classification
    // =========================================================================

    /// Returns `true` for network failures that are worth repeating.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { kind, .. } if kind.is_transient())
    }

    /// Returns `true` if a transparent retry of the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        self.is_transient()
    }

    /// Returns `true` when the server reports that the session has lapsed.
    pub fn is_session_expired(&self) -> bool {
        matches!(
            self,
            Self::Fault {
                fault: FaultKind::NotAuthenticated,
                ..
            }
        )
    }

    /// Returns `true` for certificate trust failures.
    pub fn is_trust(&self) -> bool {
        matches!(self, Self::Trust { .. })
    }

    /// Returns `true` for cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
            || matches!(
                self,
                Self::Fault {
                    fault: FaultKind::RequestCanceled,
                    ..
                }
            )
    }

    /// Returns the severity level of this error.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Configuration { .. } => ErrorSeverity::Critical,
            Self::Trust { .. } => ErrorSeverity::Error,
            Self::Auth { .. } => ErrorSeverity::Error,
            Self::Transport { kind, .. } if kind.is_transient() => ErrorSeverity::Warning,
            Self::Transport { .. } => ErrorSeverity::Error,
            Self::Fault { fault, .. } if *fault == FaultKind::NotAuthenticated => {
                ErrorSeverity::Warning
            }
            Self::Fault { .. } => ErrorSeverity::Error,
            Self::NotFound { .. } => ErrorSeverity::Info,
            Self::Cache { .. } => ErrorSeverity::Warning,
            Self::Cancelled { .. } => ErrorSeverity::Info,
            Self::Protocol(_) => ErrorSeverity::Error,
            Self::Internal(_) => ErrorSeverity::Critical,
        }
    }

    /// Returns the error category for logging.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Trust { .. } => ErrorCategory::Trust,
            Self::Auth { .. } => ErrorCategory::Authentication,
            Self::Transport { .. } => ErrorCategory::Network,
            Self::Fault { .. } => ErrorCategory::Server,
            Self::NotFound { .. } | Self::Cache { .. } => ErrorCategory::Storage,
            Self::Cancelled { .. } => ErrorCategory::Cancellation,
            Self::Protocol(_) | Self::Internal(_) => ErrorCategory::Protocol,
        }
    }

    /// Returns a structured error code.
    pub fn error_code(&self) -> ErrorCode {
        let category = self.category() as u8;
        let code = match self {
            Self::Transport { kind, .. } => *kind as u8,
            Self::Fault { fault, .. } => fault.code(),
            Self::Cache { .. } | Self::Internal(_) => 2,
            _ => 1,
        };
        ErrorCode::new(category, code)
    }

    /// Returns recovery hints for this error.
    pub fn recovery_hints(&self) -> Vec<&'static str> {
        match self {
            Self::Configuration { .. } => vec![
                "Supply exactly one credential source",
                "Check the configuration file and VIMWATCH_* environment variables",
            ],
            Self::Trust { .. } => vec![
                "Pin the thumbprint with `vimwatch trust <host>`",
                "Configure a CA bundle with --tls-ca-certs",
            ],
            Self::Auth { .. } => vec!["Verify the username and password", "Log in again"],
            Self::Transport { .. } => vec!["Check network connectivity to the endpoint"],
            Self::Fault { .. } => vec!["Inspect the server fault message"],
            Self::NotFound { .. } => vec!["Log in to create a new session"],
            Self::Cache { .. } => vec!["Check permissions of the session cache directory"],
            Self::Cancelled { .. } => vec![],
            Self::Protocol(_) => vec!["Check that the endpoint speaks the expected API"],
            Self::Internal(_) => vec!["Re-run with --log-level debug and report the failure"],
        }
    }

    /// Returns a user-facing message without internal details.
    pub fn user_message(&self) -> String {
        match self {
            Self::Configuration { field, message } => format!("Invalid {}: {}", field, message),
            Self::Trust {
                host, thumbprint, ..
            } => format!(
                "The certificate presented by {} is not trusted. Thumbprint: {}",
                host, thumbprint
            ),
            Self::Auth { reason } => format!("Login failed: {}", reason),
            Self::Transport { .. } => "Could not reach the server".to_string(),
            Self::Fault { fault, message } => format!("{}: {}", fault, message),
            Self::NotFound { .. } => "No active session; please log in".to_string(),
            Self::Cache { path, .. } => {
                format!("Could not access session cache at {}", path.display())
            }
            Self::Cancelled { .. } => "Interrupted".to_string(),
            Self::Protocol(_) => "Unexpected response from server".to_string(),
            Self::Internal(_) => "Internal client error".to_string(),
        }
    }

    /// Returns the tracing level for this error.
    pub fn tracing_level(&self) -> Level {
        self.severity().to_tracing_level()
    }

    /// Logs this error with appropriate level and context.
    pub fn log(&self, context: &str) {
        let code = self.error_code();
        match self.tracing_level() {
            Level::ERROR => tracing::error!(
                error_code = %code,
                category = %self.category(),
                context = context,
                transient = self.is_transient(),
                "{self}"
            ),
            Level::WARN => tracing::warn!(
                error_code = %code,
                category = %self.category(),
                context = context,
                transient = self.is_transient(),
                "{self}"
            ),
            _ => tracing::debug!(
                error_code = %code,
                category = %self.category(),
                context = context,
                "{self}"
            ),
        }
    }
}

impl From<std::io::Error> for VimError {
    fn from(err: std::io::Error) -> Self {
        Self::transport(TransportErrorKind::from_io(&err), err.to_string())
    }
}

// =============================================================================
// TransportErrorKind
// =============================================================================

/// Classification of network failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    /// Peer reset the connection.
    ConnectionReset = 1,
    /// Timed out while establishing the connection.
    HandshakeTimeout = 2,
    /// Connection closed before a complete response was read.
    UnexpectedEof = 3,
    /// Connection refused.
    ConnectionRefused = 4,
    /// Timed out waiting for a response on an established connection.
    ResponseTimeout = 5,
    /// Anything else.
    Other = 6,
}

impl TransportErrorKind {
    /// Returns `true` for failures that occur before the server could have
    /// acted on the request.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::ConnectionReset | Self::HandshakeTimeout | Self::UnexpectedEof
        )
    }

    /// Classifies an I/O error.
    pub fn from_io(err: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
                Self::ConnectionReset
            }
            ErrorKind::UnexpectedEof => Self::UnexpectedEof,
            ErrorKind::ConnectionRefused => Self::ConnectionRefused,
            ErrorKind::TimedOut => Self::HandshakeTimeout,
            _ => Self::Other,
        }
    }

    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionReset => "connection_reset",
            Self::HandshakeTimeout => "handshake_timeout",
            Self::UnexpectedEof => "unexpected_eof",
            Self::ConnectionRefused => "connection_refused",
            Self::ResponseTimeout => "response_timeout",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// FaultKind
// =============================================================================

/// Faults the client reacts to. Unrecognised faults keep their name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// The session is not (or no longer) authenticated.
    NotAuthenticated,
    /// Login rejected.
    InvalidLogin,
    /// A referenced managed object does not exist.
    ManagedObjectNotFound,
    /// A pending request was cancelled.
    RequestCanceled,
    /// Invalid request argument.
    InvalidArgument,
    /// Operation not valid in the current state.
    InvalidState,
    /// Any other fault.
    Other(String),
}

impl FaultKind {
    /// Parses a fault name as reported by the server.
    pub fn from_name(name: &str) -> Self {
        match name {
            "NotAuthenticated" => Self::NotAuthenticated,
            "InvalidLogin" => Self::InvalidLogin,
            "ManagedObjectNotFound" => Self::ManagedObjectNotFound,
            "RequestCanceled" => Self::RequestCanceled,
            "InvalidArgument" => Self::InvalidArgument,
            "InvalidState" => Self::InvalidState,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns the fault name as used on the wire.
    pub fn name(&self) -> &str {
        match self {
            Self::NotAuthenticated => "NotAuthenticated",
            Self::InvalidLogin => "InvalidLogin",
            Self::ManagedObjectNotFound => "ManagedObjectNotFound",
            Self::RequestCanceled => "RequestCanceled",
            Self::InvalidArgument => "InvalidArgument",
            Self::InvalidState => "InvalidState",
            Self::Other(name) => name,
        }
    }

    fn code(&self) -> u8 {
        match self {
            Self::NotAuthenticated => 1,
            Self::InvalidLogin => 2,
            Self::ManagedObjectNotFound => 3,
            Self::RequestCanceled => 4,
            Self::InvalidArgument => 5,
            Self::InvalidState => 6,
            Self::Other(_) => 0xFF,
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Severity, Category, Code
// =============================================================================

/// Error severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Informational - no action required.
    Info,
    /// Warning - action may be required.
    Warning,
    /// Error - action required, but recoverable.
    Error,
    /// Critical - immediate action required.
    Critical,
}

impl ErrorSeverity {
    /// Converts to tracing level.
    pub fn to_tracing_level(self) -> Level {
        match self {
            Self::Info => Level::INFO,
            Self::Warning => Level::WARN,
            Self::Error | Self::Critical => Level::ERROR,
        }
    }

    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error categories. The discriminant doubles as the error code category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Configuration problems.
    Configuration = 1,
    /// Certificate trust.
    Trust = 2,
    /// Authentication and session.
    Authentication = 3,
    /// Network transport.
    Network = 4,
    /// Server-reported faults.
    Server = 5,
    /// Local session storage.
    Storage = 6,
    /// Cancellation.
    Cancellation = 7,
    /// Response decoding.
    Protocol = 8,
}

impl ErrorCategory {
    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Trust => "trust",
            Self::Authentication => "authentication",
            Self::Network => "network",
            Self::Server => "server",
            Self::Storage => "storage",
            Self::Cancellation => "cancellation",
            Self::Protocol => "protocol",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error code.
///
/// Format: `VW-XXYY` where XX is the [`ErrorCategory`] and YY the specific error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    /// Category.
    pub category: u8,
    /// Specific error within category.
    pub code: u8,
}

impl ErrorCode {
    /// Creates a new error code.
    pub const fn new(category: u8, code: u8) -> Self {
        Self { category, code }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VW-{:02X}{:02X}", self.category, self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(VimError::transport(TransportErrorKind::ConnectionReset, "x").is_transient());
        assert!(VimError::transport(TransportErrorKind::HandshakeTimeout, "x").is_transient());
        assert!(VimError::transport(TransportErrorKind::UnexpectedEof, "x").is_transient());
        assert!(!VimError::transport(TransportErrorKind::ResponseTimeout, "x").is_transient());
        assert!(!VimError::auth("bad password").is_transient());
        assert!(!VimError::configuration("filter", "empty").is_retryable());
    }

    #[test]
    fn test_io_error_mapping() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err: VimError = io.into();
        assert!(err.is_transient());

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: VimError = io.into();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_session_expired_and_cancelled() {
        assert!(VimError::not_authenticated().is_session_expired());
        assert!(!VimError::auth("x").is_session_expired());
        assert!(VimError::fault(FaultKind::RequestCanceled, "x").is_cancelled());
        assert!(VimError::cancelled("interrupt").is_cancelled());
    }

    #[test]
    fn test_trust_error_carries_thumbprint() {
        let err = VimError::trust("vc.example.com", "AB:CD", "unknown authority");
        assert!(err.is_trust());
        let msg = err.user_message();
        assert!(msg.contains("vc.example.com"));
        assert!(msg.contains("AB:CD"));
    }

    #[test]
    fn test_error_code_format() {
        let err = VimError::transport(TransportErrorKind::UnexpectedEof, "eof");
        assert_eq!(err.error_code().to_string(), "VW-0403");
        assert_eq!(err.category(), ErrorCategory::Network);
        assert_eq!(err.severity(), ErrorSeverity::Warning);
    }

    #[test]
    fn test_fault_names_round_trip() {
        for name in ["NotAuthenticated", "RequestCanceled", "SomethingElse"] {
            assert_eq!(FaultKind::from_name(name).name(), name);
        }
    }
}
