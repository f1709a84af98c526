// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types and exit codes for the vimwatch binary.
//!
//! | Code | Meaning                                  |
//! |------|------------------------------------------|
//! | 0    | success                                  |
//! | 1    | other failure                            |
//! | 2    | configuration or usage error             |
//! | 3    | certificate not trusted                  |
//! | 4    | authentication failed                    |
//! | 5    | network failure                          |
//! | 6    | operation cancelled                      |
//! | 10   | succeeded, but without verification      |
//! | 130  | interrupted                              |

use thiserror::Error;
use vimwatch_config::ConfigError;
use vimwatch_core::{FaultKind, VimError};

/// Result type alias for vimwatch-bin operations.
pub type BinResult<T> = Result<T, BinError>;

/// Exit code for a successful run over an unverified connection.
pub const EXIT_UNVERIFIED: i32 = 10;

/// Exit code after an interrupt.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Errors that can occur in the vimwatch binary.
#[derive(Debug, Error)]
pub enum BinError {
    /// Invalid command-line input.
    #[error("Invalid argument: {0}")]
    Usage(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    /// The user interrupted the command.
    #[error("Interrupted")]
    Interrupted,

    /// Config loading error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Client error.
    #[error(transparent)]
    Client(#[from] VimError),

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        /// The context description.
        context: String,
        /// The underlying error.
        #[source]
        source: Box<BinError>,
    },
}

impl BinError {
    /// Creates a usage error.
    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }

    /// Creates an I/O error.
    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    /// Adds context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Returns the exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) | Self::Config(_) => 2,
            Self::Io(_) => 1,
            Self::Interrupted => EXIT_INTERRUPTED,
            Self::Client(err) => client_exit_code(err),
            Self::WithContext { source, .. } => source.exit_code(),
        }
    }

    /// The client error underneath any context, if there is one.
    pub fn client_error(&self) -> Option<&VimError> {
        match self {
            Self::Client(err) => Some(err),
            Self::WithContext { source, .. } => source.client_error(),
            _ => None,
        }
    }
}

fn client_exit_code(err: &VimError) -> i32 {
    match err {
        VimError::Configuration { .. } => 2,
        VimError::Trust { .. } => 3,
        VimError::Auth { .. } | VimError::NotFound { .. } => 4,
        VimError::Fault {
            fault: FaultKind::NotAuthenticated | FaultKind::InvalidLogin,
            ..
        } => 4,
        VimError::Transport { .. } => 5,
        VimError::Cancelled { .. } => 6,
        _ => 1,
    }
}

impl From<std::io::Error> for BinError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// =============================================================================
// Error Reporting
// =============================================================================

/// Reports an error with its cause chain and recovery hints.
pub fn report_error(error: &BinError) {
    match error.client_error() {
        Some(client) => eprintln!("Error: {}", client.user_message()),
        None => eprintln!("Error: {}", error),
    }

    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        eprintln!("  Caused by: {}", cause);
        source = cause.source();
    }

    if let Some(client) = error.client_error() {
        tracing::debug!(error = %client, code = %client.error_code(), "Command failed");
        for hint in client.recovery_hints() {
            eprintln!("  Hint: {}", hint);
        }
    }
}

/// Reports an error and exits with the appropriate code.
pub fn report_error_and_exit(error: BinError) -> ! {
    report_error(&error);
    std::process::exit(error.exit_code())
}

// =============================================================================
// Tests
// =============================================================================
