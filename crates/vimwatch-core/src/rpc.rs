// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Typed request/response model and the transport abstraction.
//!
//! The client never assumes a wire format. It builds a [`Request`], wraps
//! it in an [`Envelope`] together with the session cookie, and hands it to
//! a [`Transport`]. Implementations decide how bytes move; the only thing
//! the rest of the client relies on is that transient network failures are
//! reported as [`VimError::Transport`] with a transient kind.
//!
//! # Idempotency
//!
//! [`Request::is_idempotent`] marks the calls that may be repeated without
//! changing server state beyond the first attempt. Only those are retried
//! by [`crate::retry::RetryTransport`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collector::{FilterSpec, UpdateSet, WaitOptions};
use crate::error::{VimError, VimResult};
use crate::types::{Endpoint, ManagedObjectReference, Secret};

// =============================================================================
// Requests
// =============================================================================

/// A typed call against the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum Request {
    /// Fetch service identification and API version.
    RetrieveServiceContent,
    /// Username/password login.
    Login {
        /// User name.
        user_name: String,
        /// Password.
        password: Secret,
    },
    /// Login using the client certificate presented at the TLS layer.
    LoginExtensionByCertificate {
        /// Extension key registered for the certificate.
        extension_key: String,
    },
    /// Login with a signed bearer/holder-of-key token.
    LoginByToken {
        /// Token material.
        token: Secret,
    },
    /// Adopt the session behind a one-time clone ticket.
    CloneSession {
        /// Ticket issued by `AcquireCloneTicket`.
        clone_ticket: Secret,
    },
    /// Issue a one-time clone ticket for the current session.
    AcquireCloneTicket,
    /// Read the current user session (`None` when unauthenticated).
    UserSession,
    /// Cheap authenticated no-op used for keepalive.
    CurrentTime,
    /// End the session server-side.
    Logout,
    /// Create a container view.
    CreateContainerView {
        /// Container to view.
        container: ManagedObjectReference,
        /// Object types to include.
        types: Vec<String>,
        /// Whether to recurse into child containers.
        recursive: bool,
    },
    /// Destroy a view.
    DestroyView {
        /// The view.
        view: ManagedObjectReference,
    },
    /// Register a property filter.
    CreateFilter {
        /// Filter definition.
        spec: FilterSpec,
        /// Whether nested property changes are reported individually.
        partial_updates: bool,
    },
    /// Destroy a property filter.
    DestroyFilter {
        /// The filter.
        filter: ManagedObjectReference,
    },
    /// Block until changes to `filter` are available after `version`.
    WaitForUpdates {
        /// The filter to wait on.
        filter: ManagedObjectReference,
        /// Version from the previous call; empty for the initial state.
        version: String,
        /// Wait options.
        options: WaitOptions,
    },
    /// Cancel a pending `WaitForUpdates` on `filter`.
    CancelWaitForUpdates {
        /// The filter whose wait is cancelled.
        filter: ManagedObjectReference,
    },
}

impl Request {
    /// Returns the method name, safe for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RetrieveServiceContent => "RetrieveServiceContent",
            Self::Login { .. } => "Login",
            Self::LoginExtensionByCertificate { .. } => "LoginExtensionByCertificate",
            Self::LoginByToken { .. } => "LoginByToken",
            Self::CloneSession { .. } => "CloneSession",
            Self::AcquireCloneTicket => "AcquireCloneTicket",
            Self::UserSession => "UserSession",
            Self::CurrentTime => "CurrentTime",
            Self::Logout => "Logout",
            Self::CreateContainerView { .. } => "CreateContainerView",
            Self::DestroyView { .. } => "DestroyView",
            Self::CreateFilter { .. } => "CreateFilter",
            Self::DestroyFilter { .. } => "DestroyFilter",
            Self::WaitForUpdates { .. } => "WaitForUpdatesEx",
            Self::CancelWaitForUpdates { .. } => "CancelWaitForUpdates",
        }
    }

    /// Returns `true` if repeating the request cannot change server state
    /// beyond what the first successful attempt did.
    ///
    /// Logins are included: a login whose response was lost leaves at most
    /// an orphaned session that expires on its own. Clone tickets are
    /// single-use and therefore excluded, as is everything that creates or
    /// destroys server objects.
    pub fn is_idempotent(&self) -> bool {
        matches!(
            self,
            Self::RetrieveServiceContent
                | Self::Login { .. }
                | Self::LoginExtensionByCertificate { .. }
                | Self::LoginByToken { .. }
                | Self::UserSession
                | Self::CurrentTime
                | Self::WaitForUpdates { .. }
                | Self::CancelWaitForUpdates { .. }
        )
    }
}

/// A request plus the session material it is sent with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// The call.
    pub request: Request,
    /// Session cookie, absent before login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie: Option<Secret>,
}

impl Envelope {
    /// Creates an unauthenticated envelope.
    pub fn anonymous(request: Request) -> Self {
        Self {
            request,
            cookie: None,
        }
    }

    /// Creates an envelope carrying a session cookie.
    pub fn with_cookie(request: Request, cookie: Secret) -> Self {
        Self {
            request,
            cookie: Some(cookie),
        }
    }
}

// =============================================================================
// Responses
// =============================================================================

/// Identification of the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AboutInfo {
    /// Product name.
    pub name: String,
    /// Negotiated API version.
    pub api_version: String,
    /// Idle session timeout advertised by the server, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_timeout_secs: Option<u64>,
}

/// An authenticated user session as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSession {
    /// Server-side session key.
    pub key: String,
    /// Authenticated user.
    pub user_name: String,
    /// When the session was created.
    pub login_time: DateTime<Utc>,
}

/// Successful login outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginResult {
    /// The new session.
    pub session: UserSession,
    /// Cookie to present on subsequent calls.
    pub cookie: Secret,
}

/// A typed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", content = "value")]
pub enum Response {
    /// Reply to `RetrieveServiceContent`.
    About(AboutInfo),
    /// Reply to any login call.
    LoggedIn(LoginResult),
    /// Reply to `UserSession`.
    Session(Option<UserSession>),
    /// Reply to `CurrentTime`.
    Time(DateTime<Utc>),
    /// Reply to `AcquireCloneTicket`.
    Ticket(Secret),
    /// Reply to calls that create an object.
    Reference(ManagedObjectReference),
    /// Reply to `WaitForUpdates`; `None` when the wait timed out.
    Updates(Option<UpdateSet>),
    /// Reply to calls without a result.
    Empty,
}

impl Response {
    fn kind(&self) -> &'static str {
        match self {
            Self::About(_) => "About",
            Self::LoggedIn(_) => "LoggedIn",
            Self::Session(_) => "Session",
            Self::Time(_) => "Time",
            Self::Ticket(_) => "Ticket",
            Self::Reference(_) => "Reference",
            Self::Updates(_) => "Updates",
            Self::Empty => "Empty",
        }
    }

    fn unexpected(self, wanted: &str) -> VimError {
        VimError::protocol(format!("expected {} response, got {}", wanted, self.kind()))
    }

    /// Extracts an [`AboutInfo`].
    pub fn into_about(self) -> VimResult<AboutInfo> {
        match self {
            Self::About(v) => Ok(v),
            other => Err(other.unexpected("About")),
        }
    }

    /// Extracts a [`LoginResult`].
    pub fn into_login(self) -> VimResult<LoginResult> {
        match self {
            Self::LoggedIn(v) => Ok(v),
            other => Err(other.unexpected("LoggedIn")),
        }
    }

    /// Extracts the optional current session.
    pub fn into_session(self) -> VimResult<Option<UserSession>> {
        match self {
            Self::Session(v) => Ok(v),
            other => Err(other.unexpected("Session")),
        }
    }

    /// Extracts server time.
    pub fn into_time(self) -> VimResult<DateTime<Utc>> {
        match self {
            Self::Time(v) => Ok(v),
            other => Err(other.unexpected("Time")),
        }
    }

    /// Extracts a clone ticket.
    pub fn into_ticket(self) -> VimResult<Secret> {
        match self {
            Self::Ticket(v) => Ok(v),
            other => Err(other.unexpected("Ticket")),
        }
    }

    /// Extracts an object reference.
    pub fn into_reference(self) -> VimResult<ManagedObjectReference> {
        match self {
            Self::Reference(v) => Ok(v),
            other => Err(other.unexpected("Reference")),
        }
    }

    /// Extracts an optional update set.
    pub fn into_updates(self) -> VimResult<Option<UpdateSet>> {
        match self {
            Self::Updates(v) => Ok(v),
            other => Err(other.unexpected("Updates")),
        }
    }
}

// =============================================================================
// Transport
// =============================================================================

/// Whether the transport verified the server identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Verification {
    /// Identity verified by CA chain or pinned thumbprint.
    #[default]
    Verified,
    /// Verification was skipped at the caller's request.
    Skipped,
}

impl Verification {
    /// Returns `true` if the identity was checked.
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified)
    }
}

/// Moves requests to the remote service.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one request and waits for its response.
    async fn round_trip(&self, envelope: &Envelope) -> VimResult<Response>;

    /// The endpoint this transport talks to.
    fn endpoint(&self) -> &Endpoint;

    /// How the server identity was established.
    fn verification(&self) -> Verification {
        Verification::Verified
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn round_trip(&self, envelope: &Envelope) -> VimResult<Response> {
        (**self).round_trip(envelope).await
    }

    fn endpoint(&self) -> &Endpoint {
        (**self).endpoint()
    }

    fn verification(&self) -> Verification {
        (**self).verification()
    }
}
