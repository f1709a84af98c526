// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! In-crate test double for session tests.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use vimwatch_core::{
    AboutInfo, Endpoint, Envelope, FaultKind, LoginResult, Request, Response, Transport,
    UserSession, VimError, VimResult,
};

/// Accepts `root`/`secret`; every login issues a new cookie.
pub(crate) struct FakeServer {
    endpoint: Endpoint,
    live: Mutex<Vec<String>>,
    issued: Mutex<u32>,
    calls: Mutex<Vec<&'static str>>,
    fail_time: Mutex<Option<VimError>>,
}

impl FakeServer {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            endpoint: Endpoint::parse("vc.example.com").unwrap(),
            live: Mutex::new(Vec::new()),
            issued: Mutex::new(0),
            calls: Mutex::new(Vec::new()),
            fail_time: Mutex::new(None),
        })
    }

    /// Forgets every session.
    pub(crate) fn expire_all(&self) {
        self.live.lock().clear();
    }

    /// Fails the next `CurrentTime` call with `err`.
    pub(crate) fn fail_next_tick(&self, err: VimError) {
        *self.fail_time.lock() = Some(err);
    }

    /// Number of calls to the named method.
    pub(crate) fn count(&self, name: &str) -> usize {
        self.calls.lock().iter().filter(|c| **c == name).count()
    }

    fn user_session() -> UserSession {
        UserSession {
            key: "k".into(),
            user_name: "root".into(),
            login_time: Utc::now(),
        }
    }
}

#[async_trait]
impl Transport for FakeServer {
    async fn round_trip(&self, envelope: &Envelope) -> VimResult<Response> {
        self.calls.lock().push(envelope.request.name());
        let alive = envelope
            .cookie
            .as_ref()
            .is_some_and(|c| self.live.lock().iter().any(|l| l == c.expose()));

        match &envelope.request {
            Request::RetrieveServiceContent => Ok(Response::About(AboutInfo {
                name: "fake".into(),
                api_version: "8.0".into(),
                session_timeout_secs: Some(600),
            })),
            Request::Login {
                user_name,
                password,
            } => {
                if user_name != "root" || password.expose() != "secret" {
                    return Err(VimError::fault(FaultKind::InvalidLogin, "bad password"));
                }
                let mut issued = self.issued.lock();
                *issued += 1;
                let cookie = format!("cookie-{}", *issued);
                self.live.lock().push(cookie.clone());
                Ok(Response::LoggedIn(LoginResult {
                    session: Self::user_session(),
                    cookie: cookie.into(),
                }))
            }
            Request::UserSession => Ok(Response::Session(alive.then(Self::user_session))),
            Request::Logout => {
                if let Some(c) = &envelope.cookie {
                    self.live.lock().retain(|l| l != c.expose());
                }
                Ok(Response::Empty)
            }
            Request::CurrentTime => {
                if let Some(err) = self.fail_time.lock().take() {
                    return Err(err);
                }
                if alive {
                    Ok(Response::Time(Utc::now()))
                } else {
                    Err(VimError::not_authenticated())
                }
            }
            _ if !alive => Err(VimError::not_authenticated()),
            other => Err(VimError::fault(
                FaultKind::InvalidArgument,
                format!("{} is not supported by the fake server", other.name()),
            )),
        }
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}
