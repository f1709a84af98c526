// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! JSON-over-HTTPS transport.
//!
//! Each call is one `POST` of the serialized request to the endpoint URL.
//! The session cookie travels in the `vmware_soap_session` cookie. The server
//! answers with either a [`Response`] or `{"fault": {"name", "message"}}`.
//!
//! Certificates are checked by a [`TrustVerifier`]; when it rejects the
//! server, the transport reports the host and thumbprint instead of the
//! generic TLS failure.

use std::error::Error as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_TYPE, COOKIE};
use serde::Deserialize;
use vimwatch_core::{
    Endpoint, Envelope, FaultKind, Response, Secret, Transport, TransportErrorKind,
    Verification, VimError, VimResult,
};

use crate::trust::{ClientCertificate, KnownHosts, TrustStore, TrustVerifier};

/// Cookie carrying the session.
pub const SESSION_COOKIE: &str = "vmware_soap_session";

/// Default TLS handshake / connect timeout.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP transport to one endpoint.
#[derive(Debug)]
pub struct HttpTransport {
    endpoint: Endpoint,
    client: reqwest::Client,
    verifier: Arc<TrustVerifier>,
    verification: Verification,
}

impl HttpTransport {
    /// Creates a transport that verifies the server through `store`.
    pub fn new(
        endpoint: Endpoint,
        store: Arc<TrustStore>,
        client_certificate: Option<&ClientCertificate>,
        handshake_timeout: Duration,
    ) -> VimResult<Self> {
        let (tls, verifier) = store.client_config(&endpoint.authority(), client_certificate)?;
        let client = reqwest::Client::builder()
            .use_preconfigured_tls(tls)
            .connect_timeout(handshake_timeout)
            .build()
            .map_err(|e| VimError::configuration("tls", e.to_string()))?;

        Ok(Self {
            endpoint,
            client,
            verifier,
            verification: store.verification(),
        })
    }

    fn classify(&self, err: reqwest::Error) -> VimError {
        if let Some(rejection) = self.verifier.take_rejection() {
            return rejection;
        }
        let kind = if err.is_timeout() && err.is_connect() {
            TransportErrorKind::HandshakeTimeout
        } else if err.is_timeout() {
            TransportErrorKind::ResponseTimeout
        } else {
            io_kind(&err).unwrap_or_else(|| {
                if err.to_string().contains("connection closed before message completed")
                    || err.is_body()
                {
                    TransportErrorKind::UnexpectedEof
                } else {
                    TransportErrorKind::Other
                }
            })
        };
        VimError::transport(kind, err.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn round_trip(&self, envelope: &Envelope) -> VimResult<Response> {
        let method = envelope.request.name();
        tracing::trace!(endpoint = %self.endpoint, method, "POST");

        let mut request = self
            .client
            .post(self.endpoint.url())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .json(&envelope.request);
        if let Some(cookie) = &envelope.cookie {
            request = request.header(COOKIE, cookie_header(cookie)?);
        }

        let response = request.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        let body = response.bytes().await.map_err(|e| self.classify(e))?;
        decode_reply(method, status.as_u16(), &body)
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn verification(&self) -> Verification {
        self.verification
    }
}

/// Connects to `endpoint` without trusting anything and returns the SHA-1
/// thumbprint of the certificate the server presented.
pub async fn fetch_thumbprint(endpoint: &Endpoint, timeout: Duration) -> VimResult<String> {
    let store = Arc::new(TrustStore::new(KnownHosts::in_memory(), None, false));
    let transport = HttpTransport::new(endpoint.clone(), store, None, timeout)?;

    let result = transport.client.get(endpoint.url()).send().await;
    if let Some(thumbprint) = transport.verifier.last_seen() {
        return Ok(thumbprint);
    }
    Err(match result {
        Err(e) => transport.classify(e),
        Ok(_) => VimError::protocol(format!(
            "{} did not present a certificate",
            endpoint.authority()
        )),
    })
}

// =============================================================================
// Wire helpers
// =============================================================================

#[derive(Debug, Deserialize)]
struct WireFault {
    name: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Reply {
    Fault { fault: WireFault },
    Result(Response),
}

fn cookie_header(cookie: &Secret) -> VimResult<HeaderValue> {
    let mut value = HeaderValue::from_str(&format!("{}={}", SESSION_COOKIE, cookie.expose()))
        .map_err(|_| VimError::configuration("cookie", "contains characters not allowed in a header"))?;
    value.set_sensitive(true);
    Ok(value)
}

fn decode_reply(method: &str, status: u16, body: &[u8]) -> VimResult<Response> {
    match serde_json::from_slice::<Reply>(body) {
        Ok(Reply::Result(response)) => Ok(response),
        Ok(Reply::Fault { fault }) => {
            let message = if fault.message.is_empty() {
                format!("{} failed", method)
            } else {
                fault.message
            };
            Err(VimError::fault(FaultKind::from_name(&fault.name), message))
        }
        Err(e) => Err(VimError::protocol(format!(
            "{} returned HTTP {} with an unreadable body: {}",
            method, status, e
        ))),
    }
}

fn io_kind(err: &reqwest::Error) -> Option<TransportErrorKind> {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return Some(TransportErrorKind::from_io(io));
        }
        source = cause.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_result() {
        let body = br#"{"result":"Empty"}"#;
        assert_eq!(decode_reply("Logout", 200, body).unwrap(), Response::Empty);
    }

    #[test]
    fn test_decode_fault() {
        let body = br#"{"fault":{"name":"NotAuthenticated","message":"session gone"}}"#;
        let err = decode_reply("CurrentTime", 500, body).unwrap_err();
        assert!(err.is_session_expired());
        assert!(err.to_string().contains("session gone"));
    }

    #[test]
    fn test_decode_unknown_fault_keeps_name() {
        let body = br#"{"fault":{"name":"NoPermission"}}"#;
        match decode_reply("CreateFilter", 500, body).unwrap_err() {
            VimError::Fault { fault, message } => {
                assert_eq!(fault.name(), "NoPermission");
                assert_eq!(message, "CreateFilter failed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_decode_garbage_is_protocol_error() {
        let err = decode_reply("CurrentTime", 502, b"<html>bad gateway</html>").unwrap_err();
        assert!(matches!(err, VimError::Protocol(ref m) if m.contains("HTTP 502")));
    }

    #[test]
    fn test_cookie_header_is_sensitive() {
        let header = cookie_header(&Secret::new("abc123")).unwrap();
        assert!(header.is_sensitive());
        assert_eq!(header.to_str().unwrap(), "vmware_soap_session=abc123");
        assert!(cookie_header(&Secret::new("bad\nvalue")).is_err());
    }

    #[test]
    fn test_transport_builds_with_insecure_store() {
        let store = Arc::new(TrustStore::new(KnownHosts::in_memory(), None, true));
        let transport = HttpTransport::new(
            Endpoint::parse("vc.example.com").unwrap(),
            store,
            None,
            DEFAULT_HANDSHAKE_TIMEOUT,
        )
        .unwrap();
        assert_eq!(transport.verification(), Verification::Skipped);
        assert_eq!(transport.endpoint().url(), "https://vc.example.com/sdk");
    }
}
