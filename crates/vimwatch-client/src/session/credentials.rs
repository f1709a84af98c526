// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Login credentials.
//!
//! Raw inputs arrive as a [`CredentialSource`] where any field may be set.
//! [`CredentialSpec::from_source`] turns that into exactly one login
//! strategy, rejecting conflicting material before anything touches the
//! network.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use vimwatch_core::{Request, Secret, VimError, VimResult};

use crate::trust::ClientCertificate;

// =============================================================================
// CredentialSource
// =============================================================================

/// Unvalidated credential inputs, as gathered from configuration and flags.
#[derive(Debug, Clone, Default)]
pub struct CredentialSource {
    /// User name.
    pub username: Option<String>,
    /// Password.
    pub password: Option<Secret>,
    /// Client certificate path.
    pub certificate: Option<PathBuf>,
    /// Client private key path.
    pub private_key: Option<PathBuf>,
    /// Extension key for certificate login.
    pub extension_key: Option<String>,
    /// Clone ticket.
    pub ticket: Option<Secret>,
    /// Signed token.
    pub token: Option<Secret>,
    /// Session cookie.
    pub cookie: Option<Secret>,
}

// =============================================================================
// CredentialSpec
// =============================================================================

/// Exactly one login strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CredentialSpec {
    /// Username and password.
    Password {
        /// User name.
        username: String,
        /// Password.
        password: Secret,
    },
    /// Client certificate presented at the TLS layer.
    Certificate {
        /// Certificate and key.
        identity: ClientCertificate,
        /// Extension key registered for the certificate.
        extension_key: String,
    },
    /// One-time clone ticket.
    Ticket {
        /// Ticket.
        ticket: Secret,
    },
    /// Signed bearer token.
    Token {
        /// Token.
        token: Secret,
    },
    /// Reuse of an existing session cookie.
    Cookie {
        /// Cookie.
        cookie: Secret,
    },
}

/// Discriminant of [`CredentialSpec`], safe to log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    /// Username and password.
    Password,
    /// Client certificate.
    Certificate,
    /// Clone ticket.
    Ticket,
    /// Signed token.
    Token,
    /// Session cookie.
    Cookie,
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Password => "password",
            Self::Certificate => "certificate",
            Self::Ticket => "ticket",
            Self::Token => "token",
            Self::Cookie => "cookie",
        };
        f.write_str(name)
    }
}

impl CredentialSpec {
    /// Picks the single login strategy described by `source`.
    pub fn from_source(source: CredentialSource) -> VimResult<Self> {
        let mut present = Vec::new();
        if source.password.is_some() {
            present.push(CredentialKind::Password);
        }
        if source.certificate.is_some() || source.private_key.is_some() {
            present.push(CredentialKind::Certificate);
        }
        if source.ticket.is_some() {
            present.push(CredentialKind::Ticket);
        }
        if source.token.is_some() {
            present.push(CredentialKind::Token);
        }
        if source.cookie.is_some() {
            present.push(CredentialKind::Cookie);
        }

        let kind = match present.as_slice() {
            [single] => *single,
            [] if source.username.is_some() => {
                return Err(VimError::configuration(
                    "password",
                    "a password is required for user login",
                ))
            }
            [] => {
                return Err(VimError::configuration(
                    "credentials",
                    "no credentials supplied",
                ))
            }
            many => {
                let names: Vec<String> = many.iter().map(ToString::to_string).collect();
                return Err(VimError::configuration(
                    "credentials",
                    format!("conflicting credentials supplied: {}", names.join(", ")),
                ));
            }
        };

        let spec = match kind {
            CredentialKind::Password => Self::Password {
                username: source
                    .username
                    .filter(|u| !u.is_empty())
                    .ok_or_else(|| VimError::configuration("username", "password login requires a user name"))?,
                password: source.password.unwrap_or_default(),
            },
            CredentialKind::Certificate => {
                let certificate = source.certificate.ok_or_else(|| {
                    VimError::configuration("certificate", "private key given without a certificate")
                })?;
                let private_key = source.private_key.ok_or_else(|| {
                    VimError::configuration("private_key", "certificate login requires a private key")
                })?;
                Self::Certificate {
                    identity: ClientCertificate {
                        certificate,
                        private_key,
                    },
                    extension_key: source.extension_key.or(source.username).unwrap_or_default(),
                }
            }
            CredentialKind::Ticket => Self::Ticket {
                ticket: source.ticket.unwrap_or_default(),
            },
            CredentialKind::Token => Self::Token {
                token: source.token.unwrap_or_default(),
            },
            CredentialKind::Cookie => Self::Cookie {
                cookie: source.cookie.unwrap_or_default(),
            },
        };
        Ok(spec)
    }

    /// Creates password credentials.
    pub fn password(username: impl Into<String>, password: impl Into<Secret>) -> Self {
        Self::Password {
            username: username.into(),
            password: password.into(),
        }
    }

    /// The strategy in use.
    pub fn kind(&self) -> CredentialKind {
        match self {
            Self::Password { .. } => CredentialKind::Password,
            Self::Certificate { .. } => CredentialKind::Certificate,
            Self::Ticket { .. } => CredentialKind::Ticket,
            Self::Token { .. } => CredentialKind::Token,
            Self::Cookie { .. } => CredentialKind::Cookie,
        }
    }

    /// Identity used in session cache keys, when the credential names one.
    pub fn identity(&self) -> Option<&str> {
        match self {
            Self::Password { username, .. } => Some(username),
            Self::Certificate { extension_key, .. } if !extension_key.is_empty() => {
                Some(extension_key)
            }
            _ => None,
        }
    }

    /// Client certificate to present during the TLS handshake, if any.
    pub fn client_certificate(&self) -> Option<&ClientCertificate> {
        match self {
            Self::Certificate { identity, .. } => Some(identity),
            _ => None,
        }
    }

    /// The login request for this strategy. Cookie reuse has none; the
    /// cookie is validated with a session lookup instead.
    pub fn login_request(&self) -> Option<Request> {
        match self {
            Self::Password { username, password } => Some(Request::Login {
                user_name: username.clone(),
                password: password.clone(),
            }),
            Self::Certificate { extension_key, .. } => Some(Request::LoginExtensionByCertificate {
                extension_key: extension_key.clone(),
            }),
            Self::Ticket { ticket } => Some(Request::CloneSession {
                clone_ticket: ticket.clone(),
            }),
            Self::Token { token } => Some(Request::LoginByToken {
                token: token.clone(),
            }),
            Self::Cookie { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_strategy() {
        let spec = CredentialSpec::from_source(CredentialSource {
            username: Some("root".into()),
            password: Some("pw".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(spec.kind(), CredentialKind::Password);
        assert_eq!(spec.identity(), Some("root"));
        assert!(matches!(spec.login_request(), Some(Request::Login { .. })));
    }

    #[test]
    fn test_conflicting_credentials_rejected() {
        let err = CredentialSpec::from_source(CredentialSource {
            username: Some("root".into()),
            password: Some("pw".into()),
            token: Some("tok".into()),
            ..Default::default()
        })
        .unwrap_err();
        match err {
            VimError::Configuration { message, .. } => {
                assert!(message.contains("password"));
                assert!(message.contains("token"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_missing_credentials() {
        assert!(CredentialSpec::from_source(CredentialSource::default()).is_err());
        let err = CredentialSpec::from_source(CredentialSource {
            username: Some("root".into()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("password"));
    }

    #[test]
    fn test_password_without_user() {
        let err = CredentialSpec::from_source(CredentialSource {
            password: Some("pw".into()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, VimError::Configuration { field, .. } if field == "username"));
    }

    #[test]
    fn test_certificate_requires_both_parts() {
        assert!(CredentialSpec::from_source(CredentialSource {
            certificate: Some("c.pem".into()),
            ..Default::default()
        })
        .is_err());

        let spec = CredentialSpec::from_source(CredentialSource {
            username: Some("com.example.ext".into()),
            certificate: Some("c.pem".into()),
            private_key: Some("k.pem".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(spec.kind(), CredentialKind::Certificate);
        assert_eq!(spec.identity(), Some("com.example.ext"));
        assert!(spec.client_certificate().is_some());
    }

    #[test]
    fn test_cookie_has_no_login_request() {
        let spec = CredentialSpec::from_source(CredentialSource {
            cookie: Some("vmware_soap_session=abc".into()),
            ..Default::default()
        })
        .unwrap();
        assert!(spec.login_request().is_none());
        assert!(spec.identity().is_none());
    }
}
