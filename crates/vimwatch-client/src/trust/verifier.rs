// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Server identity verification.
//!
//! [`TrustStore::verify`] decides whether a presented certificate chain is
//! acceptable for a host:
//!
//! ```text
//!                 ┌───────────────┐  yes
//! insecure? ─────▶│ Accept(Skip)  │◀──────
//!    │ no         └───────────────┘
//!    ▼
//! CA bundle validates chain? ──yes──▶ Accept(CaChain)
//!    │ no
//!    ▼
//! leaf thumbprint pinned for host? ──yes──▶ Accept(Pinned)
//!    │ no
//!    ▼
//! Reject { host, thumbprint, reason }
//! ```
//!
//! [`TrustVerifier`] plugs that decision into rustls and remembers the last
//! rejection so the transport can report host and thumbprint to the caller.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use serde::{Deserialize, Serialize};
use vimwatch_core::{Verification, VimError, VimResult};

use super::store::{thumbprint, KnownHosts, TrustRecord};

// =============================================================================
// TrustPolicy
// =============================================================================

/// How the server identity is to be established.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrustPolicy {
    /// PEM bundle of trusted CA certificates.
    pub ca_bundle: Option<PathBuf>,
    /// Known-hosts thumbprint file.
    pub known_hosts: Option<PathBuf>,
    /// Skip verification entirely.
    pub insecure: bool,
    /// Client certificate presented during the handshake.
    pub client_certificate: Option<ClientCertificate>,
}

impl TrustPolicy {
    /// Policy that accepts any certificate.
    pub fn insecure() -> Self {
        Self {
            insecure: true,
            ..Default::default()
        }
    }
}

/// Paths of a client certificate and its key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCertificate {
    /// PEM certificate chain.
    pub certificate: PathBuf,
    /// PEM private key.
    pub private_key: PathBuf,
}

impl ClientCertificate {
    /// Loads the chain and key for rustls.
    pub fn load(&self) -> VimResult<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
        let chain = load_certs(&self.certificate)?;
        let mut reader = open_pem(&self.private_key)?;
        let key = rustls_pemfile::private_key(&mut reader)
            .map_err(|e| pem_error(&self.private_key, e.to_string()))?
            .ok_or_else(|| pem_error(&self.private_key, "no private key found"))?;
        Ok((chain, key))
    }
}

// =============================================================================
// TrustDecision
// =============================================================================

/// Why a certificate was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustBasis {
    /// Chain validated against the CA bundle.
    CaChain,
    /// Leaf thumbprint matched a known-hosts record.
    Pinned,
    /// Verification skipped (insecure mode).
    Skipped,
}

/// Outcome of verifying a certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustDecision {
    /// The certificate is acceptable.
    Accept(TrustBasis),
    /// The certificate is not acceptable.
    Reject {
        /// Host the certificate was presented for.
        host: String,
        /// Leaf thumbprint.
        thumbprint: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl TrustDecision {
    /// Returns `true` for [`TrustDecision::Accept`].
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accept(_))
    }

    /// Converts a rejection into a [`VimError::Trust`].
    pub fn into_result(self) -> VimResult<TrustBasis> {
        match self {
            Self::Accept(basis) => Ok(basis),
            Self::Reject {
                host,
                thumbprint,
                reason,
            } => Err(VimError::trust(host, thumbprint, reason)),
        }
    }
}

// =============================================================================
// TrustStore
// =============================================================================

/// Known hosts plus optional CA roots.
#[derive(Debug)]
pub struct TrustStore {
    known_hosts: RwLock<KnownHosts>,
    roots: Option<Arc<RootCertStore>>,
    insecure: bool,
    provider: Arc<CryptoProvider>,
}

impl TrustStore {
    /// Builds a store from a policy, reading the CA bundle and known hosts.
    pub async fn from_policy(policy: &TrustPolicy) -> VimResult<Self> {
        let known_hosts = match &policy.known_hosts {
            Some(path) => KnownHosts::load(path).await?,
            None => KnownHosts::in_memory(),
        };
        let roots = match &policy.ca_bundle {
            Some(path) => Some(Arc::new(load_roots(path)?)),
            None => None,
        };
        Ok(Self::new(known_hosts, roots, policy.insecure))
    }

    /// Creates a store from parts.
    pub fn new(known_hosts: KnownHosts, roots: Option<Arc<RootCertStore>>, insecure: bool) -> Self {
        Self {
            known_hosts: RwLock::new(known_hosts),
            roots,
            insecure,
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        }
    }

    /// Returns `true` if verification is skipped.
    pub fn is_insecure(&self) -> bool {
        self.insecure
    }

    /// How connections made with this store are verified.
    pub fn verification(&self) -> Verification {
        if self.insecure {
            Verification::Skipped
        } else {
            Verification::Verified
        }
    }

    /// Snapshot of the known hosts.
    pub fn known_hosts(&self) -> KnownHosts {
        self.known_hosts.read().clone()
    }

    /// Decides whether `end_entity` (with `intermediates`) is acceptable for `host`.
    ///
    /// `host` is the known-hosts key (`host` or `host:port`); `server_name`
    /// is what the CA chain must be valid for.
    pub fn verify(
        &self,
        host: &str,
        server_name: &ServerName<'_>,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
    ) -> TrustDecision {
        if self.insecure {
            return TrustDecision::Accept(TrustBasis::Skipped);
        }

        let tp = thumbprint(end_entity.as_ref());
        let mut reason = "certificate signed by unknown authority".to_string();

        if let Some(roots) = &self.roots {
            match WebPkiServerVerifier::builder_with_provider(roots.clone(), self.provider.clone())
                .build()
            {
                Ok(verifier) => match verifier.verify_server_cert(
                    end_entity,
                    intermediates,
                    server_name,
                    &[],
                    UnixTime::now(),
                ) {
                    Ok(_) => return TrustDecision::Accept(TrustBasis::CaChain),
                    Err(e) => reason = e.to_string(),
                },
                Err(e) => reason = format!("invalid CA bundle: {}", e),
            }
        }

        if self.known_hosts.read().is_trusted(host, &tp) {
            return TrustDecision::Accept(TrustBasis::Pinned);
        }

        if let Some(pinned) = self.known_hosts.read().lookup(host) {
            reason = format!("thumbprint does not match pinned {}", pinned);
        }

        TrustDecision::Reject {
            host: host.to_string(),
            thumbprint: tp,
            reason,
        }
    }

    /// Pins a thumbprint for `host`, persisting it to the known-hosts file.
    pub async fn pin(&self, host: &str, thumbprint: &str) -> VimResult<()> {
        let mut hosts = self.known_hosts();
        hosts.pin(TrustRecord::new(host, thumbprint)).await?;
        *self.known_hosts.write() = hosts;
        Ok(())
    }

    /// Builds a rustls client configuration that verifies through this store.
    pub fn client_config(
        self: &Arc<Self>,
        host: &str,
        client_certificate: Option<&ClientCertificate>,
    ) -> VimResult<(rustls::ClientConfig, Arc<TrustVerifier>)> {
        let verifier = Arc::new(TrustVerifier {
            store: self.clone(),
            host: host.to_string(),
            last_seen: Mutex::new(None),
            last_rejection: Mutex::new(None),
        });

        let builder = rustls::ClientConfig::builder_with_provider(self.provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| VimError::configuration("tls", e.to_string()))?
            .dangerous()
            .with_custom_certificate_verifier(verifier.clone());

        let config = match client_certificate {
            Some(identity) => {
                let (chain, key) = identity.load()?;
                builder
                    .with_client_auth_cert(chain, key)
                    .map_err(|e| VimError::configuration("certificate", e.to_string()))?
            }
            None => builder.with_no_client_auth(),
        };

        Ok((config, verifier))
    }
}

// =============================================================================
// TrustVerifier
// =============================================================================

/// rustls verifier backed by a [`TrustStore`] for one host.
#[derive(Debug)]
pub struct TrustVerifier {
    store: Arc<TrustStore>,
    host: String,
    last_seen: Mutex<Option<String>>,
    last_rejection: Mutex<Option<VimError>>,
}

impl TrustVerifier {
    /// Thumbprint of the last leaf certificate presented, accepted or not.
    pub fn last_seen(&self) -> Option<String> {
        self.last_seen.lock().clone()
    }

    /// Takes the last rejection, if any.
    pub fn take_rejection(&self) -> Option<VimError> {
        self.last_rejection.lock().take()
    }
}

impl ServerCertVerifier for TrustVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        *self.last_seen.lock() = Some(thumbprint(end_entity.as_ref()));

        match self
            .store
            .verify(&self.host, server_name, end_entity, intermediates)
        {
            TrustDecision::Accept(basis) => {
                tracing::trace!(host = %self.host, ?basis, "Server certificate accepted");
                Ok(ServerCertVerified::assertion())
            }
            rejection @ TrustDecision::Reject { .. } => {
                tracing::warn!(host = %self.host, "Server certificate rejected");
                *self.last_rejection.lock() = rejection.into_result().err();
                Err(rustls::Error::InvalidCertificate(
                    rustls::CertificateError::UnknownIssuer,
                ))
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.store.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.store.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.store
            .provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

// =============================================================================
// PEM helpers
// =============================================================================

fn open_pem(path: &Path) -> VimResult<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| pem_error(path, e.to_string()))
}

fn pem_error(path: &Path, message: impl Into<String>) -> VimError {
    VimError::configuration(path.display().to_string(), message)
}

fn load_certs(path: &Path) -> VimResult<Vec<CertificateDer<'static>>> {
    let mut reader = open_pem(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| pem_error(path, e.to_string()))?;
    if certs.is_empty() {
        return Err(pem_error(path, "no certificates found"));
    }
    Ok(certs)
}

fn load_roots(path: &Path) -> VimResult<RootCertStore> {
    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(load_certs(path)?);
    tracing::debug!(path = %path.display(), added, ignored, "Loaded CA bundle");
    if added == 0 {
        return Err(pem_error(path, "no usable CA certificates"));
    }
    Ok(roots)
}
