// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Transport identity: known-hosts pinning, CA bundles, client certificates.

pub mod store;
pub mod verifier;

pub use store::{normalize_thumbprint, thumbprint, KnownHosts, TrustRecord};
pub use verifier::{
    ClientCertificate, TrustBasis, TrustDecision, TrustPolicy, TrustStore, TrustVerifier,
};
