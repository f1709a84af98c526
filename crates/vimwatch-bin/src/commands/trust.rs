// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `trust` command.

use std::time::Duration;

use vimwatch_client::transport::fetch_thumbprint;
use vimwatch_client::{TrustPolicy, TrustStore};
use vimwatch_config::ClientConfig;
use vimwatch_core::Endpoint;

use super::Completion;
use crate::cli::TrustArgs;
use crate::error::{BinError, BinResult};

/// Fetches the certificate thumbprint of `host` and pins it in the
/// known-hosts file.
pub async fn trust(config: &ClientConfig, args: &TrustArgs) -> BinResult<Completion> {
    if args.timeout == 0 {
        return Err(BinError::usage("--timeout must be greater than zero"));
    }
    let endpoint = Endpoint::parse(&args.host)?;
    let host = endpoint.authority();

    let thumbprint = fetch_thumbprint(&endpoint, Duration::from_secs(args.timeout)).await?;

    let known_hosts = config.known_hosts_path();
    let store = TrustStore::from_policy(&TrustPolicy {
        known_hosts: Some(known_hosts.clone()),
        ..Default::default()
    })
    .await?;
    store.pin(&host, &thumbprint).await?;

    println!("{} {}", host, thumbprint);
    tracing::info!(host = %host, file = %known_hosts.display(), "Thumbprint pinned");
    Ok(Completion::Done)
}
