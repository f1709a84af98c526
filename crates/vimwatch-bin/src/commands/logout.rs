// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `logout` command.

use vimwatch_client::CredentialSpec;
use vimwatch_config::ClientConfig;

use super::{open, Completion};
use crate::error::BinResult;
use crate::settings;

/// Executes the `logout` command: restores (or creates) the session, ends
/// it on the server and drops its cache entry.
pub async fn logout(config: ClientConfig) -> BinResult<Completion> {
    let credentials = CredentialSpec::from_source(settings::credential_source(&config))?;
    let handle = open(&config, credentials, false).await?;
    let completion = Completion::from_verification(handle.verification());
    handle.logout().await?;
    Ok(completion)
}
