// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `login` command.

use vimwatch_client::{CredentialSource, CredentialSpec};
use vimwatch_config::ClientConfig;
use vimwatch_core::Secret;

use super::{open, Completion};
use crate::cli::LoginArgs;
use crate::error::{BinError, BinResult};
use crate::settings;

/// Executes the `login` command.
///
/// With `--issue-cookie` or `--clone` the session is left open so the
/// printed material stays valid.
pub async fn login(config: ClientConfig, args: &LoginArgs) -> BinResult<Completion> {
    let source = credential_source(&config, args).await?;
    let credentials = CredentialSpec::from_source(source)?;
    let kind = credentials.kind();

    let handle = open(&config, credentials, false).await?;
    let completion = Completion::from_verification(handle.verification());

    let session = handle
        .session()
        .await
        .ok_or_else(|| BinError::io("no session after login"))?;
    tracing::info!(
        strategy = %kind,
        restored = session.restored,
        user = session.user.as_deref().unwrap_or("-"),
        "Login complete"
    );

    let mut keep_open = false;
    if args.issue_cookie {
        let cookie = handle
            .cookie()
            .await
            .ok_or_else(|| BinError::io("session has no cookie"))?;
        println!("{}", cookie.expose());
        keep_open = true;
    }
    if args.clone {
        let ticket = handle.clone_ticket().await?;
        println!("{}", ticket.expose());
        keep_open = true;
    }

    if !keep_open {
        handle.close().await?;
    }
    Ok(completion)
}

/// Credentials from the configuration, with any strategy flag replacing the
/// configured strategy. The user name is kept either way.
async fn credential_source(config: &ClientConfig, args: &LoginArgs) -> BinResult<CredentialSource> {
    let mut source = settings::credential_source(config);
    let overridden = args.cookie.is_some()
        || args.ticket.is_some()
        || args.token.is_some()
        || args.cert.is_some();
    if !overridden {
        return Ok(source);
    }

    source = CredentialSource {
        username: source.username,
        ..Default::default()
    };
    if let Some(cookie) = &args.cookie {
        source.cookie = Some(Secret::new(cookie.clone()));
    }
    if let Some(ticket) = &args.ticket {
        source.ticket = Some(Secret::new(ticket.clone()));
    }
    if let Some(path) = &args.token {
        let token = tokio::fs::read_to_string(path).await.map_err(|e| {
            BinError::io(e.to_string()).with_context(format!("reading {}", path.display()))
        })?;
        source.token = Some(Secret::new(token.trim()));
    }
    if let Some(cert) = &args.cert {
        source.certificate = Some(cert.clone());
        source.private_key = args.key.clone();
        source.extension_key = args.extension.clone();
    }
    Ok(source)
}
