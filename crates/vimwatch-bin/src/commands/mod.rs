// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI command implementations.
//!
//! - `login`: log in or restore a cached session
//! - `logout`: end the session on the server
//! - `watch`: stream property changes
//! - `trust`: pin a server certificate thumbprint
//! - `validate`: validate the configuration
//! - `version`: show version information

mod login;
mod logout;
mod trust;
mod validate;
mod version;
mod watch;

pub use login::login;
pub use logout::logout;
pub use trust::trust;
pub use validate::validate;
pub use version::version;
pub use watch::watch;

use vimwatch_client::{CredentialSpec, SessionHandle};
use vimwatch_config::ClientConfig;
use vimwatch_core::Verification;

use crate::cli::{Cli, Commands};
use crate::error::{BinResult, EXIT_UNVERIFIED};
use crate::settings;

/// How a successful command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Finished over a verified connection, or without connecting.
    Done,
    /// Finished, but the server certificate was not verified.
    Unverified,
}

impl Completion {
    /// The completion for a command that used `verification`.
    pub fn from_verification(verification: Verification) -> Self {
        if verification.is_verified() {
            Self::Done
        } else {
            Self::Unverified
        }
    }

    /// Process exit code.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Done => 0,
            Self::Unverified => EXIT_UNVERIFIED,
        }
    }
}

/// Executes the appropriate command based on CLI arguments.
pub async fn execute(cli: &Cli, config: ClientConfig) -> BinResult<Completion> {
    match &cli.command {
        Commands::Login(args) => login::login(config, args).await,
        Commands::Logout => logout::logout(config).await,
        Commands::Watch(args) => watch::watch(config, args).await,
        Commands::Trust(args) => trust::trust(&config, args).await,
        Commands::Validate(args) => validate::validate(cli, &config, args),
        Commands::Version => version::version(),
    }
}

/// Connects with the configured endpoint and trust settings.
pub(crate) async fn open(
    config: &ClientConfig,
    credentials: CredentialSpec,
    keepalive: bool,
) -> BinResult<SessionHandle> {
    let endpoint = config.endpoint()?;
    let handle = vimwatch_client::connect(
        endpoint,
        credentials,
        settings::trust_policy(config),
        settings::connect_options(config, keepalive),
    )
    .await?;
    if !handle.verification().is_verified() {
        tracing::warn!("Server certificate was not verified");
    }
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_exit_codes() {
        assert_eq!(Completion::from_verification(Verification::Verified), Completion::Done);
        assert_eq!(Completion::from_verification(Verification::Skipped).exit_code(), 10);
        assert_eq!(Completion::Done.exit_code(), 0);
    }
}
