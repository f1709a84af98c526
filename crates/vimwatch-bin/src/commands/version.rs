// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `version` command.

use super::Completion;
use crate::error::BinResult;

/// Executes the `version` command to display version information.
pub fn version() -> BinResult<Completion> {
    println!("vimwatch - session-aware property watcher");
    println!();
    println!("Version Information:");
    println!("  vimwatch-bin:    {}", env!("CARGO_PKG_VERSION"));
    println!("  vimwatch-core:   {}", vimwatch_core::VERSION);
    println!("  vimwatch-client: {}", vimwatch_client::VERSION);
    println!("  vimwatch-config: {}", vimwatch_config::VERSION);
    println!();
    println!("Build Information:");
    println!("  Target:       {}", std::env::consts::ARCH);
    println!("  OS:           {}", std::env::consts::OS);
    println!();
    println!("License: PolyForm Noncommercial License 1.0.0");
    println!("Copyright (c) 2025 Sylvex. All rights reserved.");

    Ok(Completion::Done)
}
