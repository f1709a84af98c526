// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! vimwatch - session-aware property watcher
//!
//! Main binary entry point.

use vimwatch_bin::{
    cli::LogFormat, execute, init_logging, report_error_and_exit, settings, BinError, Cli,
    Commands,
};
use vimwatch_config::ClientConfig;

fn main() {
    let cli = Cli::parse_args();

    let config = match settings::load(&cli) {
        Ok(config) => config,
        Err(_) if matches!(cli.command, Commands::Version) => ClientConfig::default(),
        Err(e) => {
            init_logging(cli.log_level_override().unwrap_or("info"), LogFormat::Text);
            report_error_and_exit(e);
        }
    };

    let (level, format) = settings::logging(&cli, &config);
    init_logging(&level, format);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => report_error_and_exit(BinError::io(format!("starting runtime: {}", e))),
    };

    match runtime.block_on(execute(&cli, config)) {
        Ok(completion) => std::process::exit(completion.exit_code()),
        Err(e) => report_error_and_exit(e),
    }
}
