// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `validate` command.

use vimwatch_client::CredentialSpec;
use vimwatch_config::ClientConfig;
use vimwatch_core::Secret;

use super::Completion;
use crate::cli::{Cli, OutputFormat, ValidateArgs};
use crate::error::{BinError, BinResult};
use crate::settings;

/// Executes the `validate` command. Loading already rejected hard errors;
/// this reports the effective settings and anything suspicious.
pub fn validate(cli: &Cli, config: &ClientConfig, args: &ValidateArgs) -> BinResult<Completion> {
    let source = cli
        .config
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(defaults and environment)".to_string());
    let warnings = collect_warnings(config);
    let credentials = CredentialSpec::from_source(settings::credential_source(config))
        .map(|c| c.kind().to_string())
        .unwrap_or_else(|_| "none".to_string());
    let url = config.url.clone().unwrap_or_else(|| "(not set)".to_string());

    match args.format {
        OutputFormat::Text => {
            println!("✓ Configuration is valid: {}", source);
            println!();
            println!("Summary:");
            println!("  URL: {}", url);
            println!("  Credentials: {}", credentials);
            println!("  Verification: {}", if config.insecure { "disabled" } else { "enabled" });
            println!("  Known hosts: {}", config.known_hosts_path().display());
            println!(
                "  Session cache: {}",
                if config.persist_session {
                    config.session_cache_dir().display().to_string()
                } else {
                    "disabled".to_string()
                }
            );
            println!("  Keepalive: {}", if config.keepalive.enabled { "enabled" } else { "disabled" });
            println!("  Retry attempts: {}", config.retry.max_attempts);

            if !warnings.is_empty() {
                println!();
                println!("Warnings:");
                for warning in &warnings {
                    println!("  ⚠ {}", warning);
                }
            }

            if args.show_config {
                println!();
                println!("Parsed configuration:");
                println!(
                    "{}",
                    serde_json::to_string_pretty(&redacted(config))
                        .unwrap_or_else(|_| "(serialization error)".to_string())
                );
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "valid": true,
                "config_path": source,
                "summary": {
                    "url": config.url,
                    "credentials": credentials,
                    "insecure": config.insecure,
                    "known_hosts": config.known_hosts_path(),
                    "persist_session": config.persist_session,
                    "session_cache": config.session_cache_dir(),
                    "keepalive": config.keepalive.enabled,
                    "retry_attempts": config.retry.max_attempts,
                },
                "warnings": warnings,
                "config": if args.show_config { Some(redacted(config)) } else { None },
            });
            let rendered = serde_json::to_string_pretty(&output)
                .map_err(|e| BinError::io(format!("encoding output: {}", e)))?;
            println!("{}", rendered);
        }
    }

    if args.strict && !warnings.is_empty() {
        return Err(BinError::usage(format!(
            "Strict mode: {} warning(s) found",
            warnings.len()
        )));
    }

    Ok(Completion::Done)
}

/// Settings that load fine but will likely not do what the user wants.
pub fn collect_warnings(config: &ClientConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.url.is_none() {
        warnings.push("No service URL configured".to_string());
    }
    if let Err(e) = CredentialSpec::from_source(settings::credential_source(config)) {
        warnings.push(format!("Credentials: {}", e));
    }
    if config.insecure {
        warnings.push("Certificate verification is disabled".to_string());
    }
    if let Some(ca) = &config.tls.ca_certs {
        if !ca.exists() {
            warnings.push(format!("CA bundle does not exist: {}", ca.display()));
        }
    }
    for (name, path) in [
        ("Certificate", &config.certificate),
        ("Private key", &config.private_key),
    ] {
        if let Some(path) = path {
            if !path.exists() {
                warnings.push(format!("{} does not exist: {}", name, path.display()));
            }
        }
    }
    if config.password.is_some() && config.persist_session {
        warnings.push(
            "Password is set while sessions persist; the cached session is used first".to_string(),
        );
    }

    warnings
}

/// A copy of `config` with every secret masked.
pub fn redacted(config: &ClientConfig) -> ClientConfig {
    let mask = |secret: &Option<Secret>| secret.as_ref().map(|_| Secret::new("***"));
    ClientConfig {
        password: mask(&config.password),
        ticket: mask(&config.ticket),
        token: mask(&config.token),
        cookie: mask(&config.cookie),
        ..config.clone()
    }
}
