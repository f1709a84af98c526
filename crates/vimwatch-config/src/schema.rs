// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration schema for vimwatch.
//!
//! ```yaml
//! url: https://vc.example.com/sdk
//! username: administrator@vsphere.local
//! password: ${VC_PASSWORD}
//! insecure: false
//! persist_session: true
//! tls:
//!   ca_certs: /etc/ssl/vc-ca.pem
//!   known_hosts: ~/.vimwatch/known_hosts
//! keepalive:
//!   enabled: true
//! watch:
//!   max_wait_secs: 30
//!   max_object_updates: 100
//! logging:
//!   level: info
//!   format: text
//! ```

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vimwatch_core::{Endpoint, Secret};

use crate::error::{ConfigError, ConfigResult};

/// Directory name under the user's home used when no home override is set.
pub const DEFAULT_HOME_DIR: &str = ".vimwatch";

/// Default maximum object updates per wait page.
pub const DEFAULT_MAX_OBJECT_UPDATES: u32 = 100;

/// Default TLS handshake timeout in seconds.
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// ClientConfig
// =============================================================================

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Endpoint URL. User information embedded in it is split into
    /// `username`/`password` by the loader.
    #[serde(default)]
    pub url: Option<String>,

    /// User name for password login.
    #[serde(default)]
    pub username: Option<String>,

    /// Password for password login.
    #[serde(default)]
    pub password: Option<Secret>,

    /// Client certificate (PEM) for certificate login.
    #[serde(default)]
    pub certificate: Option<PathBuf>,

    /// Private key (PEM) matching `certificate`.
    #[serde(default)]
    pub private_key: Option<PathBuf>,

    /// Extension key used with certificate login.
    #[serde(default)]
    pub extension_key: Option<String>,

    /// Pre-issued clone ticket.
    #[serde(default)]
    pub ticket: Option<Secret>,

    /// Signed token.
    #[serde(default)]
    pub token: Option<Secret>,

    /// Raw session cookie to reuse.
    #[serde(default)]
    pub cookie: Option<Secret>,

    /// Skip server certificate verification.
    #[serde(default)]
    pub insecure: bool,

    /// Persist sessions in the local cache.
    #[serde(default = "default_true")]
    pub persist_session: bool,

    /// Override for the vimwatch home directory.
    #[serde(default)]
    pub home: Option<PathBuf>,

    /// Override for the session cache directory.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// TLS settings.
    #[serde(default)]
    pub tls: TlsConfig,

    /// Keepalive settings.
    #[serde(default)]
    pub keepalive: KeepaliveConfig,

    /// Retry settings.
    #[serde(default)]
    pub retry: RetrySettings,

    /// Watch settings.
    #[serde(default)]
    pub watch: WatchConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_true() -> bool {
    true
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: None,
            username: None,
            password: None,
            certificate: None,
            private_key: None,
            extension_key: None,
            ticket: None,
            token: None,
            cookie: None,
            insecure: false,
            persist_session: true,
            home: None,
            cache_dir: None,
            tls: TlsConfig::default(),
            keepalive: KeepaliveConfig::default(),
            retry: RetrySettings::default(),
            watch: WatchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(url) = &self.url {
            Endpoint::parse(url)?;
        }
        match (&self.certificate, &self.private_key) {
            (Some(_), None) => {
                return Err(ConfigError::validation(
                    "private_key",
                    "certificate login requires a private key",
                ))
            }
            (None, Some(_)) => {
                return Err(ConfigError::validation(
                    "certificate",
                    "private key given without a certificate",
                ))
            }
            _ => {}
        }
        self.tls.validate()?;
        self.keepalive.validate()?;
        self.retry.validate()?;
        self.watch.validate()?;
        Ok(())
    }

    /// Returns the parsed endpoint, failing when no URL is configured.
    pub fn endpoint(&self) -> ConfigResult<Endpoint> {
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| ConfigError::missing_field("url"))?;
        Ok(Endpoint::parse(url)?)
    }

    /// The vimwatch home directory: explicit override, else `~/.vimwatch`.
    pub fn home_dir(&self) -> PathBuf {
        self.home.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(DEFAULT_HOME_DIR)
        })
    }

    /// The session cache directory.
    pub fn session_cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| self.home_dir().join("sessions"))
    }

    /// The known-hosts file.
    pub fn known_hosts_path(&self) -> PathBuf {
        self.tls
            .known_hosts
            .clone()
            .unwrap_or_else(|| self.home_dir().join("known_hosts"))
    }
}

// =============================================================================
// TlsConfig
// =============================================================================

/// TLS verification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// PEM bundle of trusted CA certificates.
    #[serde(default)]
    pub ca_certs: Option<PathBuf>,

    /// Known-hosts thumbprint file.
    #[serde(default)]
    pub known_hosts: Option<PathBuf>,

    /// TLS handshake timeout in seconds.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
}

fn default_handshake_timeout() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT_SECS
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            ca_certs: None,
            known_hosts: None,
            handshake_timeout_secs: DEFAULT_HANDSHAKE_TIMEOUT_SECS,
        }
    }
}

impl TlsConfig {
    /// Validates the TLS configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.handshake_timeout_secs == 0 {
            return Err(ConfigError::validation(
                "tls.handshake_timeout_secs",
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Handshake timeout as a duration.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

// =============================================================================
// KeepaliveConfig
// =============================================================================

/// Keepalive settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepaliveConfig {
    /// Run the keepalive timer while a session is open.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Fixed interval in seconds. When unset the interval is derived from
    /// the server's advertised session timeout.
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: None,
        }
    }
}

impl KeepaliveConfig {
    /// Validates the keepalive configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.interval_secs == Some(0) {
            return Err(ConfigError::validation(
                "keepalive.interval_secs",
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Fixed interval, if configured.
    pub fn interval(&self) -> Option<Duration> {
        self.interval_secs.map(Duration::from_secs)
    }
}

// =============================================================================
// RetrySettings
// =============================================================================

/// Transport retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts for idempotent requests.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    vimwatch_core::DEFAULT_MAX_ATTEMPTS
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

impl RetrySettings {
    /// Validates the retry configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::validation(
                "retry.max_attempts",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// WatchConfig
// =============================================================================

/// Property watch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Server-side block time per wait call; `0` is a single check.
    #[serde(default)]
    pub max_wait_secs: Option<u32>,

    /// Object updates per page before the server truncates.
    #[serde(default = "default_max_object_updates")]
    pub max_object_updates: u32,
}

fn default_max_object_updates() -> u32 {
    DEFAULT_MAX_OBJECT_UPDATES
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            max_wait_secs: None,
            max_object_updates: DEFAULT_MAX_OBJECT_UPDATES,
        }
    }
}

impl WatchConfig {
    /// Validates the watch configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_object_updates == 0 {
            return Err(ConfigError::validation(
                "watch.max_object_updates",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// LoggingConfig
// =============================================================================

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Log format.
    #[serde(default)]
    pub format: LogFormat,
}

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Returns the filter directive for this level.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Parses a level name.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// Compact single-line text.
    Compact,
    /// JSON lines.
    Json,
}

impl LogFormat {
    /// Parses a format name.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "text" | "pretty" => Some(LogFormat::Text),
            "compact" => Some(LogFormat::Compact),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}
