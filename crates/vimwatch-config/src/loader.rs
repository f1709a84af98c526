// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration loading and processing for vimwatch.
//!
//! # Loading Pipeline
//!
//! 1. Read the YAML/TOML file, if one is given (a missing file is an error,
//!    no file at all means defaults)
//! 2. Resolve `${VAR}` / `${VAR:default}` placeholders
//! 3. Apply `VIMWATCH_*` environment overrides
//! 4. Split credentials embedded in the URL into `username`/`password`
//! 5. Validate
//!
//! # Environment Variable Override
//!
//! ```text
//! VIMWATCH_URL=https://vc.example.com/sdk
//! VIMWATCH_USERNAME=administrator@vsphere.local
//! VIMWATCH_PASSWORD=...
//! VIMWATCH_INSECURE=false
//! VIMWATCH_PERSIST_SESSION=true
//! VIMWATCH_TLS_CA_CERTS=/etc/ssl/vc.pem
//! VIMWATCH_TLS_KNOWN_HOSTS=~/.vimwatch/known_hosts
//! VIMWATCH_HOME=~/.vimwatch
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use vimwatch_core::{Endpoint, Secret};

use crate::error::{ConfigError, ConfigResult};
use crate::schema::{ClientConfig, LogFormat, LogLevel};

/// Default environment variable prefix.
pub const DEFAULT_ENV_PREFIX: &str = "VIMWATCH";

// =============================================================================
// ConfigLoader
// =============================================================================

/// Configuration loader for vimwatch.
///
/// # Examples
///
/// ```no_run
/// use vimwatch_config::loader::ConfigLoader;
///
/// let config = ConfigLoader::new().load(Some("vimwatch.yaml")).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    env_prefix: String,
    resolve_env_vars: bool,
}

impl ConfigLoader {
    /// Creates a new configuration loader with default settings.
    pub fn new() -> Self {
        Self {
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            resolve_env_vars: true,
        }
    }

    /// Sets the environment variable prefix.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Enables or disables environment variable resolution.
    pub fn with_env_vars(mut self, enabled: bool) -> Self {
        self.resolve_env_vars = enabled;
        self
    }

    /// Loads configuration from an optional file plus the environment.
    pub fn load(&self, path: Option<impl AsRef<Path>>) -> ConfigResult<ClientConfig> {
        self.load_with(path, |name| env::var(name).ok())
    }

    /// Loads configuration, reading variables through `lookup`.
    pub fn load_with<F>(&self, path: Option<impl AsRef<Path>>, lookup: F) -> ConfigResult<ClientConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => {
                let path = path.as_ref();
                info!(path = %path.display(), "Loading configuration");
                let content = read_file(path)?;
                let format = ConfigFormat::from_path(path)?;
                let content = if self.resolve_env_vars {
                    resolve_env_placeholders(&content, &lookup)
                } else {
                    content
                };
                parse_str(&content, format).map_err(|e| match e {
                    ConfigError::Serialization { message } => ConfigError::parse(path, message),
                    other => other,
                })?
            }
            None => ClientConfig::default(),
        };

        if self.resolve_env_vars {
            self.apply_env_overrides(&mut config, &lookup)?;
        }
        split_url_credentials(&mut config)?;
        config.validate()?;

        debug!(
            url = config.url.as_deref().unwrap_or("<unset>"),
            persist_session = config.persist_session,
            insecure = config.insecure,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Loads configuration from a string. Environment overrides are not applied.
    pub fn load_from_str(&self, content: &str, format: ConfigFormat) -> ConfigResult<ClientConfig> {
        let mut config = parse_str(content, format)?;
        split_url_credentials(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides<F>(&self, config: &mut ClientConfig, lookup: &F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| -> (String, Option<String>) {
            let name = format!("{}_{}", self.env_prefix, suffix);
            let value = lookup(&name).filter(|v| !v.is_empty());
            (name, value)
        };

        if let (_, Some(value)) = var("URL") {
            config.url = Some(value);
        }
        if let (_, Some(value)) = var("USERNAME") {
            config.username = Some(value);
        }
        if let (_, Some(value)) = var("PASSWORD") {
            config.password = Some(Secret::new(value));
        }
        if let (_, Some(value)) = var("CERTIFICATE") {
            config.certificate = Some(PathBuf::from(value));
        }
        if let (_, Some(value)) = var("PRIVATE_KEY") {
            config.private_key = Some(PathBuf::from(value));
        }
        if let (_, Some(value)) = var("INSECURE") {
            config.insecure = parse_bool(&value);
        }
        if let (_, Some(value)) = var("PERSIST_SESSION") {
            config.persist_session = parse_bool(&value);
        }
        if let (_, Some(value)) = var("TLS_CA_CERTS") {
            config.tls.ca_certs = Some(PathBuf::from(value));
        }
        if let (_, Some(value)) = var("TLS_KNOWN_HOSTS") {
            config.tls.known_hosts = Some(PathBuf::from(value));
        }
        if let (name, Some(value)) = var("TLS_HANDSHAKE_TIMEOUT") {
            config.tls.handshake_timeout_secs = parse_seconds(&name, &value)?;
        }
        if let (_, Some(value)) = var("HOME") {
            config.home = Some(PathBuf::from(value));
        }
        if let (name, Some(value)) = var("KEEPALIVE_INTERVAL") {
            config.keepalive.interval_secs = Some(parse_seconds(&name, &value)?);
        }
        if let (name, Some(value)) = var("LOG_LEVEL") {
            config.logging.level = LogLevel::parse(&value)
                .ok_or_else(|| ConfigError::invalid_env_var(name, "expected trace|debug|info|warn|error"))?;
        }
        if let (name, Some(value)) = var("LOG_FORMAT") {
            config.logging.format = LogFormat::parse(&value)
                .ok_or_else(|| ConfigError::invalid_env_var(name, "expected text|compact|json"))?;
        }

        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// ConfigFormat
// =============================================================================

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML format.
    Yaml,
    /// TOML format.
    Toml,
}

impl ConfigFormat {
    /// Determines the format from a file path.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            Some(other) => Err(ConfigError::unsupported_format(other)),
            None => Err(ConfigError::unsupported_format("(no extension)")),
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn read_file(path: &Path) -> ConfigResult<String> {
    if !path.exists() {
        return Err(ConfigError::file_not_found(path));
    }
    fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))
}

fn parse_str(content: &str, format: ConfigFormat) -> ConfigResult<ClientConfig> {
    match format {
        ConfigFormat::Yaml => {
            let source = config::Config::builder()
                .add_source(config::File::from_str(content, config::FileFormat::Yaml))
                .build()
                .map_err(|e| ConfigError::serialization(e.to_string()))?;
            source
                .try_deserialize()
                .map_err(|e| ConfigError::serialization(e.to_string()))
        }
        ConfigFormat::Toml => {
            toml::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
        }
    }
}

/// Resolves `${VAR_NAME}` and `${VAR_NAME:default}` placeholders.
fn resolve_env_placeholders<F>(content: &str, lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = String::with_capacity(content.len());
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' || chars.peek() != Some(&'{') {
            result.push(c);
            continue;
        }
        chars.next();

        let mut var_content = String::new();
        let mut found_close = false;
        for c in chars.by_ref() {
            if c == '}' {
                found_close = true;
                break;
            }
            var_content.push(c);
        }

        if !found_close {
            result.push_str("${");
            result.push_str(&var_content);
            continue;
        }

        let (var_name, default_value) = match var_content.split_once(':') {
            Some((name, default)) => (name, Some(default)),
            None => (var_content.as_str(), None),
        };

        match (lookup(var_name), default_value) {
            (Some(value), _) => result.push_str(&value),
            (None, Some(default)) => result.push_str(default),
            (None, None) => {
                warn!("Environment variable '{}' not found", var_name);
                result.push_str(&format!("${{{}}}", var_name));
            }
        }
    }

    result
}

/// Moves `user:password@` out of the URL into the credential fields.
/// Explicit `username`/`password` settings win over URL userinfo.
fn split_url_credentials(config: &mut ClientConfig) -> ConfigResult<()> {
    let Some(url) = config.url.clone() else {
        return Ok(());
    };
    let (endpoint, user, password) = Endpoint::split_userinfo(&url)?;
    if config.username.is_none() {
        config.username = user;
    }
    if config.password.is_none() {
        config.password = password.map(Secret::new);
    }
    config.url = Some(endpoint.url());
    Ok(())
}

fn parse_seconds(name: &str, value: &str) -> ConfigResult<u64> {
    let trimmed = value.trim().trim_end_matches('s');
    trimmed
        .parse::<u64>()
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| ConfigError::invalid_env_var(name, "expected a positive number of seconds"))
}

/// Parses a boolean flag value.
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "true" | "1" | "yes" | "on" | "enabled"
    )
}

// =============================================================================
// Convenience Functions
// =============================================================================

/// Loads configuration from an optional file and the process environment.
pub fn load_config(path: Option<impl AsRef<Path>>) -> ConfigResult<ClientConfig> {
    ConfigLoader::new().load(path)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn write_temp(ext: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(&format!(".{}", ext))
            .tempfile()
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_yaml_with_placeholders() {
        let file = write_temp(
            "yaml",
            r#"
url: https://vc.example.com/sdk
username: ${VC_USER:root}
password: ${VC_PASS}
persist_session: false
watch:
  max_wait_secs: 30
"#,
        );
        let config = ConfigLoader::new()
            .load_with(Some(file.path()), env_of(&[("VC_PASS", "s3cret")]))
            .unwrap();

        assert_eq!(config.username.as_deref(), Some("root"));
        assert_eq!(config.password.as_ref().map(Secret::expose), Some("s3cret"));
        assert!(!config.persist_session);
        assert_eq!(config.watch.max_wait_secs, Some(30));
        assert_eq!(config.watch.max_object_updates, 100);
    }

    #[test]
    fn test_load_toml() {
        let file = write_temp(
            "toml",
            r#"
url = "vc.example.com"
insecure = true

[retry]
max_attempts = 5
"#,
        );
        let config = ConfigLoader::new()
            .load_with(Some(file.path()), env_of(&[]))
            .unwrap();

        assert_eq!(config.url.as_deref(), Some("https://vc.example.com/sdk"));
        assert!(config.insecure);
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn test_no_file_uses_env_only() {
        let config = ConfigLoader::new()
            .load_with(
                None::<&Path>,
                env_of(&[
                    ("VIMWATCH_URL", "https://admin:pw@vc.local/sdk"),
                    ("VIMWATCH_PERSIST_SESSION", "0"),
                    ("VIMWATCH_HOME", "/tmp/vw-home"),
                ]),
            )
            .unwrap();

        assert_eq!(config.url.as_deref(), Some("https://vc.local/sdk"));
        assert_eq!(config.username.as_deref(), Some("admin"));
        assert_eq!(config.password.as_ref().map(Secret::expose), Some("pw"));
        assert!(!config.persist_session);
        assert_eq!(config.session_cache_dir(), PathBuf::from("/tmp/vw-home/sessions"));
    }

    #[test]
    fn test_explicit_username_wins_over_url() {
        let config = ConfigLoader::new()
            .load_with(
                None::<&Path>,
                env_of(&[
                    ("VIMWATCH_URL", "https://admin@vc.local"),
                    ("VIMWATCH_USERNAME", "operator"),
                ]),
            )
            .unwrap();
        assert_eq!(config.username.as_deref(), Some("operator"));
    }

    #[test]
    fn test_invalid_env_values() {
        let err = ConfigLoader::new()
            .load_with(None::<&Path>, env_of(&[("VIMWATCH_LOG_LEVEL", "chatty")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar { .. }));

        let err = ConfigLoader::new()
            .load_with(None::<&Path>, env_of(&[("VIMWATCH_KEEPALIVE_INTERVAL", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar { .. }));
    }

    #[test]
    fn test_missing_file_and_bad_extension() {
        let err = ConfigLoader::new()
            .load_with(Some("/nonexistent/vimwatch.yaml"), env_of(&[]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));

        let file = write_temp("ini", "url=x");
        let err = ConfigLoader::new()
            .load_with(Some(file.path()), env_of(&[]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_unterminated_placeholder_kept() {
        let out = resolve_env_placeholders("a ${B", &env_of(&[]));
        assert_eq!(out, "a ${B");
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("TRUE"));
        assert!(parse_bool("on"));
        assert!(!parse_bool("off"));
        assert!(!parse_bool(""));
    }
}
