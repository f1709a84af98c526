// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Known-hosts thumbprint store.
//!
//! The file holds one [`TrustRecord`] per line:
//!
//! ```text
//! # host[:port]        SHA-1 thumbprint of the leaf certificate
//! vc.example.com       3F:2A:...:9C
//! esx01.lab:8443       AB:CD:...:01
//! ```
//!
//! Blank lines and `#` comments are ignored. When a host appears more than
//! once the last line wins, so pinning a new thumbprint is an append.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use vimwatch_core::{VimError, VimResult};

/// Computes the SHA-1 thumbprint of a DER certificate as colon separated
/// upper-case hex, e.g. `3F:2A:...`.
pub fn thumbprint(der: &[u8]) -> String {
    let digest = Sha1::digest(der);
    let hex = hex::encode_upper(digest);
    hex.as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).into_owned())
        .collect::<Vec<_>>()
        .join(":")
}

/// Normalizes a thumbprint for comparison: upper-case, colon separated.
pub fn normalize_thumbprint(input: &str) -> String {
    let digits: String = input
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    digits
        .as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).into_owned())
        .collect::<Vec<_>>()
        .join(":")
}

// =============================================================================
// TrustRecord
// =============================================================================

/// One known-hosts entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrustRecord {
    /// Host, with port when non-default.
    pub host: String,
    /// Normalized SHA-1 thumbprint.
    pub thumbprint: String,
}

impl TrustRecord {
    /// Creates a record, normalizing the thumbprint.
    pub fn new(host: impl Into<String>, thumbprint: &str) -> Self {
        Self {
            host: host.into(),
            thumbprint: normalize_thumbprint(thumbprint),
        }
    }
}

// =============================================================================
// KnownHosts
// =============================================================================

/// In-memory view of a known-hosts file.
#[derive(Debug, Clone, Default)]
pub struct KnownHosts {
    path: Option<PathBuf>,
    records: Vec<TrustRecord>,
}

impl KnownHosts {
    /// Creates an empty store not backed by a file.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads the store from `path`. A missing file yields an empty store
    /// that will be created on the first [`KnownHosts::pin`].
    pub async fn load(path: impl Into<PathBuf>) -> VimResult<Self> {
        let path = path.into();
        let records = match tokio::fs::read_to_string(&path).await {
            Ok(content) => parse(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(VimError::cache_io(&path, e)),
        };
        tracing::debug!(path = %path.display(), records = records.len(), "Loaded known hosts");
        Ok(Self {
            path: Some(path),
            records,
        })
    }

    /// Parses known-hosts content without a backing file.
    pub fn from_content(content: &str) -> Self {
        Self {
            path: None,
            records: parse(content),
        }
    }

    /// The backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// All records in file order.
    pub fn records(&self) -> &[TrustRecord] {
        &self.records
    }

    /// Returns the effective thumbprint pinned for `host`.
    pub fn lookup(&self, host: &str) -> Option<&str> {
        self.records
            .iter()
            .rev()
            .find(|r| r.host.eq_ignore_ascii_case(host))
            .map(|r| r.thumbprint.as_str())
    }

    /// Returns `true` if `thumbprint` is pinned for `host`.
    pub fn is_trusted(&self, host: &str, thumbprint: &str) -> bool {
        self.lookup(host)
            .is_some_and(|pinned| pinned == normalize_thumbprint(thumbprint))
    }

    /// Pins `record`, appending it to the backing file.
    ///
    /// Pinning a thumbprint that is already effective is a no-op.
    pub async fn pin(&mut self, record: TrustRecord) -> VimResult<()> {
        if self.lookup(&record.host) == Some(record.thumbprint.as_str()) {
            return Ok(());
        }

        if let Some(path) = &self.path {
            append_line(path, &format!("{} {}\n", record.host, record.thumbprint)).await?;
        }

        tracing::info!(host = %record.host, thumbprint = %record.thumbprint, "Pinned certificate thumbprint");
        self.records.push(record);
        Ok(())
    }
}

fn parse(content: &str) -> Vec<TrustRecord> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some(host), Some(tp)) => Some(TrustRecord::new(host, tp)),
                _ => {
                    tracing::warn!(line, "Ignoring malformed known-hosts line");
                    None
                }
            }
        })
        .collect()
}

async fn append_line(path: &Path, line: &str) -> VimResult<()> {
    use tokio::io::AsyncWriteExt;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| VimError::cache_io(parent, e))?;
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options
        .open(path)
        .await
        .map_err(|e| VimError::cache_io(path, e))?;
    file.write_all(line.as_bytes())
        .await
        .map_err(|e| VimError::cache_io(path, e))?;
    file.flush().await.map_err(|e| VimError::cache_io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thumbprint_format() {
        let tp = thumbprint(b"certificate");
        assert_eq!(tp.len(), 59);
        assert_eq!(tp.matches(':').count(), 19);
        assert_eq!(tp, tp.to_uppercase());
    }

    #[test]
    fn test_normalize_thumbprint() {
        assert_eq!(normalize_thumbprint("ab:cd:ef"), "AB:CD:EF");
        assert_eq!(normalize_thumbprint("abcdef"), "AB:CD:EF");
    }

    #[test]
    fn test_parse_and_lookup_last_wins() {
        let hosts = KnownHosts::from_content(
            "# comment\n\nvc.example.com aa:bb\nesx:8443 CC:DD\nvc.example.com EE:FF\nbroken\n",
        );
        assert_eq!(hosts.records().len(), 3);
        assert_eq!(hosts.lookup("vc.example.com"), Some("EE:FF"));
        assert!(hosts.is_trusted("ESX:8443", "cc:dd"));
        assert!(!hosts.is_trusted("vc.example.com", "AA:BB"));
        assert!(hosts.lookup("other").is_none());
    }

    #[tokio::test]
    async fn test_pin_appends_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("known_hosts");

        let mut hosts = KnownHosts::load(&path).await.unwrap();
        assert!(hosts.records().is_empty());

        hosts.pin(TrustRecord::new("vc", "01:02")).await.unwrap();
        hosts.pin(TrustRecord::new("vc", "01:02")).await.unwrap();
        hosts.pin(TrustRecord::new("vc", "03:04")).await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content.lines().count(), 2);

        let reloaded = KnownHosts::load(&path).await.unwrap();
        assert!(reloaded.is_trusted("vc", "03:04"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
