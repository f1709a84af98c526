// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! On-disk session cache.
//!
//! One JSON file per (endpoint, identity) pair:
//!
//! ```text
//! <cache_dir>/                      (0700)
//! └── 5c1f...e2   sha1("https://root@vc/sdk#insecure=false")   (0600)
//!     {
//!       "endpoint": {...}, "user": "root", "cookie": "...",
//!       "api_version": "8.0", "session_timeout_secs": 1800,
//!       "insecure": false, "last_verified": "2025-01-01T00:00:00Z"
//!     }
//! ```
//!
//! Writes go to a temporary sibling first and are renamed into place so a
//! concurrent reader never sees a partial entry.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tokio::io::AsyncWriteExt;
use vimwatch_core::{Endpoint, Secret, VimError, VimResult};

/// Persisted session material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSession {
    /// Endpoint the session belongs to.
    pub endpoint: Endpoint,
    /// Identity the session was created for, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Session cookie.
    pub cookie: Secret,
    /// Negotiated API version.
    pub api_version: String,
    /// Server idle timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_timeout_secs: Option<u64>,
    /// Whether the session was established without certificate verification.
    #[serde(default)]
    pub insecure: bool,
    /// Last time the session was confirmed alive.
    pub last_verified: DateTime<Utc>,
}

/// Directory of cached sessions.
#[derive(Debug, Clone)]
pub struct SessionCache {
    dir: PathBuf,
}

impl SessionCache {
    /// Creates a cache rooted at `dir`. Nothing is created until the first store.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache key for an endpoint and identity.
    pub fn key(endpoint: &Endpoint, user: Option<&str>, insecure: bool) -> String {
        let material = format!("{}#insecure={}", endpoint.url_with_user(user), insecure);
        hex::encode(Sha1::digest(material.as_bytes()))
    }

    /// Path of the entry for `key`.
    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    /// Loads the entry for `key`.
    ///
    /// Returns `Ok(None)` when there is no entry. An entry that cannot be
    /// decoded is removed and treated as absent.
    pub async fn load(&self, key: &str) -> VimResult<Option<CachedSession>> {
        let path = self.entry_path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(VimError::cache_io(&path, e)),
        };

        match serde_json::from_slice::<CachedSession>(&bytes) {
            Ok(entry) => {
                tracing::debug!(path = %path.display(), "Loaded cached session");
                Ok(Some(entry))
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Discarding corrupt session cache entry");
                self.remove(key).await?;
                Ok(None)
            }
        }
    }

    /// Stores `entry` under `key`.
    pub async fn store(&self, key: &str, entry: &CachedSession) -> VimResult<()> {
        create_private_dir(&self.dir).await?;

        let path = self.entry_path(key);
        let tmp = self.dir.join(format!(".{}.tmp", key));
        let json = serde_json::to_vec_pretty(entry)
            .map_err(|e| VimError::cache(&path, format!("failed to encode entry: {}", e)))?;

        let mut options = tokio::fs::OpenOptions::new();
        options.create(true).write(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options
            .open(&tmp)
            .await
            .map_err(|e| VimError::cache_io(&tmp, e))?;
        file.write_all(&json)
            .await
            .map_err(|e| VimError::cache_io(&tmp, e))?;
        file.sync_all()
            .await
            .map_err(|e| VimError::cache_io(&tmp, e))?;
        drop(file);

        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| VimError::cache_io(&path, e))?;

        tracing::debug!(path = %path.display(), "Stored session in cache");
        Ok(())
    }

    /// Removes the entry for `key`. A missing entry is not an error.
    pub async fn remove(&self, key: &str) -> VimResult<()> {
        let path = self.entry_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Removed cached session");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VimError::cache_io(&path, e)),
        }
    }
}

async fn create_private_dir(dir: &Path) -> VimResult<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder
        .create(dir)
        .await
        .map_err(|e| VimError::cache_io(dir, e))
}
