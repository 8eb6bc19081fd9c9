//! Cache store: file-backed response bodies keyed by destination URL.
//!
//! The index maps a destination URL to the file holding its cached body.
//! The file name is the percent-encoded URL, which is reversible and
//! collision-free. Only raw body bytes are stored — no status line, no
//! headers, no metadata. Entries are never evicted or expired; the cache
//! grows without bound for the lifetime of the directory.

use crate::error::{ProxyError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

/// In-memory index over the on-disk cache directory.
///
/// Shared across connection handlers; the index lock is held only for
/// map lookups and inserts, never across file I/O. Concurrent misses for
/// the same URL each fetch and write independently — last writer wins.
#[derive(Debug)]
pub struct CacheStore {
    dir: PathBuf,
    index: RwLock<HashMap<String, PathBuf>>,
}

impl CacheStore {
    /// Open the cache store, creating `dir` if needed.
    ///
    /// The index starts empty: bodies cached by previous runs are left on
    /// disk but are not rediscovered.
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            index: RwLock::new(HashMap::new()),
        })
    }

    /// Look up the cached body for `url`.
    ///
    /// A hit requires both an index entry and a readable backing file.
    /// A missing or unreadable file is reported as a miss, never an error;
    /// the stale index entry stays in place and the caller re-fetches.
    pub async fn get(&self, url: &str) -> Option<Vec<u8>> {
        let path = self
            .index
            .read()
            .ok()
            .and_then(|index| index.get(url).cloned())?;

        match tokio::fs::read(&path).await {
            Ok(body) => Some(body),
            Err(e) => {
                debug!("Cache entry unreadable at {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Store `body` as the cached response for `url`, overwriting any
    /// previous entry.
    pub async fn put(&self, url: &str, body: &[u8]) -> Result<()> {
        let path = self.entry_path(url);
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| ProxyError::CacheWrite {
                url: url.to_string(),
                source: e,
            })?;

        if let Ok(mut index) = self.index.write() {
            index.insert(url.to_string(), path);
        }
        Ok(())
    }

    /// Sorted listing of the cached URL keys.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .index
            .read()
            .map(|index| index.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Backing file location for `url`: the percent-encoded URL inside the
    /// cache directory.
    fn entry_path(&self, url: &str) -> PathBuf {
        self.dir.join(urlencoding::encode(url).into_owned())
    }

    /// The cache directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
