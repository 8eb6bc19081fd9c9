//! Blocklist store: the set of destination URLs the proxy refuses to serve.
//!
//! Membership is an exact string match on the destination URL key
//! (`scheme://host[:port]path`) — no wildcard or host-only matching.
//! The set is loaded from a flat file at startup (one URL per line) and
//! written back wholesale on explicit shutdown. Mutations between persists
//! live only in memory; an unexpected termination loses them.

use crate::error::{ProxyError, Result};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::debug;

/// Shared, mutable set of blocked destination URLs.
///
/// Connection handlers run on parallel tokio workers, so the set sits
/// behind an `RwLock`. The lock is only ever held for the duration of a
/// membership test or insert, never across an await point.
#[derive(Debug)]
pub struct Blocklist {
    path: PathBuf,
    urls: RwLock<HashSet<String>>,
}

impl Blocklist {
    /// Load the blocklist from `path`.
    ///
    /// A missing or unreadable file yields an empty set; the failure is
    /// logged at debug level and never surfaced to the caller.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let urls = match std::fs::read_to_string(&path) {
            Ok(data) => data
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from)
                .collect(),
            Err(e) => {
                debug!("No blocklist loaded from {}: {}", path.display(), e);
                HashSet::new()
            }
        };
        Self {
            path,
            urls: RwLock::new(urls),
        }
    }

    /// Exact-match membership test.
    #[must_use]
    pub fn contains(&self, url: &str) -> bool {
        self.urls
            .read()
            .map(|set| set.contains(url))
            .unwrap_or(false)
    }

    /// Insert `url` into the set. Idempotent; returns whether the entry
    /// was newly added.
    pub fn add(&self, url: &str) -> bool {
        self.urls
            .write()
            .map(|mut set| set.insert(url.to_string()))
            .unwrap_or(false)
    }

    /// Write the set back to the blocklist file, one URL per line,
    /// overwriting any previous contents. Called only on explicit shutdown.
    pub fn persist(&self) -> Result<()> {
        let snapshot = self.snapshot();
        std::fs::write(&self.path, snapshot.join("\n")).map_err(|e| {
            ProxyError::BlocklistPersist {
                path: self.path.display().to_string(),
                source: e,
            }
        })
    }

    /// Sorted listing of the blocked URLs.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        let mut urls: Vec<String> = self
            .urls
            .read()
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        urls.sort();
        urls
    }

    /// Number of blocked URLs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.urls.read().map(|set| set.len()).unwrap_or(0)
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
