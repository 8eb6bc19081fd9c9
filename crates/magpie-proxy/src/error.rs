//! Error types for the magpie-proxy crate.

use thiserror::Error;

/// Errors that can occur in the proxy.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Proxy bind failed on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Upstream connection failed to {target}: {reason}")]
    UpstreamConnect { target: String, reason: String },

    #[error("HTTP parse error: {0}")]
    HttpParse(String),

    #[error("Cache write failed for {url}: {source}")]
    CacheWrite {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Blocklist persist failed to {path}: {source}")]
    BlocklistPersist {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
