//! Audit logging for proxy requests.
//!
//! Logs the terminal outcome of every request with structured fields via
//! `tracing`. Request and response bodies are never included.

use tracing::info;

/// How a request was handled.
#[derive(Debug, Clone, Copy)]
pub enum ProxyMode {
    /// Plain-HTTP forwarding
    Forward,
    /// CONNECT byte tunnel
    Tunnel,
}

impl std::fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyMode::Forward => write!(f, "forward"),
            ProxyMode::Tunnel => write!(f, "tunnel"),
        }
    }
}

/// Log a request denied by the blocklist.
pub fn log_blocked(url: &str) {
    info!(
        target: "magpie_proxy::audit",
        mode = %ProxyMode::Forward,
        url = url,
        decision = "blocked",
        "request denied by blocklist"
    );
}

/// Log a request served from the cache.
pub fn log_cache_hit(url: &str) {
    info!(
        target: "magpie_proxy::audit",
        mode = %ProxyMode::Forward,
        url = url,
        decision = "cache_hit",
        "request served from cache"
    );
}

/// Log a request forwarded to the origin, with the upstream status.
pub fn log_forwarded(url: &str, status: u16) {
    info!(
        target: "magpie_proxy::audit",
        mode = %ProxyMode::Forward,
        url = url,
        status = status,
        decision = "live",
        "request forwarded to origin"
    );
}

/// Log an upstream failure.
pub fn log_upstream_error(mode: ProxyMode, upstream: &str, reason: &str) {
    info!(
        target: "magpie_proxy::audit",
        mode = %mode,
        upstream = upstream,
        decision = "upstream_error",
        reason = reason,
        "upstream connection failed"
    );
}

/// Log an established CONNECT tunnel.
pub fn log_tunnel_open(host: &str, port: u16) {
    info!(
        target: "magpie_proxy::audit",
        mode = %ProxyMode::Tunnel,
        host = host,
        port = port,
        decision = "open",
        "tunnel established"
    );
}
