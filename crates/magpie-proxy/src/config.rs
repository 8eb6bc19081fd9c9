//! Proxy configuration types.
//!
//! Defines the configuration for the proxy server: listen address,
//! blocklist file location, and cache directory.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

/// Configuration for the proxy server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Bind address (default: 127.0.0.1)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,

    /// Bind port (0 = OS-assigned ephemeral port)
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    /// Path of the blocklist file, one URL per line.
    /// Loaded at startup, overwritten wholesale on shutdown.
    #[serde(default = "default_blocklist_path")]
    pub blocklist_path: PathBuf,

    /// Directory holding cached response bodies, one file per URL.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            bind_port: default_bind_port(),
            blocklist_path: default_blocklist_path(),
            cache_dir: default_cache_dir(),
        }
    }
}

fn default_bind_addr() -> IpAddr {
    IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)
}

fn default_bind_port() -> u16 {
    6969
}

fn default_blocklist_path() -> PathBuf {
    PathBuf::from("blocked_sites.txt")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache")
}
