//! Command-line argument definitions.

use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;

/// Caching, blocklisting forward proxy for HTTP and HTTPS.
///
/// While the proxy runs, commands are read from standard input:
/// `blocked` lists blocked URLs, `cached` lists cached URLs, `close`
/// persists the blocklist and exits, and any other line is added to the
/// blocklist as a URL.
#[derive(Debug, Parser)]
#[command(name = "magpie", version, about)]
pub struct Cli {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1")]
    pub bind: IpAddr,

    /// Port to listen on
    #[arg(short, long, default_value_t = 6969)]
    pub port: u16,

    /// Blocklist file, one URL per line
    #[arg(long, default_value = "blocked_sites.txt")]
    pub blocklist: PathBuf,

    /// Directory for cached response bodies
    #[arg(long, default_value = "cache")]
    pub cache_dir: PathBuf,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Build the proxy configuration from the parsed arguments.
    pub fn to_config(&self) -> magpie_proxy::ProxyConfig {
        magpie_proxy::ProxyConfig {
            bind_addr: self.bind,
            bind_port: self.port,
            blocklist_path: self.blocklist.clone(),
            cache_dir: self.cache_dir.clone(),
        }
    }
}
