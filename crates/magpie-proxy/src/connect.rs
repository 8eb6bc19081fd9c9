//! HTTP CONNECT tunnel handler.
//!
//! Handles `CONNECT host:port HTTP/1.1` requests by:
//! 1. Parsing the target host and port from the request line
//! 2. Establishing a TCP connection to the upstream
//! 3. Returning `200 Connection Established`
//! 4. Relaying bytes bidirectionally until either side closes
//!
//! The proxy never terminates TLS — it just passes encrypted bytes
//! through. Tunneled traffic is neither inspected, blocklist-checked, nor
//! cached. When the upstream connection fails, the client socket is closed
//! without any status line: the 200 line is only written after a
//! successful connect, and there is no HTTP channel left to carry an
//! error.

use crate::audit;
use crate::error::{ProxyError, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

/// Handle an HTTP CONNECT request.
///
/// `first_line` is the already-read CONNECT line (e.g.
/// "CONNECT example.com:443 HTTP/1.1"). `head` holds any bytes the header
/// reader buffered past the blank line — typically the start of the TLS
/// handshake — which are forwarded to the upstream before relaying.
pub async fn handle_connect(
    first_line: &str,
    stream: &mut TcpStream,
    head: &[u8],
) -> Result<()> {
    let (host, port) = parse_connect_target(first_line)?;
    debug!("CONNECT request to {}:{}", host, port);

    let mut upstream = match TcpStream::connect((host.as_str(), port)).await {
        Ok(s) => s,
        Err(e) => {
            // Close the client connection silently; no response is sent.
            audit::log_upstream_error(
                audit::ProxyMode::Tunnel,
                &format!("{}:{}", host, port),
                &e.to_string(),
            );
            return Ok(());
        }
    };

    stream
        .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
        .await?;
    stream.flush().await?;
    audit::log_tunnel_open(&host, port);

    if !head.is_empty() {
        upstream.write_all(head).await?;
        upstream.flush().await?;
    }

    let result = tokio::io::copy_bidirectional(stream, &mut upstream).await;
    debug!("Tunnel closed for {}:{}: {:?}", host, port, result);

    Ok(())
}

/// Parse the target host and port from a CONNECT request line.
///
/// Expected format: "CONNECT host:port HTTP/1.1". A missing port defaults
/// to 443.
fn parse_connect_target(line: &str) -> Result<(String, u16)> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 2 || parts[0] != "CONNECT" {
        return Err(ProxyError::HttpParse(format!(
            "malformed CONNECT line: {}",
            line
        )));
    }

    let authority = parts[1];
    if let Some((host, port_str)) = authority.rsplit_once(':') {
        let port = port_str.parse::<u16>().map_err(|_| {
            ProxyError::HttpParse(format!("invalid port in CONNECT: {}", authority))
        })?;
        Ok((host.to_string(), port))
    } else {
        Ok((authority.to_string(), 443))
    }
}
