//! Plain-HTTP forwarder.
//!
//! Handles every non-CONNECT request:
//! 1. Resolving the destination URL key from the request target (and the
//!    `Host` header for origin-form targets)
//! 2. Checking the blocklist — blocked targets get `403 Access Denied`
//!    before the cache is ever consulted
//! 3. Checking the cache — hits are replayed as `200` / `text/html` with
//!    the stored body, regardless of what the origin originally returned
//! 4. Otherwise fetching from the origin, relaying the real status line,
//!    headers, and body to the client, and caching the body
//!
//! The whole origin response is buffered in memory before the client sees
//! it: the body has to be captured for the cache before the response is
//! finalized. Upstream failures surface as `500`; nothing is retried and
//! nothing is cached on failure.

use crate::audit;
use crate::blocklist::Blocklist;
use crate::cache::CacheStore;
use crate::error::{ProxyError, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Where a plain-HTTP request is going.
///
/// `key` is the blocklist/cache key (`scheme://host[:explicit-port]path`,
/// query string included in the path). It is case- and order-sensitive;
/// header content never participates.
#[derive(Debug, PartialEq, Eq)]
struct Destination {
    key: String,
    /// Host to open the upstream TCP connection to.
    host: String,
    /// Upstream port (default 80 when the target carries none).
    port: u16,
    /// Value for the `Host` header on the upstream request.
    authority: String,
    /// Origin-form path (plus query) for the upstream request line.
    origin_path: String,
}

/// Handle a non-CONNECT HTTP request.
///
/// `first_line` is the already-read request line. `remaining_header` holds
/// the raw header lines; `buffered_body` any bytes the header reader
/// consumed past the blank line (prepended to the body so nothing is lost).
pub async fn handle_forward(
    first_line: &str,
    stream: &mut TcpStream,
    remaining_header: &[u8],
    buffered_body: &[u8],
    blocklist: &Blocklist,
    cache: &CacheStore,
) -> Result<()> {
    let (method, target, version) = parse_request_line(first_line)?;
    let dest = parse_destination(&target, extract_host(remaining_header).as_deref())?;
    debug!("Forward request: {} {}", method, dest.key);

    // Blocklist wins over the cache: a URL blocked after being cached
    // still gets 403.
    if blocklist.contains(&dest.key) {
        audit::log_blocked(&dest.key);
        send_response(stream, 403, "Forbidden", "text/plain", b"Access Denied").await?;
        return Ok(());
    }

    if let Some(body) = cache.get(&dest.key).await {
        audit::log_cache_hit(&dest.key);
        send_response(stream, 200, "OK", "text/html", &body).await?;
        return Ok(());
    }

    // Read the client request body (if any) before dialing the origin.
    // `buffered_body` may already hold a prefix of it.
    let body = match extract_content_length(remaining_header) {
        Some(len) => {
            let mut buf = Vec::with_capacity(len);
            let pre = buffered_body.len().min(len);
            buf.extend_from_slice(&buffered_body[..pre]);
            let remaining = len - pre;
            if remaining > 0 {
                let mut rest = vec![0u8; remaining];
                stream.read_exact(&mut rest).await?;
                buf.extend_from_slice(&rest);
            }
            buf
        }
        None => Vec::new(),
    };

    let mut upstream = match TcpStream::connect((dest.host.as_str(), dest.port)).await {
        Ok(s) => s,
        Err(e) => {
            audit::log_upstream_error(audit::ProxyMode::Forward, &dest.key, &e.to_string());
            send_response(
                stream,
                500,
                "Internal Server Error",
                "text/plain",
                b"Internal Server Error",
            )
            .await?;
            return Ok(());
        }
    };

    // Rebuild the request in origin-form. Client headers are passed along
    // except the framing ones: Host is rewritten to the target authority,
    // Content-Length re-added after the body read, and hop-by-hop
    // Connection headers replaced with `close` so the origin response is
    // EOF-delimited.
    let mut request = format!(
        "{} {} {}\r\nHost: {}\r\n",
        method, dest.origin_path, version, dest.authority
    );
    for (name, value) in filter_headers(remaining_header) {
        request.push_str(&format!("{}: {}\r\n", name, value));
    }
    if !body.is_empty() {
        request.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    request.push_str("Connection: close\r\n\r\n");

    let fetched = fetch_upstream(&mut upstream, request.as_bytes(), &body).await;
    let response = match fetched {
        Ok(response) => response,
        Err(e) => {
            audit::log_upstream_error(audit::ProxyMode::Forward, &dest.key, &e.to_string());
            send_response(
                stream,
                500,
                "Internal Server Error",
                "text/plain",
                b"Internal Server Error",
            )
            .await?;
            return Ok(());
        }
    };

    let Some((head, raw_body)) = split_response(&response) else {
        audit::log_upstream_error(
            audit::ProxyMode::Forward,
            &dest.key,
            "malformed response head",
        );
        send_response(
            stream,
            500,
            "Internal Server Error",
            "text/plain",
            b"Internal Server Error",
        )
        .await?;
        return Ok(());
    };

    // Cache the logical body: chunked transfer coding is decoded so the
    // stored blob replays byte-for-byte on a hit. A cache-write failure is
    // logged and swallowed; the live response is served regardless.
    let cached_body = if is_chunked(head) {
        decode_chunked(raw_body).unwrap_or_else(|| raw_body.to_vec())
    } else {
        raw_body.to_vec()
    };
    if let Err(e) = cache.put(&dest.key, &cached_body).await {
        warn!("Failed to cache response for {}: {}", dest.key, e);
    }

    // Relay the origin's status line, headers, and body verbatim.
    stream.write_all(&response).await?;
    stream.flush().await?;

    audit::log_forwarded(&dest.key, parse_response_status(head));
    Ok(())
}

/// Write the request and body to the origin and buffer the complete
/// response. The response is EOF-delimited (`Connection: close`).
async fn fetch_upstream(
    upstream: &mut TcpStream,
    request: &[u8],
    body: &[u8],
) -> Result<Vec<u8>> {
    upstream.write_all(request).await?;
    if !body.is_empty() {
        upstream.write_all(body).await?;
    }
    upstream.flush().await?;

    let mut response = Vec::new();
    upstream.read_to_end(&mut response).await?;
    if response.is_empty() {
        return Err(ProxyError::HttpParse("empty upstream response".to_string()));
    }
    Ok(response)
}

/// Parse an HTTP request line into (method, target, version).
fn parse_request_line(line: &str) -> Result<(String, String, String)> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 3 {
        return Err(ProxyError::HttpParse(format!(
            "malformed request line: {}",
            line
        )));
    }
    Ok((
        parts[0].to_string(),
        parts[1].to_string(),
        parts[2].to_string(),
    ))
}

/// Resolve the destination from the request target.
///
/// Proxy clients send absolute-form targets (`http://host[:port]/path`);
/// origin-form targets (`/path`) fall back to the `Host` header with an
/// `http` scheme. The explicit port, when present, stays in the key.
fn parse_destination(target: &str, host_header: Option<&str>) -> Result<Destination> {
    if target.starts_with("http://") || target.starts_with("https://") {
        let parsed = url::Url::parse(target)
            .map_err(|e| ProxyError::HttpParse(format!("invalid target '{}': {}", target, e)))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| ProxyError::HttpParse(format!("missing host in target: {}", target)))?
            .to_string();

        let authority = match parsed.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.clone(),
        };
        let port = parsed.port().unwrap_or(80);

        let path = if parsed.path().is_empty() {
            "/".to_string()
        } else {
            parsed.path().to_string()
        };
        let origin_path = match parsed.query() {
            Some(query) => format!("{}?{}", path, query),
            None => path,
        };

        let key = format!("{}://{}{}", parsed.scheme(), authority, origin_path);
        Ok(Destination {
            key,
            host,
            port,
            authority,
            origin_path,
        })
    } else {
        let authority = host_header
            .ok_or_else(|| {
                ProxyError::HttpParse("origin-form target without Host header".to_string())
            })?
            .to_string();

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port_str)) => match port_str.parse::<u16>() {
                Ok(port) => (host.to_string(), port),
                Err(_) => (authority.clone(), 80),
            },
            None => (authority.clone(), 80),
        };

        let origin_path = if target.starts_with('/') {
            target.to_string()
        } else {
            format!("/{}", target)
        };

        let key = format!("http://{}{}", authority, origin_path);
        Ok(Destination {
            key,
            host,
            port,
            authority,
            origin_path,
        })
    }
}

/// Extract the Host header value from raw headers.
fn extract_host(header_bytes: &[u8]) -> Option<String> {
    let header_str = std::str::from_utf8(header_bytes).ok()?;
    for line in header_str.lines() {
        if line.to_lowercase().starts_with("host:") {
            return line.split_once(':').map(|(_, v)| v.trim().to_string());
        }
    }
    None
}

/// Extract Content-Length value from raw headers.
fn extract_content_length(header_bytes: &[u8]) -> Option<usize> {
    let header_str = std::str::from_utf8(header_bytes).ok()?;
    for line in header_str.lines() {
        if line.to_lowercase().starts_with("content-length:") {
            let value = line.split_once(':')?.1.trim();
            return value.parse().ok();
        }
    }
    None
}

/// Filter client headers for forwarding.
///
/// Host, Content-Length, and hop-by-hop Connection headers are dropped;
/// the forwarder re-emits its own. Everything else goes through verbatim.
fn filter_headers(header_bytes: &[u8]) -> Vec<(String, String)> {
    let header_str = std::str::from_utf8(header_bytes).unwrap_or("");
    let mut headers = Vec::new();

    for line in header_str.lines() {
        let lower = line.to_lowercase();
        if lower.starts_with("host:")
            || lower.starts_with("content-length:")
            || lower.starts_with("connection:")
            || lower.starts_with("proxy-connection:")
            || line.trim().is_empty()
        {
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    headers
}

/// Split a buffered response into (head incl. terminator, body).
fn split_response(response: &[u8]) -> Option<(&[u8], &[u8])> {
    let pos = response
        .windows(4)
        .position(|window| window == b"\r\n\r\n")?;
    Some((&response[..pos + 4], &response[pos + 4..]))
}

/// Whether the response head declares `Transfer-Encoding: chunked`.
fn is_chunked(head: &[u8]) -> bool {
    let head_str = String::from_utf8_lossy(head).to_lowercase();
    head_str
        .lines()
        .any(|line| line.starts_with("transfer-encoding:") && line.contains("chunked"))
}

/// Decode a chunked transfer-coded body into the logical body bytes.
///
/// Returns `None` on malformed framing; the caller falls back to the raw
/// bytes.
fn decode_chunked(body: &[u8]) -> Option<Vec<u8>> {
    let mut decoded = Vec::new();
    let mut rest = body;

    loop {
        let line_end = rest.windows(2).position(|w| w == b"\r\n")?;
        let size_line = std::str::from_utf8(&rest[..line_end]).ok()?;
        // Chunk extensions after ';' are ignored.
        let size_str = size_line.split(';').next()?.trim();
        let size = usize::from_str_radix(size_str, 16).ok()?;
        rest = &rest[line_end + 2..];

        if size == 0 {
            return Some(decoded);
        }
        if rest.len() < size + 2 {
            return None;
        }
        decoded.extend_from_slice(&rest[..size]);
        if &rest[size..size + 2] != b"\r\n" {
            return None;
        }
        rest = &rest[size + 2..];
    }
}

/// Parse the HTTP status code from a response head, defaulting to 502 when
/// the status line is unparseable.
fn parse_response_status(head: &[u8]) -> u16 {
    let line_end = head
        .iter()
        .position(|&b| b == b'\r' || b == b'\n')
        .unwrap_or(head.len());
    let first_line = &head[..line_end.min(64)];

    if let Ok(line) = std::str::from_utf8(first_line) {
        let mut parts = line.split_whitespace();
        if let Some(version) = parts.next() {
            if version.starts_with("HTTP/") {
                if let Some(code_str) = parts.next() {
                    if code_str.len() == 3 {
                        return code_str.parse().unwrap_or(502);
                    }
                }
            }
        }
    }
    502
}

/// Send a synthetic HTTP response with the given body.
async fn send_response(
    stream: &mut TcpStream,
    status: u16,
    reason: &str,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
        status,
        reason,
        content_type,
        body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await?;
    Ok(())
}
