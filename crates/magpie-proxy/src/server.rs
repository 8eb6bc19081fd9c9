//! Proxy server: TCP listener, connection dispatch, and lifecycle.
//!
//! The server binds to the configured address, accepts TCP connections,
//! reads the request line to determine the mode, and dispatches to the
//! appropriate handler.
//!
//! CONNECT method -> [`connect`] handler (opaque byte tunnel)
//! Other methods  -> [`forward`] handler (blocklist, cache, origin fetch)

use crate::blocklist::Blocklist;
use crate::cache::CacheStore;
use crate::config::ProxyConfig;
use crate::connect;
use crate::error::{ProxyError, Result};
use crate::forward;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Maximum total size of HTTP headers (64 KiB). Prevents OOM from
/// malicious clients sending unbounded header data.
const MAX_HEADER_SIZE: usize = 64 * 1024;

/// Handle returned when the proxy server starts.
///
/// Exposes the assigned port, the shared blocklist and cache stores (for
/// the control channel), and a shutdown channel. The stores are injected
/// into every connection handler — there is no global state.
pub struct ProxyHandle {
    /// The actual port the proxy is listening on
    pub port: u16,
    blocklist: Arc<Blocklist>,
    cache: Arc<CacheStore>,
    shutdown_tx: watch::Sender<bool>,
}

impl ProxyHandle {
    /// Signal the proxy to shut down gracefully.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// The shared blocklist store.
    #[must_use]
    pub fn blocklist(&self) -> &Arc<Blocklist> {
        &self.blocklist
    }

    /// The shared cache store.
    #[must_use]
    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }
}

/// Shared state for the proxy server.
struct ProxyState {
    blocklist: Arc<Blocklist>,
    cache: Arc<CacheStore>,
}

/// Start the proxy server.
///
/// Loads the blocklist from `config.blocklist_path` (missing file = empty
/// set), opens the cache store under `config.cache_dir`, binds to
/// `config.bind_addr:config.bind_port` (port 0 = OS-assigned), and begins
/// accepting connections.
///
/// Returns a `ProxyHandle` with the assigned port and shared stores. The
/// server runs until the handle is dropped or `shutdown()` is called.
pub async fn start(config: ProxyConfig) -> Result<ProxyHandle> {
    let blocklist = Arc::new(Blocklist::load(&config.blocklist_path));
    let cache = Arc::new(CacheStore::new(&config.cache_dir).await?);

    let bind_addr = SocketAddr::new(config.bind_addr, config.bind_port);
    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| ProxyError::Bind {
            addr: bind_addr.to_string(),
            source: e,
        })?;

    let local_addr = listener.local_addr().map_err(|e| ProxyError::Bind {
        addr: bind_addr.to_string(),
        source: e,
    })?;
    let port = local_addr.port();

    info!(
        "Proxy server listening on {} ({} blocked site(s) loaded)",
        local_addr,
        blocklist.len()
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let state = Arc::new(ProxyState {
        blocklist: Arc::clone(&blocklist),
        cache: Arc::clone(&cache),
    });

    tokio::spawn(accept_loop(listener, state, shutdown_rx));

    Ok(ProxyHandle {
        port,
        blocklist,
        cache,
        shutdown_tx,
    })
}

/// Accept loop: listen for connections until shutdown.
async fn accept_loop(
    listener: TcpListener,
    state: Arc<ProxyState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!("Accepted connection from {}", addr);
                        let state = Arc::clone(&state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, &state).await {
                                debug!("Connection handler error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("Accept error: {}", e);
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("Proxy server shutting down");
                    return;
                }
            }
        }
    }
}

/// Handle a single client connection.
///
/// Reads the request line and headers, then dispatches:
/// - CONNECT method -> opaque tunnel
/// - Other methods  -> plain-HTTP forwarder
async fn handle_connection(mut stream: tokio::net::TcpStream, state: &ProxyState) -> Result<()> {
    // Read the first line and headers through a BufReader.
    // We keep the BufReader alive until we've consumed the full header
    // to prevent data loss (BufReader may read ahead into the body).
    let mut buf_reader = BufReader::new(&mut stream);
    let mut first_line = String::new();
    buf_reader.read_line(&mut first_line).await?;

    if first_line.is_empty() {
        return Ok(()); // Client disconnected
    }

    // Read remaining headers (up to empty line), with size limit to prevent OOM.
    let mut header_bytes = Vec::new();
    loop {
        let mut line = String::new();
        let n = buf_reader.read_line(&mut line).await?;
        if n == 0 || line.trim().is_empty() {
            break;
        }
        header_bytes.extend_from_slice(line.as_bytes());
        if header_bytes.len() > MAX_HEADER_SIZE {
            drop(buf_reader);
            let response = "HTTP/1.1 431 Request Header Fields Too Large\r\n\r\n";
            stream.write_all(response.as_bytes()).await?;
            return Ok(());
        }
    }

    // Extract any data buffered beyond headers before dropping BufReader.
    // For plain HTTP this is the start of the request body; for CONNECT it
    // is the head of the client's negotiation (e.g. a TLS ClientHello).
    let buffered = buf_reader.buffer().to_vec();
    drop(buf_reader);

    let first_line = first_line.trim_end();

    if first_line.starts_with("CONNECT ") {
        connect::handle_connect(first_line, &mut stream, &buffered).await
    } else {
        forward::handle_forward(
            first_line,
            &mut stream,
            &header_bytes,
            &buffered,
            &state.blocklist,
            &state.cache,
        )
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn test_config(dir: &std::path::Path) -> ProxyConfig {
        ProxyConfig {
            bind_port: 0,
            blocklist_path: dir.join("blocked_sites.txt"),
            cache_dir: dir.join("cache"),
            ..Default::default()
        }
    }

    /// Spawn a fixed-response origin server. Returns its port and a hit
    /// counter. Each connection reads the request head, writes `response`,
    /// and closes (EOF-delimited, matching the forwarder's framing).
    async fn spawn_origin(response: String) -> (u16, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let body = response.replace("{n}", &n.to_string());
                tokio::spawn(async move {
                    let mut reader = BufReader::new(stream);
                    loop {
                        let mut line = String::new();
                        let read = reader.read_line(&mut line).await.unwrap_or(0);
                        if read == 0 || line.trim().is_empty() {
                            break;
                        }
                    }
                    let mut stream = reader.into_inner();
                    let _ = stream.write_all(body.as_bytes()).await;
                    let _ = stream.flush().await;
                });
            }
        });

        (port, hits)
    }

    /// Send one raw request through the proxy and read the full response.
    async fn proxy_request(proxy_port: u16, request: &str) -> Vec<u8> {
        let mut stream = TcpStream::connect(("127.0.0.1", proxy_port)).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        response
    }

    fn get_request(origin_port: u16, path: &str) -> String {
        format!(
            "GET http://127.0.0.1:{port}{path} HTTP/1.1\r\nHost: 127.0.0.1:{port}\r\n\r\n",
            port = origin_port,
            path = path
        )
    }

    fn url_key(origin_port: u16, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", origin_port, path)
    }

    #[tokio::test]
    async fn test_proxy_starts_and_binds() {
        let dir = tempfile::tempdir().unwrap();
        let handle = start(test_config(dir.path())).await.unwrap();

        assert!(handle.port > 0);
        assert!(handle.blocklist().is_empty());

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_forward_relays_origin_response_and_caches_body() {
        let dir = tempfile::tempdir().unwrap();
        let handle = start(test_config(dir.path())).await.unwrap();

        let (origin_port, hits) = spawn_origin(
            "HTTP/1.1 201 Created\r\nContent-Type: text/plain\r\nContent-Length: 5\r\n\r\nhello"
                .to_string(),
        )
        .await;

        // First request goes to the origin; the real status line and
        // headers pass through.
        let response = proxy_request(handle.port, &get_request(origin_port, "/page")).await;
        let response = String::from_utf8(response).unwrap();
        assert!(response.starts_with("HTTP/1.1 201 Created\r\n"));
        assert!(response.ends_with("hello"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Second request is served from the cache with the synthetic
        // 200/text-html head; the origin is not contacted again.
        let response = proxy_request(handle.port, &get_request(origin_port, "/page")).await;
        let response = String::from_utf8(response).unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Content-Type: text/html\r\n"));
        assert!(response.ends_with("hello"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert_eq!(handle.cache().keys(), vec![url_key(origin_port, "/page")]);

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_blocked_url_returns_403_without_contacting_origin() {
        let dir = tempfile::tempdir().unwrap();
        let handle = start(test_config(dir.path())).await.unwrap();

        let (origin_port, hits) =
            spawn_origin("HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok".to_string()).await;

        handle.blocklist().add(&url_key(origin_port, "/secret"));

        let response = proxy_request(handle.port, &get_request(origin_port, "/secret")).await;
        let response = String::from_utf8(response).unwrap();
        assert!(response.starts_with("HTTP/1.1 403 Forbidden\r\n"));
        assert!(response.ends_with("Access Denied"));
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_blocking_a_cached_url_still_returns_403() {
        let dir = tempfile::tempdir().unwrap();
        let handle = start(test_config(dir.path())).await.unwrap();

        let (origin_port, hits) =
            spawn_origin("HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok".to_string()).await;

        // Populate the cache, then block.
        let _ = proxy_request(handle.port, &get_request(origin_port, "/page")).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(handle.cache().get(&url_key(origin_port, "/page")).await.is_some());

        handle.blocklist().add(&url_key(origin_port, "/page"));

        let response = proxy_request(handle.port, &get_request(origin_port, "/page")).await;
        let response = String::from_utf8(response).unwrap();
        assert!(response.starts_with("HTTP/1.1 403 Forbidden\r\n"));
        assert!(response.ends_with("Access Denied"));

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_unreachable_origin_returns_500_and_caches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let handle = start(test_config(dir.path())).await.unwrap();

        // Grab a port that nothing is listening on.
        let dead_port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let response = proxy_request(handle.port, &get_request(dead_port, "/")).await;
        let response = String::from_utf8(response).unwrap();
        assert!(response.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(handle.cache().keys().is_empty());

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_connect_tunnel_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let handle = start(test_config(dir.path())).await.unwrap();

        // Echo upstream.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => {
                        if stream.write_all(&buf[..n]).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        let mut stream = TcpStream::connect(("127.0.0.1", handle.port)).await.unwrap();
        stream
            .write_all(
                format!("CONNECT 127.0.0.1:{} HTTP/1.1\r\n\r\n", upstream_port).as_bytes(),
            )
            .await
            .unwrap();

        // The handshake line arrives byte-for-byte, then the tunnel is
        // transparent in both directions.
        let expected = b"HTTP/1.1 200 Connection Established\r\n\r\n";
        let mut handshake = vec![0u8; expected.len()];
        stream.read_exact(&mut handshake).await.unwrap();
        assert_eq!(handshake, expected);

        stream.write_all(b"ping").await.unwrap();
        let mut echoed = [0u8; 4];
        stream.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"ping");

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_target_closes_without_response() {
        let dir = tempfile::tempdir().unwrap();
        let handle = start(test_config(dir.path())).await.unwrap();

        let dead_port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let mut stream = TcpStream::connect(("127.0.0.1", handle.port)).await.unwrap();
        stream
            .write_all(format!("CONNECT 127.0.0.1:{} HTTP/1.1\r\n\r\n", dead_port).as_bytes())
            .await
            .unwrap();

        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        assert!(response.is_empty());

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_concurrent_misses_both_complete_last_writer_wins() {
        let dir = tempfile::tempdir().unwrap();
        let handle = start(test_config(dir.path())).await.unwrap();

        // Each origin hit serves a distinct body so the surviving cache
        // entry identifies the last writer.
        let (origin_port, _hits) = spawn_origin(
            "HTTP/1.1 200 OK\r\nContent-Length: 6\r\n\r\nbody-{n}".to_string(),
        )
        .await;

        let request = get_request(origin_port, "/race");
        let (a, b) = tokio::join!(
            proxy_request(handle.port, &request),
            proxy_request(handle.port, &request)
        );
        assert!(a.starts_with(b"HTTP/1.1 200 OK\r\n"));
        assert!(b.starts_with(b"HTTP/1.1 200 OK\r\n"));

        let cached = handle.cache().get(&url_key(origin_port, "/race")).await.unwrap();
        assert!(cached == b"body-0" || cached == b"body-1");

        handle.shutdown();
    }
}
