//! Caching, blocklisting forward proxy for HTTP and HTTPS traffic.
//!
//! `magpie-proxy` accepts client connections on a single TCP port and
//! handles each request in one of three ways:
//!
//! 1. **Blocklist check** - Plain-HTTP requests whose destination URL is
//!    in the blocklist are refused with `403 Access Denied`. Membership is
//!    an exact string match on `scheme://host[:port]path`.
//!
//! 2. **Cache** (`cache`) - Response bodies are stored on disk, one file
//!    per URL (percent-encoded file names). A hit is replayed as
//!    `200` / `text/html` with the stored body; a miss falls through to a
//!    live origin fetch that populates the cache. Entries never expire.
//!
//! 3. **CONNECT tunnel** (`connect`) - HTTPS traffic is spliced as an
//!    opaque byte tunnel between client and target. The proxy never
//!    terminates TLS, and tunneled targets bypass both blocklist and
//!    cache.
//!
//! The blocklist and cache are owned by the server and injected into each
//! connection handler behind `Arc` — explicit shared state instead of
//! globals, with interior locks because handlers run on parallel runtime
//! workers.

pub mod audit;
pub mod blocklist;
pub mod cache;
pub mod config;
pub mod connect;
pub mod error;
pub mod forward;
pub mod server;

pub use blocklist::Blocklist;
pub use cache::CacheStore;
pub use config::ProxyConfig;
pub use error::{ProxyError, Result};
pub use server::{start, ProxyHandle};
