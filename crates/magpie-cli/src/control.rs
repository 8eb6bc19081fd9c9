//! Line-oriented control channel on standard input.
//!
//! While the proxy serves traffic, the operator can type commands:
//!
//! - `blocked` — list the blocked URLs
//! - `cached`  — list the cached URL keys
//! - `close`   — persist the blocklist, stop the server, exit
//! - anything else — treat the line as a URL and block it immediately
//!   (in memory; it reaches the blocklist file on `close`)
//!
//! The blocklist is persisted only on `close`; additions made since the
//! last persist are lost if the process dies unexpectedly.

use crate::output;
use magpie_proxy::{ProxyHandle, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

/// Run the control loop until `close` is received.
///
/// On stdin EOF the proxy keeps serving until the process is killed, so
/// detached runs (stdin redirected from /dev/null) behave like a plain
/// daemon.
pub async fn run(handle: &ProxyHandle) -> Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                // stdin closed; keep serving until killed.
                std::future::pending::<()>().await;
                unreachable!();
            }
            Err(e) => {
                warn!("Control channel read error: {}", e);
                continue;
            }
        };

        match line.trim() {
            "" => {}
            "blocked" => output::print_listing("Blocked Sites:", &handle.blocklist().snapshot()),
            "cached" => output::print_listing("Cached Sites:", &handle.cache().keys()),
            "close" => {
                handle.blocklist().persist()?;
                output::print_shutdown(handle.blocklist().len());
                handle.shutdown();
                return Ok(());
            }
            url => {
                let newly_added = handle.blocklist().add(url);
                output::print_block_added(url, newly_added);
            }
        }
    }
}
