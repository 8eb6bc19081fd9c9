//! Operator-facing terminal output.

use colored::Colorize;

/// Print the startup banner with the bound address.
pub fn print_banner(addr: &str, port: u16) {
    eprintln!(
        "{} listening on {}:{}",
        "magpie".bold(),
        addr,
        port.to_string().cyan()
    );
    eprintln!(
        "{}",
        "commands: blocked | cached | close | <url to block>".truecolor(150, 150, 150)
    );
}

/// Print a listing of URLs under a heading.
pub fn print_listing(heading: &str, urls: &[String]) {
    println!("{}", heading.bold());
    if urls.is_empty() {
        println!("  {}", "(none)".truecolor(150, 150, 150));
        return;
    }
    for url in urls {
        println!("  {}", url);
    }
}

/// Confirm a URL was added to the blocklist.
pub fn print_block_added(url: &str, newly_added: bool) {
    if newly_added {
        println!("{} blocked successfully!", url.red());
    } else {
        println!("{} was already blocked", url);
    }
}

/// Announce shutdown with the persisted blocklist size.
pub fn print_shutdown(persisted: usize) {
    eprintln!("blocklist persisted ({} entries), shutting down", persisted);
}
