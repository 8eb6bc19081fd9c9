//! magpie - caching, blocklisting forward proxy.
//!
//! This binary wires the proxy library to a command line: it parses
//! arguments, initializes logging, starts the server, and runs the
//! stdin control channel until `close`.

mod cli;
mod control;
mod output;

use clap::Parser;
use cli::Cli;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();

    // -v flags override the default filter; RUST_LOG overrides both.
    let default_filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();

    if let Err(e) = run(&cli) {
        eprintln!("magpie: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> magpie_proxy::Result<()> {
    let config = cli.to_config();

    // Multi-thread runtime: the accept loop and connection handlers run on
    // worker threads while block_on drives the control loop.
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(async {
        let handle = magpie_proxy::start(config).await?;
        output::print_banner(&cli.bind.to_string(), handle.port);
        control::run(&handle).await
    })
}
