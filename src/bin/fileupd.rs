use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fileup::cli::ServerOpts;
use fileup::config::ServerConfig;
use fileup::server::Server;

fn main() -> Result<()> {
    let opts = ServerOpts::parse();
    let config = ServerConfig::load(&opts)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("Starting fileup daemon:");
    println!("  Root: {}", config.root.display());
    println!("  Bind: {}", config.bind);
    println!("  Workers: {}", config.workers);

    if config.bind.starts_with("0.0.0.0") {
        eprintln!("WARNING: Binding to 0.0.0.0 exposes the upload port on all network interfaces");
        eprintln!("   Uploads are unauthenticated and unencrypted; only use on trusted networks");
        eprintln!();
    }

    let server = Server::bind(&config)?;
    let shutdown = server.shutdown_handle();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted. Shutting down...");
        shutdown.trigger();
    })
    .context("Failed to install Ctrl-C handler")?;

    server.run()
}
