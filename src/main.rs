//! Pilot ACP bridge binary
//!
//! Run with: cargo run -- --controller-cmd <engine>
//!
//! For help: cargo run -- --help

use std::io::IsTerminal;

use clap::Parser;
use pilot_acp::{Cli, run_with_cli};
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Serve until the client disconnects or a shutdown signal arrives
    let result = tokio::select! {
        result = run_with_cli(&cli) => result,
        _ = signal::ctrl_c() => {
            eprintln!("Received SIGINT, shutting down...");
            Ok(())
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
                    .expect("Failed to register SIGTERM handler");
                sigterm.recv().await
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await
            }
        } => {
            eprintln!("Received SIGTERM, shutting down...");
            Ok(())
        }
    };

    if let Err(e) = result {
        // Stdout carries the protocol; errors belong on stderr
        eprintln!("Error: {e}");

        if std::io::stdin().is_terminal() {
            eprintln!("\nFor debugging, run with --diagnostic to log to a file.");
            eprintln!("Or use -v/-vv for more verbose logging.");
        }

        std::process::exit(1);
    }

    Ok(())
}
