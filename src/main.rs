//! Ferry client - interactive shell against a ferry daemon
//!
//! Reads one command per line from stdin (CD, LIST, GET, PUT) and prints the
//! daemon's reply. GET stores files in, and PUT reads files from, the current
//! working directory.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use tokio::io::{AsyncBufReadExt, BufReader};

use ferry::cli::ClientOpts;
use ferry::net_async::client::{self, Client};
use ferry::protocol_core::WireError;

fn main() -> Result<()> {
    // Set up Ctrl-C handler
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted by user. Exiting (Ctrl-C)...");
        // Exit immediately with 130 (128 + SIGINT)
        std::process::exit(130);
    })
    .context("Error setting Ctrl-C handler")?;

    let opts = ClientOpts::parse();

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(run(opts))
}

async fn run(opts: ClientOpts) -> Result<()> {
    let stream = match client::connect(&opts.ip, opts.port).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Server not opened ({:#})", e);
            std::process::exit(1);
        }
    };
    let local_dir = std::env::current_dir().context("Failed to determine working directory")?;
    let mut session = Client::new(stream, local_dir).with_progress(std::io::stderr().is_terminal());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read from stdin")? {
        match session.execute(&line).await {
            Ok(Some(text)) => println!("{}", text),
            Ok(None) => {}
            Err(WireError::ConnectionClosed) => {
                eprintln!("Connection closed by server");
                std::process::exit(1);
            }
            Err(e) => return Err(e).context("Connection failed"),
        }
    }
    Ok(())
}
