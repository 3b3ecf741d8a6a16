use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;

use ferry::cli::DaemonOpts;
use ferry::logger::{Logger, NoopLogger, TextLogger};
use ferry::net_async::server::{Admission, ServerConfig};

fn main() -> Result<()> {
    let opts = DaemonOpts::parse();

    let start_dir = std::env::current_dir().context("Failed to determine working directory")?;
    let canonical_dir = std::fs::canonicalize(&start_dir)
        .with_context(|| format!("Failed to canonicalize working directory: {}", start_dir.display()))?;

    let logger: Arc<dyn Logger> = match opts.log_file {
        Some(ref p) => Arc::new(
            TextLogger::new(p).with_context(|| format!("Failed to open log file: {}", p.display()))?,
        ),
        None => Arc::new(NoopLogger),
    };

    let admission = if opts.reject_when_full {
        Admission::Reject
    } else {
        Admission::Queue
    };
    let bind = format!("0.0.0.0:{}", opts.port);

    println!("Starting ferry daemon:");
    println!("  Dir:  {}", canonical_dir.display());
    println!("  Bind: {}", bind);
    println!(
        "  Sessions: {} max ({})",
        opts.max_sessions,
        if admission == Admission::Reject { "reject when full" } else { "queue when full" }
    );
    if let Some(ref p) = opts.log_file {
        println!("  Log:  {}", p.display());
    }
    eprintln!("⚠️  WARNING: no authentication or encryption; anyone who can reach this port can read and write files");

    let config = ServerConfig {
        start_dir: canonical_dir,
        max_sessions: opts.max_sessions as usize,
        admission,
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(ferry::net_async::server::serve(&bind, config, logger))
}
