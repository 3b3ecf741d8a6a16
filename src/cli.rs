//! Shared CLI helpers and small reusable Clap fragments

use clap::Parser;
use std::path::PathBuf;

use crate::protocol::{DEFAULT_HOST, DEFAULT_MAX_SESSIONS, DEFAULT_PORT};

/// Daemon options used by ferryd
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "Ferry daemon - serves the current directory over the ferry protocol")]
pub struct DaemonOpts {
    /// Port to listen on (0-65535)
    #[arg(default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Maximum number of concurrent sessions
    #[arg(long, default_value_t = DEFAULT_MAX_SESSIONS as u32, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_sessions: u32,

    /// Close connections beyond --max-sessions instead of queueing them
    #[arg(long)]
    pub reject_when_full: bool,

    /// Append session and transfer events to this file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,
}

/// Client options used by ferry
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "Ferry client - interactive CD/LIST/GET/PUT against a ferry daemon")]
pub struct ClientOpts {
    /// Server address
    #[arg(default_value = DEFAULT_HOST)]
    pub ip: String,

    /// Server port (0-65535)
    #[arg(default_value_t = DEFAULT_PORT)]
    pub port: u16,
}
