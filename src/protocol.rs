//! Shared protocol constants for the ferry wire protocol

use tokio::io::{AsyncRead, AsyncWrite};

use crate::protocol_core::{read_i32, read_string, write_i32, write_string, WireError};

// Default endpoint used by both binaries
pub const DEFAULT_PORT: u16 = 2020;
pub const DEFAULT_HOST: &str = "127.0.0.1";

// Raw byte runs (GET/PUT bodies) are moved in chunks of this size
pub const CHUNK_SIZE: usize = 8192;

// Maximum string frame payload (16MB) - prevents memory exhaustion from a bogus length
pub const MAX_STRING_LEN: usize = 16 * 1024 * 1024;

// Concurrent sessions admitted by the daemon unless configured otherwise
pub const DEFAULT_MAX_SESSIONS: usize = 64;

// Prefix of every failure message sent after a negative status code
pub const FAILURE_PREFIX: &str = "Failed - ";

/// Commands understood by the daemon. Tokens are matched case-insensitively.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    ChangeDirectory,
    List,
    Get,
    Put,
}

impl Command {
    pub const ALL: [Command; 4] = [
        Command::ChangeDirectory,
        Command::List,
        Command::Get,
        Command::Put,
    ];

    pub fn token(self) -> &'static str {
        match self {
            Command::ChangeDirectory => "CD",
            Command::List => "LIST",
            Command::Get => "GET",
            Command::Put => "PUT",
        }
    }

    /// Look up a command by its textual token; unknown tokens yield `None`.
    pub fn from_token(token: &str) -> Option<Command> {
        Self::ALL
            .into_iter()
            .find(|c| c.token().eq_ignore_ascii_case(token))
    }
}

/// Outcome codes. Negative codes are failures and travel with a message frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    ParameterNotADirectory,
    InvalidDirectoryName,
    TooFewArguments,
    FileNotExists,
    UnknownError,
}

impl Status {
    pub const ALL: [Status; 6] = [
        Status::Ok,
        Status::ParameterNotADirectory,
        Status::InvalidDirectoryName,
        Status::TooFewArguments,
        Status::FileNotExists,
        Status::UnknownError,
    ];

    pub fn code(self) -> i32 {
        match self {
            Status::Ok => 100,
            Status::ParameterNotADirectory => -100,
            Status::InvalidDirectoryName => -101,
            Status::TooFewArguments => -200,
            Status::FileNotExists => -300,
            Status::UnknownError => -400,
        }
    }

    // Client-visible text; keep byte-for-byte stable
    pub fn message(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::ParameterNotADirectory => "paramter is not a directory",
            Status::InvalidDirectoryName => "directory name is invalid",
            Status::TooFewArguments => "too few arguments for command",
            Status::FileNotExists => "file not exists",
            Status::UnknownError => "unkonwn reason",
        }
    }

    pub fn from_code(code: i32) -> Option<Status> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    pub fn is_error(self) -> bool {
        is_error(self.code())
    }

    /// Text shown to the client for a failure status.
    pub fn failure_text(self) -> String {
        format!("{}{}", FAILURE_PREFIX, self.message())
    }
}

pub fn is_error(code: i32) -> bool {
    code < 0
}

/// Write a status code, followed by the failure message frame when the code is negative.
pub async fn send_status<W>(status: Status, stream: &mut W) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    write_i32(stream, status.code()).await?;
    if status.is_error() {
        write_string(stream, &status.failure_text()).await?;
    }
    Ok(())
}

/// Read a status code. A negative code is returned as `Err` carrying the message frame.
pub async fn read_status<R>(stream: &mut R) -> Result<Result<i32, String>, WireError>
where
    R: AsyncRead + Unpin,
{
    let code = read_i32(stream).await?;
    if is_error(code) {
        let msg = read_string(stream).await?;
        return Ok(Err(msg));
    }
    Ok(Ok(code))
}
