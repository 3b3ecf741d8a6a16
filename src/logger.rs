use anyhow::Result;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Mutex;

/// Daemon event sink. Every method defaults to doing nothing.
pub trait Logger: Send + Sync {
    fn session_open(&self, _peer: SocketAddr) {}
    fn session_closed(&self, _peer: SocketAddr, _reason: &str) {}
    fn rejected(&self, _peer: SocketAddr) {}
    fn transfer_done(&self, _op: &str, _path: &Path, _bytes: u64) {}
    fn error(&self, _context: &str, _path: &Path, _msg: &str) {}
    /// A session that ended on a protocol or I/O fault rather than a clean close.
    fn session_error(&self, _peer: SocketAddr, _msg: &str) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

impl Logger for TextLogger {
    fn session_open(&self, peer: SocketAddr) {
        self.line(&format!("OPEN peer={}", peer));
    }
    fn session_closed(&self, peer: SocketAddr, reason: &str) {
        self.line(&format!("CLOSE peer={} reason={}", peer, reason));
    }
    fn rejected(&self, peer: SocketAddr) {
        self.line(&format!("REJECT peer={} reason=session limit", peer));
    }
    fn transfer_done(&self, op: &str, path: &Path, bytes: u64) {
        self.line(&format!("{} path={} bytes={}", op, path.display(), bytes));
    }
    fn error(&self, context: &str, path: &Path, msg: &str) {
        self.line(&format!("ERROR ctx={} path={} msg={}", context, path.display(), msg));
    }
    fn session_error(&self, peer: SocketAddr, msg: &str) {
        self.line(&format!("ERROR ctx=session peer={} msg={}", peer, msg));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_text_logger_appends_timestamped_lines() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("logs/ferryd.log");
        let logger = TextLogger::new(&log_path).unwrap();
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();

        logger.session_open(peer);
        logger.transfer_done("PUT", Path::new("/srv/a.txt"), 42);
        logger.session_closed(peer, "peer closed");
        logger.session_error(peer, "malformed request: empty request");

        let text = std::fs::read_to_string(&log_path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines.iter().all(|l| l.starts_with('[')));
        assert!(lines[0].ends_with("OPEN peer=127.0.0.1:5000"));
        assert!(lines[1].ends_with("PUT path=/srv/a.txt bytes=42"));
        assert!(lines[2].contains("reason=peer closed"));
        assert!(lines[3].ends_with("ERROR ctx=session peer=127.0.0.1:5000 msg=malformed request: empty request"));
    }
}
