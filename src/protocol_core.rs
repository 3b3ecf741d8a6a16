//! Frame primitives and path helpers shared by the daemon and the client
//!
//! Every message on the wire is a fixed sequence of four primitive frames:
//! a length-prefixed UTF-8 string, a big-endian i32, a big-endian i64, or a
//! raw byte run whose length was announced by a preceding i64. Frames carry
//! no type tag, so both sides must know from protocol position what comes next.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::{CHUNK_SIZE, MAX_STRING_LEN};

/// Stream-level failure while reading or writing frames
#[derive(Debug)]
pub enum WireError {
    /// Peer closed or reset the connection while a frame was expected
    ConnectionClosed,
    /// Bytes arrived but do not form a valid frame or request
    Malformed(String),
    /// Any other I/O fault
    Io(io::Error),
}

impl WireError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        WireError::Malformed(msg.into())
    }

    pub fn is_connection_closed(&self) -> bool {
        matches!(self, WireError::ConnectionClosed)
    }
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::ConnectionClosed => write!(f, "connection closed by peer"),
            WireError::Malformed(msg) => write!(f, "malformed frame: {}", msg),
            WireError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for WireError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WireError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WireError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => WireError::ConnectionClosed,
            _ => WireError::Io(e),
        }
    }
}

pub async fn write_i32<W: AsyncWrite + Unpin>(stream: &mut W, v: i32) -> Result<(), WireError> {
    stream.write_all(&v.to_be_bytes()).await?;
    Ok(())
}

pub async fn read_i32<R: AsyncRead + Unpin>(stream: &mut R) -> Result<i32, WireError> {
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).await?;
    Ok(i32::from_be_bytes(buf))
}

pub async fn write_i64<W: AsyncWrite + Unpin>(stream: &mut W, v: i64) -> Result<(), WireError> {
    stream.write_all(&v.to_be_bytes()).await?;
    Ok(())
}

pub async fn read_i64<R: AsyncRead + Unpin>(stream: &mut R) -> Result<i64, WireError> {
    let mut buf = [0u8; 8];
    stream.read_exact(&mut buf).await?;
    Ok(i64::from_be_bytes(buf))
}

/// Write a string frame: u32 big-endian byte length, then the UTF-8 bytes.
/// Header and payload go out in one buffer so the frame is never split by another writer.
pub async fn write_string<W: AsyncWrite + Unpin>(stream: &mut W, s: &str) -> Result<(), WireError> {
    validate_string_len(s.len())?;
    let mut buf = Vec::with_capacity(4 + s.len());
    buf.extend_from_slice(&(s.len() as u32).to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
    stream.write_all(&buf).await?;
    Ok(())
}

pub async fn read_string<R: AsyncRead + Unpin>(stream: &mut R) -> Result<String, WireError> {
    let mut hdr = [0u8; 4];
    stream.read_exact(&mut hdr).await?;
    let len = u32::from_be_bytes(hdr) as usize;
    validate_string_len(len)?;
    let mut payload = vec![0u8; len];
    if len > 0 {
        stream.read_exact(&mut payload).await?;
    }
    String::from_utf8(payload).map_err(|e| WireError::malformed(format!("string frame is not UTF-8: {}", e)))
}

/// Validate a string frame length against MAX_STRING_LEN
pub fn validate_string_len(len: usize) -> Result<(), WireError> {
    if len > MAX_STRING_LEN {
        return Err(WireError::malformed(format!(
            "string frame too large: {} bytes (max: {})",
            len, MAX_STRING_LEN
        )));
    }
    Ok(())
}

/// Convert a declared body length into a byte count, rejecting negatives.
pub fn declared_len(len: i64) -> Result<u64, WireError> {
    u64::try_from(len).map_err(|_| WireError::malformed(format!("negative body length {}", len)))
}

/// Read the next chunk of a raw byte run from the peer, at most `remaining` bytes.
/// End-of-stream before the run is complete is a closed connection.
pub async fn read_chunk<R: AsyncRead + Unpin>(
    stream: &mut R,
    buf: &mut [u8],
    remaining: u64,
) -> Result<usize, WireError> {
    let want = remaining.min(buf.len() as u64) as usize;
    let n = stream.read(&mut buf[..want]).await?;
    if n == 0 && want > 0 {
        return Err(WireError::ConnectionClosed);
    }
    Ok(n)
}

/// Copy exactly `len` bytes from `reader` to `writer` in CHUNK_SIZE pieces.
pub async fn copy_exact<R, W>(reader: &mut R, writer: &mut W, len: u64) -> Result<u64, WireError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    copy_exact_with(reader, writer, len, |_| {}).await
}

/// `copy_exact`, reporting the size of every chunk written.
pub async fn copy_exact_with<R, W, F>(
    reader: &mut R,
    writer: &mut W,
    len: u64,
    mut on_chunk: F,
) -> Result<u64, WireError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: FnMut(u64),
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut remaining = len;
    while remaining > 0 {
        let want = remaining.min(CHUNK_SIZE as u64) as usize;
        let n = reader.read(&mut buf[..want]).await.map_err(WireError::Io)?;
        if n == 0 {
            return Err(WireError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("source ended after {} of {} bytes", len - remaining, len),
            )));
        }
        writer.write_all(&buf[..n]).await?;
        remaining -= n as u64;
        on_chunk(n as u64);
    }
    writer.flush().await?;
    Ok(len)
}

/// Receive a raw byte run of `len` bytes from the peer into `path` (created or truncated).
///
/// The outer error is a stream failure. The inner one is a local file failure:
/// the remaining bytes are still consumed so the next frame lines up, and
/// whatever was written before the failure stays on disk.
pub async fn receive_file<R, F>(
    stream: &mut R,
    path: &Path,
    len: u64,
    mut on_chunk: F,
) -> Result<io::Result<u64>, WireError>
where
    R: AsyncRead + Unpin,
    F: FnMut(u64),
{
    let mut file = match tokio::fs::File::create(path).await {
        Ok(f) => f,
        Err(e) => {
            discard_exact(stream, len).await?;
            return Ok(Err(e));
        }
    };

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut remaining = len;
    let mut failure: Option<io::Error> = None;
    while remaining > 0 {
        let n = match read_chunk(stream, &mut buf, remaining).await {
            Ok(n) => n,
            Err(e) => {
                // Whatever arrived before the stream broke stays on disk
                let _ = file.flush().await;
                return Err(e);
            }
        };
        remaining -= n as u64;
        if failure.is_none() {
            if let Err(e) = file.write_all(&buf[..n]).await {
                failure = Some(e);
            }
        }
        on_chunk(n as u64);
    }
    if failure.is_none() {
        if let Err(e) = file.flush().await {
            failure = Some(e);
        }
    }

    Ok(match failure {
        Some(e) => Err(e),
        None => Ok(len),
    })
}

/// Consume and drop exactly `len` bytes of a raw byte run from the peer.
pub async fn discard_exact<R: AsyncRead + Unpin>(stream: &mut R, len: u64) -> Result<(), WireError> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut remaining = len;
    while remaining > 0 {
        let n = read_chunk(stream, &mut buf, remaining).await?;
        remaining -= n as u64;
    }
    Ok(())
}

/// Resolve a request argument against a directory: absolute paths are used as is.
pub fn resolve(cwd: &Path, arg: &Path) -> PathBuf {
    if arg.is_absolute() {
        arg.to_path_buf()
    } else {
        cwd.join(arg)
    }
}

/// Canonical form of a path that may not exist yet.
/// Existing paths resolve fully; otherwise the parent is canonicalized and the
/// final component appended; failing that the path is returned unchanged.
pub async fn canonical_path(p: &Path) -> PathBuf {
    if let Ok(canon) = tokio::fs::canonicalize(p).await {
        return canon;
    }
    if let (Some(parent), Some(name)) = (p.parent(), p.file_name()) {
        if let Ok(canon_parent) = tokio::fs::canonicalize(parent).await {
            return canon_parent.join(name);
        }
    }
    p.to_path_buf()
}

/// Final path segment of a client-supplied file name; directory components are dropped.
pub fn final_segment(arg: &str) -> Option<String> {
    Path::new(arg)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_string_frame_layout() {
        let mut out: Vec<u8> = Vec::new();
        write_string(&mut out, "héllo").await.unwrap();
        assert_eq!(&out[0..4], &6u32.to_be_bytes());
        assert_eq!(&out[4..], "héllo".as_bytes());

        let mut rd = Cursor::new(out);
        assert_eq!(read_string(&mut rd).await.unwrap(), "héllo");
    }

    #[tokio::test]
    async fn test_integers_are_big_endian() {
        let mut out: Vec<u8> = Vec::new();
        write_i32(&mut out, -100).await.unwrap();
        write_i64(&mut out, 1 << 40).await.unwrap();
        assert_eq!(&out[0..4], &[0xff, 0xff, 0xff, 0x9c]);

        let mut rd = Cursor::new(out);
        assert_eq!(read_i32(&mut rd).await.unwrap(), -100);
        assert_eq!(read_i64(&mut rd).await.unwrap(), 1 << 40);
    }

    #[tokio::test]
    async fn test_truncated_frame_is_connection_closed() {
        let mut rd = Cursor::new(vec![0u8, 0, 0, 5, b'a', b'b']);
        let err = read_string(&mut rd).await.unwrap_err();
        assert!(err.is_connection_closed());

        let mut empty = Cursor::new(Vec::<u8>::new());
        assert!(read_i64(&mut empty).await.unwrap_err().is_connection_closed());
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_malformed() {
        let mut rd = Cursor::new(vec![0u8, 0, 0, 2, 0xff, 0xfe]);
        match read_string(&mut rd).await {
            Err(WireError::Malformed(_)) => {}
            other => panic!("expected malformed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_oversize_string_rejected() {
        let len = (MAX_STRING_LEN as u32) + 1;
        let mut rd = Cursor::new(len.to_be_bytes().to_vec());
        assert!(matches!(read_string(&mut rd).await, Err(WireError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_copy_exact_spans_chunks() {
        let data: Vec<u8> = (0..(CHUNK_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        let mut rd = Cursor::new(data.clone());
        let mut out: Vec<u8> = Vec::new();
        let n = copy_exact(&mut rd, &mut out, data.len() as u64).await.unwrap();
        assert_eq!(n, data.len() as u64);
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn test_copy_exact_short_source_fails() {
        let mut rd = Cursor::new(vec![1u8; 10]);
        let mut out: Vec<u8> = Vec::new();
        let err = copy_exact(&mut rd, &mut out, 20).await.unwrap_err();
        assert!(matches!(err, WireError::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }

    #[tokio::test]
    async fn test_discard_exact_leaves_following_frame() {
        let mut bytes = vec![7u8; 100];
        bytes.extend_from_slice(&42i32.to_be_bytes());
        let mut rd = Cursor::new(bytes);
        discard_exact(&mut rd, 100).await.unwrap();
        assert_eq!(read_i32(&mut rd).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_receive_file_writes_exact_body() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("out.bin");
        std::fs::write(&dest, b"old content that is longer").unwrap();

        let mut bytes = b"fresh".to_vec();
        bytes.extend_from_slice(&100i32.to_be_bytes());
        let mut rd = Cursor::new(bytes);
        let mut seen = 0;
        let res = receive_file(&mut rd, &dest, 5, |n| seen += n).await.unwrap();
        assert_eq!(res.unwrap(), 5);
        assert_eq!(seen, 5);
        assert_eq!(std::fs::read(&dest).unwrap(), b"fresh");
        assert_eq!(read_i32(&mut rd).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_receive_file_unwritable_destination_drains_body() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("missing-dir/out.bin");

        let mut bytes = vec![9u8; CHUNK_SIZE + 3];
        bytes.extend_from_slice(&7i32.to_be_bytes());
        let mut rd = Cursor::new(bytes);
        let res = receive_file(&mut rd, &dest, (CHUNK_SIZE + 3) as u64, |_| {}).await.unwrap();
        assert!(res.is_err());
        assert_eq!(read_i32(&mut rd).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_receive_file_peer_gone_is_connection_closed() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("out.bin");
        let mut rd = Cursor::new(vec![1u8; 3]);
        let err = receive_file(&mut rd, &dest, 10, |_| {}).await.unwrap_err();
        assert!(err.is_connection_closed());
        assert_eq!(std::fs::read(&dest).unwrap(), vec![1u8; 3]);
    }

    #[test]
    fn test_declared_len_rejects_negative() {
        assert_eq!(declared_len(0).unwrap(), 0);
        assert!(declared_len(-1).is_err());
    }

    #[test]
    fn test_final_segment_strips_directories() {
        assert_eq!(final_segment("a/b/report.pdf").as_deref(), Some("report.pdf"));
        assert_eq!(final_segment("/abs/x.txt").as_deref(), Some("x.txt"));
        assert_eq!(final_segment("plain").as_deref(), Some("plain"));
        assert_eq!(final_segment(".."), None);
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let cwd = Path::new("/srv/data");
        assert_eq!(resolve(cwd, Path::new("sub")), PathBuf::from("/srv/data/sub"));
        assert_eq!(resolve(cwd, Path::new("/etc")), PathBuf::from("/etc"));
    }

    #[tokio::test]
    async fn test_canonical_path_for_new_file() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        std::fs::create_dir(root.join("sub")).unwrap();

        let p = canonical_path(&root.join("sub/../sub/new.txt")).await;
        assert_eq!(p, root.join("sub").join("new.txt"));

        let existing = canonical_path(&root.join("./sub")).await;
        assert_eq!(existing, root.join("sub"));
    }
}
