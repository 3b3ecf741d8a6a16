//! Async (Tokio) transport for the ferry daemon and client.
//!
//! The daemon serves one session per TCP connection. A session reads a request
//! line, dispatches it to CD, LIST, GET or PUT, writes the response frames, and
//! goes back to waiting for the next request until the peer disconnects.

pub mod server {
    use anyhow::{Context, Result};
    use std::net::SocketAddr;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use tokio::io::{AsyncRead, AsyncWrite};
    use tokio::net::TcpListener;
    use tokio::sync::Semaphore;

    use crate::locks::PathLocks;
    use crate::logger::Logger;
    use crate::protocol::{send_status, Command, Status, DEFAULT_MAX_SESSIONS};
    use crate::protocol_core::{
        canonical_path, copy_exact, declared_len, final_segment, read_i64, read_string,
        receive_file, resolve, validate_string_len, write_i32, write_i64, write_string, WireError,
    };

    /// What the accept loop does with a connection once `max_sessions` are live.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Admission {
        /// Wait for a running session to finish before accepting again
        Queue,
        /// Accept and immediately close the connection
        Reject,
    }

    #[derive(Clone, Debug)]
    pub struct ServerConfig {
        /// Initial current directory of every session
        pub start_dir: PathBuf,
        pub max_sessions: usize,
        pub admission: Admission,
    }

    impl Default for ServerConfig {
        fn default() -> Self {
            Self {
                start_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
                max_sessions: DEFAULT_MAX_SESSIONS,
                admission: Admission::Queue,
            }
        }
    }

    /// State shared by all sessions of one daemon.
    #[derive(Clone)]
    pub struct SessionContext {
        pub locks: PathLocks,
        pub logger: Arc<dyn Logger>,
    }

    pub async fn serve(bind: &str, config: ServerConfig, logger: Arc<dyn Logger>) -> Result<()> {
        let listener = TcpListener::bind(bind)
            .await
            .with_context(|| format!("bind {}", bind))?;
        eprintln!(
            "ferry daemon listening on {} dir={}",
            bind,
            config.start_dir.display()
        );
        serve_listener(listener, config, logger).await
    }

    /// Run the accept loop on an already bound listener. Never returns unless
    /// the start directory is unusable.
    pub async fn serve_listener(
        listener: TcpListener,
        config: ServerConfig,
        logger: Arc<dyn Logger>,
    ) -> Result<()> {
        let start_dir = std::fs::canonicalize(&config.start_dir).with_context(|| {
            format!("canonicalize start dir {}", config.start_dir.display())
        })?;
        let ctx = SessionContext {
            locks: PathLocks::new(),
            logger,
        };
        let permits = Arc::new(Semaphore::new(config.max_sessions.max(1)));

        loop {
            let queued = match config.admission {
                Admission::Queue => Some(
                    permits
                        .clone()
                        .acquire_owned()
                        .await
                        .context("session semaphore closed")?,
                ),
                Admission::Reject => None,
            };

            let (stream, peer) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    eprintln!("accept failed: {}", e);
                    continue;
                }
            };

            let permit = match queued {
                Some(p) => p,
                None => match permits.clone().try_acquire_owned() {
                    Ok(p) => p,
                    Err(_) => {
                        eprintln!(
                            "refusing {}: {} sessions already running",
                            peer, config.max_sessions
                        );
                        ctx.logger.rejected(peer);
                        drop(stream);
                        continue;
                    }
                },
            };

            let _ = stream.set_nodelay(true);
            eprintln!("conn from {}", peer);
            let ctx = ctx.clone();
            let start_dir = start_dir.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let mut stream = stream;
                run_session(&mut stream, &ctx, peer, start_dir).await;
            });
        }
    }

    /// Drive one connection to completion and log how it ended.
    pub async fn run_session<S>(stream: &mut S, ctx: &SessionContext, peer: SocketAddr, start_dir: PathBuf)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        ctx.logger.session_open(peer);
        let reason = match session_loop(stream, ctx, start_dir).await {
            Err(WireError::ConnectionClosed) => "peer closed".to_string(),
            Err(e) => {
                eprintln!("session {} aborted: {}", peer, e);
                ctx.logger.session_error(peer, &e.to_string());
                e.to_string()
            }
            Ok(()) => "done".to_string(),
        };
        ctx.logger.session_closed(peer, &reason);
    }

    /// Request loop. The current directory lives here and is handed to each dispatch.
    pub async fn session_loop<S>(stream: &mut S, ctx: &SessionContext, start_dir: PathBuf) -> Result<(), WireError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut cwd = start_dir;
        loop {
            let request = read_string(stream).await?;
            cwd = dispatch(ctx, cwd, &request, stream).await?;
        }
    }

    /// A parsed request line: command token plus whitespace-separated arguments.
    #[derive(Debug, PartialEq, Eq)]
    pub struct Request<'a> {
        pub command: Command,
        pub args: Vec<&'a str>,
    }

    pub fn parse_request(line: &str) -> Result<Request<'_>, WireError> {
        let mut tokens = line.split_whitespace();
        let token = tokens
            .next()
            .ok_or_else(|| WireError::malformed("empty request"))?;
        let command = Command::from_token(token)
            .ok_or_else(|| WireError::malformed(format!("unknown command {:?}", token)))?;
        Ok(Request {
            command,
            args: tokens.collect(),
        })
    }

    /// Execute one request and return the session's current directory afterwards.
    /// Failures reported as a status keep the session alive; a `WireError` ends it.
    pub async fn dispatch<S>(
        ctx: &SessionContext,
        cwd: PathBuf,
        line: &str,
        stream: &mut S,
    ) -> Result<PathBuf, WireError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let request = parse_request(line)?;
        let arg = request.args.first().copied();
        match request.command {
            Command::ChangeDirectory => change_directory(cwd, arg, stream).await,
            Command::List => {
                list(&cwd, arg, stream).await?;
                Ok(cwd)
            }
            Command::Get => {
                get(ctx, &cwd, arg, stream).await?;
                Ok(cwd)
            }
            Command::Put => {
                put(ctx, &cwd, arg, stream).await?;
                Ok(cwd)
            }
        }
    }

    async fn is_dir(p: &Path) -> bool {
        tokio::fs::metadata(p).await.is_ok_and(|m| m.is_dir())
    }

    /// OK, then the text's char count, then the text itself.
    async fn send_text<S>(stream: &mut S, text: &str) -> Result<(), WireError>
    where
        S: AsyncWrite + Unpin,
    {
        send_status(Status::Ok, stream).await?;
        let chars = i32::try_from(text.chars().count()).unwrap_or(i32::MAX);
        write_i32(stream, chars).await?;
        write_string(stream, text).await
    }

    async fn change_directory<S>(cwd: PathBuf, arg: Option<&str>, stream: &mut S) -> Result<PathBuf, WireError>
    where
        S: AsyncWrite + Unpin,
    {
        let target = match arg {
            Some(a) => resolve(&cwd, Path::new(a)),
            None => cwd.clone(),
        };
        let canon = match tokio::fs::canonicalize(&target).await {
            Ok(c) => c,
            Err(_) => {
                send_status(Status::ParameterNotADirectory, stream).await?;
                return Ok(cwd);
            }
        };
        if !is_dir(&canon).await {
            send_status(Status::ParameterNotADirectory, stream).await?;
            return Ok(cwd);
        }
        send_text(stream, &canon.to_string_lossy()).await?;
        Ok(canon)
    }

    async fn list<S>(cwd: &Path, arg: Option<&str>, stream: &mut S) -> Result<(), WireError>
    where
        S: AsyncWrite + Unpin,
    {
        let Some(arg) = arg else {
            return send_status(Status::TooFewArguments, stream).await;
        };
        let dir = resolve(cwd, Path::new(arg));
        if !is_dir(&dir).await {
            return send_status(Status::ParameterNotADirectory, stream).await;
        }
        let listing = match render_listing(&dir).await {
            Ok(s) if validate_string_len(s.len()).is_ok() => s,
            Ok(s) => {
                eprintln!("listing of {} too large ({} bytes)", dir.display(), s.len());
                return send_status(Status::UnknownError, stream).await;
            }
            Err(e) => {
                eprintln!("list {} failed: {}", dir.display(), e);
                return send_status(Status::UnknownError, stream).await;
            }
        };
        send_text(stream, &listing).await
    }

    /// One `name,size\n` line per direct child, `-` as the size of directories,
    /// in the order the filesystem enumerates them.
    pub async fn render_listing(dir: &Path) -> std::io::Result<String> {
        let mut out = String::new();
        let mut rd = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = rd.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let size = match tokio::fs::metadata(entry.path()).await {
                Ok(m) if m.is_dir() => "-".to_string(),
                Ok(m) => m.len().to_string(),
                Err(_) => "0".to_string(),
            };
            out.push_str(&name);
            out.push(',');
            out.push_str(&size);
            out.push('\n');
        }
        Ok(out)
    }

    async fn get<S>(ctx: &SessionContext, cwd: &Path, arg: Option<&str>, stream: &mut S) -> Result<(), WireError>
    where
        S: AsyncWrite + Unpin,
    {
        let Some(arg) = arg else {
            return send_status(Status::TooFewArguments, stream).await;
        };
        let path = canonical_path(&resolve(cwd, Path::new(arg))).await;
        let _lease = ctx.locks.read(&path).await;

        let len = match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_file() => m.len(),
            _ => return send_status(Status::FileNotExists, stream).await,
        };
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) => {
                ctx.logger.error("GET", &path, &e.to_string());
                return send_status(Status::UnknownError, stream).await;
            }
        };

        send_status(Status::Ok, stream).await?;
        let declared = i64::try_from(len).map_err(|_| WireError::malformed("file too large"))?;
        write_i64(stream, declared).await?;
        copy_exact(&mut file, stream, len).await?;
        ctx.logger.transfer_done("GET", &path, len);
        Ok(())
    }

    async fn put<S>(ctx: &SessionContext, cwd: &Path, arg: Option<&str>, stream: &mut S) -> Result<(), WireError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let name = arg
            .and_then(final_segment)
            .ok_or_else(|| WireError::malformed("PUT without a file name"))?;
        let len = declared_len(read_i64(stream).await?)?;
        let path = canonical_path(&cwd.join(&name)).await;

        let lease = ctx.locks.write(&path).await;
        let written = receive_file(stream, &path, len, |_| {}).await?;
        drop(lease);

        match written {
            Ok(bytes) => {
                ctx.logger.transfer_done("PUT", &path, bytes);
                send_status(Status::Ok, stream).await
            }
            Err(e) => {
                eprintln!("put {} failed: {}", path.display(), e);
                ctx.logger.error("PUT", &path, &e.to_string());
                send_status(Status::UnknownError, stream).await
            }
        }
    }

}

pub mod client {
    use anyhow::{Context, Result};
    use std::path::{Path, PathBuf};
    use tokio::io::{AsyncRead, AsyncWrite};
    use tokio::net::TcpStream;

    use crate::progress::TransferProgress;
    use crate::protocol::{read_status, Command};
    use crate::protocol_core::{
        copy_exact_with, declared_len, discard_exact, final_segment, read_i32, read_i64,
        read_string, receive_file, write_i64, write_string, WireError,
    };

    pub const INVALID_COMMAND: &str = "Error : invalid command";
    pub const MISSING_FILE_NAME: &str = "input file name";
    pub const NO_SUCH_FILE: &str = "No such file exists";

    pub async fn connect(host: &str, port: u16) -> Result<TcpStream> {
        let addr = format!("{}:{}", host, port);
        let stream = TcpStream::connect(&addr)
            .await
            .with_context(|| format!("connect {}", addr))?;
        let _ = stream.set_nodelay(true);
        Ok(stream)
    }

    /// One connection to a daemon plus the local directory GET writes into and PUT reads from.
    pub struct Client<S> {
        stream: S,
        local_dir: PathBuf,
        show_progress: bool,
    }

    impl<S> Client<S>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        pub fn new(stream: S, local_dir: impl Into<PathBuf>) -> Self {
            Self {
                stream,
                local_dir: local_dir.into(),
                show_progress: false,
            }
        }

        pub fn with_progress(mut self, show: bool) -> Self {
            self.show_progress = show;
            self
        }

        pub fn local_dir(&self) -> &Path {
            &self.local_dir
        }

        /// Run one typed command line and return the text to show the user.
        /// `Ok(None)` means there is nothing to show (blank input); `Err` means
        /// the connection is no longer usable.
        pub async fn execute(&mut self, line: &str) -> Result<Option<String>, WireError> {
            let mut tokens = line.split_whitespace();
            let Some(token) = tokens.next() else {
                return Ok(None);
            };
            let Some(command) = Command::from_token(token) else {
                return Ok(Some(INVALID_COMMAND.to_string()));
            };
            let arg = tokens.next();

            match command {
                Command::Put => self.put(line, arg).await.map(Some),
                _ => self.request(command, line, arg).await,
            }
        }

        /// CD, LIST and GET: send the line as is, then read the reply.
        /// The listing loses its final newline; an empty one shows nothing.
        async fn request(&mut self, command: Command, line: &str, arg: Option<&str>) -> Result<Option<String>, WireError> {
            write_string(&mut self.stream, line).await?;
            if let Err(msg) = read_status(&mut self.stream).await? {
                return Ok(Some(msg));
            }

            if command == Command::Get {
                return self.receive(arg.unwrap_or_default()).await.map(Some);
            }
            let text = self.read_text().await?;
            if command == Command::List {
                let listing = text.trim_end_matches('\n');
                return Ok((!listing.is_empty()).then(|| listing.to_string()));
            }
            Ok(Some(text))
        }

        async fn read_text(&mut self) -> Result<String, WireError> {
            // Announced char count; the string frame carries its own length
            let _chars = read_i32(&mut self.stream).await?;
            read_string(&mut self.stream).await
        }

        async fn receive(&mut self, arg: &str) -> Result<String, WireError> {
            let len = declared_len(read_i64(&mut self.stream).await?)?;
            let Some(name) = final_segment(arg) else {
                discard_exact(&mut self.stream, len).await?;
                return Ok(format!("Error : cannot store {:?} locally", arg));
            };
            let path = self.local_dir.join(&name);

            let progress = TransferProgress::new(&name, len, self.show_progress);
            let written = receive_file(&mut self.stream, &path, len, |n| progress.inc(n)).await?;
            progress.finish();

            Ok(match written {
                Ok(bytes) => format!("Received {}/{} bytes", name, bytes),
                Err(e) => format!("{}: {}", path.display(), e),
            })
        }

        async fn put(&mut self, line: &str, arg: Option<&str>) -> Result<String, WireError> {
            let Some(arg) = arg else {
                return Ok(MISSING_FILE_NAME.to_string());
            };
            let path = self.local_dir.join(arg);
            let len = match tokio::fs::metadata(&path).await {
                Ok(m) if m.is_file() => m.len(),
                _ => return Ok(NO_SUCH_FILE.to_string()),
            };
            let mut file = match tokio::fs::File::open(&path).await {
                Ok(f) => f,
                Err(e) => return Ok(format!("{}: {}", path.display(), e)),
            };
            let name = final_segment(arg).unwrap_or_else(|| arg.to_string());
            let declared = i64::try_from(len).map_err(|_| WireError::malformed("file too large"))?;

            write_string(&mut self.stream, line).await?;
            write_i64(&mut self.stream, declared).await?;
            let progress = TransferProgress::new(&name, len, self.show_progress);
            copy_exact_with(&mut file, &mut self.stream, len, |n| progress.inc(n)).await?;
            progress.finish();

            let mut shown = format!("{} transferred/{} bytes", name, len);
            if let Err(msg) = read_status(&mut self.stream).await? {
                shown.push('\n');
                shown.push_str(&msg);
            }
            Ok(shown)
        }
    }
}
