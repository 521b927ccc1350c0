//! Host-local channel server.
//!
//! The service listens on a Unix domain socket (mode 0600) or, on Windows, a
//! named pipe.  Neither is reachable from the network.  Each accepted
//! connection runs in its own task and may send any number of
//! newline-delimited requests; all of them funnel into the shared
//! [`Dispatcher`], so ordering across connections is decided by the vault
//! and gate locks.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
#[cfg(unix)]
use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::Instrument;

use crate::config::ServiceConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{Result, ServiceError};
use crate::protocol::{MAX_REQUEST_BYTES, ServiceRequest, ServiceResponse, Status};

/// Pause after a failed accept or pipe instance creation.
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

/// Where the service listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Unix domain socket at this path.
    #[cfg(unix)]
    UnixSocket(PathBuf),
    /// Windows named pipe `\\.\pipe\<name>`.
    #[cfg(windows)]
    NamedPipe(String),
}

impl Endpoint {
    /// The endpoint described by `config`.
    pub fn from_config(config: &ServiceConfig) -> Self {
        #[cfg(unix)]
        {
            let path = config
                .socket_path
                .clone()
                .unwrap_or_else(|| std::env::temp_dir().join(format!("{}.sock", config.pipe_name)));
            Self::UnixSocket(path)
        }

        #[cfg(windows)]
        {
            Self::NamedPipe(format!(r"\\.\pipe\{}", config.pipe_name))
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(unix)]
            Self::UnixSocket(path) => write!(f, "unix:{}", path.display()),
            #[cfg(windows)]
            Self::NamedPipe(name) => f.write_str(name),
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

enum Listener {
    #[cfg(unix)]
    Unix {
        listener: tokio::net::UnixListener,
        path: PathBuf,
    },
    #[cfg(windows)]
    Pipe {
        next: tokio::net::windows::named_pipe::NamedPipeServer,
        name: String,
    },
}

/// A bound service endpoint, ready to accept clients.
pub struct ServiceServer {
    dispatcher: Dispatcher,
    endpoint: Endpoint,
    listener: Listener,
}

impl ServiceServer {
    /// Bind `endpoint`.
    ///
    /// On Unix a stale socket file left by a dead instance is removed; a
    /// socket that still accepts connections is an error.
    pub async fn bind(dispatcher: Dispatcher, endpoint: Endpoint) -> Result<Self> {
        let listener = match &endpoint {
            #[cfg(unix)]
            Endpoint::UnixSocket(path) => bind_unix(path).await?,
            #[cfg(windows)]
            Endpoint::NamedPipe(name) => bind_pipe(name)?,
        };

        tracing::info!(endpoint = %endpoint, "service listening");
        Ok(Self {
            dispatcher,
            endpoint,
            listener,
        })
    }

    /// The endpoint this server is bound to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Accept connections until `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let dispatcher = self.dispatcher;

        match self.listener {
            #[cfg(unix)]
            Listener::Unix { listener, path } => {
                loop {
                    tokio::select! {
                        () = &mut shutdown => break,
                        accepted = listener.accept() => match accepted {
                            Ok((stream, _)) => spawn_connection(dispatcher.clone(), stream),
                            Err(e) => {
                                tracing::error!(error = %e, "accept failed");
                                tokio::time::sleep(RETRY_BACKOFF).await;
                            }
                        },
                    }
                }
                drop(listener);
                if let Err(e) = std::fs::remove_file(&path) {
                    tracing::debug!(error = %e, "socket file already gone");
                }
            }
            #[cfg(windows)]
            Listener::Pipe { next, name } => {
                use tokio::net::windows::named_pipe::ServerOptions;

                let mut next = Some(next);
                loop {
                    let server = match next.take() {
                        Some(server) => server,
                        None => {
                            let create =
                                || ServerOptions::new().reject_remote_clients(true).create(&name);
                            match retry_until_shutdown("pipe instance creation", create, shutdown.as_mut())
                                .await
                            {
                                Some(server) => server,
                                None => break,
                            }
                        }
                    };

                    let connected = tokio::select! {
                        () = &mut shutdown => break,
                        connected = server.connect() => connected,
                    };
                    match connected {
                        Ok(()) => spawn_connection(dispatcher.clone(), server),
                        Err(e) => {
                            tracing::error!(error = %e, "pipe connect failed");
                            tokio::time::sleep(RETRY_BACKOFF).await;
                        }
                    }
                }
            }
        }

        tracing::info!("service stopped");
        Ok(())
    }
}

/// Call `attempt` until it succeeds, backing off after each failure.
///
/// Returns `None` if `shutdown` resolves first.
#[cfg_attr(not(windows), allow(dead_code))]
async fn retry_until_shutdown<T, F, S>(what: &str, mut attempt: F, mut shutdown: Pin<&mut S>) -> Option<T>
where
    F: FnMut() -> std::io::Result<T>,
    S: Future<Output = ()>,
{
    loop {
        match attempt() {
            Ok(value) => return Some(value),
            Err(e) => {
                tracing::error!(error = %e, "{what} failed; retrying");
                tokio::select! {
                    () = shutdown.as_mut() => return None,
                    () = tokio::time::sleep(RETRY_BACKOFF) => {}
                }
            }
        }
    }
}

#[cfg(unix)]
async fn bind_unix(path: &std::path::Path) -> Result<Listener> {
    use std::os::unix::fs::{FileTypeExt, PermissionsExt};

    if let Ok(meta) = std::fs::symlink_metadata(path) {
        if !meta.file_type().is_socket() {
            return Err(ServiceError::config(
                "socket path exists and is not a socket",
            ));
        }
        if tokio::net::UnixStream::connect(path).await.is_ok() {
            return Err(ServiceError::transport(
                "another service instance is already listening",
            ));
        }
        tracing::warn!("removing stale socket file");
        std::fs::remove_file(path)?;
    }

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => std::path::Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    // Bind inside a fresh 0700 directory, tighten the socket, then move it
    // into place, so the socket is never reachable with umask permissions.
    let staging = tempfile::Builder::new()
        .prefix(".aegis-bind-")
        .tempdir_in(parent)?;
    let staged = staging.path().join("socket");
    let listener = tokio::net::UnixListener::bind(&staged)?;
    std::fs::set_permissions(&staged, std::fs::Permissions::from_mode(0o600))?;
    std::fs::rename(&staged, path)?;
    staging.close()?;

    Ok(Listener::Unix {
        listener,
        path: path.to_path_buf(),
    })
}

#[cfg(windows)]
fn bind_pipe(name: &str) -> Result<Listener> {
    use tokio::net::windows::named_pipe::ServerOptions;

    let next = ServerOptions::new()
        .first_pipe_instance(true)
        .reject_remote_clients(true)
        .create(name)?;
    Ok(Listener::Pipe {
        next,
        name: name.to_owned(),
    })
}

fn spawn_connection<S>(dispatcher: Dispatcher, stream: S)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let span = tracing::info_span!("connection", id = %uuid::Uuid::now_v7());
    tokio::spawn(
        async move {
            tracing::debug!("client connected");
            match serve_connection(stream, &dispatcher).await {
                Ok(()) => tracing::debug!("client disconnected"),
                Err(e) => tracing::warn!(error = %e, "connection closed with error"),
            }
        }
        .instrument(span),
    );
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Serve newline-delimited requests on `stream` until the peer closes it.
///
/// A malformed line gets a `badRequest` reply and the connection stays
/// open.  A line longer than [`MAX_REQUEST_BYTES`] gets a `badRequest`
/// reply and the connection is closed, since the stream cannot be
/// resynchronized.
pub async fn serve_connection<S>(stream: S, dispatcher: &Dispatcher) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut line = Vec::with_capacity(1024);

    loop {
        line.clear();
        let limit = (MAX_REQUEST_BYTES + 1) as u64;
        let read = (&mut reader).take(limit).read_until(b'\n', &mut line).await?;
        if read == 0 {
            return Ok(());
        }

        if line.len() > MAX_REQUEST_BYTES {
            tracing::warn!(limit = MAX_REQUEST_BYTES, "request line too long");
            let response = ServiceResponse::failure(Status::BadRequest, "request too large");
            write_response(&mut writer, &response).await?;
            return Ok(());
        }

        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let response = match serde_json::from_slice::<ServiceRequest>(&line) {
            Ok(request) => dispatcher.dispatch(request).await,
            Err(e) => {
                tracing::warn!(error = %e, "malformed request");
                ServiceResponse::failure(Status::BadRequest, "malformed request")
            }
        };
        write_response(&mut writer, &response).await?;
    }
}

async fn write_response<W>(writer: &mut W, response: &ServiceResponse) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut bytes = serde_json::to_vec(response)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}
