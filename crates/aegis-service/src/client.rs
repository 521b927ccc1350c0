//! Client for the host-local service channel.
//!
//! Every call opens a fresh connection, sends one request and reads one
//! response.  Connecting retries until the configured timeout while the
//! endpoint does not exist yet or is busy, so a client started alongside the
//! service does not race its startup.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::config::ServiceConfig;
use crate::error::{Result, ServiceError};
use crate::protocol::{ServiceRequest, ServiceResponse};
use crate::server::Endpoint;

/// Delay between connection attempts.
const RETRY_DELAY: Duration = Duration::from_millis(50);

/// Client for one service endpoint.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    endpoint: Endpoint,
    timeout: Duration,
}

impl ServiceClient {
    pub fn new(endpoint: Endpoint, timeout: Duration) -> Self {
        Self { endpoint, timeout }
    }

    /// Client for the endpoint and timeout described by `config`.
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(Endpoint::from_config(config), config.connect_timeout())
    }

    /// Send `request` and wait for the reply.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Transport`] if the service cannot be reached within
    /// the timeout or the exchange fails.  A reply with `success: false` is
    /// returned as `Ok`.
    pub async fn send(&self, request: &ServiceRequest) -> Result<ServiceResponse> {
        match &self.endpoint {
            #[cfg(unix)]
            Endpoint::UnixSocket(path) => {
                let stream = self.connect_unix(path).await?;
                exchange(stream, request).await
            }
            #[cfg(windows)]
            Endpoint::NamedPipe(name) => {
                let stream = self.connect_pipe(name).await?;
                exchange(stream, request).await
            }
        }
    }

    #[cfg(unix)]
    async fn connect_unix(&self, path: &std::path::Path) -> Result<tokio::net::UnixStream> {
        let attempt = async {
            loop {
                match tokio::net::UnixStream::connect(path).await {
                    Ok(stream) => return Ok(stream),
                    Err(e) if is_retryable(&e) => tokio::time::sleep(RETRY_DELAY).await,
                    Err(e) => return Err(ServiceError::transport(format!("connect failed: {e}"))),
                }
            }
        };
        tokio::time::timeout(self.timeout, attempt)
            .await
            .map_err(|_| ServiceError::transport("timed out connecting to the service"))?
    }

    #[cfg(windows)]
    async fn connect_pipe(
        &self,
        name: &str,
    ) -> Result<tokio::net::windows::named_pipe::NamedPipeClient> {
        use tokio::net::windows::named_pipe::ClientOptions;

        /// `ERROR_PIPE_BUSY`: every server instance is taken.
        const ERROR_PIPE_BUSY: i32 = 231;

        let attempt = async {
            loop {
                match ClientOptions::new().open(name) {
                    Ok(client) => return Ok(client),
                    Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY) || is_retryable(&e) => {
                        tokio::time::sleep(RETRY_DELAY).await
                    }
                    Err(e) => return Err(ServiceError::transport(format!("connect failed: {e}"))),
                }
            }
        };
        tokio::time::timeout(self.timeout, attempt)
            .await
            .map_err(|_| ServiceError::transport("timed out connecting to the service"))?
    }

    // -- Commands -----------------------------------------------------------

    pub async fn ping(&self) -> Result<ServiceResponse> {
        self.send(&ServiceRequest::new("ping")).await
    }

    pub async fn get_device_info(&self) -> Result<ServiceResponse> {
        self.send(&ServiceRequest::new("get_device_info")).await
    }

    pub async fn has_mnemonic(&self) -> Result<ServiceResponse> {
        self.send(&ServiceRequest::new("has_mnemonic")).await
    }

    pub async fn get_mnemonic(&self) -> Result<ServiceResponse> {
        self.send(&ServiceRequest::new("get_mnemonic")).await
    }

    pub async fn set_mnemonic(&self, mnemonic: &str) -> Result<ServiceResponse> {
        self.send(&ServiceRequest::new("set_mnemonic").with_param("mnemonic", mnemonic))
            .await
    }

    pub async fn delete_mnemonic(&self) -> Result<ServiceResponse> {
        self.send(&ServiceRequest::new("delete_mnemonic")).await
    }

    /// Request a development unlock; `None` uses the service default.
    pub async fn unlock_for_development(&self, minutes: Option<i64>) -> Result<ServiceResponse> {
        let mut request = ServiceRequest::new("unlock_for_development");
        if let Some(minutes) = minutes {
            request = request.with_param("minutes", minutes);
        }
        self.send(&request).await
    }

    pub async fn lock(&self) -> Result<ServiceResponse> {
        self.send(&ServiceRequest::new("lock")).await
    }

    pub async fn get_lock_status(&self) -> Result<ServiceResponse> {
        self.send(&ServiceRequest::new("get_lock_status")).await
    }

    pub async fn get_recent_logs(&self, limit: Option<i64>) -> Result<ServiceResponse> {
        let mut request = ServiceRequest::new("get_recent_logs");
        if let Some(limit) = limit {
            request = request.with_param("limit", limit);
        }
        self.send(&request).await
    }
}

fn is_retryable(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
    )
}

/// Write one request line and read one response line.
pub async fn exchange<S>(stream: S, request: &ServiceRequest) -> Result<ServiceResponse>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);

    let mut bytes = serde_json::to_vec(request)?;
    bytes.push(b'\n');
    writer
        .write_all(&bytes)
        .await
        .map_err(|e| ServiceError::transport(format!("write failed: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| ServiceError::transport(format!("write failed: {e}")))?;

    let mut line = String::new();
    let read = BufReader::new(reader)
        .read_line(&mut line)
        .await
        .map_err(|e| ServiceError::transport(format!("read failed: {e}")))?;
    if read == 0 {
        return Err(ServiceError::transport("service closed the connection"));
    }

    serde_json::from_str(line.trim_end())
        .map_err(|e| ServiceError::transport(format!("malformed response: {e}")))
}
