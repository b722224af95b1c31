use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;

use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::transport::frame::{read_frame, with_timeout, write_frame};
use crate::transport::{accept_backoff, Listener, Socket, SocketHandler, Transport};

/// Unix domain socket with length-prefix framing
///
/// Messages are sent with a 4-byte big-endian length prefix
pub struct UnixSocket {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    send_timeout: Option<Duration>,
    receive_timeout: Option<Duration>,
}

impl UnixSocket {
    /// Connect to a Unix socket with no timeouts
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        UnixTransport::builder().connect(path).await
    }

    /// Create from an existing UnixStream
    pub fn from_stream(stream: UnixStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            send_timeout: None,
            receive_timeout: None,
        }
    }

    fn with_timeouts(mut self, send: Option<Duration>, receive: Option<Duration>) -> Self {
        self.send_timeout = send;
        self.receive_timeout = receive;
        self
    }
}

#[async_trait::async_trait]
impl Socket for UnixSocket {
    async fn send(&self, ctx: &CallContext, message: &Message) -> Result<()> {
        let send_op = async {
            let mut writer = self.writer.lock().await;
            write_frame(&mut *writer, message).await
        };

        ctx.run(with_timeout(self.send_timeout, "Send", send_op))
            .await
    }

    async fn receive(&self, ctx: &CallContext) -> Result<Message> {
        let receive_op = async {
            let mut reader = self.reader.lock().await;
            read_frame(&mut *reader).await
        };

        ctx.run(with_timeout(self.receive_timeout, "Receive", receive_op))
            .await
    }

    async fn close(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        match writer.shutdown().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Unix socket listener for accepting incoming connections
pub struct UnixTransportListener {
    listener: UnixListener,
    path: PathBuf,
    send_timeout: Option<Duration>,
    receive_timeout: Option<Duration>,
}

impl UnixTransportListener {
    /// Bind to a Unix socket path
    pub async fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Remove existing socket file if it exists
        if path.exists() {
            std::fs::remove_file(&path)?;
        }

        let listener = UnixListener::bind(&path)?;
        Ok(Self {
            listener,
            path,
            send_timeout: None,
            receive_timeout: None,
        })
    }

    /// Accept a single incoming connection
    pub async fn accept_socket(&self) -> Result<UnixSocket> {
        let (stream, _) = self.listener.accept().await?;
        Ok(UnixSocket::from_stream(stream).with_timeouts(self.send_timeout, self.receive_timeout))
    }

    /// Get the path this listener is bound to
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl Listener for UnixTransportListener {
    async fn accept(&mut self, ctx: &CallContext, handler: SocketHandler) -> Result<()> {
        let mut failures = 0;
        loop {
            let accepted = tokio::select! {
                _ = ctx.cancellation().cancelled() => return Ok(()),
                accepted = self.accept_socket() => accepted,
            };

            match accepted {
                Ok(socket) => {
                    failures = 0;
                    tracing::debug!(path = %self.path.display(), "accepted unix connection");
                    handler(Box::new(socket));
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(error = %e, failures, "failed to accept unix connection");
                    tokio::time::sleep(accept_backoff(failures)).await;
                }
            }
        }
    }

    fn local_addr(&self) -> Result<String> {
        Ok(self.path.display().to_string())
    }

    /// Close the listener and remove the socket file
    async fn close(&mut self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

impl Drop for UnixTransportListener {
    fn drop(&mut self) {
        // Clean up socket file on drop
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Unix socket transport; addresses are filesystem paths
#[derive(Debug, Clone, Default)]
pub struct UnixTransport {
    connect_timeout: Option<Duration>,
    send_timeout: Option<Duration>,
    receive_timeout: Option<Duration>,
}

impl UnixTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> Self {
        Self::default()
    }

    /// Set the connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the send timeout
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    /// Set the receive timeout
    pub fn receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = Some(timeout);
        self
    }

    /// Connect with the configured settings
    pub async fn connect(&self, path: impl AsRef<Path>) -> Result<UnixSocket> {
        let connect_op = UnixStream::connect(path.as_ref().to_path_buf());

        let stream = match self.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect_op)
                .await
                .map_err(|_| Error::Custom("Connect timeout exceeded".to_string()))??,
            None => connect_op.await?,
        };

        Ok(UnixSocket::from_stream(stream).with_timeouts(self.send_timeout, self.receive_timeout))
    }
}

#[async_trait::async_trait]
impl Transport for UnixTransport {
    async fn dial(&self, ctx: &CallContext, address: &str) -> Result<Box<dyn Socket>> {
        tracing::debug!(address, "dialing unix socket");
        let socket = ctx.run(self.connect(address)).await?;
        Ok(Box::new(socket))
    }

    async fn listen(&self, _ctx: &CallContext, address: &str) -> Result<Box<dyn Listener>> {
        let mut listener = UnixTransportListener::bind(address).await?;
        listener.send_timeout = self.send_timeout;
        listener.receive_timeout = self.receive_timeout;

        tracing::info!(path = address, "listening on unix socket");
        Ok(Box::new(listener))
    }
}
