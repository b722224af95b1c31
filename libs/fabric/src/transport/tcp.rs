use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::transport::frame::{read_frame, with_timeout, write_frame};
use crate::transport::{accept_backoff, Listener, Socket, SocketHandler, Transport};

/// TCP socket with length-prefix framing
///
/// Messages are sent with a 4-byte big-endian length prefix. The read and
/// write halves are locked independently so one task can wait for the next
/// message while others write responses.
pub struct TcpSocket {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    send_timeout: Option<Duration>,
    receive_timeout: Option<Duration>,
}

impl TcpSocket {
    /// Connect to a remote TCP address with no timeouts
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        TcpTransport::builder().connect(addr).await
    }

    /// Create from an existing TcpStream
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        let (reader, writer) = stream.into_split();

        Ok(Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            peer_addr,
            local_addr,
            send_timeout: None,
            receive_timeout: None,
        })
    }

    fn with_timeouts(mut self, send: Option<Duration>, receive: Option<Duration>) -> Self {
        self.send_timeout = send;
        self.receive_timeout = receive;
        self
    }

    /// Get the remote address of this connection
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Get the local address of this connection
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait::async_trait]
impl Socket for TcpSocket {
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
            // The peer may already be gone
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// TCP listener for accepting incoming connections
pub struct TcpTransportListener {
    listener: TcpListener,
    send_timeout: Option<Duration>,
    receive_timeout: Option<Duration>,
}

impl TcpTransportListener {
    /// Bind to a local address
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            send_timeout: None,
            receive_timeout: None,
        })
    }

    /// Accept a single incoming connection
    pub async fn accept_socket(&self) -> Result<(TcpSocket, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await?;
        let socket =
            TcpSocket::from_stream(stream)?.with_timeouts(self.send_timeout, self.receive_timeout);
        Ok((socket, addr))
    }

    /// Get the local address this listener is bound to
    pub fn local_socket_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(Into::into)
    }
}

#[async_trait::async_trait]
impl Listener for TcpTransportListener {
    async fn accept(&mut self, ctx: &CallContext, handler: SocketHandler) -> Result<()> {
        let mut failures = 0;
        loop {
            let accepted = tokio::select! {
                _ = ctx.cancellation().cancelled() => return Ok(()),
                accepted = self.accept_socket() => accepted,
            };

            match accepted {
                Ok((socket, addr)) => {
                    failures = 0;
                    tracing::debug!(peer = %addr, "accepted tcp connection");
                    handler(Box::new(socket));
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(error = %e, failures, "failed to accept tcp connection");
                    tokio::time::sleep(accept_backoff(failures)).await;
                }
            }
        }
    }

    fn local_addr(&self) -> Result<String> {
        Ok(self.local_socket_addr()?.to_string())
    }

    /// Tokio's TcpListener doesn't have an explicit close; cleanup happens on
    /// drop, so this is a no-op.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// TCP transport, configured with optional timeouts
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    connect_timeout: Option<Duration>,
    send_timeout: Option<Duration>,
    receive_timeout: Option<Duration>,
}

impl TcpTransport {
    /// Create a transport with no timeouts
    pub fn new() -> Self {
        Self::default()
    }

    /// Alias for [`TcpTransport::new`], for builder-style configuration
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

    /// Connect to `addr` with the configured settings
    pub async fn connect(&self, addr: impl tokio::net::ToSocketAddrs) -> Result<TcpSocket> {
        let connect_op = async { TcpStream::connect(addr).await.map_err(Error::from) };

        let stream = match self.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect_op)
                .await
                .map_err(|_| Error::Custom("Connect timeout exceeded".to_string()))??,
            None => connect_op.await?,
        };

        Ok(TcpSocket::from_stream(stream)?
            .with_timeouts(self.send_timeout, self.receive_timeout))
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    async fn dial(&self, ctx: &CallContext, address: &str) -> Result<Box<dyn Socket>> {
        tracing::debug!(address, "dialing tcp");
        let socket = ctx.run(self.connect(address)).await?;
        Ok(Box::new(socket))
    }

    async fn listen(&self, _ctx: &CallContext, address: &str) -> Result<Box<dyn Listener>> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| Error::Custom(format!("Invalid listen address {address}: {e}")))?;

        let mut listener = TcpTransportListener::bind(addr).await?;
        listener.send_timeout = self.send_timeout;
        listener.receive_timeout = self.receive_timeout;

        tracing::info!(address = %listener.local_socket_addr()?, "listening on tcp");
        Ok(Box::new(listener))
    }
}
