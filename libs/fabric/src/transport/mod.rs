use std::sync::Arc;
use std::time::Duration;

use crate::context::CallContext;
use crate::error::Result;
use crate::message::Message;

mod frame;
pub mod http;
pub mod memory;
pub mod tcp;
pub mod unix;

pub use self::frame::MAX_FRAME_LEN;
pub use self::http::{HttpTransport, HttpTransportListener};
pub use self::memory::{MemoryTransport, MemoryTransportListener};
pub use self::tcp::{TcpSocket, TcpTransport, TcpTransportListener};
pub use self::unix::{UnixSocket, UnixTransport, UnixTransportListener};

/// One logical exchange channel over a transport binding
///
/// Stream bindings carry any number of messages per socket. Request/response
/// bindings are one-shot: after the first message, `receive` reports
/// [`Error::ConnectionClosed`](crate::Error::ConnectionClosed).
///
/// Sending and receiving may run concurrently on the same socket.
#[async_trait::async_trait]
pub trait Socket: Send + Sync {
    /// Send a message over the socket
    async fn send(&self, ctx: &CallContext, message: &Message) -> Result<()>;

    /// Receive the next message from the socket
    async fn receive(&self, ctx: &CallContext) -> Result<Message>;

    /// Close the socket
    async fn close(&self) -> Result<()>;
}

/// Callback invoked once per accepted connection
pub type SocketHandler = Arc<dyn Fn(Box<dyn Socket>) + Send + Sync>;

/// Accepts inbound sockets
#[async_trait::async_trait]
pub trait Listener: Send + Sync {
    /// Accept connections, handing each to `handler`, until `ctx` is cancelled
    async fn accept(&mut self, ctx: &CallContext, handler: SocketHandler) -> Result<()>;

    /// The address this listener is bound to, in a form `dial` accepts
    fn local_addr(&self) -> Result<String>;

    /// Close the listener
    async fn close(&mut self) -> Result<()>;
}

const ACCEPT_BACKOFF_BASE: Duration = Duration::from_millis(5);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Delay before the next accept after `failures` consecutive accept errors
pub(crate) fn accept_backoff(failures: u32) -> Duration {
    ACCEPT_BACKOFF_BASE
        .saturating_mul(1 << failures.saturating_sub(1).min(8))
        .min(ACCEPT_BACKOFF_MAX)
}

/// Factory for outbound sockets and inbound listeners
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn dial(&self, ctx: &CallContext, address: &str) -> Result<Box<dyn Socket>>;

    async fn listen(&self, ctx: &CallContext, address: &str) -> Result<Box<dyn Listener>>;
}
