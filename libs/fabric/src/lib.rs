//! Switchboard Fabric - Wire envelope, transports and codecs
//!
//! Provides the [`Message`] envelope with its typed headers, the
//! [`Transport`](transport::Transport) / [`Socket`](transport::Socket) /
//! [`Listener`](transport::Listener) abstraction with TCP, Unix socket, HTTP
//! and in-memory bindings, payload codecs (JSON, bincode), the explicit
//! [`CallContext`] and the tracing header carrier.
//!
//! # Example
//!
//! ```no_run
//! use switchboard_fabric::{CallContext, Message};
//! use switchboard_fabric::transport::{Socket, TcpTransport, Transport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ctx = CallContext::background();
//! let socket = TcpTransport::new().dial(&ctx, "127.0.0.1:7070").await?;
//!
//! let mut request = Message::with_data(br#"{"id":42}"#.to_vec());
//! request.headers.set_path("UserService.GetUser");
//! request.headers.set_random_request_id();
//!
//! socket.send(&ctx, &request).await?;
//! let response = socket.receive(&ctx).await?;
//! socket.close().await?;
//! # let _ = response;
//! # Ok(())
//! # }
//! ```

pub mod carrier;
pub mod codec;
pub mod context;
pub mod error;
pub mod message;
pub mod transport;

// Re-exports for convenience
pub use context::CallContext;
pub use error::{Error, Result};
pub use message::{Headers, Message, RemoteError};
