//! Switchboard Node - Router, server, client and service assembly
//!
//! Handlers are plain types whose endpoint methods are exposed with the
//! [`handler`] attribute. A [`Server`] dispatches inbound requests to them by
//! `Handler.Method` path; a [`Client`] resolves a service name, dials it and
//! performs one request/response exchange per call.
//!
//! # Example
//!
//! ```no_run
//! use serde::{Deserialize, Serialize};
//! use switchboard_node::prelude::*;
//!
//! #[derive(Default, Serialize, Deserialize)]
//! struct Ping {
//!     n: u32,
//! }
//!
//! struct Echo;
//!
//! #[handler]
//! impl Echo {
//!     pub async fn ping(&self, _ctx: &CallContext, input: &Ping, output: &mut Ping) -> Result<(), Status> {
//!         output.n = input.n + 1;
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = Server::new(TcpTransport::new(), JsonCodec, "127.0.0.1:7070");
//! server.add_handler(Echo, "", &[])?;
//!
//! let client = Client::new(
//!     TcpTransport::new(),
//!     StaticDiscovery::new().with("echo", "127.0.0.1:7070"),
//!     JsonCodec,
//! );
//! let mut reply = Ping::default();
//! client.call("echo", "Echo.Ping", &Ping { n: 1 }, &mut reply, []).await?;
//! # Ok(())
//! # }
//! ```

extern crate self as switchboard_node;

pub mod broker;
pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod logging;
pub mod router;
pub mod server;
pub mod service;
pub mod store;

// Re-exports for convenience
pub use client::Client;
pub use config::{Environment, ServiceConfig};
pub use error::{
    BoxError, BrokerError, ClientError, ConfigError, DiscoveryError, HandlerError, RouteError,
    ServerError, ServiceError,
};
pub use router::{Handler, Router};
pub use server::Server;
pub use service::Service;
pub use switchboard_core::Status;
pub use switchboard_core_derive::handler;

/// Everything needed to write and wire up handlers
pub mod prelude {
    pub use crate::broker::{Broker, MemoryBroker};
    pub use crate::client::options as call;
    pub use crate::client::Client;
    pub use crate::discovery::{Discovery, StaticDiscovery};
    pub use crate::handler;
    pub use crate::router::Handler;
    pub use crate::server::Server;
    pub use crate::service::Service;
    pub use switchboard_core::Status;
    pub use switchboard_fabric::codec::{BincodeCodec, Codec, JsonCodec};
    pub use switchboard_fabric::transport::{
        HttpTransport, MemoryTransport, TcpTransport, UnixTransport,
    };
    pub use switchboard_fabric::CallContext;
}
