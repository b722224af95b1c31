use std::time::Duration;

use switchboard_core::Status;
use switchboard_fabric::{Error as FabricError, RemoteError};
use thiserror::Error;

/// Error type application handlers may return
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Dispatch failures produced by the router
#[derive(Error, Debug)]
pub enum RouteError {
    /// The path is not of the form `Handler.Method`
    #[error("Malformed request path {0:?}")]
    MalformedPath(String),

    /// The handler or method named by the path is not registered
    #[error("Endpoint not found: {0}")]
    EndpointNotFound(String),

    #[error("Failed to decode request for {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: FabricError,
    },

    #[error("Failed to encode response for {path}: {source}")]
    Encode {
        path: String,
        #[source]
        source: FabricError,
    },

    #[error(transparent)]
    Handler(#[from] HandlerError),
}

/// An error returned by application code, tagged with where it came from
#[derive(Error, Debug)]
#[error("Handler {handler}.{endpoint} failed: {source}")]
pub struct HandlerError {
    pub handler: String,
    pub endpoint: String,
    #[source]
    pub source: BoxError,
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to listen on {address}: {source}")]
    Listen {
        address: String,
        #[source]
        source: FabricError,
    },

    #[error("Accept error: {0}")]
    Accept(#[source] FabricError),

    #[error("Handlers cannot be added once the server is serving")]
    AlreadyServing,

    #[error("No broker configured")]
    NoBroker,

    #[error("Encode error: {0}")]
    Encode(#[source] FabricError),

    #[error("Publish error: {0}")]
    Publish(#[from] BrokerError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Server has been shut down")]
    ShutDown,
}

/// Failures of a single client call, one variant per step
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Resolve error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Failed to dial {address}: {source}")]
    Dial {
        address: String,
        #[source]
        source: FabricError,
    },

    #[error("Encode error: {0}")]
    Encode(#[source] FabricError),

    #[error("Send error: {0}")]
    Send(#[source] FabricError),

    #[error("Receive error: {0}")]
    Receive(#[source] FabricError),

    #[error("Decode error: {0}")]
    Decode(#[source] FabricError),

    /// The remote handler failed; carried back in the `error` header
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    #[error("No broker configured")]
    NoBroker,

    #[error("Subscribe error: {0}")]
    Subscribe(#[from] BrokerError),
}

impl ClientError {
    /// The structured error sent by the remote handler, if there was one
    pub fn status(&self) -> Option<&Status> {
        match self {
            Self::Remote(remote) => remote.status(),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Broker is not connected")]
    NotConnected,

    #[error("{0}")]
    Custom(String),
}

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Service {0:?} is not registered")]
    ServiceNotRegistered(String),

    #[error("{0}")]
    Custom(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Figment(Box<figment::Error>),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid environment {0:?}")]
    InvalidEnvironment(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Tried to index a non-indexable value")]
    CannotIndex,
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Missing {0}")]
    Missing(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}
