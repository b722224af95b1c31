use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("{0}")]
    Custom(String),
}

impl Error {
    /// Whether this error is the orderly end of a socket's message stream
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::ConnectionClosed)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
