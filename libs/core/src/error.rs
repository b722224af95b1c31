use thiserror::Error;

/// Failures encoding or decoding a [`Status`](crate::Status) header value
#[derive(Error, Debug)]
pub enum Error {
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
}

pub type Result<T> = std::result::Result<T, Error>;
