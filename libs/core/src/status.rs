use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Structured error that can be sent to a remote caller
///
/// Carries an HTTP-style status code, an optional stable identifier that
/// callers can match on, and a human readable detail. On the wire it is
/// bincode-serialized and base64-encoded into a single header value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub status_code: i16,
    pub id: Option<String>,
    pub detail: String,
}

impl Status {
    /// Create a status without a stable identifier
    pub fn new(status_code: i16, detail: impl Into<String>) -> Self {
        Self {
            status_code,
            id: None,
            detail: detail.into(),
        }
    }

    /// Create a status carrying a stable identifier
    pub fn with_id(id: impl Into<String>, status_code: i16, detail: impl Into<String>) -> Self {
        Self {
            status_code,
            id: Some(id.into()),
            detail: detail.into(),
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(400, detail)
    }

    pub fn bad_request_id(id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::with_id(id, 400, detail)
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::new(401, detail)
    }

    pub fn unauthorized_id(id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::with_id(id, 401, detail)
    }

    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self::new(403, detail)
    }

    pub fn forbidden_id(id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::with_id(id, 403, detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(404, detail)
    }

    pub fn not_found_id(id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::with_id(id, 404, detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(500, detail)
    }

    pub fn internal_id(id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::with_id(id, 500, detail)
    }

    /// Encode into the base64 blob carried by the `error` header
    pub fn encode(&self) -> Result<String> {
        let bytes = bincode::serialize(self)?;
        Ok(STANDARD.encode(bytes))
    }

    /// Decode a status previously produced by [`Status::encode`]
    pub fn decode(value: &str) -> Result<Self> {
        let bytes = STANDARD.decode(value)?;
        Ok(bincode::deserialize(&bytes)?)
    }

    /// Reason phrase for the status code, e.g. "Not Found"
    pub fn reason(&self) -> &'static str {
        u16::try_from(self.status_code)
            .ok()
            .and_then(|code| http::StatusCode::from_u16(code).ok())
            .and_then(|code| code.canonical_reason())
            .unwrap_or("Unknown Status")
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason(), self.detail)
    }
}

impl std::error::Error for Status {}
