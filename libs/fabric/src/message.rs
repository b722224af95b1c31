use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use switchboard_core::Status;
use uuid::Uuid;

pub const HEADER_PATH: &str = "path";
pub const HEADER_ERROR: &str = "error";
pub const HEADER_REQUEST_ID: &str = "reqid";
pub const HEADER_PARENT_REQUEST_ID: &str = "parentreq";
pub const HEADER_USER_ID: &str = "userid";

/// String-keyed header bag attached to every message
///
/// Well-known keys get typed accessors. Values are always stored as strings,
/// so a malformed value reads back as absent rather than failing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(HashMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The `Handler.Method` path a request targets
    pub fn path(&self) -> Option<&str> {
        self.get(HEADER_PATH)
    }

    pub fn set_path(&mut self, path: impl Into<String>) {
        self.insert(HEADER_PATH, path);
    }

    /// The error carried by a response, if any
    ///
    /// Structured errors are decoded first; anything that fails to decode is
    /// surfaced as plain error text.
    pub fn error(&self) -> Option<RemoteError> {
        self.get(HEADER_ERROR).map(RemoteError::from_header)
    }

    /// Store an error in the `error` header
    ///
    /// If a [`Status`] appears anywhere in the error's source chain it is
    /// encoded structurally, otherwise the error's display text is used.
    pub fn set_error(&mut self, err: &(dyn std::error::Error + 'static)) {
        let value = find_status(err)
            .and_then(|status| status.encode().ok())
            .unwrap_or_else(|| err.to_string());

        self.insert(HEADER_ERROR, value);
    }

    pub fn request_id(&self) -> Option<Uuid> {
        self.get(HEADER_REQUEST_ID)
            .and_then(|id| Uuid::parse_str(id).ok())
    }

    pub fn set_request_id(&mut self, id: Uuid) {
        self.insert(HEADER_REQUEST_ID, id.to_string());
    }

    /// Generate and store a fresh request id, returning it
    pub fn set_random_request_id(&mut self) -> Uuid {
        let id = Uuid::new_v4();
        self.set_request_id(id);
        id
    }

    pub fn parent_request_id(&self) -> Option<Uuid> {
        self.get(HEADER_PARENT_REQUEST_ID)
            .and_then(|id| Uuid::parse_str(id).ok())
    }

    /// Nil ids are not stored
    pub fn set_parent_request_id(&mut self, id: Uuid) {
        if !id.is_nil() {
            self.insert(HEADER_PARENT_REQUEST_ID, id.to_string());
        }
    }

    pub fn user_id(&self) -> Option<u32> {
        self.get(HEADER_USER_ID).and_then(|id| id.parse().ok())
    }

    pub fn set_user_id(&mut self, id: u32) {
        self.insert(HEADER_USER_ID, id.to_string());
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn find_status<'a>(err: &'a (dyn std::error::Error + 'static)) -> Option<&'a Status> {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(status) = err.downcast_ref::<Status>() {
            return Some(status);
        }
        current = err.source();
    }
    None
}

/// Wire-level unit of communication: headers plus an opaque payload
///
/// The payload is only understood by the codec. When a message is rendered
/// as JSON the payload is a base64 string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub headers: Headers,

    #[serde(default, with = "base64_data")]
    pub data: Vec<u8>,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            headers: Headers::new(),
            data,
        }
    }

    /// Create an empty response that echoes the request's id
    pub fn response_to(request: &Message) -> Self {
        let mut response = Self::new();
        if let Some(id) = request.headers.get(HEADER_REQUEST_ID) {
            response.headers.insert(HEADER_REQUEST_ID, id);
        }
        response
    }
}

/// Error reconstructed from a response's `error` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// A structured error sent by the remote handler
    Status(Status),
    /// Any other error, as the remote side rendered it
    Message(String),
}

impl RemoteError {
    pub fn from_header(value: &str) -> Self {
        match Status::decode(value) {
            Ok(status) => Self::Status(status),
            Err(_) => Self::Message(value.to_owned()),
        }
    }

    pub fn status(&self) -> Option<&Status> {
        match self {
            Self::Status(status) => Some(status),
            Self::Message(_) => None,
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(status) => fmt::Display::fmt(status, f),
            Self::Message(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for RemoteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Status(status) => Some(status),
            Self::Message(_) => None,
        }
    }
}

mod base64_data {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?;
        match encoded {
            Some(encoded) => STANDARD.decode(encoded).map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("Handler Users.Get failed: {source}")]
    struct Wrapped {
        #[source]
        source: Status,
    }

    #[test]
    fn setters_work_on_fresh_headers() {
        let mut msg = Message::default();
        msg.headers.set_path("Users.Get");
        msg.headers.set_user_id(7);
        let id = msg.headers.set_random_request_id();

        assert_eq!(msg.headers.path(), Some("Users.Get"));
        assert_eq!(msg.headers.user_id(), Some(7));
        assert_eq!(msg.headers.request_id(), Some(id));
    }

    #[test]
    fn malformed_values_read_as_absent() {
        let mut headers = Headers::new();
        headers.insert(HEADER_REQUEST_ID, "not-a-uuid");
        headers.insert(HEADER_USER_ID, "-3");

        assert_eq!(headers.request_id(), None);
        assert_eq!(headers.user_id(), None);
        assert_eq!(headers.parent_request_id(), None);
    }

    #[test]
    fn nil_parent_is_not_stored() {
        let mut headers = Headers::new();
        headers.set_parent_request_id(Uuid::nil());
        assert!(!headers.contains(HEADER_PARENT_REQUEST_ID));

        let id = Uuid::new_v4();
        headers.set_parent_request_id(id);
        assert_eq!(headers.parent_request_id(), Some(id));
    }

    #[test]
    fn structured_error_survives_header() {
        let mut headers = Headers::new();
        headers.set_error(&Status::not_found_id("user.missing", "user not found"));

        let err = headers.error().unwrap();
        let status = err.status().unwrap();
        assert_eq!(status.status_code, 404);
        assert_eq!(status.id.as_deref(), Some("user.missing"));
        assert!(err.to_string().contains("user not found"));
    }

    #[test]
    fn wrapped_status_is_found_in_source_chain() {
        let mut headers = Headers::new();
        headers.set_error(&Wrapped {
            source: Status::forbidden("nope"),
        });

        assert_eq!(headers.error().unwrap().status().unwrap().status_code, 403);
    }

    #[test]
    fn plain_error_falls_back_to_text() {
        let mut headers = Headers::new();
        let err = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        headers.set_error(&err);

        assert_eq!(
            headers.error(),
            Some(RemoteError::Message("disk on fire".to_string()))
        );
    }

    #[test]
    fn no_error_header_means_success() {
        assert!(Headers::new().error().is_none());
    }

    #[test]
    fn response_echoes_request_id() {
        let mut request = Message::with_data(b"{}".to_vec());
        let id = request.headers.set_random_request_id();
        request.headers.set_path("A.B");

        let response = Message::response_to(&request);
        assert_eq!(response.headers.request_id(), Some(id));
        assert!(response.headers.path().is_none());
        assert!(response.data.is_empty());
    }

    #[test]
    fn json_form_uses_base64_payload() {
        let mut msg = Message::with_data(vec![0, 1, 2, 255]);
        msg.headers.set_path("A.B");

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["data"], "AAEC/w==");
        assert_eq!(json["headers"]["path"], "A.B");

        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);

        let empty: Message = serde_json::from_str(r#"{"headers":{},"data":null}"#).unwrap();
        assert!(empty.data.is_empty());
    }
}
