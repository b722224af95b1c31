use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::carrier;
use crate::error::{Error, Result};
use crate::message::Message;

/// Explicit context passed along every call path
///
/// Carries cancellation, the id of the request being handled (propagated as
/// the parent of any outbound call), the caller's user identity and the
/// distributed tracing context. Server-side contexts also hold the inbound
/// request so handlers can inspect its headers.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancellation: CancellationToken,
    parent_request: Option<Uuid>,
    user_id: Option<u32>,
    trace: opentelemetry::Context,
    request: Option<Arc<Message>>,
}

impl CallContext {
    /// A context that is never cancelled and carries no identity
    pub fn background() -> Self {
        Self::default()
    }

    /// Build the context a handler runs in for an inbound request
    pub fn incoming(request: Arc<Message>) -> Self {
        Self {
            cancellation: CancellationToken::new(),
            parent_request: request.headers.request_id(),
            user_id: request.headers.user_id(),
            trace: carrier::extract(&request),
            request: Some(request),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_parent_request(mut self, id: Uuid) -> Self {
        self.parent_request = Some(id);
        self
    }

    pub fn with_user_id(mut self, id: u32) -> Self {
        self.user_id = Some(id);
        self
    }

    pub fn with_trace(mut self, trace: opentelemetry::Context) -> Self {
        self.trace = trace;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Id of the request this context is handling, if any
    pub fn parent_request(&self) -> Option<Uuid> {
        self.parent_request
    }

    pub fn user_id(&self) -> Option<u32> {
        self.user_id
    }

    /// True when a non-zero user id is present
    pub fn is_authed(&self) -> bool {
        self.user_id.is_some_and(|id| id > 0)
    }

    pub fn trace(&self) -> &opentelemetry::Context {
        &self.trace
    }

    /// The inbound request, for contexts created by the server
    pub fn request(&self) -> Option<&Message> {
        self.request.as_deref()
    }

    /// Drive `op` to completion unless this context is cancelled first
    pub async fn run<T, F>(&self, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(Error::Cancelled),
            result = op => result,
        }
    }
}
