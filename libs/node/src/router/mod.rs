//! Path-based dispatch to registered handlers.
//!
//! A path is `Handler.Method`. Each handler's endpoint table is built once at
//! registration; dispatch is two map lookups and a boxed call.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::Instrument;

mod endpoint;

pub use endpoint::{decode_input, encode_output, Endpoint, EndpointError, EndpointFuture, Handler};
pub use switchboard_fabric::codec::Codec;
pub use switchboard_fabric::{CallContext, Message};

use crate::error::{HandlerError, RouteError};

type Dispatch<C> = Arc<dyn Fn(CallContext, Arc<Message>, C) -> EndpointFuture + Send + Sync>;

struct Registered<C> {
    endpoints: HashMap<String, Dispatch<C>>,
}

/// Registry of handlers and their endpoints
pub struct Router<C> {
    handlers: HashMap<String, Registered<C>>,
    codec: C,
}

impl<C: Codec> Router<C> {
    pub fn new(codec: C) -> Self {
        Self {
            handlers: HashMap::new(),
            codec,
        }
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Register `handler` under `name`, or under [`Handler::NAME`] when
    /// `name` is empty
    ///
    /// A non-empty `methods` list restricts which endpoints are exposed.
    /// Registering a name twice replaces the earlier handler.
    pub fn add_handler<H: Handler>(&mut self, handler: H, name: &str, methods: &[&str]) {
        self.add_shared_handler(Arc::new(handler), name, methods);
    }

    /// Like [`Router::add_handler`], for a handler that is also used elsewhere
    pub fn add_shared_handler<H: Handler>(&mut self, handler: Arc<H>, name: &str, methods: &[&str]) {
        let name = if name.is_empty() { H::NAME } else { name };

        let endpoints: HashMap<String, Dispatch<C>> = H::endpoints::<C>()
            .into_iter()
            .filter(|endpoint| methods.is_empty() || methods.contains(&endpoint.name()))
            .map(|endpoint| {
                let handler = Arc::clone(&handler);
                let endpoint_name = endpoint.name().to_string();
                let dispatch: Dispatch<C> =
                    Arc::new(move |ctx: CallContext, request: Arc<Message>, codec: C| {
                        endpoint.call(Arc::clone(&handler), ctx, request, codec)
                    });
                (endpoint_name, dispatch)
            })
            .collect();

        for method in methods {
            if !endpoints.contains_key(*method) {
                tracing::warn!(handler = name, method, "allowlisted method is not an endpoint");
            }
        }

        tracing::debug!(handler = name, endpoints = endpoints.len(), "registered handler");

        if self
            .handlers
            .insert(name.to_string(), Registered { endpoints })
            .is_some()
        {
            tracing::warn!(handler = name, "replaced a previously registered handler");
        }
    }

    pub fn handler_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Sorted endpoint names of a registered handler
    pub fn endpoint_names(&self, handler: &str) -> Option<Vec<&str>> {
        self.handlers.get(handler).map(|registered| {
            let mut names: Vec<&str> = registered.endpoints.keys().map(String::as_str).collect();
            names.sort_unstable();
            names
        })
    }

    /// Dispatch `request` to the endpoint named by `path`
    ///
    /// The handler runs in a context derived from the request's headers.
    pub async fn handle(&self, path: &str, request: Arc<Message>) -> Result<Vec<u8>, RouteError> {
        let ctx = CallContext::incoming(Arc::clone(&request));
        self.dispatch(ctx, path, request).await
    }

    /// Like [`Router::handle`], with a caller-built context
    pub async fn dispatch(
        &self,
        ctx: CallContext,
        path: &str,
        request: Arc<Message>,
    ) -> Result<Vec<u8>, RouteError> {
        let (handler, method) =
            split_path(path).ok_or_else(|| RouteError::MalformedPath(path.to_string()))?;

        let endpoint = self
            .handlers
            .get(handler)
            .and_then(|registered| registered.endpoints.get(method))
            .ok_or_else(|| RouteError::EndpointNotFound(path.to_string()))?;

        let span = tracing::info_span!("rpc.server", path);
        endpoint(ctx, request, self.codec.clone())
            .instrument(span)
            .await
            .map_err(|err| match err {
                EndpointError::Decode(source) => RouteError::Decode {
                    path: path.to_string(),
                    source,
                },
                EndpointError::Encode(source) => RouteError::Encode {
                    path: path.to_string(),
                    source,
                },
                EndpointError::Handler(source) => HandlerError {
                    handler: handler.to_string(),
                    endpoint: method.to_string(),
                    source,
                }
                .into(),
            })
    }
}

/// Split `Handler.Method`; exactly one delimiter and no empty parts
fn split_path(path: &str) -> Option<(&str, &str)> {
    let (handler, method) = path.split_once('.')?;
    if handler.is_empty() || method.is_empty() || method.contains('.') {
        return None;
    }
    Some((handler, method))
}
