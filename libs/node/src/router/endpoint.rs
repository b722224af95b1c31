use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use switchboard_fabric::codec::Codec;
use switchboard_fabric::{CallContext, Error as FabricError, Message};

use crate::error::BoxError;

/// Future returned by an endpoint invocation: the encoded output bytes
pub type EndpointFuture = BoxFuture<'static, Result<Vec<u8>, EndpointError>>;

type Invoke<H, C> = dyn Fn(Arc<H>, CallContext, Arc<Message>, C) -> EndpointFuture + Send + Sync;

/// Why a single endpoint invocation failed
#[derive(Debug)]
pub enum EndpointError {
    Decode(FabricError),
    Encode(FabricError),
    Handler(BoxError),
}

impl EndpointError {
    pub fn handler<E: Into<BoxError>>(err: E) -> Self {
        Self::Handler(err.into())
    }
}

/// A type whose methods are exposed as endpoints
///
/// Normally implemented with the `#[handler]` attribute, which scans an
/// `impl` block once and emits one [`Endpoint`] per eligible method.
pub trait Handler: Send + Sync + 'static {
    /// Name the handler registers under when none is given
    const NAME: &'static str;

    fn endpoints<C: Codec>() -> Vec<Endpoint<Self, C>>
    where
        Self: Sized;
}

/// One invocable method: decode input, call, encode output
pub struct Endpoint<H, C> {
    name: &'static str,
    invoke: Arc<Invoke<H, C>>,
}

impl<H, C> Endpoint<H, C> {
    pub fn new<F>(name: &'static str, invoke: F) -> Self
    where
        F: Fn(Arc<H>, CallContext, Arc<Message>, C) -> EndpointFuture + Send + Sync + 'static,
    {
        Self {
            name,
            invoke: Arc::new(invoke),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn call(
        &self,
        handler: Arc<H>,
        ctx: CallContext,
        request: Arc<Message>,
        codec: C,
    ) -> EndpointFuture {
        (self.invoke)(handler, ctx, request, codec)
    }
}

impl<H, C> Clone for Endpoint<H, C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            invoke: Arc::clone(&self.invoke),
        }
    }
}

/// Decode an endpoint's input from the request payload
pub fn decode_input<T, C>(codec: &C, data: &[u8]) -> Result<T, EndpointError>
where
    T: for<'de> Deserialize<'de>,
    C: Codec,
{
    codec.decode(data).map_err(EndpointError::Decode)
}

/// Encode an endpoint's output into the response payload
pub fn encode_output<T, C>(codec: &C, output: &T) -> Result<Vec<u8>, EndpointError>
where
    T: Serialize,
    C: Codec,
{
    codec.encode(output).map_err(EndpointError::Encode)
}
