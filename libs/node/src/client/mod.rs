//! Client call path: resolve, dial, send, receive, correlate.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use switchboard_fabric::codec::Codec;
use switchboard_fabric::transport::{Socket, Transport};
use switchboard_fabric::{carrier, CallContext, Message};
use tracing::Instrument;

pub mod options;

pub use options::{CallOption, CallOptions};

use crate::broker::{Broker, BrokerCallback, BrokerMessage};
use crate::discovery::Discovery;
use crate::error::ClientError;

/// Calls endpoints on other services
///
/// Every call resolves the service, dials a dedicated socket and closes it
/// once the response has arrived.
pub struct Client<C> {
    transport: Arc<dyn Transport>,
    discovery: Arc<dyn Discovery>,
    codec: C,
    broker: Option<Arc<dyn Broker>>,
    timeout: Option<Duration>,
}

impl<C: Clone> Clone for Client<C> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            discovery: Arc::clone(&self.discovery),
            codec: self.codec.clone(),
            broker: self.broker.clone(),
            timeout: self.timeout,
        }
    }
}

impl<C: Codec> Client<C> {
    pub fn new(
        transport: impl Transport + 'static,
        discovery: impl Discovery + 'static,
        codec: C,
    ) -> Self {
        Self::with_parts(Arc::new(transport), Arc::new(discovery), codec)
    }

    pub fn with_parts(
        transport: Arc<dyn Transport>,
        discovery: Arc<dyn Discovery>,
        codec: C,
    ) -> Self {
        Self {
            transport,
            discovery,
            codec,
            broker: None,
            timeout: None,
        }
    }

    pub fn with_broker(mut self, broker: Arc<dyn Broker>) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Default timeout for calls that do not set their own
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Call `path` (`Handler.Method`) on `service`
    ///
    /// On success `response` holds the decoded reply. A failure reported by
    /// the remote handler comes back as [`ClientError::Remote`].
    pub async fn call<Req, Resp>(
        &self,
        service: &str,
        path: &str,
        request: &Req,
        response: &mut Resp,
        options: impl IntoIterator<Item = CallOption>,
    ) -> Result<(), ClientError>
    where
        Req: Serialize + Sync,
        Resp: for<'de> Deserialize<'de> + Send,
    {
        let mut opts = CallOptions {
            context: CallContext::background(),
            timeout: self.timeout,
        };
        for option in options {
            option.apply(&mut opts);
        }

        let span = tracing::debug_span!("rpc.client", service, path);
        let exchange = self
            .exchange(&opts.context, service, path, request)
            .instrument(span);

        let reply = match opts.timeout {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .map_err(|_| ClientError::Timeout(limit))??,
            None => exchange.await?,
        };

        if let Some(err) = reply.headers.error() {
            return Err(ClientError::Remote(err));
        }

        *response = self.codec.decode(&reply.data).map_err(ClientError::Decode)?;
        Ok(())
    }

    async fn exchange<Req: Serialize + Sync>(
        &self,
        ctx: &CallContext,
        service: &str,
        path: &str,
        request: &Req,
    ) -> Result<Message, ClientError> {
        let address = self.discovery.find(service).await?;

        let socket = self
            .transport
            .dial(ctx, &address)
            .await
            .map_err(|source| ClientError::Dial {
                address: address.clone(),
                source,
            })?;

        let result = self.round_trip(ctx, socket.as_ref(), path, request).await;

        if let Err(e) = socket.close().await {
            tracing::debug!(address = %address, error = %e, "failed to close client socket");
        }
        result
    }

    async fn round_trip<Req: Serialize + Sync>(
        &self,
        ctx: &CallContext,
        socket: &dyn Socket,
        path: &str,
        request: &Req,
    ) -> Result<Message, ClientError> {
        let mut message = Message::new();
        let request_id = message.headers.set_random_request_id();
        message.headers.set_path(path);

        if let Some(parent) = ctx.parent_request() {
            message.headers.set_parent_request_id(parent);
        }
        if let Some(user_id) = ctx.user_id().filter(|_| ctx.is_authed()) {
            message.headers.set_user_id(user_id);
        }
        carrier::inject(ctx.trace(), &mut message);

        message.data = self.codec.encode(request).map_err(ClientError::Encode)?;

        socket.send(ctx, &message).await.map_err(ClientError::Send)?;

        loop {
            let reply = socket.receive(ctx).await.map_err(ClientError::Receive)?;

            match reply.headers.request_id() {
                Some(id) if id != request_id => {
                    tracing::warn!(
                        expected = %request_id,
                        received = %id,
                        "dropping response for another request"
                    );
                }
                _ => return Ok(reply),
            }
        }
    }

    /// Invoke `callback` with every message published on `topic`
    ///
    /// Payloads are decoded into `T` first; ones that fail to decode are
    /// logged and dropped.
    pub async fn subscribe<T, F>(&self, topic: &str, callback: F) -> Result<(), ClientError>
    where
        T: for<'de> Deserialize<'de> + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let broker = self.broker.as_ref().ok_or(ClientError::NoBroker)?;
        let codec = self.codec.clone();

        let callback: BrokerCallback =
            Arc::new(move |message: BrokerMessage| match codec.decode::<T>(&message.data) {
                Ok(value) => callback(value),
                Err(e) => {
                    tracing::warn!(topic = %message.topic, error = %e, "dropping undecodable message")
                }
            });

        broker.subscribe(topic, callback).await?;
        Ok(())
    }
}
