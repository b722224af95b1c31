//! Accept loop turning connections into concurrent request streams.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use switchboard_fabric::codec::Codec;
use switchboard_fabric::transport::{Listener, Socket, SocketHandler, Transport};
use switchboard_fabric::{CallContext, Error as FabricError, Message};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::broker::Broker;
use crate::error::ServerError;
use crate::router::{Handler, Router};

/// Default bound on requests handled at once across all connections
pub const DEFAULT_MAX_IN_FLIGHT: usize = 1024;

/// RPC server: a router bound to a transport address
pub struct Server<C> {
    router: Arc<Router<C>>,
    transport: Arc<dyn Transport>,
    broker: Option<Arc<dyn Broker>>,
    address: String,
    limiter: Arc<Semaphore>,
    shutdown: CancellationToken,
    serving: AtomicBool,
    stopped: AtomicBool,
}

impl<C: Codec> Server<C> {
    pub fn new(transport: impl Transport + 'static, codec: C, address: impl Into<String>) -> Self {
        Self::with_transport(Arc::new(transport), codec, address)
    }

    pub fn with_transport(
        transport: Arc<dyn Transport>,
        codec: C,
        address: impl Into<String>,
    ) -> Self {
        Self {
            router: Arc::new(Router::new(codec)),
            transport,
            broker: None,
            address: address.into(),
            limiter: Arc::new(Semaphore::new(DEFAULT_MAX_IN_FLIGHT)),
            shutdown: CancellationToken::new(),
            serving: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn with_broker(mut self, broker: Arc<dyn Broker>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.limiter = Arc::new(Semaphore::new(max.max(1)));
        self
    }

    /// Register a handler; see [`Router::add_handler`]
    pub fn add_handler<H: Handler>(
        &mut self,
        handler: H,
        name: &str,
        methods: &[&str],
    ) -> Result<(), ServerError> {
        self.add_shared_handler(Arc::new(handler), name, methods)
    }

    pub fn add_shared_handler<H: Handler>(
        &mut self,
        handler: Arc<H>,
        name: &str,
        methods: &[&str],
    ) -> Result<(), ServerError> {
        if self.serving.load(Ordering::Acquire) {
            return Err(ServerError::AlreadyServing);
        }

        Arc::get_mut(&mut self.router)
            .ok_or(ServerError::AlreadyServing)?
            .add_shared_handler(handler, name, methods);
        Ok(())
    }

    pub fn router(&self) -> &Router<C> {
        &self.router
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Open the listener on the configured address
    pub async fn listen(&self) -> Result<Box<dyn Listener>, ServerError> {
        let ctx = CallContext::background().with_cancellation(self.shutdown.clone());
        self.transport
            .listen(&ctx, &self.address)
            .await
            .map_err(|source| ServerError::Listen {
                address: self.address.clone(),
                source,
            })
    }

    /// Accept connections on `listener` until [`Server::shutdown`] is called
    ///
    /// A server serves once; after it has stopped, `serve` and `start` return
    /// [`ServerError::ShutDown`].
    pub async fn serve(&self, mut listener: Box<dyn Listener>) -> Result<(), ServerError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(ServerError::ShutDown);
        }
        self.serving.store(true, Ordering::Release);

        let local = listener.local_addr().unwrap_or_else(|_| self.address.clone());
        tracing::info!(address = %local, "serving rpc");

        let router = Arc::clone(&self.router);
        let limiter = Arc::clone(&self.limiter);
        let shutdown = self.shutdown.clone();
        let connections = TaskTracker::new();

        let tracker = connections.clone();
        let handler: SocketHandler = Arc::new(move |socket: Box<dyn Socket>| {
            tracker.spawn(serve_connection(
                Arc::from(socket),
                Arc::clone(&router),
                Arc::clone(&limiter),
                shutdown.child_token(),
            ));
        });

        let ctx = CallContext::background().with_cancellation(self.shutdown.clone());
        let result = listener.accept(&ctx, handler).await;

        if let Err(e) = listener.close().await {
            tracing::warn!(error = %e, "failed to close listener");
        }

        connections.close();
        connections.wait().await;
        self.stopped.store(true, Ordering::Release);
        tracing::info!(address = %local, "stopped serving rpc");

        result.map_err(ServerError::Accept)
    }

    /// Listen and serve; blocks until shutdown
    pub async fn start(&self) -> Result<(), ServerError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(ServerError::ShutDown);
        }
        let listener = self.listen().await?;
        self.serve(listener).await
    }

    /// Stop accepting, let in-flight requests finish, then return from `serve`
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Encode `value` and publish it on `topic`
    pub async fn publish<T: Serialize + Sync>(
        &self,
        ctx: &CallContext,
        topic: &str,
        value: &T,
    ) -> Result<(), ServerError> {
        let broker = self.broker.as_ref().ok_or(ServerError::NoBroker)?;
        if ctx.is_cancelled() {
            return Err(ServerError::Cancelled);
        }

        let data = self.router.codec().encode(value).map_err(ServerError::Encode)?;
        broker.publish(topic, data).await?;
        Ok(())
    }
}

/// Read requests off one connection until it ends
///
/// Each request is handled on its own task so a slow handler never blocks
/// the next read. In-flight requests are drained before the socket closes.
async fn serve_connection<C: Codec>(
    socket: Arc<dyn Socket>,
    router: Arc<Router<C>>,
    limiter: Arc<Semaphore>,
    shutdown: CancellationToken,
) {
    let ctx = CallContext::background().with_cancellation(shutdown.clone());
    let requests = TaskTracker::new();

    loop {
        let request = match socket.receive(&ctx).await {
            Ok(request) => request,
            Err(e) if e.is_end_of_stream() => {
                tracing::debug!("connection closed by peer");
                break;
            }
            Err(FabricError::Cancelled) => {
                tracing::debug!("server shutting down, closing connection");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to receive request");
                break;
            }
        };

        let permit = tokio::select! {
            _ = shutdown.cancelled() => break,
            permit = Arc::clone(&limiter).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let socket = Arc::clone(&socket);
        let router = Arc::clone(&router);
        let cancellation = shutdown.child_token();
        requests.spawn(async move {
            handle_request(socket.as_ref(), &router, request, cancellation).await;
            drop(permit);
        });
    }

    requests.close();
    requests.wait().await;

    if let Err(e) = socket.close().await {
        tracing::debug!(error = %e, "failed to close connection");
    }
}

async fn handle_request<C: Codec>(
    socket: &dyn Socket,
    router: &Router<C>,
    request: Message,
    cancellation: CancellationToken,
) {
    let request = Arc::new(request);
    let mut response = Message::response_to(&request);

    let path = match request.headers.path() {
        Some(path) => path.to_string(),
        None => {
            tracing::warn!("request without a path header");
            String::new()
        }
    };

    let ctx = CallContext::incoming(Arc::clone(&request)).with_cancellation(cancellation);
    match router.dispatch(ctx, &path, Arc::clone(&request)).await {
        Ok(data) => response.data = data,
        Err(e) => {
            tracing::debug!(path = %path, error = %e, "request failed");
            response.headers.set_error(&e);
        }
    }

    if let Err(e) = socket.send(&CallContext::background(), &response).await {
        tracing::warn!(path = %path, error = %e, "failed to send response");
    }
}
