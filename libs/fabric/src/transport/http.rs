//! One-shot HTTP binding.
//!
//! Every call is a single `POST /request` whose body is the JSON form of a
//! [`Message`] (`{"headers": {...}, "data": "<base64>"}`); the response body
//! has the same shape. Sockets on both sides carry exactly one message in
//! each direction.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE, HOST};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::transport::frame::with_timeout;
use crate::transport::{accept_backoff, Listener, Socket, SocketHandler, Transport};

/// Path every request is posted to
pub const REQUEST_PATH: &str = "/request";

type HttpResponse = Response<Full<Bytes>>;

/// HTTP transport
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    request_timeout: Option<Duration>,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound each request, from connect until the response body is read
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn dial(&self, _ctx: &CallContext, address: &str) -> Result<Box<dyn Socket>> {
        tracing::debug!(address, "dialing http");
        Ok(Box::new(HttpOutgoingSocket {
            address: address.to_string(),
            request_timeout: self.request_timeout,
            response: Mutex::new(None),
        }))
    }

    async fn listen(&self, _ctx: &CallContext, address: &str) -> Result<Box<dyn Listener>> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| Error::Custom(format!("Invalid listen address {address}: {e}")))?;
        let listener = TcpListener::bind(addr).await?;

        tracing::info!(address = %listener.local_addr()?, "listening on http");
        Ok(Box::new(HttpTransportListener { listener }))
    }
}

/// Client side of one HTTP exchange
///
/// `send` performs the whole POST and buffers the response for `receive`.
struct HttpOutgoingSocket {
    address: String,
    request_timeout: Option<Duration>,
    response: Mutex<Option<Message>>,
}

impl HttpOutgoingSocket {
    async fn post(&self, message: &Message) -> Result<Message> {
        let body = serde_json::to_vec(message).map_err(|e| Error::Codec(e.to_string()))?;

        let stream = TcpStream::connect(self.address.as_str()).await?;
        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(error = %e, "http client connection ended with error");
            }
        });

        let request = Request::builder()
            .method(Method::POST)
            .uri(REQUEST_PATH)
            .header(HOST, self.address.as_str())
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| Error::Http(e.to_string()))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| Error::Http(e.to_string()))?
            .to_bytes();

        if !status.is_success() {
            return Err(Error::Http(format!(
                "unexpected status {status}: {}",
                String::from_utf8_lossy(&bytes)
            )));
        }

        serde_json::from_slice(&bytes).map_err(|e| Error::Codec(e.to_string()))
    }
}

#[async_trait::async_trait]
impl Socket for HttpOutgoingSocket {
    async fn send(&self, ctx: &CallContext, message: &Message) -> Result<()> {
        tracing::debug!(bytes = message.data.len(), "sending http request");

        let response = ctx
            .run(with_timeout(self.request_timeout, "Request", self.post(message)))
            .await?;

        *self
            .response
            .lock()
            .map_err(|_| Error::Custom("http socket lock poisoned".to_string()))? = Some(response);
        Ok(())
    }

    async fn receive(&self, _ctx: &CallContext) -> Result<Message> {
        let response = self
            .response
            .lock()
            .map_err(|_| Error::Custom("http socket lock poisoned".to_string()))?
            .take();

        let response = response.ok_or(Error::ConnectionClosed)?;
        tracing::debug!(bytes = response.data.len(), "received http response");
        Ok(response)
    }

    async fn close(&self) -> Result<()> {
        tracing::debug!("closing outgoing http socket");
        Ok(())
    }
}

/// Server side of one HTTP exchange
struct HttpIncomingSocket {
    request: Mutex<Option<Message>>,
    responder: Mutex<Option<oneshot::Sender<Message>>>,
}

#[async_trait::async_trait]
impl Socket for HttpIncomingSocket {
    async fn send(&self, _ctx: &CallContext, message: &Message) -> Result<()> {
        let responder = self
            .responder
            .lock()
            .map_err(|_| Error::Custom("http socket lock poisoned".to_string()))?
            .take()
            .ok_or_else(|| Error::Custom("response already sent".to_string()))?;

        tracing::debug!(bytes = message.data.len(), "sending http response");
        responder
            .send(message.clone())
            .map_err(|_| Error::ConnectionClosed)
    }

    async fn receive(&self, _ctx: &CallContext) -> Result<Message> {
        self.request
            .lock()
            .map_err(|_| Error::Custom("http socket lock poisoned".to_string()))?
            .take()
            .ok_or(Error::ConnectionClosed)
    }

    async fn close(&self) -> Result<()> {
        // Dropping an unused responder tells the waiting request to give up
        self.responder
            .lock()
            .map_err(|_| Error::Custom("http socket lock poisoned".to_string()))?
            .take();
        Ok(())
    }
}

/// HTTP listener; every POST becomes one accepted socket
pub struct HttpTransportListener {
    listener: TcpListener,
}

impl HttpTransportListener {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        Ok(Self {
            listener: TcpListener::bind(addr).await?,
        })
    }
}

#[async_trait::async_trait]
impl Listener for HttpTransportListener {
    async fn accept(&mut self, ctx: &CallContext, handler: SocketHandler) -> Result<()> {
        let mut failures = 0;
        loop {
            let accepted = tokio::select! {
                _ = ctx.cancellation().cancelled() => return Ok(()),
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(accepted) => {
                    failures = 0;
                    accepted
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(error = %e, failures, "failed to accept http connection");
                    tokio::time::sleep(accept_backoff(failures)).await;
                    continue;
                }
            };

            let handler = handler.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let handler = handler.clone();
                    async move { Ok::<_, Infallible>(serve_request(handler, req).await) }
                });

                if let Err(e) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    tracing::debug!(peer = %peer, error = %e, "error serving http connection");
                }
            });
        }
    }

    fn local_addr(&self) -> Result<String> {
        Ok(self.listener.local_addr()?.to_string())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

async fn serve_request(handler: SocketHandler, req: Request<Incoming>) -> HttpResponse {
    if req.method() == Method::OPTIONS {
        return plain_response(StatusCode::NO_CONTENT, Vec::new());
    }
    if req.method() != Method::POST {
        return plain_response(StatusCode::METHOD_NOT_ALLOWED, b"POST only".to_vec());
    }
    if req.uri().path() != REQUEST_PATH {
        return plain_response(StatusCode::NOT_FOUND, Vec::new());
    }

    let body = match req.into_body().collect().await {
        Ok(body) => body.to_bytes(),
        Err(e) => {
            tracing::warn!(error = %e, "failed to read http request body");
            return plain_response(StatusCode::BAD_REQUEST, e.to_string().into_bytes());
        }
    };

    let message: Message = match serde_json::from_slice(&body) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(error = %e, "failed to parse http request message");
            return plain_response(StatusCode::BAD_REQUEST, e.to_string().into_bytes());
        }
    };

    tracing::debug!(bytes = message.data.len(), "received http request");

    let (tx, rx) = oneshot::channel();
    handler(Box::new(HttpIncomingSocket {
        request: Mutex::new(Some(message)),
        responder: Mutex::new(Some(tx)),
    }));

    match rx.await {
        Ok(response) => match serde_json::to_vec(&response) {
            Ok(body) => {
                let mut response = plain_response(StatusCode::OK, body);
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                response
            }
            Err(e) => plain_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string().into_bytes()),
        },
        Err(_) => plain_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            b"socket closed without a response".to_vec(),
        ),
    }
}

fn plain_response(status: StatusCode, body: Vec<u8>) -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    headers.insert("Access-Control-Allow-Origin", HeaderValue::from_static("*"));
    headers.insert("Access-Control-Allow-Methods", HeaderValue::from_static("POST"));
    headers.insert("Access-Control-Allow-Headers", HeaderValue::from_static("*"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn incoming_socket_is_one_shot() {
        let ctx = CallContext::background();
        let (tx, rx) = oneshot::channel();
        let socket = HttpIncomingSocket {
            request: Mutex::new(Some(Message::with_data(b"req".to_vec()))),
            responder: Mutex::new(Some(tx)),
        };

        assert_eq!(socket.receive(&ctx).await.unwrap().data, b"req");
        assert!(matches!(socket.receive(&ctx).await, Err(Error::ConnectionClosed)));

        socket.send(&ctx, &Message::with_data(b"resp".to_vec())).await.unwrap();
        match socket.send(&ctx, &Message::new()).await {
            Err(Error::Custom(msg)) => assert_eq!(msg, "response already sent"),
            other => panic!("Expected already-sent error, got {:?}", other.err()),
        }

        assert_eq!(rx.await.unwrap().data, b"resp");
    }

    #[tokio::test]
    async fn close_without_response_releases_waiter() {
        let (tx, rx) = oneshot::channel();
        let socket = HttpIncomingSocket {
            request: Mutex::new(None),
            responder: Mutex::new(Some(tx)),
        };

        socket.close().await.unwrap();
        assert!(rx.await.is_err());
    }
}
