//! In-process transport over channels.
//!
//! Addresses are arbitrary names registered by `listen`. Every clone of a
//! [`MemoryTransport`] shares the same address table, so a client and a
//! server built from clones can reach each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::transport::{Listener, Socket, SocketHandler, Transport};

type Registry = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<MemorySocket>>>>;

/// One end of an in-process connection
pub struct MemorySocket {
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Message>>,
}

impl MemorySocket {
    /// Create a connected pair of sockets
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();

        let a = Self {
            outbound: Mutex::new(Some(b_tx)),
            inbound: tokio::sync::Mutex::new(a_rx),
        };
        let b = Self {
            outbound: Mutex::new(Some(a_tx)),
            inbound: tokio::sync::Mutex::new(b_rx),
        };
        (a, b)
    }

    fn outbound(&self) -> Result<mpsc::UnboundedSender<Message>> {
        self.outbound
            .lock()
            .map_err(|_| Error::Custom("memory socket lock poisoned".to_string()))?
            .clone()
            .ok_or(Error::ConnectionClosed)
    }
}

#[async_trait::async_trait]
impl Socket for MemorySocket {
    async fn send(&self, ctx: &CallContext, message: &Message) -> Result<()> {
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }

        self.outbound()?
            .send(message.clone())
            .map_err(|_| Error::ConnectionClosed)
    }

    async fn receive(&self, ctx: &CallContext) -> Result<Message> {
        ctx.run(async {
            let mut inbound = self.inbound.lock().await;
            inbound.recv().await.ok_or(Error::ConnectionClosed)
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        self.outbound
            .lock()
            .map_err(|_| Error::Custom("memory socket lock poisoned".to_string()))?
            .take();
        Ok(())
    }
}

/// Transport whose addresses live in process memory
#[derive(Clone, Default)]
pub struct MemoryTransport {
    registry: Registry,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    async fn dial(&self, ctx: &CallContext, address: &str) -> Result<Box<dyn Socket>> {
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let acceptor = self
            .registry
            .lock()
            .map_err(|_| Error::Custom("memory registry lock poisoned".to_string()))?
            .get(address)
            .cloned()
            .ok_or_else(|| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    format!("nothing listening on {address}"),
                ))
            })?;

        let (local, remote) = MemorySocket::pair();
        acceptor
            .send(remote)
            .map_err(|_| Error::ConnectionClosed)?;

        Ok(Box::new(local))
    }

    async fn listen(&self, _ctx: &CallContext, address: &str) -> Result<Box<dyn Listener>> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut registry = self
            .registry
            .lock()
            .map_err(|_| Error::Custom("memory registry lock poisoned".to_string()))?;
        if registry.contains_key(address) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                format!("{address} is already in use"),
            )));
        }
        registry.insert(address.to_string(), tx.clone());

        Ok(Box::new(MemoryTransportListener {
            address: address.to_string(),
            incoming: rx,
            registration: Some(tx),
            registry: Arc::clone(&self.registry),
        }))
    }
}

/// Listener side of a [`MemoryTransport`] address
pub struct MemoryTransportListener {
    address: String,
    incoming: mpsc::UnboundedReceiver<MemorySocket>,
    registration: Option<mpsc::UnboundedSender<MemorySocket>>,
    registry: Registry,
}

impl MemoryTransportListener {
    /// Release the address, at most once and only while this listener owns it
    fn unregister(&mut self) {
        let Some(own) = self.registration.take() else {
            return;
        };
        if let Ok(mut registry) = self.registry.lock() {
            if registry
                .get(&self.address)
                .is_some_and(|current| current.same_channel(&own))
            {
                registry.remove(&self.address);
            }
        }
    }
}

#[async_trait::async_trait]
impl Listener for MemoryTransportListener {
    async fn accept(&mut self, ctx: &CallContext, handler: SocketHandler) -> Result<()> {
        loop {
            let socket = tokio::select! {
                _ = ctx.cancellation().cancelled() => return Ok(()),
                socket = self.incoming.recv() => socket,
            };

            match socket {
                Some(socket) => handler(Box::new(socket)),
                None => return Ok(()),
            }
        }
    }

    fn local_addr(&self) -> Result<String> {
        Ok(self.address.clone())
    }

    async fn close(&mut self) -> Result<()> {
        self.unregister();
        self.incoming.close();
        Ok(())
    }
}

impl Drop for MemoryTransportListener {
    fn drop(&mut self) {
        self.unregister();
    }
}
