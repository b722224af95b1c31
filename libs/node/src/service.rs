//! Assembly of a server, a client and the injected capabilities.

use std::sync::Arc;

use serde::Serialize;
use switchboard_fabric::codec::Codec;
use switchboard_fabric::transport::Transport;
use switchboard_fabric::CallContext;

use crate::broker::Broker;
use crate::client::Client;
use crate::config::ServiceConfig;
use crate::discovery::{Discovery, StaticDiscovery};
use crate::error::ServiceError;
use crate::logging;
use crate::router::Handler;
use crate::server::Server;
use crate::store::ConfigStore;

/// A named service: serves its handlers and calls other services
pub struct Service<C> {
    name: String,
    config: ServiceConfig,
    server: Server<C>,
    client: Client<C>,
    broker: Option<Arc<dyn Broker>>,
    store: Option<Arc<dyn ConfigStore>>,
}

impl<C: Codec> Service<C> {
    pub fn builder(codec: C) -> ServiceBuilder<C> {
        ServiceBuilder::new(codec)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn server(&self) -> &Server<C> {
        &self.server
    }

    pub fn client(&self) -> &Client<C> {
        &self.client
    }

    pub fn add_handler<H: Handler>(
        &mut self,
        handler: H,
        name: &str,
        methods: &[&str],
    ) -> Result<(), ServiceError> {
        self.server.add_handler(handler, name, methods)?;
        Ok(())
    }

    pub fn config_store(&self) -> Result<&dyn ConfigStore, ServiceError> {
        self.store
            .as_deref()
            .ok_or(ServiceError::Missing("config store"))
    }

    /// Connect the broker, then serve until [`Service::shutdown`]
    ///
    /// Installs the fmt subscriber for the configured environment unless one
    /// is already set.
    pub async fn start(&self) -> Result<(), ServiceError> {
        logging::init(logging::default_directive(self.config.environment));

        if let Some(broker) = &self.broker {
            broker.connect().await?;
        }

        tracing::info!(
            service = %self.name,
            environment = %self.config.environment,
            "starting service"
        );
        let result = self.server.start().await;

        if let Some(broker) = &self.broker {
            if let Err(e) = broker.close().await {
                tracing::warn!(error = %e, "failed to close broker");
            }
        }

        result.map_err(ServiceError::from)
    }

    pub fn shutdown(&self) {
        self.server.shutdown();
    }

    pub async fn publish<T: Serialize + Sync>(
        &self,
        ctx: &CallContext,
        topic: &str,
        value: &T,
    ) -> Result<(), ServiceError> {
        self.server.publish(ctx, topic, value).await?;
        Ok(())
    }
}

pub struct ServiceBuilder<C> {
    codec: C,
    name: Option<String>,
    config: Option<ServiceConfig>,
    transport: Option<Arc<dyn Transport>>,
    discovery: Option<Arc<dyn Discovery>>,
    broker: Option<Arc<dyn Broker>>,
    store: Option<Arc<dyn ConfigStore>>,
}

impl<C: Codec> ServiceBuilder<C> {
    pub fn new(codec: C) -> Self {
        Self {
            codec,
            name: None,
            config: None,
            transport: None,
            discovery: None,
            broker: None,
            store: None,
        }
    }

    /// Overrides the name from the config
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn config(mut self, config: ServiceConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Defaults to a [`StaticDiscovery`] built from the config's `services`
    pub fn discovery(mut self, discovery: impl Discovery + 'static) -> Self {
        self.discovery = Some(Arc::new(discovery));
        self
    }

    pub fn broker(mut self, broker: Arc<dyn Broker>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn config_store(mut self, store: impl ConfigStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn build(self) -> Result<Service<C>, ServiceError> {
        let config = self.config.unwrap_or_default();
        let name = self
            .name
            .or_else(|| Some(config.name.clone()).filter(|name| !name.is_empty()))
            .ok_or(ServiceError::Missing("name"))?;
        let transport = self.transport.ok_or(ServiceError::Missing("transport"))?;
        let discovery = self
            .discovery
            .unwrap_or_else(|| Arc::new(StaticDiscovery::from(config.services.clone())));

        let mut server = Server::with_transport(
            Arc::clone(&transport),
            self.codec.clone(),
            config.rpc_address(),
        )
        .with_max_in_flight(config.max_in_flight);

        let mut client = Client::with_parts(transport, discovery, self.codec);
        if let Some(timeout) = config.call_timeout {
            client = client.with_timeout(timeout);
        }

        if let Some(broker) = &self.broker {
            server = server.with_broker(Arc::clone(broker));
            client = client.with_broker(Arc::clone(broker));
        }

        Ok(Service {
            name,
            config,
            server,
            client,
            broker: self.broker,
            store: self.store,
        })
    }
}
