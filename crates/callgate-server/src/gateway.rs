//! Gateway lifecycle: owns the listener, the transport server and the
//! connection registry.
//!
//! `serve()` always stops the previous session first, then adopts the
//! listener it was given or creates its own, binds it if needed, reads the
//! bound port back into the config and attaches a fresh transport server.
//! `stop()` closes the transport first and the listener only if the gateway
//! created it.

use crate::handler::{ConnectionHandler, NoopHandler};
use crate::listener::{FallbackResponse, Listener, TcpHttpListener};
use crate::registry::ConnectionRegistry;
use crate::transport::{TransportOptions, TransportServer};
use callgate_core::{
    GatewayConfig, GatewayConfigInput, GatewayError, GatewayResult, ProcessDefaults,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

/// Body served for plain HTTP requests on a self-owned listener.
pub const NO_GATEWAY_BODY: &str = "No HTTP Gateway";

/// Host a self-owned listener binds on unless told otherwise.
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

pub struct Gateway {
    config: GatewayConfig,
    /// Process identity advertised in the connected notice.
    process_name: String,
    bind_host: String,
    listener: Option<Arc<dyn Listener>>,
    /// Whether `listener` was created by this gateway.
    self_owned: bool,
    transport: Option<TransportServer>,
    registry: Arc<ConnectionRegistry>,
    handler: Arc<dyn ConnectionHandler>,
}

impl Gateway {
    pub fn new(config: GatewayConfig, process_name: impl Into<String>) -> Self {
        Self {
            config,
            process_name: process_name.into(),
            bind_host: DEFAULT_BIND_HOST.to_string(),
            listener: None,
            self_owned: false,
            transport: None,
            registry: Arc::new(ConnectionRegistry::new()),
            handler: Arc::new(NoopHandler),
        }
    }

    /// Build a gateway from caller input and the process defaults.
    pub fn from_input(input: &GatewayConfigInput, defaults: &ProcessDefaults) -> Self {
        Self::new(input.resolve(defaults), defaults.name.clone())
    }

    /// Share an externally owned listener. The gateway never closes it.
    pub fn with_listener(mut self, listener: Arc<dyn Listener>) -> Self {
        self.listener = Some(listener);
        self.self_owned = false;
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn ConnectionHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Host a self-owned listener binds on.
    pub fn with_bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = host.into();
        self
    }

    /// Re-apply caller input. Takes effect on the next `serve()`.
    pub fn set_config(&mut self, input: &GatewayConfigInput, defaults: &ProcessDefaults) {
        self.config.apply(input, defaults);
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn listener(&self) -> Option<&Arc<dyn Listener>> {
        self.listener.as_ref()
    }

    pub fn is_self_owned(&self) -> bool {
        self.self_owned
    }

    pub fn is_serving(&self) -> bool {
        self.transport.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr())
    }

    /// WebSocket peers the transport is tracking, admitted or not.
    pub async fn connection_count(&self) -> usize {
        match &self.transport {
            Some(transport) => transport.connection_count().await,
            None => 0,
        }
    }

    /// Start (or restart) serving.
    pub async fn serve(&mut self) -> GatewayResult<()> {
        self.stop().await?;

        let port = self.config.port;
        let listener = match &self.listener {
            Some(existing) => {
                self.self_owned = false;
                Arc::clone(existing)
            }
            None => {
                let created: Arc<dyn Listener> = Arc::new(
                    TcpHttpListener::new(self.bind_host.clone())
                        .with_fallback(FallbackResponse::ok(NO_GATEWAY_BODY)),
                );
                self.listener = Some(Arc::clone(&created));
                self.self_owned = true;
                created
            }
        };

        if !listener.is_listening() {
            listener
                .listen(port)
                .await
                .map_err(|source| GatewayError::Bind { port, source })?;
        }

        let addr = listener.local_addr().ok_or(GatewayError::BindAddress)?;
        self.config.port = addr.port();

        let options = TransportOptions::from_config(&self.config);
        self.transport = Some(TransportServer::attach(
            listener,
            options,
            Arc::clone(&self.registry),
            Arc::clone(&self.handler),
            self.process_name.clone(),
        ));

        info!(
            addr = %addr,
            path = %self.config.path,
            self_owned = self.self_owned,
            name = %self.process_name,
            "gateway serving"
        );
        Ok(())
    }

    /// Stop serving. A no-op when nothing is running.
    pub async fn stop(&mut self) -> GatewayResult<()> {
        if let Some(mut transport) = self.transport.take() {
            transport.close().await?;
        }

        if self.self_owned {
            // Keep the handle until close succeeds so a failed stop can be retried.
            if let Some(listener) = &self.listener {
                if listener.is_listening() {
                    listener.close().await.map_err(GatewayError::ListenerClose)?;
                }
                debug!("self-owned listener closed");
            }
            self.listener = None;
            self.self_owned = false;
        }

        Ok(())
    }
}
