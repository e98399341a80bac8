//! Transport server: the accept loop attached to a listener.
//!
//! Owns the shutdown broadcast and the transport's own peer table (every
//! WebSocket that finished its handshake, admitted or not). Closing the
//! server stops accepting and waits for every connection task to finish.

use super::options::TransportOptions;
use super::websocket::{self, WsPeer};
use super::Peer;
use crate::handler::ConnectionHandler;
use crate::listener::Listener;
use crate::registry::ConnectionRegistry;
use callgate_core::{GatewayError, GatewayResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Pause after a failed accept so a persistent error does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Live WebSocket peers keyed by transport connection id.
#[derive(Default)]
pub(crate) struct PeerTable {
    peers: RwLock<HashMap<String, Arc<WsPeer>>>,
}

impl PeerTable {
    pub(crate) async fn insert(&self, peer: Arc<WsPeer>) {
        let id = peer.id().to_string();
        self.peers.write().await.insert(id, peer);
    }

    pub(crate) async fn remove(&self, connection_id: &str) {
        if self.peers.write().await.remove(connection_id).is_some() {
            debug!(connection_id, "transport peer released");
        }
    }

    pub(crate) async fn len(&self) -> usize {
        self.peers.read().await.len()
    }
}

/// Everything a connection task needs.
pub(crate) struct TransportContext {
    pub(crate) options: TransportOptions,
    pub(crate) registry: Arc<ConnectionRegistry>,
    pub(crate) handler: Arc<dyn ConnectionHandler>,
    pub(crate) listener: Arc<dyn Listener>,
    pub(crate) process_name: String,
    pub(crate) peers: PeerTable,
}

/// A running WebSocket transport attached to a listener.
pub struct TransportServer {
    ctx: Arc<TransportContext>,
    shutdown_tx: broadcast::Sender<()>,
    accept_task: Option<JoinHandle<()>>,
}

impl TransportServer {
    /// Start accepting connections from `listener`.
    pub fn attach(
        listener: Arc<dyn Listener>,
        options: TransportOptions,
        registry: Arc<ConnectionRegistry>,
        handler: Arc<dyn ConnectionHandler>,
        process_name: String,
    ) -> Self {
        let ctx = Arc::new(TransportContext {
            options,
            registry,
            handler,
            listener,
            process_name,
            peers: PeerTable::default(),
        });
        let (shutdown_tx, _) = broadcast::channel(1);

        // Subscribe before spawning so a close() that runs before the loop is
        // first polled still reaches it.
        let shutdown_rx = shutdown_tx.subscribe();
        let accept_task = tokio::spawn(accept_loop(
            Arc::clone(&ctx),
            shutdown_tx.clone(),
            shutdown_rx,
        ));

        info!(path = %ctx.options.path, cors = ?ctx.options.cors, "transport server attached");

        Self {
            ctx,
            shutdown_tx,
            accept_task: Some(accept_task),
        }
    }

    pub fn options(&self) -> &TransportOptions {
        &self.ctx.options
    }

    /// Number of WebSocket peers the transport is currently tracking.
    pub async fn connection_count(&self) -> usize {
        self.ctx.peers.len().await
    }

    pub fn is_running(&self) -> bool {
        self.accept_task.is_some()
    }

    /// Stop accepting, disconnect every peer and wait for their tasks.
    pub async fn close(&mut self) -> GatewayResult<()> {
        let Some(task) = self.accept_task.take() else {
            return Ok(());
        };
        let _ = self.shutdown_tx.send(());
        task.await
            .map_err(|e| GatewayError::TransportClose(e.to_string()))?;
        info!("transport server closed");
        Ok(())
    }
}

impl Drop for TransportServer {
    fn drop(&mut self) {
        if self.accept_task.take().is_some() {
            let _ = self.shutdown_tx.send(());
        }
    }
}

async fn accept_loop(
    ctx: Arc<TransportContext>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut connections = JoinSet::new();

    loop {
        // Taken before accepting so a shutdown sent while accept() is pending
        // is already queued for the connection it yields.
        let conn_shutdown = shutdown_tx.subscribe();

        tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            accepted = ctx.listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    debug!(remote = %remote, "TCP connection accepted");
                    let conn_ctx = Arc::clone(&ctx);
                    connections.spawn(websocket::handle_stream(stream, remote, conn_ctx, conn_shutdown));
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            Some(done) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = done {
                    error!(error = %e, "connection task failed");
                }
            }
        }
    }

    debug!(remaining = connections.len(), "draining connection tasks");
    while let Some(done) = connections.join_next().await {
        if let Err(e) = done {
            error!(error = %e, "connection task failed");
        }
    }
}
