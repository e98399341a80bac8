//! Connection registry keyed by caller identity.
//!
//! Holds at most one live [`ConnectionRecord`] per identity. The duplicate
//! check and the insert happen under one write guard in
//! [`ConnectionRegistry::admit`], so two handshakes racing for the same
//! identity cannot both get in.

use crate::transport::Peer;
use callgate_core::{CallerInfo, Event, GatewayResult};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// One live, admitted connection.
pub struct ConnectionRecord {
    /// Caller identity (registry key).
    pub identity: String,
    /// Client or calling service address.
    pub remote_host: String,
    /// Caller service name.
    pub caller_name: String,
    /// When the connection was admitted.
    pub connected_at: Instant,
    connected: AtomicBool,
    peer: Arc<dyn Peer>,
}

impl ConnectionRecord {
    pub fn new(caller: CallerInfo, peer: Arc<dyn Peer>) -> Self {
        Self {
            identity: caller.identity,
            remote_host: caller.remote_host,
            caller_name: caller.caller_name,
            connected_at: Instant::now(),
            connected: AtomicBool::new(true),
            peer,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub(crate) fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
    }

    /// Transport connection id of the underlying peer.
    pub fn connection_id(&self) -> &str {
        self.peer.id()
    }

    pub fn peer(&self) -> &Arc<dyn Peer> {
        &self.peer
    }

    /// Send a notice to this connection's peer.
    pub fn send(&self, event: Event) -> GatewayResult<()> {
        self.peer.send(event)
    }

    /// Send an application text frame to this connection's peer.
    pub fn send_text(&self, text: &str) -> GatewayResult<()> {
        self.peer.send_text(text)
    }

    /// Close this connection's transport.
    pub fn disconnect(&self, force: bool) {
        self.peer.disconnect(force);
    }
}

impl fmt::Debug for ConnectionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRecord")
            .field("identity", &self.identity)
            .field("remote_host", &self.remote_host)
            .field("caller_name", &self.caller_name)
            .field("connected", &self.is_connected())
            .field("connection_id", &self.peer.id())
            .finish()
    }
}

/// Outcome of an admission attempt.
#[derive(Debug)]
pub enum Admission {
    /// The record was stored.
    Admitted(Arc<ConnectionRecord>),
    /// The identity is already held; the stored record is left untouched.
    Rejected { existing: Arc<ConnectionRecord> },
}

/// Registry of live connections by caller identity.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Arc<ConnectionRecord>>>,
}

impl ConnectionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `record` unless its identity is already present.
    pub async fn admit(&self, record: Arc<ConnectionRecord>) -> Admission {
        let mut connections = self.connections.write().await;
        if let Some(existing) = connections.get(&record.identity) {
            debug!(identity = %record.identity, "identity already registered");
            return Admission::Rejected {
                existing: Arc::clone(existing),
            };
        }
        connections.insert(record.identity.clone(), Arc::clone(&record));
        info!(
            identity = %record.identity,
            caller = %record.caller_name,
            total = connections.len(),
            "connection registered"
        );
        Admission::Admitted(record)
    }

    /// Remove an identity. Returns the record that was stored, if any.
    pub async fn remove(&self, identity: &str) -> Option<Arc<ConnectionRecord>> {
        let removed = self.connections.write().await.remove(identity);
        if removed.is_some() {
            debug!(identity, "connection unregistered");
        }
        removed
    }

    pub async fn get(&self, identity: &str) -> Option<Arc<ConnectionRecord>> {
        self.connections.read().await.get(identity).cloned()
    }

    pub async fn contains(&self, identity: &str) -> bool {
        self.connections.read().await.contains_key(identity)
    }

    /// List all registered identities.
    pub async fn identities(&self) -> Vec<String> {
        self.connections.read().await.keys().cloned().collect()
    }

    /// Number of registered connections.
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::transport::tests::RecordingPeer;

    pub(crate) fn record(identity: &str, conn_id: &str) -> Arc<ConnectionRecord> {
        let caller = CallerInfo {
            identity: identity.to_string(),
            remote_host: "127.0.0.1".to_string(),
            caller_name: "anonymous".to_string(),
        };
        Arc::new(ConnectionRecord::new(caller, RecordingPeer::new(conn_id)))
    }

    #[tokio::test]
    async fn distinct_identities_all_admitted() {
        let registry = ConnectionRegistry::new();
        for i in 0..25 {
            let rec = record(&format!("svc-{i}"), &format!("conn-{i}"));
            assert!(matches!(registry.admit(rec).await, Admission::Admitted(_)));
        }
        assert_eq!(registry.len().await, 25);
    }

    #[tokio::test]
    async fn duplicate_leaves_original_untouched() {
        let registry = ConnectionRegistry::new();
        let first = record("svc-a", "conn-1");
        registry.admit(Arc::clone(&first)).await;

        let second = record("svc-a", "conn-2");
        match registry.admit(second).await {
            Admission::Rejected { existing } => assert!(Arc::ptr_eq(&existing, &first)),
            Admission::Admitted(_) => panic!("duplicate identity admitted"),
        }

        let stored = registry.get("svc-a").await.unwrap();
        assert!(Arc::ptr_eq(&stored, &first));
        assert!(stored.is_connected());
        assert_eq!(stored.connection_id(), "conn-1");
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn remove_then_readmit() {
        let registry = ConnectionRegistry::new();
        registry.admit(record("svc-a", "conn-1")).await;
        assert!(registry.remove("svc-a").await.is_some());
        assert!(!registry.contains("svc-a").await);
        assert!(registry.remove("svc-a").await.is_none());

        let again = record("svc-a", "conn-2");
        assert!(matches!(registry.admit(again).await, Admission::Admitted(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_admissions_for_one_identity() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                let rec = record("contended", &format!("conn-{i}"));
                matches!(registry.admit(rec).await, Admission::Admitted(_))
            }));
        }
        let mut admitted = 0;
        for h in handles {
            if h.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
        assert_eq!(registry.len().await, 1);
    }
}
