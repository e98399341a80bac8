//! Per-connection lifecycle: Pending → Admitted → Disconnected.
//!
//! A [`Session`] is created when a handshake completes. [`Session::admit`]
//! runs identity extraction and the atomic registry admission;
//! [`Session::disconnect`] runs on the transport's disconnect signal and
//! removes the record again. Disconnected is terminal.

use crate::handler::{guarded, ConnectionHandler};
use crate::registry::{Admission, ConnectionRecord, ConnectionRegistry};
use crate::transport::Peer;
use callgate_core::{DisconnectReason, Event, GatewayError, GatewayResult, HandshakeInfo};
use std::sync::Arc;
use tracing::{info, warn};

/// Lifecycle state of one connection.
#[derive(Debug, Clone)]
pub enum SessionState {
    /// Handshake received, identity not yet evaluated.
    Pending,
    /// Identity accepted and record stored.
    Admitted(Arc<ConnectionRecord>),
    /// Terminal.
    Disconnected,
}

pub struct Session {
    peer: Arc<dyn Peer>,
    handshake: HandshakeInfo,
    state: SessionState,
}

impl Session {
    pub fn new(peer: Arc<dyn Peer>, handshake: HandshakeInfo) -> Self {
        Self {
            peer,
            handshake,
            state: SessionState::Pending,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// The admitted record, if the session is in the Admitted state.
    pub fn record(&self) -> Option<&Arc<ConnectionRecord>> {
        match &self.state {
            SessionState::Admitted(record) => Some(record),
            _ => None,
        }
    }

    pub fn is_admitted(&self) -> bool {
        matches!(self.state, SessionState::Admitted(_))
    }

    /// Evaluate the handshake and try to admit it into `registry`.
    ///
    /// On a duplicate identity the peer gets an error notice and is
    /// force-disconnected; the record already stored stays untouched. A
    /// failure after insertion removes the record again without calling the
    /// host's disconnect hook.
    pub async fn admit(
        &mut self,
        registry: &ConnectionRegistry,
        handler: &dyn ConnectionHandler,
        process_name: &str,
    ) -> GatewayResult<Arc<ConnectionRecord>> {
        if !matches!(self.state, SessionState::Pending) {
            return Err(GatewayError::InvalidState(format!(
                "admit called on {} session",
                self.state_name()
            )));
        }

        let caller = self.handshake.extract();
        let record = Arc::new(ConnectionRecord::new(caller, Arc::clone(&self.peer)));

        let record = match registry.admit(record).await {
            Admission::Admitted(record) => record,
            Admission::Rejected { existing } => {
                let err = GatewayError::DuplicateConnection(existing.identity.clone());
                warn!(
                    identity = %existing.identity,
                    connection_id = %self.peer.id(),
                    holder = %existing.connection_id(),
                    "duplicate connection rejected"
                );
                self.reject(&err);
                return Err(err);
            }
        };

        self.state = SessionState::Admitted(Arc::clone(&record));
        info!(
            identity = %record.identity,
            caller = %record.caller_name,
            remote = %record.remote_host,
            connection_id = %record.connection_id(),
            "connection admitted"
        );

        if let Err(e) = record.send(Event::connected(process_name)) {
            warn!(identity = %record.identity, error = %e, "failed to send connected notice");
            self.release(registry, DisconnectReason::TransportError).await;
            self.peer.disconnect(true);
            return Err(e);
        }

        let identity = record.identity.clone();
        if !guarded("on_connection", &identity, || handler.on_connection(&record)) {
            let err = GatewayError::Transport("connection handler failed".into());
            if let Err(e) = self.peer.send(Event::error(err.to_string())) {
                warn!(identity = %identity, error = %e, "failed to send error notice");
            }
            self.release(registry, DisconnectReason::ServerDisconnect).await;
            self.peer.disconnect(true);
            return Err(err);
        }

        Ok(record)
    }

    /// Handle the transport's disconnect signal.
    ///
    /// Returns the record that was released, if the session had been admitted.
    pub async fn disconnect(
        &mut self,
        registry: &ConnectionRegistry,
        handler: &dyn ConnectionHandler,
        reason: DisconnectReason,
    ) -> Option<Arc<ConnectionRecord>> {
        let record = self.release(registry, reason).await?;
        guarded("on_disconnect", &record.identity, || {
            handler.on_disconnect(&record, reason)
        });
        Some(record)
    }

    /// Move to Disconnected and drop the record from the registry.
    async fn release(
        &mut self,
        registry: &ConnectionRegistry,
        reason: DisconnectReason,
    ) -> Option<Arc<ConnectionRecord>> {
        let previous = std::mem::replace(&mut self.state, SessionState::Disconnected);
        let SessionState::Admitted(record) = previous else {
            return None;
        };

        record.mark_disconnected();
        registry.remove(&record.identity).await;
        info!(
            identity = %record.identity,
            connection_id = %record.connection_id(),
            reason = %reason,
            "connection closed"
        );
        Some(record)
    }

    /// Notify and drop a peer that was refused admission.
    fn reject(&mut self, err: &GatewayError) {
        self.state = SessionState::Disconnected;
        if let Err(e) = self.peer.send(Event::error(err.to_string())) {
            warn!(connection_id = %self.peer.id(), error = %e, "failed to send error notice");
        }
        self.peer.disconnect(true);
    }

    fn state_name(&self) -> &'static str {
        match self.state {
            SessionState::Pending => "pending",
            SessionState::Admitted(_) => "admitted",
            SessionState::Disconnected => "disconnected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::NoopHandler;
    use crate::transport::tests::RecordingPeer;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHandler {
        connected: Mutex<Vec<String>>,
        disconnected: Mutex<Vec<(String, DisconnectReason)>>,
        panic_on_connect: bool,
    }

    impl ConnectionHandler for RecordingHandler {
        fn on_connection(&self, record: &Arc<ConnectionRecord>) {
            if self.panic_on_connect {
                panic!("host bug");
            }
            self.connected.lock().unwrap().push(record.identity.clone());
        }

        fn on_disconnect(&self, record: &Arc<ConnectionRecord>, reason: DisconnectReason) {
            self.disconnected
                .lock()
                .unwrap()
                .push((record.identity.clone(), reason));
        }
    }

    fn handshake(conn_id: &str) -> HandshakeInfo {
        HandshakeInfo::new(conn_id, "127.0.0.1")
    }

    #[tokio::test]
    async fn admits_caller_and_sends_connected() {
        let registry = ConnectionRegistry::new();
        let handler = RecordingHandler::default();
        let peer = RecordingPeer::new("conn-1");
        let hs = handshake("conn-1")
            .with_header("x-caller-id", "svc-a")
            .with_header("x-caller", "billing");

        let mut session = Session::new(peer.clone(), hs);
        let record = session.admit(&registry, &handler, "gw").await.unwrap();

        assert_eq!(record.identity, "svc-a");
        assert_eq!(record.caller_name, "billing");
        assert!(record.is_connected());
        assert!(session.is_admitted());
        assert_eq!(peer.sent(), vec![Event::connected("gw")]);
        assert_eq!(*handler.connected.lock().unwrap(), vec!["svc-a".to_string()]);
        assert!(registry.contains("svc-a").await);

        record.send_text("{\"op\":\"ping\"}").unwrap();
        assert_eq!(peer.texts(), vec!["{\"op\":\"ping\"}".to_string()]);
    }

    #[tokio::test]
    async fn duplicate_is_rejected_and_force_closed() {
        let registry = ConnectionRegistry::new();
        let handler = RecordingHandler::default();

        let first_peer = RecordingPeer::new("conn-1");
        let mut first = Session::new(
            first_peer.clone(),
            handshake("conn-1").with_header("x-caller-id", "svc-a"),
        );
        let original = first.admit(&registry, &handler, "gw").await.unwrap();

        let dup_peer = RecordingPeer::new("conn-2");
        let mut dup = Session::new(
            dup_peer.clone(),
            handshake("conn-2").with_header("x-caller-id", "svc-a"),
        );
        let err = dup.admit(&registry, &handler, "gw").await.unwrap_err();

        assert!(matches!(err, GatewayError::DuplicateConnection(ref id) if id == "svc-a"));
        assert!(matches!(dup.state(), SessionState::Disconnected));
        assert_eq!(dup_peer.sent(), vec![Event::error("connection exists: svc-a")]);
        assert_eq!(dup_peer.disconnects(), vec![true]);

        let stored = registry.get("svc-a").await.unwrap();
        assert!(Arc::ptr_eq(&stored, &original));
        assert!(stored.is_connected());
        assert!(first_peer.disconnects().is_empty());
        assert_eq!(handler.connected.lock().unwrap().len(), 1);

        // Disconnecting the rejected session must not touch the holder.
        assert!(dup
            .disconnect(&registry, &handler, DisconnectReason::ServerDisconnect)
            .await
            .is_none());
        assert!(registry.contains("svc-a").await);
        assert!(handler.disconnected.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn anonymous_caller_keyed_by_connection_id() {
        let registry = ConnectionRegistry::new();
        let mut session = Session::new(RecordingPeer::new("conn-42"), handshake("conn-42"));
        let record = session.admit(&registry, &NoopHandler, "gw").await.unwrap();
        assert_eq!(record.identity, "conn-42");
        assert_eq!(record.caller_name, "anonymous");
    }

    #[tokio::test]
    async fn disconnect_releases_identity_for_reconnect() {
        let registry = ConnectionRegistry::new();
        let handler = RecordingHandler::default();

        let mut first = Session::new(
            RecordingPeer::new("conn-1"),
            handshake("conn-1").with_header("x-caller-id", "svc-a"),
        );
        first.admit(&registry, &handler, "gw").await.unwrap();

        let released = first
            .disconnect(&registry, &handler, DisconnectReason::ClientDisconnect)
            .await
            .unwrap();
        assert!(!released.is_connected());
        assert!(!registry.contains("svc-a").await);
        assert_eq!(
            *handler.disconnected.lock().unwrap(),
            vec![("svc-a".to_string(), DisconnectReason::ClientDisconnect)]
        );

        let mut again = Session::new(
            RecordingPeer::new("conn-2"),
            handshake("conn-2").with_header("x-caller-id", "svc-a"),
        );
        let record = again.admit(&registry, &handler, "gw").await.unwrap();
        assert!(!Arc::ptr_eq(&record, &released));
        assert_eq!(record.connection_id(), "conn-2");
    }

    #[tokio::test]
    async fn disconnect_is_terminal() {
        let registry = ConnectionRegistry::new();
        let handler = RecordingHandler::default();
        let mut session = Session::new(RecordingPeer::new("conn-1"), handshake("conn-1"));
        session.admit(&registry, &handler, "gw").await.unwrap();

        assert!(session
            .disconnect(&registry, &handler, DisconnectReason::PingTimeout)
            .await
            .is_some());
        assert!(session
            .disconnect(&registry, &handler, DisconnectReason::PingTimeout)
            .await
            .is_none());
        assert_eq!(handler.disconnected.lock().unwrap().len(), 1);

        let err = session.admit(&registry, &handler, "gw").await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidState(_)));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn failed_notice_rolls_back_admission() {
        let registry = ConnectionRegistry::new();
        let handler = RecordingHandler::default();
        let peer = RecordingPeer::new("conn-1");
        peer.fail_sends();

        let mut session = Session::new(peer.clone(), handshake("conn-1"));
        assert!(session.admit(&registry, &handler, "gw").await.is_err());
        assert!(registry.is_empty().await);
        assert!(matches!(session.state(), SessionState::Disconnected));
        assert_eq!(peer.disconnects(), vec![true]);
        assert!(handler.connected.lock().unwrap().is_empty());
        assert!(handler.disconnected.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn panicking_host_callback_is_scoped_to_connection() {
        let registry = ConnectionRegistry::new();
        let handler = RecordingHandler {
            panic_on_connect: true,
            ..Default::default()
        };
        let peer = RecordingPeer::new("conn-1");
        let mut session = Session::new(peer.clone(), handshake("conn-1"));

        assert!(session.admit(&registry, &handler, "gw").await.is_err());
        assert!(registry.is_empty().await);
        assert_eq!(peer.disconnects(), vec![true]);
        assert!(matches!(peer.sent().last(), Some(Event::Error { .. })));
    }
}
