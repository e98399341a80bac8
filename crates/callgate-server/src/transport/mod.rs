//! Transport layer: the WebSocket server that feeds handshakes into the
//! session state machine.
//!
//! - **[`options`]** derives fixed transport tuning from [`GatewayConfig`](callgate_core::GatewayConfig).
//! - **[`websocket`]** runs one accepted connection: HTTP sniffing, the
//!   WebSocket handshake, and the per-connection driver loop.
//! - **[`server`]** owns the accept loop and the transport's own peer table.

pub mod options;
pub mod server;
pub mod websocket;

pub use options::{CorsPolicy, TransportOptions};
pub use server::TransportServer;
pub use websocket::WsPeer;

use callgate_core::{Event, GatewayResult};

/// The transport's handle on one connection.
pub trait Peer: Send + Sync {
    /// Identifier the transport assigned to this connection.
    fn id(&self) -> &str;

    /// Queue a notice for the peer.
    fn send(&self, event: Event) -> GatewayResult<()>;

    /// Queue an application text frame for the peer.
    fn send_text(&self, text: &str) -> GatewayResult<()>;

    /// Close the connection. `force` drops it without waiting for the
    /// peer's close acknowledgement.
    fn disconnect(&self, force: bool);
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use callgate_core::GatewayError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    /// In-memory peer that records what the gateway does to it.
    #[derive(Default)]
    pub(crate) struct RecordingPeer {
        id: String,
        sent: Mutex<Vec<Event>>,
        texts: Mutex<Vec<String>>,
        disconnects: Mutex<Vec<bool>>,
        fail_sends: AtomicBool,
    }

    impl RecordingPeer {
        pub(crate) fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                ..Default::default()
            })
        }

        pub(crate) fn fail_sends(&self) {
            self.fail_sends.store(true, Ordering::SeqCst);
        }

        pub(crate) fn sent(&self) -> Vec<Event> {
            self.sent.lock().unwrap().clone()
        }

        pub(crate) fn texts(&self) -> Vec<String> {
            self.texts.lock().unwrap().clone()
        }

        pub(crate) fn disconnects(&self) -> Vec<bool> {
            self.disconnects.lock().unwrap().clone()
        }
    }

    impl Peer for RecordingPeer {
        fn id(&self) -> &str {
            &self.id
        }

        fn send(&self, event: Event) -> GatewayResult<()> {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(GatewayError::Transport("peer gone".into()));
            }
            self.sent.lock().unwrap().push(event);
            Ok(())
        }

        fn send_text(&self, text: &str) -> GatewayResult<()> {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(GatewayError::Transport("peer gone".into()));
            }
            self.texts.lock().unwrap().push(text.to_string());
            Ok(())
        }

        fn disconnect(&self, force: bool) {
            self.disconnects.lock().unwrap().push(force);
        }
    }
}
