//! Notices the gateway sends to peers, and why connections end.
//!
//! Notices travel as JSON text frames: `{"event": "connected", "data": {...}}`.
//! Everything else on the wire belongs to the host application.

use crate::error::GatewayResult;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A gateway notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Event {
    /// Sent once to a peer right after admission.
    Connected { name: String },
    /// Sent before the gateway drops a peer it refused.
    Error { message: String },
}

impl Event {
    pub fn connected(name: impl Into<String>) -> Self {
        Event::Connected { name: name.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Event::Error {
            message: message.into(),
        }
    }

    pub fn encode(&self) -> GatewayResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> GatewayResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// The peer closed the connection.
    ClientDisconnect,
    /// The gateway closed the connection.
    ServerDisconnect,
    /// No pong arrived within the ping timeout.
    PingTimeout,
    /// The stream ended without a close frame.
    TransportClose,
    /// Reading or writing failed, or the peer broke protocol limits.
    TransportError,
    /// The transport server is stopping.
    ServerShutdown,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::ClientDisconnect => "client namespace disconnect",
            DisconnectReason::ServerDisconnect => "server namespace disconnect",
            DisconnectReason::PingTimeout => "ping timeout",
            DisconnectReason::TransportClose => "transport close",
            DisconnectReason::TransportError => "transport error",
            DisconnectReason::ServerShutdown => "server shutting down",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
