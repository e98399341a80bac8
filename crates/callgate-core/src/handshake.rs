//! Handshake metadata and caller identity extraction.
//!
//! A handshake carries header-like metadata plus what the transport knows
//! about the peer. [`HandshakeInfo::extract`] derives who the caller is and
//! where it connects from. Extraction is pure: it never consults the
//! connection registry.

use std::collections::HashMap;

/// Header carrying the caller-chosen identity.
pub const HEADER_CALLER_ID: &str = "x-caller-id";
/// Header carrying the caller's service name.
pub const HEADER_CALLER_NAME: &str = "x-caller";
/// Forwarded client IP, set by a reverse proxy.
pub const HEADER_REAL_IP: &str = "x-real-ip";
/// Alternate client IP header.
pub const HEADER_IP: &str = "x-ip";

/// Caller name used when the handshake does not carry one.
pub const ANONYMOUS_CALLER: &str = "anonymous";

/// Metadata of one incoming handshake.
#[derive(Debug, Clone, Default)]
pub struct HandshakeInfo {
    /// Header name (lower-cased) to its first value.
    pub headers: HashMap<String, String>,
    /// Peer address as reported by the transport.
    pub peer_address: String,
    /// Identifier the transport assigned to this connection.
    pub connection_id: String,
}

/// Caller metadata derived from a handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerInfo {
    pub identity: String,
    pub remote_host: String,
    pub caller_name: String,
}

impl HandshakeInfo {
    pub fn new(connection_id: impl Into<String>, peer_address: impl Into<String>) -> Self {
        Self {
            headers: HashMap::new(),
            peer_address: peer_address.into(),
            connection_id: connection_id.into(),
        }
    }

    /// Add a header. Names are case-insensitive; the first value wins.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.insert_header(name, value);
        self
    }

    pub fn insert_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers
            .entry(name.to_ascii_lowercase())
            .or_insert_with(|| value.into());
    }

    /// Non-empty value of a header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Derive identity, remote host and caller name.
    pub fn extract(&self) -> CallerInfo {
        let identity = self
            .header(HEADER_CALLER_ID)
            .unwrap_or(&self.connection_id)
            .to_string();

        let remote_host = self
            .header(HEADER_REAL_IP)
            .or_else(|| self.header(HEADER_IP))
            .unwrap_or(&self.peer_address)
            .to_string();

        let caller_name = self
            .header(HEADER_CALLER_NAME)
            .unwrap_or(ANONYMOUS_CALLER)
            .to_string();

        CallerInfo {
            identity,
            remote_host,
            caller_name,
        }
    }
}
