//! callgate-core: shared library for the callgate connection gateway.
//!
//! Provides the error type, handshake metadata and caller identity
//! extraction, gateway configuration resolution, and the notices the
//! gateway sends to its peers.

pub mod config;
pub mod error;
pub mod handshake;
pub mod protocol;

// Re-export commonly used items at crate root.
pub use config::{GatewayConfig, GatewayConfigInput, ProcessDefaults, DEFAULT_PATH};
pub use error::{GatewayError, GatewayResult};
pub use handshake::{CallerInfo, HandshakeInfo, ANONYMOUS_CALLER};
pub use protocol::{DisconnectReason, Event};
