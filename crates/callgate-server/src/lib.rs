//! callgate-server: realtime connection gateway.
//!
//! Accepts WebSocket connections on a configurable path, derives each
//! caller's identity from its handshake headers and admits at most one live
//! connection per identity. The gateway can run on its own TCP listener or
//! attach to a listener owned by the embedding application.

pub mod config;
pub mod gateway;
pub mod handler;
pub mod listener;
pub mod registry;
pub mod session;
pub mod transport;

pub use config::{CliOverrides, ConfigFile, ServerConfig};
pub use gateway::{Gateway, DEFAULT_BIND_HOST, NO_GATEWAY_BODY};
pub use handler::{ConnectionHandler, NoopHandler};
pub use listener::{FallbackResponse, Listener, TcpHttpListener};
pub use registry::{Admission, ConnectionRecord, ConnectionRegistry};
pub use session::{Session, SessionState};
pub use transport::{CorsPolicy, Peer, TransportOptions, TransportServer, WsPeer};
