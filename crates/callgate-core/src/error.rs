use thiserror::Error;

/// Errors produced by the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("cannot read gateway listener address")]
    BindAddress,

    #[error("bind failed on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("connection exists: {0}")]
    DuplicateConnection(String),

    #[error("listener close failed: {0}")]
    ListenerClose(#[source] std::io::Error),

    #[error("transport close failed: {0}")]
    TransportClose(String),

    #[error("invalid session state: {0}")]
    InvalidState(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Codec(e.to_string())
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
