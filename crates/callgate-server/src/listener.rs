//! HTTP listener the transport attaches to.
//!
//! The gateway either creates a [`TcpHttpListener`] itself (self-owned) or
//! is handed any [`Listener`] by the embedding application. Requests that
//! are not transport handshakes get the listener's fallback response.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Plain HTTP response for requests that are not transport handshakes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackResponse {
    pub status: u16,
    pub reason: &'static str,
    pub body: String,
}

impl FallbackResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            reason: "OK",
            body: body.into(),
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: 404,
            reason: "Not Found",
            body: "Not Found".to_string(),
        }
    }

    /// Serialize as a complete HTTP/1.1 response that closes the connection.
    pub fn to_http(&self) -> String {
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.status,
            self.reason,
            self.body.len(),
            self.body
        )
    }
}

/// A network listener the transport server accepts connections from.
pub trait Listener: Send + Sync {
    /// Start listening on `port` (0 = ephemeral).
    fn listen(&self, port: u16) -> BoxFuture<'_, io::Result<()>>;

    /// Stop listening.
    fn close(&self) -> BoxFuture<'_, io::Result<()>>;

    /// Bound address, if the listener has one.
    fn local_addr(&self) -> Option<SocketAddr>;

    fn is_listening(&self) -> bool;

    /// Accept the next inbound TCP connection.
    fn accept(&self) -> BoxFuture<'_, io::Result<(TcpStream, SocketAddr)>>;

    /// Response for non-transport HTTP requests.
    fn fallback_response(&self) -> FallbackResponse {
        FallbackResponse::not_found()
    }
}

/// Tokio TCP listener with a fixed fallback response.
pub struct TcpHttpListener {
    host: String,
    inner: RwLock<Option<Arc<TcpListener>>>,
    fallback: FallbackResponse,
}

impl TcpHttpListener {
    /// Create an idle listener that will bind on `host`.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            inner: RwLock::new(None),
            fallback: FallbackResponse::not_found(),
        }
    }

    pub fn with_fallback(mut self, fallback: FallbackResponse) -> Self {
        self.fallback = fallback;
        self
    }

    /// Bind right away.
    pub async fn bind(host: impl Into<String>, port: u16) -> io::Result<Self> {
        let listener = Self::new(host);
        listener.listen(port).await?;
        Ok(listener)
    }

    fn current(&self) -> Option<Arc<TcpListener>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Listener for TcpHttpListener {
    fn listen(&self, port: u16) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            if self.current().is_some() {
                return Ok(());
            }
            let addr = format!("{}:{}", self.host, port);
            let tcp = TcpListener::bind(&addr).await?;
            let bound = tcp.local_addr()?;
            *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(tcp));
            info!(addr = %bound, "listener bound");
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            let taken = self
                .inner
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            match taken {
                Some(tcp) => {
                    debug!(addr = ?tcp.local_addr().ok(), "listener closed");
                    Ok(())
                }
                None => Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "listener is not running",
                )),
            }
        })
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.current().and_then(|tcp| tcp.local_addr().ok())
    }

    fn is_listening(&self) -> bool {
        self.current().is_some()
    }

    fn accept(&self) -> BoxFuture<'_, io::Result<(TcpStream, SocketAddr)>> {
        Box::pin(async move {
            let tcp = self.current().ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotConnected, "listener is not running")
            })?;
            tcp.accept().await
        })
    }

    fn fallback_response(&self) -> FallbackResponse {
        self.fallback.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn listen_close_cycle() {
        let listener = TcpHttpListener::new("127.0.0.1");
        assert!(!listener.is_listening());
        assert!(listener.local_addr().is_none());

        listener.listen(0).await.unwrap();
        assert!(listener.is_listening());
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        // Listening again is a no-op.
        listener.listen(0).await.unwrap();
        assert_eq!(listener.local_addr(), Some(addr));

        listener.close().await.unwrap();
        assert!(!listener.is_listening());
        assert!(listener.close().await.is_err());
        assert!(listener.accept().await.is_err());
    }

    #[tokio::test]
    async fn bind_conflict_surfaces() {
        let first = TcpHttpListener::bind("127.0.0.1", 0).await.unwrap();
        let port = first.local_addr().unwrap().port();
        let second = TcpHttpListener::new("127.0.0.1");
        assert!(second.listen(port).await.is_err());
    }

    #[test]
    fn fallback_http_shape() {
        let resp = FallbackResponse::ok("No HTTP Gateway").to_http();
        assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(resp.contains("Content-Length: 15\r\n"));
        assert!(resp.ends_with("\r\n\r\nNo HTTP Gateway"));
    }
}
