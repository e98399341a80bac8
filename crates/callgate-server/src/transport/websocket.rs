//! WebSocket connections using tokio-tungstenite.
//!
//! Each accepted TCP stream is sniffed first: plain HTTP requests get the
//! listener's fallback response, upgrade requests go through the WebSocket
//! handshake and then the session driver. The driver multiplexes the
//! shutdown signal, the peer's outbound queue, the liveness timer and
//! inbound frames.

use super::server::TransportContext;
use super::Peer;
use crate::handler::guarded;
use crate::listener::FallbackResponse;
use crate::registry::ConnectionRecord;
use crate::session::Session;
use callgate_core::{DisconnectReason, Event, GatewayError, GatewayResult, HandshakeInfo};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep_until, timeout, Instant};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

/// Largest HTTP request head accepted before the upgrade.
const MAX_REQUEST_HEAD: usize = 8 * 1024;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// Work queued for a connection's driver.
#[derive(Debug)]
pub enum Outbound {
    Text(String),
    Close { force: bool },
}

/// [`Peer`] backed by a WebSocket connection driver.
#[derive(Debug)]
pub struct WsPeer {
    id: String,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl WsPeer {
    pub fn new(id: String) -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { id, outbound }), rx)
    }

    fn queue(&self, text: String) -> GatewayResult<()> {
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| GatewayError::Transport(format!("connection {} is closed", self.id)))
    }
}

impl Peer for WsPeer {
    fn id(&self) -> &str {
        &self.id
    }

    fn send(&self, event: Event) -> GatewayResult<()> {
        let text = event.encode()?;
        self.queue(text)
    }

    fn send_text(&self, text: &str) -> GatewayResult<()> {
        self.queue(text.to_string())
    }

    fn disconnect(&self, force: bool) {
        let _ = self.outbound.send(Outbound::Close { force });
    }
}

/// Handle one accepted TCP stream until it ends.
pub(crate) async fn handle_stream(
    stream: TcpStream,
    remote: SocketAddr,
    ctx: Arc<TransportContext>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let connection_id = generate_connection_id();

    let (ws, handshake) = tokio::select! {
        _ = shutdown.recv() => return,
        result = timeout(ctx.options.connect_timeout, upgrade(stream, remote, &ctx, &connection_id)) => {
            match result {
                Ok(Ok(Some(upgraded))) => upgraded,
                Ok(Ok(None)) => return,
                Ok(Err(e)) => {
                    debug!(remote = %remote, error = %e, "handshake failed");
                    return;
                }
                Err(_) => {
                    debug!(remote = %remote, "handshake timed out");
                    return;
                }
            }
        }
    };

    let (peer, outbound) = WsPeer::new(connection_id.clone());
    ctx.peers.insert(Arc::clone(&peer)).await;

    let (mut sink, source) = ws.split();
    let mut session = Session::new(peer, handshake);
    match session
        .admit(&ctx.registry, ctx.handler.as_ref(), &ctx.process_name)
        .await
    {
        Ok(record) => {
            let reason = drive(&ctx, &record, &mut sink, source, outbound, &mut shutdown).await;
            session
                .disconnect(&ctx.registry, ctx.handler.as_ref(), reason)
                .await;
        }
        Err(e) => {
            debug!(connection_id = %connection_id, error = %e, "admission failed");
            flush_and_close(&mut sink, outbound).await;
        }
    }

    ctx.peers.remove(&connection_id).await;
}

/// Sniff the request and perform the WebSocket handshake.
///
/// Returns `None` when the request was answered as plain HTTP.
async fn upgrade(
    mut stream: TcpStream,
    remote: SocketAddr,
    ctx: &TransportContext,
    connection_id: &str,
) -> io::Result<Option<(WebSocketStream<TcpStream>, HandshakeInfo)>> {
    let Some(head) = sniff_request(&stream).await? else {
        return Ok(None);
    };

    if !head.upgrade {
        let mut consumed = vec![0u8; head.len];
        stream.read_exact(&mut consumed).await?;
        respond_plain(&mut stream, &ctx.listener.fallback_response()).await?;
        debug!(remote = %remote, "answered non-transport request");
        return Ok(None);
    }

    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(ctx.options.max_message_size);
    ws_config.max_frame_size = Some(ctx.options.max_message_size);

    let options = &ctx.options;
    let mut handshake = HandshakeInfo::new(connection_id, remote.ip().to_string());
    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        if !options.path_matches(req.uri().path()) {
            return Err(error_response(StatusCode::NOT_FOUND, "unknown transport path"));
        }
        let header = |name: &str| req.headers().get(name).and_then(|v| v.to_str().ok());
        if !options.origin_allowed(header("origin"), header("host")) {
            return Err(error_response(StatusCode::FORBIDDEN, "origin not allowed"));
        }
        for (name, value) in req.headers() {
            if let Ok(value) = value.to_str() {
                handshake.insert_header(name.as_str(), value);
            }
        }
        Ok(resp)
    };

    let ws = tokio_tungstenite::accept_hdr_async_with_config(stream, callback, Some(ws_config))
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

    debug!(remote = %remote, connection_id, "WebSocket handshake complete");
    Ok(Some((ws, handshake)))
}

/// Run an admitted connection until it ends, returning why it ended.
async fn drive(
    ctx: &TransportContext,
    record: &Arc<ConnectionRecord>,
    sink: &mut WsSink,
    mut source: WsSource,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    shutdown: &mut broadcast::Receiver<()>,
) -> DisconnectReason {
    let opts = &ctx.options;
    let mut next_ping = Instant::now() + opts.ping_interval;
    let mut pong_deadline: Option<Instant> = None;
    // Set once a graceful close was requested; the peer gets ping_timeout to ack.
    let mut close_deadline: Option<Instant> = None;

    loop {
        // Once closing, only the close deadline matters; pings have stopped.
        let wake = close_deadline
            .unwrap_or_else(|| pong_deadline.map_or(next_ping, |d| d.min(next_ping)));

        tokio::select! {
            _ = shutdown.recv() => {
                let _ = sink.send(Message::Close(None)).await;
                return DisconnectReason::ServerShutdown;
            }
            queued = outbound.recv() => match queued {
                Some(Outbound::Text(_)) if close_deadline.is_some() => {
                    debug!(identity = %record.identity, "dropping send after close");
                }
                Some(Outbound::Text(text)) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        debug!(identity = %record.identity, error = %e, "send failed");
                        return DisconnectReason::TransportError;
                    }
                }
                Some(Outbound::Close { force }) => {
                    let _ = sink.send(Message::Close(None)).await;
                    if force {
                        return DisconnectReason::ServerDisconnect;
                    }
                    if close_deadline.is_none() {
                        close_deadline = Some(Instant::now() + opts.ping_timeout);
                    }
                }
                None => return DisconnectReason::ServerDisconnect,
            },
            _ = sleep_until(wake) => {
                let now = Instant::now();
                if close_deadline.is_some_and(|d| now >= d) {
                    return DisconnectReason::ServerDisconnect;
                }
                if pong_deadline.is_some_and(|d| now >= d) {
                    info!(identity = %record.identity, "no pong within ping timeout");
                    return DisconnectReason::PingTimeout;
                }
                if now >= next_ping && close_deadline.is_none() {
                    if sink.send(Message::Ping(Default::default())).await.is_err() {
                        return DisconnectReason::TransportError;
                    }
                    if pong_deadline.is_none() {
                        pong_deadline = Some(now + opts.ping_timeout);
                    }
                    next_ping = now + opts.ping_interval;
                }
            }
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if close_deadline.is_none() {
                        guarded("on_message", &record.identity, || {
                            ctx.handler.on_message(record, text.as_str())
                        });
                    }
                }
                Some(Ok(Message::Pong(_))) => pong_deadline = None,
                Some(Ok(Message::Close(_))) => {
                    // Flush tungstenite's queued close reply before the stream drops.
                    let _ = sink.close().await;
                    return if close_deadline.is_some() {
                        DisconnectReason::ServerDisconnect
                    } else {
                        DisconnectReason::ClientDisconnect
                    };
                }
                Some(Ok(_)) => {
                    // Binary and control frames carry nothing for the gateway.
                }
                Some(Err(e)) => {
                    warn!(identity = %record.identity, error = %e, "WebSocket read failed");
                    return DisconnectReason::TransportError;
                }
                None => {
                    return if close_deadline.is_some() {
                        DisconnectReason::ServerDisconnect
                    } else {
                        DisconnectReason::TransportClose
                    };
                }
            }
        }
    }
}

/// Deliver whatever the session queued for a refused peer, then close.
async fn flush_and_close(sink: &mut WsSink, mut outbound: mpsc::UnboundedReceiver<Outbound>) {
    while let Ok(queued) = outbound.try_recv() {
        match queued {
            Outbound::Text(text) => {
                if sink.send(Message::Text(text.into())).await.is_err() {
                    return;
                }
            }
            Outbound::Close { .. } => break,
        }
    }
    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;
}

/// What the peeked request head says.
#[derive(Debug, PartialEq, Eq)]
struct RequestHead {
    /// Length of the head including the blank line.
    len: usize,
    upgrade: bool,
}

/// Peek until the full request head is buffered, without consuming it.
async fn sniff_request(stream: &TcpStream) -> io::Result<Option<RequestHead>> {
    let mut buf = vec![0u8; MAX_REQUEST_HEAD];
    let mut seen = 0;
    loop {
        let n = stream.peek(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        if let Some(head) = parse_head(&buf[..n]) {
            return Ok(Some(head));
        }
        if n == buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "request head too large",
            ));
        }
        if n == seen {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        seen = n;
    }
}

fn parse_head(buf: &[u8]) -> Option<RequestHead> {
    let end = buf.windows(4).position(|w| w == b"\r\n\r\n")? + 4;
    let text = String::from_utf8_lossy(&buf[..end]);
    let upgrade = text.split("\r\n").skip(1).any(|line| {
        line.split_once(':').is_some_and(|(name, value)| {
            name.trim().eq_ignore_ascii_case("upgrade")
                && value.to_ascii_lowercase().contains("websocket")
        })
    });
    Some(RequestHead { len: end, upgrade })
}

async fn respond_plain(stream: &mut TcpStream, response: &FallbackResponse) -> io::Result<()> {
    stream.write_all(response.to_http().as_bytes()).await?;
    stream.shutdown().await
}

fn error_response(status: StatusCode, body: &str) -> ErrorResponse {
    let mut resp = ErrorResponse::new(Some(body.to_string()));
    *resp.status_mut() = status;
    resp
}

/// Generate a random connection ID (hex-encoded, 16 bytes = 32 hex chars).
fn generate_connection_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
    hex::encode(bytes)
}
