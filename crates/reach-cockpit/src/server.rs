//! [`CockpitServer`] – HTTP + WebSocket server for the control surface.
//!
//! * `GET /status` → the status snapshot as JSON.
//! * Any other `GET` → the embedded cockpit page.
//! * WebSocket upgrades → bus events downstream, commands upstream.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use reach_middleware::{EventBus, Topic};
use reach_runtime::ControlHandle;
use reach_types::{Event, ReachError};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::command::handle_text;

/// Default TCP port for the cockpit.
pub const DEFAULT_PORT: u16 = 8080;

/// Default bind address.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// The compiled-in cockpit page.
const COCKPIT_HTML: &str = include_str!("cockpit.html");

/// Downstream frame wrapping one bus event.
#[derive(Serialize)]
struct Downstream<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    topic: &'static str,
    event: &'a Event,
}

// ---------------------------------------------------------------------------
// CockpitServer
// ---------------------------------------------------------------------------

pub struct CockpitServer {
    handle: ControlHandle,
    bus: Arc<EventBus>,
    host: String,
    port: u16,
}

impl CockpitServer {
    pub fn new(handle: ControlHandle, bus: Arc<EventBus>) -> Self {
        Self {
            handle,
            bus,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Bind and serve forever.
    ///
    /// # Errors
    ///
    /// Returns [`ReachError::Configuration`] if the listener cannot bind.
    pub async fn run(self) -> Result<(), ReachError> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ReachError::Configuration(format!("cockpit cannot bind {addr}: {e}")))?;
        info!(%addr, "cockpit listening");
        self.serve(listener).await;
        Ok(())
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let handle = self.handle.clone();
                    let bus = Arc::clone(&self.bus);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, handle, bus).await {
                            debug!(%peer, error = %e, "client error");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "accept error"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-connection handler
// ---------------------------------------------------------------------------

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    handle: ControlHandle,
    bus: Arc<EventBus>,
) -> Result<(), ReachError> {
    // `peek` leaves the request in place for tungstenite's handshake.
    let mut buf = [0u8; 1024];
    let n = stream
        .peek(&mut buf)
        .await
        .map_err(|e| ReachError::Channel(format!("peek error from {peer}: {e}")))?;

    let head = String::from_utf8_lossy(&buf[..n]).into_owned();
    let is_ws_upgrade = head.lines().any(|line| {
        let line = line.to_ascii_lowercase();
        line.starts_with("upgrade:") && line.contains("websocket")
    });

    if is_ws_upgrade {
        return handle_ws(stream, peer, handle, bus).await;
    }

    // Consume what was peeked so the close is a clean FIN.
    stream
        .read_exact(&mut buf[..n])
        .await
        .map_err(|e| ReachError::Channel(format!("read error from {peer}: {e}")))?;

    let mut request_line = head.lines().next().unwrap_or("").split_whitespace();
    let method = request_line.next().unwrap_or("");
    let path = request_line.next().unwrap_or("/");
    match (method, path.split('?').next().unwrap_or(path)) {
        ("GET", "/status") => {
            let body = serde_json::to_string(&handle.status())
                .map_err(|e| ReachError::Serialization(e.to_string()))?;
            respond(stream, "200 OK", "application/json", &body).await
        }
        ("GET", _) => respond(stream, "200 OK", "text/html; charset=utf-8", COCKPIT_HTML).await,
        _ => respond(stream, "405 Method Not Allowed", "text/plain", "method not allowed").await,
    }
}

// ---------------------------------------------------------------------------
// Plain HTTP
// ---------------------------------------------------------------------------

async fn respond(
    mut stream: TcpStream,
    status: &str,
    content_type: &str,
    body: &str,
) -> Result<(), ReachError> {
    let response = format!(
        "HTTP/1.1 {status}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {}\r\n\
         Cache-Control: no-store\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        body.len(),
    );
    stream
        .write_all(response.as_bytes())
        .await
        .map_err(|e| ReachError::Channel(format!("HTTP write error: {e}")))?;
    stream
        .shutdown()
        .await
        .map_err(|e| ReachError::Channel(format!("HTTP shutdown error: {e}")))
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

fn downstream_json(topic: Topic, event: &Event) -> Option<String> {
    let frame = Downstream {
        kind: "event",
        topic: topic.as_str(),
        event,
    };
    match serde_json::to_string(&frame) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!(error = %e, "event serialization failed");
            None
        }
    }
}

async fn handle_ws(
    stream: TcpStream,
    peer: SocketAddr,
    handle: ControlHandle,
    bus: Arc<EventBus>,
) -> Result<(), ReachError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| ReachError::Channel(format!("WS handshake from {peer}: {e}")))?;
    info!(%peer, "cockpit client connected");

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let mut telemetry = bus.subscribe_to(Topic::Telemetry);
    let mut alerts = bus.subscribe_to(Topic::SafetyAlerts);

    loop {
        let outgoing = tokio::select! {
            // ── Downstream: bus → browser ─────────────────────────────────
            result = telemetry.recv() => match result {
                Ok(event) => downstream_json(Topic::Telemetry, &event),
                Err(RecvError::Lagged(n)) => {
                    debug!(%peer, lagged_by = n, "telemetry lagged");
                    None
                }
                Err(RecvError::Closed) => break,
            },
            result = alerts.recv() => match result {
                Ok(event) => downstream_json(Topic::SafetyAlerts, &event),
                Err(RecvError::Lagged(n)) => {
                    warn!(%peer, lagged_by = n, "safety alerts lagged");
                    None
                }
                Err(RecvError::Closed) => break,
            },
            // ── Upstream: browser → control state ─────────────────────────
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let reply = handle_text(&handle, text.as_str());
                    serde_json::to_string(&reply).ok()
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                _ => None,
            },
        };

        if let Some(json) = outgoing {
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    }

    info!(%peer, "cockpit client disconnected");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
