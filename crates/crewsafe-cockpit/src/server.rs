//! [`CockpitServer`] – HTTP + WebSocket endpoint for the operator UI.
//!
//! One TCP port serves both protocols.  The first bytes of every connection
//! are peeked: a WebSocket upgrade becomes a live bridge, anything else is
//! answered as plain HTTP and closed.
//!
//! | Request | Response |
//! |---|---|
//! | `GET /status` | [`StatusReport`] as JSON |
//! | `GET /agent_context` | [`AgentContext`][crewsafe_runtime::AgentContext] as JSON |
//! | `GET /` | The embedded cockpit page |
//! | WebSocket | Status every push interval, every bus event, command replies |
//!
//! WebSocket clients send [`CockpitCommand`]s as JSON:
//!
//! ```json
//! {"type": "mode", "mode": "precision"}
//! {"type": "motion", "direction": "forward", "mode": "normal", "magnitude": 0.3}
//! {"type": "stop"}
//! ```
//!
//! Motion commands run in their own task so that a `stop` sent on the same
//! socket is handled while the motion is still executing.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crewsafe_runtime::{SafetyCore, StatusReport};
use crewsafe_types::{Event, MotionOutcome, MotionRequest, OperatingMode, SafetyError};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Default TCP port for the cockpit endpoint.
pub const DEFAULT_PORT: u16 = 8080;

/// Default interval between status pushes on a WebSocket.
pub const DEFAULT_PUSH_INTERVAL: Duration = Duration::from_millis(100);

const COCKPIT_HTML: &str = include_str!("cockpit.html");

// ---------------------------------------------------------------------------
// Wire messages
// ---------------------------------------------------------------------------

/// Upstream messages accepted on the WebSocket.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CockpitCommand {
    Mode { mode: OperatingMode },
    Motion(MotionRequest),
    Stop,
}

/// Downstream messages pushed to every WebSocket client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CockpitMessage {
    Status(StatusReport),
    Event(Event),
    Outcome { outcome: MotionOutcome },
    Mode { previous: OperatingMode, mode: OperatingMode },
    Error { message: String },
}

/// Parse one upstream text frame.
///
/// # Errors
///
/// Returns [`SafetyError::Serialization`] for malformed JSON or an unknown
/// command type.
pub fn parse_command(text: &str) -> Result<CockpitCommand, SafetyError> {
    serde_json::from_str(text).map_err(|e| SafetyError::Serialization(e.to_string()))
}

// ---------------------------------------------------------------------------
// CockpitServer
// ---------------------------------------------------------------------------

/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use crewsafe_cockpit::CockpitServer;
/// use crewsafe_runtime::SafetyCore;
///
/// async fn serve(core: Arc<SafetyCore>) {
///     if let Err(e) = CockpitServer::new(core).with_port(8080).run().await {
///         eprintln!("cockpit failed: {e}");
///     }
/// }
/// ```
pub struct CockpitServer {
    core: Arc<SafetyCore>,
    port: u16,
    push_interval: Duration,
}

impl CockpitServer {
    pub fn new(core: Arc<SafetyCore>) -> Self {
        Self {
            core,
            port: DEFAULT_PORT,
            push_interval: DEFAULT_PUSH_INTERVAL,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_push_interval(mut self, interval: Duration) -> Self {
        self.push_interval = interval.max(Duration::from_millis(10));
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Bind `0.0.0.0:<port>` and serve forever.
    ///
    /// # Errors
    ///
    /// Returns [`SafetyError::Channel`] if the listener cannot bind.
    pub async fn run(self) -> Result<(), SafetyError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| SafetyError::Channel(format!("cockpit bind error on {addr}: {e}")))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), SafetyError> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "cockpit listening");
        }
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let core = Arc::clone(&self.core);
                    let push_interval = self.push_interval;
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, core, push_interval).await {
                            debug!(%peer, error = %e, "cockpit client error");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "cockpit accept error"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-connection handling
// ---------------------------------------------------------------------------

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    core: Arc<SafetyCore>,
    push_interval: Duration,
) -> Result<(), SafetyError> {
    // `peek` leaves the bytes in place for the WebSocket handshake.
    let mut buf = [0u8; 2048];
    let n = stream
        .peek(&mut buf)
        .await
        .map_err(|e| SafetyError::Channel(format!("peek error from {peer}: {e}")))?;
    let head = String::from_utf8_lossy(&buf[..n]).into_owned();

    if is_websocket_upgrade(&head) {
        return handle_ws(stream, peer, core, push_interval).await;
    }

    // Drain the request so closing the socket does not reset it.
    let _ = stream.read(&mut buf).await;
    let response = match request_path(&head) {
        Some("/status") => json_response(&core.status()),
        Some("/agent_context") => json_response(&core.agent_context()),
        Some("/") | Some("/index.html") => {
            http_response("200 OK", "text/html; charset=utf-8", COCKPIT_HTML)
        }
        _ => http_response(
            "404 Not Found",
            "application/json",
            r#"{"error":"not found"}"#,
        ),
    };
    stream
        .write_all(response.as_bytes())
        .await
        .map_err(|e| SafetyError::Channel(format!("HTTP write error: {e}")))?;
    let _ = stream.shutdown().await;
    Ok(())
}

fn is_websocket_upgrade(head: &str) -> bool {
    head.lines().any(|line| {
        let line = line.to_ascii_lowercase();
        line.starts_with("upgrade:") && line.contains("websocket")
    })
}

/// Path of a `GET` request line, without the query string.
fn request_path(head: &str) -> Option<&str> {
    let mut parts = head.lines().next()?.split_whitespace();
    if parts.next()? != "GET" {
        return None;
    }
    let target = parts.next()?;
    Some(target.split('?').next().unwrap_or(target))
}

fn http_response(status: &str, content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {}\r\n\
         Cache-Control: no-store\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        body.len()
    )
}

fn json_response<T: Serialize>(value: &T) -> String {
    match serde_json::to_string(value) {
        Ok(body) => http_response("200 OK", "application/json", &body),
        Err(e) => http_response(
            "500 Internal Server Error",
            "application/json",
            &serde_json::json!({ "error": e.to_string() }).to_string(),
        ),
    }
}

// ---------------------------------------------------------------------------
// WebSocket bridge
// ---------------------------------------------------------------------------

async fn handle_ws(
    stream: TcpStream,
    peer: SocketAddr,
    core: Arc<SafetyCore>,
    push_interval: Duration,
) -> Result<(), SafetyError> {
    let ws = accept_async(stream)
        .await
        .map_err(|e| SafetyError::Channel(format!("WS handshake from {peer}: {e}")))?;
    info!(%peer, "cockpit client connected");

    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut events = core.bus().subscribe_all();
    let (reply_tx, mut replies) = mpsc::channel::<CockpitMessage>(32);
    let mut ticker = tokio::time::interval(push_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let outgoing = tokio::select! {
            _ = ticker.tick() => CockpitMessage::Status(core.status()),
            event = events.recv() => match event {
                Ok(event) => CockpitMessage::Event(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(%peer, dropped = n, "cockpit client lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            Some(reply) = replies.recv() => reply,
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match dispatch(text.as_str(), &core, &reply_tx).await {
                        Some(reply) => reply,
                        None => continue,
                    }
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            },
        };

        match serde_json::to_string(&outgoing) {
            Ok(json) => {
                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!(error = %e, "cockpit serialization error"),
        }
    }

    info!(%peer, "cockpit client disconnected");
    Ok(())
}

/// Apply one upstream frame.  Returns an immediate reply, if any; motion
/// outcomes arrive later through `replies`.
async fn dispatch(
    text: &str,
    core: &Arc<SafetyCore>,
    replies: &mpsc::Sender<CockpitMessage>,
) -> Option<CockpitMessage> {
    let command = match parse_command(text) {
        Ok(command) => command,
        Err(e) => {
            return Some(CockpitMessage::Error {
                message: e.to_string(),
            });
        }
    };
    debug!(?command, "cockpit command");

    match command {
        CockpitCommand::Mode { mode } => {
            let previous = core.set_mode(mode);
            Some(CockpitMessage::Mode { previous, mode })
        }
        CockpitCommand::Stop => {
            let outcome = core.submit(MotionRequest::stop()).await;
            Some(CockpitMessage::Outcome { outcome })
        }
        CockpitCommand::Motion(request) => {
            let core = Arc::clone(core);
            let replies = replies.clone();
            tokio::spawn(async move {
                let outcome = core.submit(request).await;
                let _ = replies.send(CockpitMessage::Outcome { outcome }).await;
            });
            None
        }
    }
}
