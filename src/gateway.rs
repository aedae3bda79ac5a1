//! Discord gateway (WebSocket) driver.
//!
//! Owns the connection lifecycle: HELLO, IDENTIFY or RESUME, heartbeats,
//! sequence tracking, and reconnecting with backoff. Consumers only see the
//! [`GatewayEvent`] channel in [`GatewayHandle`].

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::events::GatewayEvent;
use crate::types::GatewayPayload;

const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// Slash commands and component presses arrive with GUILDS alone.
pub const INTENTS_GUILDS: u32 = 1;

const HELLO_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RECONNECT_ATTEMPTS: u32 = 8;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;
type WsSource = SplitStream<WsStream>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("bad HELLO: {0}")]
    Hello(String),
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub token: String,
    pub intents: u32,
}

pub struct GatewayHandle {
    pub events: mpsc::Receiver<GatewayEvent>,
    /// The background driver; it stops on fatal errors or when `events` is dropped.
    pub driver: tokio::task::JoinHandle<()>,
}

/// Spawn the gateway driver and return its event stream.
pub fn connect(config: GatewayConfig) -> GatewayHandle {
    let (event_tx, events) = mpsc::channel(256);
    let driver = tokio::spawn(drive(config, event_tx));
    GatewayHandle { events, driver }
}

// ---------------------------------------------------------------------------
// Session bookkeeping
// ---------------------------------------------------------------------------

/// What survives a reconnect.
#[derive(Debug, Clone, Default)]
struct SessionState {
    session_id: Option<String>,
    resume_url: Option<String>,
    sequence: Option<u64>,
}

impl SessionState {
    fn connect_url(&self) -> String {
        let url = self
            .resume_url
            .clone()
            .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string());
        if url.contains("v=10") {
            url
        } else if url.contains('?') {
            format!("{}&v=10&encoding=json", url)
        } else {
            format!("{}/?v=10&encoding=json", url.trim_end_matches('/'))
        }
    }

    /// RESUME when a session can be picked up again, IDENTIFY otherwise.
    fn handshake(&self, config: &GatewayConfig) -> serde_json::Value {
        match (&self.session_id, self.sequence) {
            (Some(session_id), Some(seq)) => json!({
                "op": 6,
                "d": { "token": config.token, "session_id": session_id, "seq": seq }
            }),
            _ => json!({
                "op": 2,
                "d": {
                    "token": config.token,
                    "intents": config.intents,
                    "properties": { "os": std::env::consts::OS, "browser": "crafty-relay", "device": "crafty-relay" }
                }
            }),
        }
    }

    fn observe(&mut self, sequence: Option<u64>, event: &GatewayEvent) {
        if sequence.is_some() {
            self.sequence = sequence;
        }
        if let GatewayEvent::Ready(ready) = event {
            self.session_id = Some(ready.session_id.clone());
            self.resume_url = Some(ready.resume_gateway_url.clone());
        }
    }

    fn forget_session(&mut self) {
        self.session_id = None;
        self.sequence = None;
    }
}

// ---------------------------------------------------------------------------
// Disconnect handling
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disconnect {
    Resume,
    Reidentify,
    Fatal,
    ConsumerGone,
}

fn classify_close(code: u16) -> Disconnect {
    match code {
        4004 => {
            error!("authentication failed (close 4004)");
            Disconnect::Fatal
        }
        4010..=4014 => {
            error!(code, "gateway rejected our configuration");
            Disconnect::Fatal
        }
        4007 | 4009 => Disconnect::Reidentify,
        _ => Disconnect::Resume,
    }
}

/// Exponential backoff with ±25% jitter, capped at 60 s.
fn backoff_delay(attempt: u32) -> Duration {
    let base_ms = 1000u64 * 2u64.saturating_pow(attempt.min(6));
    let jitter = rand::random::<f64>() * 0.5 + 0.75;
    Duration::from_millis((base_ms as f64 * jitter).min(60_000.0) as u64)
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

async fn drive(config: GatewayConfig, events: mpsc::Sender<GatewayEvent>) {
    let session = Arc::new(Mutex::new(SessionState::default()));
    let mut failures: u32 = 0;

    loop {
        let disconnect = match run_connection(&config, &session, &events).await {
            Ok(disconnect) => {
                failures = 1;
                disconnect
            }
            Err(e) => {
                failures += 1;
                error!(error = %e, attempt = failures, "gateway connection failed");
                Disconnect::Resume
            }
        };

        match disconnect {
            Disconnect::Resume => info!("will attempt RESUME"),
            Disconnect::Reidentify => {
                info!("session invalidated, will re-IDENTIFY");
                session.lock().await.forget_session();
            }
            Disconnect::Fatal => {
                error!("fatal gateway error, shutting down");
                return;
            }
            Disconnect::ConsumerGone => {
                info!("event channel closed, stopping gateway driver");
                return;
            }
        }

        if failures > MAX_RECONNECT_ATTEMPTS {
            error!("exceeded max reconnect attempts, giving up");
            return;
        }
        let delay = backoff_delay(failures);
        warn!(delay_ms = delay.as_millis() as u64, attempt = failures, "reconnecting after backoff");
        tokio::time::sleep(delay).await;
    }
}

/// One WebSocket connection from handshake to disconnect.
async fn run_connection(
    config: &GatewayConfig,
    session: &Arc<Mutex<SessionState>>,
    events: &mpsc::Sender<GatewayEvent>,
) -> Result<Disconnect, GatewayError> {
    let url = session.lock().await.connect_url();
    info!(url = %url, "connecting to Discord gateway");

    let (ws, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
    let (sink, mut source) = ws.split();
    let sink = Arc::new(Mutex::new(sink));

    let interval = read_hello(&mut source).await?;
    info!(interval_ms = interval, "received HELLO");

    let handshake = session.lock().await.handshake(config);
    send_json(&sink, &handshake).await?;
    info!(op = %handshake["op"], "sent handshake");

    let heartbeat = tokio::spawn(heartbeat_loop(
        Arc::clone(&sink),
        Arc::clone(session),
        Duration::from_millis(interval),
    ));

    let disconnect = read_loop(&mut source, &sink, session, events).await;

    heartbeat.abort();
    let _ = sink.lock().await.send(WsMessage::Close(None)).await;
    Ok(disconnect)
}

async fn read_hello(source: &mut WsSource) -> Result<u64, GatewayError> {
    let msg = tokio::time::timeout(HELLO_TIMEOUT, source.next())
        .await
        .map_err(|_| GatewayError::Hello("timed out".into()))?
        .ok_or_else(|| GatewayError::Hello("stream ended".into()))??;

    let text = match msg {
        WsMessage::Text(text) => text,
        other => return Err(GatewayError::Hello(format!("unexpected frame {:?}", other))),
    };
    let payload: GatewayPayload = serde_json::from_str(&text)?;
    if payload.op != 10 {
        return Err(GatewayError::Hello(format!("expected op 10, got op {}", payload.op)));
    }

    payload
        .d
        .as_ref()
        .and_then(|d| d.get("heartbeat_interval"))
        .and_then(|v| v.as_u64())
        .ok_or_else(|| GatewayError::Hello("missing heartbeat_interval".into()))
}

async fn heartbeat_loop(sink: Arc<Mutex<WsSink>>, session: Arc<Mutex<SessionState>>, every: Duration) {
    // First beat lands at a random point inside the first interval.
    tokio::time::sleep(every.mul_f64(rand::random::<f64>())).await;

    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        let seq = session.lock().await.sequence;
        if let Err(e) = send_json(&sink, &json!({ "op": 1, "d": seq })).await {
            warn!(error = %e, "heartbeat send failed, stopping heartbeat task");
            return;
        }
        debug!(?seq, "sent heartbeat");
    }
}

async fn read_loop(
    source: &mut WsSource,
    sink: &Arc<Mutex<WsSink>>,
    session: &Arc<Mutex<SessionState>>,
    events: &mpsc::Sender<GatewayEvent>,
) -> Disconnect {
    while let Some(msg) = source.next().await {
        let text = match msg {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(frame)) => {
                let code = frame.map(|f| u16::from(f.code));
                warn!(close_code = ?code, "WebSocket closed by server");
                return code.map(classify_close).unwrap_or(Disconnect::Resume);
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "WebSocket read error");
                return Disconnect::Resume;
            }
        };

        let payload: GatewayPayload = match serde_json::from_str(&text) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to parse gateway payload");
                continue;
            }
        };
        let sequence = payload.s;
        let event = GatewayEvent::from_payload(payload);
        session.lock().await.observe(sequence, &event);

        match &event {
            GatewayEvent::Ready(ready) => {
                info!(session_id = %ready.session_id, user = %ready.user.tag(), "gateway READY");
            }
            GatewayEvent::HeartbeatRequest => {
                let seq = session.lock().await.sequence;
                if let Err(e) = send_json(sink, &json!({ "op": 1, "d": seq })).await {
                    warn!(error = %e, "failed to answer heartbeat request");
                }
                continue;
            }
            GatewayEvent::HeartbeatAck => {
                debug!("heartbeat acknowledged");
                continue;
            }
            GatewayEvent::Reconnect => {
                info!("gateway requested reconnect (op 7)");
                return Disconnect::Resume;
            }
            GatewayEvent::InvalidSession(resumable) => {
                warn!(resumable, "session invalidated (op 9)");
                tokio::time::sleep(Duration::from_secs(if *resumable { 2 } else { 3 })).await;
                return if *resumable {
                    Disconnect::Resume
                } else {
                    Disconnect::Reidentify
                };
            }
            _ => {}
        }

        if events.send(event).await.is_err() {
            return Disconnect::ConsumerGone;
        }
    }

    info!("WebSocket stream ended");
    Disconnect::Resume
}

async fn send_json(sink: &Arc<Mutex<WsSink>>, payload: &serde_json::Value) -> Result<(), GatewayError> {
    let text = serde_json::to_string(payload)?;
    sink.lock().await.send(WsMessage::Text(text)).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GatewayConfig {
        GatewayConfig {
            token: "bot-token".into(),
            intents: INTENTS_GUILDS,
        }
    }

    fn ready_event() -> GatewayEvent {
        GatewayEvent::from_payload(GatewayPayload {
            op: 0,
            s: Some(1),
            t: Some("READY".into()),
            d: Some(json!({
                "v": 10,
                "user": { "id": "1", "username": "relay" },
                "session_id": "sess",
                "resume_gateway_url": "wss://resume.discord.gg",
                "application": { "id": "2" },
            })),
        })
    }

    #[test]
    fn fresh_session_identifies_on_default_url() {
        let state = SessionState::default();
        assert_eq!(state.connect_url(), DEFAULT_GATEWAY_URL);

        let hs = state.handshake(&config());
        assert_eq!(hs["op"], 2);
        assert_eq!(hs["d"]["token"], "bot-token");
        assert_eq!(hs["d"]["intents"], INTENTS_GUILDS);
    }

    #[test]
    fn ready_enables_resume() {
        let mut state = SessionState::default();
        state.observe(Some(1), &ready_event());
        state.observe(Some(5), &GatewayEvent::HeartbeatAck);

        assert_eq!(state.connect_url(), "wss://resume.discord.gg/?v=10&encoding=json");
        let hs = state.handshake(&config());
        assert_eq!(hs["op"], 6);
        assert_eq!(hs["d"]["session_id"], "sess");
        assert_eq!(hs["d"]["seq"], 5);
    }

    #[test]
    fn missing_sequence_keeps_last_one() {
        let mut state = SessionState::default();
        state.observe(Some(9), &GatewayEvent::HeartbeatAck);
        state.observe(None, &GatewayEvent::HeartbeatAck);
        assert_eq!(state.sequence, Some(9));
    }

    #[test]
    fn forgetting_session_falls_back_to_identify() {
        let mut state = SessionState::default();
        state.observe(Some(3), &ready_event());
        state.forget_session();
        assert_eq!(state.handshake(&config())["op"], 2);
        // The resume URL is still the better place to reconnect to.
        assert!(state.connect_url().starts_with("wss://resume.discord.gg"));
    }

    #[test]
    fn resume_url_with_query_gets_params_appended() {
        let state = SessionState {
            resume_url: Some("wss://r.example/?compress=none".into()),
            ..Default::default()
        };
        assert_eq!(state.connect_url(), "wss://r.example/?compress=none&v=10&encoding=json");
    }

    #[test]
    fn close_codes() {
        assert_eq!(classify_close(4004), Disconnect::Fatal);
        for code in 4010..=4014 {
            assert_eq!(classify_close(code), Disconnect::Fatal);
        }
        assert_eq!(classify_close(4007), Disconnect::Reidentify);
        assert_eq!(classify_close(4009), Disconnect::Reidentify);
        assert_eq!(classify_close(1000), Disconnect::Resume);
        assert_eq!(classify_close(4000), Disconnect::Resume);
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        for attempt in 0..20 {
            let delay = backoff_delay(attempt);
            assert!(delay >= Duration::from_millis(750), "attempt {attempt}: {delay:?}");
            assert!(delay <= Duration::from_secs(60), "attempt {attempt}: {delay:?}");
        }
        assert!(backoff_delay(1) < Duration::from_millis(2500));
    }
}
