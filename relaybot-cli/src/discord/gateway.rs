//! Discord gateway client.
//!
//! Keeps one WebSocket session alive, heartbeating at the interval the
//! server announces, and forwards the dispatch events the bot cares about
//! over an mpsc channel. Dropped sessions are re-identified with backoff.

use super::model::{DiscordInteraction, DiscordMessage, ReadyEvent};
use futures::{SinkExt, StreamExt};
use relaybot_core::error::PlatformError;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tracing::{debug, info, warn};

pub const GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

pub const INTENT_GUILDS: u64 = 1 << 0;
pub const INTENT_GUILD_MESSAGES: u64 = 1 << 9;
pub const INTENT_MESSAGE_CONTENT: u64 = 1 << 15;

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;
const OP_HEARTBEAT_ACK: u8 = 11;

/// Close codes after which reconnecting cannot help.
const FATAL_CLOSE_CODES: [u16; 6] = [4004, 4010, 4011, 4012, 4013, 4014];

const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Pause before opening a fresh session the server asked for.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Events forwarded to the bot.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    Ready(ReadyEvent),
    InteractionCreate(DiscordInteraction),
    MessageCreate(DiscordMessage),
}

#[derive(Debug, Deserialize)]
struct Payload {
    op: u8,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

/// How a session ended.
#[derive(Debug, PartialEq)]
enum SessionEnd {
    /// The server asked for, or the connection needs, a fresh session.
    Reconnect,
    /// Nobody listens for events any more.
    Finished,
}

pub struct Gateway {
    token: String,
    url: String,
    intents: u64,
    reconnect_delay: Duration,
}

impl Gateway {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            url: GATEWAY_URL.to_string(),
            intents: INTENT_GUILDS | INTENT_GUILD_MESSAGES | INTENT_MESSAGE_CONTENT,
            reconnect_delay: RECONNECT_DELAY,
        }
    }

    /// Run sessions until the receiver is dropped or the server rejects us.
    pub async fn run(self, events: mpsc::Sender<GatewayEvent>) -> Result<(), PlatformError> {
        let mut backoff = Duration::from_secs(1);
        loop {
            match self.session(&events).await {
                Ok(SessionEnd::Finished) => return Ok(()),
                Ok(SessionEnd::Reconnect) => {
                    backoff = Duration::from_secs(1);
                    info!(
                        delay_ms = self.reconnect_delay.as_millis() as u64,
                        "Gateway session ended, reconnecting"
                    );
                    tokio::time::sleep(self.reconnect_delay).await;
                }
                Err(e @ (PlatformError::AuthFailed | PlatformError::GatewayClosed { .. })) => {
                    return Err(e);
                }
                Err(e) => {
                    warn!(error = %e, backoff_secs = backoff.as_secs(), "Gateway session failed");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    fn identify(&self) -> Value {
        json!({
            "op": OP_IDENTIFY,
            "d": {
                "token": self.token,
                "intents": self.intents,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "relaybot",
                    "device": "relaybot",
                },
            },
        })
    }

    async fn session(&self, events: &mpsc::Sender<GatewayEvent>) -> Result<SessionEnd, PlatformError> {
        let (ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| gateway_error(format!("Connect failed: {e}")))?;
        debug!(url = %self.url, "Gateway connected");
        let (mut tx, mut rx) = ws.split();

        let heartbeat_ms = match rx.next().await {
            Some(Ok(Message::Text(text))) => hello_interval(&text)?,
            other => return Err(gateway_error(format!("Expected HELLO, got {other:?}"))),
        };
        tx.send(Message::Text(self.identify().to_string()))
            .await
            .map_err(|e| gateway_error(format!("IDENTIFY failed: {e}")))?;

        let period = Duration::from_millis(heartbeat_ms);
        let mut heartbeat = interval_at(Instant::now() + period, period);
        let mut sequence: Option<u64> = None;
        let mut acked = true;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    if !acked {
                        warn!("Heartbeat not acknowledged, dropping session");
                        return Ok(SessionEnd::Reconnect);
                    }
                    acked = false;
                    let beat = json!({ "op": OP_HEARTBEAT, "d": sequence });
                    tx.send(Message::Text(beat.to_string()))
                        .await
                        .map_err(|e| gateway_error(format!("Heartbeat failed: {e}")))?;
                }
                frame = rx.next() => {
                    let text = match frame {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(frame))) => return close_outcome(frame),
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Err(gateway_error(format!("Read failed: {e}"))),
                        None => return Ok(SessionEnd::Reconnect),
                    };
                    let payload: Payload = match serde_json::from_str(&text) {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!(error = %e, "Skipping malformed gateway payload");
                            continue;
                        }
                    };
                    if payload.s.is_some() {
                        sequence = payload.s;
                    }
                    match payload.op {
                        OP_DISPATCH => {
                            let Some(event) = payload.t.as_deref().and_then(|t| decode_dispatch(t, payload.d)) else {
                                continue;
                            };
                            if events.send(event).await.is_err() {
                                return Ok(SessionEnd::Finished);
                            }
                        }
                        OP_HEARTBEAT => {
                            let beat = json!({ "op": OP_HEARTBEAT, "d": sequence });
                            tx.send(Message::Text(beat.to_string()))
                                .await
                                .map_err(|e| gateway_error(format!("Heartbeat failed: {e}")))?;
                        }
                        OP_HEARTBEAT_ACK => acked = true,
                        OP_RECONNECT | OP_INVALID_SESSION => {
                            debug!(op = payload.op, "Server requested a new session");
                            return Ok(SessionEnd::Reconnect);
                        }
                        op => debug!(op, "Ignoring gateway opcode"),
                    }
                }
            }
        }
    }
}

fn gateway_error(message: String) -> PlatformError {
    PlatformError::Gateway { message }
}

fn hello_interval(text: &str) -> Result<u64, PlatformError> {
    let payload: Payload = serde_json::from_str(text)
        .map_err(|e| gateway_error(format!("Malformed HELLO: {e}")))?;
    if payload.op != OP_HELLO {
        return Err(gateway_error(format!("Expected HELLO, got op {}", payload.op)));
    }
    payload
        .d
        .get("heartbeat_interval")
        .and_then(Value::as_u64)
        .ok_or_else(|| gateway_error("HELLO without heartbeat_interval".to_string()))
}

fn close_outcome(frame: Option<CloseFrame<'_>>) -> Result<SessionEnd, PlatformError> {
    let Some(frame) = frame else {
        return Ok(SessionEnd::Reconnect);
    };
    let code = u16::from(frame.code);
    if code == 4004 {
        return Err(PlatformError::AuthFailed);
    }
    if FATAL_CLOSE_CODES.contains(&code) {
        return Err(PlatformError::GatewayClosed {
            code,
            reason: frame.reason.to_string(),
        });
    }
    warn!(code, reason = %frame.reason, "Gateway closed the connection");
    Ok(SessionEnd::Reconnect)
}

/// Turn a dispatch payload into an event, skipping the ones we do not use.
fn decode_dispatch(event: &str, data: Value) -> Option<GatewayEvent> {
    let decoded = match event {
        "READY" => serde_json::from_value(data).map(GatewayEvent::Ready),
        "INTERACTION_CREATE" => serde_json::from_value(data).map(GatewayEvent::InteractionCreate),
        "MESSAGE_CREATE" => serde_json::from_value(data).map(GatewayEvent::MessageCreate),
        _ => return None,
    };
    decoded
        .map_err(|e| warn!(event, error = %e, "Cannot decode gateway event"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    const HELLO: &str = r#"{"op":10,"d":{"heartbeat_interval":45000}}"#;

    /// How a scripted server session ends after IDENTIFY.
    enum Ending {
        Send(&'static str),
        Close(u16),
    }

    /// Serve one gateway session per ending, in order.
    async fn serve(listener: TcpListener, endings: Vec<Ending>) -> Vec<String> {
        let mut identifies = Vec::new();
        for ending in endings {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Text(HELLO.to_string())).await.unwrap();
            match ws.next().await {
                Some(Ok(Message::Text(text))) => identifies.push(text),
                other => panic!("Expected IDENTIFY, got {:?}", other),
            }
            match ending {
                Ending::Send(text) => ws.send(Message::Text(text.to_string())).await.unwrap(),
                Ending::Close(code) => ws
                    .close(Some(CloseFrame {
                        code: CloseCode::from(code),
                        reason: "Disallowed intents".into(),
                    }))
                    .await
                    .unwrap(),
            }
            while let Some(Ok(_)) = ws.next().await {}
        }
        identifies
    }

    async fn local_gateway(endings: Vec<Ending>) -> (Gateway, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve(listener, endings));
        let gateway = Gateway {
            url: format!("ws://{addr}"),
            reconnect_delay: Duration::from_millis(50),
            ..Gateway::new("token")
        };
        (gateway, server)
    }

    #[test]
    fn test_default_intents() {
        let gateway = Gateway::new("token");
        assert_eq!(gateway.intents, 33281);
        let identify = gateway.identify();
        assert_eq!(identify["op"], json!(2));
        assert_eq!(identify["d"]["token"], json!("token"));
    }

    #[test]
    fn test_hello_interval() {
        assert_eq!(
            hello_interval(r#"{"op":10,"d":{"heartbeat_interval":41250}}"#).unwrap(),
            41250
        );
        assert!(hello_interval(r#"{"op":0,"d":{}}"#).is_err());
        assert!(hello_interval("not json").is_err());
    }

    #[test]
    fn test_decode_ready() {
        let event = decode_dispatch(
            "READY",
            json!({
                "v": 10,
                "user": {"id": "bot-1", "username": "relaybot", "bot": true},
                "application": {"id": "app-1", "flags": 0},
                "guilds": []
            }),
        );
        match event {
            Some(GatewayEvent::Ready(ready)) => {
                assert_eq!(ready.user.id, "bot-1");
                assert_eq!(ready.application.id, "app-1");
            }
            other => panic!("Expected Ready, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_skips_unknown_and_malformed_events() {
        assert!(decode_dispatch("TYPING_START", json!({})).is_none());
        assert!(decode_dispatch("MESSAGE_CREATE", json!({"id": 5})).is_none());
    }

    #[test]
    fn test_close_outcome() {
        assert_eq!(close_outcome(None).unwrap(), SessionEnd::Reconnect);
        let frame = |code: u16| CloseFrame {
            code: CloseCode::from(code),
            reason: "bye".into(),
        };
        assert!(matches!(close_outcome(Some(frame(4004))), Err(PlatformError::AuthFailed)));
        assert!(matches!(
            close_outcome(Some(frame(4014))),
            Err(PlatformError::GatewayClosed { code: 4014, .. })
        ));
        assert_eq!(close_outcome(Some(frame(4000))).unwrap(), SessionEnd::Reconnect);
    }

    #[tokio::test]
    async fn test_run_stops_on_disallowed_intents() {
        let (gateway, server) = local_gateway(vec![Ending::Close(4014)]).await;
        let (tx, _rx) = mpsc::channel(1);

        let result = tokio::time::timeout(Duration::from_secs(5), gateway.run(tx))
            .await
            .expect("run should stop instead of reconnecting");

        assert!(matches!(result, Err(PlatformError::GatewayClosed { code: 4014, .. })));
        assert_eq!(server.await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_waits_before_reconnecting() {
        let (gateway, server) = local_gateway(vec![
            Ending::Send(r#"{"op":7,"d":null}"#),
            Ending::Close(4014),
        ])
        .await;
        let delay = gateway.reconnect_delay;
        let (tx, _rx) = mpsc::channel(1);

        let started = Instant::now();
        let result = tokio::time::timeout(Duration::from_secs(5), gateway.run(tx))
            .await
            .unwrap();

        assert!(started.elapsed() >= delay);
        assert!(matches!(result, Err(PlatformError::GatewayClosed { .. })));
        assert_eq!(server.await.unwrap().len(), 2);
    }
}
