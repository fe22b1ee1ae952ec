//! Client-role Engine transport: long-polling over `reqwest`, or a
//! WebSocket over `tokio-tungstenite`, behind one small API.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex as AsyncMutex;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use url::Url;

use crate::engine::packet::{decode_payload_any, encode_payload_binary, EnginePacket, EnginePacketType, PacketData};
use crate::error::EngineError;
use crate::messaging::dispatcher::EventDispatcher;

#[derive(Debug, Clone)]
pub enum EngineClientEvent {
    Open,
    Message(PacketData),
    Close(String),
}

pub type ClientDispatcher = EventDispatcher<&'static str, EngineClientEvent>;

pub const EV_OPEN: &str = "open";
pub const EV_MESSAGE: &str = "message";
pub const EV_CLOSE: &str = "close";

enum Sink {
    Polling { http: reqwest::Client, base: Url },
    WebSocket(AsyncMutex<futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
        WsMessage,
    >>),
}

/// One connection to a remote Engine.IO server. Construct with
/// [`EngineClient::connect_polling`] or [`EngineClient::connect_websocket`];
/// both return a live, already-open client with a background task feeding
/// `message`/`close` events.
pub struct EngineClient {
    sid: std::sync::Mutex<String>,
    events: ClientDispatcher,
    sink: Sink,
}

fn transport_err(e: impl std::fmt::Display) -> EngineError {
    EngineError::Transport(e.to_string())
}

fn parse_open(packet: &EnginePacket) -> Result<String, EngineError> {
    let text = packet
        .data
        .as_text()
        .ok_or_else(|| EngineError::Malformed("open packet missing handshake body".into()))?;
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| EngineError::Malformed(format!("bad handshake json: {e}")))?;
    value
        .get("sid")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| EngineError::Malformed("handshake missing sid".into()))
}

impl EngineClient {
    /// Perform the handshake GET, then spawn a background task that keeps
    /// polling for as long as the session stays open.
    pub async fn connect_polling(base: Url) -> Result<Arc<Self>, EngineError> {
        let http = reqwest::Client::new();
        let resp = http
            .get(base.clone())
            .query(&[("EIO", "4"), ("transport", "polling")])
            .send()
            .await
            .map_err(transport_err)?;
        let body = resp.bytes().await.map_err(transport_err)?;
        let packets = decode_payload_any(&body, true)?;
        let open = packets
            .iter()
            .find(|p| p.packet_type == EnginePacketType::Open)
            .ok_or_else(|| EngineError::Malformed("handshake response missing open packet".into()))?;
        let sid = parse_open(open)?;

        let client = Arc::new(Self {
            sid: std::sync::Mutex::new(sid),
            events: ClientDispatcher::new(),
            sink: Sink::Polling { http, base },
        });
        client.events.emit(&EV_OPEN, &EngineClientEvent::Open);

        let driver = client.clone();
        tokio::spawn(async move { driver.poll_loop().await });
        Ok(client)
    }

    /// Connect directly over a WebSocket (no prior polling handshake).
    pub async fn connect_websocket(ws_url: Url) -> Result<Arc<Self>, EngineError> {
        let (stream, _response) = tokio_tungstenite::connect_async(ws_url.as_str())
            .await
            .map_err(transport_err)?;
        let (write, mut read) = stream.split();

        let first = read
            .next()
            .await
            .ok_or_else(|| EngineError::Transport("connection closed before handshake".into()))?
            .map_err(transport_err)?;
        let open_packet = match first {
            WsMessage::Text(text) => EnginePacket::decode_text(&text)?,
            WsMessage::Binary(bytes) => EnginePacket::decode_binary(&bytes)?,
            _ => return Err(EngineError::Malformed("unexpected first websocket frame".into())),
        };
        let sid = parse_open(&open_packet)?;

        let client = Arc::new(Self {
            sid: std::sync::Mutex::new(sid),
            events: ClientDispatcher::new(),
            sink: Sink::WebSocket(AsyncMutex::new(write)),
        });
        client.events.emit(&EV_OPEN, &EngineClientEvent::Open);

        let driver = client.clone();
        tokio::spawn(async move { driver.read_loop(read).await });
        Ok(client)
    }

    pub fn sid(&self) -> String {
        self.sid.lock().unwrap().clone()
    }

    pub fn events(&self) -> &ClientDispatcher {
        &self.events
    }

    pub async fn send(&self, packet: EnginePacket) -> Result<(), EngineError> {
        match &self.sink {
            Sink::Polling { http, base } => {
                let body = encode_payload_binary(std::slice::from_ref(&packet));
                http.post(base.clone())
                    .query(&[("transport", "polling"), ("sid", self.sid().as_str())])
                    .body(body)
                    .send()
                    .await
                    .map_err(transport_err)?;
                Ok(())
            }
            Sink::WebSocket(write) => {
                let mut write = write.lock().await;
                let frame = match &packet.data {
                    PacketData::Binary(_) => WsMessage::Binary(packet.encode_binary().into()),
                    _ => WsMessage::Text(packet.encode_text().into()),
                };
                write.send(frame).await.map_err(transport_err)?;
                Ok(())
            }
        }
    }

    async fn poll_loop(self: Arc<Self>) {
        let Sink::Polling { http, base } = &self.sink else { return };
        loop {
            let resp = http
                .get(base.clone())
                .query(&[("transport", "polling"), ("sid", &self.sid())])
                .send()
                .await;
            let body = match resp {
                Ok(r) if r.status().is_success() => r.bytes().await,
                _ => break,
            };
            let Ok(body) = body else { break };
            let Ok(packets) = decode_payload_any(&body, true) else { break };
            let mut closed = false;
            for packet in packets {
                match packet.packet_type {
                    EnginePacketType::Message => {
                        self.events.emit(&EV_MESSAGE, &EngineClientEvent::Message(packet.data));
                    }
                    EnginePacketType::Close => closed = true,
                    EnginePacketType::Noop => {}
                    _ => {}
                }
            }
            if closed {
                break;
            }
        }
        self.events
            .emit(&EV_CLOSE, &EngineClientEvent::Close("transport closed".to_string()));
    }

    async fn read_loop(
        self: Arc<Self>,
        mut read: futures_util::stream::SplitStream<
            tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
        >,
    ) {
        while let Some(frame) = read.next().await {
            let packet = match frame {
                Ok(WsMessage::Text(text)) => EnginePacket::decode_text(&text).ok(),
                Ok(WsMessage::Binary(bytes)) => EnginePacket::decode_binary(&bytes).ok(),
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => None,
                Err(_) => break,
            };
            if let Some(packet) = packet {
                match packet.packet_type {
                    EnginePacketType::Message => {
                        self.events.emit(&EV_MESSAGE, &EngineClientEvent::Message(packet.data));
                    }
                    EnginePacketType::Close => break,
                    _ => {}
                }
            }
        }
        self.events
            .emit(&EV_CLOSE, &EngineClientEvent::Close("transport closed".to_string()));
    }
}

/// Linear backoff policy for reconnection attempts, grounded on
/// `Client._reconnect_task`'s use of a growing delay capped at a ceiling.
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// `min(attempts * reconnectDelay, reconnectDelayMax)` per spec §4.9 —
    /// linear backoff, not exponential. `attempt` is the 1-based count of
    /// attempts made so far.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.base.as_millis().saturating_mul(attempt.max(1) as u128);
        Duration::from_millis(scaled.min(self.max.as_millis()) as u64)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_attempts.map(|m| attempt < m).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_linearly_and_caps() {
        let policy = ReconnectPolicy {
            base: Duration::from_millis(100),
            max: Duration::from_secs(2),
            max_attempts: None,
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(100), Duration::from_secs(2));
    }

    #[test]
    fn should_retry_respects_max_attempts() {
        let policy = ReconnectPolicy {
            max_attempts: Some(3),
            ..ReconnectPolicy::default()
        };
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }
}
