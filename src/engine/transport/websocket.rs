//! WebSocket transport, server role (C4).
//!
//! Wired the same way `websocket_chat_handler` wires `actix-ws`
//! (`src/websocket_chat.rs`): `actix_ws::handle` splits the upgraded
//! connection into a `Session` write handle and a `MessageStream`; a
//! spawned task drains the stream and republishes each frame through this
//! transport's [`TransportDispatcher`], mirroring that handler's
//! `actix_web::rt::spawn` read loop.

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::Mutex as AsyncMutex;

use crate::engine::packet::{EnginePacket, PacketData};
use crate::error::EngineError;

use super::{Transport, TransportDispatcher, TransportEvent, TransportState, EV_CLOSE, EV_ERROR, EV_PACKET};

pub struct WebSocketTransport {
    session: AsyncMutex<actix_ws::Session>,
    state: std::sync::Mutex<TransportState>,
    events: TransportDispatcher,
}

impl WebSocketTransport {
    pub fn new(session: actix_ws::Session) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            session: AsyncMutex::new(session),
            state: std::sync::Mutex::new(TransportState::Open),
            events: TransportDispatcher::new(),
        })
    }

    /// Spawn the read loop over `msg_stream`, feeding decoded packets into
    /// this transport's `packet`/`close`/`error` events. Returns immediately;
    /// the loop runs until the stream ends or a close frame arrives.
    pub fn spawn_reader(
        self: &std::sync::Arc<Self>,
        mut msg_stream: actix_ws::MessageStream,
    ) {
        let this = self.clone();
        actix_web::rt::spawn(async move {
            while let Some(frame) = msg_stream.next().await {
                match frame {
                    Ok(actix_ws::Message::Text(text)) => {
                        match EnginePacket::decode_text(&text) {
                            Ok(packet) => this.events.emit(&EV_PACKET, &TransportEvent::Packet(packet)),
                            Err(e) => {
                                crate::diagnostics::report(crate::diagnostics::DiagnosticEvent::new(
                                    "engine_decode_error",
                                    e.to_string(),
                                ));
                                this.events.emit(&EV_ERROR, &TransportEvent::Error(e.to_string()));
                            }
                        }
                    }
                    Ok(actix_ws::Message::Binary(bytes)) => {
                        match EnginePacket::decode_binary(&bytes) {
                            Ok(packet) => this.events.emit(&EV_PACKET, &TransportEvent::Packet(packet)),
                            Err(e) => {
                                crate::diagnostics::report(crate::diagnostics::DiagnosticEvent::new(
                                    "engine_decode_error",
                                    e.to_string(),
                                ));
                                this.events.emit(&EV_ERROR, &TransportEvent::Error(e.to_string()));
                            }
                        }
                    }
                    Ok(actix_ws::Message::Ping(bytes)) => {
                        let mut session = this.session.lock().await;
                        let _ = session.pong(&bytes).await;
                    }
                    Ok(actix_ws::Message::Close(reason)) => {
                        tracing::debug!(?reason, "websocket transport got close frame");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        this.events.emit(&EV_ERROR, &TransportEvent::Error(e.to_string()));
                        break;
                    }
                }
            }
            *this.state.lock().unwrap() = TransportState::Closed;
            this.events.emit(&EV_CLOSE, &TransportEvent::Close);
        });
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn name(&self) -> &'static str {
        "websocket"
    }

    fn state(&self) -> TransportState {
        *self.state.lock().unwrap()
    }

    fn events(&self) -> &TransportDispatcher {
        &self.events
    }

    async fn send(&self, packets: Vec<EnginePacket>) -> Result<(), EngineError> {
        let mut session = self.session.lock().await;
        for packet in packets {
            let result = match &packet.data {
                PacketData::Binary(_) => session.binary(packet.encode_binary()).await,
                _ => session.text(packet.encode_text()).await,
            };
            if result.is_err() {
                return Err(EngineError::Transport("websocket send failed".into()));
            }
        }
        Ok(())
    }

    async fn close(&self) {
        *self.state.lock().unwrap() = TransportState::Closed;
        let mut session = self.session.lock().await;
        let _ = session.clone().close(None).await;
        self.events.emit(&EV_CLOSE, &TransportEvent::Close);
    }
}
