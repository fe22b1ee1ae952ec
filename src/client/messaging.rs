//! Client-role Messaging: connect to a namespace over an [`EngineClient`]
//! and exchange events, mirroring `socketio/client.py`'s namespace
//! bookkeeping from the initiating side rather than the accepting side.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value as JsonValue;
use tokio::sync::oneshot;

use crate::client::engine::{EngineClient, EngineClientEvent, EV_CLOSE, EV_MESSAGE};
use crate::engine::packet::{EnginePacket, EnginePacketType, PacketData};
use crate::error::MessagingError;
use crate::messaging::dispatcher::EventDispatcher;
use crate::messaging::packet::{BinaryReconstructor, SocketPacket, SocketPacketType};

#[derive(Clone)]
pub struct ClientIncomingEvent {
    pub args: Vec<JsonValue>,
}

pub type ClientEventDispatcher = EventDispatcher<String, ClientIncomingEvent>;

/// A connection to a single namespace on a remote server.
pub struct MessagingClientHandle {
    namespace: String,
    engine: Arc<EngineClient>,
    events: ClientEventDispatcher,
    next_ack_id: std::sync::atomic::AtomicU32,
    pending_acks: Mutex<HashMap<u32, oneshot::Sender<Vec<JsonValue>>>>,
    reconstructor: Mutex<BinaryReconstructor>,
}

impl MessagingClientHandle {
    /// Send `CONNECT` for `namespace` over an already-open [`EngineClient`]
    /// and start routing inbound packets addressed to it.
    pub async fn connect(engine: Arc<EngineClient>, namespace: &str) -> Arc<Self> {
        let handle = Arc::new(Self {
            namespace: namespace.to_string(),
            engine: engine.clone(),
            events: ClientEventDispatcher::new(),
            next_ack_id: std::sync::atomic::AtomicU32::new(1),
            pending_acks: Mutex::new(HashMap::new()),
            reconstructor: Mutex::new(BinaryReconstructor::new()),
        });

        let driver = handle.clone();
        engine.events().on(EV_MESSAGE, move |ev: &EngineClientEvent| {
            if let EngineClientEvent::Message(data) = ev {
                let driver = driver.clone();
                let data = data.clone();
                tokio::spawn(async move { driver.on_engine_message(data).await });
            }
        });
        engine.events().on(EV_CLOSE, {
            let driver = handle.clone();
            move |_: &EngineClientEvent| {
                driver.events.emit(
                    &"disconnect".to_string(),
                    &ClientIncomingEvent { args: vec![] },
                );
            }
        });

        let connect = SocketPacket::connect_request(namespace, None);
        let _ = engine
            .send(EnginePacket::text(EnginePacketType::Message, connect.encode_header()))
            .await;

        handle
    }

    pub fn on(&self, event: impl Into<String>, f: impl Fn(&ClientIncomingEvent) + Send + Sync + 'static) {
        self.events.on(event.into(), f);
    }

    pub async fn emit(&self, event: &str, args: Vec<JsonValue>) -> Result<(), MessagingError> {
        let packet = SocketPacket::event(&self.namespace, event, args, Vec::new());
        self.engine
            .send(EnginePacket::text(EnginePacketType::Message, packet.encode_header()))
            .await?;
        Ok(())
    }

    pub async fn emit_with_ack(
        &self,
        event: &str,
        args: Vec<JsonValue>,
        timeout: Duration,
    ) -> Result<Vec<JsonValue>, MessagingError> {
        let ack_id = self.next_ack_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending_acks.lock().unwrap().insert(ack_id, tx);

        let packet = SocketPacket::event_with_ack(&self.namespace, event, args, Vec::new(), ack_id);
        self.engine
            .send(EnginePacket::text(EnginePacketType::Message, packet.encode_header()))
            .await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(args)) => Ok(args),
            _ => {
                self.pending_acks.lock().unwrap().remove(&ack_id);
                Err(MessagingError::BadAckId(ack_id))
            }
        }
    }

    async fn on_engine_message(self: Arc<Self>, data: PacketData) {
        let completed = {
            let mut reconstructor = self.reconstructor.lock().unwrap();
            match data {
                PacketData::Text(s) => reconstructor.take_header(&s).unwrap_or(None),
                PacketData::Binary(bytes) => reconstructor.take_attachment(bytes),
                PacketData::None => None,
            }
        };
        let Some(packet) = completed else { return };
        if packet.namespace != self.namespace {
            return;
        }
        match packet.packet_type {
            SocketPacketType::Event | SocketPacketType::BinaryEvent => {
                if let Some((name, args)) = packet.as_event() {
                    self.events.emit(&name, &ClientIncomingEvent { args });
                }
            }
            SocketPacketType::Ack | SocketPacketType::BinaryAck => {
                if let Some(id) = packet.id {
                    if let Some(tx) = self.pending_acks.lock().unwrap().remove(&id) {
                        let _ = tx.send(packet.as_ack_args().unwrap_or_default());
                    }
                }
            }
            _ => {}
        }
    }
}
