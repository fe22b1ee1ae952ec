//! Messaging Socket: a single namespace-scoped connection (C8).
//!
//! Grounded on `socketio/socket.py`'s `Socket` class: `emit`/`send`, the
//! `on_packet` dispatch table over EVENT/BINARY_EVENT/ACK/BINARY_ACK/
//! DISCONNECT/ERROR, `join`/`leave`/`leave_all`, and `ack()`'s one-shot
//! callback semantics (a registered ack id fires its callback at most once,
//! with the incoming ack's arguments passed through verbatim).

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::Value as JsonValue;
use tokio::sync::oneshot;

use crate::engine::packet::{EnginePacket, EnginePacketType};
use crate::engine::session::EngineSession;
use crate::error::MessagingError;
use crate::messaging::dispatcher::EventDispatcher;
use crate::messaging::namespace::Namespace;
use crate::messaging::packet::{extract_attachments, SocketPacket};

/// Event names the protocol reserves; app code may not register a handler
/// for, or emit, one of these as an ordinary message. These are the
/// `events` named in `socketio/socket.py`, not the camelCase
/// `EventEmitter`-internal names.
pub const RESERVED_EVENTS: &[&str] = &["error", "connect", "disconnect", "new_listener", "remove_listener"];

pub fn is_reserved_event(name: &str) -> bool {
    RESERVED_EVENTS.contains(&name)
}

/// Delivered to an app-registered event listener when the inbound packet
/// carried an ack id: calling `ack.send(args)` replies to the peer. A second
/// call is a no-op (§4.8, testable property #7: any ack fires at most once).
#[derive(Clone)]
pub struct AckResponder {
    socket: Weak<MessagingSocket>,
    ack_id: u32,
    fired: Arc<AtomicBool>,
}

impl AckResponder {
    pub fn send(&self, args: Vec<JsonValue>) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(socket) = self.socket.upgrade() {
            let ack_id = self.ack_id;
            tokio::spawn(async move {
                socket.send_ack(ack_id, args).await;
            });
        }
    }
}

#[derive(Clone)]
pub struct IncomingEvent {
    pub args: Vec<JsonValue>,
    pub ack: Option<AckResponder>,
}

pub type SocketDispatcher = EventDispatcher<String, IncomingEvent>;

pub const EV_DISCONNECT: &str = "disconnect";

#[derive(Clone)]
pub struct DisconnectEvent {
    pub reason: String,
}

pub type LifecycleDispatcher = EventDispatcher<&'static str, DisconnectEvent>;

pub struct MessagingSocket {
    pub id: String,
    pub namespace_name: String,
    engine_session: Arc<EngineSession>,
    namespace: Weak<Namespace>,
    events: SocketDispatcher,
    lifecycle: LifecycleDispatcher,
    next_ack_id: AtomicU32,
    pending_acks: Mutex<std::collections::HashMap<u32, oneshot::Sender<Vec<JsonValue>>>>,
    connected: std::sync::atomic::AtomicBool,
    flags: Mutex<HashSet<&'static str>>,
}

impl MessagingSocket {
    pub fn new(id: String, namespace: &Arc<Namespace>, engine_session: Arc<EngineSession>) -> Arc<Self> {
        Arc::new(Self {
            id,
            namespace_name: namespace.name.clone(),
            engine_session,
            namespace: Arc::downgrade(namespace),
            events: SocketDispatcher::new(),
            lifecycle: LifecycleDispatcher::new(),
            next_ack_id: AtomicU32::new(1),
            pending_acks: Mutex::new(std::collections::HashMap::new()),
            connected: std::sync::atomic::AtomicBool::new(true),
            flags: Mutex::new(HashSet::new()),
        })
    }

    /// Set a transient per-emit flag (`"volatile"`, `"broadcast"`, `"json"`),
    /// cleared the next time [`emit`](Self::emit) or
    /// [`emit_with_ack`](Self::emit_with_ack) runs. Only `"broadcast"` has an
    /// effect here: it routes the next `emit` to every other socket in the
    /// namespace instead of unicasting to this one. `"volatile"` and
    /// `"json"` are accepted so the API surface matches but do not change
    /// behavior.
    pub fn flag(&self, name: &'static str) -> &Self {
        self.flags.lock().unwrap().insert(name);
        self
    }

    fn take_flags(&self) -> HashSet<&'static str> {
        std::mem::take(&mut *self.flags.lock().unwrap())
    }

    /// Sugar for `emit("message", args)`.
    pub async fn send(&self, args: Vec<JsonValue>) -> Result<(), MessagingError> {
        self.emit("message", args).await
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn namespace(&self) -> Option<Arc<Namespace>> {
        self.namespace.upgrade()
    }

    /// Register an app event handler. Panics are not allowed to propagate
    /// out of a listener invocation; see `EventDispatcher::emit`.
    pub fn on(&self, event: impl Into<String>, f: impl Fn(&IncomingEvent) + Send + Sync + 'static) {
        let event = event.into();
        if is_reserved_event(&event) {
            tracing::warn!(event = %event, "refusing to register a handler for a reserved event name");
            return;
        }
        self.events.on(event, f);
    }

    pub fn on_disconnect(&self, f: impl Fn(&DisconnectEvent) + Send + Sync + 'static) {
        self.lifecycle.on(EV_DISCONNECT, f);
    }

    pub fn join(&self, room: impl AsRef<str>) {
        if let Some(ns) = self.namespace() {
            ns.adapter().add(&self.id, room.as_ref());
        }
    }

    pub fn leave(&self, room: impl AsRef<str>) {
        if let Some(ns) = self.namespace() {
            ns.adapter().remove(&self.id, room.as_ref());
        }
    }

    pub fn leave_all(&self) {
        if let Some(ns) = self.namespace() {
            ns.adapter().remove_all(&self.id);
        }
    }

    pub fn rooms(&self) -> HashSet<String> {
        self.namespace().map(|ns| ns.adapter().socket_rooms(&self.id)).unwrap_or_default()
    }

    /// The namespace this socket belongs to, for `ns.to(room).except(id).emit(...)`
    /// broadcasts that should exclude this socket (`socket.to(room)` in the
    /// original API). `MessagingSocket` only holds a weak reference, so
    /// broadcasting goes through the strong `Arc<Namespace>` directly rather
    /// than through a borrow-returning method here.
    pub fn namespace_handle(&self) -> Option<Arc<Namespace>> {
        self.namespace()
    }

    /// Send a pre-encoded Socket.IO header, plus its binary attachments (if
    /// any), as the header's Engine `message` packet followed by one binary
    /// `message` packet per attachment, in order (spec §4.2 step 4). Used by
    /// `Namespace::broadcast` so a multi-recipient emit encodes its JSON
    /// exactly once.
    pub async fn send_preencoded(&self, header: String, attachments: Vec<Vec<u8>>) {
        let mut packets = Vec::with_capacity(1 + attachments.len());
        packets.push(EnginePacket::text(EnginePacketType::Message, header));
        packets.extend(
            attachments
                .into_iter()
                .map(|bytes| EnginePacket::binary(EnginePacketType::Message, bytes)),
        );
        self.engine_session.send_packets(packets).await;
    }

    /// Unicast an event to this socket with no ack expected, unless the
    /// `"broadcast"` flag is set (via [`flag`](Self::flag)), in which case it
    /// is sent to every other socket in the namespace instead. A reserved
    /// event name notifies only local listeners; no packet is sent (§4.8).
    pub async fn emit(&self, event: &str, args: Vec<JsonValue>) -> Result<(), MessagingError> {
        if is_reserved_event(event) {
            self.take_flags();
            self.events.emit(event, &IncomingEvent { args, ack: None });
            return Ok(());
        }
        let (args, attachments) = extract_attachments(args);
        if self.take_flags().contains("broadcast") {
            if let Some(ns) = self.namespace() {
                let except = [self.id.clone()].into_iter().collect();
                ns.broadcast(&[], &except, event, args).await;
            }
            return Ok(());
        }
        let packet = SocketPacket::event(&self.namespace_name, event, args, attachments);
        self.send_preencoded(packet.encode_header(), packet.attachments).await;
        Ok(())
    }

    /// Unicast an event and await the peer's ack, or time out. A reserved
    /// event name notifies only local listeners and resolves immediately
    /// with no arguments, since no packet (and so no peer ack) exists for it.
    pub async fn emit_with_ack(
        &self,
        event: &str,
        args: Vec<JsonValue>,
        timeout: Duration,
    ) -> Result<Vec<JsonValue>, MessagingError> {
        if is_reserved_event(event) {
            self.take_flags();
            self.events.emit(event, &IncomingEvent { args, ack: None });
            return Ok(Vec::new());
        }
        self.take_flags(); // broadcast has no meaning with a single awaited ack
        let (args, attachments) = extract_attachments(args);
        let ack_id = self.next_ack_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending_acks.lock().unwrap().insert(ack_id, tx);

        let packet = SocketPacket::event_with_ack(&self.namespace_name, event, args, attachments, ack_id);
        self.send_preencoded(packet.encode_header(), packet.attachments).await;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(args)) => Ok(args),
            Ok(Err(_)) | Err(_) => {
                self.pending_acks.lock().unwrap().remove(&ack_id);
                Err(MessagingError::BadAckId(ack_id))
            }
        }
    }

    async fn send_ack(&self, ack_id: u32, args: Vec<JsonValue>) {
        let (args, attachments) = extract_attachments(args);
        let packet = SocketPacket::ack(&self.namespace_name, ack_id, args, attachments);
        self.send_preencoded(packet.encode_header(), packet.attachments).await;
    }

    /// Dispatch a fully decoded inbound packet (after any binary
    /// reconstruction has completed).
    pub async fn on_packet(self: &Arc<Self>, packet: SocketPacket) {
        use crate::messaging::packet::SocketPacketType::*;
        match packet.packet_type {
            Event | BinaryEvent => {
                if let Some((name, args)) = packet.as_event() {
                    if is_reserved_event(&name) {
                        tracing::debug!(event = %name, "ignoring inbound reserved event name");
                        return;
                    }
                    let ack = packet.id.map(|ack_id| AckResponder {
                        socket: Arc::downgrade(self),
                        ack_id,
                        fired: Arc::new(AtomicBool::new(false)),
                    });
                    self.events.emit(&name, &IncomingEvent { args, ack });
                }
            }
            Ack | BinaryAck => {
                if let Some(id) = packet.id {
                    if let Some(tx) = self.pending_acks.lock().unwrap().remove(&id) {
                        let _ = tx.send(packet.as_ack_args().unwrap_or_default());
                    }
                }
            }
            Disconnect => {
                self.disconnect("client namespace disconnect").await;
            }
            ConnectError => {
                tracing::warn!(sid = %self.id, "received connect_error packet");
            }
            Connect => {}
        }
    }

    /// Tear the socket down: leave every room, detach from the namespace,
    /// and notify local `disconnect` listeners. Idempotent.
    pub async fn disconnect(self: &Arc<Self>, reason: impl Into<String>) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        self.leave_all();
        if let Some(ns) = self.namespace() {
            ns.unregister(&self.id);
        }
        self.lifecycle.emit(
            &EV_DISCONNECT,
            &DisconnectEvent {
                reason: reason.into(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::session::{EngineSession, SessionConfig};
    use crate::engine::transport::polling::PollingTransport;

    fn test_session(sid: &str) -> Arc<EngineSession> {
        let transport = Arc::new(PollingTransport::new(true));
        EngineSession::create(sid.to_string(), transport, SessionConfig::default(), vec![])
    }

    #[tokio::test(start_paused = true)]
    async fn emit_of_reserved_event_notifies_local_listeners_without_a_wire_packet() {
        let ns = Namespace::new("/chat");
        let socket = MessagingSocket::new("s1".into(), &ns, test_session("s1"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        // bypass the public `on`, which itself refuses reserved names, to
        // observe that `emit` still reaches a listener registered this way.
        socket.events.on("disconnect".to_string(), move |ev: &IncomingEvent| {
            seen2.lock().unwrap().push(ev.args.clone());
        });
        socket.emit("disconnect", vec![serde_json::json!("bye")]).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![vec![serde_json::json!("bye")]]);
    }

    #[tokio::test(start_paused = true)]
    async fn reserved_events_match_the_spec_literal_set() {
        assert_eq!(
            RESERVED_EVENTS,
            &["error", "connect", "disconnect", "new_listener", "remove_listener"]
        );
        assert!(is_reserved_event("new_listener"));
        assert!(!is_reserved_event("newListener"));
    }

    #[tokio::test(start_paused = true)]
    async fn broadcast_flag_routes_emit_to_the_rest_of_the_namespace() {
        let ns = Namespace::new("/chat");
        let s1 = MessagingSocket::new("s1".into(), &ns, test_session("s1"));
        let s2 = MessagingSocket::new("s2".into(), &ns, test_session("s2"));
        ns.register(s1.clone());
        ns.register(s2.clone());

        s1.flag("broadcast");
        s1.emit("ping", vec![]).await.unwrap();

        // s1 excludes itself; s2 is the only target. Flags are cleared after use.
        assert!(!s1.flags.lock().unwrap().contains("broadcast"));
    }

    #[tokio::test(start_paused = true)]
    async fn send_is_sugar_for_emit_message() {
        let ns = Namespace::new("/chat");
        let socket = MessagingSocket::new("s1".into(), &ns, test_session("s1"));
        socket.send(vec![serde_json::json!("hello")]).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn ack_responder_fires_at_most_once() {
        let responder = AckResponder {
            socket: Weak::new(),
            ack_id: 1,
            fired: Arc::new(AtomicBool::new(false)),
        };
        responder.send(vec![serde_json::json!("first")]);
        assert!(responder.fired.load(Ordering::SeqCst));
        // socket is a dangling Weak, so a second send is a further no-op
        // whether or not the socket is still alive; this only asserts the
        // latch itself doesn't reset.
        responder.send(vec![serde_json::json!("second")]);
        assert!(responder.fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn emit_with_embedded_bytes_switches_to_binary_event_and_sends_the_attachment_frame() {
        use crate::engine::packet::{decode_payload_binary, decode_payload_text, PacketData};
        use crate::engine::transport::polling::EncodedPayload;
        use crate::messaging::packet::bin_value;

        let ns = Namespace::new("/chat");
        let transport = Arc::new(PollingTransport::new(true));
        let session = EngineSession::create("s1".to_string(), transport.clone(), SessionConfig::default(), vec![]);
        let socket = MessagingSocket::new("s1".into(), &ns, session);

        socket
            .emit("evt", vec![serde_json::json!({"blob": bin_value(vec![1, 2])})])
            .await
            .unwrap();

        let packets = match transport.poll().await.unwrap() {
            EncodedPayload::Binary(bytes) => decode_payload_binary(&bytes).unwrap(),
            EncodedPayload::Text(s) => decode_payload_text(&s).unwrap(),
        };
        assert_eq!(packets.len(), 2);
        assert_eq!(
            packets[0].data.as_text().unwrap(),
            r#"51-["evt",{"blob":{"_placeholder":true,"num":0}}]"#
        );
        assert_eq!(packets[1].data, PacketData::Binary(vec![1, 2]));
    }
}
