//! Messaging Client: the per-connection multiplexer over one Engine session (C6).
//!
//! Grounded on `socketio/client.py`'s `Client`: one object per Engine
//! connection, holding a socket per namespace the peer has `CONNECT`ed to,
//! routing each decoded packet to the right namespace's socket, and
//! `on_data`/`on_decoded`'s job of feeding the binary reconstruction state
//! machine before dispatch. Subscribes to its `EngineSession`'s `message`
//! and `close` events with one owner key so teardown on disconnect is O(1)
//! (`remove_by_owner`), mirroring the original's listener cleanup on
//! `_handle_eio_disconnect`.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::engine::packet::{EnginePacket, EnginePacketType, PacketData};
use crate::engine::session::{EngineSession, SessionEvent, EV_SESSION_CLOSE, EV_SESSION_MESSAGE};
use crate::messaging::dispatcher::new_owner_key;
use crate::messaging::namespace::Namespace;
use crate::messaging::packet::{BinaryReconstructor, SocketPacket, SocketPacketType};
use crate::messaging::server::MessagingServer;
use crate::messaging::socket::MessagingSocket;

pub struct MessagingClient {
    engine_session: Arc<EngineSession>,
    server: Arc<MessagingServer>,
    sockets: Mutex<HashMap<String, Arc<MessagingSocket>>>,
    /// Namespace `CONNECT` packets requesting a non-root namespace, received
    /// before the client's own `CONNECT` to `"/"` has completed. Drained in
    /// arrival order once the root socket is registered.
    connect_buffer: Mutex<Vec<SocketPacket>>,
    root_connected: std::sync::atomic::AtomicBool,
}

impl MessagingClient {
    /// Wire a client onto `engine_session` and spawn its driving task.
    /// Returns immediately; inbound packets and teardown are handled async.
    pub fn attach(engine_session: Arc<EngineSession>, server: Arc<MessagingServer>) -> Arc<Self> {
        let owner_key = new_owner_key();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<SessionEvent>();

        let client = Arc::new(Self {
            engine_session: engine_session.clone(),
            server,
            sockets: Mutex::new(HashMap::new()),
            connect_buffer: Mutex::new(Vec::new()),
            root_connected: std::sync::atomic::AtomicBool::new(false),
        });

        engine_session.events().on_owned(EV_SESSION_MESSAGE, owner_key, {
            let tx = tx.clone();
            move |ev: &SessionEvent| {
                let _ = tx.send(ev.clone());
            }
        });
        engine_session.events().on_owned(EV_SESSION_CLOSE, owner_key, {
            let tx = tx.clone();
            move |ev: &SessionEvent| {
                let _ = tx.send(ev.clone());
            }
        });

        let driver = client.clone();
        tokio::spawn(async move { driver.run(rx).await });
        client
    }

    async fn run(self: Arc<Self>, mut rx: tokio::sync::mpsc::UnboundedReceiver<SessionEvent>) {
        let mut reconstructor = BinaryReconstructor::new();
        while let Some(ev) = rx.recv().await {
            match ev {
                SessionEvent::Message(data) => {
                    let completed = match data {
                        PacketData::Text(s) => reconstructor.take_header(&s).unwrap_or_else(|e| {
                            crate::diagnostics::report(crate::diagnostics::DiagnosticEvent::new(
                                "messaging_decode_error",
                                e.to_string(),
                            ));
                            None
                        }),
                        PacketData::Binary(bytes) => reconstructor.take_attachment(bytes),
                        PacketData::None => None,
                    };
                    if let Some(packet) = completed {
                        self.route(packet).await;
                    }
                }
                SessionEvent::Close(reason) => {
                    self.teardown(reason).await;
                    break;
                }
                SessionEvent::Open => {}
            }
        }
    }

    async fn route(self: &Arc<Self>, packet: SocketPacket) {
        if packet.packet_type == SocketPacketType::Connect {
            self.connect(packet).await;
            return;
        }
        let socket = self.sockets.lock().unwrap().get(&packet.namespace).cloned();
        match socket {
            Some(socket) => socket.on_packet(packet).await,
            None => {
                tracing::debug!(namespace = %packet.namespace, "packet for a namespace with no connected socket");
            }
        }
    }

    /// `connect(name)` policy (spec §4.6): reject an undeclared namespace,
    /// buffer a non-root connect until `"/"` itself has connected, otherwise
    /// register the socket immediately and drain anything buffered behind it.
    async fn connect(self: &Arc<Self>, packet: SocketPacket) {
        if packet.namespace != "/" && !self.root_connected.load(Ordering::SeqCst) {
            self.connect_buffer.lock().unwrap().push(packet);
            return;
        }
        self.handle_connect(packet).await;
    }

    async fn handle_connect(self: &Arc<Self>, packet: SocketPacket) {
        let namespace: Option<Arc<Namespace>> = self.server.try_of(&packet.namespace);
        let Some(namespace) = namespace else {
            tracing::debug!(namespace = %packet.namespace, "connect to an undeclared namespace");
            let error = SocketPacket::connect_error(&packet.namespace, "Invalid namespace");
            self.engine_session
                .send_packet(EnginePacket::text(EnginePacketType::Message, error.encode_header()))
                .await;
            return;
        };

        let socket_id = Uuid::new_v4().to_string();
        let socket = MessagingSocket::new(socket_id.clone(), &namespace, self.engine_session.clone());
        namespace.register(socket.clone());
        self.sockets
            .lock()
            .unwrap()
            .insert(packet.namespace.clone(), socket.clone());

        let reply = SocketPacket::connect(&packet.namespace, Some(&socket_id));
        self.engine_session
            .send_packet(EnginePacket::text(EnginePacketType::Message, reply.encode_header()))
            .await;

        if packet.namespace == "/" && !self.root_connected.swap(true, Ordering::SeqCst) {
            let buffered = std::mem::take(&mut *self.connect_buffer.lock().unwrap());
            for buffered_packet in buffered {
                Box::pin(self.connect(buffered_packet)).await;
            }
        }
    }

    async fn teardown(self: &Arc<Self>, reason: String) {
        let sockets: Vec<Arc<MessagingSocket>> = self.sockets.lock().unwrap().values().cloned().collect();
        for socket in sockets {
            socket.disconnect(reason.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::session::SessionConfig;
    use crate::engine::transport::polling::{EncodedPayload, PollingTransport};

    async fn post_connect(transport: &Arc<PollingTransport>, namespace: &str) {
        let connect = SocketPacket::connect_request(namespace, None);
        let engine_packet = EnginePacket::text(EnginePacketType::Message, connect.encode_header());
        transport
            .on_post(crate::engine::packet::encode_payload_text(&[engine_packet]).as_bytes())
            .unwrap();
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
    }

    fn decode_poll(payload: EncodedPayload) -> Vec<EnginePacket> {
        match payload {
            EncodedPayload::Binary(bytes) => crate::engine::packet::decode_payload_binary(&bytes).unwrap(),
            EncodedPayload::Text(s) => crate::engine::packet::decode_payload_text(&s).unwrap(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn connect_packet_creates_namespace_socket_and_replies() {
        let transport = Arc::new(PollingTransport::new(true));
        let session = EngineSession::create(
            "sid1".into(),
            transport.clone(),
            SessionConfig::default(),
            vec![],
        );
        session.open().await;
        let _ = transport.poll().await.unwrap(); // drain the handshake

        let server = MessagingServer::new();
        server.of("/chat");
        let _client = MessagingClient::attach(session.clone(), server.clone());

        post_connect(&transport, "/").await;
        let _ = transport.poll().await.unwrap(); // drain the "/" connect ack
        post_connect(&transport, "/chat").await;

        let reply = decode_poll(transport.poll().await.unwrap());
        let header = reply[0].data.as_text().unwrap();
        assert!(header.contains("/chat"));
        assert_eq!(server.of("/chat").connected_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_to_undeclared_namespace_gets_error_and_no_socket() {
        let transport = Arc::new(PollingTransport::new(true));
        let session = EngineSession::create(
            "sid3".into(),
            transport.clone(),
            SessionConfig::default(),
            vec![],
        );
        session.open().await;
        let _ = transport.poll().await.unwrap();

        let server = MessagingServer::new();
        let _client = MessagingClient::attach(session.clone(), server.clone());

        post_connect(&transport, "/").await;
        let _ = transport.poll().await.unwrap();
        post_connect(&transport, "/nope").await;

        let reply = decode_poll(transport.poll().await.unwrap());
        let header = reply[0].data.as_text().unwrap();
        assert!(header.starts_with("4/nope"));
        assert!(header.contains("Invalid namespace"));
        assert!(server.try_of("/nope").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_to_non_root_namespace_buffers_until_root_connects() {
        let transport = Arc::new(PollingTransport::new(true));
        let session = EngineSession::create(
            "sid4".into(),
            transport.clone(),
            SessionConfig::default(),
            vec![],
        );
        session.open().await;
        let _ = transport.poll().await.unwrap();

        let server = MessagingServer::new();
        server.of("/chat");
        let client = MessagingClient::attach(session.clone(), server.clone());

        post_connect(&transport, "/chat").await;
        // Buffered: no socket yet, nothing queued for delivery.
        assert_eq!(server.of("/chat").connected_count(), 0);
        assert_eq!(client.connect_buffer.lock().unwrap().len(), 1);

        post_connect(&transport, "/").await;
        // Draining the buffer replies to both "/" and "/chat" in one flush.
        let replies = decode_poll(transport.poll().await.unwrap());
        assert_eq!(replies.len(), 2);
        assert_eq!(server.of("/chat").connected_count(), 1);
        assert!(client.connect_buffer.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn session_close_tears_down_every_namespace_socket() {
        let transport = Arc::new(PollingTransport::new(true));
        let session = EngineSession::create(
            "sid2".into(),
            transport.clone(),
            SessionConfig::default(),
            vec![],
        );
        session.open().await;
        let _ = transport.poll().await.unwrap();

        let server = MessagingServer::new();
        let namespace = server.of("/chat");
        let socket = MessagingSocket::new("s1".into(), &namespace, session.clone());
        namespace.register(socket.clone());

        let client = MessagingClient::attach(session.clone(), server.clone());
        client.sockets.lock().unwrap().insert("/chat".to_string(), socket.clone());

        session.close().await;
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert!(!socket.is_connected());
        assert_eq!(namespace.connected_count(), 0);
    }
}
