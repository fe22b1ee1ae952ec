//! HTTP long-polling transport, server role (C4).
//!
//! Grounded on `engine/socket.py`'s `flush`/`put_client_msg` (the write
//! buffer draining into `transport.send`) and, for pausing during upgrade,
//! `PollingTransport.pause` in `socketio_client/engine/transports.py`
//! (ported from client role to server role: here it's the server blocking
//! its own long-held GET response, not a client blocking outgoing XHRs).
//!
//! Since this crate's request handlers are plain async functions (an
//! actix-web GET handler `.await`s the next batch directly) rather than
//! callback-registering code, `pause(on_pause)` becomes a plain `async fn
//! pause(&self)` that resolves once paused — the idiomatic replacement for
//! a Python callback parameter noted in the module doc.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{oneshot, Notify};

use crate::engine::packet::{
    decode_payload_any, encode_payload_binary, encode_payload_text, EnginePacket, EnginePacketType,
};
use crate::error::EngineError;

use super::{Transport, TransportDispatcher, TransportEvent, TransportState, EV_CLOSE, EV_DRAIN, EV_PACKET};

/// A poll's encoded response body, tagged so the HTTP layer can pick the
/// right `Content-Type`.
pub enum EncodedPayload {
    Text(String),
    Binary(Vec<u8>),
}

pub struct PollingTransport {
    state: Mutex<TransportState>,
    supports_binary: bool,
    outbound: Mutex<Vec<EnginePacket>>,
    poll_waiter: Mutex<Option<oneshot::Sender<Vec<EnginePacket>>>>,
    poll_in_flight: AtomicBool,
    activity: Notify,
    events: TransportDispatcher,
}

impl PollingTransport {
    pub fn new(supports_binary: bool) -> Self {
        Self {
            state: Mutex::new(TransportState::Open),
            supports_binary,
            outbound: Mutex::new(Vec::new()),
            poll_waiter: Mutex::new(None),
            poll_in_flight: AtomicBool::new(false),
            activity: Notify::new(),
            events: TransportDispatcher::new(),
        }
    }

    pub fn supports_binary(&self) -> bool {
        self.supports_binary
    }

    fn encode(&self, packets: &[EnginePacket]) -> EncodedPayload {
        if self.supports_binary {
            EncodedPayload::Binary(encode_payload_binary(packets))
        } else {
            EncodedPayload::Text(encode_payload_text(packets))
        }
    }

    /// Serve one long-held GET. Resolves with the next batch of packets as
    /// soon as one is available (immediately, if the write buffer is
    /// already non-empty) or when the session closes.
    pub async fn poll(&self) -> Result<EncodedPayload, EngineError> {
        if *self.state.lock().unwrap() == TransportState::Closed {
            return Err(EngineError::SessionClosed);
        }

        let immediate = {
            let mut outbound = self.outbound.lock().unwrap();
            if outbound.is_empty() {
                None
            } else {
                Some(std::mem::take(&mut *outbound))
            }
        };

        let packets = match immediate {
            Some(p) => p,
            None => {
                let (tx, rx) = oneshot::channel();
                *self.poll_waiter.lock().unwrap() = Some(tx);
                self.poll_in_flight.store(true, Ordering::SeqCst);
                self.activity.notify_waiters();
                let result = rx.await;
                self.poll_in_flight.store(false, Ordering::SeqCst);
                self.activity.notify_waiters();
                result.map_err(|_| EngineError::SessionClosed)?
            }
        };

        self.events.emit(&EV_DRAIN, &TransportEvent::Drain);
        Ok(self.encode(&packets))
    }

    /// Decode an inbound POST body and emit `packet` for each element. A
    /// `close` packet also emits `close`.
    pub fn on_post(&self, body: &[u8]) -> Result<(), EngineError> {
        let packets = decode_payload_any(body, self.supports_binary).inspect_err(|e| {
            crate::diagnostics::report(crate::diagnostics::DiagnosticEvent::new(
                "engine_decode_error",
                e.to_string(),
            ));
        })?;
        for packet in packets {
            let is_close = packet.packet_type == EnginePacketType::Close;
            self.events.emit(&EV_PACKET, &TransportEvent::Packet(packet));
            if is_close {
                self.events.emit(&EV_CLOSE, &TransportEvent::Close);
            }
        }
        Ok(())
    }

    /// `b64=1` on the handshake GET forces the text-only framing for the
    /// lifetime of the session.
    pub fn from_query_b64(b64: bool) -> bool {
        !b64
    }
}

#[async_trait]
impl Transport for PollingTransport {
    fn name(&self) -> &'static str {
        "polling"
    }

    fn state(&self) -> TransportState {
        *self.state.lock().unwrap()
    }

    fn events(&self) -> &TransportDispatcher {
        &self.events
    }

    async fn send(&self, packets: Vec<EnginePacket>) -> Result<(), EngineError> {
        if packets.is_empty() {
            return Ok(());
        }
        let waiter = self.poll_waiter.lock().unwrap().take();
        match waiter {
            Some(tx) => {
                let _ = tx.send(packets);
            }
            None => {
                self.outbound.lock().unwrap().extend(packets);
                self.activity.notify_waiters();
            }
        }
        Ok(())
    }

    async fn pause(&self) {
        *self.state.lock().unwrap() = TransportState::Pausing;
        loop {
            let notified = self.activity.notified();
            let busy = self.poll_in_flight.load(Ordering::SeqCst)
                || !self.outbound.lock().unwrap().is_empty();
            if !busy {
                break;
            }
            notified.await;
        }
        *self.state.lock().unwrap() = TransportState::Paused;
    }

    async fn close(&self) {
        *self.state.lock().unwrap() = TransportState::Closed;
        if let Some(tx) = self.poll_waiter.lock().unwrap().take() {
            let _ = tx.send(vec![EnginePacket::empty(EnginePacketType::Close)]);
        }
        self.events.emit(&EV_CLOSE, &TransportEvent::Close);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn poll_returns_immediately_when_buffer_nonempty() {
        let t = PollingTransport::new(true);
        t.send(vec![EnginePacket::text(EnginePacketType::Message, "hi")])
            .await
            .unwrap();
        match t.poll().await.unwrap() {
            EncodedPayload::Binary(bytes) => assert!(!bytes.is_empty()),
            _ => panic!("expected binary framing"),
        }
    }

    #[tokio::test]
    async fn poll_suspends_until_send_arrives() {
        let t = std::sync::Arc::new(PollingTransport::new(false));
        let t2 = t.clone();
        let handle = tokio::spawn(async move { t2.poll().await });
        tokio::task::yield_now().await;
        t.send(vec![EnginePacket::empty(EnginePacketType::Ping)])
            .await
            .unwrap();
        let result = handle.await.unwrap().unwrap();
        match result {
            EncodedPayload::Text(s) => assert!(s.contains('2')),
            _ => panic!("expected text framing"),
        }
    }

    #[tokio::test]
    async fn on_post_emits_packet_and_close_for_close_type() {
        let t = PollingTransport::new(true);
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        t.events().on(EV_PACKET, move |e: &TransportEvent| {
            if let TransportEvent::Packet(p) = e {
                seen2.lock().unwrap().push(p.packet_type);
            }
        });
        let closed = std::sync::Arc::new(AtomicBool::new(false));
        let closed2 = closed.clone();
        t.events().on(EV_CLOSE, move |_: &TransportEvent| {
            closed2.store(true, Ordering::SeqCst);
        });
        let body = encode_payload_text(&[EnginePacket::empty(EnginePacketType::Close)]);
        t.on_post(body.as_bytes()).unwrap();
        assert_eq!(seen.lock().unwrap().as_slice(), &[EnginePacketType::Close]);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn pause_waits_for_pending_poll_to_resolve() {
        let t = std::sync::Arc::new(PollingTransport::new(true));
        let t2 = t.clone();
        let poll_handle = tokio::spawn(async move { t2.poll().await });
        tokio::task::yield_now().await;

        let t3 = t.clone();
        let pause_handle = tokio::spawn(async move {
            t3.pause().await;
        });
        tokio::task::yield_now().await;
        assert_eq!(t.state(), TransportState::Pausing);

        t.send(vec![EnginePacket::text(EnginePacketType::Message, "x")])
            .await
            .unwrap();
        poll_handle.await.unwrap().unwrap();
        pause_handle.await.unwrap();
        assert_eq!(t.state(), TransportState::Paused);
    }
}
