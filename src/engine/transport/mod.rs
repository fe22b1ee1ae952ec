//! Common transport contract (C4).
//!
//! Grounded on `socketio_client/engine/transports.py`'s `Transport` base
//! class (`ready_state`, `writable`, `open`/`send`/`close`, the
//! `open`/`packet`/`drain`/`error`/`close` event set) and, for the server
//! role, on `socketio/engine/handler.py`'s per-request dispatch and
//! `engine/socket.py`'s use of `transport.writable`/`pause`.

pub mod polling;
pub mod websocket;

use crate::engine::packet::EnginePacket;
use crate::error::EngineError;
use crate::messaging::dispatcher::EventDispatcher;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Opening,
    Open,
    Pausing,
    Paused,
    Closed,
}

/// Events a transport emits. A single enum stands in for the five named
/// events of the common contract (`open, packet, drain, error, close`) so
/// one [`EventDispatcher`] instance can serve all of them.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Open,
    Packet(EnginePacket),
    Drain,
    Error(String),
    Close,
}

pub type TransportDispatcher = EventDispatcher<&'static str, TransportEvent>;

pub const EV_OPEN: &str = "open";
pub const EV_PACKET: &str = "packet";
pub const EV_DRAIN: &str = "drain";
pub const EV_ERROR: &str = "error";
pub const EV_CLOSE: &str = "close";

/// Object-safe transport contract shared by the polling and websocket
/// implementations. `Session` (C5) owns exactly one `dyn Transport` at a
/// time and swaps it atomically during upgrade.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;
    fn state(&self) -> TransportState;

    /// `writable` is true only in `Open` and only between writes: never
    /// while a write to the underlying socket is in flight.
    fn writable(&self) -> bool {
        self.state() == TransportState::Open
    }

    fn events(&self) -> &TransportDispatcher;

    /// Write a batch of packets, as one polling payload or as one frame per
    /// packet over a websocket.
    async fn send(&self, packets: Vec<EnginePacket>) -> Result<(), EngineError>;

    /// Pause the transport: block new polls / suspend writes until any
    /// write/poll in flight drains, then transition to `Paused`. Only
    /// meaningful for the polling transport; the default implementation
    /// (used by `WebSocketTransport`) is a no-op since a websocket frame
    /// stream has no concept of a parked long-poll to block.
    async fn pause(&self) {}

    async fn close(&self);
}
