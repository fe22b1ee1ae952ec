//! Peer-role client: the Engine.IO + Messaging stack from the connecting
//! side.
//!
//! Grounded on `socketio_client/engine/transports.py`'s `PollingTransport`/
//! `XHRPollingTransport` for the long-poll GET/POST cycle and `pause`
//! semantics (here read the other direction: the client pausing its own
//! poll loop during a local transport swap), and on `socketio/client.py`'s
//! `Client.connect`/`_handle_eio_message`/`_reconnect_task` for the
//! reconnection-with-backoff loop. The transports themselves use crates
//! the server side has no occasion to import: `reqwest` for long-polling
//! HTTP, `tokio-tungstenite` for the WebSocket stream.

pub mod engine;
pub mod messaging;

pub use engine::{EngineClient, EngineClientEvent};
pub use messaging::MessagingClientHandle;
