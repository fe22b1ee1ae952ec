//! A real-time, bidirectional, event-oriented messaging server and client:
//! an Engine.IO transport-abstraction layer (C1, C4, C5) carrying a
//! Socket.IO-style messaging protocol (C2, C3, C6, C7, C8), plus a
//! peer-role client for connecting out to another such server.

pub mod client;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod http;
pub mod messaging;
pub mod server;
