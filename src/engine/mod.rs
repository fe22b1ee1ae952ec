//! Engine layer: the transport-abstraction protocol (C1, C4, C5).

pub mod packet;
pub mod server;
pub mod session;
pub mod transport;
