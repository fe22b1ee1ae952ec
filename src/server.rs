//! The combined Engine + Messaging server and its operational stats.
//!
//! Grounded on `SocketIOManager::get_stats` (`socketio/manager.rs`), which
//! reports session/user/room counts for operational visibility. This is
//! read-only telemetry alongside the protocol layers, not a new feature.

use std::sync::Arc;

use crate::engine::server::{EngineServer, EngineServerConfig};
use crate::messaging::server::MessagingServer;

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct ServerStats {
    pub sessions: usize,
    pub namespaces: usize,
    pub rooms: usize,
}

impl ServerStats {
    pub fn compute(engine: &EngineServer, messaging: &MessagingServer) -> Self {
        let namespaces = messaging.namespaces_snapshot();
        Self {
            sessions: engine.session_count(),
            namespaces: namespaces.len(),
            rooms: namespaces.iter().map(|ns| ns.room_count()).sum(),
        }
    }
}

/// Bundles the Engine-layer session table with the Messaging-layer namespace
/// registry, since every deployment needs exactly one of each wired
/// together (see `src/http.rs`'s `AppState`).
pub struct Server {
    pub engine: Arc<EngineServer>,
    pub messaging: Arc<MessagingServer>,
}

impl Server {
    pub fn new(engine_config: EngineServerConfig) -> Self {
        Self {
            engine: EngineServer::new(engine_config),
            messaging: MessagingServer::new(),
        }
    }

    /// Read-only session/namespace/room counts, for an operator endpoint or
    /// periodic logging.
    pub fn stats(&self) -> ServerStats {
        ServerStats::compute(&self.engine, &self.messaging)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_starts_with_just_the_root_namespace() {
        let server = Server::new(EngineServerConfig::default());
        let stats = server.stats();
        assert_eq!(stats.sessions, 0);
        assert_eq!(stats.namespaces, 1);
        assert_eq!(stats.rooms, 0);
    }

    #[test]
    fn stats_counts_namespace_and_rooms() {
        let server = Server::new(EngineServerConfig::default());
        let ns = server.messaging.of("/chat");
        ns.adapter().add("sid-1", "lobby");
        let stats = server.stats();
        assert_eq!(stats.namespaces, 2);
        assert_eq!(stats.rooms, 1);
    }
}
