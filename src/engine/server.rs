//! Engine-layer server: the sid table and handshake entry point (C5).
//!
//! Grounded on `socketio/engine/handler.py`'s request dispatch (look up the
//! session by `sid` query parameter, or create one on a handshake request)
//! and `SocketIOManager` (`socketio/manager.rs`) for the
//! `Arc<Mutex<HashMap<...>>>` session-table shape.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::engine::session::{EngineSession, SessionConfig, EV_SESSION_CLOSE, SessionEvent};
use crate::engine::transport::Transport;
use crate::error::EngineError;

#[derive(Debug, Clone)]
pub struct EngineServerConfig {
    pub allowed_transports: HashSet<&'static str>,
    pub session: SessionConfig,
}

impl Default for EngineServerConfig {
    fn default() -> Self {
        Self {
            allowed_transports: ["polling", "websocket"].into_iter().collect(),
            session: SessionConfig::default(),
        }
    }
}

/// Owns every live session, keyed by sid. Sessions remove themselves from
/// the table when they close, via a listener registered at handshake time.
pub struct EngineServer {
    sessions: Mutex<HashMap<String, Arc<EngineSession>>>,
    config: EngineServerConfig,
}

impl EngineServer {
    pub fn new(config: EngineServerConfig) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            config,
        })
    }

    pub fn get(&self, sid: &str) -> Option<Arc<EngineSession>> {
        self.sessions.lock().unwrap().get(sid).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    fn remove(&self, sid: &str) {
        self.sessions.lock().unwrap().remove(sid);
    }

    /// Validate `transport_name` against the configured allow-list, create a
    /// session with a fresh sid, perform the handshake, and register it.
    pub async fn handshake(
        self: &Arc<Self>,
        transport_name: &'static str,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<EngineSession>, EngineError> {
        if !self.config.allowed_transports.contains(transport_name) {
            return Err(EngineError::ConfigInvalid(format!(
                "transport '{transport_name}' is not enabled"
            )));
        }

        let sid = Uuid::new_v4().to_string();
        let upgrades: Vec<&'static str> = if transport_name == "polling"
            && self.config.allowed_transports.contains("websocket")
        {
            vec!["websocket"]
        } else {
            vec![]
        };

        let session = EngineSession::create(sid.clone(), transport, self.config.session.clone(), upgrades);
        self.sessions.lock().unwrap().insert(sid.clone(), session.clone());

        let this = self.clone();
        session.events().on(EV_SESSION_CLOSE, move |_: &SessionEvent| {
            this.remove(&sid);
        });

        session.open().await;
        Ok(session)
    }

    /// Begin a live upgrade of an existing session to `candidate`.
    pub fn try_upgrade(&self, sid: &str, candidate: Arc<dyn Transport>) -> Result<(), EngineError> {
        let session = self
            .get(sid)
            .ok_or_else(|| EngineError::UnknownSession(sid.to_string()))?;
        session.maybe_upgrade(candidate);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::transport::polling::PollingTransport;

    #[tokio::test(start_paused = true)]
    async fn handshake_rejects_disallowed_transport() {
        let mut config = EngineServerConfig::default();
        config.allowed_transports = ["polling"].into_iter().collect();
        let server = EngineServer::new(config);
        let transport = Arc::new(PollingTransport::new(true));
        let err = server.handshake("websocket", transport).await.unwrap_err();
        assert!(matches!(err, EngineError::ConfigInvalid(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_registers_and_removes_on_close() {
        let server = EngineServer::new(EngineServerConfig::default());
        let transport = Arc::new(PollingTransport::new(true));
        let session = server.handshake("polling", transport).await.unwrap();
        assert_eq!(server.session_count(), 1);
        session.close().await;
        tokio::task::yield_now().await;
        assert_eq!(server.session_count(), 0);
    }
}
