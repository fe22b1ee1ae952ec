//! Top-level Messaging server: the namespace registry (`io.of(name)`).
//!
//! Mirrors `socketio/server.py`'s `Server.namespace_handler`/`_get_namespace`
//! pair: a namespace only accepts connections once the application has
//! declared it (`io.of("/chat")` at startup, or the default `"/"`); a client
//! `CONNECT` for anything else is the `UNKNOWN_NAMESPACE` case in spec §7,
//! answered with a Messaging `ERROR` rather than silently springing a new
//! namespace into existence.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::messaging::namespace::Namespace;

#[derive(Default)]
pub struct MessagingServer {
    namespaces: Mutex<HashMap<String, Arc<Namespace>>>,
}

impl MessagingServer {
    /// The root namespace is always available, matching every Socket.IO
    /// server's default behavior.
    pub fn new() -> Arc<Self> {
        let server = Self::default();
        server.namespaces.lock().unwrap().insert("/".to_string(), Namespace::new("/"));
        Arc::new(server)
    }

    /// Declare (or fetch, if already declared) the namespace named `name`.
    /// This is the application-side `io.of(name)` call, made before any
    /// client can connect to it.
    pub fn of(&self, name: &str) -> Arc<Namespace> {
        let mut namespaces = self.namespaces.lock().unwrap();
        namespaces
            .entry(name.to_string())
            .or_insert_with(|| Namespace::new(name))
            .clone()
    }

    /// Look up an already-declared namespace without creating one. A client
    /// `CONNECT` to a namespace the application never declared must see
    /// `None` here so it can be answered with `UNKNOWN_NAMESPACE`.
    pub fn try_of(&self, name: &str) -> Option<Arc<Namespace>> {
        self.namespaces.lock().unwrap().get(name).cloned()
    }

    pub fn namespace_names(&self) -> Vec<String> {
        self.namespaces.lock().unwrap().keys().cloned().collect()
    }

    pub fn namespaces_snapshot(&self) -> Vec<Arc<Namespace>> {
        self.namespaces.lock().unwrap().values().cloned().collect()
    }
}
