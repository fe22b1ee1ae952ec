//! Namespace and Rooms Adapter (C7).
//!
//! The adapter's `sids`/`rooms` inverse maps and its `add`/`remove` pair are
//! grounded on `socketio/adapter.py`. That original's `remove_all` deletes
//! straight out of `self.rooms[room]` using the room name taken from the
//! caller instead of re-deriving the socket's current room set, which can
//! desync the two maps when a socket was never in the room it's asked to
//! leave. Here `remove_all` snapshots the socket's own room set first and
//! retires each membership through the ordinary `remove` path, so the two
//! maps can never disagree about a leaving socket.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde_json::Value as JsonValue;

use crate::messaging::packet::{extract_attachments, SocketPacket};
use crate::messaging::socket::MessagingSocket;

#[derive(Default)]
pub struct RoomsAdapter {
    sids: Mutex<HashMap<String, HashSet<String>>>,
    rooms: Mutex<HashMap<String, HashSet<String>>>,
}

impl RoomsAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, sid: &str, room: &str) {
        self.sids
            .lock()
            .unwrap()
            .entry(sid.to_string())
            .or_default()
            .insert(room.to_string());
        self.rooms
            .lock()
            .unwrap()
            .entry(room.to_string())
            .or_default()
            .insert(sid.to_string());
    }

    pub fn remove(&self, sid: &str, room: &str) {
        if let Some(set) = self.sids.lock().unwrap().get_mut(sid) {
            set.remove(room);
        }
        let mut rooms = self.rooms.lock().unwrap();
        if let Some(set) = rooms.get_mut(room) {
            set.remove(sid);
            if set.is_empty() {
                rooms.remove(room);
            }
        }
    }

    /// Remove `sid` from every room it currently occupies.
    pub fn remove_all(&self, sid: &str) {
        let current: Vec<String> = self
            .sids
            .lock()
            .unwrap()
            .get(sid)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        for room in current {
            self.remove(sid, &room);
        }
        self.sids.lock().unwrap().remove(sid);
    }

    pub fn socket_rooms(&self, sid: &str) -> HashSet<String> {
        self.sids.lock().unwrap().get(sid).cloned().unwrap_or_default()
    }

    pub fn room_members(&self, room: &str) -> HashSet<String> {
        self.rooms.lock().unwrap().get(room).cloned().unwrap_or_default()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.lock().unwrap().len()
    }

    /// The deduplicated union of members across `rooms`, minus `except`.
    pub fn broadcast_targets(&self, rooms: &[String], except: &HashSet<String>) -> HashSet<String> {
        let map = self.rooms.lock().unwrap();
        let mut out = HashSet::new();
        for room in rooms {
            if let Some(members) = map.get(room) {
                for sid in members {
                    if !except.contains(sid) {
                        out.insert(sid.clone());
                    }
                }
            }
        }
        out
    }
}

/// A Socket.IO namespace: the set of currently connected sockets plus the
/// rooms adapter scoped to them. `io.of(name)` on the server returns one of
/// these; app code registers a `connection` listener on it.
pub struct Namespace {
    pub name: String,
    sockets: Mutex<HashMap<String, Arc<MessagingSocket>>>,
    adapter: RoomsAdapter,
    connection_listeners: Mutex<Vec<Arc<dyn Fn(Arc<MessagingSocket>) + Send + Sync>>>,
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            sockets: Mutex::new(HashMap::new()),
            adapter: RoomsAdapter::new(),
            connection_listeners: Mutex::new(Vec::new()),
        })
    }

    pub fn adapter(&self) -> &RoomsAdapter {
        &self.adapter
    }

    /// Register a callback invoked with every socket that connects to this
    /// namespace, mirroring `namespace.on("connection", fn)`.
    pub fn on_connection(&self, f: impl Fn(Arc<MessagingSocket>) + Send + Sync + 'static) {
        self.connection_listeners.lock().unwrap().push(Arc::new(f));
    }

    pub fn connected_count(&self) -> usize {
        self.sockets.lock().unwrap().len()
    }

    pub fn room_count(&self) -> usize {
        self.adapter.room_count()
    }

    pub fn get_socket(&self, id: &str) -> Option<Arc<MessagingSocket>> {
        self.sockets.lock().unwrap().get(id).cloned()
    }

    pub fn register(self: &Arc<Self>, socket: Arc<MessagingSocket>) {
        self.adapter.add(&socket.id, &socket.id); // every socket starts in its own room
        self.sockets.lock().unwrap().insert(socket.id.clone(), socket.clone());
        let listeners = self.connection_listeners.lock().unwrap().clone();
        for f in listeners {
            f(socket.clone());
        }
    }

    pub fn unregister(&self, id: &str) {
        self.adapter.remove_all(id);
        self.sockets.lock().unwrap().remove(id);
    }

    fn targets(&self, rooms: &[String], except: &HashSet<String>) -> HashSet<String> {
        if rooms.is_empty() {
            self.sockets
                .lock()
                .unwrap()
                .keys()
                .filter(|sid| !except.contains(*sid))
                .cloned()
                .collect()
        } else {
            self.adapter.broadcast_targets(rooms, except)
        }
    }

    /// Encode `event`/`args` once (pulling out any embedded binary
    /// attachments first, switching the wire type to `BinaryEvent`) and
    /// deliver to every target socket, deduplicated across the requested
    /// rooms.
    pub async fn broadcast(&self, rooms: &[String], except: &HashSet<String>, event: &str, args: Vec<JsonValue>) {
        let (args, attachments) = extract_attachments(args);
        let packet = SocketPacket::event(&self.name, event, args, attachments);
        let header = packet.encode_header();
        let targets = self.targets(rooms, except);
        for sid in targets {
            if let Some(socket) = self.get_socket(&sid) {
                socket.send_preencoded(header.clone(), packet.attachments.clone()).await;
            }
        }
    }

    /// Sugar for `emit("message", args)` to every connected socket.
    pub async fn send(&self, args: Vec<JsonValue>) {
        self.broadcast(&[], &HashSet::new(), "message", args).await;
    }

    pub fn to<'a>(self: &'a Arc<Self>, room: impl Into<String>) -> BroadcastOperator<'a> {
        BroadcastOperator {
            namespace: self,
            rooms: vec![room.into()],
            except: HashSet::new(),
        }
    }
}

/// Builder mirroring `socket.to(room).except(sid).emit(event, args)`.
pub struct BroadcastOperator<'a> {
    namespace: &'a Arc<Namespace>,
    rooms: Vec<String>,
    except: HashSet<String>,
}

impl<'a> BroadcastOperator<'a> {
    pub fn room(mut self, room: impl Into<String>) -> Self {
        self.rooms.push(room.into());
        self
    }

    pub fn except(mut self, sid: impl Into<String>) -> Self {
        self.except.insert(sid.into());
        self
    }

    pub async fn emit(self, event: &str, args: Vec<JsonValue>) {
        self.namespace.broadcast(&self.rooms, &self.except, event, args).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_all_keeps_sids_and_rooms_consistent() {
        let adapter = RoomsAdapter::new();
        adapter.add("s1", "s1");
        adapter.add("s1", "lobby");
        adapter.add("s2", "lobby");

        adapter.remove_all("s1");

        assert!(adapter.socket_rooms("s1").is_empty());
        assert_eq!(adapter.room_members("lobby"), ["s2".to_string()].into_iter().collect());
        assert!(adapter.room_members("s1").is_empty());
    }

    #[test]
    fn broadcast_targets_dedupes_across_rooms_and_honors_except() {
        let adapter = RoomsAdapter::new();
        adapter.add("s1", "a");
        adapter.add("s1", "b");
        adapter.add("s2", "a");
        adapter.add("s3", "b");

        let targets = adapter.broadcast_targets(
            &["a".to_string(), "b".to_string()],
            &["s2".to_string()].into_iter().collect(),
        );
        assert_eq!(targets, ["s1".to_string(), "s3".to_string()].into_iter().collect());
    }
}
