//! HTTP surface: the Engine.IO handshake, polling GET/POST, and the
//! WebSocket upgrade entry point.
//!
//! Wired the way `websocket_chat_handler` wires `actix-ws`
//! (`src/websocket_chat.rs`): `actix_ws::handle(&req, stream)` splits the
//! upgraded connection into a `Session` write handle and a `MessageStream`,
//! and the read loop is spawned via `actix_web::rt::spawn`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use actix_web::cookie::Cookie;
use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;

use crate::engine::server::EngineServer;
use crate::engine::transport::polling::{EncodedPayload, PollingTransport};
use crate::engine::transport::websocket::WebSocketTransport;
use crate::error::EngineError;
use crate::messaging::client::MessagingClient;
use crate::messaging::server::MessagingServer;
use crate::server::ServerStats;

pub struct AppState {
    pub engine: Arc<EngineServer>,
    pub messaging: Arc<MessagingServer>,
    polling: Mutex<HashMap<String, Arc<PollingTransport>>>,
}

impl AppState {
    pub fn new(engine: Arc<EngineServer>, messaging: Arc<MessagingServer>) -> web::Data<Self> {
        web::Data::new(Self {
            engine,
            messaging,
            polling: Mutex::new(HashMap::new()),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct HandshakeQuery {
    #[serde(rename = "EIO")]
    #[allow(dead_code)]
    pub eio: Option<String>,
    pub transport: String,
    pub sid: Option<String>,
    #[serde(default)]
    pub b64: bool,
}

fn payload_response(payload: EncodedPayload) -> HttpResponse {
    match payload {
        EncodedPayload::Text(s) => HttpResponse::Ok().content_type("text/plain; charset=UTF-8").body(s),
        EncodedPayload::Binary(bytes) => {
            HttpResponse::Ok().content_type("application/octet-stream").body(bytes)
        }
    }
}

fn sid_cookie(sid: &str) -> Cookie<'static> {
    Cookie::build("io", sid.to_string()).path("/").finish()
}

pub async fn handle_get(
    req: HttpRequest,
    stream: web::Payload,
    query: web::Query<HandshakeQuery>,
    state: web::Data<AppState>,
) -> actix_web::Result<HttpResponse> {
    match (query.transport.as_str(), &query.sid) {
        ("polling", None) => {
            let transport = Arc::new(PollingTransport::new(PollingTransport::from_query_b64(query.b64)));
            let session = state.engine.handshake("polling", transport.clone()).await?;
            state
                .polling
                .lock()
                .unwrap()
                .insert(session.sid.clone(), transport.clone());
            MessagingClient::attach(session.clone(), state.messaging.clone());
            let payload = transport.poll().await?;
            let mut response = payload_response(payload);
            response.add_cookie(&sid_cookie(&session.sid))?;
            Ok(response)
        }
        ("polling", Some(sid)) => {
            let transport = state
                .polling
                .lock()
                .unwrap()
                .get(sid)
                .cloned()
                .ok_or_else(|| EngineError::UnknownSession(sid.clone()))?;
            let payload = transport.poll().await?;
            Ok(payload_response(payload))
        }
        ("websocket", None) => {
            let (mut response, session, msg_stream) = actix_ws::handle(&req, stream)?;
            let transport = WebSocketTransport::new(session);
            transport.spawn_reader(msg_stream);
            let engine_session = state.engine.handshake("websocket", transport).await?;
            response.add_cookie(&sid_cookie(&engine_session.sid))?;
            MessagingClient::attach(engine_session, state.messaging.clone());
            Ok(response)
        }
        ("websocket", Some(sid)) => {
            let (response, session, msg_stream) = actix_ws::handle(&req, stream)?;
            let transport = WebSocketTransport::new(session);
            transport.spawn_reader(msg_stream);
            state.engine.try_upgrade(sid, transport)?;
            Ok(response)
        }
        (other, _) => Err(EngineError::ConfigInvalid(format!("unknown transport '{other}'")).into()),
    }
}

pub async fn handle_post(
    query: web::Query<HandshakeQuery>,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> actix_web::Result<HttpResponse> {
    let sid = query
        .sid
        .as_ref()
        .ok_or_else(|| EngineError::ConfigInvalid("POST requires a sid".into()))?;
    let transport = state
        .polling
        .lock()
        .unwrap()
        .get(sid)
        .cloned()
        .ok_or_else(|| EngineError::UnknownSession(sid.clone()))?;
    transport.on_post(&body)?;
    Ok(HttpResponse::Ok().content_type("text/plain").body("ok"))
}

/// Read-only operator endpoint reporting session/namespace/room counts.
pub async fn handle_stats(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(ServerStats::compute(&state.engine, &state.messaging))
}

pub fn configure(cfg: &mut web::ServiceConfig, resource: &str) {
    cfg.route(resource, web::get().to(handle_get))
        .route(resource, web::post().to(handle_post))
        .route(&format!("{resource}/stats"), web::get().to(handle_stats));
}
