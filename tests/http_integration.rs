//! End-to-end coverage of the HTTP surface: handshake, polling round trip,
//! the stats endpoint, and a namespace connect over the wire. Driven through
//! `actix_web::test`, the same way the teacher drives its middleware tests
//! (see `security_headers.rs`).

use actix_web::{test, web, App};

use socketio_rt::engine::packet::{decode_payload_binary, encode_payload_text, EnginePacket, EnginePacketType};
use socketio_rt::engine::server::{EngineServer, EngineServerConfig};
use socketio_rt::http::{self, AppState};
use socketio_rt::messaging::packet::SocketPacket;
use socketio_rt::messaging::server::MessagingServer;

fn test_app_state() -> web::Data<AppState> {
    let engine = EngineServer::new(EngineServerConfig::default());
    let messaging = MessagingServer::new();
    AppState::new(engine, messaging)
}

#[actix_web::test]
async fn handshake_returns_open_packet_with_upgrades() {
    let state = test_app_state();
    let app = test::init_service(
        App::new()
            .app_data(state.clone())
            .configure(|cfg| http::configure(cfg, "/socket.io")),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/socket.io?EIO=4&transport=polling")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let body = test::read_body(resp).await;
    let packets = decode_payload_binary(&body).unwrap();
    assert_eq!(packets[0].packet_type, EnginePacketType::Open);
    let text = packets[0].data.as_text().unwrap();
    assert!(text.contains("\"upgrades\":[\"websocket\"]"));
}

#[actix_web::test]
async fn post_then_get_round_trips_an_event_through_a_namespace() {
    let state = test_app_state();
    // A namespace only accepts connections once the application has
    // declared it, matching every Socket.IO server's default behavior.
    state.messaging.of("/chat");
    let app = test::init_service(
        App::new()
            .app_data(state.clone())
            .configure(|cfg| http::configure(cfg, "/socket.io")),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/socket.io?EIO=4&transport=polling")
        .to_request();
    let resp = test::call_service(&app, req).await;
    let body = test::read_body(resp).await;
    let packets = decode_payload_binary(&body).unwrap();
    let open_text = packets[0].data.as_text().unwrap();
    let sid: String = serde_json::from_str::<serde_json::Value>(open_text)
        .unwrap()
        .get("sid")
        .unwrap()
        .as_str()
        .unwrap()
        .to_string();

    // Root must connect before a non-root namespace connect is honored
    // rather than buffered (spec §4.6's connect-buffer policy).
    let root_connect = SocketPacket::connect_request("/", None);
    let root_packet = EnginePacket::text(EnginePacketType::Message, root_connect.encode_header());
    let req = test::TestRequest::post()
        .uri(&format!("/socket.io?EIO=4&transport=polling&sid={sid}"))
        .set_payload(encode_payload_text(&[root_packet]))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let req = test::TestRequest::get()
        .uri(&format!("/socket.io?EIO=4&transport=polling&sid={sid}"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    test::read_body(resp).await; // drain the "/" connect ack

    let connect = SocketPacket::connect_request("/chat", None);
    let engine_packet = EnginePacket::text(EnginePacketType::Message, connect.encode_header());
    let post_body = encode_payload_text(&[engine_packet]);

    let req = test::TestRequest::post()
        .uri(&format!("/socket.io?EIO=4&transport=polling&sid={sid}"))
        .set_payload(post_body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let req = test::TestRequest::get()
        .uri(&format!("/socket.io?EIO=4&transport=polling&sid={sid}"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let body = test::read_body(resp).await;
    let packets = decode_payload_binary(&body).unwrap();
    let header = packets[0].data.as_text().unwrap();
    assert!(header.contains("/chat"));

    assert_eq!(state.messaging.of("/chat").connected_count(), 1);
}

#[actix_web::test]
async fn stats_endpoint_reports_current_session_count() {
    let state = test_app_state();
    let app = test::init_service(
        App::new()
            .app_data(state.clone())
            .configure(|cfg| http::configure(cfg, "/socket.io")),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/socket.io?EIO=4&transport=polling")
        .to_request();
    test::call_service(&app, req).await;

    let req = test::TestRequest::get().uri("/socket.io/stats").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let stats: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(stats["sessions"], 1);
}

#[actix_web::test]
async fn unknown_sid_on_post_returns_client_error() {
    let state = test_app_state();
    let app = test::init_service(
        App::new()
            .app_data(state.clone())
            .configure(|cfg| http::configure(cfg, "/socket.io")),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/socket.io?EIO=4&transport=polling&sid=does-not-exist")
        .set_payload("")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_client_error());
}
