//! Binary entry point: init tracing, load config, hand everything to
//! `actix_web::HttpServer`.

use actix_web::{web, App, HttpServer};

use socketio_rt::config::Config;
use socketio_rt::engine::server::{EngineServer, EngineServerConfig};
use socketio_rt::http::{self, AppState};
use socketio_rt::messaging::server::MessagingServer;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "invalid configuration, falling back to defaults");
        Config::default()
    });

    let bind_addr = (config.host.as_str(), config.port);
    let resource = format!("/{}", config.resource.trim_matches('/'));

    let engine_config = EngineServerConfig {
        allowed_transports: config.allowed_transports(),
        session: socketio_rt::engine::session::SessionConfig {
            ping_interval_ms: config.ping_interval_ms,
            ping_timeout_ms: config.ping_timeout_ms,
            session_ping_interval_ms: config.session_ping_interval_ms,
            session_ping_timeout_ms: config.session_ping_timeout_ms,
            upgrade_timeout_s: config.upgrade_timeout_s,
        },
    };
    let engine = EngineServer::new(engine_config);
    let messaging = MessagingServer::new();

    tracing::info!(host = %config.host, port = config.port, resource = %resource, "starting socketio-rt server");

    HttpServer::new(move || {
        let state = AppState::new(engine.clone(), messaging.clone());
        let resource = resource.clone();
        App::new()
            .app_data(state)
            .configure(move |cfg| http::configure(cfg, &resource))
    })
    .bind(bind_addr)?
    .run()
    .await?;
    Ok(())
}
