//! Runtime configuration (ambient stack).
//!
//! `dotenvy` populates process environment variables from a `.env` file if
//! present, then the `config` crate layers an `Environment` source with a
//! `SOCKETIO_` prefix over built-in defaults. Call [`Config::from_env`] once
//! at startup.

use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;

use crate::error::EngineError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// The HTTP path prefix the Engine.IO routes are served under.
    pub resource: String,
    pub transports: Vec<String>,
    pub ping_interval_ms: u64,
    pub ping_timeout_ms: u64,
    /// The session's own liveness-deadline timer, independent of the values
    /// above advertised to the client. See `SessionConfig`'s doc comment
    /// for why these are kept separate rather than unified.
    pub session_ping_interval_ms: u64,
    pub session_ping_timeout_ms: u64,
    pub upgrade_timeout_s: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            resource: "socket.io".to_string(),
            transports: vec!["polling".to_string(), "websocket".to_string()],
            ping_interval_ms: 25_000,
            ping_timeout_ms: 60_000,
            session_ping_interval_ms: 5_000,
            session_ping_timeout_ms: 10_000,
            upgrade_timeout_s: 30,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, EngineError> {
        let _ = dotenvy::dotenv();

        let defaults = Self::default();
        let settings = config::Config::builder()
            .set_default("host", defaults.host)
            .map_err(config_err)?
            .set_default("port", defaults.port as i64)
            .map_err(config_err)?
            .set_default("resource", defaults.resource)
            .map_err(config_err)?
            .set_default("transports", defaults.transports)
            .map_err(config_err)?
            .set_default("ping_interval_ms", defaults.ping_interval_ms as i64)
            .map_err(config_err)?
            .set_default("ping_timeout_ms", defaults.ping_timeout_ms as i64)
            .map_err(config_err)?
            .set_default("session_ping_interval_ms", defaults.session_ping_interval_ms as i64)
            .map_err(config_err)?
            .set_default("session_ping_timeout_ms", defaults.session_ping_timeout_ms as i64)
            .map_err(config_err)?
            .set_default("upgrade_timeout_s", defaults.upgrade_timeout_s as i64)
            .map_err(config_err)?
            .add_source(config::Environment::with_prefix("SOCKETIO").separator("__"))
            .build()
            .map_err(config_err)?;

        let parsed: Self = settings.try_deserialize().map_err(config_err)?;
        parsed.validate()?;
        Ok(parsed)
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.transports.is_empty() {
            return Err(EngineError::ConfigInvalid("transports must not be empty".into()));
        }
        for t in &self.transports {
            if t != "polling" && t != "websocket" {
                return Err(EngineError::ConfigInvalid(format!("unknown transport '{t}'")));
            }
        }
        Ok(())
    }

    pub fn allowed_transports(&self) -> HashSet<&'static str> {
        let mut set = HashSet::new();
        for t in &self.transports {
            match t.as_str() {
                "polling" => {
                    set.insert("polling");
                }
                "websocket" => {
                    set.insert("websocket");
                }
                _ => {}
            }
        }
        set
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }
}

fn config_err(e: impl std::fmt::Display) -> EngineError {
    EngineError::ConfigInvalid(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_unknown_transport() {
        let mut c = Config::default();
        c.transports = vec!["carrier-pigeon".to_string()];
        assert!(c.validate().is_err());
    }

    #[test]
    fn session_side_timer_defaults_differ_from_advertised_values() {
        let c = Config::default();
        assert_eq!(c.ping_interval_ms, 25_000);
        assert_eq!(c.session_ping_interval_ms, 5_000);
        assert_eq!(c.ping_timeout_ms, 60_000);
        assert_eq!(c.session_ping_timeout_ms, 10_000);
    }

    #[test]
    fn allowed_transports_maps_known_names() {
        let c = Config::default();
        let allowed = c.allowed_transports();
        assert!(allowed.contains("polling"));
        assert!(allowed.contains("websocket"));
    }
}
