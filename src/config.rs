use crate::error::AppError;
use std::{env, fmt::Display, net::IpAddr, str::FromStr, time::Duration};
use tracing::info;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    /// Only WebSocket handshakes on this path are accepted.
    pub socket_path: String,
    /// Room a client lands in when it does not ask for one.
    pub default_room: String,
    /// Per-room log capacity, `0` keeps everything.
    pub history_limit: usize,
    pub max_message_len: usize,
    pub dispatcher_buffer: usize,
    /// How long a connection may keep flushing after shutdown starts.
    pub shutdown_grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: IpAddr::from([127, 0, 0, 1]),
            port: 8080,
            socket_path: "/api/socket".to_string(),
            default_room: "community".to_string(),
            history_limit: 1000,
            max_message_len: 2000,
            dispatcher_buffer: 100,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let defaults = Self::default();

        let config = Self {
            host: try_load(&lookup, "CHAT_HOST", defaults.host)?,
            port: try_load(&lookup, "CHAT_PORT", defaults.port)?,
            socket_path: try_load(&lookup, "CHAT_SOCKET_PATH", defaults.socket_path)?,
            default_room: try_load(&lookup, "CHAT_ROOM", defaults.default_room)?,
            history_limit: try_load(&lookup, "CHAT_HISTORY_LIMIT", defaults.history_limit)?,
            max_message_len: try_load(&lookup, "CHAT_MAX_MESSAGE_LEN", defaults.max_message_len)?,
            dispatcher_buffer: try_load(&lookup, "CHAT_DISPATCHER_BUFFER", defaults.dispatcher_buffer)?,
            shutdown_grace: Duration::from_millis(try_load(
                &lookup,
                "CHAT_SHUTDOWN_GRACE_MS",
                defaults.shutdown_grace.as_millis() as u64,
            )?),
        };

        if !config.socket_path.starts_with('/') {
            return Err(AppError::Config {
                key: "CHAT_SOCKET_PATH",
                reason: "must start with '/'".to_string(),
            });
        }
        if !crate::server::is_valid_room_id(&config.default_room) {
            return Err(AppError::Config {
                key: "CHAT_ROOM",
                reason: "expected 1-64 characters of [A-Za-z0-9_-]".to_string(),
            });
        }
        if config.dispatcher_buffer == 0 {
            return Err(AppError::Config {
                key: "CHAT_DISPATCHER_BUFFER",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(config)
    }
}

fn try_load<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, AppError>
where
    T: FromStr + Display,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| AppError::Config {
            key,
            reason: e.to_string(),
        }),
        None => {
            info!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}
