use std::env;
use std::time::Duration;

use crate::error::SyncError;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: String,
    pub realtime_url: String,
    pub log_level: String,
    pub search_debounce_ms: u64,
    pub geolocation_timeout_ms: u64,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub event_buffer_size: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, SyncError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            api_base_url: env::var("RIDE_API_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            realtime_url: env::var("REALTIME_WS_URL")
                .unwrap_or_else(|_| "ws://localhost:8000/ws".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            search_debounce_ms: parse_or_default("SEARCH_DEBOUNCE_MS", 500)?,
            geolocation_timeout_ms: parse_or_default("GEOLOCATION_TIMEOUT_MS", 10_000)?,
            reconnect_base_delay_ms: parse_or_default("RECONNECT_BASE_DELAY_MS", 250)?,
            reconnect_max_delay_ms: parse_or_default("RECONNECT_MAX_DELAY_MS", 15_000)?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
        })
    }

    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }

    pub fn geolocation_timeout(&self) -> Duration {
        Duration::from_millis(self.geolocation_timeout_ms)
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, SyncError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| SyncError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
