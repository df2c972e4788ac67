use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::client::EngineConfig;
use crate::game::constants::mobj::TIMEOUT_MS;
use crate::game::constants::net::{PACKET_QUEUE_CAPACITY, RESEND_HISTORY_SIZE, SET_HISTORY_SIZE};
use crate::game::constants::players::MAX_PLAYERS;
use crate::game::constants::time::TICK_RATE;

/// Configuration rejected by [`ClientConfig::validate`]
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be at least 1")]
    Zero(&'static str),
    #[error("SET_HISTORY_SIZE must be below 256 (set ids are one byte), got {0}")]
    SetHistoryTooLarge(usize),
    #[error("CONSOLE_PLAYER must be below {MAX_PLAYERS}, got {0}")]
    ConsolePlayer(u8),
    #[error("SMOOTHER_MAX_DELTA must be positive, got {0}")]
    MaxDelta(f64),
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server to receive frames from
    pub server_address: SocketAddr,
    /// Local UDP address
    pub bind_address: SocketAddr,
    pub console_player: u8,
    /// Client ticks per second
    pub tick_rate: u32,
    pub set_history_size: usize,
    pub resend_history_size: usize,
    pub mobj_timeout_ms: u64,
    pub packet_queue_capacity: usize,
    /// Seconds; `None` leaves smoother intervals uncapped
    pub smoother_max_delta: Option<f64>,
    /// Metrics HTTP port, 0 disables
    pub metrics_port: u16,
    /// JSON map description loaded at startup
    pub map_file: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 13209),
            bind_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            console_player: 0,
            tick_rate: TICK_RATE,
            set_history_size: SET_HISTORY_SIZE,
            resend_history_size: RESEND_HISTORY_SIZE,
            mobj_timeout_ms: TIMEOUT_MS,
            packet_queue_capacity: PACKET_QUEUE_CAPACITY,
            smoother_max_delta: None,
            metrics_port: 0,
            map_file: None,
        }
    }
}

/// Parse an environment value, warning and keeping the default when it is
/// malformed or rejected by `accept`
fn env_parse<T: std::str::FromStr>(key: &str, accept: impl Fn(&T) -> bool) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse::<T>() {
        Ok(value) if accept(&value) => Some(value),
        Ok(_) => {
            tracing::warn!("{} '{}' out of range, using default", key, raw);
            None
        }
        Err(_) => {
            tracing::warn!("Invalid {} '{}', using default", key, raw);
            None
        }
    }
}

impl ClientConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Some(addr) = env_parse("SERVER_ADDRESS", |_: &SocketAddr| true) {
            config.server_address = addr;
        }
        if let Some(addr) = env_parse("BIND_ADDRESS", |_: &SocketAddr| true) {
            config.bind_address = addr;
        }
        if let Some(player) = env_parse("CONSOLE_PLAYER", |p: &u8| usize::from(*p) < MAX_PLAYERS) {
            config.console_player = player;
        }
        if let Some(rate) = env_parse("TICK_RATE", |r: &u32| (1..=1000).contains(r)) {
            config.tick_rate = rate;
        }
        if let Some(size) = env_parse("SET_HISTORY_SIZE", |s: &usize| (1..256).contains(s)) {
            config.set_history_size = size;
        }
        if let Some(size) = env_parse("RESEND_HISTORY_SIZE", |s: &usize| *s > 0) {
            config.resend_history_size = size;
        }
        if let Some(timeout) = env_parse("MOBJ_TIMEOUT_MS", |t: &u64| *t > 0) {
            config.mobj_timeout_ms = timeout;
        }
        if let Some(capacity) = env_parse("PACKET_QUEUE_CAPACITY", |c: &usize| *c > 0) {
            config.packet_queue_capacity = capacity;
        }
        if let Some(delta) = env_parse("SMOOTHER_MAX_DELTA", |d: &f64| *d > 0.0) {
            config.smoother_max_delta = Some(delta);
        }
        if let Some(port) = env_parse("METRICS_PORT", |_: &u16| true) {
            config.metrics_port = port;
        }
        if let Ok(path) = std::env::var("MAP_FILE") {
            config.map_file = Some(path);
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 {
            return Err(ConfigError::Zero("TICK_RATE"));
        }
        if self.set_history_size == 0 {
            return Err(ConfigError::Zero("SET_HISTORY_SIZE"));
        }
        if self.set_history_size > 255 {
            return Err(ConfigError::SetHistoryTooLarge(self.set_history_size));
        }
        if self.resend_history_size == 0 {
            return Err(ConfigError::Zero("RESEND_HISTORY_SIZE"));
        }
        if self.packet_queue_capacity == 0 {
            return Err(ConfigError::Zero("PACKET_QUEUE_CAPACITY"));
        }
        if usize::from(self.console_player) >= MAX_PLAYERS {
            return Err(ConfigError::ConsolePlayer(self.console_player));
        }
        if let Some(delta) = self.smoother_max_delta.filter(|d| *d <= 0.0) {
            return Err(ConfigError::MaxDelta(delta));
        }
        Ok(())
    }

    /// Engine tunables derived from this config
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            console_player: self.console_player,
            tick_rate: self.tick_rate,
            set_history_size: self.set_history_size,
            resend_history_size: self.resend_history_size,
            mobj_timeout_ms: self.mobj_timeout_ms,
            smoother_max_delta: self.smoother_max_delta,
            ..EngineConfig::default()
        }
    }

    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port != 0
    }
}
