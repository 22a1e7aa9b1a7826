use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_UART_PATH: &str = "/dev/ttyUSB0";
pub const DEFAULT_WIFI_ADDR: &str = "192.168.4.1:5555";
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 10;
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 3000;
pub const DEFAULT_RETRY_CYCLES: u32 = 3;
pub const DEFAULT_MAX_PARTICIPANTS: usize = 5;
pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;
const MIN_FRAME_BYTES: usize = 64;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Uart,
    Wifi,
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uart" | "serial" => Ok(TransportKind::Uart),
            "wifi" | "tcp" => Ok(TransportKind::Wifi),
            other => Err(format!("unknown transport kind: {other}")),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    Newline,
    LengthPrefixed,
}

impl FromStr for Framing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "newline" | "line" => Ok(Framing::Newline),
            "length_prefixed" | "length-prefixed" | "length" => Ok(Framing::LengthPrefixed),
            other => Err(format!("unknown framing: {other}")),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    pub transport_kind: TransportKind,
    pub uart_path: PathBuf,
    pub wifi_addr: String,
    pub framing: Framing,
    pub max_queue_size: usize,
    pub command_timeout_ms: u64,
    pub reconciliation_retry_cycles: u32,
    pub max_participants: usize,
    pub max_frame_bytes: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            transport_kind: TransportKind::Uart,
            uart_path: PathBuf::from(DEFAULT_UART_PATH),
            wifi_addr: DEFAULT_WIFI_ADDR.to_string(),
            framing: Framing::Newline,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            reconciliation_retry_cycles: DEFAULT_RETRY_CYCLES,
            max_participants: DEFAULT_MAX_PARTICIPANTS,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl SyncConfig {
    /// Defaults, then the optional JSON file, then `DECK_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                serde_json::from_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = lookup("DECK_TRANSPORT") {
            self.transport_kind = parse_value("DECK_TRANSPORT", &v)?;
        }
        if let Some(v) = lookup("DECK_UART_PATH") {
            self.uart_path = PathBuf::from(v.trim());
        }
        if let Some(v) = lookup("DECK_WIFI_ADDR") {
            self.wifi_addr = v.trim().to_string();
        }
        if let Some(v) = lookup("DECK_FRAMING") {
            self.framing = parse_value("DECK_FRAMING", &v)?;
        }
        if let Some(v) = lookup("DECK_MAX_QUEUE_SIZE") {
            self.max_queue_size = parse_value("DECK_MAX_QUEUE_SIZE", &v)?;
        }
        if let Some(v) = lookup("DECK_COMMAND_TIMEOUT_MS") {
            self.command_timeout_ms = parse_value("DECK_COMMAND_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("DECK_RETRY_CYCLES") {
            self.reconciliation_retry_cycles = parse_value("DECK_RETRY_CYCLES", &v)?;
        }
        if let Some(v) = lookup("DECK_MAX_PARTICIPANTS") {
            self.max_participants = parse_value("DECK_MAX_PARTICIPANTS", &v)?;
        }
        if let Some(v) = lookup("DECK_MAX_FRAME_BYTES") {
            self.max_frame_bytes = parse_value("DECK_MAX_FRAME_BYTES", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_queue_size == 0 {
            return Err(invalid("max_queue_size", self.max_queue_size));
        }
        if self.command_timeout_ms == 0 {
            return Err(invalid("command_timeout_ms", self.command_timeout_ms));
        }
        if self.max_participants == 0 {
            return Err(invalid("max_participants", self.max_participants));
        }
        if self.max_frame_bytes < MIN_FRAME_BYTES {
            return Err(invalid("max_frame_bytes", self.max_frame_bytes));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
{
    raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
    })
}

fn invalid(key: &'static str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    }
}
