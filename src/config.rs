use crate::connections::Connection;
use crate::error::ProxyError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PROXY_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RESPONSE_SIZE: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
}

/// Certificate and key used to terminate TLS on the listener.
#[derive(Debug, Clone, PartialEq)]
pub struct TlsFiles {
    pub certificate: PathBuf,
    pub private_key: PathBuf,
}

/// Payload of `GET {base}/api/mode`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeInfo {
    pub mode: &'static str,
    pub disable_write: bool,
    pub disable_admin: bool,
}

/// Fully resolved runtime configuration. Built once before the listener
/// starts and shared read-only afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Empty, or `/segment[/segment...]` without a trailing slash.
    pub base_path: String,
    pub tls: Option<TlsFiles>,
    pub proxy_timeout: Duration,
    pub max_response_size: u64,
    pub disable_write: bool,
    pub disable_admin: bool,
    pub logging: LoggingConfig,
    pub connections: Vec<Connection>,
    pub version: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            base_path: String::new(),
            tls: None,
            proxy_timeout: DEFAULT_PROXY_TIMEOUT,
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
            disable_write: false,
            disable_admin: false,
            logging: LoggingConfig::default(),
            connections: Vec::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Config {
    pub fn mode_info(&self) -> ModeInfo {
        ModeInfo {
            mode: "standalone",
            disable_write: self.disable_write,
            disable_admin: self.disable_admin,
        }
    }

    /// Host shown in the startup banner; wildcard binds are shown as localhost.
    pub fn display_host(&self) -> &str {
        match self.host.as_str() {
            "" | "0.0.0.0" | "::" => "localhost",
            host => host,
        }
    }

    pub fn ui_url(&self) -> String {
        let scheme = if self.tls.is_some() { "https" } else { "http" };
        format!("{}://{}:{}{}/ui/", scheme, self.display_host(), self.port, self.base_path)
    }
}

/// Normalizes a `--base-path` value: leading slash, no trailing slash,
/// empty for the root.
pub fn normalize_base_path(raw: &str) -> Result<String, ProxyError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    if trimmed.contains(['?', '#', ' ']) || trimmed.split('/').any(|s| s == "..") {
        return Err(ProxyError::Config(format!("Invalid base path: '{}'", raw)));
    }
    if trimmed.starts_with('/') {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("/{}", trimmed))
    }
}

/// Parses durations like `500ms`, `30s`, `2m`, `1h 30m`. A bare number is seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, ProxyError> {
    let s = raw.trim();
    let invalid = |detail: String| {
        ProxyError::Config(format!("Invalid duration: '{}' (examples: 500ms, 30s, 2m): {}", raw, detail))
    };

    let duration = match s.parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => humantime::parse_duration(s).map_err(|e| invalid(e.to_string()))?,
    };

    if duration.is_zero() {
        return Err(invalid("must be greater than zero".to_string()));
    }
    Ok(duration)
}

/// Parses sizes like `50MB`, `512KB`, `1GB` or a plain byte count.
pub fn parse_byte_size(raw: &str) -> Result<u64, ProxyError> {
    let s = raw.trim().to_ascii_uppercase();
    let invalid = || ProxyError::Config(format!("Invalid size: '{}' (examples: 512KB, 50MB, 1GB)", raw));

    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let value: u64 = number.parse().map_err(|_| invalid())?;

    let multiplier: u64 = match unit.trim() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
        _ => return Err(invalid()),
    };

    match value.checked_mul(multiplier) {
        Some(0) | None => Err(invalid()),
        Some(bytes) => Ok(bytes),
    }
}
