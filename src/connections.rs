//! Backend connections known at startup.
//!
//! Connections come from an optional JSON file and from the repeatable
//! `--<backend>-url` flags. They are loaded once, validated once and are
//! immutable afterwards; the UI reads them through `/api/v1/connections`.

use crate::error::ProxyError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// Value of `source` on every connection handed out by this process.
pub const CLI_SOURCE: &str = "cli";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    InfluxDb,
    Prometheus,
    Alertmanager,
}

impl BackendType {
    pub fn display_name(&self) -> &'static str {
        match self {
            BackendType::InfluxDb => "InfluxDB",
            BackendType::Prometheus => "Prometheus",
            BackendType::Alertmanager => "Alertmanager",
        }
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendType::InfluxDb => write!(f, "influxdb"),
            BackendType::Prometheus => write!(f, "prometheus"),
            BackendType::Alertmanager => write!(f, "alertmanager"),
        }
    }
}

fn default_source() -> String {
    CLI_SOURCE.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub name: String,
    #[serde(rename = "type")]
    pub backend_type: BackendType,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_database: Option<String>,
    // Only meaningful on prometheus entries
    #[serde(default, alias = "alertmanagerURL", skip_serializing_if = "Option::is_none")]
    pub alertmanager_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alertmanager_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alertmanager_password: Option<String>,
    #[serde(default = "default_source")]
    pub source: String,
}

impl Connection {
    pub fn new(name: impl Into<String>, backend_type: BackendType, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backend_type,
            url: url.into(),
            username: None,
            password: None,
            default_database: None,
            alertmanager_url: None,
            alertmanager_username: None,
            alertmanager_password: None,
            source: default_source(),
        }
    }

    pub fn with_credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.username = username;
        self.password = password;
        self
    }

    /// Checks the URL invariants; called for every entry at load time.
    pub fn validate(&self) -> Result<(), ProxyError> {
        parse_backend_url(&self.url).map_err(|e| {
            ProxyError::Config(format!("connection '{}' has an invalid url: {}", self.name, e))
        })?;

        if let Some(am_url) = &self.alertmanager_url {
            parse_backend_url(am_url).map_err(|e| {
                ProxyError::Config(format!(
                    "connection '{}' has an invalid alertmanagerUrl: {}",
                    self.name, e
                ))
            })?;
        }

        Ok(())
    }
}

/// On-disk layout of a connections file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionsFile {
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl ConnectionsFile {
    pub fn sample() -> Self {
        let mut influx = Connection::new("Production InfluxDB", BackendType::InfluxDb, "http://influxdb.example.com:8086")
            .with_credentials(Some("admin".to_string()), Some("changeme".to_string()));
        influx.default_database = Some("telegraf".to_string());

        let mut prometheus = Connection::new("Production Prometheus", BackendType::Prometheus, "http://prometheus.example.com:9090");
        prometheus.alertmanager_url = Some("http://alertmanager.example.com:9093".to_string());

        Self {
            connections: vec![influx, prometheus],
        }
    }

    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), ProxyError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ProxyError::Config(format!("Failed to serialize connections: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Parses `raw` and requires an absolute http or https URL with a host.
pub fn parse_backend_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| format!("'{}': {}", raw, e))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(format!("'{}': scheme '{}' is not http or https", raw, other)),
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(format!("'{}': missing host", raw));
    }
    Ok(url)
}

pub fn load_connections_file(path: impl AsRef<Path>) -> Result<Vec<Connection>, ProxyError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        ProxyError::Config(format!("Failed to read connections file {}: {}", path.display(), e))
    })?;
    let file: ConnectionsFile = serde_json::from_str(&content).map_err(|e| {
        ProxyError::Config(format!("Failed to parse connections file {}: {}", path.display(), e))
    })?;

    let mut connections = file.connections;
    for connection in &mut connections {
        connection.source = default_source();
        connection.validate()?;
    }

    Ok(connections)
}

/// Builds one connection per URL given on the command line for a backend type.
///
/// Empty strings count as "not given". Names are the explicit `name` or one
/// derived from the URL host; with several URLs every name gets a 1-based
/// index suffix.
pub fn build_from_flags(
    backend_type: BackendType,
    urls: &[String],
    username: Option<&str>,
    password: Option<&str>,
    name: Option<&str>,
) -> Result<Vec<Connection>, ProxyError> {
    let username = username.filter(|s| !s.is_empty()).map(str::to_string);
    let password = password.filter(|s| !s.is_empty()).map(str::to_string);
    let name = name.filter(|s| !s.is_empty());
    let multiple = urls.len() > 1;

    let mut connections = Vec::with_capacity(urls.len());
    for (i, url) in urls.iter().enumerate() {
        let mut display = match name {
            Some(name) => name.to_string(),
            None => name_from_url(url, backend_type.display_name()),
        };
        if multiple {
            display = format!("{} {}", display, i + 1);
        }

        let connection = Connection::new(display, backend_type, url.clone())
            .with_credentials(username.clone(), password.clone());
        connection.validate()?;
        connections.push(connection);
    }

    Ok(connections)
}

/// Links an Alertmanager URL to the first Prometheus connection in `connections`.
/// Returns `false` when there was nothing to attach it to.
pub fn attach_alertmanager(connections: &mut [Connection], alertmanager_url: &str) -> Result<bool, ProxyError> {
    parse_backend_url(alertmanager_url)
        .map_err(|e| ProxyError::Config(format!("invalid alertmanager url: {}", e)))?;

    match connections
        .iter_mut()
        .find(|c| c.backend_type == BackendType::Prometheus)
    {
        Some(connection) => {
            connection.alertmanager_url = Some(alertmanager_url.to_string());
            Ok(true)
        }
        None => Ok(false),
    }
}

pub fn merge(file_connections: Vec<Connection>, flag_connections: Vec<Connection>) -> Vec<Connection> {
    let mut merged = file_connections;
    merged.extend(flag_connections);
    merged
}

pub fn name_from_url(raw_url: &str, display: &str) -> String {
    let host = match Url::parse(raw_url) {
        Ok(url) => url.host_str().map(str::to_string),
        Err(_) => None,
    };

    match host.as_deref() {
        None | Some("") => display.to_string(),
        Some("localhost") | Some("127.0.0.1") | Some("[::1]") => format!("{} (local)", display),
        Some(host) => format!("{} ({})", display, host),
    }
}
