use crate::config::{
    Config, DEFAULT_HOST, DEFAULT_PORT, LogFormat, LogLevel, LoggingConfig, TlsFiles, normalize_base_path,
    parse_byte_size, parse_duration,
};
use crate::connections::{self, BackendType, ConnectionsFile};
use crate::error::ProxyError;
use crate::logging::{parse_log_format, parse_log_level};
use clap::Parser;
use log::warn;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "timeseriesui",
    version,
    about = "Web UI for InfluxDB, Prometheus and Alertmanager, with a built-in API proxy"
)]
pub struct Args {
    #[arg(long, default_value_t = DEFAULT_PORT, help = "Port to listen on")]
    pub port: u16,

    #[arg(long, default_value = DEFAULT_HOST, help = "Host/IP to bind to")]
    pub host: String,

    #[arg(long, value_name = "PATH", default_value = "", help = "Base URL path prefix, e.g. /tsui")]
    pub base_path: String,

    #[arg(long, value_name = "FILE", help = "TLS certificate file (PEM)")]
    pub tls_cert: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "TLS private key file (PEM)")]
    pub tls_key: Option<PathBuf>,

    #[arg(long = "influxdb-url", value_name = "URL", help = "Add a default InfluxDB connection (repeatable)")]
    pub influxdb_urls: Vec<String>,

    #[arg(long, value_name = "USERNAME", help = "Default InfluxDB username")]
    pub influxdb_user: Option<String>,

    #[arg(long, value_name = "PASSWORD", help = "Default InfluxDB password")]
    pub influxdb_password: Option<String>,

    #[arg(long, value_name = "NAME", help = "Display name for the InfluxDB connection")]
    pub influxdb_name: Option<String>,

    #[arg(long = "prometheus-url", value_name = "URL", help = "Add a default Prometheus connection (repeatable)")]
    pub prometheus_urls: Vec<String>,

    #[arg(long, value_name = "USERNAME", help = "Default Prometheus basic-auth username")]
    pub prometheus_user: Option<String>,

    #[arg(long, value_name = "PASSWORD", help = "Default Prometheus basic-auth password")]
    pub prometheus_password: Option<String>,

    #[arg(long, value_name = "NAME", help = "Display name for the Prometheus connection")]
    pub prometheus_name: Option<String>,

    #[arg(long, value_name = "URL", help = "Alertmanager linked to the first --prometheus-url")]
    pub alertmanager_url: Option<String>,

    #[arg(long, value_name = "FILE", help = "JSON connections file")]
    pub connections: Option<PathBuf>,

    #[arg(long, default_value = "info", value_parser = parse_log_level, help = "Log verbosity: trace, debug, info, warn, error")]
    pub log_level: LogLevel,

    #[arg(long, default_value = "text", value_parser = parse_log_format, help = "Log format: text, json")]
    pub log_format: LogFormat,

    #[arg(long, value_name = "DURATION", default_value = "30s", help = "Timeout for proxied API requests")]
    pub proxy_timeout: String,

    #[arg(long, value_name = "SIZE", default_value = "50MB", help = "Max proxied response size")]
    pub max_response_size: String,

    #[arg(long, help = "Disable the Write Data feature")]
    pub disable_write: bool,

    #[arg(long, help = "Disable admin/destructive operations")]
    pub disable_admin: bool,

    #[arg(long, help = "Shorthand for --disable-write --disable-admin")]
    pub readonly: bool,

    #[arg(long, value_name = "FILE", help = "Write a sample connections file and exit")]
    pub generate_connections: Option<PathBuf>,
}

impl Args {
    pub fn logging(&self) -> LoggingConfig {
        LoggingConfig {
            level: self.log_level,
            format: self.log_format,
        }
    }

    /// Resolves the flags into the runtime configuration. Connections from
    /// `--connections` come first, flag-derived ones after.
    pub fn into_config(self) -> Result<Config, ProxyError> {
        let logging = self.logging();
        let tls = match (self.tls_cert, self.tls_key) {
            (Some(certificate), Some(private_key)) => Some(TlsFiles {
                certificate,
                private_key,
            }),
            (None, None) => None,
            _ => {
                return Err(ProxyError::Config(
                    "--tls-cert and --tls-key must be given together".to_string(),
                ));
            }
        };

        let file_connections = match &self.connections {
            Some(path) => connections::load_connections_file(path)?,
            None => Vec::new(),
        };

        let mut flag_connections = connections::build_from_flags(
            BackendType::InfluxDb,
            &self.influxdb_urls,
            self.influxdb_user.as_deref(),
            self.influxdb_password.as_deref(),
            self.influxdb_name.as_deref(),
        )?;
        let mut prometheus = connections::build_from_flags(
            BackendType::Prometheus,
            &self.prometheus_urls,
            self.prometheus_user.as_deref(),
            self.prometheus_password.as_deref(),
            self.prometheus_name.as_deref(),
        )?;

        if let Some(am_url) = self.alertmanager_url.as_deref().filter(|u| !u.is_empty()) {
            if !connections::attach_alertmanager(&mut prometheus, am_url)? {
                warn!("--alertmanager-url specified without --prometheus-url; it won't be used");
            }
        }
        flag_connections.extend(prometheus);

        Ok(Config {
            host: self.host,
            port: self.port,
            base_path: normalize_base_path(&self.base_path)?,
            tls,
            proxy_timeout: parse_duration(&self.proxy_timeout)?,
            max_response_size: parse_byte_size(&self.max_response_size)?,
            disable_write: self.disable_write || self.readonly,
            disable_admin: self.disable_admin || self.readonly,
            logging,
            connections: connections::merge(file_connections, flag_connections),
            ..Config::default()
        })
    }
}

/// Writes a sample connections file for `--generate-connections`.
pub fn generate_connections_file(path: &std::path::Path) -> Result<(), ProxyError> {
    ConnectionsFile::sample().to_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn parse(args: &[&str]) -> Args {
        let mut argv = vec!["timeseriesui"];
        argv.extend_from_slice(args);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]).into_config().unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.base_path, "");
        assert!(config.tls.is_none());
        assert_eq!(config.proxy_timeout, Duration::from_secs(30));
        assert_eq!(config.max_response_size, 50 * 1024 * 1024);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.connections.is_empty());
    }

    #[test]
    fn test_readonly_implies_both_switches() {
        let config = parse(&["--readonly"]).into_config().unwrap();
        assert!(config.disable_write);
        assert!(config.disable_admin);
    }

    #[test]
    fn test_flag_connections() {
        let config = parse(&[
            "--influxdb-url",
            "http://localhost:8086",
            "--influxdb-user",
            "admin",
            "--influxdb-password",
            "secret",
            "--prometheus-url",
            "http://prom-a:9090",
            "--prometheus-url",
            "http://prom-b:9090",
            "--alertmanager-url",
            "http://am:9093",
        ])
        .into_config()
        .unwrap();

        let names: Vec<_> = config.connections.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["InfluxDB (local)", "Prometheus (prom-a) 1", "Prometheus (prom-b) 2"]);
        assert_eq!(config.connections[0].username.as_deref(), Some("admin"));
        assert_eq!(config.connections[1].alertmanager_url.as_deref(), Some("http://am:9093"));
        assert!(config.connections[2].alertmanager_url.is_none());
    }

    #[test]
    fn test_alertmanager_without_prometheus_is_ignored() {
        let config = parse(&["--alertmanager-url", "http://am:9093"]).into_config().unwrap();
        assert!(config.connections.is_empty());
    }

    #[test]
    fn test_invalid_combinations_are_fatal() {
        assert!(matches!(
            parse(&["--tls-cert", "cert.pem"]).into_config(),
            Err(ProxyError::Config(_))
        ));
        assert!(matches!(
            parse(&["--proxy-timeout", "soon"]).into_config(),
            Err(ProxyError::Config(_))
        ));
        assert!(matches!(
            parse(&["--max-response-size", "0"]).into_config(),
            Err(ProxyError::Config(_))
        ));
        assert!(matches!(
            parse(&["--influxdb-url", "localhost:8086"]).into_config(),
            Err(ProxyError::Config(_))
        ));
    }

    #[test]
    fn test_base_path_and_tls() {
        let config = parse(&["--base-path", "tsui/", "--tls-cert", "c.pem", "--tls-key", "k.pem"])
            .into_config()
            .unwrap();
        assert_eq!(config.base_path, "/tsui");
        assert_eq!(config.tls.unwrap().private_key, PathBuf::from("k.pem"));
    }

    #[test]
    fn test_invalid_log_level_rejected_by_parser() {
        assert!(Args::try_parse_from(["timeseriesui", "--log-level", "loud"]).is_err());
    }
}
