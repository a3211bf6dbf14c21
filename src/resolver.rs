//! Target resolution for the proxy routes.
//!
//! A resolver turns the control inputs of an inbound request (override
//! headers, `target`/`path` query parameters) plus the startup connections
//! into the exact upstream URL and credentials. Nothing here touches the
//! network, so every policy is testable on plain values.

use crate::connections::{BackendType, Connection, parse_backend_url};
use crate::error::ProxyError;
use hyper::header::{self, HeaderMap, HeaderName};
use url::{Url, form_urlencoded};

/// Inbound headers copied onto the outbound request. Nothing else crosses.
pub static FORWARDED_HEADERS: [HeaderName; 4] = [
    header::CONTENT_TYPE,
    header::ACCEPT,
    header::CONTENT_ENCODING,
    header::AUTHORIZATION,
];

pub static X_INFLUXDB_URL: HeaderName = HeaderName::from_static("x-influxdb-url");
pub static X_INFLUXDB_USERNAME: HeaderName = HeaderName::from_static("x-influxdb-username");
pub static X_INFLUXDB_PASSWORD: HeaderName = HeaderName::from_static("x-influxdb-password");
pub static X_PROXY_USERNAME: HeaderName = HeaderName::from_static("x-proxy-username");
pub static X_PROXY_PASSWORD: HeaderName = HeaderName::from_static("x-proxy-password");

const TARGET_PARAM: &str = "target";
const PATH_PARAM: &str = "path";

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where one request goes. Lives only for that request.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTarget {
    /// Complete upstream URL including path and query.
    pub url: Url,
    /// Sent as HTTP basic auth on the outbound request.
    pub basic_auth: Option<Credentials>,
}

/// Header-selected policy used by the InfluxDB compatibility routes.
#[derive(Debug, Clone)]
pub struct HeaderResolver {
    backend_type: BackendType,
    url_header: HeaderName,
    username_header: HeaderName,
    password_header: HeaderName,
    defaults: Vec<Connection>,
}

impl HeaderResolver {
    pub fn new(
        backend_type: BackendType,
        url_header: HeaderName,
        username_header: HeaderName,
        password_header: HeaderName,
        connections: &[Connection],
    ) -> Self {
        Self {
            backend_type,
            url_header,
            username_header,
            password_header,
            defaults: connections
                .iter()
                .filter(|c| c.backend_type == backend_type)
                .cloned()
                .collect(),
        }
    }

    /// `/query`, `/write`, `/ping`, `/debug/*`: `X-Influxdb-*` overrides on
    /// top of the configured InfluxDB connections.
    pub fn influxdb(connections: &[Connection]) -> Self {
        Self::new(
            BackendType::InfluxDb,
            X_INFLUXDB_URL.clone(),
            X_INFLUXDB_USERNAME.clone(),
            X_INFLUXDB_PASSWORD.clone(),
            connections,
        )
    }

    /// A single fixed backend, still overridable per request by header.
    pub fn fixed(connection: Connection) -> Self {
        Self::influxdb(std::slice::from_ref(&connection))
    }

    fn resolve(&self, headers: &HeaderMap, query: Option<&str>, suffix: &str) -> Result<ResolvedTarget, ProxyError> {
        let override_url = header_value(headers, &self.url_header);

        let (raw_target, matched) = match override_url {
            Some(url) => {
                let matched = self
                    .defaults
                    .iter()
                    .find(|c| c.url.trim_end_matches('/') == url.trim_end_matches('/'));
                (url, matched)
            }
            None => match self.defaults.first() {
                Some(connection) => (connection.url.as_str(), Some(connection)),
                None => {
                    return Err(ProxyError::NoTarget(format!(
                        "No {} connection configured. Add a connection in the UI.",
                        self.backend_type.display_name()
                    )));
                }
            },
        };

        let mut url = parse_backend_url(raw_target)
            .map_err(|e| ProxyError::InvalidTarget(format!("Invalid target URL: {}", e)))?;

        let path = join_path(url.path(), suffix);
        url.set_path(&path);
        url.set_fragment(None);

        let username = header_value(headers, &self.username_header);
        let password = header_value(headers, &self.password_header);
        let (username, password) = if username.is_some() || password.is_some() {
            (username, password)
        } else {
            match matched {
                Some(connection) => (connection.username.as_deref(), connection.password.as_deref()),
                None => (None, None),
            }
        };

        url.set_query(inject_credentials(query, username, password).as_deref());

        Ok(ResolvedTarget { url, basic_auth: None })
    }
}

/// Query-parameter policy of the generic `/proxy/<backend>/` routes.
#[derive(Debug, Clone)]
pub struct QueryParamResolver {
    username_header: HeaderName,
    password_header: HeaderName,
}

impl Default for QueryParamResolver {
    fn default() -> Self {
        Self {
            username_header: X_PROXY_USERNAME.clone(),
            password_header: X_PROXY_PASSWORD.clone(),
        }
    }
}

impl QueryParamResolver {
    fn resolve(&self, headers: &HeaderMap, query: Option<&str>, suffix: &str) -> Result<ResolvedTarget, ProxyError> {
        let mut target = None;
        let mut api_path = None;
        let mut forwarded = Vec::new();

        for (key, value) in form_urlencoded::parse(query.unwrap_or("").as_bytes()) {
            match key.as_ref() {
                TARGET_PARAM => {
                    target.get_or_insert(value);
                }
                PATH_PARAM => {
                    api_path.get_or_insert(value);
                }
                _ => forwarded.push((key, value)),
            }
        }

        let target = target
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ProxyError::InvalidTarget("Missing 'target' query parameter".to_string()))?;

        let mut url = parse_backend_url(&target).map_err(|_| {
            ProxyError::InvalidTarget("Invalid target URL: must use http:// or https://".to_string())
        })?;

        let tail = match api_path.as_deref() {
            Some(p) if !p.is_empty() => p,
            _ => suffix,
        };
        let path = join_path(url.path(), tail);
        url.set_path(&path);
        url.set_fragment(None);

        if !forwarded.is_empty() {
            url.query_pairs_mut().extend_pairs(forwarded.iter());
        }

        let username = header_value(headers, &self.username_header);
        let password = header_value(headers, &self.password_header);
        let basic_auth = if username.is_some() || password.is_some() {
            Some(Credentials {
                username: username.unwrap_or_default().to_string(),
                password: password.unwrap_or_default().to_string(),
            })
        } else {
            None
        };

        Ok(ResolvedTarget { url, basic_auth })
    }
}

/// Resolution strategy a forwarder is built with.
#[derive(Debug, Clone)]
pub enum TargetResolver {
    Header(HeaderResolver),
    QueryParam(QueryParamResolver),
}

impl TargetResolver {
    /// `suffix` is the inbound path with the route prefix already removed.
    pub fn resolve(&self, headers: &HeaderMap, query: Option<&str>, suffix: &str) -> Result<ResolvedTarget, ProxyError> {
        match self {
            TargetResolver::Header(resolver) => resolver.resolve(headers, query, suffix),
            TargetResolver::QueryParam(resolver) => resolver.resolve(headers, query, suffix),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TargetResolver::Header(_) => "header",
            TargetResolver::QueryParam(_) => "query",
        }
    }
}

/// Copies the allow-listed headers, keeping repeated values.
pub fn forwardable_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for name in &FORWARDED_HEADERS {
        for value in inbound.get_all(name) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}

fn header_value<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Base path without its trailing slash followed by `tail` with exactly one
/// leading slash.
fn join_path(base: &str, tail: &str) -> String {
    let base = base.trim_end_matches('/');
    if tail.is_empty() {
        return if base.is_empty() { "/".to_string() } else { base.to_string() };
    }
    if tail.starts_with('/') {
        format!("{}{}", base, tail)
    } else {
        format!("{}/{}", base, tail)
    }
}

/// Appends `u`/`p` to the raw query unless the caller already supplied them.
fn inject_credentials(query: Option<&str>, username: Option<&str>, password: Option<&str>) -> Option<String> {
    let original = query.unwrap_or("");
    let mut has_u = false;
    let mut has_p = false;
    for (key, _) in form_urlencoded::parse(original.as_bytes()) {
        match key.as_ref() {
            "u" => has_u = true,
            "p" => has_p = true,
            _ => {}
        }
    }

    let mut extra = form_urlencoded::Serializer::new(String::new());
    let mut injected = false;
    if let Some(u) = username.filter(|u| !u.is_empty() && !has_u) {
        extra.append_pair("u", u);
        injected = true;
    }
    if let Some(p) = password.filter(|p| !p.is_empty() && !has_p) {
        extra.append_pair("p", p);
        injected = true;
    }

    let extra = extra.finish();
    match (original.is_empty(), injected) {
        (true, false) => None,
        (true, true) => Some(extra),
        (false, false) => Some(original.to_string()),
        (false, true) => Some(format!("{}&{}", original, extra)),
    }
}
