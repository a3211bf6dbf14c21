use crate::common::{BoxError, ProxyBody, ResponseBuilder, apply_cors};
use crate::config::Config;
use crate::connections::BackendType;
use crate::error::ProxyError;
use crate::resolver::{HeaderResolver, QueryParamResolver, TargetResolver};
use crate::reverse_proxy::{HttpClient, ReverseProxy, build_client};
use crate::static_files::{AssetSource, StaticFileHandler};
use bytes::Bytes;
use hyper::body::Body;
use hyper::{Method, Request, Response, StatusCode};
use log::debug;
use serde::Serialize;
use std::sync::Arc;

const PROXY_PREFIX: &str = "/proxy/";
const UI_PREFIX: &str = "/ui/";
const LEGACY_ROUTES: [&str; 3] = ["/query", "/write", "/ping"];

/// Everything request handling needs, built once before the listener
/// starts and never mutated afterwards.
pub struct AppContext {
    pub config: Config,
    pub client: HttpClient,
    pub assets: Arc<dyn AssetSource>,
}

impl AppContext {
    pub fn new(config: Config, assets: Arc<dyn AssetSource>) -> Result<Arc<Self>, ProxyError> {
        if config.max_response_size == 0 {
            return Err(ProxyError::Config("Max response size must be greater than zero".to_string()));
        }
        for connection in &config.connections {
            connection.validate()?;
        }

        Ok(Arc::new(Self {
            client: build_client(),
            config,
            assets,
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route<'a> {
    Mode,
    Connections,
    Health,
    /// `/proxy/<backend>[/...]`; the suffix is what follows the backend segment.
    Generic { backend: BackendType, suffix: &'a str },
    /// `/query`, `/write`, `/ping`, `/debug[/...]`; the suffix is the whole relative path.
    Legacy { suffix: &'a str },
    Ui { path: &'a str },
    UiRedirect,
    RootRedirect,
    NotFound,
}

/// Classifies a request path. Paths outside `base_path` never match.
pub fn match_route<'a>(base_path: &str, path: &'a str) -> Route<'a> {
    let relative = match path.strip_prefix(base_path) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => return Route::NotFound,
    };

    match relative {
        "" | "/" => return Route::RootRedirect,
        "/ui" => return Route::UiRedirect,
        "/api/mode" => return Route::Mode,
        "/api/v1/connections" => return Route::Connections,
        "/api/v1/health" => return Route::Health,
        _ => {}
    }

    if let Some(path) = relative.strip_prefix(UI_PREFIX) {
        return Route::Ui { path };
    }

    if let Some(rest) = relative.strip_prefix(PROXY_PREFIX) {
        let (segment, suffix) = match rest.find('/') {
            Some(pos) => (&rest[..pos], &rest[pos..]),
            None => (rest, ""),
        };
        let backend = match segment {
            "influxdb" => BackendType::InfluxDb,
            "prometheus" => BackendType::Prometheus,
            "alertmanager" => BackendType::Alertmanager,
            _ => return Route::NotFound,
        };
        return Route::Generic { backend, suffix };
    }

    if LEGACY_ROUTES.contains(&relative) || relative == "/debug" || relative.starts_with("/debug/") {
        return Route::Legacy { suffix: relative };
    }

    Route::NotFound
}

#[derive(Serialize)]
struct Health<'a> {
    status: &'static str,
    version: &'a str,
}

/// Dispatches every inbound request to an API endpoint, a forwarder or the UI.
pub struct Router {
    context: Arc<AppContext>,
    legacy: ReverseProxy,
    generic: ReverseProxy,
    ui: StaticFileHandler,
    connections_json: Bytes,
}

impl Router {
    pub fn new(context: Arc<AppContext>) -> Result<Self, ProxyError> {
        let config = &context.config;

        let legacy = ReverseProxy::new(
            context.client.clone(),
            TargetResolver::Header(HeaderResolver::influxdb(&config.connections)),
            config.proxy_timeout,
            config.max_response_size,
        );
        let generic = ReverseProxy::new(
            context.client.clone(),
            TargetResolver::QueryParam(QueryParamResolver::default()),
            config.proxy_timeout,
            config.max_response_size,
        );
        let ui = StaticFileHandler::new(context.assets.clone(), &config.base_path)?;

        let connections_json = serde_json::to_vec(&config.connections)
            .map_err(|e| ProxyError::Config(format!("Failed to serialize connections: {}", e)))?;

        Ok(Self {
            context,
            legacy,
            generic,
            ui,
            connections_json: Bytes::from(connections_json),
        })
    }

    pub async fn handle<B>(&self, req: Request<B>) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let config = &self.context.config;
        let path = req.uri().path().to_string();

        match match_route(&config.base_path, &path) {
            Route::Generic { backend, suffix } => {
                debug!("Generic {} proxy: {} {}", backend, req.method(), suffix);
                self.generic.handle(req, suffix).await
            }
            Route::Legacy { suffix } => self.legacy.handle(req, suffix).await,
            Route::Ui { path } => self.ui.handle(req.method(), req.headers(), path),
            Route::Mode => match *req.method() {
                Method::GET | Method::HEAD => ResponseBuilder::json(StatusCode::OK, &config.mode_info()),
                _ => ResponseBuilder::method_not_allowed("GET, HEAD"),
            },
            Route::Health => match *req.method() {
                Method::GET | Method::HEAD => ResponseBuilder::json(
                    StatusCode::OK,
                    &Health {
                        status: "ok",
                        version: &config.version,
                    },
                ),
                _ => ResponseBuilder::method_not_allowed("GET, HEAD"),
            },
            Route::Connections => {
                let mut response = match *req.method() {
                    Method::OPTIONS => ResponseBuilder::no_content(),
                    Method::GET | Method::HEAD => {
                        ResponseBuilder::json_bytes(StatusCode::OK, self.connections_json.clone())
                    }
                    _ => ResponseBuilder::method_not_allowed("GET, HEAD, OPTIONS"),
                };
                apply_cors(response.headers_mut());
                response
            }
            Route::UiRedirect => {
                ResponseBuilder::redirect(StatusCode::MOVED_PERMANENTLY, &format!("{}/ui/", config.base_path))
            }
            Route::RootRedirect => ResponseBuilder::redirect(StatusCode::FOUND, &format!("{}/ui/", config.base_path)),
            Route::NotFound => ResponseBuilder::not_found(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::Connection;
    use crate::static_files::MemoryAssets;
    use http_body_util::{BodyExt, Full};

    fn router(config: Config) -> Router {
        let assets = MemoryAssets::new()
            .with_file("index.html", "<html><head></head><body>ui</body></html>")
            .with_file("assets/app.js", "app()");
        let context = AppContext::new(config, Arc::new(assets)).unwrap();
        Router::new(context).unwrap()
    }

    fn get(uri: &str) -> Request<Full<Bytes>> {
        Request::builder().uri(uri).body(Full::new(Bytes::new())).unwrap()
    }

    async fn json(response: Response<ProxyBody>) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[test]
    fn test_match_route_without_base() {
        assert_eq!(match_route("", "/"), Route::RootRedirect);
        assert_eq!(match_route("", ""), Route::RootRedirect);
        assert_eq!(match_route("", "/ui"), Route::UiRedirect);
        assert_eq!(match_route("", "/ui/"), Route::Ui { path: "" });
        assert_eq!(match_route("", "/ui/assets/app.js"), Route::Ui { path: "assets/app.js" });
        assert_eq!(match_route("", "/api/mode"), Route::Mode);
        assert_eq!(match_route("", "/ping"), Route::Legacy { suffix: "/ping" });
        assert_eq!(match_route("", "/debug"), Route::Legacy { suffix: "/debug" });
        assert_eq!(match_route("", "/debug/vars"), Route::Legacy { suffix: "/debug/vars" });
        assert_eq!(match_route("", "/debugger"), Route::NotFound);
        assert_eq!(match_route("", "/query/extra"), Route::NotFound);
        assert_eq!(
            match_route("", "/proxy/prometheus/api/v1/query"),
            Route::Generic {
                backend: BackendType::Prometheus,
                suffix: "/api/v1/query"
            }
        );
        assert_eq!(
            match_route("", "/proxy/alertmanager"),
            Route::Generic {
                backend: BackendType::Alertmanager,
                suffix: ""
            }
        );
        assert_eq!(match_route("", "/proxy/mysql/x"), Route::NotFound);
        assert_eq!(match_route("", "/nothing"), Route::NotFound);
    }

    #[test]
    fn test_match_route_with_base() {
        assert_eq!(match_route("/tsui", "/tsui"), Route::RootRedirect);
        assert_eq!(match_route("/tsui", "/tsui/"), Route::RootRedirect);
        assert_eq!(match_route("/tsui", "/tsui/query"), Route::Legacy { suffix: "/query" });
        assert_eq!(match_route("/tsui", "/query"), Route::NotFound);
        assert_eq!(match_route("/tsui", "/tsuix/query"), Route::NotFound);
        assert_eq!(match_route("/tsui", "/tsui/api/v1/health"), Route::Health);
    }

    #[tokio::test]
    async fn test_mode_endpoint() {
        let config = Config {
            disable_write: true,
            ..Config::default()
        };
        let response = router(config).handle(get("/api/mode")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["mode"], "standalone");
        assert_eq!(body["disableWrite"], true);
        assert_eq!(body["disableAdmin"], false);
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let response = router(Config::default()).handle(get("/api/v1/health")).await;
        let body = json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_connections_endpoint_includes_credentials_and_cors() {
        let config = Config {
            connections: vec![
                Connection::new("Influx", BackendType::InfluxDb, "http://localhost:8086")
                    .with_credentials(Some("admin".to_string()), Some("secret".to_string())),
            ],
            ..Config::default()
        };
        let r = router(config);

        let response = r.handle(get("/api/v1/connections")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
        let body = json(response).await;
        assert_eq!(body[0]["name"], "Influx");
        assert_eq!(body[0]["type"], "influxdb");
        assert_eq!(body[0]["password"], "secret");
        assert_eq!(body[0]["source"], "cli");

        let preflight = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/v1/connections")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = r.handle(preflight).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
    }

    #[tokio::test]
    async fn test_redirects_honour_base_path() {
        let config = Config {
            base_path: "/tsui".to_string(),
            ..Config::default()
        };
        let r = router(config);

        let response = r.handle(get("/tsui")).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()["location"], "/tsui/ui/");

        let response = r.handle(get("/tsui/ui")).await;
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers()["location"], "/tsui/ui/");

        let response = r.handle(get("/ui/")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_path_is_json_not_found() {
        let response = router(Config::default()).handle(get("/nope")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json(response).await["error"], "Not found");
    }

    #[tokio::test]
    async fn test_ui_fallback() {
        let response = router(Config::default()).handle(get("/ui/settings/connections")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(String::from_utf8_lossy(&body).contains("<body>ui</body>"));
    }

    #[test]
    fn test_context_rejects_invalid_connection() {
        let config = Config {
            connections: vec![Connection::new("bad", BackendType::Prometheus, "ftp://example.com")],
            ..Config::default()
        };
        let result = AppContext::new(config, Arc::new(MemoryAssets::new()));
        assert!(matches!(result, Err(ProxyError::Config(_))));
    }
}
