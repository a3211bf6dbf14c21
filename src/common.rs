use crate::error::ProxyError;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full, combinators::UnsyncBoxBody};
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::{Response, StatusCode};
use serde::Serialize;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Body type of every response this server produces, proxied or local.
pub type ProxyBody = UnsyncBoxBody<Bytes, BoxError>;

pub fn full_body<T: Into<Bytes>>(chunk: T) -> ProxyBody {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

pub fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

pub const CORS_ALLOW_ORIGIN: &str = "*";
pub const CORS_ALLOW_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";
pub const CORS_ALLOW_HEADERS: &str = "Content-Type, Authorization, X-Influxdb-Url, X-Influxdb-Username, X-Influxdb-Password, X-Proxy-Username, X-Proxy-Password";
pub const CORS_EXPOSE_HEADERS: &str = "X-Influxdb-Version, X-Tidedb-Version";

/// Sets the CORS headers, replacing whatever an upstream may have sent.
pub fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static(CORS_ALLOW_ORIGIN));
    headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(CORS_ALLOW_METHODS));
    headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(CORS_ALLOW_HEADERS));
    headers.insert(header::ACCESS_CONTROL_EXPOSE_HEADERS, HeaderValue::from_static(CORS_EXPOSE_HEADERS));
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

/// Common response builder utilities
pub struct ResponseBuilder;

impl ResponseBuilder {
    /// Serializes `value` as the JSON body of a response with `status`.
    pub fn json<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> Response<ProxyBody> {
        match serde_json::to_vec(value) {
            Ok(body) => Self::json_bytes(status, body),
            Err(e) => Self::json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
        }
    }

    pub fn json_bytes(status: StatusCode, body: impl Into<Bytes>) -> Response<ProxyBody> {
        let mut response = Response::new(full_body(body));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }

    /// `{"error": message}` with the given status.
    pub fn json_error(status: StatusCode, message: &str) -> Response<ProxyBody> {
        let body = serde_json::to_vec(&ErrorBody { error: message })
            .unwrap_or_else(|_| br#"{"error":"internal error"}"#.to_vec());
        Self::json_bytes(status, body)
    }

    pub fn from_error(err: &ProxyError) -> Response<ProxyBody> {
        Self::json_error(err.status_code(), &err.to_string())
    }

    pub fn no_content() -> Response<ProxyBody> {
        let mut response = Response::new(empty_body());
        *response.status_mut() = StatusCode::NO_CONTENT;
        response
    }

    pub fn redirect(status: StatusCode, location: &str) -> Response<ProxyBody> {
        let mut response = Response::new(empty_body());
        *response.status_mut() = status;
        match HeaderValue::from_str(location) {
            Ok(value) => {
                response.headers_mut().insert(header::LOCATION, value);
                response
            }
            Err(_) => Self::json_error(StatusCode::INTERNAL_SERVER_ERROR, "invalid redirect location"),
        }
    }

    pub fn not_found() -> Response<ProxyBody> {
        Self::json_error(StatusCode::NOT_FOUND, "Not found")
    }

    pub fn method_not_allowed(allow: &'static str) -> Response<ProxyBody> {
        let mut response = Self::json_error(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
        response
            .headers_mut()
            .insert(header::ALLOW, HeaderValue::from_static(allow));
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_json_error_body() {
        let response = ResponseBuilder::json_error(StatusCode::BAD_REQUEST, "Missing 'target' query parameter");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "Missing 'target' query parameter");
    }

    #[test]
    fn test_apply_cors_overrides_existing() {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("https://evil.example"));
        apply_cors(&mut headers);

        assert_eq!(headers.get_all(header::ACCESS_CONTROL_ALLOW_ORIGIN).iter().count(), 1);
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[header::ACCESS_CONTROL_EXPOSE_HEADERS], CORS_EXPOSE_HEADERS);
    }

    #[test]
    fn test_redirect() {
        let response = ResponseBuilder::redirect(StatusCode::FOUND, "/base/ui/");
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "/base/ui/");
    }
}
