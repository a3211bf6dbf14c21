use crate::common::{BoxError, ProxyBody, ResponseBuilder, apply_cors};
use crate::error::ProxyError;
use crate::resolver::{Credentials, ResolvedTarget, TargetResolver, forwardable_headers};
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use http_body_util::{BodyExt, Limited};
use hyper::body::{Body, Frame, SizeHint};
use hyper::header::{self, HeaderName, HeaderValue};
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use log::{debug, warn};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::time::{Sleep, sleep_until, timeout_at};

/// Outbound client shared by every forwarder; plain HTTP and HTTPS upstreams.
pub type HttpClient = Client<HttpsConnector<HttpConnector>, ProxyBody>;

// Hop-by-hop headers never relayed from an upstream response
static HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

pub fn build_client() -> HttpClient {
    Client::builder(TokioExecutor::new()).build(HttpsConnector::new())
}

/// Forwards one inbound request to the upstream chosen by its resolver and
/// relays the answer. The legacy InfluxDB routes and the generic
/// `/proxy/<backend>/` routes are two instances of this type.
#[derive(Clone)]
pub struct ReverseProxy {
    client: HttpClient,
    resolver: TargetResolver,
    timeout_duration: Duration,
    max_response_size: u64,
}

impl ReverseProxy {
    pub fn new(client: HttpClient, resolver: TargetResolver, timeout_duration: Duration, max_response_size: u64) -> Self {
        Self {
            client,
            resolver,
            timeout_duration,
            max_response_size,
        }
    }

    /// Handles a request on a proxy route. `suffix` is the request path with
    /// the route prefix removed. Never fails: every error becomes a JSON body.
    pub async fn handle<B>(&self, req: Request<B>, suffix: &str) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        if req.method() == Method::OPTIONS {
            let mut response = ResponseBuilder::no_content();
            apply_cors(response.headers_mut());
            return response;
        }

        let started = Instant::now();
        let method = req.method().clone();

        let mut response = match self.process_request(req, suffix).await {
            Ok(response) => {
                debug!(
                    "{} {} via {} resolver -> {} ({} ms)",
                    method,
                    suffix,
                    self.resolver.kind(),
                    response.status(),
                    started.elapsed().as_millis()
                );
                response
            }
            Err(e) => {
                warn!("Proxy error for {} {}: {}", method, suffix, e);
                ResponseBuilder::from_error(&e)
            }
        };

        apply_cors(response.headers_mut());
        response
    }

    async fn process_request<B>(&self, req: Request<B>, suffix: &str) -> Result<Response<ProxyBody>, ProxyError>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let target = self
            .resolver
            .resolve(req.headers(), req.uri().query(), suffix)?;

        debug!(
            "Forwarding {} to {}://{}{}",
            req.method(),
            target.url.scheme(),
            target.url.host_str().unwrap_or_default(),
            target.url.path()
        );

        let method = req.method().clone();
        let outbound = Self::build_request(req, &target)?;

        // One deadline covers the headers and the whole body
        let deadline = tokio::time::Instant::now() + self.timeout_duration;
        let response = timeout_at(deadline, self.client.request(outbound))
            .await
            .map_err(|_| ProxyError::Timeout(self.timeout_duration))?
            .map_err(|e| ProxyError::upstream(&e))?;

        self.relay_response(&method, response, deadline)
    }

    fn build_request<B>(req: Request<B>, target: &ResolvedTarget) -> Result<Request<ProxyBody>, ProxyError>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();

        let uri: Uri = target
            .url
            .as_str()
            .parse()
            .map_err(|e: hyper::http::uri::InvalidUri| ProxyError::Http(e.to_string()))?;

        let mut outbound = Request::new(body.map_err(Into::<BoxError>::into).boxed_unsync());
        *outbound.method_mut() = parts.method;
        *outbound.uri_mut() = uri;

        let headers = outbound.headers_mut();
        headers.extend(forwardable_headers(&parts.headers));
        if let Some(credentials) = &target.basic_auth {
            headers.insert(header::AUTHORIZATION, basic_auth_header(credentials)?);
        }

        Ok(outbound)
    }

    fn relay_response<B>(
        &self,
        method: &Method,
        response: Response<B>,
        deadline: tokio::time::Instant,
    ) -> Result<Response<ProxyBody>, ProxyError>
    where
        B: Body<Data = Bytes> + Unpin + Send + 'static,
        B::Error: Into<BoxError>,
    {
        if carries_body(method, response.status()) {
            let declared_length = response
                .headers()
                .get(header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            if declared_length.is_some_and(|len| len > self.max_response_size) {
                return Err(ProxyError::ResponseTooLarge {
                    limit: self.max_response_size,
                });
            }
        }

        let (mut parts, body) = response.into_parts();
        for name in &HOP_BY_HOP {
            parts.headers.remove(name);
        }

        let limit = usize::try_from(self.max_response_size).unwrap_or(usize::MAX);
        let body = DeadlineBody::new(body, deadline, self.timeout_duration);
        let body = Limited::new(body, limit).boxed_unsync();
        Ok(Response::from_parts(parts, body))
    }
}

/// `Content-Length` on these answers describes a body that is never sent.
fn carries_body(method: &Method, status: StatusCode) -> bool {
    method != Method::HEAD
        && !status.is_informational()
        && status != StatusCode::NO_CONTENT
        && status != StatusCode::NOT_MODIFIED
}

/// Upstream body that fails with [`ProxyError::Timeout`] once the request
/// deadline passes, so a stalled stream cannot hold the relay open.
struct DeadlineBody<B> {
    inner: B,
    sleep: Pin<Box<Sleep>>,
    timeout: Duration,
}

impl<B> DeadlineBody<B> {
    fn new(inner: B, deadline: tokio::time::Instant, timeout: Duration) -> Self {
        Self {
            inner,
            sleep: Box::pin(sleep_until(deadline)),
            timeout,
        }
    }
}

impl<B> Body for DeadlineBody<B>
where
    B: Body + Unpin,
    B::Error: Into<BoxError>,
{
    type Data = B::Data;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if this.sleep.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Some(Err(Box::new(ProxyError::Timeout(this.timeout)))));
        }
        Pin::new(&mut this.inner).poll_frame(cx).map_err(Into::into)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

fn basic_auth_header(credentials: &Credentials) -> Result<HeaderValue, ProxyError> {
    let encoded = general_purpose::STANDARD.encode(format!("{}:{}", credentials.username, credentials.password));
    HeaderValue::from_str(&format!("Basic {}", encoded)).map_err(|e| ProxyError::Http(e.to_string()))
}
