use crate::common::{ProxyBody, ResponseBuilder, empty_body, full_body};
use crate::error::ProxyError;
use base64::{Engine as _, engine::general_purpose};
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::{Method, Response, StatusCode};
use percent_encoding::percent_decode_str;
use rust_embed::RustEmbed;
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Entry document of the single-page app; the fallback for unknown paths.
pub const INDEX_FILE: &str = "index.html";

const CACHE_CONTROL_ASSET: &str = "public, max-age=3600";
const CACHE_CONTROL_ENTRY: &str = "no-cache";

/// One file of the UI bundle.
#[derive(Debug, Clone)]
pub struct Asset {
    pub data: Cow<'static, [u8]>,
    pub last_modified: Option<SystemTime>,
    pub etag: Option<String>,
}

/// Read-only file tree the UI is served from.
pub trait AssetSource: Send + Sync {
    /// `path` is relative to the tree root, without a leading slash.
    fn get(&self, path: &str) -> Option<Asset>;
}

/// The compiled SPA, embedded into the binary at build time.
#[derive(RustEmbed)]
#[folder = "ui/dist/"]
pub struct EmbeddedUi;

impl AssetSource for EmbeddedUi {
    fn get(&self, path: &str) -> Option<Asset> {
        <EmbeddedUi as RustEmbed>::get(path).map(|file| Asset {
            etag: Some(format!("\"{}\"", hex::encode(&file.metadata.sha256_hash()[..16]))),
            last_modified: file
                .metadata
                .last_modified()
                .map(|secs| UNIX_EPOCH + Duration::from_secs(secs)),
            data: file.data,
        })
    }
}

/// In-memory tree, for alternative bundles and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryAssets {
    files: HashMap<String, Asset>,
}

impl MemoryAssets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: &str, data: impl Into<Vec<u8>>) -> Self {
        self.insert(path, data, None);
        self
    }

    pub fn insert(&mut self, path: &str, data: impl Into<Vec<u8>>, last_modified: Option<SystemTime>) {
        let data = data.into();
        let etag = format!("\"{}\"", hex::encode(&Sha256::digest(&data)[..16]));
        self.files.insert(
            path.trim_start_matches('/').to_string(),
            Asset {
                data: Cow::Owned(data),
                last_modified,
                etag: Some(etag),
            },
        );
    }
}

impl AssetSource for MemoryAssets {
    fn get(&self, path: &str) -> Option<Asset> {
        self.files.get(path).cloned()
    }
}

/// Serves the UI bundle below `{base}/ui/`, answering unknown paths with the
/// entry document so client-side routes survive a reload.
pub struct StaticFileHandler {
    assets: Arc<dyn AssetSource>,
    index: Asset,
}

impl StaticFileHandler {
    pub fn new(assets: Arc<dyn AssetSource>, base_path: &str) -> Result<Self, ProxyError> {
        let index = assets.get(INDEX_FILE).ok_or_else(|| {
            ProxyError::Config(format!("UI bundle is missing its entry document '{}'", INDEX_FILE))
        })?;
        let index = inject_base_path(index, base_path);

        Ok(Self { assets, index })
    }

    /// `relative_path` is the request path with the UI prefix stripped.
    pub fn handle(&self, method: &Method, headers: &HeaderMap, relative_path: &str) -> Response<ProxyBody> {
        if method != Method::GET && method != Method::HEAD {
            return ResponseBuilder::method_not_allowed("GET, HEAD");
        }
        let is_head = method == Method::HEAD;

        let decoded = percent_decode_str(relative_path).decode_utf8_lossy();
        let path = decoded.trim_start_matches('/');

        if path.is_empty() || path == INDEX_FILE {
            return self.serve(&self.index, INDEX_FILE, true, is_head, headers);
        }

        match self.assets.get(path) {
            Some(asset) => self.serve(&asset, path, false, is_head, headers),
            None => self.serve(&self.index, INDEX_FILE, true, is_head, headers),
        }
    }

    fn serve(&self, asset: &Asset, name: &str, is_entry: bool, is_head: bool, request_headers: &HeaderMap) -> Response<ProxyBody> {
        let not_modified = is_not_modified(asset, request_headers);

        let mut response = if not_modified || is_head {
            Response::new(empty_body())
        } else {
            Response::new(full_body(asset.data.to_vec()))
        };
        *response.status_mut() = if not_modified { StatusCode::NOT_MODIFIED } else { StatusCode::OK };

        let headers = response.headers_mut();
        let cache_control = if is_entry { CACHE_CONTROL_ENTRY } else { CACHE_CONTROL_ASSET };
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(cache_control));

        if let Some(etag) = asset.etag.as_deref().and_then(|e| HeaderValue::from_str(e).ok()) {
            headers.insert(header::ETAG, etag);
        }
        if let Some(modified) = asset.last_modified {
            if let Ok(value) = HeaderValue::from_str(&httpdate::fmt_http_date(modified)) {
                headers.insert(header::LAST_MODIFIED, value);
            }
        }

        if !not_modified {
            if let Ok(value) = HeaderValue::from_str(&guess_mime_type(name)) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(asset.data.len()));
        }

        response
    }
}

fn is_not_modified(asset: &Asset, headers: &HeaderMap) -> bool {
    if let Some(if_none_match) = headers.get(header::IF_NONE_MATCH).and_then(|v| v.to_str().ok()) {
        return match &asset.etag {
            Some(etag) => if_none_match
                .split(',')
                .map(str::trim)
                .any(|candidate| candidate == "*" || candidate.trim_start_matches("W/") == etag),
            None => false,
        };
    }

    let since = headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| httpdate::parse_http_date(v).ok());

    match (since, asset.last_modified) {
        (Some(since), Some(modified)) => {
            // HTTP dates have one-second resolution
            let modified_secs = modified.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
            let since_secs = since.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
            modified_secs <= since_secs
        }
        _ => false,
    }
}

/// Makes the base path visible to the SPA as `window.__TSUI_BASE__`.
fn inject_base_path(mut index: Asset, base_path: &str) -> Asset {
    if base_path.is_empty() {
        return index;
    }

    let literal = serde_json::to_string(base_path)
        .unwrap_or_else(|_| "\"\"".to_string())
        .replace('<', "\\u003c");
    let script = format!("<script>window.__TSUI_BASE__={};</script>", literal);

    let html = String::from_utf8_lossy(&index.data);
    let html = match html.find("</head>") {
        Some(pos) => format!("{}{}{}", &html[..pos], script, &html[pos..]),
        None => format!("{}{}", script, html),
    };

    let tag = general_purpose::URL_SAFE_NO_PAD.encode(base_path);
    index.etag = index
        .etag
        .map(|etag| format!("\"{}-{}\"", etag.trim_matches('"'), tag));
    index.data = Cow::Owned(html.into_bytes());
    index
}

fn guess_mime_type(name: &str) -> String {
    let mime = mime_guess::from_path(Path::new(name)).first_or_octet_stream();

    // Add charset for text-based MIME types
    let mime_str = mime.as_ref();
    if mime_str.starts_with("text/") || mime_str == "application/json" || mime_str == "application/xml" {
        format!("{}; charset=utf-8", mime_str)
    } else {
        mime_str.to_string()
    }
}
