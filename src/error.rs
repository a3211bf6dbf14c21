use hyper::StatusCode;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    NoTarget(String),

    #[error("{0}")]
    InvalidTarget(String),

    #[error("Connection failed: {0}")]
    Upstream(String),

    #[error("Connection failed: upstream did not respond within {0:?}")]
    Timeout(Duration),

    #[error("Upstream response exceeds the maximum size of {limit} bytes")]
    ResponseTooLarge { limit: u64 },

    #[error("Failed to create request: {0}")]
    Http(String),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),
}

impl ProxyError {
    /// Status reported to the caller when this error ends a request.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::InvalidTarget(_) | ProxyError::Url(_) => StatusCode::BAD_REQUEST,
            ProxyError::NoTarget(_)
            | ProxyError::Upstream(_)
            | ProxyError::Timeout(_)
            | ProxyError::ResponseTooLarge { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::Io(_) | ProxyError::Config(_) | ProxyError::Http(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Builds an `Upstream` error that keeps the whole source chain, since
    /// client errors usually hide the useful part (refused, DNS) in a source.
    pub fn upstream(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            let text = cause.to_string();
            if !message.contains(&text) {
                message.push_str(": ");
                message.push_str(&text);
            }
            source = cause.source();
        }
        ProxyError::Upstream(message)
    }
}
