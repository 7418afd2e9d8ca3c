mod handler;

pub use handler::ProxyHandler;

use crate::balancer::SelectError;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use hyper::StatusCode;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Body type of every response the proxy produces, forwarded or local.
pub type ProxyBody = BoxBody<Bytes, BoxError>;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// No backend could be selected for this request.
    #[error("service unavailable: {0}")]
    Unavailable(#[from] SelectError),

    /// The chosen backend could not be reached or broke the exchange.
    /// The backend has already been marked dead when this is returned.
    #[error("forwarding to {backend} failed: {source}")]
    ForwardingFailure {
        backend: String,
        #[source]
        source: hyper_util::client::legacy::Error,
    },

    /// The inbound request body failed while it was being relayed. The
    /// backend is not blamed for it.
    #[error("request body from client failed while forwarding to {backend}: {source}")]
    ClientBody {
        backend: String,
        #[source]
        source: hyper_util::client::legacy::Error,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Unavailable(_)
            | ProxyError::ForwardingFailure { .. }
            | ProxyError::ClientBody { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}
