use super::{BoxError, ProxyBody, ProxyError};
use crate::balancer::LoadBalancer;
use crate::config::ProxyConfig;
use crate::metrics::Metrics;
use crate::pool::Backend;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, CONTENT_TYPE, HOST};
use hyper::{Request, Response, StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, error, warn};
use uuid::Uuid;

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_HOST: &str = "x-forwarded-host";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
const X_REQUEST_ID: &str = "x-request-id";

const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "transfer-encoding",
    "upgrade",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
];

/// Remove the fixed hop-by-hop set plus any header named in `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for header in HOP_BY_HOP_HEADERS {
        headers.remove(*header);
    }
}

/// Forwards each inbound request to one backend chosen by the load balancer.
///
/// Exactly one upstream attempt is made per request. A transport failure marks
/// the chosen backend dead before the error is returned; an HTTP error status
/// from the backend is a normal response and leaves liveness untouched.
pub struct ProxyHandler {
    balancer: Arc<LoadBalancer>,
    client: Client<HttpConnector, ProxyBody>,
}

impl ProxyHandler {
    pub fn new(balancer: Arc<LoadBalancer>, config: &ProxyConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.set_reuse_address(true);
        connector.set_connect_timeout(Some(config.connect_timeout.as_std()));

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(config.pool_idle_timeout.as_std())
            .pool_max_idle_per_host(256)
            .set_host(false)
            .build(connector);

        Self { balancer, client }
    }

    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    /// Serve one inbound request, turning every dispatch error into a local response.
    pub async fn handle<B>(
        &self,
        req: Request<B>,
        remote_addr: SocketAddr,
    ) -> Result<Response<ProxyBody>, Infallible>
    where
        B: Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        match self.dispatch(req, remote_addr).await {
            Ok(response) => Ok(response),
            Err(e) => Ok(Self::error_response(e.status(), e.to_string())),
        }
    }

    /// Select a backend and forward the request to it.
    ///
    /// The backend's connection count is held for as long as the returned
    /// response body is alive, so it is released when the body finishes or
    /// the client goes away.
    pub async fn dispatch<B>(
        &self,
        req: Request<B>,
        remote_addr: SocketAddr,
    ) -> Result<Response<ProxyBody>, ProxyError>
    where
        B: Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        let peer = self.balancer.next_peer().map_err(|e| {
            warn!("No backend for {} {}: {}", req.method(), req.uri(), e);
            Metrics::record_unavailable(e.as_label());
            ProxyError::Unavailable(e)
        })?;

        let guard = peer.acquire();

        let method = req.method().clone();
        debug!("{} {} from {} -> {}", method, req.uri(), remote_addr, peer);

        let body_failed = Arc::new(AtomicBool::new(false));
        let upstream =
            Self::build_proxied_request(req, &peer, remote_addr, Arc::clone(&body_failed))?;
        let start = Instant::now();

        match self.client.request(upstream).await {
            Ok(response) => {
                let elapsed = start.elapsed();
                let status = response.status();
                debug!("Backend {} answered {} in {:?}", peer, status, elapsed);
                Metrics::record_request(&peer.origin(), method.as_str(), status.as_u16(), elapsed);

                let (mut parts, body) = response.into_parts();
                strip_hop_by_hop(&mut parts.headers);

                let body = body
                    .map_err(BoxError::from)
                    .map_frame(move |frame| {
                        let _held = &guard;
                        frame
                    })
                    .boxed();

                Ok(Response::from_parts(parts, body))
            }
            Err(e) if body_failed.load(Ordering::Acquire) => {
                warn!(
                    backend = %peer,
                    "Client request body failed after {:?}, backend left in rotation: {}",
                    start.elapsed(),
                    e
                );

                Err(ProxyError::ClientBody {
                    backend: peer.origin(),
                    source: e,
                })
            }
            Err(e) => {
                self.balancer.set_backend_status(peer.url(), false);
                error!(
                    backend = %peer,
                    "Dispatch failed after {:?}, backend marked down: {}",
                    start.elapsed(),
                    e
                );
                Metrics::record_dispatch_failure(&peer.origin());
                Metrics::set_backend_health(&peer.origin(), false);

                Err(ProxyError::ForwardingFailure {
                    backend: peer.origin(),
                    source: e,
                })
            }
        }
    }

    fn build_backend_uri(backend: &Backend, original_uri: &Uri) -> Result<Uri, ProxyError> {
        let path_and_query = original_uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        format!("{}{}", backend.origin(), path_and_query)
            .parse()
            .map_err(|e| ProxyError::InvalidRequest(format!("failed to build upstream URI: {}", e)))
    }

    fn build_proxied_request<B>(
        req: Request<B>,
        backend: &Backend,
        remote_addr: SocketAddr,
        body_failed: Arc<AtomicBool>,
    ) -> Result<Request<ProxyBody>, ProxyError>
    where
        B: Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        let (mut parts, body) = req.into_parts();

        parts.uri = Self::build_backend_uri(backend, &parts.uri)?;
        strip_hop_by_hop(&mut parts.headers);

        // Append to the raw bytes so a non-UTF-8 chain is kept intact.
        let mut xff: Vec<u8> = Vec::new();
        for existing in parts.headers.get_all(X_FORWARDED_FOR) {
            xff.extend_from_slice(existing.as_bytes());
            xff.extend_from_slice(b", ");
        }
        xff.extend_from_slice(remote_addr.ip().to_string().as_bytes());
        if let Ok(val) = HeaderValue::from_bytes(&xff) {
            parts.headers.insert(X_FORWARDED_FOR, val);
        }

        if let Some(host) = parts.headers.get(HOST).cloned() {
            parts.headers.insert(X_FORWARDED_HOST, host);
        }
        parts
            .headers
            .insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));

        if !parts.headers.contains_key(X_REQUEST_ID) {
            if let Ok(val) = HeaderValue::from_str(&Uuid::new_v4().to_string()) {
                parts.headers.insert(X_REQUEST_ID, val);
            }
        }

        if let Some(authority) = parts.uri.authority() {
            if let Ok(host_value) = HeaderValue::from_str(authority.as_str()) {
                parts.headers.insert(HOST, host_value);
            }
        }

        let body = body
            .map_err(move |e: B::Error| -> BoxError {
                body_failed.store(true, Ordering::Release);
                e.into()
            })
            .boxed();

        Ok(Request::from_parts(parts, body))
    }

    fn error_response(status: StatusCode, message: String) -> Response<ProxyBody> {
        let mut response = Response::new(Self::full_body(message));
        *response.status_mut() = status;
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }

    #[inline]
    fn full_body<T: Into<Bytes>>(content: T) -> ProxyBody {
        Full::new(content.into())
            .map_err(|never| match never {})
            .boxed()
    }
}
