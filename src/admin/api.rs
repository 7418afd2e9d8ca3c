use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Body;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::Arc;
use tracing::debug;

use crate::balancer::LoadBalancer;
use crate::pool::BackendSnapshot;

type AdminBody = BoxBody<Bytes, hyper::Error>;

#[derive(Debug, Deserialize)]
struct BackendRequest {
    url: String,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    total_backends: usize,
    backends: Vec<BackendSnapshot>,
}

/// Admin API handler for inspecting and editing the backend pool at runtime
pub struct AdminApi {
    balancer: Arc<LoadBalancer>,
}

impl AdminApi {
    pub fn new(balancer: Arc<LoadBalancer>) -> Self {
        Self { balancer }
    }

    /// Handle admin API request
    pub async fn handle<B>(&self, req: Request<B>) -> Response<AdminBody>
    where
        B: Body<Data = Bytes>,
        B::Error: Display,
    {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        match (&method, path.as_str()) {
            (&Method::GET, "/status") => self.status(),
            (&Method::POST, "/backends") => match Self::read_backend_request(req).await {
                Ok(body) => self.add_backend(&body.url),
                Err(response) => response,
            },
            (&Method::DELETE, "/backends") => match Self::read_backend_request(req).await {
                Ok(body) => self.remove_backend(&body.url),
                Err(response) => response,
            },
            (&Method::GET, "/ping") => Self::text_response(StatusCode::OK, "OK"),
            (&Method::GET, "/") | (&Method::GET, "/dashboard") => Self::dashboard(),
            (_, "/status") | (_, "/backends") | (_, "/ping") => {
                Self::text_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
            }
            _ => Self::text_response(StatusCode::NOT_FOUND, "Not Found"),
        }
    }

    fn status(&self) -> Response<AdminBody> {
        let backends: Vec<BackendSnapshot> = self
            .balancer
            .backends()
            .iter()
            .map(|backend| backend.snapshot())
            .collect();

        let status = StatusResponse {
            total_backends: backends.len(),
            backends,
        };

        Self::json_response(StatusCode::OK, &status)
    }

    fn add_backend(&self, raw_url: &str) -> Response<AdminBody> {
        match self.balancer.add_backend(raw_url) {
            Ok(backend) => Self::json_response(StatusCode::CREATED, &backend.snapshot()),
            Err(e) => Self::text_response(StatusCode::BAD_REQUEST, e.to_string()),
        }
    }

    fn remove_backend(&self, raw_url: &str) -> Response<AdminBody> {
        match self.balancer.remove_backend(raw_url) {
            Ok(removed) => {
                if !removed {
                    debug!("Backend {} not in pool, nothing removed", raw_url);
                }
                Self::text_response(StatusCode::OK, "OK")
            }
            Err(e) => Self::text_response(StatusCode::BAD_REQUEST, e.to_string()),
        }
    }

    async fn read_backend_request<B>(req: Request<B>) -> Result<BackendRequest, Response<AdminBody>>
    where
        B: Body<Data = Bytes>,
        B::Error: Display,
    {
        let bytes = match req.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                debug!("Failed to read admin request body: {}", e);
                return Err(Self::text_response(StatusCode::BAD_REQUEST, "Invalid JSON"));
            }
        };

        serde_json::from_slice(&bytes)
            .map_err(|_| Self::text_response(StatusCode::BAD_REQUEST, "Invalid JSON"))
    }

    fn dashboard() -> Response<AdminBody> {
        let mut response = Self::text_response(StatusCode::OK, DASHBOARD_HTML);
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        );
        response
    }

    fn json_response<T: Serialize>(status: StatusCode, data: &T) -> Response<AdminBody> {
        match serde_json::to_string(data) {
            Ok(json) => {
                let mut response = Response::new(Self::full_body(json));
                *response.status_mut() = status;
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                response
            }
            Err(_) => Self::text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Can't retrieve backends status",
            ),
        }
    }

    fn text_response<T: Into<Bytes>>(status: StatusCode, message: T) -> Response<AdminBody> {
        let mut response = Response::new(Self::full_body(message));
        *response.status_mut() = status;
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }

    #[inline]
    fn full_body<T: Into<Bytes>>(content: T) -> AdminBody {
        Full::new(content.into())
            .map_err(|never| match never {})
            .boxed()
    }
}

const DASHBOARD_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Rotor Dashboard</title>
    <style>
        body { font-family: system-ui, sans-serif; margin: 0; padding: 20px; background: #1a1a2e; color: #eee; }
        h1 { color: #00d4ff; margin-bottom: 30px; }
        .card { background: #16213e; border-radius: 8px; padding: 20px; margin-bottom: 20px; }
        .card h2 { margin-top: 0; color: #00d4ff; font-size: 16px; }
        .stat { display: inline-block; margin-right: 40px; }
        .stat-value { font-size: 32px; font-weight: bold; color: #00ff88; }
        .stat-label { font-size: 12px; color: #888; }
        table { width: 100%; border-collapse: collapse; }
        th, td { text-align: left; padding: 12px; border-bottom: 1px solid #333; }
        th { color: #888; font-weight: normal; }
        input { background: #0f3460; color: #eee; border: 1px solid #333; padding: 8px; width: 320px; }
        button { background: #00d4ff; color: #1a1a2e; border: 0; padding: 8px 14px; cursor: pointer; }
        .status-ok { color: #00ff88; }
        .status-error { color: #ff4444; }
        #message { margin-left: 12px; color: #888; }
    </style>
</head>
<body>
    <h1>Rotor Dashboard</h1>
    <div class="card">
        <h2>Overview</h2>
        <div id="overview"></div>
    </div>
    <div class="card">
        <h2>Backends</h2>
        <div id="backends"></div>
    </div>
    <div class="card">
        <h2>Manage</h2>
        <input id="url" placeholder="http://127.0.0.1:8082">
        <button onclick="send('POST')">Add</button>
        <button onclick="send('DELETE')">Remove</button>
        <span id="message"></span>
    </div>
    <script>
        async function load() {
            try {
                const status = await fetch('/status').then(r => r.json());
                const alive = status.backends.filter(b => b.alive).length;
                const conns = status.backends.reduce((n, b) => n + b.current_connections, 0);
                document.getElementById('overview').innerHTML = `
                    <div class="stat"><div class="stat-value">${status.total_backends}</div><div class="stat-label">Backends</div></div>
                    <div class="stat"><div class="stat-value">${alive}</div><div class="stat-label">Alive</div></div>
                    <div class="stat"><div class="stat-value">${conns}</div><div class="stat-label">Active connections</div></div>
                `;
                document.getElementById('backends').innerHTML = `<table>
                    <tr><th>URL</th><th>Status</th><th>Connections</th></tr>
                    ${status.backends.map(b => `<tr><td>${b.url}</td><td class="${b.alive ? 'status-ok' : 'status-error'}">${b.alive ? 'UP' : 'DOWN'}</td><td>${b.current_connections}</td></tr>`).join('')}
                </table>`;
            } catch (e) {
                document.getElementById('overview').innerHTML = '<span class="status-error">Admin API unreachable</span>';
            }
        }
        async function send(method) {
            const url = document.getElementById('url').value.trim();
            if (!url) return;
            const res = await fetch('/backends', { method, body: JSON.stringify({ url }) });
            document.getElementById('message').textContent = res.ok ? `${method} ${url}: ${res.status}` : await res.text();
            load();
        }
        load();
        setInterval(load, 500);
    </script>
</body>
</html>"#;
