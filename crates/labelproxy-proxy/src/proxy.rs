//! Application state and the reverse-proxy adapter.
//!
//! A thin forwarder with one upstream base URL: preserves method, path,
//! headers (modulo hop-by-hop) and the possibly-rewritten body, and
//! exposes the `modify_response` hook that dispatches on the *original*
//! request path to the response filter.

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use labelproxy_core::{Error, Result, TenantMatcher};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::ProxyConfig;
use crate::response;
use crate::routes::RouteTable;

/// Shared, read-only state cloned into every request handler. Nothing
/// here is mutated after construction, so no `Mutex`/`RwLock` is needed
/// on the hot path.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub route_table: Arc<RouteTable>,
    pub http_client: reqwest::Client,
    pub metrics_handle: PrometheusHandle,
}

impl AppState {
    pub fn new(config: ProxyConfig, route_table: RouteTable, metrics_handle: PrometheusHandle) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::internal(e.to_string()))?;

        Ok(Self {
            config: Arc::new(config),
            route_table: Arc::new(route_table),
            http_client,
            metrics_handle,
        })
    }

    pub fn upstream_url(&self, path_and_query: &str) -> String {
        format!(
            "{}{}",
            self.config.upstream_url.trim_end_matches('/'),
            path_and_query
        )
    }
}

/// Headers that must not be forwarded across a proxy hop (RFC 7230 §6.1).
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Forward a request to the single configured upstream, preserving method,
/// path+query, and headers modulo hop-by-hop. `content-length` is always
/// recomputed from `body` rather than copied from the inbound request, since
/// a rewritten body's length never matches the original.
pub async fn forward(
    state: &AppState,
    method: Method,
    path_and_query: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<UpstreamResponse> {
    let url = state.upstream_url(path_and_query);
    debug!(%method, %url, "forwarding to upstream");

    let mut builder = state
        .http_client
        .request(reqwest_method(&method), &url)
        .body(body.to_vec());

    for (name, value) in headers.iter() {
        let lower = name.as_str().to_lowercase();
        if HOP_BY_HOP.contains(&lower.as_str()) || lower == "content-length" {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_bytes());
    }
    builder = builder.header("content-length", body.len().to_string());

    let started = std::time::Instant::now();
    let sent = builder.send().await;
    metrics::histogram!("labelproxy_upstream_duration_seconds").record(started.elapsed().as_secs_f64());
    let resp = sent.map_err(|e| Error::Upstream(e.to_string()))?;

    let status = StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut out_headers = HeaderMap::new();
    for (name, value) in resp.headers().iter() {
        if HOP_BY_HOP.contains(&name.as_str().to_lowercase().as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            out_headers.append(name, value);
        }
    }

    let body = resp
        .bytes()
        .await
        .map_err(|e| Error::Upstream(e.to_string()))?;

    Ok(UpstreamResponse {
        status,
        headers: out_headers,
        body,
    })
}

fn reqwest_method(method: &Method) -> reqwest::Method {
    reqwest::Method::from_bytes(method.as_str().as_bytes()).unwrap_or(reqwest::Method::GET)
}

/// Paths whose response bodies must be filtered for cross-tenant leakage.
/// Whitelisted independent of the matched route's `handler_kind` — both
/// are registered as `PASSTHROUGH` routes.
const RULES_PATH: &str = "/api/v1/rules";
const ALERTS_PATH: &str = "/api/v1/alerts";

/// Consulted per response by the route handler; dispatches on the
/// *original* request path to the response filter.
pub fn modify_response(
    original_path: &str,
    tenant: &TenantMatcher,
    label_name: &str,
    mut resp: UpstreamResponse,
) -> UpstreamResponse {
    let normalized = original_path.trim_end_matches('/');
    let filtered = if normalized == RULES_PATH {
        response::filter_rules_response(&resp.body, tenant, label_name)
    } else if normalized == ALERTS_PATH {
        response::filter_alerts_response(&resp.body, tenant, label_name)
    } else {
        None
    };

    if let Some(body) = filtered {
        resp.headers.remove("content-length");
        resp.headers.insert(
            "content-length",
            HeaderValue::from_str(&body.len().to_string()).unwrap(),
        );
        resp.body = Bytes::from(body);
    } else if normalized == RULES_PATH || normalized == ALERTS_PATH {
        warn!(path = %original_path, "response filter could not decode upstream body, passing through unchanged");
    }

    resp
}
