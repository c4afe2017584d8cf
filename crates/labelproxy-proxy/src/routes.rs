//! The route table and handler pipeline.
//!
//! Binds every known path to an extractor → rewriter → upstream pipeline.
//! Dispatch itself is delegated to [`crate::mux::StrictMux`]; this module
//! only decides, once a path has matched, which rewrite policy to run and
//! forwards the result through [`crate::proxy`].

use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use bytes::Bytes;
use labelproxy_core::{Error, Result, TenantMatcher};
use labelproxy_enforce::alertfilter;
use labelproxy_enforce::{enforce_query, enforce_selector_list};
use serde_json::json;
use tracing::{info, warn};

use crate::config::ProxyConfig;
use crate::extractor::{extract_tenant, RewritableRequest};
use crate::mux::StrictMux;
use crate::proxy::{self, AppState};

/// HTTP status/body mapping for the core error taxonomy. Kept here rather
/// than on `labelproxy_core::Error` itself so that crate stays
/// framework-agnostic.
struct AppError(Error);

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl AppError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::TenantMissing(_) | Error::TenantAmbiguous(_) => StatusCode::BAD_REQUEST,
            Error::Parse(_) => StatusCode::BAD_REQUEST,
            Error::IllegalMatcher(_) => StatusCode::BAD_REQUEST,
            Error::Enforce(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::ForbiddenSilence => StatusCode::FORBIDDEN,
            Error::Upstream(_) => StatusCode::BAD_GATEWAY,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Capitalized with a terminating period, matching upstream's own API
    /// error format.
    fn user_message(&self) -> String {
        let mut msg = self.0.to_string();
        if let Some(first) = msg.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        if !msg.ends_with('.') {
            msg.push('.');
        }
        msg
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        warn!(error = %self.0, "request rejected");
        let body = json!({
            "status": "error",
            "errorType": "prometheus-api",
            "error": self.user_message(),
        });
        (self.status(), Json(body)).into_response()
    }
}

/// What kind of tenant-enforcement pipeline a route runs. `/api/v2/alerts`
/// and its `/groups` sub-path share this one `Alerts` variant, since both
/// are enforced identically; see `RouteTable::build` for why `/groups`
/// isn't a separate registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Query,
    Selectors,
    Silences,
    DeleteSilence,
    Alerts,
    Passthrough,
}

#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub methods: Vec<Method>,
    pub handler_kind: HandlerKind,
}

impl RouteEntry {
    fn new(methods: &[Method], handler_kind: HandlerKind) -> Self {
        Self {
            methods: methods.to_vec(),
            handler_kind,
        }
    }
}

/// The proxy's route table: an immutable-after-construction [`StrictMux`]
/// of [`RouteEntry`].
pub struct RouteTable {
    mux: StrictMux<RouteEntry>,
    label_apis_enabled: bool,
}

impl RouteTable {
    /// Build the route table from configuration, registering the fixed
    /// built-in routes plus any validated `passthrough_paths`.
    ///
    /// `/api/v2/alerts/groups` is deliberately *not* registered as its own
    /// pattern: it nests under `/api/v2/alerts`, so [`StrictMux::serve`]
    /// already dispatches it to the same entry via terminal-prefix
    /// matching, and the two run identical enforcement logic anyway.
    pub fn build(config: &ProxyConfig) -> Result<Self> {
        let mut mux = StrictMux::new();

        mux.register("/federate", RouteEntry::new(&[Method::GET], HandlerKind::Selectors))?;
        mux.register(
            "/api/v1/query",
            RouteEntry::new(&[Method::GET, Method::POST], HandlerKind::Query),
        )?;
        mux.register(
            "/api/v1/query_range",
            RouteEntry::new(&[Method::GET, Method::POST], HandlerKind::Query),
        )?;
        mux.register(
            "/api/v1/query_exemplars",
            RouteEntry::new(&[Method::GET, Method::POST], HandlerKind::Query),
        )?;
        mux.register(
            "/api/v1/series",
            RouteEntry::new(&[Method::GET, Method::POST], HandlerKind::Selectors),
        )?;
        mux.register("/api/v1/alerts", RouteEntry::new(&[Method::GET], HandlerKind::Passthrough))?;
        mux.register("/api/v1/rules", RouteEntry::new(&[Method::GET], HandlerKind::Passthrough))?;

        if config.enable_label_apis {
            mux.register(
                "/api/v1/labels",
                RouteEntry::new(&[Method::GET, Method::POST], HandlerKind::Selectors),
            )?;
            mux.register("/api/v1/label/", RouteEntry::new(&[Method::GET], HandlerKind::Selectors))?;
        }

        mux.register(
            "/api/v2/silences",
            RouteEntry::new(&[Method::GET, Method::POST], HandlerKind::Silences),
        )?;
        mux.register(
            "/api/v2/silence/",
            RouteEntry::new(&[Method::DELETE], HandlerKind::DeleteSilence),
        )?;
        mux.register("/api/v2/alerts", RouteEntry::new(&[Method::GET], HandlerKind::Alerts))?;

        for raw in &config.passthrough_paths {
            let path = validate_passthrough_path(raw)?;
            mux.register(&path, RouteEntry::new(&[Method::GET, Method::POST, Method::DELETE, Method::PUT], HandlerKind::Passthrough))?;
        }

        Ok(Self {
            mux,
            label_apis_enabled: config.enable_label_apis,
        })
    }

    pub fn dispatch(&self, path: &str) -> Option<&RouteEntry> {
        self.mux.serve(path)
    }

    /// When `enable_label_apis` is false, the label APIs are not
    /// registered at all, but a request that would have matched them
    /// must still answer `501 Not Implemented` rather than a generic `404`
    /// (distinguishing "feature disabled" from "no such endpoint").
    pub fn is_disabled_label_path(&self, path: &str) -> bool {
        if self.label_apis_enabled {
            return false;
        }
        let trimmed = path.trim_end_matches('/');
        trimmed == "/api/v1/labels" || trimmed.starts_with("/api/v1/label/")
    }
}

/// Invalid or all-matching passthrough paths are rejected at startup.
fn validate_passthrough_path(raw: &str) -> Result<String> {
    if raw.is_empty() || raw == "/" {
        return Err(Error::config(format!(
            "passthrough path {raw:?} matches all paths, which is not allowed"
        )));
    }
    let parsed = url::Url::parse(&format!("http://placeholder.invalid{raw}"))
        .map_err(|e| Error::config(format!("passthrough path {raw:?} is not a valid URL path: {e}")))?;
    if parsed.path() != raw {
        return Err(Error::config(format!(
            "passthrough path {raw:?} does not round-trip through URL parsing"
        )));
    }
    Ok(raw.to_string())
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", any(healthz))
        .route("/metrics", get(metrics))
        .fallback(dispatch)
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics_handle.render()
}

/// The single entry point for every tenant-enforced route: looks the path
/// up in the route table, enforces the method set, extracts the tenant,
/// runs the path-specific rewriter, forwards upstream, and applies the
/// response filter.
async fn dispatch(State(state): State<AppState>, req: Request<Body>) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let Some(route) = state.route_table.dispatch(&path) else {
        if state.route_table.is_disabled_label_path(&path) {
            metrics::counter!("labelproxy_requests_total", "route" => path, "outcome" => "not_implemented").increment(1);
            return StatusCode::NOT_IMPLEMENTED.into_response();
        }
        metrics::counter!("labelproxy_requests_total", "route" => "unknown", "outcome" => "not_found").increment(1);
        return StatusCode::NOT_FOUND.into_response();
    };
    // Wrong method maps to 404, matching upstream Prometheus.
    if !route.methods.contains(&method) {
        metrics::counter!("labelproxy_requests_total", "route" => path.clone(), "outcome" => "method_not_allowed").increment(1);
        return StatusCode::NOT_FOUND.into_response();
    }
    let handler_kind = route.handler_kind;

    let outcome = match run(&state, handler_kind, method, &path, req).await {
        Ok(resp) => {
            let outcome = if resp.status().is_success() { "ok" } else { "rejected" };
            metrics::counter!("labelproxy_requests_total", "route" => path.clone(), "outcome" => outcome).increment(1);
            return resp;
        }
        Err(e) => e,
    };
    metrics::counter!("labelproxy_requests_total", "route" => path, "outcome" => "error").increment(1);
    AppError::from(outcome).into_response()
}

async fn run(
    state: &AppState,
    handler_kind: HandlerKind,
    method: Method,
    path: &str,
    req: Request<Body>,
) -> Result<Response> {
    let (parts, body) = req.into_parts();
    let headers = parts.headers.clone();
    let query_string = parts.uri.query().unwrap_or("").to_string();
    let body_bytes = to_bytes(body, 10 * 1024 * 1024)
        .await
        .map_err(|e| Error::internal(e.to_string()))?;

    let is_form_post = method == Method::POST
        && headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("application/x-www-form-urlencoded"))
            .unwrap_or(false);

    let url_query: Vec<(String, String)> = url::form_urlencoded::parse(query_string.as_bytes())
        .into_owned()
        .collect();
    let form_body: Option<Vec<(String, String)>> = if is_form_post {
        Some(
            url::form_urlencoded::parse(&body_bytes)
                .into_owned()
                .collect(),
        )
    } else {
        None
    };

    let mut rw = RewritableRequest::new(url_query, form_body);
    let tenant = extract_tenant(&state.config, &mut rw)?;

    // Silences is the one handler kind whose POST body is JSON, not a
    // form; it never flows through `RewritableRequest`'s form encoding.
    if handler_kind == HandlerKind::Silences && method == Method::POST {
        let new_body = alertfilter::enforce_silence_body(&body_bytes, &tenant)?;
        return forward_and_finish(state, method, path, &rw.url_query, headers, Bytes::from(new_body), path, &tenant).await;
    }

    if handler_kind == HandlerKind::DeleteSilence {
        return handle_delete_silence(state, path, headers, &tenant).await;
    }

    match handler_kind {
        HandlerKind::Query => {
            let touched = enforce_query_param(&mut rw, &tenant, state.config.error_on_replace)?;
            if !touched {
                // No `query` in any location -> nothing to enforce
                // against; answered empty without calling upstream.
                return Ok(empty_query_response());
            }
        }
        HandlerKind::Selectors => {
            enforce_match_params(&mut rw, &tenant, state.config.error_on_replace)?;
        }
        HandlerKind::Silences | HandlerKind::Alerts => {
            enforce_filter_param(&mut rw, &tenant);
        }
        HandlerKind::Passthrough | HandlerKind::DeleteSilence => {}
    }

    let (new_query, new_body) = rw.encode();
    let path_and_query = if new_query.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{new_query}")
    };
    let body_to_send = new_body.map(Bytes::from).unwrap_or(body_bytes);

    finish(state, method, &path_and_query, headers, body_to_send, path, &tenant).await
}

async fn forward_and_finish(
    state: &AppState,
    method: Method,
    path: &str,
    url_query: &[(String, String)],
    headers: HeaderMap,
    body: Bytes,
    original_path: &str,
    tenant: &TenantMatcher,
) -> Result<Response> {
    let encoded_query = encode_pairs(url_query);
    let path_and_query = if encoded_query.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{encoded_query}")
    };
    finish(state, method, &path_and_query, headers, body, original_path, tenant).await
}

async fn finish(
    state: &AppState,
    method: Method,
    path_and_query: &str,
    headers: HeaderMap,
    body: Bytes,
    original_path: &str,
    tenant: &TenantMatcher,
) -> Result<Response> {
    let resp = proxy::forward(state, method, path_and_query, &headers, body).await?;
    let resp = proxy::modify_response(original_path, tenant, &state.config.label_name, resp);
    Ok(build_response(resp))
}

async fn handle_delete_silence(
    state: &AppState,
    path: &str,
    headers: HeaderMap,
    tenant: &TenantMatcher,
) -> Result<Response> {
    let preflight = proxy::forward(state, Method::GET, path, &headers, Bytes::new()).await?;
    if preflight.status == StatusCode::NOT_FOUND {
        return Ok(build_response(preflight));
    }
    if !alertfilter::silence_matches_tenant(&preflight.body, tenant)? {
        warn!(path, "refusing to delete silence belonging to another tenant");
        return Err(Error::ForbiddenSilence);
    }

    let resp = proxy::forward(state, Method::DELETE, path, &headers, Bytes::new()).await?;
    Ok(build_response(resp))
}

fn build_response(resp: proxy::UpstreamResponse) -> Response {
    let mut builder = Response::builder().status(resp.status);
    for (name, value) in resp.headers.iter() {
        builder = builder.header(name, value);
    }
    builder
        .body(Body::from(resp.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn empty_query_response() -> Response {
    info!("no query parameter in any location, answering empty without calling upstream");
    Json(json!({ "status": "success", "data": { "resultType": "vector", "result": [] } })).into_response()
}

fn enforce_query_param(req: &mut RewritableRequest, tenant: &TenantMatcher, strict: bool) -> Result<bool> {
    let mut touched = false;
    for (k, v) in req.url_query.iter_mut() {
        if k == "query" {
            *v = enforce_query(v.as_str(), tenant, strict)?;
            touched = true;
        }
    }
    if let Some(form) = &mut req.form_body {
        for (k, v) in form.iter_mut() {
            if k == "query" {
                *v = enforce_query(v.as_str(), tenant, strict)?;
                touched = true;
            }
        }
    }
    Ok(touched)
}

fn enforce_match_params(req: &mut RewritableRequest, tenant: &TenantMatcher, strict: bool) -> Result<()> {
    let url_vals = collect(&req.url_query, "match[]");
    let form_vals = req
        .form_body
        .as_ref()
        .map(|f| collect(f, "match[]"))
        .unwrap_or_default();

    if url_vals.is_empty() && form_vals.is_empty() {
        let enforced = enforce_selector_list(&[], tenant, strict)?;
        for v in enforced {
            req.url_query.push(("match[]".to_string(), v));
        }
        return Ok(());
    }
    if !url_vals.is_empty() {
        let enforced = enforce_selector_list(&url_vals, tenant, strict)?;
        replace_param_values(&mut req.url_query, "match[]", enforced);
    }
    if !form_vals.is_empty() {
        let enforced = enforce_selector_list(&form_vals, tenant, strict)?;
        if let Some(form) = &mut req.form_body {
            replace_param_values(form, "match[]", enforced);
        }
    }
    Ok(())
}

fn enforce_filter_param(req: &mut RewritableRequest, tenant: &TenantMatcher) {
    let existing = collect(&req.url_query, "filter");
    let enforced = alertfilter::enforce_filter_list(&existing, tenant);
    replace_param_values(&mut req.url_query, "filter", enforced);
}

fn collect(list: &[(String, String)], key: &str) -> Vec<String> {
    list.iter().filter(|(k, _)| k == key).map(|(_, v)| v.clone()).collect()
}

/// Remove every entry bound to `key`, then reinsert `values` at the
/// position of the first removed entry (or the end, if `key` was absent).
fn replace_param_values(list: &mut Vec<(String, String)>, key: &str, values: Vec<String>) {
    let insert_at = list.iter().position(|(k, _)| k == key).unwrap_or(list.len());
    list.retain(|(k, _)| k != key);
    let insert_at = insert_at.min(list.len());
    for (i, v) in values.into_iter().enumerate() {
        list.insert(insert_at + i, (key.to_string(), v));
    }
}

fn encode_pairs(pairs: &[(String, String)]) -> String {
    let mut ser = url::form_urlencoded::Serializer::new(String::new());
    for (k, v) in pairs {
        ser.append_pair(k, v);
    }
    ser.finish()
}

impl RewritableRequest {
    /// Re-encode the rewritten request into a URL query string and,
    /// if it had a form body, a form-encoded body. Always produces fresh
    /// bytes rather than patching in place, so the caller can update
    /// `Content-Length` from a single source of truth.
    fn encode(&self) -> (String, Option<Vec<u8>>) {
        let query = encode_pairs(&self.url_query);
        let body = self.form_body.as_ref().map(|f| encode_pairs(f).into_bytes());
        (query, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(passthrough: &[&str]) -> ProxyConfig {
        ProxyConfig {
            upstream_url: "https://prometheus.example.com".to_string(),
            label_name: "tenant_id".to_string(),
            static_label_value: Some("a".to_string()),
            enable_label_apis: true,
            passthrough_paths: passthrough.iter().map(|s| s.to_string()).collect(),
            error_on_replace: false,
        }
    }

    #[test]
    fn builds_successfully_with_default_config() {
        assert!(RouteTable::build(&config(&[])).is_ok());
    }

    #[test]
    fn s8_overlapping_passthrough_path_rejected_at_startup() {
        let err = RouteTable::build(&config(&["/api/v1/query/extra"])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn alert_groups_dispatches_through_alerts_entry() {
        let table = RouteTable::build(&config(&[])).unwrap();
        let entry = table.dispatch("/api/v2/alerts/groups").unwrap();
        assert_eq!(entry.handler_kind, HandlerKind::Alerts);
    }

    #[test]
    fn delete_silence_dispatches_with_id_suffix() {
        let table = RouteTable::build(&config(&[])).unwrap();
        let entry = table.dispatch("/api/v2/silence/abc123").unwrap();
        assert_eq!(entry.handler_kind, HandlerKind::DeleteSilence);
    }

    #[test]
    fn disabling_label_apis_leaves_them_unregistered() {
        let mut cfg = config(&[]);
        cfg.enable_label_apis = false;
        let table = RouteTable::build(&cfg).unwrap();
        assert!(table.dispatch("/api/v1/labels").is_none());
        assert!(table.dispatch("/api/v1/label/").is_none());
    }

    #[test]
    fn disabled_label_apis_are_distinguished_from_unknown_paths() {
        let mut cfg = config(&[]);
        cfg.enable_label_apis = false;
        let table = RouteTable::build(&cfg).unwrap();
        assert!(table.is_disabled_label_path("/api/v1/labels"));
        assert!(table.is_disabled_label_path("/api/v1/label/job/values"));
        assert!(!table.is_disabled_label_path("/api/v1/query"));

        let mut enabled = config(&[]);
        enabled.enable_label_apis = true;
        let enabled_table = RouteTable::build(&enabled).unwrap();
        assert!(!enabled_table.is_disabled_label_path("/api/v1/labels"));
    }

    #[test]
    fn replace_param_values_preserves_insertion_position() {
        let mut list = vec![
            ("a".to_string(), "1".to_string()),
            ("match[]".to_string(), "old".to_string()),
            ("b".to_string(), "2".to_string()),
        ];
        replace_param_values(&mut list, "match[]", vec!["new1".to_string(), "new2".to_string()]);
        assert_eq!(
            list,
            vec![
                ("a".to_string(), "1".to_string()),
                ("match[]".to_string(), "new1".to_string()),
                ("match[]".to_string(), "new2".to_string()),
                ("b".to_string(), "2".to_string()),
            ]
        );
    }
}
