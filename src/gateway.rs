//! HTTP boundary
//!
//! Thin axum routes that turn an inbound request into a [`ForwardRequest`] and
//! render the resulting envelope. No routing decisions are made here.

use crate::error::GatewayError;
use crate::proxy::{ForwardRequest, ForwardResponse, HeaderPair, ProxyForwarder};
use crate::service_discovery::ServiceDiscovery;
use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use log::{error, info};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct GatewayState {
    pub discovery: Arc<ServiceDiscovery>,
    pub forwarder: Arc<ProxyForwarder>,
    pub expose_error_details: bool,
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/gateway/services", get(list_service_statuses))
        .route("/gateway/services/:service", get(get_service_status))
        .route("/api/v1/:service", any(proxy_service_root))
        .route("/api/v1/:service/*path", any(proxy_service_path))
        // Bodies are relayed as-is, so no size cap at the gateway
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": "Gateway API", "version": env!("CARGO_PKG_VERSION") }))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy", "service": "gateway" }))
}

async fn list_service_statuses(State(state): State<GatewayState>) -> Response {
    Json(state.discovery.all_statuses().await).into_response()
}

async fn get_service_status(
    State(state): State<GatewayState>,
    Path(service): Path<String>,
) -> Response {
    match state.discovery.status(&service).await {
        Some(status) => Json(status).into_response(),
        None => detail_response(StatusCode::NOT_FOUND, format!("Service {} not found", service)),
    }
}

async fn proxy_service_root(
    State(state): State<GatewayState>,
    Path(service): Path<String>,
    method: Method,
    Query(query): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    proxy(state, service, String::new(), method, query, headers, body).await
}

async fn proxy_service_path(
    State(state): State<GatewayState>,
    Path((service, path)): Path<(String, String)>,
    method: Method,
    Query(query): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    proxy(state, service, path, method, query, headers, body).await
}

#[allow(clippy::too_many_arguments)]
async fn proxy(
    state: GatewayState,
    service: String,
    path: String,
    method: Method,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    info!("Request {}: {} /{}/{}", request_id, method, service, path);

    let mut forwarded_headers: Vec<HeaderPair> = headers
        .iter()
        .filter(|(name, _)| name.as_str() != REQUEST_ID_HEADER)
        .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
        .collect();
    forwarded_headers.push((REQUEST_ID_HEADER.to_string(), request_id.clone().into_bytes()));

    let request = ForwardRequest {
        service_name: service,
        path,
        method: method.as_str().to_string(),
        headers: forwarded_headers,
        body: body.to_vec(),
        query,
    };

    match state.forwarder.forward(request).await {
        Ok(response) => render_response(response, &request_id),
        Err(e) => render_error(&e, state.expose_error_details, &request_id),
    }
}

fn render_response(forwarded: ForwardResponse, request_id: &str) -> Response {
    let status = StatusCode::from_u16(forwarded.status_code).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = Response::new(Body::from(forwarded.body));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    for (name, value) in &forwarded.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_bytes(value),
        ) {
            headers.append(name, value);
        }
    }

    let gateway_headers = [
        ("x-gateway-service", forwarded.service_name.clone()),
        ("x-gateway-instance", forwarded.instance_id.clone()),
        (
            "x-gateway-response-time",
            format!("{:.3}s", forwarded.elapsed.as_secs_f64()),
        ),
        (REQUEST_ID_HEADER, request_id.to_string()),
    ];
    for (name, value) in gateway_headers {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }

    response
}

fn render_error(error: &GatewayError, expose_details: bool, request_id: &str) -> Response {
    if let GatewayError::Internal { .. } = error {
        error!("Request {} failed: {}", request_id, error);
    }

    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = detail_response(status, error.client_detail(expose_details));
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

fn detail_response(status: StatusCode, detail: String) -> Response {
    (status, Json(json!({ "detail": detail }))).into_response()
}
