#![allow(dead_code)]

use axum::{
    body::{Body, Bytes},
    extract::DefaultBodyLimit,
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::Response,
    routing::get,
    Json, Router,
};
use gateway::{
    AlwaysHealthyProbe, HealthProbe, InstanceRegistry, InstanceSpec, ProxyConfig, ProxyForwarder,
    ServiceDiscovery,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Echoes what it received as JSON
async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Json<Value> {
    let headers: BTreeMap<String, String> = headers
        .iter()
        .map(|(k, v)| (k.as_str().to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
        .collect();
    Json(json!({
        "method": method.as_str(),
        "path": uri.path(),
        "query": uri.query(),
        "body": String::from_utf8_lossy(&body),
        "body_len": body.len(),
        "headers": headers,
    }))
}

async fn slow() -> &'static str {
    tokio::time::sleep(Duration::from_secs(3)).await;
    "too late"
}

async fn teapot() -> (StatusCode, [(&'static str, &'static str); 2], &'static str) {
    (
        StatusCode::IM_A_TEAPOT,
        [("x-backend", "teapot"), ("content-type", "text/plain")],
        "short and stout",
    )
}

async fn latin1() -> Response {
    let mut response = Response::new(Body::from("latin-1 header"));
    response.headers_mut().insert(
        HeaderName::from_static("x-file"),
        HeaderValue::from_bytes(b"r\xe9sum\xe9.pdf").expect("obs-text header value"),
    );
    response
}

async fn unhealthy() -> StatusCode {
    StatusCode::SERVICE_UNAVAILABLE
}

/// Start a backend on an ephemeral local port
pub async fn spawn_backend() -> SocketAddr {
    let app = Router::new()
        .route("/slow", get(slow))
        .route("/teapot", get(teapot))
        .route("/latin1", get(latin1))
        .route("/down/health", get(unhealthy))
        .fallback(echo)
        .layer(DefaultBodyLimit::disable());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind backend");
    let addr = listener.local_addr().expect("backend addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("backend server");
    });
    addr
}

/// A local port with nothing listening on it
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind probe port");
    let port = listener.local_addr().expect("probe addr").port();
    drop(listener);
    port
}

pub fn discovery_with_probe(probe: Arc<dyn HealthProbe>) -> Arc<ServiceDiscovery> {
    Arc::new(ServiceDiscovery::new(Arc::new(InstanceRegistry::new()), probe))
}

pub fn test_discovery() -> Arc<ServiceDiscovery> {
    discovery_with_probe(Arc::new(AlwaysHealthyProbe))
}

pub fn forwarder(discovery: Arc<ServiceDiscovery>, timeout: Duration) -> ProxyForwarder {
    ProxyForwarder::new(discovery, ProxyConfig { request_timeout: timeout })
        .expect("build forwarder")
}

pub fn local_instance(port: u16) -> InstanceSpec {
    InstanceSpec::new("127.0.0.1", port)
}
