mod common;

use anyhow::Result;
use common::{closed_port, forwarder, local_instance, spawn_backend, test_discovery};
use gateway::gateway::{router, GatewayState};
use gateway::{LoadBalancingStrategy, ServiceDiscovery};
use reqwest::header::HeaderValue;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

async fn spawn_gateway(discovery: Arc<ServiceDiscovery>, timeout: Duration) -> SocketAddr {
    let state = GatewayState {
        forwarder: Arc::new(forwarder(discovery.clone(), timeout)),
        discovery,
        expose_error_details: false,
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind gateway");
    let addr = listener.local_addr().expect("gateway addr");
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.expect("gateway server");
    });
    addr
}

async fn gateway_with_echo() -> Result<(SocketAddr, SocketAddr, Arc<ServiceDiscovery>)> {
    gateway_with_echo_timeout(Duration::from_millis(500)).await
}

async fn gateway_with_echo_timeout(
    timeout: Duration,
) -> Result<(SocketAddr, SocketAddr, Arc<ServiceDiscovery>)> {
    let backend = spawn_backend().await;
    let discovery = test_discovery();
    discovery
        .register(
            "echo",
            vec![local_instance(backend.port())],
            LoadBalancingStrategy::default(),
            "/health",
        )
        .await?;
    let gateway = spawn_gateway(discovery.clone(), timeout).await;
    Ok((gateway, backend, discovery))
}

#[tokio::test]
async fn test_root_and_health_routes() -> Result<()> {
    let gateway = spawn_gateway(test_discovery(), Duration::from_secs(1)).await;
    let client = reqwest::Client::new();

    let root: Value = client
        .get(format!("http://{}/", gateway))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(root["message"], "Gateway API");

    let health: Value = client
        .get(format!("http://{}/health", gateway))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(health["status"], "healthy");
    Ok(())
}

#[tokio::test]
async fn test_unknown_service_returns_503_detail() -> Result<()> {
    let gateway = spawn_gateway(test_discovery(), Duration::from_secs(1)).await;

    let response = reqwest::Client::new()
        .get(format!("http://{}/api/v1/billing/invoices", gateway))
        .send()
        .await?;
    assert_eq!(response.status().as_u16(), 503);
    assert!(response.headers().contains_key("x-request-id"));

    let body: Value = response.json().await?;
    assert_eq!(body["detail"], "Service billing not available");
    Ok(())
}

#[tokio::test]
async fn test_proxied_response_carries_gateway_headers() -> Result<()> {
    let (gateway, backend, discovery) = gateway_with_echo().await?;

    let response = reqwest::Client::new()
        .post(format!("http://{}/api/v1/echo/orders/jane%20doe?tag=a&tag=b", gateway))
        .header("x-request-id", "req-123")
        .header("x-custom", "kept")
        .body("payload")
        .send()
        .await?;

    assert_eq!(response.status().as_u16(), 200);
    let headers = response.headers().clone();
    assert_eq!(headers["x-gateway-service"], "echo");
    assert_eq!(
        headers["x-gateway-instance"].to_str()?,
        format!("127.0.0.1:{}", backend.port())
    );
    assert!(headers["x-gateway-response-time"].to_str()?.ends_with('s'));
    assert_eq!(headers["x-request-id"], "req-123");

    let echoed: Value = response.json().await?;
    assert_eq!(echoed["method"], "POST");
    assert_eq!(echoed["path"], "/orders/jane%20doe");
    assert_eq!(echoed["query"], "tag=a&tag=b");
    assert_eq!(echoed["body"], "payload");
    assert_eq!(echoed["headers"]["x-custom"], "kept");
    assert_eq!(echoed["headers"]["x-request-id"], "req-123");

    let status = discovery.status("echo").await.expect("echo status");
    assert_eq!(status.instances[0].active_connections, 0);
    Ok(())
}

#[tokio::test]
async fn test_service_root_route_forwards_to_instance_root() -> Result<()> {
    let (gateway, _backend, _discovery) = gateway_with_echo().await?;

    let echoed: Value = reqwest::Client::new()
        .get(format!("http://{}/api/v1/echo", gateway))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(echoed["path"], "/");
    // A request id is generated when the client sends none
    assert!(echoed["headers"]["x-request-id"].as_str().is_some());
    Ok(())
}

#[tokio::test]
async fn test_backend_errors_pass_through_untouched() -> Result<()> {
    let (gateway, _backend, _discovery) = gateway_with_echo().await?;

    let response = reqwest::Client::new()
        .get(format!("http://{}/api/v1/echo/teapot", gateway))
        .send()
        .await?;
    assert_eq!(response.status().as_u16(), 418);
    assert_eq!(response.headers()["x-backend"], "teapot");
    assert_eq!(response.text().await?, "short and stout");
    Ok(())
}

#[tokio::test]
async fn test_timeout_and_connect_failure_status_codes() -> Result<()> {
    let (gateway, _backend, discovery) = gateway_with_echo().await?;
    discovery
        .register(
            "gone",
            vec![local_instance(closed_port())],
            LoadBalancingStrategy::default(),
            "/health",
        )
        .await?;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("http://{}/api/v1/echo/slow", gateway))
        .send()
        .await?;
    assert_eq!(response.status().as_u16(), 504);
    let body: Value = response.json().await?;
    assert_eq!(body["detail"], "Service echo timeout");

    let response = client
        .get(format!("http://{}/api/v1/gone/anything", gateway))
        .send()
        .await?;
    assert_eq!(response.status().as_u16(), 503);
    let body: Value = response.json().await?;
    assert_eq!(body["detail"], "Service gone connection failed");
    Ok(())
}

#[tokio::test]
async fn test_non_ascii_headers_survive_the_gateway() -> Result<()> {
    let (gateway, _backend, _discovery) = gateway_with_echo().await?;
    let client = reqwest::Client::new();

    let echoed: Value = client
        .get(format!("http://{}/api/v1/echo/people", gateway))
        .header("x-name", HeaderValue::from_bytes("José".as_bytes())?)
        .header("x-plain", "ascii")
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(echoed["headers"]["x-name"], "José");
    assert_eq!(echoed["headers"]["x-plain"], "ascii");

    let response = client
        .get(format!("http://{}/api/v1/echo/latin1", gateway))
        .send()
        .await?;
    assert_eq!(response.headers()["x-file"].as_bytes(), b"r\xe9sum\xe9.pdf");
    assert_eq!(response.headers()["x-gateway-service"], "echo");
    Ok(())
}

#[tokio::test]
async fn test_large_bodies_are_forwarded() -> Result<()> {
    let (gateway, _backend, _discovery) = gateway_with_echo_timeout(Duration::from_secs(10)).await?;
    let size = 3 * 1024 * 1024;

    let response = reqwest::Client::new()
        .post(format!("http://{}/api/v1/echo/upload", gateway))
        .body(vec![b'a'; size])
        .timeout(Duration::from_secs(10))
        .send()
        .await?;
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.headers()["x-gateway-service"], "echo");

    let echoed: Value = response.json().await?;
    assert_eq!(echoed["body_len"], size);
    Ok(())
}

#[tokio::test]
async fn test_status_endpoints() -> Result<()> {
    let (gateway, _backend, _discovery) = gateway_with_echo().await?;
    let client = reqwest::Client::new();

    let all: Value = client
        .get(format!("http://{}/gateway/services", gateway))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(all["echo"]["total_instances"], 1);
    assert_eq!(all["echo"]["healthy_instances"], 1);

    let one: Value = client
        .get(format!("http://{}/gateway/services/echo", gateway))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(one["service_name"], "echo");
    assert_eq!(one["health_check_path"], "/health");
    assert_eq!(one["instances"][0]["active_connections"], 0);

    let missing = client
        .get(format!("http://{}/gateway/services/billing", gateway))
        .send()
        .await?;
    assert_eq!(missing.status().as_u16(), 404);
    Ok(())
}
