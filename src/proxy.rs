//! Reverse-proxy forwarding
//!
//! Rewrites one inbound request into an outbound call to an instance picked by
//! [`ServiceDiscovery`], executes it with a deadline and maps the outcome to a
//! [`ForwardResult`]. The backend payload is passed through untouched.

use crate::error::{GatewayError, GatewayResult};
use crate::logging;
use crate::service_discovery::{InstanceLease, ServiceDiscovery};
use log::{debug, info, warn};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Headers that only make sense for a single transport leg
pub const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

// Bytes kept literal inside a path segment besides ASCII alphanumerics
const SEGMENT_SAFE: &[u8] = b"@:$,;~()[]!*-_.";

/// Header name with its raw value bytes. Values are not required to be UTF-8.
pub type HeaderPair = (String, Vec<u8>);

#[derive(Clone, Debug, Default)]
pub struct ForwardRequest {
    pub service_name: String,
    pub path: String,
    pub method: String,
    pub headers: Vec<HeaderPair>,
    pub body: Vec<u8>,
    /// Multi-value query parameters, in order
    pub query: Vec<(String, String)>,
}

#[derive(Clone, Debug)]
pub struct ForwardResponse {
    pub service_name: String,
    pub status_code: u16,
    pub headers: Vec<HeaderPair>,
    pub body: Vec<u8>,
    pub target_url: String,
    pub elapsed: Duration,
    pub instance_id: String,
}

impl ForwardResponse {
    pub fn header_bytes(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    /// First value of `name`, if it is valid UTF-8
    pub fn header(&self, name: &str) -> Option<&str> {
        self.header_bytes(name)
            .and_then(|v| std::str::from_utf8(v).ok())
    }
}

pub type ForwardResult = GatewayResult<ForwardResponse>;

#[derive(Clone, Debug)]
pub struct ProxyConfig {
    pub request_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Split a sub-path into percent-encoded segments.
///
/// Anything from the first `:` on is dropped, so `"a b/c:json"` becomes
/// `["a%20b", "c"]`.
pub fn sanitize_path(path: &str) -> Vec<String> {
    let path = match path.find(':') {
        Some(idx) => &path[..idx],
        None => path,
    };

    path.trim_start_matches('/')
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(encode_path_segment)
        .collect()
}

pub fn encode_path_segment(segment: &str) -> String {
    let mut encoded = String::with_capacity(segment.len());
    for &byte in segment.as_bytes() {
        if byte.is_ascii_alphanumeric() || SEGMENT_SAFE.contains(&byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}

pub fn build_target_url(base_url: &str, segments: &[String]) -> String {
    let base = base_url.trim_end_matches('/');
    if segments.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, segments.join("/"))
    }
}

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|hop| hop.eq_ignore_ascii_case(name))
}

/// Inbound headers minus hop-by-hop, `host` and `content-length`
pub fn sanitize_request_headers(headers: &[HeaderPair]) -> Vec<HeaderPair> {
    headers
        .iter()
        .filter(|(name, _)| {
            !is_hop_by_hop(name)
                && !name.eq_ignore_ascii_case("host")
                && !name.eq_ignore_ascii_case("content-length")
        })
        .cloned()
        .collect()
}

/// Backend headers minus hop-by-hop and `content-length`
pub fn sanitize_response_headers(headers: &[HeaderPair]) -> Vec<HeaderPair> {
    headers
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name) && !name.eq_ignore_ascii_case("content-length"))
        .cloned()
        .collect()
}

pub fn body_allowed(method: &Method) -> bool {
    *method != Method::GET && *method != Method::HEAD
}

pub struct ProxyForwarder {
    discovery: Arc<ServiceDiscovery>,
    client: Client,
    config: ProxyConfig,
}

impl ProxyForwarder {
    pub fn new(discovery: Arc<ServiceDiscovery>, config: ProxyConfig) -> GatewayResult<Self> {
        // One pooled client for every backend
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GatewayError::InvalidConfig(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            discovery,
            client,
            config,
        })
    }

    pub fn discovery(&self) -> &Arc<ServiceDiscovery> {
        &self.discovery
    }

    /// Forward one request to an instance of `request.service_name`.
    ///
    /// The instance is held by a lease for the duration of the call and
    /// released on every exit path.
    pub async fn forward(&self, request: ForwardRequest) -> ForwardResult {
        let start = Instant::now();
        let service_name = request.service_name.clone();
        let lease = self.discovery.acquire_lease(&service_name).await?;

        let result = self.execute(&lease, request, start).await;
        drop(lease);

        match &result {
            Ok(response) => {
                logging::log_forward_outcome(&service_name, Ok(response.status_code), response.elapsed)
            }
            Err(e) => logging::log_forward_outcome(&service_name, Err(&e.to_string()), start.elapsed()),
        }
        result
    }

    async fn execute(&self, lease: &InstanceLease, request: ForwardRequest, start: Instant) -> ForwardResult {
        let service_name = request.service_name;
        let instance = lease.instance();

        let method = Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| GatewayError::internal(&service_name, format!("invalid method: {}", e)))?;

        let segments = sanitize_path(&request.path);
        let target_url = build_target_url(&instance.base_url(), &segments);
        let url = reqwest::Url::parse(&target_url)
            .map_err(|e| GatewayError::internal(&service_name, format!("invalid target url {}: {}", target_url, e)))?;

        let mut outbound_headers = HeaderMap::new();
        for (name, value) in sanitize_request_headers(&request.headers) {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_bytes(&value),
            ) {
                (Ok(name), Ok(value)) => {
                    outbound_headers.append(name, value);
                }
                _ => warn!("Dropping malformed header {} for service {}", name, service_name),
            }
        }

        let mut builder = self
            .client
            .request(method.clone(), url)
            .headers(outbound_headers);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if body_allowed(&method) {
            builder = builder.body(request.body);
        } else if !request.body.is_empty() {
            debug!("Dropping {} byte body on {} request", request.body.len(), method);
        }

        info!("Forwarding {} request to {}", method, target_url);

        let call = async {
            let response = builder.send().await?;
            let status_code = response.status().as_u16();
            let resolved_url = response.url().to_string();
            let headers: Vec<HeaderPair> = response
                .headers()
                .iter()
                .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
                .collect();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>((status_code, resolved_url, headers, body.to_vec()))
        };

        match timeout(self.config.request_timeout, call).await {
            Ok(Ok((status_code, resolved_url, headers, body))) => Ok(ForwardResponse {
                service_name,
                status_code,
                headers: sanitize_response_headers(&headers),
                body,
                target_url: resolved_url,
                elapsed: start.elapsed(),
                instance_id: instance.instance_id(),
            }),
            Ok(Err(e)) => Err(Self::map_transport_error(&service_name, e)),
            Err(_) => {
                warn!(
                    "Request to {} timed out after {:?}",
                    target_url, self.config.request_timeout
                );
                Err(GatewayError::Timeout(service_name))
            }
        }
    }

    fn map_transport_error(service_name: &str, error: reqwest::Error) -> GatewayError {
        if error.is_timeout() {
            GatewayError::Timeout(service_name.to_string())
        } else if error.is_connect() {
            GatewayError::ConnectFailed(service_name.to_string())
        } else {
            GatewayError::internal(service_name, error)
        }
    }
}
