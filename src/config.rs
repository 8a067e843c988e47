//! Gateway configuration
//!
//! Loaded from an optional JSON file, then overridden by environment
//! variables. Command line flags are applied on top by the binary.

use crate::error::GatewayResult;
use crate::health_probe::HealthProbeMode;
use crate::proxy::ProxyConfig;
use crate::registry::{InstanceSpec, LoadBalancingStrategy, DEFAULT_HEALTH_CHECK_PATH};
use crate::service_discovery::ServiceDiscovery;
use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address to bind
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Overall deadline for one forwarded request, in seconds
    pub request_timeout_secs: u64,
    /// Seconds between health evaluation rounds
    pub health_check_interval_secs: u64,
    /// Deadline for a single health probe, in seconds
    pub health_check_timeout_secs: u64,
    /// Which health probe to run
    pub health_probe: HealthProbeMode,
    /// Echo internal error causes to clients. Debugging only.
    pub expose_error_details: bool,
    pub services: Vec<ServiceConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_secs: 30,
            health_check_interval_secs: 30,
            health_check_timeout_secs: 5,
            health_probe: HealthProbeMode::Http,
            expose_error_details: false,
            services: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub instances: Vec<InstanceSpec>,
    #[serde(default)]
    pub strategy: LoadBalancingStrategy,
    #[serde(default = "default_health_check_path")]
    pub health_check_path: String,
}

fn default_health_check_path() -> String {
    DEFAULT_HEALTH_CHECK_PATH.to_string()
}

impl ServiceConfig {
    pub fn new(name: impl Into<String>, instances: Vec<InstanceSpec>) -> Self {
        Self {
            name: name.into(),
            instances,
            strategy: LoadBalancingStrategy::default(),
            health_check_path: default_health_check_path(),
        }
    }
}

impl GatewayConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// File (if any), then process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;

        if config.services.is_empty() {
            warn!("No services configured, registering local development defaults");
            config.services = Self::local_services();
        }
        Ok(config)
    }

    /// Apply overrides from an environment lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("GATEWAY_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("GATEWAY_PORT").or_else(|| lookup("PORT")) {
            self.port = port
                .parse()
                .map_err(|_| anyhow!("invalid port '{}'", port))?;
        }
        if let Some(secs) = lookup("REQUEST_TIMEOUT") {
            self.request_timeout_secs = secs
                .parse()
                .map_err(|_| anyhow!("invalid REQUEST_TIMEOUT '{}'", secs))?;
        }
        if let Some(secs) = lookup("HEALTH_CHECK_INTERVAL") {
            self.health_check_interval_secs = secs
                .parse()
                .map_err(|_| anyhow!("invalid HEALTH_CHECK_INTERVAL '{}'", secs))?;
        }
        if let Some(mode) = lookup("GATEWAY_HEALTH_PROBE") {
            self.health_probe = HealthProbeMode::parse(&mode)
                .ok_or_else(|| anyhow!("invalid GATEWAY_HEALTH_PROBE '{}'", mode))?;
        }
        if let Some(flag) = lookup("GATEWAY_DEBUG_ERRORS") {
            self.expose_error_details = matches!(flag.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        Ok(())
    }

    /// Backends used when running next to the local compose setup
    pub fn local_services() -> Vec<ServiceConfig> {
        vec![
            ServiceConfig::new("chatbot", vec![InstanceSpec::new("chatbot-service", 8006)]),
            ServiceConfig::new("auth", vec![InstanceSpec::new("auth-service", 8008)]),
        ]
    }

    /// Durations below one second are raised to one second
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs.max(1))
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_secs.max(1))
    }

    pub fn proxy_config(&self) -> ProxyConfig {
        ProxyConfig {
            request_timeout: self.request_timeout(),
        }
    }

    /// Register every configured service; the first invalid one aborts.
    pub async fn register_services(&self, discovery: &ServiceDiscovery) -> GatewayResult<()> {
        for service in &self.services {
            discovery
                .register(
                    &service.name,
                    service.instances.clone(),
                    service.strategy,
                    &service.health_check_path,
                )
                .await?;
        }
        info!(
            "Registered services: {:?}",
            discovery.registry().all_service_names().await
        );
        Ok(())
    }
}
