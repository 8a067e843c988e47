//! Health probes
//!
//! The probe is a pluggable capability so local development can run without
//! real backends. Which probe runs is chosen explicitly through configuration.

use crate::registry::ServiceInstance;
use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProbeOutcome {
    pub healthy: bool,
    pub response_time_ms: f64,
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Probe one instance. An `Err` means the probe itself could not run.
    async fn probe(&self, instance: &ServiceInstance, health_check_path: &str) -> Result<ProbeOutcome>;

    fn name(&self) -> &'static str;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthProbeMode {
    /// Real HTTP GET against the health check path
    #[default]
    Http,
    /// Every instance reports healthy without any network traffic
    AlwaysHealthy,
}

impl HealthProbeMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Some(HealthProbeMode::Http),
            "always_healthy" | "always-healthy" | "dev" => Some(HealthProbeMode::AlwaysHealthy),
            _ => None,
        }
    }
}

pub fn build_probe(mode: HealthProbeMode, timeout: Duration) -> Result<Arc<dyn HealthProbe>> {
    Ok(match mode {
        HealthProbeMode::Http => Arc::new(HttpHealthProbe::new(timeout)?),
        HealthProbeMode::AlwaysHealthy => Arc::new(AlwaysHealthyProbe),
    })
}

/// Issues `GET <base_url><health_check_path>`; any 2xx is healthy
pub struct HttpHealthProbe {
    client: reqwest::Client,
}

impl HttpHealthProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    fn probe_url(instance: &ServiceInstance, health_check_path: &str) -> String {
        if health_check_path.starts_with('/') {
            format!("{}{}", instance.base_url(), health_check_path)
        } else {
            format!("{}/{}", instance.base_url(), health_check_path)
        }
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, instance: &ServiceInstance, health_check_path: &str) -> Result<ProbeOutcome> {
        let url = Self::probe_url(instance, health_check_path);
        let start = Instant::now();

        let healthy = match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Health check request to {} failed: {}", url, e);
                false
            }
        };

        Ok(ProbeOutcome {
            healthy,
            response_time_ms: start.elapsed().as_secs_f64() * 1000.0,
        })
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Development probe: no network check, always healthy
pub struct AlwaysHealthyProbe;

#[async_trait]
impl HealthProbe for AlwaysHealthyProbe {
    async fn probe(&self, instance: &ServiceInstance, _health_check_path: &str) -> Result<ProbeOutcome> {
        debug!(
            "Skipped real health check for {}; marked as healthy",
            instance.instance_id()
        );
        Ok(ProbeOutcome {
            healthy: true,
            response_time_ms: 0.01,
        })
    }

    fn name(&self) -> &'static str {
        "always_healthy"
    }
}
