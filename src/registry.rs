//! Instance registry
//!
//! Authoritative mapping from a logical service name to its backend instances,
//! balancing strategy and health check path. Entries are immutable once built;
//! re-registering a service swaps in a whole new entry so holders of the old
//! instances keep a consistent view until they release them.

use crate::error::{GatewayError, GatewayResult};
use crate::logging;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock as AsyncRwLock;

pub const DEFAULT_HEALTH_CHECK_PATH: &str = "/health";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    /// Least-loaded instance, random among ties
    #[default]
    #[serde(alias = "round_robin")]
    RoundRobinLeastBusy,
    LeastConnections,
    Random,
    #[serde(alias = "weighted_round_robin")]
    WeightedRandom,
}

impl LoadBalancingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadBalancingStrategy::RoundRobinLeastBusy => "round_robin_least_busy",
            LoadBalancingStrategy::LeastConnections => "least_connections",
            LoadBalancingStrategy::Random => "random",
            LoadBalancingStrategy::WeightedRandom => "weighted_random",
        }
    }
}

impl fmt::Display for LoadBalancingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LoadBalancingStrategy {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round_robin" | "round_robin_least_busy" => Ok(LoadBalancingStrategy::RoundRobinLeastBusy),
            "least_connections" => Ok(LoadBalancingStrategy::LeastConnections),
            "random" => Ok(LoadBalancingStrategy::Random),
            "weighted_random" | "weighted_round_robin" => Ok(LoadBalancingStrategy::WeightedRandom),
            other => Err(GatewayError::InvalidConfig(format!(
                "unknown load balancing strategy '{}'",
                other
            ))),
        }
    }
}

/// Static description of one backend, as supplied by configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn default_weight() -> u32 {
    1
}

impl InstanceSpec {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            weight: default_weight(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Health fields that must always be written together
#[derive(Clone, Debug)]
pub struct HealthState {
    pub healthy: bool,
    pub last_health_check: DateTime<Utc>,
    pub last_response_time_ms: f64,
}

/// A network-addressable backend process
#[derive(Debug)]
pub struct ServiceInstance {
    pub host: String,
    pub port: u16,
    pub weight: u32,
    pub metadata: HashMap<String, String>,
    health: RwLock<HealthState>,
    active_connections: AtomicI64,
}

impl ServiceInstance {
    pub fn new(spec: InstanceSpec) -> Self {
        Self {
            host: spec.host,
            port: spec.port,
            weight: spec.weight,
            metadata: spec.metadata,
            health: RwLock::new(HealthState {
                healthy: true,
                last_health_check: Utc::now(),
                last_response_time_ms: 0.0,
            }),
            active_connections: AtomicI64::new(0),
        }
    }

    pub fn base_url(&self) -> String {
        if self.port == 443 {
            format!("https://{}", self.host)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }

    pub fn instance_id(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_healthy(&self) -> bool {
        self.health.read().healthy
    }

    pub fn health(&self) -> HealthState {
        self.health.read().clone()
    }

    /// Store the result of a health probe
    pub fn record_health(&self, healthy: bool, response_time_ms: f64) {
        let mut health = self.health.write();
        health.healthy = healthy;
        health.last_health_check = Utc::now();
        health.last_response_time_ms = response_time_ms;
    }

    pub fn active_connections(&self) -> i64 {
        self.active_connections.load(Ordering::SeqCst)
    }

    /// Count one more in-flight request against this instance.
    /// Returns the new count.
    pub fn reserve(&self) -> i64 {
        self.active_connections.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Count one request as finished, never going below zero.
    /// Returns `Err(0)` when there was nothing to release.
    pub fn unreserve(&self) -> Result<i64, i64> {
        self.active_connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                if current > 0 {
                    Some(current - 1)
                } else {
                    None
                }
            })
            .map(|previous| previous - 1)
            .map_err(|_| 0)
    }

    pub fn status(&self) -> InstanceStatus {
        let health = self.health();
        InstanceStatus {
            host: self.host.clone(),
            port: self.port,
            weight: self.weight,
            healthy: health.healthy,
            last_health_check: health.last_health_check.to_rfc3339(),
            active_connections: self.active_connections(),
            response_time_ms: health.last_response_time_ms,
            metadata: self.metadata.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct InstanceStatus {
    pub host: String,
    pub port: u16,
    pub weight: u32,
    pub healthy: bool,
    pub last_health_check: String,
    pub active_connections: i64,
    pub response_time_ms: f64,
    pub metadata: HashMap<String, String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ServiceStatus {
    pub service_name: String,
    pub total_instances: usize,
    pub healthy_instances: usize,
    pub strategy: LoadBalancingStrategy,
    pub health_check_path: String,
    pub instances: Vec<InstanceStatus>,
}

#[derive(Debug)]
pub struct ServiceEntry {
    pub service_name: String,
    pub instances: Vec<Arc<ServiceInstance>>,
    pub strategy: LoadBalancingStrategy,
    pub health_check_path: String,
    // Serializes select-then-reserve for this service only
    selection: Mutex<()>,
}

impl ServiceEntry {
    /// Run `f` while holding this service's selection lock
    pub fn with_selection_lock<T>(&self, f: impl FnOnce(&[Arc<ServiceInstance>]) -> T) -> T {
        let _guard = self.selection.lock();
        f(&self.instances)
    }

    pub fn status(&self) -> ServiceStatus {
        let instances: Vec<InstanceStatus> = self.instances.iter().map(|i| i.status()).collect();
        ServiceStatus {
            service_name: self.service_name.clone(),
            total_instances: instances.len(),
            healthy_instances: instances.iter().filter(|i| i.healthy).count(),
            strategy: self.strategy,
            health_check_path: self.health_check_path.clone(),
            instances,
        }
    }
}

/// Process-wide registry, constructed once and shared by handle
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    services: AsyncRwLock<HashMap<String, Arc<ServiceEntry>>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a service.
    ///
    /// The new entry is built completely before it is swapped into the map, so
    /// readers see either the old entry or the new one.
    pub async fn register(
        &self,
        service_name: &str,
        instances: Vec<InstanceSpec>,
        strategy: LoadBalancingStrategy,
        health_check_path: &str,
    ) -> GatewayResult<Arc<ServiceEntry>> {
        if service_name.trim().is_empty() {
            return Err(GatewayError::InvalidConfig(
                "service name must not be empty".to_string(),
            ));
        }
        if instances.is_empty() {
            return Err(GatewayError::InvalidConfig(format!(
                "service {} has no instances",
                service_name
            )));
        }
        if let Some(bad) = instances.iter().find(|i| i.port == 0) {
            return Err(GatewayError::InvalidConfig(format!(
                "service {} instance {} has port 0",
                service_name, bad.host
            )));
        }

        let health_check_path = if health_check_path.is_empty() {
            DEFAULT_HEALTH_CHECK_PATH.to_string()
        } else {
            health_check_path.to_string()
        };

        let entry = Arc::new(ServiceEntry {
            service_name: service_name.to_string(),
            instances: instances
                .into_iter()
                .map(|spec| Arc::new(ServiceInstance::new(spec)))
                .collect(),
            strategy,
            health_check_path,
            selection: Mutex::new(()),
        });

        self.services
            .write()
            .await
            .insert(service_name.to_string(), entry.clone());

        logging::log_service_registered(service_name, entry.instances.len(), strategy.as_str());
        Ok(entry)
    }

    pub async fn lookup(&self, service_name: &str) -> Option<Arc<ServiceEntry>> {
        self.services.read().await.get(service_name).cloned()
    }

    pub async fn all_service_names(&self) -> BTreeSet<String> {
        self.services.read().await.keys().cloned().collect()
    }

    pub async fn entries(&self) -> Vec<Arc<ServiceEntry>> {
        self.services.read().await.values().cloned().collect()
    }
}
