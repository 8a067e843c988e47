//! Service discovery facade
//!
//! Wraps the [`InstanceRegistry`] and [`LoadBalancer`] to hand out instances
//! for requests and take them back, and runs health evaluation through a
//! pluggable [`HealthProbe`].

use crate::error::{GatewayError, GatewayResult};
use crate::health_probe::{HealthProbe, ProbeOutcome};
use crate::load_balancer::LoadBalancer;
use crate::logging;
use crate::registry::{
    InstanceRegistry, InstanceSpec, LoadBalancingStrategy, ServiceEntry, ServiceInstance,
    ServiceStatus,
};
use futures::future::join_all;
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Summary of one health evaluation pass
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub probed: usize,
    pub healthy: usize,
    pub failed_probes: usize,
}

#[derive(Clone)]
pub struct ServiceDiscovery {
    registry: Arc<InstanceRegistry>,
    probe: Arc<dyn HealthProbe>,
}

impl ServiceDiscovery {
    pub fn new(registry: Arc<InstanceRegistry>, probe: Arc<dyn HealthProbe>) -> Self {
        Self { registry, probe }
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    pub fn probe_name(&self) -> &'static str {
        self.probe.name()
    }

    pub async fn register(
        &self,
        service_name: &str,
        instances: Vec<InstanceSpec>,
        strategy: LoadBalancingStrategy,
        health_check_path: &str,
    ) -> GatewayResult<Arc<ServiceEntry>> {
        self.registry
            .register(service_name, instances, strategy, health_check_path)
            .await
    }

    /// Select an instance and reserve it.
    ///
    /// The reserving increment happens under the service's selection lock, so
    /// the next acquire of the same service already sees it.
    pub async fn acquire(&self, service_name: &str) -> GatewayResult<Arc<ServiceInstance>> {
        let entry = match self.registry.lookup(service_name).await {
            Some(entry) => entry,
            None => {
                warn!("Service {} not found in registry", service_name);
                return Err(GatewayError::Unavailable(service_name.to_string()));
            }
        };

        let selected = entry.with_selection_lock(|instances| {
            let mut rng = rand::thread_rng();
            LoadBalancer::select(instances, entry.strategy, &mut rng).map(|instance| {
                let active = instance.reserve();
                (instance.clone(), active)
            })
        });

        match selected {
            Ok((instance, active)) => {
                logging::log_instance_selected(service_name, &instance.instance_id(), active);
                Ok(instance)
            }
            Err(e) => {
                warn!("Failed to select instance for service {}: {}", service_name, e);
                Err(GatewayError::Unavailable(service_name.to_string()))
            }
        }
    }

    /// Like [`acquire`](Self::acquire), but the instance is released when the
    /// returned lease is dropped.
    pub async fn acquire_lease(&self, service_name: &str) -> GatewayResult<InstanceLease> {
        let instance = self.acquire(service_name).await?;
        Ok(InstanceLease {
            service_name: service_name.to_string(),
            instance,
        })
    }

    pub fn release(&self, service_name: &str, instance: &ServiceInstance) {
        release_instance(service_name, instance);
    }

    /// Probe every registered instance once.
    ///
    /// Each probe runs in its own task; an error or panic only marks that
    /// instance unhealthy.
    pub async fn evaluate_health(&self) -> HealthReport {
        let mut targets = Vec::new();
        let mut handles = Vec::new();

        for entry in self.registry.entries().await {
            for instance in &entry.instances {
                let probe = self.probe.clone();
                let probed = instance.clone();
                let path = entry.health_check_path.clone();

                handles.push(tokio::spawn(async move { probe.probe(&probed, &path).await }));
                targets.push((entry.service_name.clone(), instance.clone()));
            }
        }

        let results = join_all(handles).await;

        let mut report = HealthReport::default();
        for ((service_name, instance), result) in targets.into_iter().zip(results) {
            report.probed += 1;
            let instance_id = instance.instance_id();

            let outcome = match result {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    report.failed_probes += 1;
                    logging::log_probe_failure(&service_name, &instance_id, &e.to_string());
                    ProbeOutcome { healthy: false, response_time_ms: 0.0 }
                }
                Err(join_error) => {
                    report.failed_probes += 1;
                    logging::log_probe_failure(&service_name, &instance_id, &join_error.to_string());
                    ProbeOutcome { healthy: false, response_time_ms: 0.0 }
                }
            };

            instance.record_health(outcome.healthy, outcome.response_time_ms);
            if outcome.healthy {
                report.healthy += 1;
            }
            logging::log_health_result(
                &service_name,
                &instance_id,
                outcome.healthy,
                outcome.response_time_ms,
            );
        }

        report
    }

    /// Run [`evaluate_health`](Self::evaluate_health) every `interval` until the
    /// returned task is aborted
    pub fn start_health_checks(&self, interval: Duration) -> JoinHandle<()> {
        let discovery = self.clone();
        info!(
            "Starting health check loop every {:?} using the {} probe",
            interval,
            self.probe.name()
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // A slow round pushes the next one back instead of queueing catch-up rounds
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let report = discovery.evaluate_health().await;
                if report.failed_probes > 0 || report.healthy < report.probed {
                    warn!(
                        "Health check round: {}/{} healthy, {} probe failures",
                        report.healthy, report.probed, report.failed_probes
                    );
                }
            }
        })
    }

    pub async fn status(&self, service_name: &str) -> Option<ServiceStatus> {
        self.registry
            .lookup(service_name)
            .await
            .map(|entry| entry.status())
    }

    pub async fn all_statuses(&self) -> BTreeMap<String, ServiceStatus> {
        self.registry
            .entries()
            .await
            .into_iter()
            .map(|entry| (entry.service_name.clone(), entry.status()))
            .collect()
    }
}

fn release_instance(service_name: &str, instance: &ServiceInstance) {
    if instance.unreserve().is_err() {
        logging::log_release_underflow(service_name, &instance.instance_id());
    }
}

/// An acquired instance that is released exactly once, when dropped
#[derive(Debug)]
pub struct InstanceLease {
    service_name: String,
    instance: Arc<ServiceInstance>,
}

impl InstanceLease {
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn instance(&self) -> &Arc<ServiceInstance> {
        &self.instance
    }
}

impl Drop for InstanceLease {
    fn drop(&mut self) {
        release_instance(&self.service_name, &self.instance);
    }
}
