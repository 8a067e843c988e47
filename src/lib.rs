pub mod config;
pub mod error;
pub mod gateway;
pub mod health_probe;
pub mod load_balancer;
pub mod logging;
pub mod proxy;
pub mod registry;
pub mod service_discovery;

pub use config::{GatewayConfig, ServiceConfig};
pub use error::{GatewayError, GatewayResult};
pub use health_probe::{AlwaysHealthyProbe, HealthProbe, HealthProbeMode, HttpHealthProbe, ProbeOutcome};
pub use load_balancer::{LoadBalancer, SelectionError};
pub use proxy::{
    ForwardRequest, ForwardResponse, ForwardResult, HeaderPair, ProxyConfig, ProxyForwarder,
};
pub use registry::{
    InstanceRegistry, InstanceSpec, LoadBalancingStrategy, ServiceEntry, ServiceInstance,
    ServiceStatus,
};
pub use service_discovery::{HealthReport, InstanceLease, ServiceDiscovery};
