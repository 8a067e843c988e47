use chrono::Local;
use env_logger::{Builder, Env};
use log::{debug, error, info, warn};
use std::io::Write;
use std::sync::Once;
use std::time::Duration;

static INIT: Once = Once::new();

/// Initialize the logging system.
///
/// Defaults to `info`; `RUST_LOG` overrides the filter.
pub fn init_logging() {
    INIT.call_once(|| {
        let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
        builder.format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}: {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        });
        builder.init();
    });
}

/// Log a service registration
pub fn log_service_registered(service_name: &str, instances: usize, strategy: &str) {
    info!(
        "Service {} registered with {} instances (strategy: {})",
        service_name, instances, strategy
    );
}

/// Log the instance chosen for a request
pub fn log_instance_selected(service_name: &str, instance_id: &str, active_connections: i64) {
    debug!(
        "Selected instance {} for service {} (active connections: {})",
        instance_id, service_name, active_connections
    );
}

/// Log a release that would have driven the connection counter negative
pub fn log_release_underflow(service_name: &str, instance_id: &str) {
    warn!(
        "Release of instance {} for service {} without a matching acquire; counter clamped at 0",
        instance_id, service_name
    );
}

/// Log a health probe result
pub fn log_health_result(service_name: &str, instance_id: &str, healthy: bool, response_time_ms: f64) {
    if healthy {
        debug!(
            "Health check for {}/{}: healthy ({:.2}ms)",
            service_name, instance_id, response_time_ms
        );
    } else {
        warn!(
            "Health check for {}/{}: unhealthy ({:.2}ms)",
            service_name, instance_id, response_time_ms
        );
    }
}

/// Log a probe that errored or panicked
pub fn log_probe_failure(service_name: &str, instance_id: &str, cause: &str) {
    error!(
        "Health probe for {}/{} failed: {}",
        service_name, instance_id, cause
    );
}

/// Log the outcome of one forwarded request
pub fn log_forward_outcome(service_name: &str, status: Result<u16, &str>, elapsed: Duration) {
    match status {
        Ok(code) => info!(
            "Response from {}: {} ({:.3}s)",
            service_name,
            code,
            elapsed.as_secs_f64()
        ),
        Err(kind) => error!(
            "Forwarding to {} failed: {} ({:.3}s)",
            service_name,
            kind,
            elapsed.as_secs_f64()
        ),
    }
}
