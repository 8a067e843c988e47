use anyhow::Result;
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;

use gateway::gateway::{router, GatewayState};
use gateway::health_probe::{build_probe, HealthProbeMode};
use gateway::logging;
use gateway::{GatewayConfig, InstanceRegistry, ProxyForwarder, ServiceDiscovery};

#[derive(Parser)]
#[command(author, version, about = "API gateway request router", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Port to listen on, overrides config and environment
    #[arg(long)]
    port: Option<u16>,
    /// Mark every instance healthy instead of probing it
    #[arg(long)]
    dev_health_probe: bool,
    /// Return internal error causes to clients
    #[arg(long)]
    debug_errors: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging();
    let cli = Cli::parse();

    let mut config = GatewayConfig::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if cli.dev_health_probe {
        config.health_probe = HealthProbeMode::AlwaysHealthy;
    }
    if cli.debug_errors {
        config.expose_error_details = true;
    }

    let probe = build_probe(config.health_probe, config.health_check_timeout())?;
    let registry = Arc::new(InstanceRegistry::new());
    let discovery = Arc::new(ServiceDiscovery::new(registry, probe));

    // Bad registrations abort startup
    config.register_services(&discovery).await?;

    let health_task = discovery.start_health_checks(config.health_check_interval());

    let forwarder = Arc::new(ProxyForwarder::new(discovery.clone(), config.proxy_config())?);
    let app = router(GatewayState {
        discovery: discovery.clone(),
        forwarder,
        expose_error_details: config.expose_error_details,
    });

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(
        "Gateway listening on http://{} (health probe: {})",
        addr,
        discovery.probe_name()
    );

    let result = axum::serve(listener, app).await;
    health_task.abort();
    result?;
    Ok(())
}
