//! CLI entry point: loads config, builds the subsystem, starts its
//! background loops, and serves the Prometheus exposition endpoint.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use adaptive_cache::config::ConfigLoader;
use adaptive_cache::subsystem::CachingSubsystem;

#[derive(Parser, Debug)]
#[command(name = "adaptive-cache", about = "Adaptive caching subsystem daemon")]
struct Cli {
    /// Path to a TOML config file; falls back to environment overrides.
    #[arg(short, long)]
    config: Option<String>,

    /// Address to serve the Prometheus metrics endpoint on.
    #[arg(long, default_value = "127.0.0.1:9898")]
    metrics_addr: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load_from_env()?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let metrics_handle = adaptive_cache::metrics::install_recorder();

    let check_interval = config.scheduler.check_interval_seconds;
    let warming_interval = config.warming.warming_interval_seconds;
    let degraded_maps_to = config.recovery.degraded_maps_to.clone();

    let subsystem = CachingSubsystem::build(config).await?;
    subsystem.spawn_invalidation_maintenance();
    subsystem.spawn_invalidation_worker();
    subsystem.spawn_warming_loop(warming_interval);
    subsystem.spawn_health_loop(check_interval, degraded_maps_to);

    let app = axum_router(metrics_handle);
    let listener = tokio::net::TcpListener::bind(&cli.metrics_addr).await?;
    tracing::info!(addr = %cli.metrics_addr, "serving metrics");
    axum::serve(listener, app).await?;

    Ok(())
}

fn axum_router(handle: metrics_exporter_prometheus::PrometheusHandle) -> axum::Router {
    axum::Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    )
}
