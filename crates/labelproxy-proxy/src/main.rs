//! Process entry point: wires configuration, logging, metrics, the route
//! table, and the axum server together: `init_tracing` / `init_metrics` /
//! graceful shutdown.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use labelproxy_proxy::config::ProxyConfig;
use labelproxy_proxy::proxy::AppState;
use labelproxy_proxy::routes::{create_router, RouteTable};
use labelproxy_proxy::security::{validate_upstream_url, UrlValidationConfig};
use labelproxy_proxy::Cli;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = ProxyConfig::load(&cli.config, &cli)?;

    let url_validation = if cli.insecure_upstream {
        UrlValidationConfig::development()
    } else {
        UrlValidationConfig::default()
    };
    validate_upstream_url(&config.upstream_url, &url_validation)
        .map_err(|e| anyhow::anyhow!("upstream_url rejected: {e}"))?;

    let route_table = RouteTable::build(&config)?;
    let metrics_handle = init_metrics();
    let state = AppState::new(config, route_table, metrics_handle)?;

    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", cli.listen, cli.port).parse()?;
    tracing::info!(%addr, "labelproxy listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "labelproxy_proxy=info,labelproxy_enforce=info",
        1 => "labelproxy_proxy=debug,labelproxy_enforce=debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}

fn init_metrics() -> metrics_exporter_prometheus::PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus metrics recorder");

    metrics::describe_counter!(
        "labelproxy_requests_total",
        "Total number of proxied requests, by route and outcome"
    );
    metrics::describe_histogram!(
        "labelproxy_upstream_duration_seconds",
        "Latency of upstream requests"
    );

    handle
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    SHUTDOWN.store(true, Ordering::SeqCst);
    tracing::info!("shutdown signal received, draining in-flight requests");
}
