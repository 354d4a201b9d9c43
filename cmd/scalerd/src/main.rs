use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use clap::Parser;
use pkg_controllers::IntentController;
use pkg_metrics::ControllerMetrics;
use pkg_policies::PolicyRegistry;
use pkg_scaler::SafeScaler;
use pkg_sources::SourceRegistry;
use pkg_types::config::ControllerConfigFile;
use pkg_workload::{IntentApi, OrchestratorClient, WorkloadApi};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "scalerd", about = "horizontal workload autoscaling controller")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = "/etc/scalerd/config.yaml")]
    config: String,

    /// Orchestrator API endpoint
    #[arg(long)]
    server: Option<String>,

    /// Bearer token for the orchestrator API
    #[arg(long)]
    token: Option<String>,

    /// Port for the health and metrics endpoints
    #[arg(long)]
    listen_port: Option<u16>,

    /// Seconds between intent watch passes
    #[arg(long)]
    watch_interval: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    // Load config file (returns defaults if file not found)
    let file_cfg = ControllerConfigFile::load(&cli.config)?;
    info!("Config file: {}", cli.config);

    // Merge: CLI args > config file > defaults
    let server = cli
        .server
        .or(file_cfg.server)
        .unwrap_or_else(|| "http://127.0.0.1:6443".to_string());
    let token = cli.token.or(file_cfg.token).unwrap_or_default();
    let listen_port = cli.listen_port.or(file_cfg.listen_port).unwrap_or(8081);
    let watch_interval = cli
        .watch_interval
        .or(file_cfg.watch_interval_seconds)
        .unwrap_or(10);

    info!("Starting scalerd");
    info!("  Orchestrator:   {}", server);
    info!("  Listen port:    {}", listen_port);
    info!("  Watch interval: {}s", watch_interval);

    let client = Arc::new(OrchestratorClient::new(&server, &token)?);
    let metrics = Arc::new(ControllerMetrics::new());
    let controller = Arc::new(IntentController::new(
        Arc::clone(&client) as Arc<dyn IntentApi>,
        client as Arc<dyn WorkloadApi>,
        Arc::new(SourceRegistry::with_builtins()),
        Arc::new(PolicyRegistry::with_builtins()),
        Arc::new(SafeScaler::new()),
        Arc::clone(&metrics),
        Duration::from_secs(watch_interval),
    ));
    let controller_task = Arc::clone(&controller).start();

    // Health and metrics endpoints
    let app = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route(
            "/metrics",
            get({
                let metrics = Arc::clone(&metrics);
                move || {
                    let metrics = Arc::clone(&metrics);
                    async move { metrics.render() }
                }
            }),
        );

    let addr = SocketAddr::from(([0, 0, 0, 0], listen_port));
    info!("Serving health and metrics on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("metrics server error: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    controller.shutdown().await;
    let _ = tokio::time::timeout(Duration::from_secs(5), controller_task).await;
    server_task.abort();
    info!("scalerd stopped");

    Ok(())
}
