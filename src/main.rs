use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use stationmaster::config::Config;
use stationmaster::server::{build_router, ApiDoc, AppState};
use stationmaster::services::{
    CleanupTask, FirmwarePoller, HtmlRenderer, HttpRasterizer, ModelPoller, Rasterizer,
    RefreshScheduler, RenderWorkerPool, WorkerContext,
};
use stationmaster::store::Store;

#[derive(Parser)]
#[command(name = "stationmaster", version)]
#[command(about = "Stationmaster - display dispatch server for TRMNL e-ink devices")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default)
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Serve) | None => run_server().await,
    }
}

async fn run_server() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stationmaster=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env());
    tracing::info!(
        bind = %config.bind_addr,
        database = %config.database_path.display(),
        static_dir = %config.static_dir.display(),
        firmware_mode = ?config.firmware_mode,
        workers = config.render_workers,
        "Starting stationmaster"
    );

    let store = Arc::new(Store::open(&config.database_path)?);
    tokio::fs::create_dir_all(config.rendered_dir()).await?;

    let state = AppState::new(Arc::clone(&store), Arc::clone(&config));
    let shutdown = CancellationToken::new();

    // Render workers need a rasterizer; without one, processing plugins
    // stay queued until the operator configures RASTERIZER_URL.
    let workers = match &config.rasterizer_url {
        Some(url) => {
            let rasterizer: Arc<dyn Rasterizer> = Arc::new(HttpRasterizer::new(url.clone()));
            let ctx = Arc::new(WorkerContext {
                store: Arc::clone(&store),
                queue: Arc::clone(&state.queue),
                registry: Arc::clone(&state.registry),
                html: Arc::new(HtmlRenderer::new()),
                rasterizer,
                static_dir: config.static_dir.clone(),
            });
            Some(RenderWorkerPool::spawn(config.render_workers, ctx))
        }
        None => {
            tracing::warn!("RASTERIZER_URL not set; render workers disabled");
            None
        }
    };

    let firmware_poller = FirmwarePoller::spawn(
        Arc::clone(&state.firmware),
        config.firmware_poller_interval,
        shutdown.clone(),
    );
    let model_poller = Arc::new(ModelPoller::new(Arc::clone(&store), Arc::clone(&config)))
        .spawn(config.model_poller_interval, shutdown.clone());
    let cleanup = CleanupTask::new(Arc::clone(&store), config.static_dir.clone())
        .spawn(shutdown.clone());
    let refresh_scheduler = RefreshScheduler::new(Arc::clone(&store), Arc::clone(&state.queue))
        .spawn(shutdown.clone());

    let app = build_router(state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "Stationmaster listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cancel the claim loops first, then drain in-flight renders.
    tracing::info!("Shutting down");
    shutdown.cancel();
    if let Some(workers) = workers {
        workers.shutdown().await;
    }
    let _ = tokio::join!(firmware_poller, model_poller, cleanup, refresh_scheduler);

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Received shutdown signal");
}
