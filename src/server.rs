//! HTTP server assembly.
//!
//! The router and application state live here so the production binary and
//! the integration tests run the exact same stack.

use axum::{
    extract::State,
    http::header::CONNECTION,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::{services::ServeDir, set_header::SetResponseHeaderLayer, trace::TraceLayer};
use utoipa::OpenApi;

use crate::api;
use crate::config::Config;
use crate::plugins::PluginRegistry;
use crate::services::{Dispatcher, EventBus, FirmwareService, RenderQueue};
use crate::store::Store;

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Stationmaster API",
        description = "Display dispatch server for TRMNL e-ink devices",
        license(name = "MIT")
    ),
    paths(
        api::setup::handle_setup,
        api::display::handle_display,
        api::display::handle_current_screen,
        api::log::handle_logs,
        api::firmware::handle_update_complete,
    ),
    components(schemas(
        api::SetupResponse,
        api::DisplayJsonResponse,
        api::CurrentScreenResponse,
        api::LogResponse,
        api::UpdateCompleteRequest,
        api::UpdateCompleteResponse,
    )),
    tags(
        (name = "Device", description = "Device registration"),
        (name = "Display", description = "Display content dispatch"),
        (name = "Logging", description = "Device log submission"),
        (name = "Firmware", description = "Firmware delivery")
    )
)]
pub struct ApiDoc;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub registry: Arc<PluginRegistry>,
    pub queue: Arc<RenderQueue>,
    pub dispatcher: Arc<Dispatcher>,
    pub bus: Arc<EventBus>,
    pub firmware: Arc<FirmwareService>,
    pub config: Arc<Config>,
    /// Shared client for firmware proxy streaming.
    pub http_client: reqwest::Client,
}

impl AppState {
    pub fn new(store: Arc<Store>, config: Arc<Config>) -> Self {
        let registry = Arc::new(PluginRegistry::with_builtins(Arc::clone(&store)));
        let queue = Arc::new(RenderQueue::new(Arc::clone(&store), config.render_buffer));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&queue),
            Arc::clone(&config),
        ));
        let bus = Arc::new(EventBus::new());
        let firmware = Arc::new(FirmwareService::new(Arc::clone(&store), Arc::clone(&config)));

        Self {
            store,
            registry,
            queue,
            dispatcher,
            bus,
            firmware,
            config,
            http_client: reqwest::Client::new(),
        }
    }
}

/// Build the router with all endpoints and middleware.
///
/// The `Connection: close` header matters: e-ink firmware HTTP clients
/// default to keep-alive but never reuse connections, so without it
/// orphaned connections pile up.
pub fn build_router(state: AppState) -> Router {
    let static_dir = state.config.static_dir.clone();
    Router::new()
        .route("/api/setup", get(api::handle_setup))
        .route("/api/display", get(api::handle_display))
        .route("/api/current_screen", get(api::handle_current_screen))
        .route("/api/logs", post(api::handle_logs))
        .route(
            "/api/trmnl/firmware/update-complete",
            post(api::handle_update_complete),
        )
        .route("/files/firmware/:filename", get(api::handle_firmware_file))
        .route("/api/events", get(api::handle_events))
        .route("/health", get(handle_health))
        .nest_service("/static", ServeDir::new(static_dir))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            CONNECTION,
            axum::http::HeaderValue::from_static("close"),
        ))
}

/// Health summary: queue pressure and SSE subscriber count.
async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let jobs = state.store.job_counts().unwrap_or_default();
    Json(json!({
        "status": "ok",
        "sse_subscribers": state.bus.subscriber_count(),
        "render_jobs": jobs,
    }))
}
