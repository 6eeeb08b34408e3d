//! Test application factory.

use axum::{
    body::Body,
    http::{HeaderMap, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use stationmaster::config::Config;
use stationmaster::plugins::PluginRegistry;
use stationmaster::server::{build_router, AppState};
use stationmaster::services::{Dispatcher, EventBus, FirmwareService, RenderQueue};
use stationmaster::store::Store;

/// Test application wired exactly like production, but on an in-memory
/// database and a temp static dir.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub store: Arc<Store>,
    /// Keeps the static dir alive for the test's duration.
    pub static_dir: tempfile::TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config_and_registry(|_| {}, |_| {})
    }

    pub fn with_config(configure: impl FnOnce(&mut Config)) -> Self {
        Self::with_config_and_registry(configure, |_| {})
    }

    /// Full control: tweak the config and register extra plugins before
    /// the state is frozen.
    pub fn with_config_and_registry(
        configure: impl FnOnce(&mut Config),
        plugins: impl FnOnce(&mut PluginRegistry),
    ) -> Self {
        let static_dir = tempfile::tempdir().expect("tempdir");
        let mut config = Config {
            static_dir: static_dir.path().to_path_buf(),
            ..Config::default()
        };
        configure(&mut config);
        let config = Arc::new(config);

        let store = Arc::new(Store::open_in_memory().expect("in-memory store"));
        let mut registry = PluginRegistry::with_builtins(Arc::clone(&store));
        plugins(&mut registry);
        let registry = Arc::new(registry);

        let queue = Arc::new(RenderQueue::new(Arc::clone(&store), config.render_buffer));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&queue),
            Arc::clone(&config),
        ));
        let state = AppState {
            store: Arc::clone(&store),
            registry,
            queue,
            dispatcher,
            bus: Arc::new(EventBus::new()),
            firmware: Arc::new(FirmwareService::new(Arc::clone(&store), Arc::clone(&config))),
            config,
            http_client: reqwest::Client::new(),
        };

        Self {
            router: build_router(state.clone()),
            state,
            store,
            static_dir,
        }
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.request(Request::get(path).body(Body::empty()).unwrap())
            .await
    }

    pub async fn get_with_headers(&self, path: &str, headers: &[(&str, &str)]) -> TestResponse {
        let mut builder = Request::get(path);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.request(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn post_json(
        &self,
        path: &str,
        headers: &[(&str, &str)],
        body: &str,
    ) -> TestResponse {
        let mut builder = Request::post(path).header("Content-Type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.request(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    async fn request(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("request failed");

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("body collect")
            .to_bytes()
            .to_vec();

        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// Wait for a deferred write (cursor advance, status update) to land.
    /// Deferred work runs on a spawned task right after the response.
    pub async fn wait_for<F>(&self, mut condition: F)
    where
        F: FnMut() -> bool,
    {
        for _ in 0..100 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met within deadline");
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body)
            .unwrap_or_else(|e| panic!("invalid JSON body ({e}): {}", self.text()))
    }
}
