//! Periodic device-model sync.
//!
//! Upstream publishes screen geometries per hardware revision; we mirror
//! them into device_models. Rows are append-only per (name, version) so a
//! geometry change upstream lands as a new version and old artifacts stay
//! interpretable.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::models::DeviceModel;
use crate::store::Store;

#[derive(Debug, Deserialize)]
struct UpstreamModel {
    name: String,
    #[serde(default = "default_model_version")]
    version: i64,
    width: u32,
    height: u32,
    #[serde(default = "default_bit_depth")]
    bit_depth: u32,
    #[serde(default = "default_color_depth")]
    color_depth: u32,
}

fn default_model_version() -> i64 {
    1
}
fn default_bit_depth() -> u32 {
    1
}
fn default_color_depth() -> u32 {
    2
}

pub struct ModelPoller {
    store: Arc<Store>,
    config: Arc<Config>,
    client: reqwest::Client,
}

impl ModelPoller {
    pub fn new(store: Arc<Store>, config: Arc<Config>) -> Self {
        Self {
            store,
            config,
            client: reqwest::Client::new(),
        }
    }

    pub async fn poll_once(&self) -> anyhow::Result<usize> {
        let upstream = match &self.config.model_upstream_url {
            Some(url) => url,
            None => return Ok(0),
        };
        let models: Vec<UpstreamModel> = self
            .client
            .get(upstream)
            .timeout(Duration::from_secs(30))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut synced = 0;
        for model in models {
            self.store.upsert_device_model(&DeviceModel {
                id: 0,
                name: model.name,
                version: model.version,
                width: model.width,
                height: model.height,
                bit_depth: model.bit_depth,
                color_depth: model.color_depth,
            })?;
            synced += 1;
        }
        tracing::debug!(synced, "Device models synced");
        Ok(synced)
    }

    pub fn spawn(self: Arc<Self>, interval: Duration, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.poll_once().await {
                            tracing::warn!(error = %e, "Device model sync failed");
                        }
                    }
                }
            }
            tracing::debug!("Model poller stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn sync_upserts_models() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"name": "og", "width": 800, "height": 480},
                {"name": "x", "version": 2, "width": 1872, "height": 1404, "bit_depth": 2, "color_depth": 4},
            ])))
            .mount(&server)
            .await;

        let store = Arc::new(Store::open_in_memory().unwrap());
        let config = Config {
            model_upstream_url: Some(format!("{}/models", server.uri())),
            ..Config::default()
        };
        let poller = ModelPoller::new(Arc::clone(&store), Arc::new(config));

        assert_eq!(poller.poll_once().await.unwrap(), 2);
        let x = store.find_device_model("x").unwrap().unwrap();
        assert_eq!((x.width, x.height, x.version), (1872, 1404, 2));

        // A second pass is a no-op, not a duplicate.
        assert_eq!(poller.poll_once().await.unwrap(), 2);
        assert_eq!(store.find_device_model("x").unwrap().unwrap().id, x.id);
    }

    #[tokio::test]
    async fn unconfigured_upstream_is_a_noop() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let poller = ModelPoller::new(store, Arc::new(Config::default()));
        assert_eq!(poller.poll_once().await.unwrap(), 0);
    }
}
