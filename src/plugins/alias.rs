//! Alias plugin: mirrors another plugin instance's current artifact.
//!
//! Useful when several playlists want the same expensive content without
//! rendering it twice. Hot-path safe: it only does an artifact lookup.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use super::{settings, ImageSource, Plugin, PluginContext, PluginResponse};
use crate::error::PluginError;
use crate::models::{ArtifactKey, PluginDefinition, PluginKind};
use crate::store::Store;

pub struct AliasPlugin {
    definition: PluginDefinition,
    store: Arc<Store>,
}

impl AliasPlugin {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            definition: PluginDefinition {
                type_id: "alias",
                kind: PluginKind::System,
                requires_processing: false,
                config_schema: json!({
                    "source_instance_id": {"type": "integer", "required": true},
                }),
                template: None,
                layout: None,
            },
            store,
        }
    }
}

#[async_trait]
impl Plugin for AliasPlugin {
    fn definition(&self) -> &PluginDefinition {
        &self.definition
    }

    async fn process(&self, ctx: &PluginContext) -> Result<PluginResponse, PluginError> {
        let source_id = settings::get_int(&ctx.settings, "source_instance_id")
            .ok_or_else(|| PluginError::Settings("missing field: source_instance_id".into()))?;

        // Prefer the exact geometry of the polling device, fall back to the
        // newest artifact at any geometry.
        let exact = self
            .store
            .get_artifact(&ArtifactKey {
                plugin_instance_id: source_id,
                width: ctx.model.width,
                height: ctx.model.height,
                bit_depth: ctx.model.bit_depth,
            })
            .map_err(|e| PluginError::Other(e.to_string()))?;
        let artifact = match exact {
            Some(a) => Some(a),
            None => self
                .store
                .newest_artifact_for_instance(source_id)
                .map_err(|e| PluginError::Other(e.to_string()))?,
        };

        let artifact = artifact.ok_or_else(|| {
            PluginError::Other(format!("no artifact for source instance {source_id}"))
        })?;

        Ok(PluginResponse::Image {
            source: ImageSource::Url(artifact.path.clone()),
            filename: format!("alias_{}", artifact.content_hash),
            refresh_rate: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeviceModel, PluginInstance};
    use chrono::Utc;

    fn ctx(settings: serde_json::Value) -> PluginContext {
        PluginContext {
            device: None,
            instance: PluginInstance {
                id: 9,
                user_id: 1,
                plugin_type: "alias".into(),
                name: "a".into(),
                settings: settings.clone(),
                refresh_interval: 900,
            },
            settings,
            model: DeviceModel::fallback(),
        }
    }

    fn seeded_store() -> (Arc<Store>, i64) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let user = store.create_user(None).unwrap();
        let source = store
            .create_plugin_instance(user, "webhook", "src", &json!({}), 900)
            .unwrap();
        (store, source.id)
    }

    #[tokio::test]
    async fn serves_the_source_artifact() {
        let (store, source) = seeded_store();
        store
            .upsert_artifact(
                &ArtifactKey {
                    plugin_instance_id: source,
                    width: 800,
                    height: 480,
                    bit_depth: 1,
                },
                "rendered/webhook/x.png",
                "abc123",
                Utc::now(),
            )
            .unwrap();

        let plugin = AliasPlugin::new(store);
        let response = plugin
            .process(&ctx(json!({"source_instance_id": source})))
            .await
            .unwrap();
        match response {
            PluginResponse::Image {
                source: ImageSource::Url(url),
                filename,
                ..
            } => {
                assert_eq!(url, "rendered/webhook/x.png");
                assert_eq!(filename, "alias_abc123");
            }
            other => panic!("expected image response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn falls_back_to_other_geometry() {
        let (store, source) = seeded_store();
        store
            .upsert_artifact(
                &ArtifactKey {
                    plugin_instance_id: source,
                    width: 1872,
                    height: 1404,
                    bit_depth: 2,
                },
                "rendered/webhook/big.png",
                "big",
                Utc::now(),
            )
            .unwrap();

        let plugin = AliasPlugin::new(store);
        let response = plugin
            .process(&ctx(json!({"source_instance_id": source})))
            .await
            .unwrap();
        assert!(matches!(response, PluginResponse::Image { .. }));
    }

    #[tokio::test]
    async fn source_without_artifact_errors() {
        let (store, source) = seeded_store();
        let plugin = AliasPlugin::new(store);
        let err = plugin
            .process(&ctx(json!({"source_instance_id": source})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no artifact"));
    }
}
