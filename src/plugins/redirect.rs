//! Redirect plugin: points the device at an externally hosted image.
//!
//! No processing happens server-side; the configured URL is handed through
//! as-is, so this runs synchronously in the display hot path.

use async_trait::async_trait;
use serde_json::json;
use sha2::{Digest, Sha256};

use super::{settings, ImageSource, Plugin, PluginContext, PluginResponse};
use crate::error::PluginError;
use crate::models::{PluginDefinition, PluginKind};

pub struct RedirectPlugin {
    definition: PluginDefinition,
}

impl RedirectPlugin {
    pub fn new() -> Self {
        Self {
            definition: PluginDefinition {
                type_id: "redirect",
                kind: PluginKind::System,
                requires_processing: false,
                config_schema: json!({
                    "url": {"type": "string", "required": true},
                    "refresh_rate": {"type": "integer"},
                }),
                template: None,
                layout: None,
            },
        }
    }
}

impl Default for RedirectPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for RedirectPlugin {
    fn definition(&self) -> &PluginDefinition {
        &self.definition
    }

    async fn process(&self, ctx: &PluginContext) -> Result<PluginResponse, PluginError> {
        let url = settings::get_string(&ctx.settings, "url")
            .ok_or_else(|| PluginError::Settings("missing field: url".into()))?;

        // Stable filename per URL so devices can skip unchanged content.
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        let digest = hasher.finalize();
        let filename = format!("redirect_{}", hex::encode(&digest[..8]));

        Ok(PluginResponse::Image {
            source: ImageSource::Url(url.to_string()),
            filename,
            refresh_rate: settings::get_int_or(&ctx.settings, "refresh_rate", 0).max(0) as u32,
        })
    }
}
