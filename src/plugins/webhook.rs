//! Webhook plugin: fetches JSON from a configured URL and renders it
//! through template markup. The canonical data plugin — requires the full
//! templating + rasterization pipeline, so it only runs in workers.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;

use super::{settings, Plugin, PluginContext, PluginResponse};
use crate::error::PluginError;
use crate::models::{PluginDefinition, PluginKind};

/// Template used when the instance does not configure one.
const DEFAULT_TEMPLATE: &str = r#"<div class="view">
  <h1>{{ title }}</h1>
  <table>
    {% for key, value in payload %}
    <tr><td class="label">{{ key }}</td><td>{{ value }}</td></tr>
    {% endfor %}
  </table>
</div>"#;

pub struct WebhookPlugin {
    definition: PluginDefinition,
    client: reqwest::Client,
}

impl WebhookPlugin {
    pub fn new() -> Self {
        Self {
            definition: PluginDefinition {
                type_id: "webhook",
                kind: PluginKind::System,
                requires_processing: true,
                config_schema: json!({
                    "url": {"type": "string", "required": true},
                    "title": {"type": "string"},
                    "template": {"type": "string"},
                    "timeout_seconds": {"type": "integer"},
                    "refresh_rate": {"type": "integer"},
                }),
                template: Some(DEFAULT_TEMPLATE),
                layout: None,
            },
            client: reqwest::Client::new(),
        }
    }
}

impl Default for WebhookPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for WebhookPlugin {
    fn definition(&self) -> &PluginDefinition {
        &self.definition
    }

    async fn process(&self, ctx: &PluginContext) -> Result<PluginResponse, PluginError> {
        let url = settings::get_string(&ctx.settings, "url")
            .ok_or_else(|| PluginError::Settings("missing field: url".into()))?;
        let timeout = Duration::from_secs(settings::fetch_timeout_secs(&ctx.settings));

        let payload: Value = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| PluginError::Http(e.to_string()))?
            .json()
            .await
            .map_err(|e| PluginError::Http(format!("invalid JSON payload: {e}")))?;

        let mut data = Map::new();
        data.insert(
            "title".into(),
            Value::String(
                settings::get_string_or(&ctx.settings, "title", &ctx.instance.name).to_string(),
            ),
        );
        data.insert("payload".into(), payload);

        let template = settings::get_string(&ctx.settings, "template")
            .map(str::to_string)
            .or_else(|| self.definition.template.map(str::to_string))
            .unwrap_or_default();

        Ok(PluginResponse::Data {
            data,
            template,
            refresh_rate: settings::get_int_or(&ctx.settings, "refresh_rate", 0).max(0) as u32,
        })
    }
}
