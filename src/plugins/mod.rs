//! Plugin runtime.
//!
//! A plugin is a capability bundle behind [`Plugin`]: a static definition,
//! settings validation, and a `process` step producing one of two response
//! variants. Plugins whose definition says `requires_processing` may only
//! run inside render workers; the rest are cheap enough for the display hot
//! path under a per-plugin timeout.

pub mod alias;
pub mod redirect;
pub mod settings;
pub mod webhook;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::PluginError;
use crate::models::{Device, DeviceModel, PluginDefinition, PluginInstance};
use crate::store::Store;

/// Everything a plugin may look at while processing.
pub struct PluginContext {
    /// The polling device, when the execution is device-triggered. Worker
    /// executions use some device referencing the instance, or none.
    pub device: Option<Device>,
    pub instance: PluginInstance,
    /// Instance settings merged over the schema defaults.
    pub settings: Value,
    pub model: DeviceModel,
}

/// Where an image response gets its bytes from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Bytes(Vec<u8>),
    Url(String),
}

/// The two plugin response variants.
#[derive(Debug, Clone)]
pub enum PluginResponse {
    /// Needs templating + rasterization before it is displayable.
    Data {
        data: Map<String, Value>,
        template: String,
        /// 0 means no opinion; the device default applies.
        refresh_rate: u32,
    },
    /// Already terminal.
    Image {
        source: ImageSource,
        filename: String,
        refresh_rate: u32,
    },
}

impl PluginResponse {
    pub fn refresh_rate(&self) -> u32 {
        match self {
            PluginResponse::Data { refresh_rate, .. } => *refresh_rate,
            PluginResponse::Image { refresh_rate, .. } => *refresh_rate,
        }
    }
}

#[async_trait]
pub trait Plugin: Send + Sync {
    fn definition(&self) -> &PluginDefinition;

    /// Reject settings that do not fit the declared schema. The message is
    /// surfaced verbatim in 400 responses.
    fn validate(&self, settings: &Value) -> Result<(), PluginError> {
        settings::validate_settings(&self.definition().config_schema, settings)
    }

    async fn process(&self, ctx: &PluginContext) -> Result<PluginResponse, PluginError>;
}

/// Registry of plugin capability bundles, keyed by type id.
pub struct PluginRegistry {
    plugins: HashMap<&'static str, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    /// Registry with the built-in system plugins.
    pub fn with_builtins(store: Arc<Store>) -> Self {
        let mut registry = Self {
            plugins: HashMap::new(),
        };
        registry.register(Arc::new(redirect::RedirectPlugin::new()));
        registry.register(Arc::new(alias::AliasPlugin::new(store)));
        registry.register(Arc::new(webhook::WebhookPlugin::new()));
        registry
    }

    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.insert(plugin.definition().type_id, plugin);
    }

    pub fn get(&self, type_id: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.get(type_id).cloned()
    }

    pub fn type_ids(&self) -> Vec<&'static str> {
        let mut ids: Vec<_> = self.plugins.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let registry = PluginRegistry::with_builtins(store);
        assert_eq!(registry.type_ids(), vec!["alias", "redirect", "webhook"]);
    }

    #[test]
    fn processing_flags_match_plugin_nature() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let registry = PluginRegistry::with_builtins(store);
        // redirect and alias are hot-path safe; webhook must go through
        // the worker pipeline.
        assert!(!registry.get("redirect").unwrap().definition().requires_processing);
        assert!(!registry.get("alias").unwrap().definition().requires_processing);
        assert!(registry.get("webhook").unwrap().definition().requires_processing);
    }
}
