use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Where a plugin came from and who may see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    System,
    Private,
    Mashup,
    Public,
}

impl PluginKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginKind::System => "system",
            PluginKind::Private => "private",
            PluginKind::Mashup => "mashup",
            PluginKind::Public => "public",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "private" => PluginKind::Private,
            "mashup" => PluginKind::Mashup,
            "public" => PluginKind::Public,
            _ => PluginKind::System,
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of a plugin type. Lives in the in-process registry,
/// one per `type_id`.
#[derive(Debug, Clone)]
pub struct PluginDefinition {
    pub type_id: &'static str,
    pub kind: PluginKind,
    /// True when the output must go through templating + rasterization and
    /// therefore may only run inside render workers.
    pub requires_processing: bool,
    /// Declared settings schema; see `plugins::settings::validate_settings`.
    pub config_schema: Value,
    /// Template markup for data plugins.
    pub template: Option<&'static str>,
    /// Layout for mashups.
    pub layout: Option<&'static str>,
}

/// A configured, user-owned invocation of a plugin definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInstance {
    pub id: i64,
    pub user_id: i64,
    /// Registry key of the plugin definition.
    pub plugin_type: String,
    pub name: String,
    pub settings: Value,
    /// Background re-render cadence in seconds.
    pub refresh_interval: u32,
}
