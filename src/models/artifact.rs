use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cache key for a rendered artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub plugin_instance_id: i64,
    pub width: u32,
    pub height: u32,
    pub bit_depth: u32,
}

/// A finished image for one plugin instance at one display geometry.
///
/// `path` is either a filesystem path under the static dir (rendered by a
/// worker) or an absolute URL (image-url plugin responses). Replaced
/// in-place on re-render.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedArtifact {
    pub id: i64,
    pub plugin_instance_id: i64,
    pub width: u32,
    pub height: u32,
    pub bit_depth: u32,
    pub path: String,
    pub rendered_at: DateTime<Utc>,
    pub content_hash: String,
}

impl RenderedArtifact {
    pub fn key(&self) -> ArtifactKey {
        ArtifactKey {
            plugin_instance_id: self.plugin_instance_id,
            width: self.width,
            height: self.height,
            bit_depth: self.bit_depth,
        }
    }

    /// True when `path` points at a local file rather than a remote URL.
    pub fn is_local(&self) -> bool {
        !(self.path.starts_with("http://") || self.path.starts_with("https://"))
    }
}
