pub mod artifact;
pub mod device;
pub mod firmware;
pub mod job;
pub mod playlist;
pub mod plugin;

pub use artifact::{ArtifactKey, RenderedArtifact};
pub use device::{ApiKey, Device, DeviceId, DeviceModel};
pub use firmware::{DownloadStatus, FirmwareVersion, Version};
pub use job::{JobStatus, RenderJob, PRIORITY_IMMEDIATE, PRIORITY_NORMAL};
pub use playlist::{Playlist, PlaylistItem, ScheduleEntry};
pub use plugin::{PluginDefinition, PluginInstance, PluginKind};
