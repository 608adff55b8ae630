use serde::{Deserialize, Serialize};

/// User-tunable options persisted to `settings.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Run an incremental indexing pass when the engine starts.
    pub auto_sync_on_start: bool,
    /// How far back incremental syncs reach, in days.
    pub retention_days: u32,
    /// Keep fetched bodies in the local store.
    pub cache_email_bodies: bool,
    /// Keep downloaded media/attachments on disk.
    pub cache_media: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_sync_on_start: true,
            retention_days: 30,
            cache_email_bodies: true,
            cache_media: true,
        }
    }
}
