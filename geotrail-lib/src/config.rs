use serde::Deserialize;

/// Tunables for a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Location records with a larger accuracy radius are discarded.
    pub accuracy_threshold: i64,
    /// Upper bound on media items across geotagged and untagged items.
    pub max_media_items: usize,
    /// Number of location records between progress updates and cancellation checks.
    pub progress_interval: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            accuracy_threshold: 100,
            max_media_items: 1000,
            progress_interval: 1000,
        }
    }
}
