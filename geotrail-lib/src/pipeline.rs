use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use slog::{debug, info, warn, Logger};

use crate::{
    catalog::MediaCatalog,
    config::PipelineConfig,
    indexer::MediaIndexer,
    location_log::{LocationLogReader, LogSource, LogSourceRef},
    progress::{CancellationToken, Cancelled, Progress, ProgressCallback},
    timeline::{TimeRange, Timeline},
};

/// Parameters of one timeline load. Two requests are duplicates when equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct LoadRequest {
    /// Epoch milliseconds, inclusive.
    pub start_time: i64,
    /// Epoch milliseconds, inclusive.
    pub end_time: i64,
    #[serde(skip)]
    pub log_source: LogSourceRef,
    /// Empty selects every folder.
    pub selected_folders: BTreeSet<String>,
}

impl LoadRequest {
    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.start_time, self.end_time)
    }
}

/// Runs the three phases of a load back to back on the calling thread.
pub struct Pipeline<'a> {
    log_source: &'a dyn LogSource,
    catalog: &'a dyn MediaCatalog,
    config: &'a PipelineConfig,
    logger: &'a Logger,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        log_source: &'a dyn LogSource,
        catalog: &'a dyn MediaCatalog,
        config: &'a PipelineConfig,
        logger: &'a Logger,
    ) -> Self {
        Self {
            log_source,
            catalog,
            config,
            logger,
        }
    }

    pub fn run(
        &self,
        request: &LoadRequest,
        cancel: &CancellationToken,
        on_progress: &ProgressCallback<'_>,
    ) -> Result<Timeline, Cancelled> {
        let progress = Progress::new(on_progress);
        let range = request.range();
        cancel.check()?;

        let stream = match self.log_source.open(&request.log_source) {
            Ok(stream) => stream,
            Err(e) => {
                warn!(self.logger, "failed to open location history"; "error" => e.to_string());
                None
            }
        };
        let mut samples = BTreeMap::new();
        LocationLogReader::new(
            range,
            self.config.accuracy_threshold,
            self.config.progress_interval,
            self.logger,
        )
        .read(stream, &progress, cancel, |sample| {
            samples.insert(sample.timestamp_ms, sample);
        })?;
        cancel.check()?;

        let media = MediaIndexer::new(self.catalog, self.config.max_media_items, self.logger)
            .index(range, &request.selected_folders, &progress, cancel)?;
        cancel.check()?;

        debug!(self.logger, "merging timeline";
            "samples" => samples.len(),
            "media" => media.len(),
        );
        let timeline = Timeline::merge(samples, media, &progress);
        info!(self.logger, "timeline ready";
            "samples" => timeline.samples.len(),
            "media" => timeline.media_items.len(),
            "interpolated" => timeline.interpolated_count(),
        );
        Ok(timeline)
    }
}
