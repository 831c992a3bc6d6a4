use std::collections::{BTreeSet, HashSet};

use chrono::{NaiveDateTime, Utc};
use serde::Serialize;
use slog::{debug, info, warn, Logger};

use crate::{
    catalog::{CatalogRecord, MediaCatalog, MediaFilter},
    geo::LatLng,
    progress::{scale, CancellationToken, Cancelled, Progress},
    timeline::{MediaItem, MediaKind, TimeRange, UntaggedMedia},
};

pub const PROGRESS_START: u8 = 70;
pub const PROGRESS_END: u8 = 98;

const EXIF_DATE_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// Media selected for a run, split by whether the file carries its own position.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexedMedia {
    pub geotagged: Vec<MediaItem>,
    pub untagged: Vec<UntaggedMedia>,
}

impl IndexedMedia {
    pub fn len(&self) -> usize {
        self.geotagged.len() + self.untagged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct MediaIndexer<'a> {
    catalog: &'a dyn MediaCatalog,
    max_media_items: usize,
    logger: &'a Logger,
}

impl<'a> MediaIndexer<'a> {
    pub fn new(catalog: &'a dyn MediaCatalog, max_media_items: usize, logger: &'a Logger) -> Self {
        Self {
            catalog,
            max_media_items,
            logger,
        }
    }

    /// Select the most recent media in `range` from `folders`, empty meaning all
    /// folders, and look up geotags for the images among them.
    ///
    /// A catalog that cannot be queried yields no media.
    pub fn index(
        &self,
        range: TimeRange,
        folders: &BTreeSet<String>,
        progress: &Progress,
        cancel: &CancellationToken,
    ) -> Result<IndexedMedia, Cancelled> {
        let filter = MediaFilter {
            range,
            folders: folders.iter().cloned().collect(),
        };
        let records = match self.catalog.query(&filter) {
            Ok(records) => records,
            Err(e) => {
                warn!(self.logger, "failed to query media catalog"; "error" => e.to_string());
                progress.report(PROGRESS_END);
                return Ok(IndexedMedia::default());
            }
        };

        let mut seen = HashSet::new();
        let mut selected: Vec<(i64, CatalogRecord)> = records
            .into_iter()
            .filter(|record| seen.insert(record.id))
            .filter_map(|record| {
                let Some(timestamp_ms) = media_timestamp(&record) else {
                    debug!(self.logger, "media has no usable date";
                        "path" => record.path.display().to_string(),
                    );
                    return None;
                };
                range
                    .contains(timestamp_ms)
                    .then_some((timestamp_ms, record))
            })
            .collect();
        // stable, so catalog order breaks ties
        selected.sort_by(|a, b| b.0.cmp(&a.0));
        selected.truncate(self.max_media_items);

        let total = selected.len() as u64;
        let mut indexed = IndexedMedia::default();
        for (done, (timestamp_ms, record)) in selected.into_iter().enumerate() {
            cancel.check()?;
            match self.lookup_geotag(&record) {
                Some(position) => indexed.geotagged.push(MediaItem {
                    path: record.path,
                    id: record.id,
                    timestamp_ms,
                    kind: record.kind,
                    position,
                    has_direct_geotag: true,
                }),
                None => indexed.untagged.push(UntaggedMedia {
                    path: record.path,
                    id: record.id,
                    timestamp_ms,
                    kind: record.kind,
                }),
            }
            progress.report(scale(PROGRESS_START, PROGRESS_END, done as u64 + 1, total));
        }

        info!(self.logger, "indexed media";
            "geotagged" => indexed.geotagged.len(),
            "untagged" => indexed.untagged.len(),
        );
        progress.report(PROGRESS_END);
        Ok(indexed)
    }

    fn lookup_geotag(&self, record: &CatalogRecord) -> Option<LatLng> {
        if record.kind != MediaKind::Image {
            return None;
        }
        match self.catalog.geotag(record) {
            Ok(position) => position,
            Err(e) => {
                debug!(self.logger, "failed to read geotag";
                    "path" => record.path.display().to_string(),
                    "error" => e.to_string(),
                );
                None
            }
        }
    }
}

/// Capture time of a record in epoch milliseconds.
///
/// A parseable `date_taken` wins; otherwise the add date is used.
pub fn media_timestamp(record: &CatalogRecord) -> Option<i64> {
    record
        .date_taken
        .as_deref()
        .and_then(parse_date_taken)
        .or_else(|| record.date_added.and_then(|secs| secs.checked_mul(1000)))
}

fn parse_date_taken(value: &str) -> Option<i64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(ms) = value.parse::<i64>() {
        return Some(ms);
    }
    if let Ok(date) = NaiveDateTime::parse_from_str(value, EXIF_DATE_FORMAT) {
        return Some(date.and_utc().timestamp_millis());
    }
    dateparser::parse_with_timezone(value, &Utc)
        .ok()
        .map(|date| date.timestamp_millis())
}
