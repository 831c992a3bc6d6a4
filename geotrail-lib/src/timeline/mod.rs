use std::{collections::BTreeMap, path::PathBuf};

use derive_more::Display;
use serde::Serialize;

use crate::{
    geo::{self, LatLng},
    indexer::IndexedMedia,
    progress::Progress,
};


pub const PROGRESS_END: u8 = 100;

/// Inclusive range of epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TimeRange {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl TimeRange {
    pub fn new(start_ms: i64, end_ms: i64) -> Self {
        Self { start_ms, end_ms }
    }

    pub fn contains(&self, timestamp_ms: i64) -> bool {
        self.start_ms <= timestamp_ms && timestamp_ms <= self.end_ms
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LocationSample {
    pub timestamp_ms: i64,
    pub position: LatLng,
}

impl LocationSample {
    pub fn new(timestamp_ms: i64, position: LatLng) -> Self {
        Self {
            timestamp_ms,
            position,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
pub enum MediaKind {
    #[display("image")]
    Image,
    #[display("video")]
    Video,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaItem {
    pub path: PathBuf,
    pub id: i64,
    pub timestamp_ms: i64,
    pub kind: MediaKind,
    pub position: LatLng,
    pub has_direct_geotag: bool,
}

/// Media that still needs a position, in catalog order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UntaggedMedia {
    pub path: PathBuf,
    pub id: i64,
    pub timestamp_ms: i64,
    pub kind: MediaKind,
}

impl UntaggedMedia {
    pub fn placed_at(&self, position: LatLng) -> MediaItem {
        MediaItem {
            path: self.path.clone(),
            id: self.id,
            timestamp_ms: self.timestamp_ms,
            kind: self.kind,
            position,
            has_direct_geotag: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Timeline {
    pub samples: BTreeMap<i64, LocationSample>,
    pub media_items: Vec<MediaItem>,
}

impl Timeline {
    /// Combine logged samples with indexed media.
    ///
    /// Every untagged item is placed between the nearest known positions around
    /// it, drawn from the logged samples and from geotagged media; items with
    /// nothing on either side are dropped. The published sample map holds the
    /// logged samples only, geotagged media carry their own position. This
    /// differs from publishing media positions into the sample map, so an
    /// empty log with one geotagged image yields no samples.
    pub fn merge(
        samples: BTreeMap<i64, LocationSample>,
        media: IndexedMedia,
        progress: &Progress,
    ) -> Self {
        // media positions win over logged positions at the same instant; among
        // media sharing an instant the later catalog entry wins
        let tagged: BTreeMap<i64, (i64, LocationSample)> = media
            .geotagged
            .iter()
            .map(|m| {
                let sample = LocationSample::new(m.timestamp_ms, m.position);
                (m.timestamp_ms, (m.id, sample))
            })
            .collect();

        let mut media_items = media.geotagged;
        for item in &media.untagged {
            let t = item.timestamp_ms;
            let not_self = |(_, (id, _)): &(&i64, &(i64, LocationSample))| *id != item.id;
            let floor = latest(
                samples.range(..=t).next_back().map(|(_, s)| *s),
                tagged.range(..=t).rev().find(not_self).map(|(_, (_, s))| *s),
            );
            let ceiling = earliest(
                samples.range(t..).next().map(|(_, s)| *s),
                tagged.range(t..).find(not_self).map(|(_, (_, s))| *s),
            );
            if let Some(position) = place(t, floor, ceiling) {
                media_items.push(item.placed_at(position));
            }
        }

        progress.report(PROGRESS_END);
        Self {
            samples,
            media_items,
        }
    }

    pub fn interpolated_count(&self) -> usize {
        self.media_items
            .iter()
            .filter(|m| !m.has_direct_geotag)
            .count()
    }
}

fn latest(
    logged: Option<LocationSample>,
    tagged: Option<LocationSample>,
) -> Option<LocationSample> {
    match (logged, tagged) {
        (Some(l), Some(t)) if l.timestamp_ms > t.timestamp_ms => Some(l),
        (l, None) => l,
        (_, t) => t,
    }
}

fn earliest(
    logged: Option<LocationSample>,
    tagged: Option<LocationSample>,
) -> Option<LocationSample> {
    match (logged, tagged) {
        (Some(l), Some(t)) if l.timestamp_ms < t.timestamp_ms => Some(l),
        (l, None) => l,
        (_, t) => t,
    }
}

/// Position for `timestamp_ms` given the samples bracketing it.
pub fn place(
    timestamp_ms: i64,
    floor: Option<LocationSample>,
    ceiling: Option<LocationSample>,
) -> Option<LatLng> {
    let (floor, ceiling) = match (floor, ceiling) {
        (None, None) => return None,
        (Some(only), None) | (None, Some(only)) => (only, only),
        (Some(floor), Some(ceiling)) => (floor, ceiling),
    };
    let fraction = if floor.timestamp_ms == ceiling.timestamp_ms {
        0.5
    } else {
        (timestamp_ms - floor.timestamp_ms) as f64
            / (ceiling.timestamp_ms - floor.timestamp_ms) as f64
    };
    Some(geo::interpolate(
        floor.position,
        ceiling.position,
        fraction.clamp(0.0, 1.0),
    ))
}
