//! In-memory stand-ins for the pipeline's data sources.

use std::{
    collections::HashMap,
    io,
    sync::{Condvar, Mutex},
};

use crate::{
    catalog::{CatalogRecord, Error, MediaCatalog, MediaFilter},
    geo::LatLng,
    location_log::{LogSource, LogSourceRef, LogStream},
};

/// Blocks callers of [`Gate::pass`] until the gate is opened.
#[derive(Default)]
pub struct Gate {
    state: Mutex<GateState>,
    changed: Condvar,
}

#[derive(Default)]
struct GateState {
    open: bool,
    waiting: usize,
}

impl Gate {
    pub fn pass(&self) {
        let mut state = self.state.lock().unwrap();
        state.waiting += 1;
        self.changed.notify_all();
        while !state.open {
            state = self.changed.wait(state).unwrap();
        }
    }

    /// Wait until `count` callers have reached the gate.
    pub fn wait_for(&self, count: usize) {
        let mut state = self.state.lock().unwrap();
        while state.waiting < count {
            state = self.changed.wait(state).unwrap();
        }
    }

    pub fn open(&self) {
        self.state.lock().unwrap().open = true;
        self.changed.notify_all();
    }
}

#[derive(Default)]
pub struct FakeCatalog {
    records: Vec<CatalogRecord>,
    geotags: HashMap<i64, LatLng>,
    broken: Vec<i64>,
    failing: bool,
    gate: Option<std::sync::Arc<Gate>>,
    lookups: Mutex<Vec<i64>>,
    last_filter: Mutex<Option<MediaFilter>>,
}

impl FakeCatalog {
    pub fn new(records: Vec<CatalogRecord>) -> Self {
        Self {
            records,
            ..Default::default()
        }
    }

    pub fn with_geotag(mut self, id: i64, position: LatLng) -> Self {
        self.geotags.insert(id, position);
        self
    }

    pub fn with_broken_file(mut self, id: i64) -> Self {
        self.broken.push(id);
        self
    }

    pub fn with_gate(mut self, gate: std::sync::Arc<Gate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn geotag_lookups(&self) -> Vec<i64> {
        self.lookups.lock().unwrap().clone()
    }

    pub fn last_filter(&self) -> Option<MediaFilter> {
        self.last_filter.lock().unwrap().clone()
    }
}

impl MediaCatalog for FakeCatalog {
    fn query(&self, filter: &MediaFilter) -> Result<Vec<CatalogRecord>, Error> {
        *self.last_filter.lock().unwrap() = Some(filter.clone());
        if let Some(gate) = &self.gate {
            gate.pass();
        }
        if self.failing {
            return Err(io::Error::other("catalog unavailable").into());
        }
        Ok(self
            .records
            .iter()
            .filter(|r| {
                filter.folders.is_empty()
                    || r.folder.as_ref().is_some_and(|f| filter.folders.contains(f))
            })
            .cloned()
            .collect())
    }

    fn geotag(&self, record: &CatalogRecord) -> Result<Option<LatLng>, Error> {
        self.lookups.lock().unwrap().push(record.id);
        if self.broken.contains(&record.id) {
            return Err(io::Error::other("unreadable file").into());
        }
        Ok(self.geotags.get(&record.id).copied())
    }
}

/// Serves a fixed JSON document for every non-empty handle.
pub struct FakeLogSource(pub String);

impl LogSource for FakeLogSource {
    fn open(&self, source: &LogSourceRef) -> io::Result<Option<LogStream>> {
        if source.path().is_none() {
            return Ok(None);
        }
        let bytes = self.0.clone().into_bytes();
        let size = bytes.len() as u64;
        Ok(Some(LogStream::new(io::Cursor::new(bytes), size)))
    }
}

/// A location history export with one record per `(timestamp_ms, lat, lng)`.
pub fn log_json(records: &[(i64, f64, f64)]) -> String {
    let records: Vec<String> = records
        .iter()
        .map(|(t, lat, lng)| {
            format!(
                r#"{{"timestampMs": "{t}", "latitudeE7": {}, "longitudeE7": {}, "accuracy": 10}}"#,
                (lat * 1e7).round() as i64,
                (lng * 1e7).round() as i64,
            )
        })
        .collect();
    format!(r#"{{"locations": [{}]}}"#, records.join(","))
}
