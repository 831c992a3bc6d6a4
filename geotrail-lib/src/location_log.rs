//! Streaming reader for location history exports.
//!
//! The export is a single JSON object whose `locations` array can run to
//! millions of entries. Records are decoded one at a time straight off the byte
//! stream and handed to the caller, so memory use is bounded by one record.

use std::{
    cell::Cell,
    fmt,
    fs::File,
    io::{self, BufRead, BufReader, Read},
    path::{Path, PathBuf},
    rc::Rc,
};

use derive_more::From;
use serde::{
    de::{self, DeserializeSeed, IgnoredAny, MapAccess, SeqAccess, Visitor},
    Deserialize, Deserializer,
};
use serde_with::{serde_as, DisplayFromStr, PickFirst};
use slog::{debug, info, warn, Logger};

use crate::{
    geo::LatLng,
    progress::{scale, CancellationToken, Cancelled, Progress},
    timeline::{LocationSample, TimeRange},
};

pub const PROGRESS_START: u8 = 2;
pub const PROGRESS_END: u8 = 70;

/// Opaque handle to a location log. The empty handle means no log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, From)]
pub struct LogSourceRef(Option<PathBuf>);

impl LogSourceRef {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn path(&self) -> Option<&Path> {
        self.0.as_deref().filter(|p| !p.as_os_str().is_empty())
    }
}

impl From<PathBuf> for LogSourceRef {
    fn from(value: PathBuf) -> Self {
        Self(Some(value))
    }
}

/// An opened log with an estimate of its total length in bytes.
pub struct LogStream {
    pub reader: Box<dyn Read + Send>,
    pub size_hint: u64,
}

impl LogStream {
    pub fn new(reader: impl Read + Send + 'static, size_hint: u64) -> Self {
        Self {
            reader: Box::new(reader),
            size_hint,
        }
    }
}

/// Resolves [`LogSourceRef`] handles to byte streams.
pub trait LogSource: Send + Sync {
    /// `Ok(None)` when the handle refers to no log at all.
    fn open(&self, source: &LogSourceRef) -> io::Result<Option<LogStream>>;
}

/// Treats handles as filesystem paths.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileLogSource;

impl LogSource for FileLogSource {
    fn open(&self, source: &LogSourceRef) -> io::Result<Option<LogStream>> {
        let Some(path) = source.path() else {
            return Ok(None);
        };
        let file = File::open(path)?;
        let size_hint = file.metadata()?.len();
        Ok(Some(LogStream::new(file, size_hint)))
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReadStats {
    /// Entries seen in the `locations` array.
    pub records: u64,
    pub retained: u64,
    pub malformed: u64,
    /// Set when the stream could not be read to the end.
    pub failure: Option<String>,
}

pub struct LocationLogReader<'a> {
    range: TimeRange,
    accuracy_threshold: i64,
    progress_interval: usize,
    logger: &'a Logger,
}

impl<'a> LocationLogReader<'a> {
    pub fn new(
        range: TimeRange,
        accuracy_threshold: i64,
        progress_interval: usize,
        logger: &'a Logger,
    ) -> Self {
        Self {
            range,
            accuracy_threshold,
            progress_interval: progress_interval.max(1),
            logger,
        }
    }

    /// Stream every retained sample into `on_sample`.
    ///
    /// Read failures are soft: whatever was decoded before the failure has
    /// already been delivered, and the failure is recorded in the stats. Only
    /// cancellation is returned as an error.
    pub fn read(
        &self,
        stream: Option<LogStream>,
        progress: &Progress,
        cancel: &CancellationToken,
        mut on_sample: impl FnMut(LocationSample),
    ) -> Result<ReadStats, Cancelled> {
        progress.report(PROGRESS_START);
        let mut stats = ReadStats::default();

        let Some(stream) = stream else {
            debug!(self.logger, "no location history provided");
            progress.report(PROGRESS_END);
            return Ok(stats);
        };

        let size_hint = stream.size_hint;
        let mut buffered = BufReader::new(stream.reader);
        match buffered.fill_buf() {
            Ok([]) => {
                debug!(self.logger, "location history is empty");
                progress.report(PROGRESS_END);
                return Ok(stats);
            }
            Ok(_) => (),
            Err(e) => {
                warn!(self.logger, "failed to read location history";
                    "error" => e.to_string(),
                );
                stats.failure = Some(e.to_string());
                progress.report(PROGRESS_END);
                return Ok(stats);
            }
        }

        let consumed = Rc::new(Cell::new(0));
        let mut deserializer = serde_json::Deserializer::from_reader(CountingReader {
            inner: buffered,
            consumed: Rc::clone(&consumed),
        });
        let mut state = ReadState {
            reader: self,
            progress,
            cancel,
            on_sample: &mut on_sample,
            stats: &mut stats,
            consumed,
            size_hint,
            since_update: 0,
            cancelled: false,
        };
        let result = LogFile(&mut state)
            .deserialize(&mut deserializer)
            .and_then(|()| deserializer.end());
        if state.cancelled {
            return Err(Cancelled);
        }

        if let Err(e) = result {
            warn!(self.logger, "failed to read location history";
                "error" => e.to_string(),
                "records" => stats.records,
            );
            stats.failure = Some(e.to_string());
        }
        info!(self.logger, "read location history";
            "records" => stats.records,
            "retained" => stats.retained,
            "malformed" => stats.malformed,
        );
        progress.report(PROGRESS_END);
        Ok(stats)
    }
}

#[serde_as]
#[derive(Deserialize)]
struct RawLocation {
    #[serde(rename = "timestampMs")]
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    timestamp_ms: i64,
    #[serde(rename = "latitudeE7")]
    latitude_e7: i64,
    #[serde(rename = "longitudeE7")]
    longitude_e7: i64,
    accuracy: i64,
}

struct CountingReader<R> {
    inner: R,
    consumed: Rc<Cell<u64>>,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.consumed.set(self.consumed.get() + n as u64);
        Ok(n)
    }
}

struct ReadState<'r> {
    reader: &'r LocationLogReader<'r>,
    progress: &'r Progress<'r>,
    cancel: &'r CancellationToken,
    on_sample: &'r mut dyn FnMut(LocationSample),
    stats: &'r mut ReadStats,
    consumed: Rc<Cell<u64>>,
    size_hint: u64,
    since_update: usize,
    cancelled: bool,
}

impl ReadState<'_> {
    fn record(&mut self, value: serde_json::Value) {
        self.stats.records += 1;
        let raw = match serde_json::from_value::<RawLocation>(value) {
            Ok(raw) => raw,
            Err(e) => {
                self.skip_malformed(e.to_string());
                return;
            }
        };
        let position = LatLng::from_e7(raw.latitude_e7, raw.longitude_e7);
        if !position.is_valid() {
            self.skip_malformed(format!("coordinates out of range: {position:?}"));
            return;
        }
        if self.reader.range.contains(raw.timestamp_ms)
            && raw.accuracy <= self.reader.accuracy_threshold
        {
            self.stats.retained += 1;
            (self.on_sample)(LocationSample::new(raw.timestamp_ms, position));
        }
    }

    fn skip_malformed(&mut self, reason: String) {
        self.stats.malformed += 1;
        debug!(self.reader.logger, "skipping malformed location record";
            "index" => self.stats.records - 1,
            "reason" => reason,
        );
    }

    /// Called after every record; returns false once the run is cancelled.
    fn checkpoint(&mut self) -> bool {
        self.since_update += 1;
        if self.since_update < self.reader.progress_interval {
            return true;
        }
        self.since_update = 0;
        if self.size_hint > 0 {
            self.progress.report(scale(
                PROGRESS_START,
                PROGRESS_END,
                self.consumed.get(),
                self.size_hint,
            ));
        }
        if self.cancel.is_cancelled() {
            self.cancelled = true;
            return false;
        }
        true
    }
}

struct LogFile<'s, 'r>(&'s mut ReadState<'r>);

impl<'de> DeserializeSeed<'de> for LogFile<'_, '_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<(), D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for LogFile<'_, '_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a location history object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<(), A::Error> {
        let state = self.0;
        while let Some(key) = map.next_key::<String>()? {
            if key == "locations" {
                map.next_value_seed(Locations(&mut *state))?;
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(())
    }
}

struct Locations<'s, 'r>(&'s mut ReadState<'r>);

impl<'de> DeserializeSeed<'de> for Locations<'_, '_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<(), D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for Locations<'_, '_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an array of location records")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<(), A::Error> {
        let state = self.0;
        while let Some(value) = seq.next_element::<serde_json::Value>()? {
            state.record(value);
            if !state.checkpoint() {
                return Err(de::Error::custom(Cancelled));
            }
        }
        Ok(())
    }
}
