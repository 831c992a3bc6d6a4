use std::{
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
    time::UNIX_EPOCH,
};

use displaydoc::Display;
use file_format::{FileFormat, Kind};
use rusqlite::Connection;
use slog::{debug, o, warn, Logger};
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

use crate::{
    geo::LatLng,
    timeline::{MediaKind, TimeRange},
};

use self::media_sql::MediaSql;

mod converters;
mod media_sql;
mod metadata;

/// Folder names with this prefix are not offered by [`SqliteCatalog::folders`].
const HIDDEN_FOLDER_PREFIX: &str = "IMG_";

#[derive(Debug, Error, Display)]
pub enum Error {
    /// rusqlite: {0}
    Rusqlite(#[from] rusqlite::Error),
    /// walkdir: {0}
    Walkdir(#[from] walkdir::Error),
    /// io: {0}
    Io(#[from] std::io::Error),
    /// exif: {0}
    Exif(#[from] exif::Error),
}

/// One entry of a media catalog as the catalog stores it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRecord {
    pub id: i64,
    pub folder: Option<String>,
    /// Capture time as recorded by the catalog; not necessarily parseable.
    pub date_taken: Option<String>,
    /// Seconds since the epoch.
    pub date_added: Option<i64>,
    pub path: PathBuf,
    pub kind: MediaKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFilter {
    pub range: TimeRange,
    /// Matches any of these folders; empty matches every folder.
    pub folders: Vec<String>,
}

/// Queryable index of media files.
pub trait MediaCatalog: Send + Sync {
    /// Image and video records added within the filter's range, most recently
    /// added first.
    fn query(&self, filter: &MediaFilter) -> Result<Vec<CatalogRecord>, Error>;

    /// Position embedded in the record's file, if any.
    fn geotag(&self, record: &CatalogRecord) -> Result<Option<LatLng>, Error>;
}

/// Media catalog kept in a SQLite database.
pub struct SqliteCatalog {
    connection: Mutex<Connection>,
    logger: Logger,
}

impl SqliteCatalog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let connection = Connection::open(path)?;
        Self::new_impl(connection)
    }

    pub fn open_in_memory() -> Result<Self, Error> {
        let connection = Connection::open_in_memory()?;
        Self::new_impl(connection)
    }

    fn new_impl(connection: Connection) -> Result<Self, Error> {
        MediaSql::create_table(&connection)?;
        Ok(Self {
            connection: Mutex::new(connection),
            logger: Logger::root(slog::Discard, o!()),
        })
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    fn connection(&self) -> MutexGuard<'_, Connection> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a record, or refresh the stored record with the same path.
    ///
    /// The record's id is kept for new paths. An id already held by another
    /// path is a primary key conflict and fails with [`Error::Rusqlite`].
    pub fn insert(&self, record: &CatalogRecord) -> Result<i64, Error> {
        let row = MediaSql {
            id: Some(record.id),
            folder: record.folder.clone(),
            date_taken: record.date_taken.clone(),
            date_added: record.date_added,
            filepath: record.path.clone().into(),
            kind: record.kind.into(),
        };
        Ok(row.upsert(&self.connection())?)
    }

    /// Index every image and video below `root`. Returns the number of files indexed.
    pub fn add_directory(&self, root: impl AsRef<Path>) -> Result<usize, Error> {
        let mut connection = self.connection();
        let transaction = connection.transaction()?;
        let mut added = 0;
        for entry in WalkDir::new(root) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            match file_to_media_row(&entry) {
                Ok(Some(row)) => {
                    row.upsert(&transaction)?;
                    added += 1;
                }
                Ok(None) => (),
                Err(e) => {
                    warn!(self.logger, "failed to process file";
                        "path" => entry.path().display().to_string(),
                        "error" => e.to_string(),
                    );
                }
            }
        }
        transaction.commit()?;
        debug!(self.logger, "indexed directory"; "files" => added);
        Ok(added)
    }

    /// Folder names that hold media, sorted by name.
    pub fn folders(&self) -> Result<Vec<String>, Error> {
        let folders = MediaSql::folders(&self.connection())?;
        Ok(folders
            .into_iter()
            .filter(|folder| {
                let hidden = folder.starts_with(HIDDEN_FOLDER_PREFIX);
                if hidden {
                    debug!(self.logger, "ignoring folder"; "folder" => folder);
                }
                !hidden
            })
            .collect())
    }
}

impl MediaCatalog for SqliteCatalog {
    fn query(&self, filter: &MediaFilter) -> Result<Vec<CatalogRecord>, Error> {
        Ok(MediaSql::search(&self.connection(), filter)?
            .into_iter()
            .map(|row| row.into())
            .collect())
    }

    fn geotag(&self, record: &CatalogRecord) -> Result<Option<LatLng>, Error> {
        Ok(metadata::read(&record.path)?.and_then(|exif| metadata::geotag(&exif)))
    }
}

impl From<MediaSql> for CatalogRecord {
    fn from(value: MediaSql) -> Self {
        Self {
            id: value.id.unwrap_or_default(),
            folder: value.folder,
            date_taken: value.date_taken,
            date_added: value.date_added,
            path: value.filepath.into(),
            kind: value.kind.into(),
        }
    }
}

fn file_to_media_row(entry: &DirEntry) -> Result<Option<MediaSql>, Error> {
    let path = entry.path().to_path_buf();
    let format = FileFormat::from_file(&path)?;
    let kind = match format.kind() {
        Kind::Image => MediaKind::Image,
        Kind::Video => MediaKind::Video,
        _ => return Ok(None),
    };

    let modified = entry.metadata()?.modified()?;
    let date_added = modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .ok();

    let date_taken = match kind {
        MediaKind::Image => metadata::read(&path)
            .ok()
            .flatten()
            .and_then(|exif| metadata::date_taken_ms(&exif))
            .map(|ms| ms.to_string()),
        _ => None,
    };

    let folder = path
        .parent()
        .and_then(|p| p.file_name())
        .map(|name| name.to_string_lossy().into_owned());

    Ok(Some(MediaSql {
        id: None,
        folder,
        date_taken,
        date_added,
        filepath: path.into(),
        kind: kind.into(),
    }))
}
