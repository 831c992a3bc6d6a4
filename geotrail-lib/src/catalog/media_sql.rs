use const_format::formatcp;
use rusqlite::{named_params, params_from_iter, Connection, Error, Row, ToSql};

use super::{
    converters::{MediaKindSql, PathBufSql},
    MediaFilter,
};

const COLUMNS: &str = "id, folder, date_taken, date_added, filepath, kind";
const KINDS: &str = formatcp!("('{}', '{}')", MediaKindSql::IMAGE, MediaKindSql::VIDEO);

/// Low level type for interacting with media rows
#[derive(Debug)]
pub(crate) struct MediaSql {
    pub id: Option<i64>,
    pub folder: Option<String>,
    pub date_taken: Option<String>,
    /// Seconds since the epoch.
    pub date_added: Option<i64>,
    pub filepath: PathBufSql,
    pub kind: MediaKindSql,
}

impl MediaSql {
    pub fn create_table(conn: &Connection) -> Result<(), Error> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS media (
                    id INTEGER PRIMARY KEY,
                    folder TEXT,
                    date_taken TEXT,
                    date_added INTEGER,
                    filepath TEXT NOT NULL UNIQUE,
                    kind TEXT NOT NULL
                );
            CREATE INDEX IF NOT EXISTS media_date_added ON media (date_added);",
        )
    }

    /// Insert the row, or refresh the existing row for the same file. Returns the row id.
    pub fn upsert(&self, conn: &Connection) -> Result<i64, Error> {
        let mut stmt = conn.prepare_cached(formatcp!(
            "INSERT INTO media ({COLUMNS}) \
            VALUES (:id, :folder, :date_taken, :date_added, :filepath, :kind) \
            ON CONFLICT (filepath) DO UPDATE SET \
                folder = excluded.folder, \
                date_taken = excluded.date_taken, \
                date_added = excluded.date_added, \
                kind = excluded.kind \
            RETURNING id"
        ))?;
        stmt.query_row(
            named_params! {
                ":id": self.id,
                ":folder": self.folder,
                ":date_taken": self.date_taken,
                ":date_added": self.date_added,
                ":filepath": self.filepath,
                ":kind": self.kind,
            },
            |row| row.get(0),
        )
    }

    /// Rows matching `filter`, most recently added first.
    pub fn search(conn: &Connection, filter: &MediaFilter) -> Result<Vec<MediaSql>, Error> {
        let mut sql = String::from(formatcp!(
            "SELECT {COLUMNS} FROM media \
            WHERE kind IN {KINDS} \
            AND date_added >= ? AND date_added <= ?"
        ));
        if !filter.folders.is_empty() {
            let placeholders = vec!["?"; filter.folders.len()].join(", ");
            sql.push_str(&format!(" AND folder IN ({placeholders})"));
        }
        sql.push_str(" ORDER BY date_added DESC, id DESC");

        let mut statement = conn.prepare(&sql)?;
        let params = filter.to_params();
        let rows = statement
            .query_map(params_from_iter(params.iter()), |row| MediaSql::try_from(row))?
            .collect();
        rows
    }

    pub fn folders(conn: &Connection) -> Result<Vec<String>, Error> {
        let mut statement = conn.prepare(formatcp!(
            "SELECT DISTINCT folder FROM media \
            WHERE folder IS NOT NULL AND kind IN {KINDS} \
            ORDER BY folder"
        ))?;
        let rows = statement.query_map([], |row| row.get(0))?.collect();
        rows
    }
}

impl MediaFilter {
    /// Positional params in the order [`MediaSql::search`] binds them.
    ///
    /// The catalog stores the add date in seconds, so the millisecond range is
    /// floored onto whole seconds.
    fn to_params(&self) -> Vec<Box<dyn ToSql>> {
        let mut result: Vec<Box<dyn ToSql>> = vec![
            Box::new(self.range.start_ms.div_euclid(1000)),
            Box::new(self.range.end_ms.div_euclid(1000)),
        ];
        for folder in &self.folders {
            result.push(Box::new(folder.clone()));
        }
        result
    }
}

impl TryFrom<&Row<'_>> for MediaSql {
    type Error = Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.get(0)?,
            folder: row.get(1)?,
            date_taken: row.get(2)?,
            date_added: row.get(3)?,
            filepath: row.get(4)?,
            kind: row.get(5)?,
        })
    }
}
