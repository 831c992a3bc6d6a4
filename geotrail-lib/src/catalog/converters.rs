//! Wrapper types for converting from higher level types to sql data types

use derive_more::{From, Into};
use std::{ffi::OsStr, path::PathBuf};

use rusqlite::{
    types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef},
    Error, ToSql,
};

use crate::timeline::MediaKind;

#[derive(Debug, Clone, Copy, From, Into)]
pub(crate) struct MediaKindSql(pub MediaKind);

impl MediaKindSql {
    pub const IMAGE: &'static str = "image";
    pub const VIDEO: &'static str = "video";
}

impl ToSql for MediaKindSql {
    fn to_sql(&self) -> Result<ToSqlOutput<'_>, Error> {
        Ok(match self.0 {
            MediaKind::Image => Self::IMAGE,
            MediaKind::Video => Self::VIDEO,
        }
        .into())
    }
}

impl FromSql for MediaKindSql {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            Self::IMAGE => Ok(MediaKindSql(MediaKind::Image)),
            Self::VIDEO => Ok(MediaKindSql(MediaKind::Video)),
            other => Err(FromSqlError::Other(
                format!("unknown media kind '{other}'").into(),
            )),
        }
    }
}

#[derive(Debug, Clone, From, Into)]
pub(crate) struct PathBufSql(pub PathBuf);

impl ToSql for PathBufSql {
    fn to_sql(&self) -> Result<ToSqlOutput<'_>, Error> {
        let v: &OsStr = self.0.as_ref();
        <&str>::try_from(v)
            .map(|v| v.into())
            .map_err(|e| Error::ToSqlConversionFailure(e.into()))
    }
}

impl FromSql for PathBufSql {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(PathBufSql(PathBuf::from(value.as_str()?)))
    }
}
