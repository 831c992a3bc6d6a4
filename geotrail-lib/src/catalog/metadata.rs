use std::{fs::File, io::BufReader, path::Path};

use chrono::NaiveDate;
use exif::{Exif, In, Tag, Value};

use crate::geo::LatLng;

/// Read EXIF from a media file. `Ok(None)` when the file carries no EXIF block.
pub(crate) fn read(path: &Path) -> Result<Option<Exif>, super::Error> {
    let file = File::open(path)?;
    let mut bufreader = BufReader::new(&file);
    match exif::Reader::new().read_from_container(&mut bufreader) {
        Ok(exif) => Ok(Some(exif)),
        Err(exif::Error::NotFound(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn geotag(exif: &Exif) -> Option<LatLng> {
    let lat = coordinate(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, b'S')?;
    let lng = coordinate(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, b'W')?;
    let position = LatLng::new(lat, lng);
    position.is_valid().then_some(position)
}

/// Degrees from a degrees/minutes/seconds rational triple, negated when the
/// reference tag names the southern or western hemisphere.
fn coordinate(exif: &Exif, value_tag: Tag, ref_tag: Tag, negative_ref: u8) -> Option<f64> {
    let field = exif.get_field(value_tag, In::PRIMARY)?;
    let Value::Rational(parts) = &field.value else {
        return None;
    };
    if parts.is_empty() || parts.iter().any(|r| r.denom == 0) {
        return None;
    }
    let degrees: f64 = parts
        .iter()
        .zip([1.0, 60.0, 3600.0])
        .map(|(r, scale)| r.to_f64() / scale)
        .sum();

    let negative = match exif.get_field(ref_tag, In::PRIMARY).map(|f| &f.value) {
        Some(Value::Ascii(values)) => values
            .first()
            .and_then(|v| v.first())
            .is_some_and(|c| c.eq_ignore_ascii_case(&negative_ref)),
        _ => false,
    };
    Some(if negative { -degrees } else { degrees })
}

/// `DateTimeOriginal` in epoch milliseconds. EXIF carries no zone, so the
/// wall clock time is taken as UTC.
pub(crate) fn date_taken_ms(exif: &Exif) -> Option<i64> {
    let field = exif.get_field(Tag::DateTimeOriginal, In::PRIMARY)?;
    let Value::Ascii(values) = &field.value else {
        return None;
    };
    let t = exif::DateTime::from_ascii(values.first()?).ok()?;
    let naive = NaiveDate::from_ymd_opt(t.year.into(), t.month.into(), t.day.into())?
        .and_hms_opt(t.hour.into(), t.minute.into(), t.second.into())?;
    Some(naive.and_utc().timestamp_millis())
}
