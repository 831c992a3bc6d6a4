//! Spherical geometry on a unit sphere, positions in degrees.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Build a position from fixed point coordinates scaled by 10^7.
    pub fn from_e7(lat_e7: i64, lng_e7: i64) -> Self {
        Self::new(lat_e7 as f64 / 1e7, lng_e7 as f64 / 1e7)
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Central angle in radians between two positions (haversine).
pub fn angle_between(from: LatLng, to: LatLng) -> f64 {
    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();
    let d_lng = (from.lng - to.lng).to_radians();
    let hav = hav(lat1 - lat2) + hav(d_lng) * lat1.cos() * lat2.cos();
    2.0 * hav.clamp(0.0, 1.0).sqrt().asin()
}

fn hav(x: f64) -> f64 {
    let s = (x * 0.5).sin();
    s * s
}

/// Shortest path interpolation between `from` and `to`.
///
/// `fraction` 0 yields `from`, 1 yields `to`. For nearly coincident points the
/// great circle is numerically undefined, so a linear step is taken instead,
/// with the longitude delta wrapped so it never crosses the long way round.
pub fn interpolate(from: LatLng, to: LatLng, fraction: f64) -> LatLng {
    let angle = angle_between(from, to);
    let sin_angle = angle.sin();
    if sin_angle < 1e-6 {
        let mut d_lng = to.lng - from.lng;
        if d_lng > 180.0 {
            d_lng -= 360.0;
        } else if d_lng < -180.0 {
            d_lng += 360.0;
        }
        return LatLng::new(
            from.lat + fraction * (to.lat - from.lat),
            wrap_lng(from.lng + fraction * d_lng),
        );
    }

    let from_lat = from.lat.to_radians();
    let from_lng = from.lng.to_radians();
    let to_lat = to.lat.to_radians();
    let to_lng = to.lng.to_radians();

    let a = ((1.0 - fraction) * angle).sin() / sin_angle;
    let b = (fraction * angle).sin() / sin_angle;

    let x = a * from_lat.cos() * from_lng.cos() + b * to_lat.cos() * to_lng.cos();
    let y = a * from_lat.cos() * from_lng.sin() + b * to_lat.cos() * to_lng.sin();
    let z = a * from_lat.sin() + b * to_lat.sin();

    let lat = z.atan2((x * x + y * y).sqrt());
    let lng = y.atan2(x);
    LatLng::new(lat.to_degrees(), lng.to_degrees())
}

fn wrap_lng(lng: f64) -> f64 {
    if lng > 180.0 {
        lng - 360.0
    } else if lng < -180.0 {
        lng + 360.0
    } else {
        lng
    }
}
