//! Pure geometric functions: Haversine distance, dead-reckoning integration,
//! RSSI-to-distance conversion, and 2-D trilateration.
//!
//! Every function here is total on its documented domain: degenerate inputs
//! (collinear anchors, zero-length basis vectors) yield `None`, never a
//! panic.

use nalgebra::Vector2;

/// Mean Earth radius in meters, used by the Haversine formula.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A WGS-84 geographic point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Great-circle distance between two WGS-84 points, in meters.
///
/// Symmetric (`haversine(a, b) == haversine(b, a)`) and zero for `a == b`.
pub fn haversine(a: LatLng, b: LatLng) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lng - a.lng).to_radians();

    let sin_dlat = (dlat / 2.0).sin();
    let sin_dlng = (dlng / 2.0).sin();

    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlng * sin_dlng;
    let c = 2.0 * h.sqrt().clamp(0.0, 1.0).asin();

    (EARTH_RADIUS_M * c).max(0.0)
}

/// Advance a position by dead reckoning given heading, speed, and elapsed
/// time.
///
/// `heading_deg` is `[0, 360)`, North = 0, clockwise. Matches the source
/// convention exactly: bearing 0 adds to latitude (north component), bearing
/// 90 adds to longitude (east component). `speed = 0` or `dt = 0` is the
/// identity.
pub fn dead_reckon(from: LatLng, heading_deg: f64, speed_mps: f64, dt_ms: f64) -> LatLng {
    let d = speed_mps * (dt_ms / 1000.0);
    if d == 0.0 {
        return from;
    }

    let heading_rad = heading_deg.to_radians();
    let lat_rad = from.lat.to_radians();

    let dlat = (d / EARTH_RADIUS_M) * (180.0 / std::f64::consts::PI) * heading_rad.cos();
    let dlng = (d / EARTH_RADIUS_M) * (180.0 / std::f64::consts::PI) * heading_rad.sin() / lat_rad.cos();

    LatLng::new(from.lat + dlat, from.lng + dlng)
}

/// Log-distance path-loss model: convert an observed RSSI (dBm) to an
/// estimated distance (meters).
pub fn rssi_to_distance(rssi: f64, rssi_ref: f64, path_loss_exponent: f64) -> f64 {
    10f64.powf((rssi_ref - rssi) / (10.0 * path_loss_exponent))
}

/// One RSSI-ranged anchor for trilateration.
#[derive(Debug, Clone, Copy)]
pub struct Anchor {
    pub position: Vector2<f64>,
    pub range_m: f64,
}

/// Solve for a 2-D point from three anchors with known positions and
/// estimated ranges.
///
/// Translates so anchor `A` is the origin, builds an orthonormal basis
/// `(ex, ey)` from `A`→`B` and `A`→`C`, and solves the resulting 2x2 linear
/// system in closed form. Returns `None` when the basis degenerates
/// (`A == B`, or `A`, `B`, `C` collinear) rather than producing NaN.
pub fn trilaterate(a: Anchor, b: Anchor, c: Anchor) -> Option<Vector2<f64>> {
    let ab = b.position - a.position;
    let d = ab.norm();
    if d == 0.0 {
        return None;
    }
    let ex = ab / d;

    let ac = c.position - a.position;
    let i = ac.dot(&ex);
    let ey_unnormalized = ac - ex * i;
    let j = ey_unnormalized.norm();
    if j == 0.0 {
        return None;
    }
    let ey = ey_unnormalized / j;

    let ra2 = a.range_m * a.range_m;
    let rb2 = b.range_m * b.range_m;
    let rc2 = c.range_m * c.range_m;

    let x = (ra2 - rb2 + d * d) / (2.0 * d);
    let y = (ra2 - rc2 + i * i + j * j - 2.0 * i * x) / (2.0 * j);

    if !x.is_finite() || !y.is_finite() {
        return None;
    }

    Some(a.position + ex * x + ey * y)
}
