//! Z-order (Morton) keys for WGS84 coordinates.
//!
//! Sorting by [`morton_key`] keeps points that are close on the map close
//! in the sequence, which is how chunk builds and enrichment batches keep
//! their envelopes compact.

use parcel_map_parcel_models::LngLat;

/// Z-order key of a WGS84 coordinate: 32 bits per axis, interleaved.
/// Out-of-range values clamp to the nearest edge; NaN maps to the minimum.
#[must_use]
pub fn morton_key(point: LngLat) -> u64 {
    spread_bits(quantize(point.lng, -180.0, 360.0))
        | (spread_bits(quantize(point.lat, -90.0, 180.0)) << 1)
}

fn quantize(value: f64, min: f64, span: f64) -> u32 {
    let t = ((value - min) / span).clamp(0.0, 1.0);
    if t.is_nan() {
        return 0;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let q = (t * f64::from(u32::MAX)) as u32;
    q
}

fn spread_bits(value: u32) -> u64 {
    let mut x = u64::from(value);
    x = (x | (x << 16)) & 0x0000_FFFF_0000_FFFF;
    x = (x | (x << 8)) & 0x00FF_00FF_00FF_00FF;
    x = (x | (x << 4)) & 0x0F0F_0F0F_0F0F_0F0F;
    x = (x | (x << 2)) & 0x3333_3333_3333_3333;
    x = (x | (x << 1)) & 0x5555_5555_5555_5555;
    x
}
