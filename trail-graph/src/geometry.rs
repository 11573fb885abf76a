//! Distance, bearing and packed-geometry helpers shared by the graph builder,
//! routing store and routing engine.

use trail_types::Coordinate;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two points, in metres.
pub fn haversine_m(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let sin_dlat = (dlat / 2.0).sin();
    let sin_dlon = (dlon / 2.0).sin();

    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Initial bearing from `a` to `b`, degrees clockwise from true north, in `[0, 360)`.
pub fn bearing_deg(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    let theta = y.atan2(x).to_degrees();
    (theta + 360.0) % 360.0
}

/// Signed bearing change `b2 - b1`, normalized into `(-180, 180]`, negative is left.
pub fn bearing_delta(b1: f64, b2: f64) -> f64 {
    let mut delta = b2 - b1;
    while delta > 180.0 {
        delta -= 360.0;
    }
    while delta <= -180.0 {
        delta += 360.0;
    }
    delta
}

/// Planar (lon, lat) projection of `point` onto segment `a`-`b`, clamped to `t ∈ [0, 1]`.
/// Returns the projected coordinate and the fraction `t` along the segment.
pub fn project_onto_segment(point: Coordinate, a: Coordinate, b: Coordinate) -> (Coordinate, f64) {
    let dx = b.lon - a.lon;
    let dy = b.lat - a.lat;
    let len2 = dx * dx + dy * dy;
    if len2 < f64::EPSILON {
        return (a, 0.0);
    }
    let t = ((point.lon - a.lon) * dx + (point.lat - a.lat) * dy) / len2;
    let t = t.clamp(0.0, 1.0);
    (
        Coordinate {
            lon: a.lon + dx * t,
            lat: a.lat + dy * t,
        },
        t,
    )
}

/// Delta-compressed encoding of an intermediate-geometry polyline: a varint count,
/// followed by the first coordinate as fixed-point microdegrees, then zigzag-varint
/// deltas for each subsequent point. Round-trips within 1e-7 degrees.
pub fn pack_geometry(coords: &[Coordinate]) -> Vec<u8> {
    const SCALE: f64 = 1e7;
    let mut out = Vec::with_capacity(coords.len() * 4 + 8);
    write_uvarint(&mut out, coords.len() as u64);

    let mut prev_lat = 0i64;
    let mut prev_lon = 0i64;
    for (i, c) in coords.iter().enumerate() {
        let lat_fixed = (c.lat * SCALE).round() as i64;
        let lon_fixed = (c.lon * SCALE).round() as i64;
        if i == 0 {
            write_svarint(&mut out, lat_fixed);
            write_svarint(&mut out, lon_fixed);
        } else {
            write_svarint(&mut out, lat_fixed - prev_lat);
            write_svarint(&mut out, lon_fixed - prev_lon);
        }
        prev_lat = lat_fixed;
        prev_lon = lon_fixed;
    }
    out
}

pub fn unpack_geometry(bytes: &[u8]) -> Vec<Coordinate> {
    const SCALE: f64 = 1e7;
    let mut cursor = 0usize;
    let Some((count, n)) = read_uvarint(bytes, cursor) else {
        return Vec::new();
    };
    cursor += n;

    let mut out = Vec::with_capacity(count as usize);
    let mut prev_lat = 0i64;
    let mut prev_lon = 0i64;
    for i in 0..count {
        let Some((dlat, n)) = read_svarint(bytes, cursor) else {
            break;
        };
        cursor += n;
        let Some((dlon, n)) = read_svarint(bytes, cursor) else {
            break;
        };
        cursor += n;

        let (lat_fixed, lon_fixed) = if i == 0 {
            (dlat, dlon)
        } else {
            (prev_lat + dlat, prev_lon + dlon)
        };
        prev_lat = lat_fixed;
        prev_lon = lon_fixed;
        out.push(Coordinate {
            lat: lat_fixed as f64 / SCALE,
            lon: lon_fixed as f64 / SCALE,
        });
    }
    out
}

fn write_uvarint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

fn read_uvarint(bytes: &[u8], start: usize) -> Option<(u64, usize)> {
    let mut value = 0u64;
    let mut shift = 0u32;
    let mut i = start;
    loop {
        let byte = *bytes.get(i)?;
        value |= ((byte & 0x7f) as u64) << shift;
        i += 1;
        if byte & 0x80 == 0 {
            return Some((value, i - start));
        }
        shift += 7;
        if shift >= 64 {
            return None;
        }
    }
}

fn write_svarint(out: &mut Vec<u8>, value: i64) {
    let zigzag = ((value << 1) ^ (value >> 63)) as u64;
    write_uvarint(out, zigzag);
}

fn read_svarint(bytes: &[u8], start: usize) -> Option<(i64, usize)> {
    let (zigzag, n) = read_uvarint(bytes, start)?;
    let value = ((zigzag >> 1) as i64) ^ -((zigzag & 1) as i64);
    Some((value, n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_known_distance() {
        let a = Coordinate::new(0.0, 0.0);
        let b = Coordinate::new(0.0, 1.0);
        let d = haversine_m(a, b);
        assert!((d - 111_195.0).abs() < 200.0);
    }

    #[test]
    fn bearing_due_east_is_90() {
        let a = Coordinate::new(0.0, 0.0);
        let b = Coordinate::new(0.0, 1.0);
        assert!((bearing_deg(a, b) - 90.0).abs() < 0.5);
    }

    #[test]
    fn projection_clamps_to_segment_endpoints() {
        let a = Coordinate::new(0.0, 0.0);
        let b = Coordinate::new(0.0, 1.0);
        let beyond = Coordinate::new(0.0, 2.0);
        let (proj, t) = project_onto_segment(beyond, a, b);
        assert_eq!(t, 1.0);
        assert!((proj.lon - 1.0).abs() < 1e-9);
    }

    #[test]
    fn geometry_round_trips_within_tolerance() {
        let coords = vec![
            Coordinate::new(47.123456, 11.654321),
            Coordinate::new(47.123789, 11.654987),
            Coordinate::new(47.120001, 11.660000),
        ];
        let packed = pack_geometry(&coords);
        let decoded = unpack_geometry(&packed);
        assert_eq!(decoded.len(), coords.len());
        for (a, b) in coords.iter().zip(decoded.iter()) {
            assert!((a.lat - b.lat).abs() < 1e-7);
            assert!((a.lon - b.lon).abs() < 1e-7);
        }
    }

    #[test]
    fn empty_geometry_round_trips() {
        let packed = pack_geometry(&[]);
        assert!(unpack_geometry(&packed).is_empty());
    }

    proptest::proptest! {
        #[test]
        fn geometry_round_trips_for_arbitrary_coordinate_sequences(
            coords in proptest::collection::vec(
                (-90.0f64..90.0, -180.0f64..180.0), 0..20,
            )
        ) {
            let coords: Vec<Coordinate> = coords.into_iter().map(|(lat, lon)| Coordinate { lat, lon }).collect();
            let packed = pack_geometry(&coords);
            let decoded = unpack_geometry(&packed);
            proptest::prop_assert_eq!(decoded.len(), coords.len());
            for (a, b) in coords.iter().zip(decoded.iter()) {
                proptest::prop_assert!((a.lat - b.lat).abs() < 1e-7);
                proptest::prop_assert!((a.lon - b.lon).abs() < 1e-7);
            }
        }
    }
}
