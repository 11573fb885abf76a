//! HGT tile decoding: the raw 3601×3601 big-endian i16 grid format and
//! bilinear interpolation over it, grounded in the same SRTM-tile layout
//! used by comparable hiking/elevation tools in the reference pack.

use crate::error::ElevationError;

pub const SAMPLES_PER_SIDE: usize = 3601;
pub const TILE_BYTES: usize = SAMPLES_PER_SIDE * SAMPLES_PER_SIDE * 2;
const VOID: i16 = -32768;

/// A decoded 1°×1° elevation tile, south-west corner at integer `(lat_sw, lon_sw)`.
#[derive(Debug, Clone)]
pub struct HgtTile {
    pub lat_sw: i32,
    pub lon_sw: i32,
    samples: Vec<i16>,
}

impl HgtTile {
    /// Decodes a tile from its raw big-endian i16 payload (already
    /// decompressed). Fails if the payload isn't exactly `TILE_BYTES` long.
    pub fn from_raw_bytes(name: &str, lat_sw: i32, lon_sw: i32, data: &[u8]) -> Result<Self, ElevationError> {
        if data.len() != TILE_BYTES {
            return Err(ElevationError::InvalidTileData {
                tile: name.to_string(),
                detail: format!("expected {TILE_BYTES} bytes, got {}", data.len()),
            });
        }
        let samples = data
            .chunks_exact(2)
            .map(|pair| i16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        Ok(Self {
            lat_sw,
            lon_sw,
            samples,
        })
    }

    /// Metadata-only accessors, used for progress logging and tests.
    pub fn min_max(&self) -> Option<(i16, i16)> {
        let valid = self.samples.iter().copied().filter(|&v| v != VOID);
        let min = valid.clone().min()?;
        let max = valid.max()?;
        Some((min, max))
    }

    fn raw_at(&self, row: usize, col: usize) -> Option<i16> {
        if row >= SAMPLES_PER_SIDE || col >= SAMPLES_PER_SIDE {
            return None;
        }
        let v = self.samples[row * SAMPLES_PER_SIDE + col];
        if v == VOID {
            None
        } else {
            Some(v)
        }
    }

    /// Bilinearly interpolates the elevation at `(lat, lon)`, which must fall
    /// within `[lat_sw, lat_sw+1] x [lon_sw, lon_sw+1]`.
    pub fn interpolate(&self, lat: f64, lon: f64) -> Option<f64> {
        let frac_lat = lat - self.lat_sw as f64;
        let frac_lon = lon - self.lon_sw as f64;
        let n = (SAMPLES_PER_SIDE - 1) as f64;

        let row_f = ((1.0 - frac_lat) * n).clamp(0.0, n);
        let col_f = (frac_lon * n).clamp(0.0, n);

        let row0 = (row_f.floor() as usize).min(SAMPLES_PER_SIDE - 2);
        let col0 = (col_f.floor() as usize).min(SAMPLES_PER_SIDE - 2);
        let row1 = row0 + 1;
        let col1 = col0 + 1;

        let dr = row_f - row0 as f64;
        let dc = col_f - col0 as f64;

        let nw = self.raw_at(row0, col0);
        let ne = self.raw_at(row0, col1);
        let sw = self.raw_at(row1, col0);
        let se = self.raw_at(row1, col1);

        match (nw, ne, sw, se) {
            (Some(nw), Some(ne), Some(sw), Some(se)) => {
                let top = nw as f64 * (1.0 - dc) + ne as f64 * dc;
                let bottom = sw as f64 * (1.0 - dc) + se as f64 * dc;
                Some(top * (1.0 - dr) + bottom * dr)
            }
            _ => {
                let present: Vec<f64> = [nw, ne, sw, se]
                    .into_iter()
                    .flatten()
                    .map(|v| v as f64)
                    .collect();
                if present.is_empty() {
                    None
                } else {
                    Some(present.iter().sum::<f64>() / present.len() as f64)
                }
            }
        }
    }
}

/// Derives the `{N|S}DD{E|W}DDD` tile name for the tile covering `(lat, lon)`.
pub fn tile_name(lat: f64, lon: f64) -> String {
    let lat_floor = lat.floor() as i32;
    let lon_floor = lon.floor() as i32;
    tile_name_for_corner(lat_floor, lon_floor)
}

pub fn tile_name_for_corner(lat_sw: i32, lon_sw: i32) -> String {
    let lat_prefix = if lat_sw >= 0 { "N" } else { "S" };
    let lon_prefix = if lon_sw >= 0 { "E" } else { "W" };
    format!(
        "{lat_prefix}{:02}{lon_prefix}{:03}",
        lat_sw.unsigned_abs(),
        lon_sw.unsigned_abs()
    )
}

pub fn parse_tile_name(name: &str) -> Option<(i32, i32)> {
    let bytes = name.as_bytes();
    if bytes.len() != 7 {
        return None;
    }
    let lat_sign = match bytes[0] {
        b'N' => 1,
        b'S' => -1,
        _ => return None,
    };
    let lat: i32 = name.get(1..3)?.parse().ok()?;
    let lon_sign = match bytes[3] {
        b'E' => 1,
        b'W' => -1,
        _ => return None,
    };
    let lon: i32 = name.get(4..7)?.parse().ok()?;
    Some((lat_sign * lat, lon_sign * lon))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_tile(lat_sw: i32, lon_sw: i32, value: i16) -> HgtTile {
        HgtTile {
            lat_sw,
            lon_sw,
            samples: vec![value; SAMPLES_PER_SIDE * SAMPLES_PER_SIDE],
        }
    }

    #[test]
    fn tile_name_inversion_all_quadrants() {
        assert_eq!(tile_name(47.5, 11.5), "N47E011");
        assert_eq!(tile_name(-12.2, -77.1), "S13W078");
        assert_eq!(tile_name(0.1, 0.1), "N00E000");
        assert_eq!(parse_tile_name("N47E011"), Some((47, 11)));
        assert_eq!(parse_tile_name("S13W078"), Some((-13, -78)));
    }

    #[test]
    fn uniform_tile_interpolates_exactly() {
        let tile = uniform_tile(47, 11, 1000);
        assert_eq!(tile.interpolate(47.5, 11.5), Some(1000.0));
    }

    #[test]
    fn single_void_corner_averages_remaining_three() {
        let mut tile = uniform_tile(47, 11, 1000);
        tile.samples[0] = -32768; // NW corner of the grid (north-west of tile)
        // Sample right at the NW grid corner: frac_lat=1.0 -> row0=0, frac_lon=0.0 -> col0=0
        let elev = tile.interpolate(48.0, 11.0).unwrap();
        assert!((elev - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn all_void_returns_none() {
        let tile = uniform_tile(47, 11, -32768);
        assert_eq!(tile.interpolate(47.5, 11.5), None);
    }

    #[test]
    fn round_trip_against_grid_cell() {
        // elevation_at(tile_sw_lat + (3600-r)/3600, tile_sw_lon + c/3600) == sample[r, c]
        let mut tile = uniform_tile(47, 11, 0);
        let r = 900usize;
        let c = 1200usize;
        tile.samples[r * SAMPLES_PER_SIDE + c] = 777;
        let lat = 47.0 + (3600 - r) as f64 / 3600.0;
        let lon = 11.0 + c as f64 / 3600.0;
        let elev = tile.interpolate(lat, lon).unwrap();
        assert!((elev - 777.0).abs() < 1e-6);
    }
}
