//! Plain data types shared across the offline routing pipeline.
//!
//! No I/O and no logic lives here — just the shapes that flow between the
//! elevation store, the OSM ingester, the graph builder, the routing store,
//! the routing engine and route guidance.

use serde::{Deserialize, Serialize};

/// A WGS-84 coordinate, decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lon)
    }

    pub fn interpolate(self, other: Self, t: f64) -> Self {
        Self {
            lat: self.lat + (other.lat - self.lat) * t,
            lon: self.lon + (other.lon - self.lon) * t,
        }
    }
}

/// A (south, west, north, east) bounding box in decimal degrees.
///
/// Antimeridian crossing is out of scope: callers must ensure `west <= east`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl BoundingBox {
    pub fn new(south: f64, west: f64, north: f64, east: f64) -> Self {
        Self {
            south,
            west,
            north,
            east,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.south <= self.north && self.west <= self.east
    }

    pub fn contains(&self, coord: Coordinate) -> bool {
        coord.lat >= self.south
            && coord.lat <= self.north
            && coord.lon >= self.west
            && coord.lon <= self.east
    }

    pub fn centre(&self) -> Coordinate {
        Coordinate {
            lat: (self.south + self.north) / 2.0,
            lon: (self.west + self.east) / 2.0,
        }
    }

    /// Approximate area in km², treating degrees as locally flat at the
    /// box's mean latitude. Good enough for the area gate in spec.md §4.2.
    pub fn area_km2(&self) -> f64 {
        const KM_PER_DEG_LAT: f64 = 111.32;
        let mean_lat = (self.south + self.north) / 2.0;
        let km_per_deg_lon = KM_PER_DEG_LAT * mean_lat.to_radians().cos();
        let height_km = (self.north - self.south) * KM_PER_DEG_LAT;
        let width_km = (self.east - self.west) * km_per_deg_lon;
        (height_km * width_km).abs()
    }

    /// The set of 1°×1° tile south-west corners (integer floor lat/lon)
    /// covering this box, used to enumerate HGT tiles.
    pub fn covering_tile_corners(&self) -> Vec<(i32, i32)> {
        let lat0 = self.south.floor() as i32;
        let lat1 = self.north.floor() as i32;
        let lon0 = self.west.floor() as i32;
        let lon1 = self.east.floor() as i32;
        let mut tiles = Vec::new();
        for lat in lat0..=lat1 {
            for lon in lon0..=lon1 {
                tiles.push((lat, lon));
            }
        }
        tiles
    }
}

/// Turn direction bucket, ordered by absolute bearing change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TurnDirection {
    Start,
    Straight,
    SlightLeft,
    Left,
    SharpLeft,
    SlightRight,
    Right,
    SharpRight,
    UTurn,
    Arrive,
}

impl TurnDirection {
    /// Classify an absolute bearing change (signed, degrees) into a
    /// direction bucket, per spec.md §4.5.
    pub fn classify(signed_delta: f64) -> Self {
        let abs = signed_delta.abs();
        let left = signed_delta < 0.0;
        if abs < 20.0 {
            TurnDirection::Straight
        } else if abs < 45.0 {
            if left {
                TurnDirection::SlightLeft
            } else {
                TurnDirection::SlightRight
            }
        } else if abs < 135.0 {
            if left {
                TurnDirection::Left
            } else {
                TurnDirection::Right
            }
        } else if abs < 170.0 {
            if left {
                TurnDirection::SharpLeft
            } else {
                TurnDirection::SharpRight
            }
        } else {
            TurnDirection::UTurn
        }
    }
}

/// One instruction along a planned route, ordered by cumulative distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnInstruction {
    pub direction: TurnDirection,
    pub distance_m: f64,
    pub street_name: Option<String>,
    pub coordinate: Coordinate,
}

/// An immutable computed route: polyline, turn instructions, totals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedRoute {
    pub name: String,
    pub polyline: Vec<Coordinate>,
    pub instructions: Vec<TurnInstruction>,
    pub total_distance_m: f64,
    pub estimated_duration_s: f64,
    pub region_id: String,
}

/// A discrete event emitted by route guidance during `update`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GuidanceAlert {
    OffRoute,
    ApproachingTurn { direction: TurnDirection },
    AtTurn { direction: TurnDirection },
    Arrived,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounding_box_area_for_unit_square_near_equator() {
        let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        let area = bbox.area_km2();
        assert!((area - 111.32 * 111.32).abs() < 50.0);
    }

    #[test]
    fn covering_tiles_single_cell() {
        let bbox = BoundingBox::new(47.2, 11.2, 47.8, 11.8);
        assert_eq!(bbox.covering_tile_corners(), vec![(47, 11)]);
    }

    #[test]
    fn covering_tiles_spans_four_cells_at_boundary() {
        let bbox = BoundingBox::new(46.9, 10.9, 47.1, 11.1);
        let mut tiles = bbox.covering_tile_corners();
        tiles.sort();
        assert_eq!(tiles, vec![(46, 10), (46, 11), (47, 10), (47, 11)]);
    }

    #[test]
    fn direction_classification_thresholds() {
        assert_eq!(TurnDirection::classify(10.0), TurnDirection::Straight);
        assert_eq!(TurnDirection::classify(-30.0), TurnDirection::SlightLeft);
        assert_eq!(TurnDirection::classify(30.0), TurnDirection::SlightRight);
        assert_eq!(TurnDirection::classify(-90.0), TurnDirection::Left);
        assert_eq!(TurnDirection::classify(90.0), TurnDirection::Right);
        assert_eq!(TurnDirection::classify(-150.0), TurnDirection::SharpLeft);
        assert_eq!(TurnDirection::classify(150.0), TurnDirection::SharpRight);
        assert_eq!(TurnDirection::classify(175.0), TurnDirection::UTurn);
        assert_eq!(TurnDirection::classify(-175.0), TurnDirection::UTurn);
    }
}
