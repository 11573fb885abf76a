//! Caller-constructed configuration: cost-model tables, retry/backoff
//! parameters, endpoints and filesystem paths. Nothing here is read from a
//! hidden global; every component takes a `&Config` explicitly.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// `highway` tag values considered routable.
    pub routable_highways: Vec<String>,
    pub cost: CostConfig,
    pub retry: RetryConfig,
    pub network: NetworkConfig,
    pub paths: PathConfig,
    /// Number of decoded HGT tiles retained in memory at once.
    pub tile_cache_size: usize,
    /// Overpass area gate, km².
    pub max_overpass_area_km2: f64,
    /// Node-search radius for `nearest_node`, metres.
    pub nearest_node_radius_m: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            routable_highways: [
                "path", "footway", "track", "steps", "cycleway", "residential", "bridleway",
                "pedestrian", "living_street", "unclassified", "tertiary", "secondary",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            cost: CostConfig::default(),
            retry: RetryConfig::default(),
            network: NetworkConfig::default(),
            paths: PathConfig::default(),
            tile_cache_size: 4,
            max_overpass_area_km2: 10_000.0,
            nearest_node_radius_m: 500.0,
        }
    }
}

impl Config {
    pub fn is_routable_highway(&self, highway: &str) -> bool {
        highway != "construction" && self.routable_highways.iter().any(|h| h == highway)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostConfig {
    pub climb_penalty_per_m: f64,
    pub surface_multiplier: HashMap<String, f64>,
    pub default_surface_multiplier: f64,
    pub sac_multiplier: HashMap<String, f64>,
    pub default_sac_multiplier: f64,
    pub steps_penalty: f64,
    /// Sentinel forward/reverse cost meaning "impassable in this direction".
    pub impassable_cost: f64,
    /// Used by the A* heuristic: `h(n) = haversine(n, goal) * min_cost_per_metre`.
    pub min_cost_per_metre: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        let surface_multiplier = [
            ("asphalt", 1.0),
            ("paved", 1.0),
            ("concrete", 1.0),
            ("gravel", 1.1),
            ("compacted", 1.1),
            ("ground", 1.2),
            ("dirt", 1.2),
            ("grass", 1.3),
            ("mud", 1.6),
            ("sand", 1.6),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let sac_multiplier = [
            ("hiking", 1.0),
            ("mountain_hiking", 1.2),
            ("demanding_mountain_hiking", 1.5),
            ("alpine_hiking", 2.0),
            ("demanding_alpine_hiking", 2.5),
            ("difficult_alpine_hiking", 3.0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            climb_penalty_per_m: 6.0,
            surface_multiplier,
            default_surface_multiplier: 1.0,
            sac_multiplier,
            default_sac_multiplier: 1.2,
            steps_penalty: 1.5,
            impassable_cost: f64::INFINITY,
            min_cost_per_metre: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub rate_limit_base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(2),
            rate_limit_base_delay: Duration::from_secs(4),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub elevation_primary_base: String,
    pub elevation_fallback_base: String,
    pub overpass_primary_endpoint: String,
    pub overpass_fallback_endpoint: String,
    pub request_timeout: Duration,
    pub resource_timeout: Duration,
    pub overpass_query_timeout_s: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            elevation_primary_base: "https://elevation-tiles-prod.s3.amazonaws.com/skadi".into(),
            elevation_fallback_base: "https://s3.amazonaws.com/elevation-tiles-prod/skadi".into(),
            overpass_primary_endpoint: "https://overpass-api.de/api/interpreter".into(),
            overpass_fallback_endpoint: "https://overpass.kumi.systems/api/interpreter".into(),
            request_timeout: Duration::from_secs(60),
            resource_timeout: Duration::from_secs(600),
            overpass_query_timeout_s: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    pub tile_cache_dir: PathBuf,
    pub routing_db_path: PathBuf,
    /// Scratch directory for streaming Overpass responses to disk before parsing.
    pub overpass_tmp_dir: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            tile_cache_dir: PathBuf::from("data/elevation_cache"),
            routing_db_path: PathBuf::from("data/routing.sqlite"),
            overpass_tmp_dir: PathBuf::from("data/overpass_tmp"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_is_never_routable() {
        let config = Config::default();
        assert!(!config.is_routable_highway("construction"));
    }

    #[test]
    fn path_is_routable_by_default() {
        let config = Config::default();
        assert!(config.is_routable_highway("path"));
        assert!(!config.is_routable_highway("motorway"));
    }
}
