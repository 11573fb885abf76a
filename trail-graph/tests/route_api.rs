//! End-to-end test: ingest a tiny synthetic OSM XML document, build a
//! routing database against a uniform synthetic elevation source, then
//! compute a route and export it to GPX.

use std::collections::HashMap;
use std::path::Path;

use tempfile::tempdir;
use trail_graph::config::Config;
use trail_graph::elevation::ElevationStore;
use trail_graph::hgt::{SAMPLES_PER_SIDE, TILE_BYTES};
use trail_graph::osm::{OsmNode, OsmWay};
use trail_graph::{build_graph, compute_route, gpx_export};
use trail_types::{BoundingBox, Coordinate};

/// Pre-populates the on-disk tile cache with a uniform synthetic tile, so
/// the test never needs network access to an elevation source: `load_tile`
/// finds the cache entry and never calls out.
fn seed_synthetic_tile(tile_cache_dir: &Path, name: &str, elevation_m: i16) {
    std::fs::create_dir_all(tile_cache_dir).unwrap();
    let mut bytes = Vec::with_capacity(TILE_BYTES);
    for _ in 0..(SAMPLES_PER_SIDE * SAMPLES_PER_SIDE) {
        bytes.extend_from_slice(&elevation_m.to_be_bytes());
    }
    std::fs::write(tile_cache_dir.join(format!("{name}.hgt")), bytes).unwrap();
}

fn straight_path_ways_and_nodes() -> (HashMap<i64, OsmNode>, Vec<OsmWay>) {
    let mut nodes = HashMap::new();
    for (id, lat, lon) in [
        (1i64, 47.000, 11.000),
        (2, 47.0005, 11.000),
        (3, 47.001, 11.000),
    ] {
        nodes.insert(id, OsmNode { id, lat, lon, tags: HashMap::new() });
    }
    let mut tags = HashMap::new();
    tags.insert("highway".to_string(), "path".to_string());
    tags.insert("name".to_string(), "Sentier du Lac".to_string());
    let ways = vec![OsmWay { id: 100, node_refs: vec![1, 2, 3], tags }];
    (nodes, ways)
}

#[tokio::test]
async fn build_graph_then_compute_route_end_to_end() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("routing.sqlite");
    let tile_cache_dir = dir.path().join("tiles");
    let config = Config {
        paths: trail_graph::config::PathConfig {
            tile_cache_dir: tile_cache_dir.clone(),
            routing_db_path: db_path.clone(),
            overpass_tmp_dir: dir.path().join("overpass_tmp"),
        },
        ..Config::default()
    };

    // The ways fixture sits entirely inside tile N47E011; seeding it on disk
    // makes elevation resolution hermetic instead of depending on an
    // unreachable-network assumption.
    seed_synthetic_tile(&tile_cache_dir, "N47E011", 500);

    let (nodes, ways) = straight_path_ways_and_nodes();
    let bbox = BoundingBox::new(46.999, 10.999, 47.002, 11.001);
    let mut elevation = ElevationStore::new(config.clone());

    let mut progress_calls = Vec::new();
    let result = build_graph(&ways, &nodes, &mut elevation, &db_path, bbox, &config, |stage, fraction| {
        progress_calls.push((stage.to_string(), fraction));
    })
    .await;
    assert!(result.is_ok());
    assert!(progress_calls.iter().any(|(_, f)| *f == 1.0));

    let store = trail_graph::StoreReader::open(&db_path).unwrap();
    let route = compute_route(
        &store,
        Coordinate::new(47.0001, 11.0),
        Coordinate::new(47.0009, 11.0),
        &config,
    )
    .unwrap();

    assert!(route.total_distance_m > 0.0);
    assert_eq!(route.instructions.first().unwrap().direction, trail_types::TurnDirection::Start);
    assert_eq!(route.instructions.last().unwrap().direction, trail_types::TurnDirection::Arrive);

    let gpx_payload = gpx_export::encode_route_as_gpx(&route).unwrap();
    assert!(!gpx_payload.is_empty());
}

#[tokio::test]
async fn build_graph_fails_with_no_trails_found_on_empty_ways() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("routing.sqlite");
    let config = Config::default();
    let nodes = HashMap::new();
    let mut elevation = ElevationStore::new(config.clone());
    let bbox = BoundingBox::new(47.0, 11.0, 47.1, 11.1);

    let result = build_graph(&[], &nodes, &mut elevation, &db_path, bbox, &config, |_, _| {}).await;
    assert!(matches!(
        result,
        Err(trail_graph::error::GraphBuildError::NoTrailsFound)
    ));
}
