//! Graph builder: converts `(nodes, ways)` into a persisted routing graph.
//! Five stages, in order: junction identification, way splitting, elevation
//! resolution, cost computation, persistence.

use std::collections::HashMap;

use trail_types::{BoundingBox, Coordinate};

use crate::config::Config;
use crate::elevation::ElevationStore;
use crate::error::GraphBuildError;
use crate::geometry::haversine_m;
use crate::osm::{OsmNode, OsmWay};
use crate::store::{EdgeRow, NodeRow, StoreWriter};

struct RawEdge {
    from: i64,
    to: i64,
    intermediates: Vec<i64>,
    distance_m: f64,
    source_way: i64,
}

/// Builds a routing graph from ingested OSM data and persists it to
/// `out_path`, invoking `progress` at the checkpoints the design calls for.
pub async fn build_graph(
    ways: &[OsmWay],
    nodes: &HashMap<i64, OsmNode>,
    elevation: &mut ElevationStore,
    out_path: &std::path::Path,
    bbox: BoundingBox,
    config: &Config,
    mut progress: impl FnMut(&str, f64),
) -> Result<(), GraphBuildError> {
    if ways.is_empty() {
        return Err(GraphBuildError::NoTrailsFound);
    }

    progress("identifying junctions", 0.0);
    let junctions = identify_junctions(ways);
    progress("identifying junctions", 0.05);

    let raw_edges = split_ways(ways, &junctions, nodes)?;
    progress("splitting ways", 0.15);

    let elevations = resolve_elevations(&raw_edges, nodes, elevation).await;
    progress("resolving elevations", 0.30);

    let edge_rows = compute_costs(&raw_edges, ways, nodes, &elevations, config)?;
    progress("computing costs", 0.55);

    let node_rows: Vec<NodeRow> = junctions
        .iter()
        .map(|&id| {
            let node = &nodes[&id];
            NodeRow {
                id,
                lat: node.lat,
                lon: node.lon,
                elevation: elevations.get(&id).copied().flatten(),
            }
        })
        .collect();

    progress("writing routing store", 0.70);
    persist(&node_rows, &edge_rows, bbox, out_path)?;
    progress("done", 1.0);

    Ok(())
}

/// Benchmark-only entry point onto stage 1.
pub fn identify_junctions_bench(ways: &[OsmWay]) -> Vec<i64> {
    identify_junctions(ways)
}

/// Benchmark-only entry point onto stage 2.
pub fn split_ways_bench(
    ways: &[OsmWay],
    junctions: &[i64],
    nodes: &HashMap<i64, OsmNode>,
) -> Result<usize, GraphBuildError> {
    split_ways(ways, junctions, nodes).map(|edges| edges.len())
}

/// Stage 1: every node that is the endpoint of a routable way (weight 2) or
/// an interior node shared by two or more routable ways (weight 1 each)
/// becomes a junction once its counter reaches 2.
fn identify_junctions(ways: &[OsmWay]) -> Vec<i64> {
    let mut counters: HashMap<i64, u32> = HashMap::new();
    for way in ways {
        let Some((&first, rest)) = way.node_refs.split_first() else {
            continue;
        };
        let Some((&last, interior)) = rest.split_last() else {
            continue;
        };
        *counters.entry(first).or_insert(0) += 2;
        *counters.entry(last).or_insert(0) += 2;
        for &node in interior {
            *counters.entry(node).or_insert(0) += 1;
        }
    }
    counters
        .into_iter()
        .filter(|&(_, count)| count >= 2)
        .map(|(id, _)| id)
        .collect()
}

/// Stage 2: walk each way's node sequence, accumulating Haversine distance,
/// emitting a raw edge whenever a junction (or the way's last node) is hit.
fn split_ways(
    ways: &[OsmWay],
    junctions: &[i64],
    nodes: &HashMap<i64, OsmNode>,
) -> Result<Vec<RawEdge>, GraphBuildError> {
    let junction_set: std::collections::HashSet<i64> = junctions.iter().copied().collect();
    let mut edges = Vec::new();

    for way in ways {
        if way.node_refs.len() < 2 {
            continue;
        }
        let mut segment_start = way.node_refs[0];
        let mut intermediates = Vec::new();
        let mut accumulated = 0.0;
        let last_node = *way.node_refs.last().unwrap();

        for pair in way.node_refs.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let coord_a = coord_of(a, nodes)?;
            let coord_b = coord_of(b, nodes)?;
            accumulated += haversine_m(coord_a, coord_b);

            let is_last = b == last_node;
            if junction_set.contains(&b) || is_last {
                edges.push(RawEdge {
                    from: segment_start,
                    to: b,
                    intermediates: std::mem::take(&mut intermediates),
                    distance_m: accumulated,
                    source_way: way.id,
                });
                segment_start = b;
                accumulated = 0.0;
            } else {
                intermediates.push(b);
            }
        }
    }

    Ok(edges)
}

fn coord_of(node_id: i64, nodes: &HashMap<i64, OsmNode>) -> Result<Coordinate, GraphBuildError> {
    nodes
        .get(&node_id)
        .map(|n| Coordinate::new(n.lat, n.lon))
        .ok_or_else(|| GraphBuildError::InconsistentData(format!("way references unknown node {node_id}")))
}

/// Stage 3: batch-resolve every endpoint's elevation through the store.
async fn resolve_elevations(
    raw_edges: &[RawEdge],
    nodes: &HashMap<i64, OsmNode>,
    elevation: &mut ElevationStore,
) -> HashMap<i64, Option<f64>> {
    let mut ids: Vec<i64> = raw_edges.iter().flat_map(|e| [e.from, e.to]).collect();
    ids.sort_unstable();
    ids.dedup();

    let coords: Vec<Coordinate> = ids
        .iter()
        .filter_map(|id| nodes.get(id).map(|n| Coordinate::new(n.lat, n.lon)))
        .collect();
    let results = elevation.elevations(&coords).await;

    ids.into_iter().zip(results).collect()
}

/// Stage 4: Naismith + surface/SAC/steps multipliers + Tobler-style descent
/// term; oneway ways get an impassable reverse cost.
fn compute_costs(
    raw_edges: &[RawEdge],
    ways: &[OsmWay],
    nodes: &HashMap<i64, OsmNode>,
    elevations: &HashMap<i64, Option<f64>>,
    config: &Config,
) -> Result<Vec<EdgeRow>, GraphBuildError> {
    let ways_by_id: HashMap<i64, &OsmWay> = ways.iter().map(|w| (w.id, w)).collect();
    let mut rows = Vec::with_capacity(raw_edges.len());

    for edge in raw_edges {
        let way = ways_by_id.get(&edge.source_way).ok_or_else(|| {
            GraphBuildError::InconsistentData(format!("edge references unknown way {}", edge.source_way))
        })?;

        let from_elev = elevations.get(&edge.from).copied().flatten();
        let to_elev = elevations.get(&edge.to).copied().flatten();
        let (gain, loss) = match (from_elev, to_elev) {
            (Some(from), Some(to)) => {
                let delta = to - from;
                if delta >= 0.0 { (delta, 0.0) } else { (0.0, -delta) }
            }
            _ => (0.0, 0.0),
        };

        let surface = way.tags.get("surface").cloned();
        let highway = way.tags.get("highway").cloned();
        let sac_scale = way.tags.get("sac_scale").cloned();
        let oneway = way
            .tags
            .get("oneway")
            .map(|v| matches!(v.as_str(), "yes" | "1" | "true"))
            .unwrap_or(false);

        let surface_mult = surface
            .as_deref()
            .and_then(|s| config.cost.surface_multiplier.get(s))
            .copied()
            .unwrap_or(config.cost.default_surface_multiplier);
        let sac_mult = sac_scale
            .as_deref()
            .and_then(|s| config.cost.sac_multiplier.get(s))
            .copied()
            .unwrap_or(config.cost.default_sac_multiplier);
        let steps_penalty = if highway.as_deref() == Some("steps") {
            config.cost.steps_penalty
        } else {
            1.0
        };

        let base = edge.distance_m * surface_mult * sac_mult * steps_penalty;
        let forward_cost =
            base + gain * config.cost.climb_penalty_per_m + descent_term(loss, edge.distance_m, config);
        let reverse_cost = if oneway {
            config.cost.impassable_cost
        } else {
            base + loss * config.cost.climb_penalty_per_m + descent_term(gain, edge.distance_m, config)
        };

        let geometry = std::iter::once(edge.from)
            .chain(edge.intermediates.iter().copied())
            .chain(std::iter::once(edge.to))
            .filter_map(|id| nodes.get(&id).map(|n| Coordinate::new(n.lat, n.lon)))
            .collect::<Vec<_>>();
        let intermediate_geometry = geometry[1..geometry.len().saturating_sub(1)].to_vec();

        rows.push(EdgeRow {
            from_node: edge.from,
            to_node: edge.to,
            distance_m: edge.distance_m,
            elevation_gain_m: gain,
            elevation_loss_m: loss,
            surface,
            highway_type: highway,
            sac_scale,
            trail_visibility: way.tags.get("trail_visibility").cloned(),
            name: way.tags.get("name").cloned(),
            osm_way_id: way.id,
            cost: forward_cost,
            reverse_cost,
            is_oneway: oneway,
            geometry: intermediate_geometry,
        });
    }

    Ok(rows)
}

/// Tobler-style descent adjustment: gentle downhill reduces cost, steep
/// downhill increases it, applied to the elevation-loss climb-penalty term.
fn descent_term(loss_m: f64, distance_m: f64, config: &Config) -> f64 {
    if loss_m <= 0.0 || distance_m <= 0.0 {
        return 0.0;
    }
    let grade_pct = loss_m / distance_m * 100.0;
    let multiplier = if grade_pct <= 10.0 {
        0.7
    } else if grade_pct <= 20.0 {
        0.9
    } else if grade_pct <= 30.0 {
        1.1
    } else {
        1.4
    };
    loss_m * config.cost.climb_penalty_per_m * multiplier
}

/// Stage 5: destructive create, one bulk-load transaction, indexes after.
fn persist(
    node_rows: &[NodeRow],
    edge_rows: &[EdgeRow],
    bbox: BoundingBox,
    out_path: &std::path::Path,
) -> Result<(), GraphBuildError> {
    let mut writer = StoreWriter::create(out_path)?;
    let metadata = vec![
        ("version".to_string(), crate::store::SCHEMA_VERSION.to_string()),
        ("created_at".to_string(), chrono::Utc::now().to_rfc3339()),
        (
            "bounding_box".to_string(),
            format!("{},{},{},{}", bbox.west, bbox.south, bbox.east, bbox.north),
        ),
        ("node_count".to_string(), node_rows.len().to_string()),
        ("edge_count".to_string(), edge_rows.len().to_string()),
        ("elevation_source".to_string(), "skadi-hgt".to_string()),
    ];

    if let Err(err) = writer.bulk_load(node_rows, edge_rows, &metadata) {
        let _ = std::fs::remove_file(out_path);
        return Err(err.into());
    }
    writer.create_indexes()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn way(id: i64, refs: &[i64], tags: &[(&str, &str)]) -> OsmWay {
        OsmWay {
            id,
            node_refs: refs.to_vec(),
            tags: tags.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    fn node(id: i64, lat: f64, lon: f64) -> OsmNode {
        OsmNode { id, lat, lon, tags: HashMap::new() }
    }

    #[test]
    fn endpoints_are_always_junctions() {
        let ways = vec![way(1, &[1, 2, 3], &[("highway", "path")])];
        let junctions = identify_junctions(&ways);
        assert!(junctions.contains(&1));
        assert!(junctions.contains(&3));
        assert!(!junctions.contains(&2));
    }

    #[test]
    fn shared_interior_node_becomes_junction() {
        let ways = vec![
            way(1, &[1, 2, 3], &[("highway", "path")]),
            way(2, &[4, 2, 5], &[("highway", "path")]),
        ];
        let junctions = identify_junctions(&ways);
        assert!(junctions.contains(&2));
    }

    #[test]
    fn split_ways_emits_one_edge_per_junction_to_junction_span() {
        let ways = vec![way(1, &[1, 2, 3], &[("highway", "path")])];
        let mut nodes = HashMap::new();
        nodes.insert(1, node(1, 47.0, 11.0));
        nodes.insert(2, node(2, 47.0005, 11.0));
        nodes.insert(3, node(3, 47.001, 11.0));
        let junctions = identify_junctions(&ways);
        let edges = split_ways(&ways, &junctions, &nodes).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].from, 1);
        assert_eq!(edges[0].to, 3);
        assert!(edges[0].distance_m > 0.0);
    }

    #[test]
    fn inconsistent_data_when_way_references_missing_node() {
        let ways = vec![way(1, &[1, 2], &[("highway", "path")])];
        let nodes = HashMap::new();
        let junctions = identify_junctions(&ways);
        let result = split_ways(&ways, &junctions, &nodes);
        assert!(matches!(result, Err(GraphBuildError::InconsistentData(_))));
    }

    #[test]
    fn oneway_forces_impassable_reverse_cost() {
        let ways = vec![way(1, &[1, 2], &[("highway", "path"), ("oneway", "yes")])];
        let mut nodes = HashMap::new();
        nodes.insert(1, node(1, 47.0, 11.0));
        nodes.insert(2, node(2, 47.001, 11.0));
        let junctions = identify_junctions(&ways);
        let raw = split_ways(&ways, &junctions, &nodes).unwrap();
        let elevations = HashMap::new();
        let config = Config::default();
        let rows = compute_costs(&raw, &ways, &nodes, &elevations, &config).unwrap();
        assert_eq!(rows[0].reverse_cost, config.cost.impassable_cost);
    }

    #[test]
    fn cost_matches_reference_scenario() {
        // distance 1000m, surface mult 1.0, sac mult 1.2 (mountain_hiking), gain 100m.
        let ways = vec![way(
            1,
            &[1, 2],
            &[("highway", "path"), ("sac_scale", "mountain_hiking")],
        )];
        let mut nodes = HashMap::new();
        nodes.insert(1, node(1, 47.0, 11.0));
        nodes.insert(2, node(2, 47.009, 11.0));
        let junctions = identify_junctions(&ways);
        let mut raw = split_ways(&ways, &junctions, &nodes).unwrap();
        raw[0].distance_m = 1000.0;
        let mut elevations = HashMap::new();
        elevations.insert(1, Some(0.0));
        elevations.insert(2, Some(100.0));
        let config = Config::default();
        let rows = compute_costs(&raw, &ways, &nodes, &elevations, &config).unwrap();
        let expected = 1000.0 * 1.0 * 1.2 * 1.0 + 100.0 * 6.0;
        assert!((rows[0].cost - expected).abs() < 1e-6);
    }
}
