//! Routing engine: A* over the stored graph, snapping endpoints and
//! synthesizing turn instructions along the winning path.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use trail_types::{Coordinate, PlannedRoute, TurnDirection, TurnInstruction};

use crate::config::Config;
use crate::error::RouteEngineError;
use crate::geometry::{bearing_deg, bearing_delta, haversine_m};
use crate::store::StoreReader;

/// `BinaryHeap` is a max-heap; `Reverse`-style ordering here instead flips
/// the comparison so the lowest `f = g + h` comes out first, tie-broken by
/// smaller `g`, then smaller node id.
struct QueueEntry {
    f: f64,
    g: f64,
    node: i64,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.f == other.f && self.g == other.g && self.node == other.node
    }
}
impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f
            .total_cmp(&self.f)
            .then_with(|| other.g.total_cmp(&self.g))
            .then_with(|| other.node.cmp(&self.node))
    }
}

/// Computes a least-cost walk from `start` to `end` against the stored graph.
pub fn compute_route(
    store: &StoreReader,
    start: Coordinate,
    end: Coordinate,
    config: &Config,
) -> Result<PlannedRoute, RouteEngineError> {
    let start_node = store
        .nearest_node(start, config.nearest_node_radius_m)
        .map_err(|_| RouteEngineError::EndpointUnreachable)?;
    let end_node = store
        .nearest_node(end, config.nearest_node_radius_m)
        .map_err(|_| RouteEngineError::EndpointUnreachable)?;
    let goal_coord = store.node_coordinate(end_node)?;

    let (path_nodes, path_edges) = astar(store, start_node, end_node, goal_coord, config)?;

    let polyline = assemble_polyline(store, start, end, &path_nodes, &path_edges)?;
    let instructions = synthesize_instructions(store, &path_nodes, &path_edges, &polyline)?;

    let total_distance_m: f64 = path_edges.iter().map(|e| e.distance_m).sum();
    let estimated_duration_s = path_edges.iter().map(|e| e.forward_cost).sum::<f64>();

    Ok(PlannedRoute {
        name: "Route".to_string(),
        polyline,
        instructions,
        total_distance_m,
        estimated_duration_s,
        region_id: String::new(),
    })
}

struct TraversedEdge {
    edge_id: i64,
    to_node: i64,
    forward_cost: f64,
    distance_m: f64,
}

fn astar(
    store: &StoreReader,
    start: i64,
    goal: i64,
    goal_coord: Coordinate,
    config: &Config,
) -> Result<(Vec<i64>, Vec<TraversedEdge>), RouteEngineError> {
    let mut open = BinaryHeap::new();
    let mut best_g: HashMap<i64, f64> = HashMap::new();
    let mut came_from: HashMap<i64, (i64, i64, f64, f64)> = HashMap::new(); // node -> (prev, edge_id, forward_cost, distance)

    best_g.insert(start, 0.0);
    open.push(QueueEntry { f: 0.0, g: 0.0, node: start });

    while let Some(QueueEntry { g, node, .. }) = open.pop() {
        if node == goal {
            return Ok(reconstruct(start, goal, &came_from));
        }
        if g > *best_g.get(&node).unwrap_or(&f64::INFINITY) {
            continue;
        }

        for adj in store.adjacency(node)? {
            let tentative_g = g + adj.forward_cost;
            if tentative_g < *best_g.get(&adj.to_node).unwrap_or(&f64::INFINITY) {
                best_g.insert(adj.to_node, tentative_g);
                came_from.insert(adj.to_node, (node, adj.edge_id, adj.forward_cost, adj.distance_m));
                let to_coord = store.node_coordinate(adj.to_node)?;
                let h = haversine_m(to_coord, goal_coord) * config.cost.min_cost_per_metre;
                open.push(QueueEntry {
                    f: tentative_g + h,
                    g: tentative_g,
                    node: adj.to_node,
                });
            }
        }
    }

    Err(RouteEngineError::NoRoute)
}

fn reconstruct(
    start: i64,
    goal: i64,
    came_from: &HashMap<i64, (i64, i64, f64, f64)>,
) -> (Vec<i64>, Vec<TraversedEdge>) {
    let mut nodes = vec![goal];
    let mut edges = Vec::new();
    let mut current = goal;

    while current != start {
        let (prev, edge_id, forward_cost, distance_m) = came_from[&current];
        edges.push(TraversedEdge {
            edge_id,
            to_node: current,
            forward_cost,
            distance_m,
        });
        nodes.push(prev);
        current = prev;
    }

    nodes.reverse();
    edges.reverse();
    (nodes, edges)
}

fn assemble_polyline(
    store: &StoreReader,
    raw_start: Coordinate,
    raw_end: Coordinate,
    path_nodes: &[i64],
    path_edges: &[TraversedEdge],
) -> Result<Vec<Coordinate>, RouteEngineError> {
    let mut polyline = vec![raw_start];

    for (i, edge) in path_edges.iter().enumerate() {
        let from_node = path_nodes[i];
        let from_coord = store.node_coordinate(from_node)?;
        let to_coord = store.node_coordinate(edge.to_node)?;
        let geometry = store.edge_geometry(edge.edge_id)?;

        polyline.push(from_coord);
        polyline.extend(geometry);
        polyline.push(to_coord);
    }

    polyline.push(raw_end);
    Ok(polyline)
}

fn synthesize_instructions(
    store: &StoreReader,
    path_nodes: &[i64],
    path_edges: &[TraversedEdge],
    polyline: &[Coordinate],
) -> Result<Vec<TurnInstruction>, RouteEngineError> {
    let mut instructions = Vec::new();
    let total_distance_m: f64 = path_edges.iter().map(|e| e.distance_m).sum();

    instructions.push(TurnInstruction {
        direction: TurnDirection::Start,
        distance_m: 0.0,
        street_name: None,
        coordinate: polyline[0],
    });

    let mut cumulative = 0.0;
    for i in 0..path_edges.len().saturating_sub(1) {
        let prev_edge = &path_edges[i];
        let next_edge = &path_edges[i + 1];
        cumulative += prev_edge.distance_m;

        let a = store.node_coordinate(path_nodes[i])?;
        let junction = store.node_coordinate(path_nodes[i + 1])?;
        let b = store.node_coordinate(path_nodes[i + 2])?;

        let incoming_bearing = bearing_deg(a, junction);
        let outgoing_bearing = bearing_deg(junction, b);
        let delta = bearing_delta(incoming_bearing, outgoing_bearing);
        let direction = TurnDirection::classify(delta);

        instructions.push(TurnInstruction {
            direction,
            distance_m: cumulative,
            street_name: store.edge_name(next_edge.edge_id)?,
            coordinate: junction,
        });
    }

    instructions.push(TurnInstruction {
        direction: TurnDirection::Arrive,
        distance_m: total_distance_m,
        street_name: None,
        coordinate: *polyline.last().unwrap(),
    });

    Ok(instructions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_entry_orders_by_smaller_f_then_smaller_g_then_smaller_node() {
        let mut heap = BinaryHeap::new();
        heap.push(QueueEntry { f: 10.0, g: 5.0, node: 2 });
        heap.push(QueueEntry { f: 5.0, g: 5.0, node: 1 });
        heap.push(QueueEntry { f: 5.0, g: 3.0, node: 3 });
        let first = heap.pop().unwrap();
        assert_eq!(first.node, 3);
    }
}
