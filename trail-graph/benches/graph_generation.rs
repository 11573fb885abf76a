use std::collections::HashMap;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use trail_graph::config::Config;
use trail_graph::graph::{identify_junctions_bench, split_ways_bench};
use trail_graph::osm::{OsmNode, OsmWay};

fn synthetic_grid(side: usize) -> (HashMap<i64, OsmNode>, Vec<OsmWay>) {
    let mut nodes = HashMap::new();
    let mut ways = Vec::new();
    let mut id = 0i64;

    for row in 0..side {
        let mut refs = Vec::new();
        for col in 0..side {
            id += 1;
            nodes.insert(
                id,
                OsmNode {
                    id,
                    lat: 47.0 + row as f64 * 0.001,
                    lon: 11.0 + col as f64 * 0.001,
                    tags: HashMap::new(),
                },
            );
            refs.push(id);
        }
        let mut tags = HashMap::new();
        tags.insert("highway".to_string(), "path".to_string());
        ways.push(OsmWay { id: 1_000_000 + row as i64, node_refs: refs, tags });
    }

    (nodes, ways)
}

fn benchmark_junction_and_split(c: &mut Criterion) {
    let (nodes, ways) = synthetic_grid(50);
    let config = Config::default();

    c.bench_function("identify_junctions_50x50", |b| {
        b.iter(|| identify_junctions_bench(black_box(&ways)))
    });

    c.bench_function("split_ways_50x50", |b| {
        let junctions = identify_junctions_bench(&ways);
        b.iter(|| split_ways_bench(black_box(&ways), black_box(&junctions), black_box(&nodes)).unwrap());
    });

    let _ = &config;
}

criterion_group!(benches, benchmark_junction_and_split);
criterion_main!(benches);
