pub mod config;
pub mod elevation;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod gpx_export;
pub mod graph;
pub mod guidance;
pub mod gzip;
pub mod hgt;
pub mod osm;
pub mod pbf;
pub mod store;
pub mod wire;

pub use config::Config;
pub use elevation::ElevationStore;
pub use engine::compute_route;
pub use error::PipelineError;
pub use graph::build_graph;
pub use guidance::RouteGuidance;
pub use osm::OsmIngester;
pub use store::{StoreReader, StoreWriter};
