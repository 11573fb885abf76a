use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trail_types::{BoundingBox, Coordinate};

use trail_graph::config::Config;
use trail_graph::elevation::ElevationStore;
use trail_graph::store::StoreReader;
use trail_graph::{build_graph, compute_route, gpx_export, OsmIngester};

#[derive(Parser)]
#[command(name = "trailctl", about = "Build and query offline hiking routing graphs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch OSM data for a bounding box and build a routing database.
    Build {
        #[arg(long)]
        south: f64,
        #[arg(long)]
        west: f64,
        #[arg(long)]
        north: f64,
        #[arg(long)]
        east: f64,
        #[arg(long)]
        out: PathBuf,
    },
    /// Compute a route between two coordinates against a built database.
    Route {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        gpx: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trail_graph=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::default();

    match cli.command {
        Command::Build { south, west, north, east, out } => {
            let bbox = BoundingBox::new(south, west, north, east);
            tracing::info!(?bbox, "fetching OSM data");
            let ingester = OsmIngester::new(config.clone());
            let (nodes, ways) = ingester.fetch(bbox).await?;

            let mut elevation = ElevationStore::new(config.clone());
            build_graph(&ways, &nodes, &mut elevation, &out, bbox, &config, |stage, fraction| {
                tracing::info!(stage, fraction, "build progress");
            })
            .await?;
            tracing::info!(path = %out.display(), "routing database written");
        }
        Command::Route { db, from, to, gpx } => {
            let start = parse_coordinate(&from)?;
            let end = parse_coordinate(&to)?;
            let store = StoreReader::open(&db)?;
            let route = compute_route(&store, start, end, &config)?;
            println!(
                "{} m, {} turns",
                route.total_distance_m,
                route.instructions.len()
            );
            if let Some(gpx_path) = gpx {
                let encoded = gpx_export::encode_route_as_gpx(&route)?;
                std::fs::write(&gpx_path, encoded)?;
                tracing::info!(path = %gpx_path.display(), "gpx written");
            }
        }
    }

    Ok(())
}

fn parse_coordinate(s: &str) -> Result<Coordinate, Box<dyn std::error::Error>> {
    let (lat, lon) = s
        .split_once(',')
        .ok_or("coordinate must be formatted lat,lon")?;
    Ok(Coordinate::new(lat.trim().parse()?, lon.trim().parse()?))
}
