use thiserror::Error;

#[derive(Debug, Error)]
pub enum ElevationError {
    #[error("invalid tile name `{0}`")]
    InvalidTileName(String),
    #[error("tile `{tile}` has invalid data: {detail}")]
    InvalidTileData { tile: String, detail: String },
    #[error("download of tile `{tile}` failed after retries: {source}")]
    DownloadFailed {
        tile: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("tile `{tile}` request returned HTTP {status}")]
    HttpError { tile: String, status: u16 },
    #[error("io error for tile `{tile}`: {source}")]
    Io {
        tile: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("bounding box area {0:.1} km² exceeds the configured maximum")]
    AreaTooLarge(f64),
    #[error("invalid bounding box")]
    InvalidBoundingBox,
    #[error("overpass request returned HTTP {0}")]
    HttpError(u16),
    #[error("overpass query timed out on both endpoints")]
    QueryTimeout,
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("xml parse error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("pbf wire decode error: {0}")]
    Wire(String),
}

#[derive(Debug, Error)]
pub enum GraphBuildError {
    #[error("no routable ways in input")]
    NoTrailsFound,
    #[error("inconsistent data: {0}")]
    InconsistentData(String),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("operation cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database creation failed: {0}")]
    DatabaseCreationFailed(String),
    #[error("no routing node within the search radius of the query point")]
    NoNearbyNode,
}

#[derive(Debug, Error)]
pub enum RouteEngineError {
    #[error("no route between the snapped endpoints")]
    NoRoute,
    #[error("endpoint could not be snapped to the routing graph")]
    EndpointUnreachable,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("gpx export error: {0}")]
    Gpx(#[from] gpx::errors::GpxError),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Elevation(#[from] ElevationError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    GraphBuild(#[from] GraphBuildError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    RouteEngine(#[from] RouteEngineError),
}
