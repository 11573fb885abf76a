//! OSM ingester: fetches routable ways and their nodes for a bounding box
//! from an Overpass-style API, or parses a locally supplied `.osm.pbf` file,
//! and reduces either into `(nodes, ways)`.

use std::collections::HashMap;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use quick_xml::events::Event;
use quick_xml::reader::Reader as XmlReader;
use tokio::io::AsyncWriteExt;
use trail_types::BoundingBox;

use crate::config::Config;
use crate::error::IngestError;

/// Disambiguates the 6 kinds of failure `fetch_with_retry` can run out of
/// attempts on: a 4xx other than 429 is terminal (surfaced to the caller
/// immediately, since retrying or trying the fallback endpoint with the
/// same query would fail the same way); everything else is worth trying
/// against the next endpoint.
enum FetchFailure {
    Terminal(IngestError),
    TryNextEndpoint(IngestError),
}

static RESPONSE_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct OsmNode {
    pub id: i64,
    pub lat: f64,
    pub lon: f64,
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct OsmWay {
    pub id: i64,
    pub node_refs: Vec<i64>,
    pub tags: HashMap<String, String>,
}

impl OsmWay {
    pub fn highway(&self) -> Option<&str> {
        self.tags.get("highway").map(String::as_str)
    }
}

pub struct OsmIngester {
    client: reqwest::Client,
    config: Config,
}

impl OsmIngester {
    pub fn new(config: Config) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.network.request_timeout)
            .build()
            .expect("reqwest client");
        Self { client, config }
    }

    /// Fetches routable ways and every node they reference for `bbox`,
    /// including nodes outside the box referenced by boundary-crossing ways.
    pub async fn fetch(
        &self,
        bbox: BoundingBox,
    ) -> Result<(HashMap<i64, OsmNode>, Vec<OsmWay>), IngestError> {
        if !bbox.is_valid() {
            return Err(IngestError::InvalidBoundingBox);
        }
        let area = bbox.area_km2();
        if area > self.config.max_overpass_area_km2 {
            return Err(IngestError::AreaTooLarge(area));
        }

        let query = build_query(bbox, &self.config, self.config.network.overpass_query_timeout_s);
        let response_path = self.fetch_with_fallback(&query).await?;
        let result = parse_xml_file(&response_path, &self.config);
        let _ = std::fs::remove_file(&response_path);
        result
    }

    async fn fetch_with_fallback(&self, query: &str) -> Result<PathBuf, IngestError> {
        let endpoints = [
            &self.config.network.overpass_primary_endpoint,
            &self.config.network.overpass_fallback_endpoint,
        ];
        let mut last_err = None;

        for endpoint in endpoints {
            match self.fetch_with_retry(endpoint, query).await {
                Ok(path) => return Ok(path),
                Err(FetchFailure::Terminal(err)) => return Err(err),
                Err(FetchFailure::TryNextEndpoint(err)) => {
                    tracing::warn!(endpoint = %endpoint, error = %err, "overpass endpoint failed, trying next");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or(IngestError::QueryTimeout))
    }

    /// Returns the path of a temp file holding the response body. A plain
    /// 4xx (other than 429) is terminal: the same query would fail the same
    /// way against the fallback endpoint, so it's surfaced immediately
    /// instead of being retried.
    async fn fetch_with_retry(&self, endpoint: &str, query: &str) -> Result<PathBuf, FetchFailure> {
        let body = format!("data={}", percent_escape(query));
        let mut delay = self.config.retry.base_delay;
        let mut last_err = None;

        for attempt in 0..self.config.retry.max_attempts {
            let response = self
                .client
                .post(endpoint)
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(body.clone())
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return self
                            .stream_to_temp_file(resp)
                            .await
                            .map_err(FetchFailure::TryNextEndpoint);
                    }
                    let code = status.as_u16();
                    if code == 504 {
                        return Err(FetchFailure::TryNextEndpoint(IngestError::QueryTimeout));
                    }
                    if code == 429 {
                        last_err = Some(IngestError::HttpError(code));
                        tokio::time::sleep(self.config.retry.rate_limit_base_delay * 2u32.pow(attempt)).await;
                        continue;
                    }
                    if code < 500 {
                        return Err(FetchFailure::Terminal(IngestError::HttpError(code)));
                    }
                    last_err = Some(IngestError::HttpError(code));
                }
                Err(source) => last_err = Some(IngestError::Network(source)),
            }

            if attempt + 1 < self.config.retry.max_attempts {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }

        Err(FetchFailure::TryNextEndpoint(
            last_err.unwrap_or(IngestError::QueryTimeout),
        ))
    }

    /// Streams the response body straight to disk so peak memory never holds
    /// the full document, which may exceed 100 MB for a large bounding box.
    async fn stream_to_temp_file(&self, response: reqwest::Response) -> Result<PathBuf, IngestError> {
        let tmp_dir = &self.config.paths.overpass_tmp_dir;
        tokio::fs::create_dir_all(tmp_dir).await?;
        let counter = RESPONSE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = tmp_dir.join(format!("overpass-{}-{counter}.xml", std::process::id()));

        let mut file = tokio::fs::File::create(&path).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        Ok(path)
    }
}

fn build_query(bbox: BoundingBox, config: &Config, timeout_s: u64) -> String {
    let highways = config.routable_highways.join("|");
    format!(
        "[out:xml][timeout:{timeout_s}];\nway[\"highway\"~\"^({highways})$\"]({south},{west},{north},{east});\n(._;>;);\nout body;",
        south = bbox.south,
        west = bbox.west,
        north = bbox.north,
        east = bbox.east,
    )
}

/// Percent-escapes everything outside the unreserved set (alphanumerics plus
/// `-._~`); in particular `&`, `=` and `+` are always escaped.
fn percent_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        let is_unreserved = byte.is_ascii_alphanumeric()
            || byte == b'-'
            || byte == b'.'
            || byte == b'_'
            || byte == b'~';
        if is_unreserved {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Opens `path` and streams it into `(nodes, ways)` without reading the
/// whole file into memory first.
fn parse_xml_file(path: &Path, config: &Config) -> Result<(HashMap<i64, OsmNode>, Vec<OsmWay>), IngestError> {
    let file = std::fs::File::open(path)?;
    parse_xml(BufReader::new(file), config)
}

/// Streams an Overpass XML document (or a `.osm.xml` export) into
/// `(nodes, ways)` from any buffered reader, rather than building a DOM,
/// per the streaming-parse requirement.
fn parse_xml<R: std::io::BufRead>(
    reader: R,
    config: &Config,
) -> Result<(HashMap<i64, OsmNode>, Vec<OsmWay>), IngestError> {
    let mut reader = XmlReader::from_reader(reader);
    reader.config_mut().trim_text(true);

    let mut nodes = HashMap::new();
    let mut ways = Vec::new();
    let mut buf = Vec::new();

    let mut current_way: Option<OsmWay> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(e) | Event::Empty(e) => {
                let name = e.name();
                let local = name.as_ref();
                match local {
                    b"node" => {
                        let mut id = None;
                        let mut lat = None;
                        let mut lon = None;
                        for attr in e.attributes().flatten() {
                            match attr.key.as_ref() {
                                b"id" => id = attr_as_i64(&attr.value),
                                b"lat" => lat = attr_as_f64(&attr.value),
                                b"lon" => lon = attr_as_f64(&attr.value),
                                _ => {}
                            }
                        }
                        if let (Some(id), Some(lat), Some(lon)) = (id, lat, lon) {
                            nodes.insert(
                                id,
                                OsmNode {
                                    id,
                                    lat,
                                    lon,
                                    tags: HashMap::new(),
                                },
                            );
                        }
                    }
                    b"way" => {
                        let mut id = None;
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"id" {
                                id = attr_as_i64(&attr.value);
                            }
                        }
                        current_way = id.map(|id| OsmWay {
                            id,
                            node_refs: Vec::new(),
                            tags: HashMap::new(),
                        });
                    }
                    b"nd" => {
                        if let Some(way) = current_way.as_mut() {
                            for attr in e.attributes().flatten() {
                                if attr.key.as_ref() == b"ref" {
                                    if let Some(r) = attr_as_i64(&attr.value) {
                                        way.node_refs.push(r);
                                    }
                                }
                            }
                        }
                    }
                    b"tag" => {
                        let mut k = None;
                        let mut v = None;
                        for attr in e.attributes().flatten() {
                            match attr.key.as_ref() {
                                b"k" => k = Some(String::from_utf8_lossy(&attr.value).into_owned()),
                                b"v" => v = Some(String::from_utf8_lossy(&attr.value).into_owned()),
                                _ => {}
                            }
                        }
                        if let (Some(k), Some(v)) = (k, v) {
                            if let Some(way) = current_way.as_mut() {
                                way.tags.insert(k, v);
                            }
                        }
                    }
                    _ => {}
                }
            }
            Event::End(e) => {
                if e.name().as_ref() == b"way" {
                    if let Some(way) = current_way.take() {
                        if is_routable(&way, config) {
                            ways.push(way);
                        } else {
                            tracing::debug!(way_id = way.id, "skipping non-routable way");
                        }
                    }
                }
            }
            _ => {}
        }
        buf.clear();
    }

    Ok((nodes, ways))
}

fn attr_as_i64(bytes: &[u8]) -> Option<i64> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

fn attr_as_f64(bytes: &[u8]) -> Option<f64> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

/// A way is routable iff it has at least two node refs and its `highway`
/// tag is in the configured set (`construction` is always excluded).
pub fn is_routable(way: &OsmWay, config: &Config) -> bool {
    way.node_refs.len() >= 2
        && way
            .highway()
            .map(|h| config.is_routable_highway(h))
            .unwrap_or(false)
}

/// Reduces a pre-decoded node/way map (e.g. from `pbf::decode_pbf`) the same
/// way the XML path does: filter to routable ways only.
pub fn filter_routable(
    nodes: HashMap<i64, OsmNode>,
    ways: Vec<OsmWay>,
    config: &Config,
) -> (HashMap<i64, OsmNode>, Vec<OsmWay>) {
    let routable: Vec<OsmWay> = ways.into_iter().filter(|w| is_routable(w, config)).collect();
    (nodes, routable)
}

#[allow(dead_code)]
fn rate_limit_backoff_schedule(base: Duration, attempts: u32) -> Vec<Duration> {
    (0..attempts).map(|i| base * 2u32.pow(i)).collect()
}
