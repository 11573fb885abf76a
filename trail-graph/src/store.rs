//! Routing store: a single-file SQLite database holding one routing graph.
//! Bulk-load is destructive-create, one transaction, indexes after.

use rusqlite::{params, Connection, OptionalExtension};
use trail_types::Coordinate;

use crate::error::StoreError;
use crate::geometry::{haversine_m, pack_geometry, unpack_geometry};

pub const SCHEMA_VERSION: &str = "1";

#[derive(Debug, Clone)]
pub struct NodeRow {
    pub id: i64,
    pub lat: f64,
    pub lon: f64,
    pub elevation: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct EdgeRow {
    pub from_node: i64,
    pub to_node: i64,
    pub distance_m: f64,
    pub elevation_gain_m: f64,
    pub elevation_loss_m: f64,
    pub surface: Option<String>,
    pub highway_type: Option<String>,
    pub sac_scale: Option<String>,
    pub trail_visibility: Option<String>,
    pub name: Option<String>,
    pub osm_way_id: i64,
    pub cost: f64,
    pub reverse_cost: f64,
    pub is_oneway: bool,
    pub geometry: Vec<Coordinate>,
}

#[derive(Debug, Clone)]
pub struct AdjacentEdge {
    pub edge_id: i64,
    pub to_node: i64,
    pub forward_cost: f64,
    pub distance_m: f64,
}

/// A routing database during bulk load: destructive create, one transaction,
/// indexes created only after the load commits.
pub struct StoreWriter {
    conn: Connection,
}

impl StoreWriter {
    /// Removes any existing file at `path` and opens a fresh database with
    /// the three-table schema.
    pub fn create(path: &std::path::Path) -> Result<Self, StoreError> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE routing_nodes (
                id INTEGER PRIMARY KEY,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                elevation REAL
            );
            CREATE TABLE routing_edges (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                from_node INTEGER NOT NULL,
                to_node INTEGER NOT NULL,
                distance REAL NOT NULL,
                elevation_gain REAL NOT NULL,
                elevation_loss REAL NOT NULL,
                surface TEXT,
                highway_type TEXT,
                sac_scale TEXT,
                trail_visibility TEXT,
                name TEXT,
                osm_way_id INTEGER NOT NULL,
                cost REAL NOT NULL,
                reverse_cost REAL NOT NULL,
                is_oneway INTEGER NOT NULL,
                geometry BLOB
            );
            CREATE TABLE routing_metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(Self { conn })
    }

    /// Loads all nodes, edges and metadata inside a single transaction.
    /// Rolls back (dropping the transaction without commit) on any error.
    pub fn bulk_load(
        &mut self,
        nodes: &[NodeRow],
        edges: &[EdgeRow],
        metadata: &[(String, String)],
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        {
            let mut insert_node =
                tx.prepare("INSERT INTO routing_nodes (id, latitude, longitude, elevation) VALUES (?1, ?2, ?3, ?4)")?;
            for node in nodes {
                insert_node.execute(params![node.id, node.lat, node.lon, node.elevation])?;
            }
        }
        {
            let mut insert_edge = tx.prepare(
                "INSERT INTO routing_edges
                 (from_node, to_node, distance, elevation_gain, elevation_loss, surface,
                  highway_type, sac_scale, trail_visibility, name, osm_way_id, cost,
                  reverse_cost, is_oneway, geometry)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            )?;
            for edge in edges {
                let geometry_bytes = pack_geometry(&edge.geometry);
                insert_edge.execute(params![
                    edge.from_node,
                    edge.to_node,
                    edge.distance_m,
                    edge.elevation_gain_m,
                    edge.elevation_loss_m,
                    edge.surface.clone(),
                    edge.highway_type.clone(),
                    edge.sac_scale.clone(),
                    edge.trail_visibility.clone(),
                    edge.name.clone(),
                    edge.osm_way_id,
                    edge.cost,
                    edge.reverse_cost,
                    edge.is_oneway as i64,
                    geometry_bytes,
                ])?;
            }
        }
        {
            let mut insert_meta =
                tx.prepare("INSERT INTO routing_metadata (key, value) VALUES (?1, ?2)")?;
            for (key, value) in metadata {
                insert_meta.execute(params![key.clone(), value.clone()])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Creates the post-load indexes. Must run after `bulk_load` commits.
    pub fn create_indexes(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "CREATE INDEX idx_routing_nodes_latlon ON routing_nodes (latitude, longitude);
             CREATE INDEX idx_routing_edges_from ON routing_edges (from_node);
             CREATE INDEX idx_routing_edges_to ON routing_edges (to_node);",
        )?;
        Ok(())
    }

    pub fn into_reader(self) -> StoreReader {
        StoreReader { conn: self.conn }
    }
}

/// A read-only handle onto a previously built routing database.
pub struct StoreReader {
    conn: Connection,
}

impl StoreReader {
    pub fn open(path: &std::path::Path) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(path, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Self { conn })
    }

    pub fn metadata(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM routing_metadata WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Bounding-square pre-filter on the indexed `(latitude, longitude)`
    /// columns, then an exact Haversine sort over the candidates.
    pub fn nearest_node(&self, coord: Coordinate, radius_m: f64) -> Result<i64, StoreError> {
        let lat_delta = radius_m / 111_320.0;
        let lon_delta = radius_m / (111_320.0 * coord.lat.to_radians().cos().max(1e-6));

        let mut stmt = self.conn.prepare(
            "SELECT id, latitude, longitude FROM routing_nodes
             WHERE latitude BETWEEN ?1 AND ?2 AND longitude BETWEEN ?3 AND ?4",
        )?;
        let candidates = stmt.query_map(
            params![
                coord.lat - lat_delta,
                coord.lat + lat_delta,
                coord.lon - lon_delta,
                coord.lon + lon_delta,
            ],
            |row| {
                let id: i64 = row.get(0)?;
                let lat: f64 = row.get(1)?;
                let lon: f64 = row.get(2)?;
                Ok((id, lat, lon))
            },
        )?;

        let mut best: Option<(i64, f64)> = None;
        for candidate in candidates {
            let (id, lat, lon) = candidate?;
            let distance = haversine_m(coord, Coordinate::new(lat, lon));
            if distance <= radius_m && best.map(|(_, d)| distance < d).unwrap_or(true) {
                best = Some((id, distance));
            }
        }

        best.map(|(id, _)| id).ok_or(StoreError::NoNearbyNode)
    }

    pub fn node_coordinate(&self, node_id: i64) -> Result<Coordinate, StoreError> {
        self.conn
            .query_row(
                "SELECT latitude, longitude FROM routing_nodes WHERE id = ?1",
                params![node_id],
                |row| Ok(Coordinate::new(row.get(0)?, row.get(1)?)),
            )
            .map_err(StoreError::from)
    }

    pub fn adjacency(&self, from_node: i64) -> Result<Vec<AdjacentEdge>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, to_node, cost, distance FROM routing_edges
             WHERE from_node = ?1 AND cost < 1e300",
        )?;
        let rows = stmt.query_map(params![from_node], |row| {
            Ok(AdjacentEdge {
                edge_id: row.get(0)?,
                to_node: row.get(1)?,
                forward_cost: row.get(2)?,
                distance_m: row.get(3)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    pub fn reverse_adjacency(&self, to_node: i64) -> Result<Vec<AdjacentEdge>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, from_node, reverse_cost, distance FROM routing_edges
             WHERE to_node = ?1 AND reverse_cost < 1e300",
        )?;
        let rows = stmt.query_map(params![to_node], |row| {
            Ok(AdjacentEdge {
                edge_id: row.get(0)?,
                to_node: row.get(1)?,
                forward_cost: row.get(2)?,
                distance_m: row.get(3)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    pub fn edge_geometry(&self, edge_id: i64) -> Result<Vec<Coordinate>, StoreError> {
        let bytes: Vec<u8> = self.conn.query_row(
            "SELECT geometry FROM routing_edges WHERE id = ?1",
            params![edge_id],
            |row| row.get(0),
        )?;
        Ok(unpack_geometry(&bytes))
    }

    pub fn edge_name(&self, edge_id: i64) -> Result<Option<String>, StoreError> {
        self.conn
            .query_row(
                "SELECT name FROM routing_edges WHERE id = ?1",
                params![edge_id],
                |row| row.get(0),
            )
            .map_err(StoreError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_nodes() -> Vec<NodeRow> {
        vec![
            NodeRow { id: 1, lat: 47.0, lon: 11.0, elevation: Some(1000.0) },
            NodeRow { id: 2, lat: 47.001, lon: 11.001, elevation: Some(1010.0) },
        ]
    }

    fn sample_edges() -> Vec<EdgeRow> {
        vec![EdgeRow {
            from_node: 1,
            to_node: 2,
            distance_m: 140.0,
            elevation_gain_m: 10.0,
            elevation_loss_m: 0.0,
            surface: Some("dirt".into()),
            highway_type: Some("path".into()),
            sac_scale: None,
            trail_visibility: None,
            name: Some("Sentier".into()),
            osm_way_id: 99,
            cost: 228.0,
            reverse_cost: 140.0,
            is_oneway: false,
            geometry: vec![],
        }]
    }

    #[test]
    fn bulk_load_then_nearest_node_and_adjacency_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("routing.sqlite");
        let mut writer = StoreWriter::create(&path).unwrap();
        writer
            .bulk_load(
                &sample_nodes(),
                &sample_edges(),
                &[("version".into(), SCHEMA_VERSION.into())],
            )
            .unwrap();
        writer.create_indexes().unwrap();
        let reader = writer.into_reader();

        assert_eq!(reader.metadata("version").unwrap(), Some("1".to_string()));

        let nearest = reader
            .nearest_node(Coordinate::new(47.0001, 11.0001), 500.0)
            .unwrap();
        assert_eq!(nearest, 1);

        let adj = reader.adjacency(1).unwrap();
        assert_eq!(adj.len(), 1);
        assert_eq!(adj[0].to_node, 2);
    }

    #[test]
    fn nearest_node_fails_outside_radius() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("routing.sqlite");
        let mut writer = StoreWriter::create(&path).unwrap();
        writer
            .bulk_load(&sample_nodes(), &[], &[])
            .unwrap();
        let reader = writer.into_reader();
        let result = reader.nearest_node(Coordinate::new(10.0, 10.0), 500.0);
        assert!(matches!(result, Err(StoreError::NoNearbyNode)));
    }

    #[test]
    fn create_is_destructive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("routing.sqlite");
        std::fs::write(&path, b"not a database").unwrap();
        let writer = StoreWriter::create(&path).unwrap();
        drop(writer);
        assert!(path.exists());
    }
}
