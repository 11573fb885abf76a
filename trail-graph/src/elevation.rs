//! Elevation store: downloads, caches and interpolates 1°×1° HGT tiles.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lru::LruCache;
use tokio::io::AsyncWriteExt;
use trail_types::{BoundingBox, Coordinate};

use crate::config::Config;
use crate::error::ElevationError;
use crate::gzip;
use crate::hgt::{tile_name, HgtTile, TILE_BYTES};

pub struct ElevationStore {
    client: reqwest::Client,
    config: Config,
    memory_cache: LruCache<String, HgtTile>,
}

impl ElevationStore {
    pub fn new(config: Config) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.network.request_timeout)
            .build()
            .expect("reqwest client");
        let cache_size = NonZeroUsize::new(config.tile_cache_size.max(1)).unwrap();
        Self {
            client,
            config,
            memory_cache: LruCache::new(cache_size),
        }
    }

    pub async fn elevation(&mut self, coord: Coordinate) -> Result<Option<f64>, ElevationError> {
        let name = tile_name(coord.lat, coord.lon);
        let tile = self.load_tile(&name).await?;
        Ok(tile.interpolate(coord.lat, coord.lon))
    }

    /// Groups coordinates by tile so each tile loads at most once, preserving
    /// input order in the output. Per-tile load failures degrade to `None`
    /// for that coordinate rather than failing the whole batch.
    pub async fn elevations(&mut self, coords: &[Coordinate]) -> Vec<Option<f64>> {
        let mut by_tile: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, c) in coords.iter().enumerate() {
            by_tile.entry(tile_name(c.lat, c.lon)).or_default().push(i);
        }

        let mut out = vec![None; coords.len()];
        for (name, indices) in by_tile {
            match self.load_tile(&name).await {
                Ok(tile) => {
                    for i in indices {
                        out[i] = tile.interpolate(coords[i].lat, coords[i].lon);
                    }
                }
                Err(err) => {
                    tracing::warn!(tile = %name, error = %err, "elevation tile load failed, leaving batch entries absent");
                }
            }
        }
        out
    }

    pub async fn prefetch(
        &mut self,
        bbox: BoundingBox,
        mut progress_cb: impl FnMut(usize, usize),
    ) -> Result<(), ElevationError> {
        let tiles = bbox.covering_tile_corners();
        let total = tiles.len();
        for (i, (lat_sw, lon_sw)) in tiles.into_iter().enumerate() {
            let name = crate::hgt::tile_name_for_corner(lat_sw, lon_sw);
            self.load_tile(&name).await?;
            progress_cb(i + 1, total);
        }
        Ok(())
    }

    pub fn clear_cache(&mut self) {
        self.memory_cache.clear();
        if self.config.paths.tile_cache_dir.exists() {
            let _ = std::fs::remove_dir_all(&self.config.paths.tile_cache_dir);
        }
    }

    async fn load_tile(&mut self, name: &str) -> Result<HgtTile, ElevationError> {
        if let Some(tile) = self.memory_cache.get(name) {
            return Ok(tile.clone());
        }

        let (lat_sw, lon_sw) = crate::hgt::parse_tile_name(name)
            .ok_or_else(|| ElevationError::InvalidTileName(name.to_string()))?;

        let disk_path = self.disk_path(name);
        let bytes = if disk_path.exists() {
            tokio::fs::read(&disk_path)
                .await
                .map_err(|source| ElevationError::Io {
                    tile: name.to_string(),
                    source,
                })?
        } else {
            let bytes = self.download(name).await?;
            write_cache_atomically(&disk_path, &bytes)
                .await
                .map_err(|source| ElevationError::Io {
                    tile: name.to_string(),
                    source,
                })?;
            bytes
        };

        let tile = HgtTile::from_raw_bytes(name, lat_sw, lon_sw, &bytes)?;
        self.memory_cache.put(name.to_string(), tile.clone());
        Ok(tile)
    }

    fn disk_path(&self, name: &str) -> PathBuf {
        self.config.paths.tile_cache_dir.join(format!("{name}.hgt"))
    }

    async fn download(&self, name: &str) -> Result<Vec<u8>, ElevationError> {
        let primary = format!(
            "{}/{}/{}.hgt.gz",
            self.config.network.elevation_primary_base,
            &name[..3],
            name
        );
        match self.download_with_retry(name, &primary, true).await {
            Ok(bytes) => Ok(bytes),
            Err(err) => {
                tracing::warn!(tile = %name, error = %err, "primary elevation source failed, trying fallback");
                let fallback = format!("{}/{}.hgt", self.config.network.elevation_fallback_base, name);
                self.download_with_retry(name, &fallback, false).await
            }
        }
    }

    async fn download_with_retry(
        &self,
        name: &str,
        url: &str,
        gzipped: bool,
    ) -> Result<Vec<u8>, ElevationError> {
        let mut delay = self.config.retry.base_delay;
        let mut last_err = None;

        for attempt in 0..self.config.retry.max_attempts {
            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let body = response.bytes().await.map_err(|source| {
                            ElevationError::DownloadFailed {
                                tile: name.to_string(),
                                source,
                            }
                        })?;
                        let raw = if gzipped {
                            gzip::decompress(&body).map_err(|e| ElevationError::InvalidTileData {
                                tile: name.to_string(),
                                detail: e.to_string(),
                            })?
                        } else {
                            body.to_vec()
                        };
                        if raw.len() != TILE_BYTES {
                            return Err(ElevationError::InvalidTileData {
                                tile: name.to_string(),
                                detail: format!("expected {TILE_BYTES} bytes, got {}", raw.len()),
                            });
                        }
                        return Ok(raw);
                    }
                    if status.as_u16() < 500 {
                        return Err(ElevationError::HttpError {
                            tile: name.to_string(),
                            status: status.as_u16(),
                        });
                    }
                    last_err = Some(ElevationError::HttpError {
                        tile: name.to_string(),
                        status: status.as_u16(),
                    });
                }
                Err(source) => {
                    last_err = Some(ElevationError::DownloadFailed {
                        tile: name.to_string(),
                        source,
                    });
                }
            }

            if attempt + 1 < self.config.retry.max_attempts {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }

        Err(last_err.unwrap_or(ElevationError::InvalidTileName(name.to_string())))
    }
}

/// Writes `bytes` to `path` via a same-directory temp file, fsync, then
/// rename, so a crash or disk-full error mid-write never leaves a
/// truncated file at `path` for a later run to mistake for a good tile.
async fn write_cache_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "cache path has no parent directory")
    })?;
    tokio::fs::create_dir_all(parent).await?;

    let file_name = path
        .file_name()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "cache path has no file name"))?
        .to_string_lossy()
        .into_owned();
    let tmp_path = parent.join(format!(".{file_name}.tmp-{}", std::process::id()));

    let mut file = tokio::fs::File::create(&tmp_path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, path).await
}

#[allow(dead_code)]
fn backoff_schedule(base: Duration, attempts: u32) -> Vec<Duration> {
    (0..attempts).map(|i| base * 2u32.pow(i)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_doubles_each_attempt() {
        let schedule = backoff_schedule(Duration::from_secs(2), 4);
        assert_eq!(
            schedule,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(16)
            ]
        );
    }
}
