//! Last good export of every system, kept between runs.
//!
//! A system that is invalid in the current run is served from here instead,
//! provided every cached station is still a station close to where it was.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use crate::builder::is_station;
use crate::config::Config;
use crate::export::SystemExport;
use crate::output::write_json;
use crate::store::{ElementKind, ElementStore};

/// How far a cached station may have moved and still be trusted.
pub const CACHED_STATION_TOLERANCE_M: f64 = 300.0;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ExportCache {
    systems: BTreeMap<String, SystemExport>,
}

impl ExportCache {
    /// Reads a cache file. A missing file is an empty cache.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "No cache yet, starting empty");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read cache {}", path.display()))?;
        let cache: ExportCache = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse cache {}", path.display()))?;
        info!(path = %path.display(), systems = cache.len(), "Cache loaded");
        Ok(cache)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    pub fn get(&self, system: &str) -> Option<&SystemExport> {
        self.systems.get(system)
    }

    /// Replaces the cached export of every system in `exports`.
    pub fn update(&mut self, exports: &[SystemExport]) {
        for export in exports {
            self.systems.insert(export.system.clone(), export.clone());
        }
    }

    /// The cached export of `system`, if the data still backs it.
    pub fn recover(
        &self,
        system: &str,
        store: &ElementStore,
        config: &Config,
    ) -> Option<&SystemExport> {
        let cached = self.systems.get(system)?;
        is_usable(cached, store, config).then_some(cached)
    }
}

fn is_usable(cached: &SystemExport, store: &ElementStore, config: &Config) -> bool {
    cached.stations.iter().all(|station| {
        if station.id.kind != ElementKind::Node {
            return false;
        }
        match store.node(station.id.id) {
            Some(node) if is_station(&node.tags, config) => {
                let moved = node.coord.distance_to(&station.coord);
                if moved > CACHED_STATION_TOLERANCE_M {
                    debug!(system = %cached.system, station = %station.id, moved, "Cached station moved");
                    return false;
                }
                true
            }
            _ => {
                debug!(system = %cached.system, station = %station.id, "Cached station is gone");
                false
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::StationPosition;
    use crate::geo::Coord;
    use crate::store::ElementId;
    use crate::store::fixtures::*;

    fn cached(stations: &[(i64, f64, f64)]) -> SystemExport {
        SystemExport {
            system: "metroville".to_string(),
            stations: stations
                .iter()
                .map(|(id, lon, lat)| StationPosition {
                    id: ElementId::node(*id),
                    coord: Coord::new(*lon, *lat),
                })
                .collect(),
            graph: b"{\"stations\": []}".to_vec(),
            geojson: b"{}".to_vec(),
        }
    }

    #[test]
    fn test_recover_when_stations_still_there() {
        let mut cache = ExportCache::default();
        cache.update(&[cached(&[(1, 0.0, 0.0), (2, 0.01, 0.0)])]);
        let store = ElementStore::from_elements(vec![
            station(1, 0.0, 0.0, "A"),
            station(2, 0.0101, 0.0, "B"),
        ]);
        let config = Config::default();
        assert!(cache.recover("metroville", &store, &config).is_some());
        assert!(cache.recover("smalltown", &store, &config).is_none());
    }

    #[test]
    fn test_moved_or_missing_station_blocks_recovery() {
        let mut cache = ExportCache::default();
        cache.update(&[cached(&[(1, 0.0, 0.0), (2, 0.01, 0.0)])]);
        let config = Config::default();

        let moved = ElementStore::from_elements(vec![
            station(1, 0.0, 0.0, "A"),
            station(2, 0.02, 0.0, "B"),
        ]);
        assert!(cache.recover("metroville", &moved, &config).is_none());

        let retagged = ElementStore::from_elements(vec![
            station(1, 0.0, 0.0, "A"),
            node(2, 0.01, 0.0, &[("railway", "stop")]),
        ]);
        assert!(cache.recover("metroville", &retagged, &config).is_none());

        let gone = ElementStore::from_elements(vec![station(1, 0.0, 0.0, "A")]);
        assert!(cache.recover("metroville", &gone, &config).is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        assert!(ExportCache::load(&path).unwrap().is_empty());

        let mut cache = ExportCache::default();
        cache.update(&[cached(&[(1, 0.0, 0.0)])]);
        cache.save(&path).unwrap();

        let loaded = ExportCache::load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get("metroville"), cache.get("metroville"));
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"n1\""));
    }
}
