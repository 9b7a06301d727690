//! Stage orchestration: build, validate, partition, export, report.

use anyhow::Result;
use tracing::info;

use crate::builder::build_network;
use crate::cache::ExportCache;
use crate::config::Config;
use crate::export::geojson::unused_entrances;
use crate::export::{Exportable, SystemExport, export_systems};
use crate::partition::partition_systems;
use crate::registry::Registry;
use crate::report::{ValidationLog, build_log};
use crate::stats::SystemStats;
use crate::store::ElementStore;
use crate::validator::validate_routes;

/// Everything a run produces, still in memory.
#[derive(Debug)]
pub struct Outcome {
    pub log: ValidationLog,
    pub exports: Vec<SystemExport>,
    pub stats: Vec<SystemStats>,
    pub unused_entrances: Vec<u8>,
    /// Systems served from the export cache because they are invalid now.
    pub recovered: Vec<String>,
}

/// Runs every stage over a loaded store. Fails only on an invalid config;
/// defects in the data become issues in the log.
#[tracing::instrument(skip_all, fields(elements = store.len()))]
pub fn run(store: &ElementStore, registry: &Registry, config: &Config) -> Result<Outcome> {
    config.validate()?;

    let built = build_network(store, config);
    let network = built.network;

    let verdicts = validate_routes(&network, config);
    let exportable = Exportable::from_verdicts(&verdicts, network.routes.len());
    let mut issues = built.issues;
    issues.extend(verdicts.into_iter().flat_map(|v| v.issues));

    let mut partition = partition_systems(&network, issues, registry, config);
    let exports = export_systems(&network, &mut partition.systems, &exportable, config);

    let snapshot = store.snapshot();
    let stats = partition
        .systems
        .iter()
        .map(|s| SystemStats::from_system(&network, s, &exportable, snapshot))
        .collect();
    let log = build_log(&network, &partition, snapshot);
    let unused_entrances = unused_entrances(&network)?;

    info!(
        systems = log.systems.len(),
        exported = exports.len(),
        "Run complete"
    );
    Ok(Outcome {
        log,
        exports,
        stats,
        unused_entrances,
        recovered: Vec::new(),
    })
}

/// Like [`run`], but refreshes `cache` with this run's exports and falls
/// back to it for systems that are invalid now.
pub fn run_cached(
    store: &ElementStore,
    registry: &Registry,
    config: &Config,
    cache: &mut ExportCache,
) -> Result<Outcome> {
    let mut outcome = run(store, registry, config)?;
    cache.update(&outcome.exports);

    for system in outcome.log.systems.iter().filter(|s| !s.valid) {
        if let Some(export) = cache.recover(&system.id, store, config) {
            info!(system = %system.id, "Taking system from cache");
            outcome.exports.push(export.clone());
            outcome.recovered.push(system.id.clone());
        }
    }

    let order: Vec<&str> = outcome.log.systems.iter().map(|s| s.id.as_str()).collect();
    outcome
        .exports
        .sort_by_key(|e| order.iter().position(|id| *id == e.system));
    Ok(outcome)
}

/// Builds the network only and returns the unused-entrances GeoJSON.
pub fn entrances_only(store: &ElementStore, config: &Config) -> Result<Vec<u8>> {
    config.validate()?;
    let built = build_network(store, config);
    Ok(unused_entrances(&built.network)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fixtures::*;

    #[test]
    fn test_invalid_config_fails_fast() {
        let store = ElementStore::from_elements(vec![station(1, 0.0, 0.0, "A")]);
        let config = Config {
            min_stops: 0,
            ..Default::default()
        };
        let err = run(&store, &Registry::default(), &config).unwrap_err();
        assert!(err.to_string().contains("min_stops"));
    }

    #[test]
    fn test_isolated_station_is_reported_and_exported() {
        let store = ElementStore::from_elements(vec![station(1, 0.0, 0.0, "A")]);
        let outcome = run(&store, &Registry::default(), &Config::default()).unwrap();
        assert_eq!(outcome.log.systems.len(), 1);
        assert!(outcome.log.systems[0].valid);
        assert_eq!(outcome.exports.len(), 1);
        assert_eq!(outcome.stats.len(), 1);
    }

    // A -- B on one track; `broken` cuts the route down to a single stop.
    fn two_stations(broken: bool) -> ElementStore {
        let stops: &[(crate::store::ElementId, &str)] = if broken {
            &[(n(1), "stop")]
        } else {
            &[(n(1), "stop"), (w(21), ""), (n(2), "stop")]
        };
        ElementStore::from_elements(vec![
            station(1, 0.0, 0.0, "A"),
            station(2, 0.01, 0.0, "B"),
            node(11, 0.0, 0.0, &[]),
            node(12, 0.01, 0.0, &[]),
            rail(21, &[11, 12]),
            route(100, stops, "1"),
        ])
    }

    #[test]
    fn test_invalid_system_served_from_cache() {
        let registry = Registry::default();
        let config = Config::default();
        let mut cache = ExportCache::default();

        let good = run_cached(&two_stations(false), &registry, &config, &mut cache).unwrap();
        assert_eq!(good.exports.len(), 1);
        assert!(good.recovered.is_empty());
        assert!(cache.get("unidentified-n1").is_some());

        let bad = run_cached(&two_stations(true), &registry, &config, &mut cache).unwrap();
        let lead = bad.log.system("unidentified-n1").unwrap();
        assert!(!lead.valid);
        assert_eq!(bad.recovered, vec!["unidentified-n1"]);
        let served = bad
            .exports
            .iter()
            .find(|e| e.system == "unidentified-n1")
            .unwrap();
        assert_eq!(served.graph, good.exports[0].graph);
    }

    #[test]
    fn test_cache_ignored_without_entry() {
        let mut cache = ExportCache::default();
        let outcome = run_cached(
            &two_stations(true),
            &Registry::default(),
            &Config::default(),
            &mut cache,
        )
        .unwrap();
        assert!(outcome.recovered.is_empty());
        assert!(outcome.exports.iter().all(|e| e.system != "unidentified-n1"));
    }

    #[test]
    fn test_empty_input() {
        let store = ElementStore::default();
        let outcome = run(&store, &Registry::default(), &Config::default()).unwrap();
        assert!(outcome.log.systems.is_empty());
        assert!(outcome.exports.is_empty());
        assert_eq!(outcome.log.totals.total(), 0);
    }
}
