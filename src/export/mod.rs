//! Per-system exports: routing graph JSON and GeoJSON geometry.
//!
//! Systems are exported in parallel. A failing system gets an
//! `ExportFailed` issue and the others carry on.

pub mod geojson;
pub mod graph;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::geo::Coord;
use crate::issues::{EntityRef, Issue, IssueKind};
use crate::model::{Network, RouteId, RouteMember, SegmentId, StationId};
use crate::partition::System;
use crate::store::ElementId;
use crate::validator::{RouteVerdict, orient_run};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("route {element} has only {positions} distinct position(s)")]
    DegenerateGeometry {
        subject: EntityRef,
        element: ElementId,
        positions: usize,
    },
    #[error("{element} has an invalid coordinate ({lon}, {lat})")]
    InvalidCoordinate {
        subject: EntityRef,
        element: ElementId,
        lon: f64,
        lat: f64,
    },
    #[error("failed to serialize export: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ExportError {
    pub fn subject(&self) -> Option<EntityRef> {
        match self {
            ExportError::DegenerateGeometry { subject, .. }
            | ExportError::InvalidCoordinate { subject, .. } => Some(*subject),
            ExportError::Serialize(_) => None,
        }
    }
}

/// Serialized exports of one system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemExport {
    pub system: String,
    /// Station elements and where they stood when exported.
    pub stations: Vec<StationPosition>,
    #[serde(with = "utf8")]
    pub graph: Vec<u8>,
    #[serde(with = "utf8")]
    pub geojson: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationPosition {
    pub id: ElementId,
    pub coord: Coord,
}

// Export documents are JSON text; keep them readable inside the cache file.
mod utf8 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        let text = std::str::from_utf8(bytes).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        Ok(String::deserialize(deserializer)?.into_bytes())
    }
}

/// Per-route exportability, indexed by [`RouteId`].
#[derive(Debug, Clone)]
pub struct Exportable(Vec<bool>);

impl Exportable {
    pub fn from_verdicts(verdicts: &[RouteVerdict], routes: usize) -> Self {
        let mut flags = vec![false; routes];
        for v in verdicts {
            flags[v.route.0] = v.exportable;
        }
        Self(flags)
    }

    pub fn contains(&self, route: RouteId) -> bool {
        self.0.get(route.0).copied().unwrap_or(false)
    }
}

/// Exports every valid system and records export issues on the systems.
#[tracing::instrument(skip_all, fields(systems = systems.len()))]
pub fn export_systems(
    network: &Network<'_>,
    systems: &mut [System],
    exportable: &Exportable,
    config: &Config,
) -> Vec<SystemExport> {
    for system in systems.iter_mut() {
        if system.routes.is_empty() || system.routes.iter().any(|r| exportable.contains(*r)) {
            continue;
        }
        let lead = system
            .stations
            .first()
            .map(|s| EntityRef::Station(*s))
            .unwrap_or(EntityRef::Route(system.routes[0]));
        let excluded = system.routes.len();
        system.issues.push(Issue::new(
            IssueKind::NoExportableRoutes,
            vec![lead],
            format!("All {excluded} route(s) of system {} were excluded from export", system.id),
        ));
    }

    let selected: Vec<usize> = systems
        .iter()
        .enumerate()
        .filter(|(_, s)| {
            let invalid = s.issues.iter().any(|i| i.kind.invalidates_system());
            let wanted = config.include_unmatched || s.is_matched();
            if !wanted {
                debug!(system = %s.id, "Skipping unmatched system");
            }
            !invalid && wanted
        })
        .map(|(i, _)| i)
        .collect();

    let shared: &[System] = systems;
    let results: Vec<(usize, Result<SystemExport, ExportError>)> = selected
        .par_iter()
        .map(|i| (*i, export_system(network, &shared[*i], exportable, config)))
        .collect();

    let mut exports = Vec::with_capacity(results.len());
    for (i, result) in results {
        match result {
            Ok(export) => exports.push(export),
            Err(e) => {
                let system = &mut systems[i];
                warn!(system = %system.id, error = %e, "Export failed");
                let subject = e
                    .subject()
                    .or_else(|| system.stations.first().map(|s| EntityRef::Station(*s)))
                    .or_else(|| system.routes.first().map(|r| EntityRef::Route(*r)));
                system.issues.push(Issue::new(
                    IssueKind::ExportFailed,
                    subject.into_iter().collect(),
                    format!("Export of system {} failed: {e}", system.id),
                ));
            }
        }
    }

    info!(exported = exports.len(), selected = selected.len(), "Systems exported");
    exports
}

pub fn export_system(
    network: &Network<'_>,
    system: &System,
    exportable: &Exportable,
    config: &Config,
) -> Result<SystemExport, ExportError> {
    check_coordinates(network, system)?;
    let routes: Vec<RouteId> = system
        .routes
        .iter()
        .copied()
        .filter(|r| exportable.contains(*r))
        .collect();
    let lines = routes
        .iter()
        .map(|r| {
            let line = if config.crude_geometry {
                stop_line(network, *r)
            } else {
                route_line(network, *r)
            };
            check_line(network, *r, &line)?;
            Ok((*r, line))
        })
        .collect::<Result<Vec<_>, ExportError>>()?;

    let graph = graph::build_graph(network, system, &routes);
    let collection = geojson::system_features(network, system, &lines);
    let stations = system
        .stations
        .iter()
        .map(|s| {
            let station = network.station(*s);
            StationPosition {
                id: station.element(),
                coord: station.coord(),
            }
        })
        .collect();
    Ok(SystemExport {
        system: system.id.clone(),
        stations,
        graph: serde_json::to_vec_pretty(&graph)?,
        geojson: serde_json::to_vec_pretty(&collection)?,
    })
}

fn check_coordinates(network: &Network<'_>, system: &System) -> Result<(), ExportError> {
    let points = system
        .stations
        .iter()
        .map(|s| EntityRef::Station(*s))
        .chain(system.entrances.iter().map(|e| EntityRef::Entrance(*e)))
        .chain(system.segments.iter().map(|s| EntityRef::Segment(*s)));
    for subject in points {
        if let Some(bad) = network.coords_of(subject).into_iter().find(|c| !c.is_valid()) {
            return Err(ExportError::InvalidCoordinate {
                subject,
                element: network.element_of(subject),
                lon: bad.lon,
                lat: bad.lat,
            });
        }
    }
    Ok(())
}

fn check_line(network: &Network<'_>, route: RouteId, line: &[Coord]) -> Result<(), ExportError> {
    let mut distinct: Vec<[u64; 2]> = line
        .iter()
        .map(|c| [c.lon.to_bits(), c.lat.to_bits()])
        .collect();
    distinct.sort();
    distinct.dedup();
    if distinct.len() < 2 {
        let subject = EntityRef::Route(route);
        return Err(ExportError::DegenerateGeometry {
            subject,
            element: network.element_of(subject),
            positions: distinct.len(),
        });
    }
    Ok(())
}

/// The stretch of a route between two consecutive stops.
#[derive(Debug, Clone, PartialEq)]
pub struct Leg {
    pub from: StationId,
    pub to: StationId,
    pub segments: Vec<SegmentId>,
    /// Station to station, following the tracks where they are known.
    pub geometry: Vec<Coord>,
}

impl Leg {
    pub fn length_m(&self) -> f64 {
        self.geometry
            .windows(2)
            .map(|w| w[0].distance_to(&w[1]))
            .sum()
    }
}

pub fn route_legs(network: &Network<'_>, route: RouteId) -> Vec<Leg> {
    let mut legs = Vec::new();
    let mut current: Option<StationId> = None;
    let mut pending: Vec<SegmentId> = Vec::new();
    for member in &network.route(route).members {
        match member {
            RouteMember::Track(s) => pending.push(*s),
            RouteMember::Stop(to) => {
                if let Some(from) = current {
                    let segments = std::mem::take(&mut pending);
                    let geometry = leg_geometry(network, from, *to, &segments);
                    legs.push(Leg {
                        from,
                        to: *to,
                        segments,
                        geometry,
                    });
                }
                pending.clear();
                current = Some(*to);
            }
        }
    }
    legs
}

fn leg_geometry(
    network: &Network<'_>,
    from: StationId,
    to: StationId,
    segments: &[SegmentId],
) -> Vec<Coord> {
    let start = network.station(from).coord();
    let end = network.station(to).coord();
    let mut coords = vec![start];
    for o in orient_run(network, segments, Some(start), Some(end)) {
        let track = &network.segment(o.id).coords;
        if o.reversed {
            extend_dedup(&mut coords, track.iter().rev().copied());
        } else {
            extend_dedup(&mut coords, track.iter().copied());
        }
    }
    extend_dedup(&mut coords, [end]);
    coords
}

/// Full line of a route, joining its legs.
pub fn route_line(network: &Network<'_>, route: RouteId) -> Vec<Coord> {
    let mut line = Vec::new();
    for leg in route_legs(network, route) {
        extend_dedup(&mut line, leg.geometry);
    }
    if line.is_empty() {
        line = stop_line(network, route);
    }
    line
}

/// Straight lines from stop to stop, ignoring track geometry.
pub fn stop_line(network: &Network<'_>, route: RouteId) -> Vec<Coord> {
    let mut line = Vec::new();
    extend_dedup(
        &mut line,
        network
            .route(route)
            .stops()
            .map(|s| network.station(s).coord()),
    );
    line
}

fn extend_dedup<I: IntoIterator<Item = Coord>>(coords: &mut Vec<Coord>, more: I) {
    for c in more {
        if coords.last() != Some(&c) {
            coords.push(c);
        }
    }
}

/// Rounds metres to one decimal so outputs stay stable and readable.
pub(crate) fn round_m(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_network;
    use crate::partition::partition_systems;
    use crate::registry::Registry;
    use crate::store::fixtures::*;
    use crate::store::{Element, ElementStore};
    use crate::validator::validate_routes;

    fn line() -> Vec<Element> {
        vec![
            station(1, 0.0, 0.0, "A"),
            station(2, 0.01, 0.0, "B"),
            station(3, 0.02, 0.0, "C"),
            node(11, 0.0, 0.0, &[]),
            node(12, 0.005, 0.001, &[]),
            node(13, 0.01, 0.0, &[]),
            node(14, 0.02, 0.0, &[]),
            rail(21, &[11, 12, 13]),
            rail(22, &[14, 13]),
            route(
                100,
                &[(n(1), "stop"), (w(21), ""), (n(2), "stop"), (w(22), ""), (n(3), "stop")],
                "1",
            ),
        ]
    }

    fn run(elements: Vec<Element>, config: &Config) -> (Vec<System>, Vec<SystemExport>) {
        let store = ElementStore::from_elements(elements);
        let built = build_network(&store, config);
        let verdicts = validate_routes(&built.network, config);
        let exportable = Exportable::from_verdicts(&verdicts, built.network.routes.len());
        let mut issues = built.issues;
        issues.extend(verdicts.into_iter().flat_map(|v| v.issues));
        let mut partition = partition_systems(&built.network, issues, &Registry::default(), config);
        let exports = export_systems(&built.network, &mut partition.systems, &exportable, config);
        (partition.systems, exports)
    }

    #[test]
    fn test_legs_follow_tracks_in_travel_order() {
        let store = ElementStore::from_elements(line());
        let built = build_network(&store, &Config::default());
        let legs = route_legs(&built.network, RouteId(0));
        assert_eq!(legs.len(), 2);
        assert_eq!(legs[0].geometry.len(), 3);
        assert_eq!(legs[0].geometry[1], Coord::new(0.005, 0.001));
        // Way 22 is drawn against travel direction.
        assert_eq!(
            legs[1].geometry,
            vec![Coord::new(0.01, 0.0), Coord::new(0.02, 0.0)]
        );
        assert!(legs[1].length_m() > 1100.0 && legs[1].length_m() < 1120.0);
    }

    #[test]
    fn test_crude_geometry_joins_stops_directly() {
        let config = Config {
            crude_geometry: true,
            ..Default::default()
        };
        let (_, exports) = run(line(), &config);
        let value: serde_json::Value = serde_json::from_slice(&exports[0].geojson).unwrap();
        let route = value["features"]
            .as_array()
            .unwrap()
            .iter()
            .find(|f| f["geometry"]["type"] == "LineString")
            .unwrap();
        assert_eq!(
            route["geometry"]["coordinates"],
            serde_json::json!([[0.0, 0.0], [0.01, 0.0], [0.02, 0.0]])
        );

        let (_, tracked) = run(line(), &Config::default());
        assert_ne!(tracked[0].geojson, exports[0].geojson);
    }

    #[test]
    fn test_export_records_station_positions() {
        let (_, exports) = run(line(), &Config::default());
        let ids: Vec<String> = exports[0].stations.iter().map(|s| s.id.to_string()).collect();
        assert_eq!(ids, vec!["n1", "n2", "n3"]);
        assert_eq!(exports[0].stations[1].coord, Coord::new(0.01, 0.0));
    }

    #[test]
    fn test_route_line_falls_back_to_stops() {
        let elements = vec![
            station(1, 0.0, 0.0, "A"),
            station(2, 0.01, 0.0, "B"),
            route(100, &[(n(1), "stop"), (w(99), ""), (n(2), "stop")], "1"),
        ];
        let store = ElementStore::from_elements(elements);
        let built = build_network(&store, &Config::default());
        assert_eq!(
            route_line(&built.network, RouteId(0)),
            vec![Coord::new(0.0, 0.0), Coord::new(0.01, 0.0)]
        );
    }

    #[test]
    fn test_export_is_byte_identical_across_runs() {
        let (_, first) = run(line(), &Config::default());
        let (_, second) = run(line(), &Config::default());
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].graph, second[0].graph);
        assert_eq!(first[0].geojson, second[0].geojson);
    }

    #[test]
    fn test_no_exportable_routes_invalidates_system() {
        let elements = vec![
            station(1, 0.0, 0.0, "A"),
            node(11, 0.0, 0.0, &[]),
            node(12, 0.01, 0.0, &[]),
            rail(21, &[11, 12]),
            route(100, &[(n(1), "stop"), (w(21), "")], "1"),
        ];
        let (systems, exports) = run(elements, &Config::default());
        assert!(exports.is_empty());
        assert!(
            systems[0]
                .issues
                .iter()
                .any(|i| i.kind == IssueKind::NoExportableRoutes)
        );
    }

    #[test]
    fn test_degenerate_geometry_fails_only_that_system() {
        let mut elements = line();
        // Two stations mapped on the same spot, far from the first line.
        elements.push(station(5, 3.0, 3.0, "X"));
        elements.push(station(6, 3.0, 3.0, "Y"));
        elements.push(node(15, 3.0, 3.0, &[]));
        elements.push(node(16, 3.0, 3.0, &[]));
        elements.push(rail(23, &[15, 16]));
        elements.push(route(101, &[(n(5), "stop"), (w(23), ""), (n(6), "stop")], "2"));
        let (systems, exports) = run(elements, &Config::default());
        assert_eq!(systems.len(), 2);
        assert_eq!(exports.len(), 1);
        assert_eq!(exports[0].system, systems[0].id);
        assert!(
            systems[1]
                .issues
                .iter()
                .any(|i| i.kind == IssueKind::ExportFailed)
        );
    }

    #[test]
    fn test_include_unmatched_false_skips_unidentified() {
        let config = Config {
            include_unmatched: false,
            ..Default::default()
        };
        let (_, exports) = run(line(), &config);
        assert!(exports.is_empty());
    }
}
