//! Entity builder: turns raw elements into the typed [`Network`].
//!
//! Every defect found while resolving references becomes an [`Issue`]; the
//! builder never aborts on bad data.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::config::{Config, Mode};
use crate::geo::Coord;
use crate::issues::{EntityRef, Issue, IssueKind};
use crate::model::{
    Entrance, EntranceId, EntranceMatch, Network, Route, RouteId, RouteMaster, RouteMasterId,
    RouteMember, SegmentId, Station, StationId, StopArea, StopAreaGroup, StopAreaGroupId,
    StopAreaId, TrackSegment,
};
use crate::store::{ElementId, ElementKind, ElementStore, Relation, Tags, Way, is_unbuilt, tag};

pub struct BuildOutput<'a> {
    pub network: Network<'a>,
    pub issues: Vec<Issue>,
}

/// Builds every entity from the store and collects first-pass issues.
#[tracing::instrument(skip_all, fields(elements = store.len()))]
pub fn build_network<'a>(store: &'a ElementStore, config: &Config) -> BuildOutput<'a> {
    let mut builder = Builder::new(store, config);
    builder.collect_stations();
    builder.collect_entrances();
    builder.collect_stop_areas();
    builder.index_station_elements();
    builder.collect_routes();
    builder.collect_masters();
    builder.collect_groups();
    builder.match_entrances();

    let Builder {
        net, mut issues, ..
    } = builder;
    issues.sort_by_cached_key(|i| (i.primary().map(|p| net.element_of(p)), i.kind));

    info!(
        stations = net.stations.len(),
        entrances = net.entrances.len(),
        segments = net.segments.len(),
        routes = net.routes.len(),
        masters = net.masters.len(),
        stop_areas = net.stop_areas.len(),
        groups = net.groups.len(),
        issues = issues.len(),
        "Network built"
    );

    BuildOutput {
        network: net,
        issues,
    }
}

struct Builder<'a, 'c> {
    store: &'a ElementStore,
    config: &'c Config,
    net: Network<'a>,
    issues: Vec<Issue>,
    station_by_node: BTreeMap<i64, StationId>,
    entrance_by_node: BTreeMap<i64, EntranceId>,
    segment_by_way: BTreeMap<i64, SegmentId>,
    stop_area_by_rel: BTreeMap<i64, StopAreaId>,
    route_by_rel: BTreeMap<i64, RouteId>,
    entrance_areas: BTreeMap<EntranceId, Vec<StopAreaId>>,
}

impl<'a, 'c> Builder<'a, 'c> {
    fn new(store: &'a ElementStore, config: &'c Config) -> Self {
        Self {
            store,
            config,
            net: Network::new(store),
            issues: Vec::new(),
            station_by_node: BTreeMap::new(),
            entrance_by_node: BTreeMap::new(),
            segment_by_way: BTreeMap::new(),
            stop_area_by_rel: BTreeMap::new(),
            route_by_rel: BTreeMap::new(),
            entrance_areas: BTreeMap::new(),
        }
    }

    fn push(&mut self, kind: IssueKind, subjects: Vec<EntityRef>, message: String) {
        self.issues.push(Issue::new(kind, subjects, message));
    }

    fn collect_stations(&mut self) {
        let store = self.store;
        // Stations without a mode tag take the mode of the first route that stops there.
        let mut inherited: BTreeMap<i64, Mode> = BTreeMap::new();
        for relation in store.relations() {
            if let Some(mode) = route_mode(&relation.tags, self.config) {
                for m in relation.members.iter().filter(|m| m.kind == ElementKind::Node) {
                    inherited.entry(m.ref_id).or_insert(mode);
                }
            }
        }

        for node in store.nodes() {
            if !is_station_candidate(&node.tags) {
                continue;
            }
            let mode = match tagged_station_mode(&node.tags) {
                Some(mode) => mode,
                None => match inherited.get(&node.id) {
                    Some(mode) => {
                        debug!(station = node.id, %mode, "Station mode taken from route");
                        *mode
                    }
                    None => continue,
                },
            };
            if !self.config.processes(mode) {
                continue;
            }
            let id = StationId(self.net.stations.len());
            self.net.stations.push(Station {
                node,
                mode,
                stop_areas: Vec::new(),
            });
            self.station_by_node.insert(node.id, id);
        }
    }

    fn collect_entrances(&mut self) {
        let store = self.store;
        for node in store.nodes() {
            if !is_entrance(&node.tags) {
                continue;
            }
            let id = EntranceId(self.net.entrances.len());
            self.net.entrances.push(Entrance {
                node,
                station: None,
                matched_by: EntranceMatch::Orphan,
            });
            self.entrance_by_node.insert(node.id, id);
        }
    }

    fn collect_stop_areas(&mut self) {
        let store = self.store;
        for relation in store.relations() {
            if tag(&relation.tags, "public_transport") != Some("stop_area") {
                continue;
            }
            let mut stations = Vec::new();
            let mut entrances = Vec::new();
            let mut platforms = Vec::new();
            for m in &relation.members {
                let el = m.element_id();
                if m.kind == ElementKind::Node {
                    if let Some(id) = self.station_by_node.get(&m.ref_id) {
                        if !stations.contains(id) {
                            stations.push(*id);
                        }
                        continue;
                    }
                    if let Some(id) = self.entrance_by_node.get(&m.ref_id) {
                        if !entrances.contains(id) {
                            entrances.push(*id);
                        }
                        continue;
                    }
                }
                if m.kind != ElementKind::Relation
                    && store
                        .tags(el)
                        .is_some_and(|t| is_platform(t, self.config))
                    && !platforms.contains(&el)
                {
                    platforms.push(el);
                }
            }
            if stations.is_empty() && entrances.is_empty() && platforms.is_empty() {
                continue;
            }

            let id = StopAreaId(self.net.stop_areas.len());
            for station in &stations {
                self.net.stations[station.0].stop_areas.push(id);
            }
            for entrance in &entrances {
                self.entrance_areas.entry(*entrance).or_default().push(id);
            }
            self.stop_area_by_rel.insert(relation.id, id);

            if stations.is_empty() {
                self.push(
                    IssueKind::StopAreaWithoutStation,
                    vec![EntityRef::StopArea(id)],
                    format!("Stop area r{} has no station member", relation.id),
                );
            } else if stations.len() > 1 {
                let mut subjects = vec![EntityRef::StopArea(id)];
                subjects.extend(stations.iter().map(|s| EntityRef::Station(*s)));
                let names: Vec<String> = stations
                    .iter()
                    .map(|s| self.net.describe(EntityRef::Station(*s)))
                    .collect();
                self.push(
                    IssueKind::MultipleStations,
                    subjects,
                    format!(
                        "Stop area r{} holds {} stations: {}",
                        relation.id,
                        stations.len(),
                        names.join(", ")
                    ),
                );
            }

            self.net.stop_areas.push(StopArea {
                relation,
                stations,
                entrances,
                platforms,
            });
        }
    }

    /// Maps stations, their stop-area platforms and, for stations outside any
    /// stop area, nearby platforms onto the stations they serve.
    fn index_station_elements(&mut self) {
        let mut index: BTreeMap<ElementId, Vec<StationId>> = BTreeMap::new();
        for (i, station) in self.net.stations.iter().enumerate() {
            index.entry(station.element()).or_default().push(StationId(i));
        }
        for area in &self.net.stop_areas {
            for platform in &area.platforms {
                index
                    .entry(*platform)
                    .or_default()
                    .extend(area.stations.iter().copied());
            }
        }

        let loose: Vec<(ElementId, Coord)> = self
            .store
            .nodes()
            .filter(|n| is_platform(&n.tags, self.config))
            .map(|n| (ElementId::node(n.id), n.coord))
            .chain(
                self.store
                    .ways()
                    .filter(|w| is_platform(&w.tags, self.config))
                    .filter_map(|w| {
                        let el = ElementId::way(w.id);
                        Some((el, self.store.center(el)?))
                    }),
            )
            .collect();
        for (i, station) in self.net.stations.iter().enumerate() {
            if !station.stop_areas.is_empty() {
                continue;
            }
            for (el, coord) in &loose {
                if station.coord().distance_to(coord) <= self.config.entrance_radius_m {
                    index.entry(*el).or_default().push(StationId(i));
                }
            }
        }

        for stations in index.values_mut() {
            stations.sort();
            stations.dedup();
        }
        self.net.station_index = index;
    }

    fn collect_routes(&mut self) {
        let store = self.store;
        for relation in store.relations() {
            let Some(mode) = route_mode(&relation.tags, self.config) else {
                continue;
            };
            if relation.members.is_empty() {
                self.push(
                    IssueKind::EmptyRoute,
                    vec![EntityRef::Element(ElementId::relation(relation.id))],
                    format!("Route r{} has no members", relation.id),
                );
                continue;
            }
            let id = RouteId(self.net.routes.len());
            for (key, kind) in [
                ("ref", IssueKind::MissingRef),
                ("colour", IssueKind::MissingColour),
            ] {
                if tag(&relation.tags, key).is_none() {
                    self.push(
                        kind,
                        vec![EntityRef::Route(id)],
                        format!("Route r{} has no {key} tag", relation.id),
                    );
                }
            }
            let members = self.resolve_members(id, relation);
            let circular = matches!(tag(&relation.tags, "roundtrip"), Some("yes"))
                || matches!(tag(&relation.tags, "circular"), Some("yes"));
            self.net.routes.push(Route {
                relation,
                mode,
                circular,
                members,
                master: None,
            });
            self.route_by_rel.insert(relation.id, id);
        }
    }

    fn resolve_members(&mut self, route: RouteId, relation: &'a Relation) -> Vec<RouteMember> {
        let store = self.store;
        let mut members: Vec<RouteMember> = Vec::new();
        for m in &relation.members {
            let el = m.element_id();
            let stations = self.net.stations_for(el).to_vec();
            if let Some(&first) = stations.first() {
                if stations.len() > 1 {
                    let mut subjects = vec![EntityRef::Route(route), EntityRef::Element(el)];
                    subjects.extend(stations.iter().map(|s| EntityRef::Station(*s)));
                    self.push(
                        IssueKind::AmbiguousStation,
                        subjects,
                        format!(
                            "Member {el} of route r{} serves {} stations; split the interchange or use a stop position",
                            relation.id,
                            stations.len()
                        ),
                    );
                }
                if members.last() != Some(&RouteMember::Stop(first)) {
                    members.push(RouteMember::Stop(first));
                }
                continue;
            }

            if m.kind == ElementKind::Way {
                if let Some(way) = store.way(m.ref_id) {
                    if is_track(&way.tags) {
                        let missing = way.nodes.iter().filter(|id| store.node(**id).is_none()).count();
                        let resolved = way.nodes.len() - missing;
                        if resolved < 2 {
                            // Nothing to measure against; treated like an absent way.
                            self.push(
                                IssueKind::MissingSegment,
                                vec![EntityRef::Route(route), EntityRef::Element(el)],
                                format!(
                                    "Way {el} of route r{} has {resolved} of {} nodes in the dataset",
                                    relation.id,
                                    way.nodes.len()
                                ),
                            );
                            continue;
                        }
                        if missing > 0 {
                            self.push(
                                IssueKind::MissingSegment,
                                vec![EntityRef::Route(route), EntityRef::Element(el)],
                                format!(
                                    "Way {el} of route r{} is missing {missing} of {} nodes",
                                    relation.id,
                                    way.nodes.len()
                                ),
                            );
                        }
                        let segment = self.segment_for(way);
                        members.push(RouteMember::Track(segment));
                        continue;
                    }
                }
            }

            let present = store.contains(el);
            if is_stop_role(&m.role) {
                let reason = if present {
                    "is not connected to a station"
                } else {
                    "is not in the dataset"
                };
                self.push(
                    IssueKind::UnresolvedStop,
                    vec![EntityRef::Route(route), EntityRef::Element(el)],
                    format!("{} {el} of route r{} {reason}", m.role, relation.id),
                );
            } else if !present && m.kind == ElementKind::Way {
                self.push(
                    IssueKind::MissingSegment,
                    vec![EntityRef::Route(route), EntityRef::Element(el)],
                    format!("Way {el} of route r{} is not in the dataset", relation.id),
                );
            } else if present {
                self.push(
                    IssueKind::UnexpectedMember,
                    vec![EntityRef::Route(route), EntityRef::Element(el)],
                    format!("Member {el} of route r{} is neither a stop nor a track", relation.id),
                );
            }
        }
        members
    }

    fn segment_for(&mut self, way: &'a Way) -> SegmentId {
        if let Some(id) = self.segment_by_way.get(&way.id) {
            return *id;
        }
        let id = SegmentId(self.net.segments.len());
        self.net.segments.push(TrackSegment {
            way,
            coords: self.store.way_coords(way),
            mode: tag(&way.tags, "railway").and_then(Mode::from_railway),
        });
        self.segment_by_way.insert(way.id, id);
        id
    }

    fn collect_masters(&mut self) {
        let store = self.store;
        for relation in store.relations() {
            if tag(&relation.tags, "type") != Some("route_master") {
                continue;
            }
            let mode = tag(&relation.tags, "route_master").and_then(Mode::from_tag);
            if mode.is_some_and(|m| !self.config.processes(m)) {
                continue;
            }
            let id = RouteMasterId(self.net.masters.len());
            let mut routes = Vec::new();
            for m in relation.members.iter().filter(|m| m.kind == ElementKind::Relation) {
                let Some(&route_id) = self.route_by_rel.get(&m.ref_id) else {
                    continue;
                };
                let route = &self.net.routes[route_id.0];
                if let Some(existing) = route.master {
                    let first = self.net.masters[existing.0].element();
                    self.push(
                        IssueKind::RouteInTwoMasters,
                        vec![EntityRef::Route(route_id), EntityRef::Element(ElementId::relation(relation.id))],
                        format!(
                            "Route r{} is in route masters {first} and r{}; keeping {first}",
                            m.ref_id, relation.id
                        ),
                    );
                    continue;
                }
                if let Some(master_mode) = mode {
                    if route.mode != master_mode {
                        let route_mode = route.mode;
                        self.push(
                            IssueKind::MasterModeConflict,
                            vec![EntityRef::Route(route_id), EntityRef::RouteMaster(id)],
                            format!(
                                "Route r{} is {route_mode} but its route master r{} is {master_mode}",
                                m.ref_id, relation.id
                            ),
                        );
                    }
                }
                self.net.routes[route_id.0].master = Some(id);
                routes.push(route_id);
            }
            if routes.is_empty() {
                continue;
            }
            self.net.masters.push(RouteMaster {
                relation,
                mode,
                routes,
            });
        }
    }

    fn collect_groups(&mut self) {
        let store = self.store;
        let mut reported: BTreeSet<Vec<i64>> = BTreeSet::new();
        for relation in store.relations() {
            if !is_stop_area_group(&relation.tags) {
                continue;
            }
            let mut path = vec![relation.id];
            let mut areas = BTreeSet::new();
            self.flatten_group(relation, &mut path, &mut areas, &mut reported);
            if areas.is_empty() {
                continue;
            }
            let id = StopAreaGroupId(self.net.groups.len());
            debug!(group = relation.id, stop_areas = areas.len(), ?id, "Stop area group");
            self.net.groups.push(StopAreaGroup {
                relation,
                stop_areas: areas.into_iter().collect(),
            });
        }
    }

    fn flatten_group(
        &mut self,
        relation: &'a Relation,
        path: &mut Vec<i64>,
        areas: &mut BTreeSet<StopAreaId>,
        reported: &mut BTreeSet<Vec<i64>>,
    ) {
        let store = self.store;
        for m in relation.members.iter().filter(|m| m.kind == ElementKind::Relation) {
            if let Some(area) = self.stop_area_by_rel.get(&m.ref_id) {
                areas.insert(*area);
                continue;
            }
            let Some(nested) = store.relation(m.ref_id) else {
                continue;
            };
            if !is_stop_area_group(&nested.tags) {
                continue;
            }
            if let Some(pos) = path.iter().position(|id| *id == m.ref_id) {
                let mut cycle = path[pos..].to_vec();
                cycle.sort();
                if reported.insert(cycle.clone()) {
                    let subjects = cycle
                        .iter()
                        .map(|id| EntityRef::Element(ElementId::relation(*id)))
                        .collect();
                    let chain: Vec<String> = path[pos..].iter().map(|id| format!("r{id}")).collect();
                    self.push(
                        IssueKind::CircularGrouping,
                        subjects,
                        format!(
                            "Stop area groups form a cycle {} -> r{}; back-reference ignored",
                            chain.join(" -> "),
                            m.ref_id
                        ),
                    );
                }
                continue;
            }
            path.push(m.ref_id);
            self.flatten_group(nested, path, areas, reported);
            path.pop();
        }
    }

    fn match_entrances(&mut self) {
        for i in 0..self.net.entrances.len() {
            let id = EntranceId(i);
            let from_area = self.entrance_areas.get(&id).and_then(|areas| {
                areas
                    .iter()
                    .find_map(|a| self.net.stop_areas[a.0].station())
            });
            if let Some(station) = from_area {
                let entrance = &mut self.net.entrances[i];
                entrance.station = Some(station);
                entrance.matched_by = EntranceMatch::StopArea;
                continue;
            }

            let coord = self.net.entrances[i].coord();
            let nearest = self
                .net
                .stations
                .iter()
                .enumerate()
                .map(|(s, st)| (StationId(s), st.coord().distance_to(&coord)))
                .filter(|(_, d)| *d <= self.config.entrance_radius_m)
                .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

            match nearest {
                Some((station, distance)) => {
                    let entrance = &mut self.net.entrances[i];
                    entrance.station = Some(station);
                    entrance.matched_by = EntranceMatch::Distance;
                    let label = self.net.describe(EntityRef::Entrance(id));
                    let station_label = self.net.describe(EntityRef::Station(station));
                    self.issues.push(
                        Issue::new(
                            IssueKind::EntranceOutsideStopArea,
                            vec![EntityRef::Entrance(id), EntityRef::Station(station)],
                            format!(
                                "Entrance {label} is not in a stop area; attached to station {station_label} {distance:.0} m away"
                            ),
                        )
                        .with_distance(distance),
                    );
                }
                None => {
                    let label = self.net.describe(EntityRef::Entrance(id));
                    self.push(
                        IssueKind::OrphanEntrance,
                        vec![EntityRef::Entrance(id)],
                        format!("Entrance {label} belongs to no station"),
                    );
                }
            }
        }
    }
}

fn is_station_candidate(tags: &Tags) -> bool {
    matches!(tag(tags, "railway"), Some("station") | Some("halt")) && !is_unbuilt(tags)
}

/// A station candidate whose tagged mode, if any, is being processed.
pub(crate) fn is_station(tags: &Tags, config: &Config) -> bool {
    is_station_candidate(tags) && tagged_station_mode(tags).is_none_or(|m| config.processes(m))
}

fn tagged_station_mode(tags: &Tags) -> Option<Mode> {
    tag(tags, "station").and_then(Mode::from_tag).or_else(|| {
        Mode::ALL
            .into_iter()
            .find(|m| tag(tags, m.as_str()) == Some("yes"))
    })
}

fn is_entrance(tags: &Tags) -> bool {
    matches!(
        tag(tags, "railway"),
        Some("subway_entrance") | Some("train_station_entrance")
    )
}

fn is_platform(tags: &Tags, config: &Config) -> bool {
    if tag(tags, "railway") == Some("platform") {
        return true;
    }
    matches!(
        tag(tags, "public_transport"),
        Some("platform") | Some("stop_position")
    ) && tag(tags, "station").is_none()
        && (tag(tags, "railway") == Some("stop")
            || config.modes.iter().any(|m| tag(tags, m.as_str()) == Some("yes")))
}

fn is_track(tags: &Tags) -> bool {
    matches!(
        tag(tags, "railway"),
        Some("rail") | Some("subway") | Some("light_rail") | Some("monorail") | Some("narrow_gauge")
    )
}

fn is_stop_role(role: &str) -> bool {
    role.starts_with("stop") || role.starts_with("platform")
}

fn is_stop_area_group(tags: &Tags) -> bool {
    tag(tags, "public_transport") == Some("stop_area_group")
}

fn route_mode(tags: &Tags, config: &Config) -> Option<Mode> {
    if tag(tags, "type") != Some("route") || is_unbuilt(tags) {
        return None;
    }
    tag(tags, "route")
        .and_then(Mode::from_tag)
        .filter(|m| config.processes(*m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issues::Severity;
    use crate::store::fixtures::*;

    fn build(elements: Vec<crate::store::Element>) -> (ElementStore, Config) {
        (ElementStore::from_elements(elements), Config::default())
    }

    fn kinds(issues: &[Issue]) -> Vec<IssueKind> {
        issues.iter().map(|i| i.kind).collect()
    }

    #[test]
    fn test_builds_simple_route() {
        let (store, config) = build(vec![
            station(1, 0.0, 0.0, "A"),
            station(2, 0.01, 0.0, "B"),
            rail(10, &[1, 2]),
            route(100, &[(n(1), "stop"), (w(10), ""), (n(2), "stop")], "1"),
        ]);
        let out = build_network(&store, &config);

        assert_eq!(out.network.stations.len(), 2);
        assert_eq!(out.network.segments.len(), 1);
        let route = &out.network.routes[0];
        assert_eq!(
            route.members,
            vec![
                RouteMember::Stop(StationId(0)),
                RouteMember::Track(SegmentId(0)),
                RouteMember::Stop(StationId(1)),
            ]
        );
        assert!(out.issues.is_empty(), "{:?}", out.issues);
    }

    #[test]
    fn test_station_mode_falls_back_to_route() {
        let (store, config) = build(vec![
            node(1, 0.0, 0.0, &[("railway", "station"), ("name", "Untyped")]),
            station(2, 0.01, 0.0, "B"),
            relation(
                100,
                &[(n(1), "stop"), (n(2), "stop")],
                &[("type", "route"), ("route", "light_rail")],
            ),
        ]);
        let out = build_network(&store, &config);
        assert_eq!(out.network.stations[0].mode, Mode::LightRail);
    }

    #[test]
    fn test_unprocessed_mode_station_skipped() {
        let (store, config) = build(vec![node(
            1,
            0.0,
            0.0,
            &[("railway", "station"), ("train", "yes")],
        )]);
        let out = build_network(&store, &config);
        assert!(out.network.stations.is_empty());
    }

    #[test]
    fn test_empty_route_reported() {
        let (store, config) = build(vec![relation(
            100,
            &[],
            &[("type", "route"), ("route", "subway")],
        )]);
        let out = build_network(&store, &config);
        assert!(out.network.routes.is_empty());
        assert_eq!(kinds(&out.issues), vec![IssueKind::EmptyRoute]);
    }

    #[test]
    fn test_missing_way_reported_without_aborting_route() {
        let (store, config) = build(vec![
            station(1, 0.0, 0.0, "A"),
            station(2, 0.01, 0.0, "B"),
            route(100, &[(n(1), "stop"), (w(77), ""), (n(2), "stop")], "1"),
        ]);
        let out = build_network(&store, &config);
        assert_eq!(kinds(&out.issues), vec![IssueKind::MissingSegment]);
        assert_eq!(out.network.routes[0].members.len(), 2);
    }

    #[test]
    fn test_way_without_nodes_is_a_missing_segment() {
        let (store, config) = build(vec![
            station(1, 0.0, 0.0, "A"),
            station(2, 0.01, 0.0, "B"),
            station(3, 0.06, 0.0, "C"),
            node(11, 0.0, 0.0, &[]),
            node(12, 0.01, 0.0, &[]),
            rail(21, &[11, 12]),
            rail(22, &[901, 902]),
            route(
                100,
                &[(n(1), "stop"), (w(21), ""), (n(2), "stop"), (w(22), ""), (n(3), "stop")],
                "1",
            ),
        ]);
        let out = build_network(&store, &config);
        assert_eq!(kinds(&out.issues), vec![IssueKind::MissingSegment]);
        assert_eq!(
            out.issues[0].subjects,
            vec![EntityRef::Route(RouteId(0)), EntityRef::Element(w(22))]
        );
        assert_eq!(out.network.segments.len(), 1);
        assert_eq!(
            out.network.routes[0].members,
            vec![
                RouteMember::Stop(StationId(0)),
                RouteMember::Track(SegmentId(0)),
                RouteMember::Stop(StationId(1)),
                RouteMember::Stop(StationId(2)),
            ]
        );
    }

    #[test]
    fn test_way_with_some_nodes_missing_is_kept_and_reported() {
        let (store, config) = build(vec![
            station(1, 0.0, 0.0, "A"),
            station(2, 0.01, 0.0, "B"),
            node(11, 0.0, 0.0, &[]),
            node(12, 0.01, 0.0, &[]),
            rail(21, &[11, 901, 12]),
            route(100, &[(n(1), "stop"), (w(21), ""), (n(2), "stop")], "1"),
        ]);
        let out = build_network(&store, &config);
        assert_eq!(kinds(&out.issues), vec![IssueKind::MissingSegment]);
        assert!(out.issues[0].message.contains("missing 1 of 3 nodes"));
        assert_eq!(out.network.routes[0].members.len(), 3);
        assert_eq!(out.network.segments[0].coords.len(), 2);
    }

    #[test]
    fn test_missing_ref_and_colour_are_notices() {
        let (store, config) = build(vec![
            station(1, 0.0, 0.0, "A"),
            station(2, 0.01, 0.0, "B"),
            relation(
                100,
                &[(n(1), "stop"), (n(2), "stop")],
                &[("type", "route"), ("route", "subway")],
            ),
        ]);
        let out = build_network(&store, &config);
        assert_eq!(
            kinds(&out.issues),
            vec![IssueKind::MissingRef, IssueKind::MissingColour]
        );
        assert!(out.issues.iter().all(|i| i.severity == Severity::Notice));
        assert!(out.issues.iter().all(|i| i.subjects == vec![EntityRef::Route(RouteId(0))]));
    }

    #[test]
    fn test_platform_resolves_through_stop_area_and_collapses() {
        let (store, config) = build(vec![
            station(1, 0.0, 0.0, "A"),
            node(2, 0.0001, 0.0, &[("railway", "platform")]),
            relation(
                50,
                &[(n(1), ""), (n(2), "platform")],
                &[("type", "public_transport"), ("public_transport", "stop_area")],
            ),
            route(100, &[(n(1), "stop"), (n(2), "platform")], "1"),
        ]);
        let out = build_network(&store, &config);
        assert_eq!(
            out.network.routes[0].members,
            vec![RouteMember::Stop(StationId(0))]
        );
    }

    #[test]
    fn test_multiple_stations_in_stop_area() {
        let (store, config) = build(vec![
            station(1, 0.0, 0.0, "A"),
            station(2, 0.001, 0.0, "B"),
            relation(
                50,
                &[(n(1), ""), (n(2), "")],
                &[("public_transport", "stop_area")],
            ),
        ]);
        let out = build_network(&store, &config);
        assert_eq!(kinds(&out.issues), vec![IssueKind::MultipleStations]);
        assert_eq!(out.network.stop_areas[0].stations.len(), 2);
    }

    #[test]
    fn test_stop_area_without_station() {
        let (store, config) = build(vec![
            node(5, 0.0, 0.0, &[("railway", "subway_entrance")]),
            relation(50, &[(n(5), "entrance")], &[("public_transport", "stop_area")]),
        ]);
        let out = build_network(&store, &config);
        let found = kinds(&out.issues);
        assert!(found.contains(&IssueKind::StopAreaWithoutStation));
        assert!(found.contains(&IssueKind::OrphanEntrance));
    }

    #[test]
    fn test_circular_grouping_reported_once() {
        let (store, config) = build(vec![
            station(1, 0.0, 0.0, "A"),
            relation(50, &[(n(1), "")], &[("public_transport", "stop_area")]),
            relation(
                60,
                &[(r(50), ""), (r(61), "")],
                &[("public_transport", "stop_area_group")],
            ),
            relation(61, &[(r(60), "")], &[("public_transport", "stop_area_group")]),
        ]);
        let out = build_network(&store, &config);
        assert_eq!(kinds(&out.issues), vec![IssueKind::CircularGrouping]);
        assert_eq!(out.network.groups.len(), 2);
        assert_eq!(out.network.groups[1].stop_areas, vec![StopAreaId(0)]);
    }

    #[test]
    fn test_entrance_matching() {
        let (store, config) = build(vec![
            station(1, 0.0, 0.0, "A"),
            node(5, 0.0005, 0.0, &[("railway", "subway_entrance")]),
            node(6, 1.0, 1.0, &[("railway", "subway_entrance")]),
            station(2, 0.1, 0.0, "B"),
            node(7, 0.1, 0.001, &[("railway", "subway_entrance")]),
            relation(
                50,
                &[(n(2), ""), (n(7), "entrance")],
                &[("public_transport", "stop_area")],
            ),
        ]);
        let out = build_network(&store, &config);
        let entrances = &out.network.entrances;
        assert_eq!(entrances[0].matched_by, EntranceMatch::Distance);
        assert_eq!(entrances[0].station, Some(StationId(0)));
        assert_eq!(entrances[1].matched_by, EntranceMatch::Orphan);
        assert_eq!(entrances[2].matched_by, EntranceMatch::StopArea);
        assert_eq!(entrances[2].station, Some(StationId(1)));
        assert_eq!(
            kinds(&out.issues),
            vec![IssueKind::EntranceOutsideStopArea, IssueKind::OrphanEntrance]
        );
    }

    #[test]
    fn test_route_in_two_masters() {
        let (store, config) = build(vec![
            station(1, 0.0, 0.0, "A"),
            station(2, 0.01, 0.0, "B"),
            route(100, &[(n(1), "stop"), (n(2), "stop")], "1"),
            relation(
                200,
                &[(r(100), "")],
                &[("type", "route_master"), ("route_master", "subway")],
            ),
            relation(
                201,
                &[(r(100), "")],
                &[("type", "route_master"), ("route_master", "subway")],
            ),
        ]);
        let out = build_network(&store, &config);
        assert_eq!(kinds(&out.issues), vec![IssueKind::RouteInTwoMasters]);
        assert_eq!(out.network.masters.len(), 1);
        assert_eq!(out.network.routes[0].master, Some(RouteMasterId(0)));
    }

    #[test]
    fn test_issue_order_is_deterministic() {
        let elements = || {
            vec![
                station(1, 0.0, 0.0, "A"),
                station(2, 0.01, 0.0, "B"),
                route(100, &[(n(1), "stop"), (w(9), ""), (n(3), "stop")], "1"),
                route(101, &[(n(2), "stop"), (w(8), "")], "2"),
            ]
        };
        let mut reversed = elements();
        reversed.reverse();
        let config = Config::default();
        let a = ElementStore::from_elements(elements());
        let b = ElementStore::from_elements(reversed);
        assert_eq!(
            build_network(&a, &config).issues,
            build_network(&b, &config).issues
        );
    }
}
