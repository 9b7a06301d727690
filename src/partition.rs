//! Clustering of the network into independent metro systems.
//!
//! Every entity gets a slot in a dense index (arena base + offset) and the
//! configured union rules merge slots in a disjoint set. Sets holding a
//! station or a route become [`System`]s; everything else, and every issue
//! that cannot be placed, goes to the `unmatched` pseudo-system.

use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::config::{Config, Mode, UnionRule};
use crate::geo::BBox;
use crate::issues::{EntityRef, Issue, IssueKind};
use crate::model::{
    EntranceId, EntranceMatch, Network, RouteId, RouteMasterId, SegmentId, StationId,
    StopAreaGroupId, StopAreaId,
};
use crate::registry::{Registry, RegistryEntry, slugify};
use crate::store::ElementId;

/// Id of the pseudo-system collecting issues that belong to no system.
pub const UNMATCHED: &str = "unmatched";

#[derive(Debug, Clone, Default)]
pub struct System {
    pub id: String,
    /// Name of the matched registry entry.
    pub name: Option<String>,
    pub bbox: Option<BBox>,
    /// Smallest element id among the members; fixes the system order.
    pub anchor: Option<ElementId>,
    pub stations: Vec<StationId>,
    pub entrances: Vec<EntranceId>,
    pub segments: Vec<SegmentId>,
    pub routes: Vec<RouteId>,
    pub masters: Vec<RouteMasterId>,
    pub stop_areas: Vec<StopAreaId>,
    pub groups: Vec<StopAreaGroupId>,
    pub issues: Vec<Issue>,
}

impl System {
    pub fn is_matched(&self) -> bool {
        self.name.is_some()
    }

    /// Lines of one mode: route masters plus routes outside any master.
    pub fn line_count(&self, network: &Network<'_>, mode: Mode) -> usize {
        let masters = self
            .masters
            .iter()
            .filter(|m| {
                let master = &network.masters[m.0];
                master
                    .mode
                    .or_else(|| master.routes.first().map(|r| network.route(*r).mode))
                    == Some(mode)
            })
            .count();
        let loose = self
            .routes
            .iter()
            .map(|r| network.route(*r))
            .filter(|r| r.master.is_none() && r.mode == mode)
            .count();
        masters + loose
    }

    /// Interchanges declared through stop area groups.
    pub fn interchange_count(&self) -> usize {
        self.groups.len()
    }

    fn push(&mut self, entity: EntityRef) {
        match entity {
            EntityRef::Station(id) => self.stations.push(id),
            EntityRef::Entrance(id) => self.entrances.push(id),
            EntityRef::Segment(id) => self.segments.push(id),
            EntityRef::Route(id) => self.routes.push(id),
            EntityRef::RouteMaster(id) => self.masters.push(id),
            EntityRef::StopArea(id) => self.stop_areas.push(id),
            EntityRef::StopAreaGroup(id) => self.groups.push(id),
            EntityRef::Element(_) => {}
        }
    }
}

#[derive(Debug, Default)]
pub struct Partition {
    pub systems: Vec<System>,
    /// Issues of the `unmatched` pseudo-system.
    pub unmatched: Vec<Issue>,
}

#[tracing::instrument(skip_all, fields(issues = issues.len(), registry = registry.len()))]
pub fn partition_systems(
    network: &Network<'_>,
    issues: Vec<Issue>,
    registry: &Registry,
    config: &Config,
) -> Partition {
    let mut clusters = Clusters::new(network);
    for rule in &config.union_rules {
        debug!(?rule, "Applying union rule");
        clusters.apply(*rule);
    }
    clusters.apply_always();

    let mut by_root: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for slot in 0..clusters.index.len() {
        let root = clusters.dsu.find(slot);
        by_root.entry(root).or_default().push(slot);
    }

    let mut systems: Vec<(System, Vec<usize>)> = Vec::new();
    for slots in by_root.into_values() {
        let entities: Vec<EntityRef> = slots.iter().map(|s| clusters.index.entity(*s)).collect();
        let anchored = entities
            .iter()
            .any(|e| matches!(e, EntityRef::Station(_) | EntityRef::Route(_)));
        if !anchored {
            continue;
        }
        let mut system = System::default();
        for entity in &entities {
            system.push(*entity);
        }
        system.anchor = entities.iter().map(|e| network.element_of(*e)).min();
        system.bbox = BBox::covering(entities.iter().flat_map(|e| network.coords_of(*e)));
        systems.push((system, slots));
    }
    systems.sort_by_key(|(s, _)| s.anchor);

    let mut system_of: Vec<Option<usize>> = vec![None; clusters.index.len()];
    for (i, (_, slots)) in systems.iter().enumerate() {
        for slot in slots {
            system_of[*slot] = Some(i);
        }
    }
    let mut systems: Vec<System> = systems.into_iter().map(|(s, _)| s).collect();

    let element_slots = clusters.element_slots();
    let locate = |subject: &EntityRef| -> Option<usize> {
        let slot = match subject {
            EntityRef::Element(el) => element_slots.get(el).copied(),
            other => clusters.index.slot(*other),
        }?;
        system_of[slot]
    };
    let mut unmatched = Vec::new();
    for issue in issues {
        match issue.subjects.iter().find_map(&locate) {
            Some(i) => systems[i].issues.push(issue),
            None => unmatched.push(issue),
        }
    }

    for system in systems.iter_mut() {
        if let ([station], []) = (system.stations.as_slice(), system.routes.as_slice()) {
            let station = *station;
            if !clusters.served[station.0] {
                system.issues.push(Issue::new(
                    IssueKind::IsolatedStation,
                    vec![EntityRef::Station(station)],
                    format!(
                        "Station {} is not served by any route",
                        network.describe(EntityRef::Station(station))
                    ),
                ));
            }
        }
    }

    identify(network, &mut systems, registry);

    info!(
        systems = systems.len(),
        matched = systems.iter().filter(|s| s.is_matched()).count(),
        unmatched_issues = unmatched.len(),
        "Systems partitioned"
    );
    Partition { systems, unmatched }
}

/// Matches systems against the registry and assigns unique ids.
fn identify(network: &Network<'_>, systems: &mut [System], registry: &Registry) {
    let mut taken: BTreeMap<String, usize> = BTreeMap::new();
    for system in systems.iter_mut() {
        let lead = lead_entity(system);
        let entry = system.bbox.as_ref().and_then(|b| registry.best_match(b));
        let base = match entry {
            Some(entry) => {
                system.name = Some(entry.name.clone());
                check_counts(network, system, entry, lead);
                slugify(&entry.name)
            }
            None => {
                let anchor = system
                    .anchor
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "empty".to_string());
                system.issues.push(Issue::new(
                    IssueKind::UnidentifiedSystem,
                    vec![lead],
                    format!(
                        "Cluster around {} matches no registry entry",
                        network.describe(lead)
                    ),
                ));
                format!("unidentified-{anchor}")
            }
        };
        let seen = taken.entry(base.clone()).or_insert(0);
        *seen += 1;
        system.id = if *seen == 1 {
            base
        } else {
            format!("{base}-{seen}")
        };
    }
}

fn check_counts(network: &Network<'_>, system: &mut System, entry: &RegistryEntry, lead: EntityRef) {
    let found = [
        ("stations", entry.stations, system.stations.len()),
        ("subway lines", entry.subway_lines, system.line_count(network, Mode::Subway)),
        (
            "light rail lines",
            entry.light_rail_lines,
            system.line_count(network, Mode::LightRail),
        ),
        ("interchanges", entry.interchanges, system.interchange_count()),
    ];
    for (what, expected, actual) in found {
        let Some(expected) = expected else {
            continue;
        };
        if expected != actual {
            system.issues.push(Issue::new(
                IssueKind::CountMismatch,
                vec![lead],
                format!("{}: expected {expected} {what}, found {actual}", entry.name),
            ));
        }
    }
}

/// Station or route holding the system's anchor element.
fn lead_entity(system: &System) -> EntityRef {
    match (system.stations.first(), system.routes.first()) {
        (Some(s), _) => EntityRef::Station(*s),
        (None, Some(r)) => EntityRef::Route(*r),
        (None, None) => EntityRef::Element(system.anchor.unwrap_or(ElementId::node(0))),
    }
}

/// Disjoint set with path halving and union by rank.
#[derive(Debug)]
struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

const ARENAS: usize = 7;

/// Dense slot numbering over all entity arenas.
#[derive(Debug)]
struct EntityIndex {
    bases: [usize; ARENAS + 1],
}

impl EntityIndex {
    fn new(network: &Network<'_>) -> Self {
        let sizes = [
            network.stations.len(),
            network.entrances.len(),
            network.segments.len(),
            network.routes.len(),
            network.masters.len(),
            network.stop_areas.len(),
            network.groups.len(),
        ];
        let mut bases = [0; ARENAS + 1];
        for (i, size) in sizes.iter().enumerate() {
            bases[i + 1] = bases[i] + size;
        }
        Self { bases }
    }

    fn len(&self) -> usize {
        self.bases[ARENAS]
    }

    fn slot(&self, entity: EntityRef) -> Option<usize> {
        let (arena, offset) = match entity {
            EntityRef::Station(id) => (0, id.0),
            EntityRef::Entrance(id) => (1, id.0),
            EntityRef::Segment(id) => (2, id.0),
            EntityRef::Route(id) => (3, id.0),
            EntityRef::RouteMaster(id) => (4, id.0),
            EntityRef::StopArea(id) => (5, id.0),
            EntityRef::StopAreaGroup(id) => (6, id.0),
            EntityRef::Element(_) => return None,
        };
        Some(self.bases[arena] + offset)
    }

    fn entity(&self, slot: usize) -> EntityRef {
        let arena = (0..ARENAS)
            .find(|a| slot < self.bases[a + 1])
            .unwrap_or(ARENAS - 1);
        let offset = slot - self.bases[arena];
        match arena {
            0 => EntityRef::Station(StationId(offset)),
            1 => EntityRef::Entrance(EntranceId(offset)),
            2 => EntityRef::Segment(SegmentId(offset)),
            3 => EntityRef::Route(RouteId(offset)),
            4 => EntityRef::RouteMaster(RouteMasterId(offset)),
            5 => EntityRef::StopArea(StopAreaId(offset)),
            _ => EntityRef::StopAreaGroup(StopAreaGroupId(offset)),
        }
    }
}

struct Clusters<'n, 'a> {
    network: &'n Network<'a>,
    index: EntityIndex,
    dsu: DisjointSet,
    /// Stations stopped at by at least one route.
    served: Vec<bool>,
}

impl<'n, 'a> Clusters<'n, 'a> {
    fn new(network: &'n Network<'a>) -> Self {
        let index = EntityIndex::new(network);
        let mut served = vec![false; network.stations.len()];
        for route in &network.routes {
            for stop in route.stops() {
                served[stop.0] = true;
            }
        }
        Self {
            network,
            dsu: DisjointSet::new(index.len()),
            index,
            served,
        }
    }

    fn join(&mut self, a: EntityRef, b: EntityRef) {
        if self.isolated(a) || self.isolated(b) {
            return;
        }
        if let (Some(x), Some(y)) = (self.index.slot(a), self.index.slot(b)) {
            self.dsu.union(x, y);
        }
    }

    fn isolated(&self, entity: EntityRef) -> bool {
        matches!(entity, EntityRef::Station(s) if !self.served[s.0])
    }

    fn apply(&mut self, rule: UnionRule) {
        let net = self.network;
        match rule {
            UnionRule::RouteMaster => {
                for (i, master) in net.masters.iter().enumerate() {
                    for route in &master.routes {
                        self.join(EntityRef::RouteMaster(RouteMasterId(i)), EntityRef::Route(*route));
                    }
                }
            }
            UnionRule::RouteStops => {
                for (i, route) in net.routes.iter().enumerate() {
                    for stop in route.stops() {
                        self.join(EntityRef::Route(RouteId(i)), EntityRef::Station(stop));
                    }
                }
            }
            UnionRule::StopArea => {
                for (i, area) in net.stop_areas.iter().enumerate() {
                    let a = EntityRef::StopArea(StopAreaId(i));
                    for station in &area.stations {
                        self.join(a, EntityRef::Station(*station));
                    }
                    for entrance in &area.entrances {
                        self.join(a, EntityRef::Entrance(*entrance));
                    }
                }
            }
            UnionRule::StopAreaGroup => {
                for (i, group) in net.groups.iter().enumerate() {
                    for area in &group.stop_areas {
                        self.join(
                            EntityRef::StopAreaGroup(StopAreaGroupId(i)),
                            EntityRef::StopArea(*area),
                        );
                    }
                }
            }
        }
    }

    fn apply_always(&mut self) {
        let net = self.network;
        for (i, route) in net.routes.iter().enumerate() {
            for segment in route.segments() {
                self.join(EntityRef::Route(RouteId(i)), EntityRef::Segment(segment));
            }
        }
        for (i, entrance) in net.entrances.iter().enumerate() {
            if let (EntranceMatch::Distance, Some(station)) = (entrance.matched_by, entrance.station) {
                self.join(EntityRef::Entrance(EntranceId(i)), EntityRef::Station(station));
            }
        }
    }

    /// Raw element ids resolved to the slot of the entity built from them.
    fn element_slots(&self) -> BTreeMap<ElementId, usize> {
        let net = self.network;
        let mut map = BTreeMap::new();
        for slot in 0..self.index.len() {
            map.insert(net.element_of(self.index.entity(slot)), slot);
        }
        for (el, stations) in &net.station_index {
            if let Some(first) = stations.first() {
                if let Some(slot) = self.index.slot(EntityRef::Station(*first)) {
                    map.entry(*el).or_insert(slot);
                }
            }
        }
        map
    }
}
