//! Typed transit entities built on top of the element store.
//!
//! Entities live in per-kind arenas inside [`Network`] and refer to each
//! other by index. Raw elements are borrowed from the store, never copied.

use crate::config::Mode;
use crate::geo::Coord;
use crate::issues::EntityRef;
use crate::store::{ElementId, ElementStore, Node, Relation, Tags, Way, tag};
use std::collections::BTreeMap;

macro_rules! arena_id {
    ($($name:ident),* $(,)?) => {
        $(
            #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
            pub struct $name(pub usize);
        )*
    };
}

arena_id!(
    StationId,
    EntranceId,
    SegmentId,
    RouteId,
    RouteMasterId,
    StopAreaId,
    StopAreaGroupId,
);

#[derive(Debug)]
pub struct Station<'a> {
    pub node: &'a Node,
    pub mode: Mode,
    pub stop_areas: Vec<StopAreaId>,
}

impl<'a> Station<'a> {
    pub fn element(&self) -> ElementId {
        ElementId::node(self.node.id)
    }

    pub fn coord(&self) -> Coord {
        self.node.coord
    }

    pub fn name(&self) -> Option<&'a str> {
        tag(&self.node.tags, "name")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntranceMatch {
    StopArea,
    Distance,
    Orphan,
}

#[derive(Debug)]
pub struct Entrance<'a> {
    pub node: &'a Node,
    pub station: Option<StationId>,
    pub matched_by: EntranceMatch,
}

impl<'a> Entrance<'a> {
    pub fn element(&self) -> ElementId {
        ElementId::node(self.node.id)
    }

    pub fn coord(&self) -> Coord {
        self.node.coord
    }

    pub fn name(&self) -> Option<&'a str> {
        tag(&self.node.tags, "name").or_else(|| tag(&self.node.tags, "ref"))
    }
}

#[derive(Debug)]
pub struct TrackSegment<'a> {
    pub way: &'a Way,
    /// Resolved node positions, in way order.
    pub coords: Vec<Coord>,
    pub mode: Option<Mode>,
}

impl TrackSegment<'_> {
    pub fn element(&self) -> ElementId {
        ElementId::way(self.way.id)
    }

    pub fn endpoints(&self) -> Option<(Coord, Coord)> {
        Some((*self.coords.first()?, *self.coords.last()?))
    }
}

/// One step of a route: a stop at a station or a stretch of track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMember {
    Stop(StationId),
    Track(SegmentId),
}

#[derive(Debug)]
pub struct Route<'a> {
    pub relation: &'a Relation,
    pub mode: Mode,
    pub circular: bool,
    pub members: Vec<RouteMember>,
    pub master: Option<RouteMasterId>,
}

impl<'a> Route<'a> {
    pub fn element(&self) -> ElementId {
        ElementId::relation(self.relation.id)
    }

    pub fn tag(&self, key: &str) -> Option<&'a str> {
        tag(&self.relation.tags, key)
    }

    /// `ref`, then `name`, then the element id.
    pub fn label(&self) -> String {
        self.tag("ref")
            .or_else(|| self.tag("name"))
            .map(str::to_string)
            .unwrap_or_else(|| self.element().to_string())
    }

    pub fn stops(&self) -> impl Iterator<Item = StationId> + '_ {
        self.members.iter().filter_map(|m| match m {
            RouteMember::Stop(s) => Some(*s),
            RouteMember::Track(_) => None,
        })
    }

    pub fn segments(&self) -> impl Iterator<Item = SegmentId> + '_ {
        self.members.iter().filter_map(|m| match m {
            RouteMember::Track(s) => Some(*s),
            RouteMember::Stop(_) => None,
        })
    }

    pub fn distinct_stops(&self) -> usize {
        let mut stops: Vec<StationId> = self.stops().collect();
        stops.sort();
        stops.dedup();
        stops.len()
    }
}

#[derive(Debug)]
pub struct RouteMaster<'a> {
    pub relation: &'a Relation,
    pub mode: Option<Mode>,
    pub routes: Vec<RouteId>,
}

impl RouteMaster<'_> {
    pub fn element(&self) -> ElementId {
        ElementId::relation(self.relation.id)
    }
}

#[derive(Debug)]
pub struct StopArea<'a> {
    pub relation: &'a Relation,
    pub stations: Vec<StationId>,
    pub entrances: Vec<EntranceId>,
    /// Platforms and stop positions, as raw element ids.
    pub platforms: Vec<ElementId>,
}

impl StopArea<'_> {
    pub fn element(&self) -> ElementId {
        ElementId::relation(self.relation.id)
    }

    pub fn station(&self) -> Option<StationId> {
        self.stations.first().copied()
    }
}

#[derive(Debug)]
pub struct StopAreaGroup<'a> {
    pub relation: &'a Relation,
    /// Stop areas of this group and of every nested group, deduplicated.
    pub stop_areas: Vec<StopAreaId>,
}

impl StopAreaGroup<'_> {
    pub fn element(&self) -> ElementId {
        ElementId::relation(self.relation.id)
    }
}

/// The complete entity graph. Immutable once the builder returns it.
#[derive(Debug)]
pub struct Network<'a> {
    pub store: &'a ElementStore,
    pub stations: Vec<Station<'a>>,
    pub entrances: Vec<Entrance<'a>>,
    pub segments: Vec<TrackSegment<'a>>,
    pub routes: Vec<Route<'a>>,
    pub masters: Vec<RouteMaster<'a>>,
    pub stop_areas: Vec<StopArea<'a>>,
    pub groups: Vec<StopAreaGroup<'a>>,
    /// Station, platform and stop position ids mapped to the stations they serve.
    pub station_index: BTreeMap<ElementId, Vec<StationId>>,
}

impl<'a> Network<'a> {
    pub fn new(store: &'a ElementStore) -> Self {
        Self {
            store,
            stations: Vec::new(),
            entrances: Vec::new(),
            segments: Vec::new(),
            routes: Vec::new(),
            masters: Vec::new(),
            stop_areas: Vec::new(),
            groups: Vec::new(),
            station_index: BTreeMap::new(),
        }
    }

    pub fn station(&self, id: StationId) -> &Station<'a> {
        &self.stations[id.0]
    }

    pub fn entrance(&self, id: EntranceId) -> &Entrance<'a> {
        &self.entrances[id.0]
    }

    pub fn segment(&self, id: SegmentId) -> &TrackSegment<'a> {
        &self.segments[id.0]
    }

    pub fn route(&self, id: RouteId) -> &Route<'a> {
        &self.routes[id.0]
    }

    pub fn element_of(&self, entity: EntityRef) -> ElementId {
        match entity {
            EntityRef::Station(id) => self.station(id).element(),
            EntityRef::Entrance(id) => self.entrance(id).element(),
            EntityRef::Segment(id) => self.segment(id).element(),
            EntityRef::Route(id) => self.route(id).element(),
            EntityRef::RouteMaster(id) => self.masters[id.0].element(),
            EntityRef::StopArea(id) => self.stop_areas[id.0].element(),
            EntityRef::StopAreaGroup(id) => self.groups[id.0].element(),
            EntityRef::Element(el) => el,
        }
    }

    /// Positions contributed by an entity to its system's bounding box.
    pub fn coords_of(&self, entity: EntityRef) -> Vec<Coord> {
        match entity {
            EntityRef::Station(id) => vec![self.station(id).coord()],
            EntityRef::Entrance(id) => vec![self.entrance(id).coord()],
            EntityRef::Segment(id) => self.segment(id).coords.clone(),
            EntityRef::StopArea(id) => self.stop_areas[id.0]
                .platforms
                .iter()
                .filter_map(|p| self.store.center(*p))
                .collect(),
            EntityRef::Route(_)
            | EntityRef::RouteMaster(_)
            | EntityRef::StopAreaGroup(_)
            | EntityRef::Element(_) => Vec::new(),
        }
    }

    pub fn tags_of(&self, entity: EntityRef) -> Option<&'a Tags> {
        self.store.tags(self.element_of(entity))
    }

    /// Short human-readable label used in issue messages.
    pub fn describe(&self, entity: EntityRef) -> String {
        let el = self.element_of(entity);
        let name = self
            .tags_of(entity)
            .and_then(|t| tag(t, "name").or_else(|| tag(t, "ref")));
        match name {
            Some(name) => format!("\"{name}\" ({el})"),
            None => el.to_string(),
        }
    }

    /// Stations served by a station, platform or stop position element.
    pub fn stations_for(&self, element: ElementId) -> &[StationId] {
        self.station_index
            .get(&element)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
