//! In-memory element store for the filtered OSM extract.
//!
//! Elements are kept in ordered maps keyed by their numeric id so that every
//! later stage iterates in the same order no matter how the input was sorted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::geo::{Coord, centroid};

pub type Tags = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Node,
    Way,
    Relation,
}

impl ElementKind {
    fn prefix(self) -> char {
        match self {
            ElementKind::Node => 'n',
            ElementKind::Way => 'w',
            ElementKind::Relation => 'r',
        }
    }
}

/// Identity of an OSM element, ordered by kind then id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ElementId {
    pub kind: ElementKind,
    pub id: i64,
}

impl ElementId {
    pub fn node(id: i64) -> Self {
        Self {
            kind: ElementKind::Node,
            id,
        }
    }

    pub fn way(id: i64) -> Self {
        Self {
            kind: ElementKind::Way,
            id,
        }
    }

    pub fn relation(id: i64) -> Self {
        Self {
            kind: ElementKind::Relation,
            id,
        }
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.id)
    }
}

impl Serialize for ElementId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl FromStr for ElementId {
    type Err = String;

    /// Parses the `n1` / `w2` / `r3` form produced by `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let kind = match chars.next() {
            Some('n') => ElementKind::Node,
            Some('w') => ElementKind::Way,
            Some('r') => ElementKind::Relation,
            _ => return Err(format!("invalid element id {s:?}")),
        };
        let id = chars
            .as_str()
            .parse()
            .map_err(|_| format!("invalid element id {s:?}"))?;
        Ok(Self { kind, id })
    }
}

impl<'de> Deserialize<'de> for ElementId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Looks up a tag value as `&str`.
pub fn tag<'t>(tags: &'t Tags, key: &str) -> Option<&'t str> {
    tags.get(key).map(String::as_str)
}

/// True for elements that are planned or being built rather than in service.
pub fn is_unbuilt(tags: &Tags) -> bool {
    tags.contains_key("construction") || tags.contains_key("proposed")
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: i64,
    pub coord: Coord,
    pub tags: Tags,
}

#[derive(Debug, Clone)]
pub struct Way {
    pub id: i64,
    pub nodes: Vec<i64>,
    pub tags: Tags,
}

#[derive(Debug, Clone)]
pub struct Member {
    pub kind: ElementKind,
    pub ref_id: i64,
    pub role: String,
}

impl Member {
    pub fn element_id(&self) -> ElementId {
        ElementId {
            kind: self.kind,
            id: self.ref_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Relation {
    pub id: i64,
    pub members: Vec<Member>,
    pub tags: Tags,
}

#[derive(Debug, Clone)]
pub enum Element {
    Node(Node),
    Way(Way),
    Relation(Relation),
}

impl Element {
    pub fn element_id(&self) -> ElementId {
        match self {
            Element::Node(n) => ElementId::node(n.id),
            Element::Way(w) => ElementId::way(w.id),
            Element::Relation(r) => ElementId::relation(r.id),
        }
    }
}

#[derive(Debug, Default)]
pub struct ElementStore {
    nodes: BTreeMap<i64, Node>,
    ways: BTreeMap<i64, Way>,
    relations: BTreeMap<i64, Relation>,
    snapshot: Option<DateTime<Utc>>,
    duplicates: usize,
}

impl ElementStore {
    /// Builds a store from an element stream. The first occurrence of an id
    /// wins; member-less relations are dropped.
    pub fn from_elements<I: IntoIterator<Item = Element>>(elements: I) -> Self {
        let mut store = Self::default();
        for element in elements {
            let fresh = match element {
                Element::Node(n) => insert_first(&mut store.nodes, n.id, n),
                Element::Way(w) => insert_first(&mut store.ways, w.id, w),
                Element::Relation(r) => {
                    if r.members.is_empty() && !is_grouping(&r.tags) {
                        continue;
                    }
                    insert_first(&mut store.relations, r.id, r)
                }
            };
            if !fresh {
                store.duplicates += 1;
            }
        }
        store
    }

    pub fn with_snapshot(mut self, snapshot: Option<DateTime<Utc>>) -> Self {
        self.snapshot = snapshot;
        self
    }

    pub fn snapshot(&self) -> Option<DateTime<Utc>> {
        self.snapshot
    }

    /// Number of elements skipped because their id was already present.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    pub fn len(&self) -> usize {
        self.nodes.len() + self.ways.len() + self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn node(&self, id: i64) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn way(&self, id: i64) -> Option<&Way> {
        self.ways.get(&id)
    }

    pub fn relation(&self, id: i64) -> Option<&Relation> {
        self.relations.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn ways(&self) -> impl Iterator<Item = &Way> {
        self.ways.values()
    }

    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.values()
    }

    pub fn contains(&self, id: ElementId) -> bool {
        self.tags(id).is_some()
    }

    pub fn tags(&self, id: ElementId) -> Option<&Tags> {
        match id.kind {
            ElementKind::Node => self.nodes.get(&id.id).map(|n| &n.tags),
            ElementKind::Way => self.ways.get(&id.id).map(|w| &w.tags),
            ElementKind::Relation => self.relations.get(&id.id).map(|r| &r.tags),
        }
    }

    /// Coordinates of the way's nodes that are present in the store.
    pub fn way_coords(&self, way: &Way) -> Vec<Coord> {
        way.nodes
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .map(|n| n.coord)
            .collect()
    }

    /// Representative position of any element: the node itself, the mean of
    /// a way's nodes, or the mean of a relation's member centres.
    pub fn center(&self, id: ElementId) -> Option<Coord> {
        let mut visited = BTreeSet::new();
        self.center_inner(id, &mut visited)
    }

    fn center_inner(&self, id: ElementId, visited: &mut BTreeSet<i64>) -> Option<Coord> {
        match id.kind {
            ElementKind::Node => self.nodes.get(&id.id).map(|n| n.coord),
            ElementKind::Way => centroid(self.way_coords(self.ways.get(&id.id)?)),
            ElementKind::Relation => {
                if !visited.insert(id.id) {
                    return None;
                }
                let relation = self.relations.get(&id.id)?;
                let centres: Vec<Coord> = relation
                    .members
                    .iter()
                    .filter_map(|m| self.center_inner(m.element_id(), visited))
                    .collect();
                centroid(centres)
            }
        }
    }
}

fn insert_first<T>(map: &mut BTreeMap<i64, T>, id: i64, value: T) -> bool {
    if map.contains_key(&id) {
        return false;
    }
    map.insert(id, value);
    true
}

// Empty groupings are kept so the builder can report them.
fn is_grouping(tags: &Tags) -> bool {
    matches!(tag(tags, "type"), Some("route") | Some("route_master"))
        || matches!(
            tag(tags, "public_transport"),
            Some("stop_area") | Some("stop_area_group")
        )
}

/// Element constructors shared by unit tests across the crate.
#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    pub fn node(id: i64, lon: f64, lat: f64, pairs: &[(&str, &str)]) -> Element {
        Element::Node(Node {
            id,
            coord: Coord::new(lon, lat),
            tags: tags(pairs),
        })
    }

    pub fn way(id: i64, nodes: &[i64], pairs: &[(&str, &str)]) -> Element {
        Element::Way(Way {
            id,
            nodes: nodes.to_vec(),
            tags: tags(pairs),
        })
    }

    pub fn relation(id: i64, members: &[(ElementId, &str)], pairs: &[(&str, &str)]) -> Element {
        Element::Relation(Relation {
            id,
            members: members
                .iter()
                .map(|(el, role)| Member {
                    kind: el.kind,
                    ref_id: el.id,
                    role: role.to_string(),
                })
                .collect(),
            tags: tags(pairs),
        })
    }

    pub fn n(id: i64) -> ElementId {
        ElementId::node(id)
    }

    pub fn w(id: i64) -> ElementId {
        ElementId::way(id)
    }

    pub fn r(id: i64) -> ElementId {
        ElementId::relation(id)
    }

    pub fn station(id: i64, lon: f64, lat: f64, name: &str) -> Element {
        node(
            id,
            lon,
            lat,
            &[("railway", "station"), ("station", "subway"), ("name", name)],
        )
    }

    pub fn rail(id: i64, nodes: &[i64]) -> Element {
        way(id, nodes, &[("railway", "subway")])
    }

    pub fn route(id: i64, members: &[(ElementId, &str)], name: &str) -> Element {
        relation(
            id,
            members,
            &[
                ("type", "route"),
                ("route", "subway"),
                ("ref", name),
                ("name", name),
                ("colour", "#0000ff"),
            ],
        )
    }
}
