//! Overpass JSON parser for the filtered element stream.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::geo::Coord;
use crate::store::{Element, ElementKind, ElementStore, Member, Node, Relation, Way};

#[derive(Deserialize)]
#[serde(untagged)]
enum Document {
    Wrapped {
        #[serde(default)]
        osm3s: Option<Osm3s>,
        elements: Vec<RawElement>,
    },
    Bare(Vec<RawElement>),
}

#[derive(Deserialize)]
struct Osm3s {
    timestamp_osm_base: Option<String>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum RawElement {
    Node {
        id: i64,
        lat: f64,
        lon: f64,
        #[serde(default)]
        tags: BTreeMap<String, String>,
    },
    Way {
        id: i64,
        #[serde(default)]
        nodes: Vec<i64>,
        #[serde(default)]
        tags: BTreeMap<String, String>,
    },
    Relation {
        id: i64,
        #[serde(default)]
        members: Vec<RawMember>,
        #[serde(default)]
        tags: BTreeMap<String, String>,
    },
}

#[derive(Deserialize)]
struct RawMember {
    #[serde(rename = "type")]
    kind: ElementKind,
    #[serde(rename = "ref")]
    ref_id: i64,
    #[serde(default)]
    role: String,
}

impl From<RawElement> for Element {
    fn from(raw: RawElement) -> Self {
        match raw {
            RawElement::Node { id, lat, lon, tags } => Element::Node(Node {
                id,
                coord: Coord::new(lon, lat),
                tags,
            }),
            RawElement::Way { id, nodes, tags } => Element::Way(Way { id, nodes, tags }),
            RawElement::Relation { id, members, tags } => Element::Relation(Relation {
                id,
                members: members
                    .into_iter()
                    .map(|m| Member {
                        kind: m.kind,
                        ref_id: m.ref_id,
                        role: m.role,
                    })
                    .collect(),
                tags,
            }),
        }
    }
}

/// Decodes an Overpass JSON document (or a bare element array) into an
/// [`ElementStore`].
///
/// # Errors
///
/// Returns an error if the bytes are not valid JSON in either layout.
pub fn parse_elements(bytes: &[u8]) -> Result<ElementStore> {
    let document: Document =
        serde_json::from_slice(bytes).context("input is not an Overpass JSON element list")?;

    let (raw, snapshot) = match document {
        Document::Wrapped { osm3s, elements } => {
            let snapshot = osm3s
                .and_then(|o| o.timestamp_osm_base)
                .and_then(|ts| parse_timestamp(&ts));
            (elements, snapshot)
        }
        Document::Bare(elements) => (elements, None),
    };

    let count = raw.len();
    let store = ElementStore::from_elements(raw.into_iter().map(Element::from)).with_snapshot(snapshot);
    if store.duplicates() > 0 {
        warn!(duplicates = store.duplicates(), "Duplicate element ids in input");
    }
    debug!(read = count, kept = store.len(), "Elements parsed");
    Ok(store)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(_) => NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%SZ")
            .ok()
            .map(|naive| naive.and_utc()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ElementId;

    #[test]
    fn test_parse_wrapped_document() {
        let json = br#"{
            "version": 0.6,
            "osm3s": {"timestamp_osm_base": "2024-03-01T12:00:00Z"},
            "elements": [
                {"type": "node", "id": 1, "lat": 55.75, "lon": 37.61, "tags": {"railway": "station"}},
                {"type": "way", "id": 2, "nodes": [1, 3]},
                {"type": "relation", "id": 4, "members": [{"type": "node", "ref": 1, "role": "stop"}],
                 "tags": {"type": "route"}}
            ]
        }"#;
        let store = parse_elements(json).unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.node(1).unwrap().coord, Coord::new(37.61, 55.75));
        assert_eq!(store.way(2).unwrap().nodes, vec![1, 3]);
        let rel = store.relation(4).unwrap();
        assert_eq!(rel.members[0].element_id(), ElementId::node(1));
        assert_eq!(rel.members[0].role, "stop");
        assert_eq!(
            store.snapshot().unwrap().to_rfc3339(),
            "2024-03-01T12:00:00+00:00"
        );
    }

    #[test]
    fn test_parse_bare_array() {
        let json = br#"[{"type": "node", "id": 1, "lat": 1.0, "lon": 2.0}]"#;
        let store = parse_elements(json).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.snapshot().is_none());
    }

    #[test]
    fn test_parse_member_without_role() {
        let json = br#"[{"type": "relation", "id": 9, "members": [{"type": "way", "ref": 5}],
                        "tags": {"public_transport": "stop_area"}}]"#;
        let store = parse_elements(json).unwrap();
        assert_eq!(store.relation(9).unwrap().members[0].role, "");
    }

    #[test]
    fn test_parse_invalid_bytes() {
        let result = parse_elements(&[0xFF, 0xFE, 0x00, 0x01]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_bad_timestamp_is_ignored() {
        let json = br#"{"osm3s": {"timestamp_osm_base": "yesterday"}, "elements": []}"#;
        let store = parse_elements(json).unwrap();
        assert!(store.is_empty());
        assert!(store.snapshot().is_none());
    }
}
