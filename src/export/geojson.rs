//! GeoJSON feature collections for map rendering.

use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;

use crate::export::ExportError;
use crate::geo::Coord;
use crate::model::{EntranceMatch, Network, RouteId};
use crate::partition::System;

#[derive(Debug, Serialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    kind: &'static str,
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            kind: "FeatureCollection",
            features,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Feature {
    #[serde(rename = "type")]
    kind: &'static str,
    pub geometry: Geometry,
    pub properties: BTreeMap<&'static str, Value>,
}

impl Feature {
    fn new(geometry: Geometry, properties: BTreeMap<&'static str, Value>) -> Self {
        Self {
            kind: "Feature",
            geometry,
            properties,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point([f64; 2]),
    LineString(Vec<[f64; 2]>),
}

impl Geometry {
    fn point(c: Coord) -> Self {
        Geometry::Point(c.to_pair())
    }

    fn line(coords: &[Coord]) -> Self {
        Geometry::LineString(coords.iter().map(|c| c.to_pair()).collect())
    }
}

/// Stations, entrances and route lines of one system.
pub fn system_features(
    network: &Network<'_>,
    system: &System,
    lines: &[(RouteId, Vec<Coord>)],
) -> FeatureCollection {
    let mut features = Vec::new();
    for id in &system.stations {
        let station = network.station(*id);
        let properties = BTreeMap::from([
            ("kind", json!("station")),
            ("id", json!(station.element().to_string())),
            ("name", json!(station.name())),
            ("mode", json!(station.mode)),
            ("colour", json!(station.mode.colour())),
        ]);
        features.push(Feature::new(Geometry::point(station.coord()), properties));
    }
    for id in &system.entrances {
        let entrance = network.entrance(*id);
        let station = entrance
            .station
            .map(|s| network.station(s).element().to_string());
        let properties = BTreeMap::from([
            ("kind", json!("entrance")),
            ("id", json!(entrance.element().to_string())),
            ("name", json!(entrance.name())),
            ("station", json!(station)),
        ]);
        features.push(Feature::new(Geometry::point(entrance.coord()), properties));
    }
    for (id, line) in lines {
        let route = network.route(*id);
        let colour = route
            .tag("colour")
            .unwrap_or_else(|| route.mode.colour());
        let properties = BTreeMap::from([
            ("kind", json!("route")),
            ("id", json!(route.element().to_string())),
            ("ref", json!(route.tag("ref"))),
            ("name", json!(route.tag("name"))),
            ("mode", json!(route.mode)),
            ("colour", json!(colour)),
        ]);
        features.push(Feature::new(Geometry::line(line), properties));
    }
    FeatureCollection::new(features)
}

/// Entrances that belong to no stop area, for the whole run. Entrances
/// attached by distance name their nearest station.
pub fn unused_entrances(network: &Network<'_>) -> Result<Vec<u8>, ExportError> {
    let features = network
        .entrances
        .iter()
        .filter(|e| e.matched_by != EntranceMatch::StopArea)
        .map(|e| {
            let station = e.station.map(|s| network.station(s).element().to_string());
            let properties = BTreeMap::from([
                ("id", json!(e.element().to_string())),
                ("name", json!(e.name())),
                ("station", json!(station)),
                ("orphan", json!(e.matched_by == EntranceMatch::Orphan)),
            ]);
            Feature::new(Geometry::point(e.coord()), properties)
        })
        .collect();
    Ok(serde_json::to_vec_pretty(&FeatureCollection::new(features))?)
}
