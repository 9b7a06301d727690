//! Routing-ready graph of one system.

use serde::Serialize;

use crate::config::Mode;
use crate::export::{route_legs, round_m};
use crate::model::{Network, RouteId, StationId};
use crate::partition::System;

#[derive(Debug, Serialize)]
pub struct RoutingGraph {
    pub system: String,
    pub name: Option<String>,
    pub stations: Vec<GraphStation>,
    pub routes: Vec<GraphRoute>,
    pub edges: Vec<GraphEdge>,
    pub transfers: Vec<Transfer>,
}

#[derive(Debug, Serialize)]
pub struct GraphStation {
    pub id: String,
    pub name: Option<String>,
    pub mode: Mode,
    pub lat: f64,
    pub lon: f64,
    pub entrances: Vec<GraphEntrance>,
}

#[derive(Debug, Serialize)]
pub struct GraphEntrance {
    pub id: String,
    pub name: Option<String>,
    pub lat: f64,
    pub lon: f64,
    /// Straight-line walk to the station.
    pub distance_m: f64,
}

#[derive(Debug, Serialize)]
pub struct GraphRoute {
    pub id: String,
    #[serde(rename = "ref")]
    pub reference: Option<String>,
    pub name: Option<String>,
    pub mode: Mode,
    pub colour: String,
    pub from: Option<String>,
    pub to: Option<String>,
    pub network: Option<String>,
    pub stops: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub route: String,
    pub mode: Mode,
    pub length_m: f64,
    /// `[lon, lat]` pairs from station to station.
    pub geometry: Vec<[f64; 2]>,
}

#[derive(Debug, Serialize)]
pub struct Transfer {
    pub from: String,
    pub to: String,
    pub distance_m: f64,
}

fn station_id(network: &Network<'_>, id: StationId) -> String {
    network.station(id).element().to_string()
}

pub fn build_graph(network: &Network<'_>, system: &System, routes: &[RouteId]) -> RoutingGraph {
    let stations = system
        .stations
        .iter()
        .map(|s| {
            let station = network.station(*s);
            let entrances = system
                .entrances
                .iter()
                .map(|e| network.entrance(*e))
                .filter(|e| e.station == Some(*s))
                .map(|e| GraphEntrance {
                    id: e.element().to_string(),
                    name: e.name().map(str::to_string),
                    lat: e.coord().lat,
                    lon: e.coord().lon,
                    distance_m: round_m(e.coord().distance_to(&station.coord())),
                })
                .collect();
            GraphStation {
                id: station.element().to_string(),
                name: station.name().map(str::to_string),
                mode: station.mode,
                lat: station.coord().lat,
                lon: station.coord().lon,
                entrances,
            }
        })
        .collect();

    let mut graph_routes = Vec::with_capacity(routes.len());
    let mut edges = Vec::new();
    for id in routes {
        let route = network.route(*id);
        let route_id = route.element().to_string();
        let owned = |key: &str| route.tag(key).map(str::to_string);
        graph_routes.push(GraphRoute {
            id: route_id.clone(),
            reference: owned("ref"),
            name: owned("name"),
            mode: route.mode,
            colour: owned("colour").unwrap_or_else(|| route.mode.colour().to_string()),
            from: owned("from"),
            to: owned("to"),
            network: owned("network"),
            stops: route.stops().map(|s| station_id(network, s)).collect(),
        });
        for leg in route_legs(network, *id) {
            edges.push(GraphEdge {
                from: station_id(network, leg.from),
                to: station_id(network, leg.to),
                route: route_id.clone(),
                mode: route.mode,
                length_m: round_m(leg.length_m()),
                geometry: leg.geometry.iter().map(|c| c.to_pair()).collect(),
            });
        }
    }

    RoutingGraph {
        system: system.id.clone(),
        name: system.name.clone(),
        stations,
        routes: graph_routes,
        edges,
        transfers: transfers(network, system),
    }
}

/// Station pairs joined by a stop area group.
fn transfers(network: &Network<'_>, system: &System) -> Vec<Transfer> {
    let mut out = Vec::new();
    for group in &system.groups {
        let mut stations: Vec<StationId> = network.groups[group.0]
            .stop_areas
            .iter()
            .filter_map(|a| network.stop_areas[a.0].station())
            .filter(|s| system.stations.contains(s))
            .collect();
        stations.sort();
        stations.dedup();
        for (i, a) in stations.iter().enumerate() {
            for b in &stations[i + 1..] {
                let distance = network
                    .station(*a)
                    .coord()
                    .distance_to(&network.station(*b).coord());
                out.push(Transfer {
                    from: station_id(network, *a),
                    to: station_id(network, *b),
                    distance_m: round_m(distance),
                });
            }
        }
    }
    out
}
