//! Route validation: continuity, alternation, terminals, duplicates and modes.
//!
//! Routes are independent, so they are checked in parallel. Each task fills
//! its own issue buffer; buffers come back in route order.

use rayon::prelude::*;
use std::collections::BTreeSet;
use tracing::info;

use crate::config::Config;
use crate::geo::Coord;
use crate::issues::{EntityRef, Issue, IssueKind};
use crate::model::{Network, RouteId, RouteMember, SegmentId, StationId};

#[derive(Debug, Clone)]
pub struct RouteVerdict {
    pub route: RouteId,
    pub issues: Vec<Issue>,
    /// False when an issue keeps the route out of the export.
    pub exportable: bool,
}

#[tracing::instrument(skip_all, fields(routes = network.routes.len()))]
pub fn validate_routes(network: &Network<'_>, config: &Config) -> Vec<RouteVerdict> {
    let verdicts: Vec<RouteVerdict> = (0..network.routes.len())
        .into_par_iter()
        .map(|i| validate_route(network, RouteId(i), config))
        .collect();

    let excluded = verdicts.iter().filter(|v| !v.exportable).count();
    let issues: usize = verdicts.iter().map(|v| v.issues.len()).sum();
    info!(routes = verdicts.len(), excluded, issues, "Routes validated");
    verdicts
}

pub fn validate_route(network: &Network<'_>, id: RouteId, config: &Config) -> RouteVerdict {
    let route = network.route(id);
    let subject = EntityRef::Route(id);
    let label = network.describe(subject);
    let mut issues = Vec::new();

    let distinct = route.distinct_stops();
    if distinct < config.min_stops {
        issues.push(Issue::new(
            IssueKind::RouteTooShort,
            vec![subject],
            format!(
                "Route {label} has {distinct} distinct stations, at least {} required",
                config.min_stops
            ),
        ));
    }

    check_terminals(network, id, &label, &mut issues);
    check_alternation(network, id, &label, &mut issues);
    check_duplicates(network, id, &label, &mut issues);
    check_modes(network, id, &label, &mut issues);
    check_gaps(network, id, config, &mut issues);

    let exportable = !issues.iter().any(|i| i.kind.excludes_route());
    RouteVerdict {
        route: id,
        issues,
        exportable,
    }
}

fn check_terminals(network: &Network<'_>, id: RouteId, label: &str, issues: &mut Vec<Issue>) {
    let route = network.route(id);
    let (Some(first), Some(last)) = (route.members.first(), route.members.last()) else {
        return;
    };
    if route.stops().next().is_none() {
        return;
    }
    match (first, last) {
        (RouteMember::Stop(a), RouteMember::Stop(b)) => {
            if route.circular && a != b {
                issues.push(Issue::new(
                    IssueKind::CircularNotClosed,
                    vec![EntityRef::Route(id), EntityRef::Station(*a), EntityRef::Station(*b)],
                    format!(
                        "Circular route {label} starts at {} but ends at {}",
                        network.describe(EntityRef::Station(*a)),
                        network.describe(EntityRef::Station(*b))
                    ),
                ));
            }
        }
        _ => {
            let end = if matches!(first, RouteMember::Stop(_)) {
                "ends"
            } else {
                "starts"
            };
            issues.push(Issue::new(
                IssueKind::UnterminatedRoute,
                vec![EntityRef::Route(id)],
                format!("Route {label} {end} with a track instead of a station"),
            ));
        }
    }
}

fn check_alternation(network: &Network<'_>, id: RouteId, label: &str, issues: &mut Vec<Issue>) {
    let route = network.route(id);
    for pair in route.members.windows(2) {
        if let [RouteMember::Stop(a), RouteMember::Stop(b)] = pair {
            issues.push(Issue::new(
                IssueKind::BrokenAlternation,
                vec![EntityRef::Route(id), EntityRef::Station(*a), EntityRef::Station(*b)],
                format!(
                    "Route {label} has no track between {} and {}",
                    network.describe(EntityRef::Station(*a)),
                    network.describe(EntityRef::Station(*b))
                ),
            ));
        }
    }
}

fn check_duplicates(network: &Network<'_>, id: RouteId, label: &str, issues: &mut Vec<Issue>) {
    let route = network.route(id);
    let stops: Vec<StationId> = route.stops().collect();
    let closing = route.circular && stops.len() > 1 && stops.first() == stops.last();
    let mut seen = BTreeSet::new();
    let mut reported = BTreeSet::new();
    for (i, stop) in stops.iter().enumerate() {
        if closing && i == stops.len() - 1 {
            break;
        }
        if !seen.insert(*stop) && reported.insert(*stop) {
            issues.push(Issue::new(
                IssueKind::DuplicateStop,
                vec![EntityRef::Route(id), EntityRef::Station(*stop)],
                format!(
                    "Station {} appears more than once in route {label}",
                    network.describe(EntityRef::Station(*stop))
                ),
            ));
        }
    }
}

fn check_modes(network: &Network<'_>, id: RouteId, label: &str, issues: &mut Vec<Issue>) {
    let route = network.route(id);
    let stations: BTreeSet<StationId> = route.stops().collect();
    for station in stations {
        let mode = network.station(station).mode;
        if mode != route.mode {
            issues.push(Issue::new(
                IssueKind::ModeConflict,
                vec![EntityRef::Route(id), EntityRef::Station(station)],
                format!(
                    "{mode} station {} in {} route {label}",
                    network.describe(EntityRef::Station(station)),
                    route.mode
                ),
            ));
        }
    }
    let segments: BTreeSet<SegmentId> = route.segments().collect();
    for segment in segments {
        if let Some(mode) = network.segment(segment).mode {
            if mode != route.mode {
                issues.push(Issue::new(
                    IssueKind::ModeConflict,
                    vec![EntityRef::Route(id), EntityRef::Segment(segment)],
                    format!(
                        "{mode} track {} in {} route {label}",
                        network.segment(segment).element(),
                        route.mode
                    ),
                ));
            }
        }
    }
}

fn check_gaps(network: &Network<'_>, id: RouteId, config: &Config, issues: &mut Vec<Issue>) {
    let route = network.route(id);
    let tolerance = config.gap_tolerance_m;
    for run in track_runs(&route.members) {
        let prev = run.before.map(|s| (s, network.station(s).coord()));
        let next = run.after.map(|s| (s, network.station(s).coord()));
        let oriented = orient_run(network, &run.segments, prev.map(|p| p.1), next.map(|n| n.1));

        let mut cursor: Option<(EntityRef, Coord)> = prev.map(|(s, c)| (EntityRef::Station(s), c));
        for o in &oriented {
            let Some((start, end)) = o.ends else {
                cursor = None;
                continue;
            };
            if let Some((from, at)) = cursor {
                let distance = at.distance_to(&start);
                if distance > tolerance {
                    issues.push(gap(network, from, EntityRef::Segment(o.id), distance));
                }
            }
            cursor = Some((EntityRef::Segment(o.id), end));
        }

        if let (Some((station, coord)), Some((EntityRef::Segment(last), end))) = (next, cursor) {
            let distance = end.distance_to(&coord);
            if distance > tolerance {
                issues.push(gap(
                    network,
                    EntityRef::Station(station),
                    EntityRef::Segment(last),
                    distance,
                ));
            }
        }
    }
}

fn gap(network: &Network<'_>, a: EntityRef, b: EntityRef, distance: f64) -> Issue {
    Issue::new(
        IssueKind::Gap,
        vec![a, b],
        format!(
            "Gap of {distance:.0} m between {} and {}",
            network.describe(a),
            network.describe(b)
        ),
    )
    .with_distance(distance)
}

/// A maximal run of consecutive track members and the stops around it.
#[derive(Debug, PartialEq)]
pub(crate) struct TrackRun {
    pub before: Option<StationId>,
    pub segments: Vec<SegmentId>,
    pub after: Option<StationId>,
}

pub(crate) fn track_runs(members: &[RouteMember]) -> Vec<TrackRun> {
    let mut runs = Vec::new();
    let mut i = 0;
    while i < members.len() {
        if let RouteMember::Stop(_) = members[i] {
            i += 1;
            continue;
        }
        let before = match i.checked_sub(1).map(|p| members[p]) {
            Some(RouteMember::Stop(s)) => Some(s),
            _ => None,
        };
        let mut segments = Vec::new();
        while let Some(RouteMember::Track(s)) = members.get(i) {
            segments.push(*s);
            i += 1;
        }
        let after = match members.get(i) {
            Some(RouteMember::Stop(s)) => Some(*s),
            _ => None,
        };
        runs.push(TrackRun {
            before,
            segments,
            after,
        });
    }
    runs
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Oriented {
    pub id: SegmentId,
    /// Start and end in travel order; `None` when the way has no known nodes.
    pub ends: Option<(Coord, Coord)>,
    pub reversed: bool,
}

/// Orients each segment of a run in travel direction, starting near
/// `anchor` and heading towards `target`.
pub(crate) fn orient_run(
    network: &Network<'_>,
    run: &[SegmentId],
    anchor: Option<Coord>,
    target: Option<Coord>,
) -> Vec<Oriented> {
    let mut out = Vec::with_capacity(run.len());
    let mut cursor = anchor;
    for (k, id) in run.iter().enumerate() {
        let Some((a, b)) = network.segment(*id).endpoints() else {
            out.push(Oriented {
                id: *id,
                ends: None,
                reversed: false,
            });
            cursor = None;
            continue;
        };
        let reversed = match cursor {
            Some(c) => c.distance_to(&b) < c.distance_to(&a),
            None => {
                let ahead: Vec<Coord> = run[k + 1..]
                    .iter()
                    .find_map(|s| network.segment(*s).endpoints())
                    .map(|(p, q)| vec![p, q])
                    .or_else(|| target.map(|t| vec![t]))
                    .unwrap_or_default();
                let nearest = |c: Coord| {
                    ahead
                        .iter()
                        .map(|p| c.distance_to(p))
                        .fold(f64::INFINITY, f64::min)
                };
                !ahead.is_empty() && nearest(a) < nearest(b)
            }
        };
        let ends = if reversed { (b, a) } else { (a, b) };
        out.push(Oriented {
            id: *id,
            ends: Some(ends),
            reversed,
        });
        cursor = Some(ends.1);
    }
    out
}
