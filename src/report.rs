//! Validation log: issues grouped by system, most severe first.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::geo::BBox;
use crate::issues::{Issue, IssueKind, Severity};
use crate::model::Network;
use crate::partition::{Partition, System, UNMATCHED};
use crate::store::ElementId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeverityCounts {
    pub fatal: usize,
    pub error: usize,
    pub warning: usize,
    pub notice: usize,
}

impl SeverityCounts {
    pub fn add(&mut self, severity: Severity) {
        match severity {
            Severity::Fatal => self.fatal += 1,
            Severity::Error => self.error += 1,
            Severity::Warning => self.warning += 1,
            Severity::Notice => self.notice += 1,
        }
    }

    pub fn merge(&mut self, other: &SeverityCounts) {
        self.fatal += other.fatal;
        self.error += other.error;
        self.warning += other.warning;
        self.notice += other.notice;
    }

    pub fn total(&self) -> usize {
        self.fatal + self.error + self.warning + self.notice
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntityCounts {
    pub stations: usize,
    pub entrances: usize,
    pub segments: usize,
    pub routes: usize,
    pub route_masters: usize,
    pub stop_areas: usize,
    pub stop_area_groups: usize,
}

impl EntityCounts {
    fn of(system: &System) -> Self {
        Self {
            stations: system.stations.len(),
            entrances: system.entrances.len(),
            segments: system.segments.len(),
            routes: system.routes.len(),
            route_masters: system.masters.len(),
            stop_areas: system.stop_areas.len(),
            stop_area_groups: system.groups.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IssueRecord {
    pub severity: Severity,
    pub kind: IssueKind,
    /// Element ids of the subjects, primary first.
    pub subjects: Vec<ElementId>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_m: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemReport {
    pub id: String,
    pub name: Option<String>,
    pub bbox: Option<BBox>,
    pub valid: bool,
    pub counts: SeverityCounts,
    pub entities: EntityCounts,
    pub issues: Vec<IssueRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationLog {
    /// Timestamp of the input snapshot, when the input carries one.
    pub snapshot: Option<DateTime<Utc>>,
    pub totals: SeverityCounts,
    pub systems: Vec<SystemReport>,
    pub unmatched: SystemReport,
}

impl ValidationLog {
    pub fn system(&self, id: &str) -> Option<&SystemReport> {
        self.systems.iter().find(|s| s.id == id)
    }

    pub fn valid_systems(&self) -> usize {
        self.systems.iter().filter(|s| s.valid).count()
    }
}

#[tracing::instrument(skip_all, fields(systems = partition.systems.len()))]
pub fn build_log(
    network: &Network<'_>,
    partition: &Partition,
    snapshot: Option<DateTime<Utc>>,
) -> ValidationLog {
    let systems: Vec<SystemReport> = partition
        .systems
        .iter()
        .map(|s| system_report(network, s))
        .collect();
    let unmatched = SystemReport {
        id: UNMATCHED.to_string(),
        name: None,
        bbox: None,
        valid: true,
        counts: count(&partition.unmatched),
        entities: EntityCounts::default(),
        issues: records(network, &partition.unmatched),
    };

    let mut totals = unmatched.counts;
    for report in &systems {
        totals.merge(&report.counts);
        if !report.valid {
            warn!(system = %report.id, fatal = report.counts.fatal, "System is invalid");
        }
    }
    let log = ValidationLog {
        snapshot,
        totals,
        systems,
        unmatched,
    };
    info!(
        systems = log.systems.len(),
        valid = log.valid_systems(),
        fatal = totals.fatal,
        error = totals.error,
        warning = totals.warning,
        notice = totals.notice,
        "Validation log built"
    );
    log
}

fn system_report(network: &Network<'_>, system: &System) -> SystemReport {
    SystemReport {
        id: system.id.clone(),
        name: system.name.clone(),
        bbox: system.bbox,
        valid: !system.issues.iter().any(|i| i.kind.invalidates_system()),
        counts: count(&system.issues),
        entities: EntityCounts::of(system),
        issues: records(network, &system.issues),
    }
}

fn count(issues: &[Issue]) -> SeverityCounts {
    let mut counts = SeverityCounts::default();
    for issue in issues {
        counts.add(issue.severity);
    }
    counts
}

/// Severity first, then subject element ids, then kind and message.
fn records(network: &Network<'_>, issues: &[Issue]) -> Vec<IssueRecord> {
    let mut records: Vec<IssueRecord> = issues
        .iter()
        .map(|i| IssueRecord {
            severity: i.severity,
            kind: i.kind,
            subjects: i.subjects.iter().map(|s| network.element_of(*s)).collect(),
            message: i.message.clone(),
            distance_m: i.distance_m.map(crate::export::round_m),
        })
        .collect();
    records.sort_by(|a, b| {
        a.severity
            .cmp(&b.severity)
            .then_with(|| a.subjects.cmp(&b.subjects))
            .then_with(|| a.kind.cmp(&b.kind))
            .then_with(|| a.message.cmp(&b.message))
    });
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_network;
    use crate::config::Config;
    use crate::issues::EntityRef;
    use crate::model::StationId;
    use crate::store::ElementStore;
    use crate::store::fixtures::*;

    fn network_store() -> ElementStore {
        ElementStore::from_elements(vec![
            station(1, 0.0, 0.0, "A"),
            station(2, 0.01, 0.0, "B"),
        ])
    }

    fn issue(kind: IssueKind, station: usize) -> Issue {
        Issue::new(kind, vec![EntityRef::Station(StationId(station))], format!("{kind:?}"))
    }

    #[test]
    fn test_issues_sorted_by_severity_then_subject() {
        let store = network_store();
        let built = build_network(&store, &Config::default());
        let system = System {
            id: "x".to_string(),
            issues: vec![
                issue(IssueKind::Gap, 1),
                issue(IssueKind::Gap, 0),
                issue(IssueKind::RouteTooShort, 1),
                issue(IssueKind::UnexpectedMember, 0),
            ],
            ..Default::default()
        };
        let report = system_report(&built.network, &system);
        let order: Vec<(IssueKind, ElementId)> = report
            .issues
            .iter()
            .map(|i| (i.kind, i.subjects[0]))
            .collect();
        assert_eq!(
            order,
            vec![
                (IssueKind::RouteTooShort, ElementId::node(2)),
                (IssueKind::Gap, ElementId::node(1)),
                (IssueKind::Gap, ElementId::node(2)),
                (IssueKind::UnexpectedMember, ElementId::node(1)),
            ]
        );
        assert_eq!(report.counts.fatal, 1);
        assert_eq!(report.counts.warning, 2);
        assert_eq!(report.counts.total(), 4);
    }

    #[test]
    fn test_route_fatal_keeps_system_valid() {
        let store = network_store();
        let built = build_network(&store, &Config::default());
        let mut system = System {
            id: "x".to_string(),
            issues: vec![issue(IssueKind::RouteTooShort, 0)],
            ..Default::default()
        };
        assert!(system_report(&built.network, &system).valid);

        system.issues.push(issue(IssueKind::ExportFailed, 0));
        assert!(!system_report(&built.network, &system).valid);
    }

    #[test]
    fn test_log_totals_include_unmatched() {
        let store = network_store();
        let built = build_network(&store, &Config::default());
        let partition = Partition {
            systems: vec![System {
                id: "x".to_string(),
                issues: vec![issue(IssueKind::Gap, 0)],
                ..Default::default()
            }],
            unmatched: vec![issue(IssueKind::OrphanEntrance, 1)],
        };
        let log = build_log(&built.network, &partition, None);
        assert_eq!(log.totals.warning, 2);
        assert_eq!(log.unmatched.id, "unmatched");
        assert!(log.system("x").is_some());
        assert_eq!(log.valid_systems(), 1);
    }
}
