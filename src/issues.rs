//! Validation issues and their severities.

use serde::Serialize;
use std::fmt;

use crate::model::{EntranceId, RouteId, RouteMasterId, SegmentId, StationId, StopAreaGroupId, StopAreaId};
use crate::store::ElementId;

/// Ordered most severe first, so an ascending sort lists fatals at the top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Fatal,
    Error,
    Warning,
    Notice,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Fatal => "fatal",
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Notice => "notice",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum IssueKind {
    // structural
    EmptyRoute,
    MissingSegment,
    UnresolvedStop,
    UnexpectedMember,
    MissingRef,
    MissingColour,
    AmbiguousStation,
    RouteInTwoMasters,
    MasterModeConflict,
    StopAreaWithoutStation,
    MultipleStations,
    CircularGrouping,
    OrphanEntrance,
    EntranceOutsideStopArea,
    // topological
    RouteTooShort,
    UnterminatedRoute,
    CircularNotClosed,
    BrokenAlternation,
    Gap,
    DuplicateStop,
    ModeConflict,
    // clustering
    UnidentifiedSystem,
    IsolatedStation,
    CountMismatch,
    // export
    NoExportableRoutes,
    ExportFailed,
}

impl IssueKind {
    pub fn severity(self) -> Severity {
        use IssueKind::*;
        match self {
            EmptyRoute | RouteTooShort | NoExportableRoutes | ExportFailed => Severity::Fatal,
            MissingSegment | UnresolvedStop | AmbiguousStation | RouteInTwoMasters
            | MasterModeConflict | MultipleStations | CircularGrouping | UnterminatedRoute
            | CircularNotClosed | BrokenAlternation | DuplicateStop | CountMismatch => {
                Severity::Error
            }
            StopAreaWithoutStation | OrphanEntrance | Gap | ModeConflict | UnidentifiedSystem
            | IsolatedStation => Severity::Warning,
            UnexpectedMember | MissingRef | MissingColour | EntranceOutsideStopArea => {
                Severity::Notice
            }
        }
    }

    /// Kinds that keep the offending route out of the export.
    pub fn excludes_route(self) -> bool {
        matches!(
            self,
            IssueKind::EmptyRoute
                | IssueKind::RouteTooShort
                | IssueKind::UnterminatedRoute
                | IssueKind::CircularNotClosed
                | IssueKind::BrokenAlternation
        )
    }

    /// Kinds that mark the whole system invalid.
    pub fn invalidates_system(self) -> bool {
        matches!(self, IssueKind::NoExportableRoutes | IssueKind::ExportFailed)
    }
}

/// Reference to a built entity, or to a raw element that never became one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityRef {
    Station(StationId),
    Entrance(EntranceId),
    Segment(SegmentId),
    Route(RouteId),
    RouteMaster(RouteMasterId),
    StopArea(StopAreaId),
    StopAreaGroup(StopAreaGroupId),
    Element(ElementId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    pub severity: Severity,
    pub kind: IssueKind,
    pub subjects: Vec<EntityRef>,
    pub message: String,
    /// Measured distance in metres, for gap-like issues.
    pub distance_m: Option<f64>,
}

impl Issue {
    pub fn new(kind: IssueKind, subjects: Vec<EntityRef>, message: impl Into<String>) -> Self {
        Self {
            severity: kind.severity(),
            kind,
            subjects,
            message: message.into(),
            distance_m: None,
        }
    }

    pub fn with_distance(mut self, distance_m: f64) -> Self {
        self.distance_m = Some(distance_m);
        self
    }

    pub fn primary(&self) -> Option<EntityRef> {
        self.subjects.first().copied()
    }

    pub fn mentions(&self, subject: EntityRef) -> bool {
        self.subjects.contains(&subject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_order_most_severe_first() {
        let mut all = vec![Severity::Notice, Severity::Fatal, Severity::Warning, Severity::Error];
        all.sort();
        assert_eq!(
            all,
            vec![Severity::Fatal, Severity::Error, Severity::Warning, Severity::Notice]
        );
    }

    #[test]
    fn test_kind_severities() {
        assert_eq!(IssueKind::RouteTooShort.severity(), Severity::Fatal);
        assert_eq!(IssueKind::Gap.severity(), Severity::Warning);
        assert_eq!(IssueKind::ModeConflict.severity(), Severity::Warning);
        assert_eq!(IssueKind::MultipleStations.severity(), Severity::Error);
    }

    #[test]
    fn test_route_fatal_does_not_invalidate_system() {
        assert!(IssueKind::RouteTooShort.excludes_route());
        assert!(!IssueKind::RouteTooShort.invalidates_system());
        assert!(IssueKind::ExportFailed.invalidates_system());
        assert!(!IssueKind::ModeConflict.excludes_route());
    }

    #[test]
    fn test_issue_builder() {
        let issue = Issue::new(
            IssueKind::Gap,
            vec![EntityRef::Station(StationId(0)), EntityRef::Segment(SegmentId(3))],
            "gap",
        )
        .with_distance(412.0);
        assert_eq!(issue.severity, Severity::Warning);
        assert_eq!(issue.primary(), Some(EntityRef::Station(StationId(0))));
        assert!(issue.mentions(EntityRef::Segment(SegmentId(3))));
        assert_eq!(issue.distance_m, Some(412.0));
    }
}
