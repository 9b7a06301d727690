use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Mode;
use crate::export::Exportable;
use crate::issues::Severity;
use crate::model::Network;
use crate::partition::System;

/// One summary row per system, appended to the run CSV.
#[derive(Debug, Default, Serialize)]
pub struct SystemStats {
    pub snapshot: Option<DateTime<Utc>>,
    pub system_id: String,
    pub system_name: Option<String>,
    pub valid: bool,

    // entities
    pub stations: usize,
    pub entrances: usize,
    pub routes: usize,
    pub exportable_routes: usize,
    pub subway_lines: usize,
    pub light_rail_lines: usize,
    pub monorail_lines: usize,
    pub interchanges: usize,

    // issues
    pub fatal: usize,
    pub errors: usize,
    pub warnings: usize,
    pub notices: usize,
}

impl SystemStats {
    pub fn from_system(
        network: &Network<'_>,
        system: &System,
        exportable: &Exportable,
        snapshot: Option<DateTime<Utc>>,
    ) -> Self {
        let mut s = SystemStats {
            snapshot,
            system_id: system.id.clone(),
            system_name: system.name.clone(),
            valid: !system.issues.iter().any(|i| i.kind.invalidates_system()),
            stations: system.stations.len(),
            entrances: system.entrances.len(),
            routes: system.routes.len(),
            exportable_routes: system
                .routes
                .iter()
                .filter(|r| exportable.contains(**r))
                .count(),
            subway_lines: system.line_count(network, Mode::Subway),
            light_rail_lines: system.line_count(network, Mode::LightRail),
            monorail_lines: system.line_count(network, Mode::Monorail),
            interchanges: system.interchange_count(),
            ..Default::default()
        };

        for issue in &system.issues {
            match issue.severity {
                Severity::Fatal => s.fatal += 1,
                Severity::Error => s.errors += 1,
                Severity::Warning => s.warnings += 1,
                Severity::Notice => s.notices += 1,
            }
        }

        s
    }

    pub fn pct(part: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            (part as f64 / total as f64) * 100.0
        }
    }

    /// Share of routes that made it into the export.
    pub fn exportable_pct(&self) -> f64 {
        Self::pct(self.exportable_routes, self.routes)
    }
}
