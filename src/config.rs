//! Run configuration threaded through every stage.
//!
//! Loaded from an optional JSON file, overridden from the command line, and
//! checked with [`Config::validate`] before any element is processed.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Rail transit modes understood by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Subway,
    LightRail,
    Monorail,
    Train,
}

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::Subway, Mode::LightRail, Mode::Monorail, Mode::Train];

    /// Parses a `route=`, `station=` or `route_master=` tag value.
    pub fn from_tag(value: &str) -> Option<Self> {
        match value {
            "subway" => Some(Mode::Subway),
            "light_rail" => Some(Mode::LightRail),
            "monorail" => Some(Mode::Monorail),
            "train" => Some(Mode::Train),
            _ => None,
        }
    }

    /// Parses the `railway=` value of a track way.
    pub fn from_railway(value: &str) -> Option<Self> {
        match value {
            "subway" => Some(Mode::Subway),
            "light_rail" => Some(Mode::LightRail),
            "monorail" => Some(Mode::Monorail),
            "rail" => Some(Mode::Train),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Subway => "subway",
            Mode::LightRail => "light_rail",
            Mode::Monorail => "monorail",
            Mode::Train => "train",
        }
    }

    /// Fallback display colour when a route carries no `colour` tag.
    pub fn colour(self) -> &'static str {
        match self {
            Mode::Subway => "#0057b8",
            Mode::LightRail => "#2e9b3a",
            Mode::Monorail => "#8e44ad",
            Mode::Train => "#6d6e71",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One clustering rule of the partitioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnionRule {
    RouteMaster,
    RouteStops,
    StopArea,
    StopAreaGroup,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be a finite, non-negative distance, got {value}")]
    InvalidDistance { name: &'static str, value: f64 },
    #[error("min_stops must be at least 2, got {0}")]
    MinStopsTooLow(usize),
    #[error("at least one transit mode must be enabled")]
    NoModes,
    #[error("union rule {0:?} is listed more than once")]
    DuplicateUnionRule(UnionRule),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum distance in metres between a station and the adjacent end of a track.
    pub gap_tolerance_m: f64,
    /// Search radius for attaching entrances and platforms to stations outside stop areas.
    pub entrance_radius_m: f64,
    pub min_stops: usize,
    /// Export systems that matched no registry entry.
    pub include_unmatched: bool,
    pub modes: BTreeSet<Mode>,
    pub union_rules: Vec<UnionRule>,
    /// Draw route lines from stop to stop instead of along the tracks.
    pub crude_geometry: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gap_tolerance_m: 150.0,
            entrance_radius_m: 150.0,
            min_stops: 2,
            include_unmatched: true,
            modes: [Mode::Subway, Mode::LightRail, Mode::Monorail]
                .into_iter()
                .collect(),
            union_rules: vec![
                UnionRule::RouteMaster,
                UnionRule::RouteStops,
                UnionRule::StopArea,
                UnionRule::StopAreaGroup,
            ],
            crude_geometry: false,
        }
    }
}

impl Config {
    /// Loads a config from a JSON file; absent fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("gap_tolerance_m", self.gap_tolerance_m),
            ("entrance_radius_m", self.entrance_radius_m),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidDistance { name, value });
            }
        }
        if self.min_stops < 2 {
            return Err(ConfigError::MinStopsTooLow(self.min_stops));
        }
        if self.modes.is_empty() {
            return Err(ConfigError::NoModes);
        }
        let mut seen = BTreeSet::new();
        for rule in &self.union_rules {
            if !seen.insert(*rule) {
                return Err(ConfigError::DuplicateUnionRule(*rule));
            }
        }
        Ok(())
    }

    pub fn processes(&self, mode: Mode) -> bool {
        self.modes.contains(&mode)
    }

    pub fn applies(&self, rule: UnionRule) -> bool {
        self.union_rules.contains(&rule)
    }
}
