//! Registry of expected metro systems, loaded from CSV.
//!
//! Columns: `name,west,south,east,north` and, optionally, the expected
//! `stations`, `subway_lines`, `light_rail_lines` and `interchanges` counts.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::info;

use crate::geo::BBox;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RegistryEntry {
    pub name: String,
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
    #[serde(default)]
    pub stations: Option<usize>,
    #[serde(default)]
    pub subway_lines: Option<usize>,
    #[serde(default)]
    pub light_rail_lines: Option<usize>,
    #[serde(default)]
    pub interchanges: Option<usize>,
}

impl RegistryEntry {
    pub fn bbox(&self) -> BBox {
        BBox::new(self.west, self.south, self.east, self.north)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: Vec<RegistryEntry>,
}

impl Registry {
    pub fn new(entries: Vec<RegistryEntry>) -> Self {
        Self { entries }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open registry {}", path.display()))?;
        let registry = Self::from_reader(file)
            .with_context(|| format!("Failed to read registry {}", path.display()))?;
        info!(path = %path.display(), entries = registry.len(), "Registry loaded");
        Ok(registry)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut entries = Vec::new();
        for result in rdr.deserialize() {
            let entry: RegistryEntry = result?;
            entries.push(entry);
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    /// Keeps only the entries named `name`, matched on the name itself or
    /// its system id.
    pub fn select(&self, name: &str) -> Registry {
        let entries = self
            .entries
            .iter()
            .filter(|e| e.name == name || slugify(&e.name) == name)
            .cloned()
            .collect();
        Registry { entries }
    }

    /// The smallest entry whose bounding box contains `bbox`; ties go to the
    /// alphabetically first name.
    pub fn best_match(&self, bbox: &BBox) -> Option<&RegistryEntry> {
        self.entries
            .iter()
            .filter(|e| e.bbox().contains(bbox))
            .min_by(|a, b| {
                a.bbox()
                    .area()
                    .total_cmp(&b.bbox().area())
                    .then_with(|| a.name.cmp(&b.name))
            })
    }
}

/// System id derived from a registry name: lowercased, spaces become
/// underscores, and anything outside `[a-z0-9_-]` is dropped, so
/// `"São Paulo"` gives `"so_paulo"`.
pub fn slugify(name: &str) -> String {
    let slug: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' { '_' } else { c })
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_' || *c == '-')
        .collect();
    if slug.is_empty() {
        "system".to_string()
    } else {
        slug
    }
}
