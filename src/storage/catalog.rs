//! Card catalog loading
//!
//! The catalog is supplied by an external collaborator as a JSON array of
//! entries. It is loaded once per session and never mutated afterwards.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// A single card in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Card name ("Elsa")
    pub name: String,
    /// Card version ("Snow Queen"), empty for cards without one
    #[serde(default)]
    pub version: String,
    /// Combined display string ("Elsa - Snow Queen")
    pub full_name: String,
    /// Set code as printed on the card ("1", "7", ...)
    pub set_code: String,
    /// Human readable set name
    #[serde(default)]
    pub set_name: String,
    /// Collector number without leading zeros
    pub collector_number: String,
    /// Ink cost
    #[serde(default)]
    pub cost: u32,
    /// Ink label, mono ("Amber") or dual ("Amber/Steel")
    pub ink: String,
    /// Rarity label
    #[serde(default)]
    pub rarity: String,
    /// Type tags
    #[serde(default)]
    pub types: Vec<String>,
    /// Optional image reference
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Unique key of a physical card design: set code plus collector number
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CardKey {
    pub set_code: String,
    pub collector_number: String,
}

impl CatalogEntry {
    /// Individual ink components (dual-ink cards split on `/`)
    pub fn inks(&self) -> impl Iterator<Item = &str> {
        self.ink.split('/').map(str::trim).filter(|s| !s.is_empty())
    }

    /// Key used for cooldown bookkeeping
    pub fn key(&self) -> CardKey {
        CardKey {
            set_code: self.set_code.clone(),
            collector_number: self.collector_number.clone(),
        }
    }

    /// Collector number as an integer, if it is purely numeric
    pub fn collector_value(&self) -> Option<u32> {
        self.collector_number.parse().ok()
    }
}

/// Shared, read-only catalog
pub type Catalog = Arc<[CatalogEntry]>;

/// Load a catalog from a JSON file
pub fn load_catalog(path: &Path) -> Result<Catalog> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read catalog: {:?}", path))?;
    parse_catalog(&content).with_context(|| format!("Failed to parse catalog: {:?}", path))
}

/// Parse a catalog from JSON text
pub fn parse_catalog(json: &str) -> Result<Catalog> {
    let entries: Vec<CatalogEntry> = serde_json::from_str(json)?;
    Ok(entries.into())
}
