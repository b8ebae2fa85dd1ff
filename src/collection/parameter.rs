//! `parameter.json`: the only human-editable control surface for a
//! collection.
//!
//! Round-trips byte-for-byte on every key this crate understands and
//! preserves unknown keys permissively via `#[serde(flatten)]`, so a newer
//! `parameter.json` written by a future version of this format doesn't get
//! silently truncated when read and re-saved by an older build.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Collection type: a plain document collection or an edge collection
/// (key-edge markers instead of key-document markers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    Document,
    Edge,
}

/// A cap constraint: evict the oldest live documents (FIFO by rid) once
/// either bound is exceeded (SPEC_FULL.md §4.3 "Cap constraint").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CapConstraint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_documents: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u64>,
}

impl CapConstraint {
    pub fn is_unbounded(&self) -> bool {
        self.max_documents.is_none() && self.max_size.is_none()
    }
}

/// Deserialized form of `parameter.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameters {
    pub cid: u64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: CollectionKind,
    /// Journal size, rounded up to page size; `None` defers to
    /// `resource::TuningProfile::default_journal_size`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u64>,
    #[serde(default)]
    pub wait_for_sync: bool,
    #[serde(default)]
    pub is_volatile: bool,
    #[serde(default)]
    pub cap: CapConstraint,
    /// Keys this version doesn't know about, preserved verbatim on
    /// round-trip so a newer writer's fields aren't dropped.
    #[serde(flatten)]
    pub unknown: HashMap<String, Value>,
}

impl Parameters {
    pub fn new(cid: u64, name: impl Into<String>, kind: CollectionKind) -> Self {
        Self {
            cid,
            name: name.into(),
            kind,
            max_size: None,
            wait_for_sync: false,
            is_volatile: false,
            cap: CapConstraint::default(),
            unknown: HashMap::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Resolve the journal size to actually use: the pinned value if
    /// present, otherwise the host-aware default.
    pub fn effective_max_size(&self, default_journal_size: u64) -> u64 {
        self.max_size.unwrap_or(default_journal_size)
    }
}
