//! Display modes and the deduplicating mode pool.
//!
//! Every connector reports its own list of supported timings, and the same
//! timing (say, 1920×1080@60) usually shows up on several connectors.  The
//! [`ModePool`] interns them so that identical raw timing bytes map to exactly
//! one [`Mode`], and everything else in the topology refers to modes by
//! [`ModeId`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::driver::descriptors::RawMode;

/// Stable index of a mode inside a [`ModePool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModeId(pub u32);

/// An immutable display timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mode {
    pub id: ModeId,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub refresh_rate: f64,
    /// Opaque driver timing; identity of the mode.
    pub timing: Vec<u8>,
}

impl Mode {
    /// Returns `true` if `refresh` is within 0.05 Hz of this mode's rate.
    pub fn matches_refresh(&self, refresh: f64) -> bool {
        (self.refresh_rate - refresh).abs() < 0.05
    }
}

/// Interning pool keyed by raw timing bytes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModePool {
    modes: Vec<Mode>,
    #[serde(skip)]
    by_timing: HashMap<Vec<u8>, ModeId>,
}

impl ModePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id for `raw`, adding it to the pool the first time its
    /// timing bytes are seen.  Ids are assigned in first-seen order.
    pub fn intern(&mut self, raw: &RawMode) -> ModeId {
        if let Some(id) = self.by_timing.get(&raw.timing) {
            return *id;
        }
        let id = ModeId(self.modes.len() as u32);
        self.modes.push(Mode {
            id,
            name: raw.name.clone(),
            width: raw.width,
            height: raw.height,
            refresh_rate: raw.refresh_rate,
            timing: raw.timing.clone(),
        });
        self.by_timing.insert(raw.timing.clone(), id);
        id
    }

    /// Looks up a mode by its raw timing bytes without inserting.
    pub fn find_by_timing(&self, timing: &[u8]) -> Option<ModeId> {
        self.by_timing.get(timing).copied()
    }

    pub fn get(&self, id: ModeId) -> Option<&Mode> {
        self.modes.get(id.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.modes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mode> {
        self.modes.iter()
    }
}
