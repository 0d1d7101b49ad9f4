//! Per-section bitmap caches.
//!
//! Both caches use a presence test instead of LRU: lifetime is bound
//! to "was referenced during the most recent display-list execution."
//! Entries are owned by the cache and addressed by id; eviction is an
//! explicit sweep at the end of each pass.
//!
//! # Main Types
//!
//! - [`ImageCache`]: id → decoded bitmap, with per-pass `used` marking.
//! - [`LayerCache`]: layer id → rendered sub-image, seed-invalidated.

use hashbrown::{HashMap, HashSet};
use tiny_skia::Pixmap;

struct ImageEntry {
    bitmap: Pixmap,
    used: bool,
}

/// Decoded image/data bitmaps, persisted across frames.
#[derive(Default)]
pub struct ImageCache {
    entries: HashMap<u32, ImageEntry>,
}

impl ImageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears every `used` flag at the start of a full repaint pass.
    pub fn begin_pass(&mut self) {
        for entry in self.entries.values_mut() {
            entry.used = false;
        }
    }

    /// Cache hit: returns the bitmap and marks it referenced.
    pub fn get(&mut self, id: u32) -> Option<&Pixmap> {
        let entry = self.entries.get_mut(&id)?;
        entry.used = true;
        Some(&entry.bitmap)
    }

    /// Stores a freshly decoded bitmap, already counted as referenced.
    pub fn insert(&mut self, id: u32, bitmap: Pixmap) {
        self.entries.insert(id, ImageEntry { bitmap, used: true });
    }

    /// Purges entries not referenced since `begin_pass`.
    pub fn sweep(&mut self) {
        self.entries.retain(|_, entry| entry.used);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One rendered layer plus the destination rect it was rendered for;
/// cache hits draw back at that rect, not at the rect of the current
/// stream's `begin_layer`.
pub struct LayerEntry {
    pub seed: u32,
    pub bitmap: Pixmap,
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

/// Rendered nested-layer sub-images keyed by layer id. A changed seed
/// for the same id is a miss, never an update-in-place.
#[derive(Default)]
pub struct LayerCache {
    entries: HashMap<u32, LayerEntry>,
}

impl LayerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache hit requires an exact (id, seed) match.
    pub fn get(&self, id: u32, seed: u32) -> Option<&LayerEntry> {
        self.entries.get(&id).filter(|entry| entry.seed == seed)
    }

    pub fn insert(&mut self, id: u32, entry: LayerEntry) {
        self.entries.insert(id, entry);
    }

    /// Purges layers absent from the pass's referenced set.
    pub fn sweep(&mut self, used: &HashSet<u32>) {
        self.entries.retain(|id, _| used.contains(id));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
