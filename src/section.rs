//! Per-section state.
//!
//! A section is an independently updated rectangular region of the
//! output surface with its own command buffer, caches, and published
//! bitmap. All cross-thread mutable state sits behind one mutex per
//! section, held only for O(1) metadata work; rasterization happens on
//! a snapshot taken under the lock and executed outside it.

use crate::cache::{ImageCache, LayerCache};
use crate::diagnostics::{LatencyWindow, RenderedTimestamp};
use crate::geometry::Rect;
use crate::raster::BufferMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tiny_skia::Pixmap;

/// A producer update not yet rendered. Replaced wholesale by each
/// `replace_section` call; never merged.
pub struct PendingUpdate {
    pub words: Vec<u32>,
    pub buffers: BufferMap,
}

/// Lock-guarded section metadata.
pub struct SectionState {
    pub rect: Rect,
    pub device_pixel_ratio: f32,
    pub pending: Option<PendingUpdate>,
    /// At most one render task may be in progress per section.
    pub rendering: bool,
    /// Last successfully published bitmap, read by the compositor.
    pub published: Option<Arc<Pixmap>>,
    pub image_cache: ImageCache,
    pub layer_cache: LayerCache,
    /// Timestamps from the last published pass, resolved at composite.
    pub timestamps: Vec<RenderedTimestamp>,
    /// Carried forward for streams that reuse the prior timestamp.
    pub previous_timestamp: Option<(u64, String)>,
    /// `None` means never rendered; such sections schedule first.
    pub last_render: Option<Instant>,
}

/// Everything a render pass needs, detached from the section lock.
/// The caches move out with the snapshot and come back at publish.
pub struct RenderSnapshot {
    pub rect: Rect,
    pub device_pixel_ratio: f32,
    pub words: Vec<u32>,
    pub buffers: BufferMap,
    pub image_cache: ImageCache,
    pub layer_cache: LayerCache,
    pub previous_timestamp: Option<(u64, String)>,
}

pub struct Section {
    pub id: u32,
    state: Mutex<SectionState>,
    latencies: Mutex<LatencyWindow>,
}

impl Section {
    pub fn new(id: u32, rect: Rect, device_pixel_ratio: f32, latency_window: usize) -> Self {
        Self {
            id,
            state: Mutex::new(SectionState {
                rect,
                device_pixel_ratio,
                pending: None,
                rendering: false,
                published: None,
                image_cache: ImageCache::new(),
                layer_cache: LayerCache::new(),
                timestamps: Vec::new(),
                previous_timestamp: None,
                last_render: None,
            }),
            latencies: Mutex::new(LatencyWindow::new(latency_window)),
        }
    }

    /// Accepts a producer update, superseding any not-yet-started one.
    /// Allowed in every state; a render already in progress keeps the
    /// snapshot it started with.
    pub fn replace(
        &self,
        rect: Rect,
        device_pixel_ratio: f32,
        words: Vec<u32>,
        buffers: BufferMap,
    ) {
        if let Ok(mut state) = self.state.lock() {
            state.rect = rect;
            state.device_pixel_ratio = device_pixel_ratio;
            state.pending = Some(PendingUpdate { words, buffers });
        }
    }

    /// True when a render could start right now.
    pub fn is_due(&self) -> bool {
        self.state
            .lock()
            .map(|s| s.pending.is_some() && !s.rendering)
            .unwrap_or(false)
    }

    /// Scheduling key: sections that have never rendered sort first,
    /// then least-recently-rendered.
    pub fn last_render(&self) -> Option<Instant> {
        self.state.lock().ok().and_then(|s| s.last_render)
    }

    /// Moves the pending buffer and the caches out for rendering.
    /// Returns `None` when there is nothing pending or a render is
    /// already in progress for this section.
    pub fn take_snapshot(&self) -> Option<RenderSnapshot> {
        let mut state = self.state.lock().ok()?;
        if state.rendering {
            return None;
        }
        let update = state.pending.take()?;
        state.rendering = true;
        Some(RenderSnapshot {
            rect: state.rect,
            device_pixel_ratio: state.device_pixel_ratio,
            words: update.words,
            buffers: update.buffers,
            image_cache: std::mem::take(&mut state.image_cache),
            layer_cache: std::mem::take(&mut state.layer_cache),
            previous_timestamp: state.previous_timestamp.take(),
        })
    }

    /// Publishes a finished pass: caches return, the bitmap and its
    /// timestamps are installed (a failed pass installs nothing but
    /// still advances the render clock), and the rendering flag
    /// clears. Returns true when another update arrived mid-render.
    pub fn publish(
        &self,
        image_cache: ImageCache,
        layer_cache: LayerCache,
        result: Option<(Pixmap, Vec<RenderedTimestamp>)>,
    ) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        state.image_cache = image_cache;
        state.layer_cache = layer_cache;
        if let Some((pixmap, timestamps)) = result {
            state.previous_timestamp = timestamps
                .last()
                .map(|ts| (ts.timestamp_ns, ts.text.clone()));
            state.timestamps = timestamps;
            state.published = Some(Arc::new(pixmap));
        }
        state.rendering = false;
        state.last_render = Some(Instant::now());
        state.pending.is_some()
    }

    /// Published bitmap, its rect and scale, and the pass timestamps,
    /// for the compositor. Timestamps are drained so the overlay is
    /// attributed once per fresh render.
    pub fn composite_snapshot(
        &self,
    ) -> Option<(Arc<Pixmap>, Rect, f32, Vec<RenderedTimestamp>)> {
        let mut state = self.state.lock().ok()?;
        let pixmap = state.published.clone()?;
        let rect = state.rect;
        let scale = state.device_pixel_ratio;
        let timestamps = std::mem::take(&mut state.timestamps);
        Some((pixmap, rect, scale, timestamps))
    }

    pub fn record_latency(&self, seconds: f64) {
        if let Ok(mut window) = self.latencies.lock() {
            window.push(seconds);
        }
    }

    pub fn latency_stats(&self) -> Option<crate::diagnostics::LatencyStats> {
        self.latencies.lock().ok().and_then(|w| w.stats())
    }

    pub fn rect(&self) -> Rect {
        self.state
            .lock()
            .map(|s| s.rect)
            .unwrap_or(Rect::new(0, 0, 0, 0))
    }
}
