//! Section registry, render scheduler, and composite step.
//!
//! Producer calls ([`CanvasEngine::replace_section`],
//! [`CanvasEngine::remove_section`]) are synchronous and cheap. Render
//! work runs on blocking worker tasks spawned onto the surrounding
//! tokio runtime; each finished render sends a [`RepaintRequest`] to
//! the surface-owning side, which answers by calling
//! [`CanvasEngine::composite`].
//!
//! Scheduling is oldest-first: among sections with pending commands,
//! the one that finished rendering least recently goes next, and a
//! section that has never rendered goes before all others. A section's
//! render clock only advances when its pass finishes, so a backlog
//! drains fairly.

use crate::config::CanvasConfig;
use crate::diagnostics::{now_epoch_ns, overlay_text, DiagnosticsRegistry};
use crate::geometry::Rect;
use crate::raster::text::{FontContext, FontSpec, SYSTEM_FONT};
use crate::raster::{execute_pass, BufferMap, PassInputs};
use crate::section::Section;
use hashbrown::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tiny_skia::{Color, FillRule, Paint, PathBuilder, Pixmap, PixmapPaint, Transform};
use tokio::sync::mpsc;

/// Sent to the surface owner whenever a section publishes a fresh
/// bitmap; the rect is in logical surface coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RepaintRequest {
    pub section_id: u32,
    pub rect: Rect,
}

pub struct CanvasEngine {
    config: CanvasConfig,
    sections: Mutex<HashMap<u32, Arc<Section>>>,
    diagnostics: DiagnosticsRegistry,
    repaint_tx: mpsc::UnboundedSender<RepaintRequest>,
    runtime: Option<tokio::runtime::Handle>,
    workers: AtomicUsize,
}

impl CanvasEngine {
    /// Creates the engine and the repaint channel. When called inside
    /// a tokio runtime, renders are dispatched automatically on
    /// producer updates; otherwise the host drives [`render_once`]
    /// itself.
    ///
    /// [`render_once`]: CanvasEngine::render_once
    pub fn new(config: CanvasConfig) -> (Arc<Self>, mpsc::UnboundedReceiver<RepaintRequest>) {
        let (repaint_tx, repaint_rx) = mpsc::unbounded_channel();
        let engine = Arc::new(Self {
            diagnostics: DiagnosticsRegistry::new(config.stats_window),
            config,
            sections: Mutex::new(HashMap::new()),
            repaint_tx,
            runtime: tokio::runtime::Handle::try_current().ok(),
            workers: AtomicUsize::new(0),
        });
        (engine, repaint_rx)
    }

    /// Accepts a section update, creating the section on first
    /// reference. The command buffer replaces any pending one
    /// wholesale; a render in progress is not preempted.
    pub fn replace_section(
        self: &Arc<Self>,
        section_id: u32,
        rect: Rect,
        device_pixel_ratio: f32,
        words: Vec<u32>,
        buffers: BufferMap,
    ) {
        let section = {
            let Ok(mut sections) = self.sections.lock() else {
                return;
            };
            sections
                .entry(section_id)
                .or_insert_with(|| {
                    Arc::new(Section::new(
                        section_id,
                        rect,
                        device_pixel_ratio,
                        self.config.latency_window,
                    ))
                })
                .clone()
        };
        section.replace(rect, device_pixel_ratio, words, buffers);
        self.wake();
    }

    /// Discards a section and its caches. A render already in flight
    /// for it completes against its snapshot and publishes into the
    /// detached section, which nothing reads afterwards.
    pub fn remove_section(&self, section_id: u32) {
        if let Ok(mut sections) = self.sections.lock() {
            sections.remove(&section_id);
        }
    }

    fn section(&self, section_id: u32) -> Option<Arc<Section>> {
        self.sections
            .lock()
            .ok()
            .and_then(|s| s.get(&section_id).cloned())
    }

    /// Spawns a worker to drain pending sections, bounded by the
    /// configured concurrency cap. A no-op outside a runtime.
    pub fn wake(self: &Arc<Self>) {
        let Some(runtime) = &self.runtime else {
            return;
        };
        let cap = self.config.max_concurrent_renders;
        if self
            .workers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < cap).then_some(n + 1)
            })
            .is_err()
        {
            return;
        }
        let engine = self.clone();
        runtime.spawn_blocking(move || {
            while engine.render_once().is_some() {}
            engine.workers.fetch_sub(1, Ordering::SeqCst);
            // an update may have landed between the last empty poll
            // and the decrement
            let due = engine
                .sections
                .lock()
                .map(|m| m.values().any(|s| s.is_due()))
                .unwrap_or(false);
            if due {
                engine.wake();
            }
        });
    }

    /// One scheduler step: pick the due section with the oldest render
    /// clock, rasterize its snapshot outside any lock, publish, and
    /// request a repaint. Returns the repainted rect, or `None` when
    /// nothing was due.
    pub fn render_once(&self) -> Option<Rect> {
        let candidates: Vec<Arc<Section>> = self
            .sections
            .lock()
            .ok()?
            .values()
            .filter(|s| s.is_due())
            .cloned()
            .collect();
        // never-rendered sections (None) sort before every timestamp
        let section = candidates.into_iter().min_by_key(|s| s.last_render())?;
        let snapshot = section.take_snapshot()?;

        let inputs = PassInputs {
            section_id: section.id,
            rect: snapshot.rect,
            device_pixel_ratio: snapshot.device_pixel_ratio,
            display_scale: self.config.display_scale,
            words: &snapshot.words,
            buffers: &snapshot.buffers,
            previous_timestamp: snapshot.previous_timestamp.clone(),
        };
        let mut image_cache = snapshot.image_cache;
        let mut layer_cache = snapshot.layer_cache;
        let result = match execute_pass(
            &inputs,
            &mut image_cache,
            &mut layer_cache,
            &self.diagnostics,
            &SYSTEM_FONT,
        ) {
            Ok(output) => Some((output.pixmap, output.timestamps)),
            Err(e) => {
                // the section keeps its stale-but-valid bitmap
                log::error!("section {} render failed: {e}", section.id);
                None
            }
        };
        let published = result.is_some();
        section.publish(image_cache, layer_cache, result);

        let rect = snapshot.rect;
        if published && self.section(section.id).is_some() {
            let _ = self.repaint_tx.send(RepaintRequest {
                section_id: section.id,
                rect,
            });
        }
        Some(rect)
    }

    /// The host's repaint: draws every published section bitmap into
    /// `target` (device bitmaps scaled back by 1/dpr into their
    /// logical rects), resolves pending timestamps into latency
    /// samples, and draws the per-section latency overlay.
    pub fn composite(&self, target: &mut Pixmap) {
        let mut sections: Vec<Arc<Section>> = match self.sections.lock() {
            Ok(map) => map.values().cloned().collect(),
            Err(_) => return,
        };
        // overlapping sections stack in ascending id order
        sections.sort_by_key(|s| s.id);
        let now_ns = now_epoch_ns();

        for section in sections {
            let Some((pixmap, rect, scale, timestamps)) = section.composite_snapshot() else {
                continue;
            };
            let inv = 1.0 / scale.max(f32::EPSILON);
            target.draw_pixmap(
                0,
                0,
                (*pixmap).as_ref(),
                &PixmapPaint::default(),
                Transform::from_translate(rect.x as f32, rect.y as f32).pre_scale(inv, inv),
                None,
            );

            // no fresh timestamps on cache-hit-only passes: no overlay
            for ts in &timestamps {
                section.record_latency(ts.elapsed_seconds(now_ns));
            }
            if let Some(latest) = timestamps.last() {
                if let Some(stats) = section.latency_stats() {
                    let base =
                        Transform::from_translate(rect.x as f32, rect.y as f32).pre_scale(inv, inv);
                    draw_overlay(
                        target,
                        &overlay_text(&stats),
                        base.pre_concat(latest.transform),
                        &SYSTEM_FONT,
                    );
                }
            }
        }
    }
}

/// Fixed-position diagnostic label: white box, black text.
fn draw_overlay(target: &mut Pixmap, text: &str, transform: Transform, fonts: &FontContext) {
    let font = FontSpec::default();
    let metrics = fonts.measure(text, &font);
    let x = 12.0;
    let y = 12.0 + metrics.height + 16.0;

    if let Some(rect) = tiny_skia::Rect::from_xywh(
        x - 4.0,
        y - metrics.ascent - 4.0,
        metrics.advance + 8.0,
        metrics.height + 8.0,
    ) {
        let mut paint = Paint::default();
        paint.set_color(Color::WHITE);
        target.fill_path(
            &PathBuilder::from_rect(rect),
            &paint,
            FillRule::Winding,
            transform,
            None,
        );
    }

    if let Some(path) = fonts.outline_text(text, &font, x, y) {
        let mut paint = Paint {
            anti_alias: true,
            ..Paint::default()
        };
        paint.set_color(Color::BLACK);
        target.fill_path(&path, &paint, FillRule::Winding, transform, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::stream::StreamBuilder;

    fn red_rect_words() -> Vec<u32> {
        StreamBuilder::new()
            .op("bpth")
            .op_f32("rect", &[0.0, 0.0, 8.0, 8.0])
            .op_str("flst", "rgb(255,0,0)")
            .op("fill")
            .finish()
    }

    #[test]
    fn render_once_publishes_and_requests_repaint() {
        let (engine, mut repaints) = CanvasEngine::new(CanvasConfig::default());
        engine.replace_section(1, Rect::new(0, 0, 16, 16), 1.0, red_rect_words(), BufferMap::new());

        let rect = engine.render_once().unwrap();
        assert_eq!(rect, Rect::new(0, 0, 16, 16));
        assert_eq!(
            repaints.try_recv().unwrap(),
            RepaintRequest {
                section_id: 1,
                rect
            }
        );
        // nothing left pending
        assert!(engine.render_once().is_none());
    }

    #[test]
    fn composite_draws_published_sections() {
        let (engine, _repaints) = CanvasEngine::new(CanvasConfig::default());
        engine.replace_section(1, Rect::new(4, 4, 16, 16), 1.0, red_rect_words(), BufferMap::new());
        engine.render_once().unwrap();

        let mut target = Pixmap::new(32, 32).unwrap();
        engine.composite(&mut target);
        let px = target.pixels()[(6 * 32 + 6) as usize];
        assert_eq!((px.red(), px.alpha()), (255, 255));
        // outside the section rect
        assert_eq!(target.pixels()[0].alpha(), 0);
    }

    #[test]
    fn composite_stacks_overlapping_sections_by_id() {
        let blue_rect_words = StreamBuilder::new()
            .op("bpth")
            .op_f32("rect", &[0.0, 0.0, 8.0, 8.0])
            .op_str("flst", "rgb(0,0,255)")
            .op("fill")
            .finish();

        let (engine, _repaints) = CanvasEngine::new(CanvasConfig::default());
        let rect = Rect::new(0, 0, 16, 16);
        // insert high id first so map order alone cannot save us
        engine.replace_section(9, rect, 1.0, blue_rect_words, BufferMap::new());
        engine.replace_section(2, rect, 1.0, red_rect_words(), BufferMap::new());
        engine.render_once().unwrap();
        engine.render_once().unwrap();

        let mut target = Pixmap::new(16, 16).unwrap();
        engine.composite(&mut target);
        // section 9 draws after section 2 and wins the overlap
        let px = target.pixels()[0];
        assert_eq!((px.red(), px.blue()), (0, 255));
    }

    #[test]
    fn scheduler_prefers_never_rendered_sections() {
        let (engine, _repaints) = CanvasEngine::new(CanvasConfig::default());
        let rect = Rect::new(0, 0, 8, 8);

        // section 1 renders once, advancing its clock
        engine.replace_section(1, rect, 1.0, vec![], BufferMap::new());
        engine.render_once().unwrap();

        // both pending: the never-rendered section 2 must go first
        engine.replace_section(1, rect, 1.0, vec![], BufferMap::new());
        engine.replace_section(2, rect, 1.0, vec![], BufferMap::new());

        let s1_before = engine.section(1).unwrap().last_render();
        engine.render_once().unwrap();
        assert_eq!(engine.section(1).unwrap().last_render(), s1_before);
        assert!(engine.section(2).unwrap().last_render().is_some());
    }

    #[test]
    fn oldest_rendered_section_goes_next() {
        let (engine, _repaints) = CanvasEngine::new(CanvasConfig::default());
        let rect = Rect::new(0, 0, 8, 8);

        engine.replace_section(1, rect, 1.0, vec![], BufferMap::new());
        engine.render_once().unwrap();
        engine.replace_section(2, rect, 1.0, vec![], BufferMap::new());
        engine.render_once().unwrap();

        // both pending again; section 1 has the older clock
        engine.replace_section(1, rect, 1.0, vec![], BufferMap::new());
        engine.replace_section(2, rect, 1.0, vec![], BufferMap::new());
        let s2_before = engine.section(2).unwrap().last_render();
        engine.render_once().unwrap();
        assert_eq!(engine.section(2).unwrap().last_render(), s2_before);
    }

    #[test]
    fn failed_decode_keeps_stale_bitmap_and_sends_no_repaint() {
        let (engine, mut repaints) = CanvasEngine::new(CanvasConfig::default());
        let rect = Rect::new(0, 0, 16, 16);
        engine.replace_section(1, rect, 1.0, red_rect_words(), BufferMap::new());
        engine.render_once().unwrap();
        repaints.try_recv().unwrap();

        // truncated stream: the pass fails, the old bitmap stays
        let mut bad = StreamBuilder::new().op_f32("rect", &[1.0, 2.0, 3.0, 4.0]).finish();
        bad.truncate(bad.len() - 1);
        engine.replace_section(1, rect, 1.0, bad, BufferMap::new());
        engine.render_once().unwrap();
        assert!(repaints.try_recv().is_err());

        let mut target = Pixmap::new(16, 16).unwrap();
        engine.composite(&mut target);
        assert_eq!(target.pixels()[0].red(), 255);
    }

    #[test]
    fn remove_mid_render_publish_is_a_no_op() {
        let (engine, mut repaints) = CanvasEngine::new(CanvasConfig::default());
        let rect = Rect::new(0, 0, 8, 8);
        engine.replace_section(1, rect, 1.0, red_rect_words(), BufferMap::new());

        // emulate a worker that snapshotted before the removal
        let section = engine.section(1).unwrap();
        let snapshot = section.take_snapshot().unwrap();
        engine.remove_section(1);

        let inputs = PassInputs {
            section_id: section.id,
            rect: snapshot.rect,
            device_pixel_ratio: snapshot.device_pixel_ratio,
            display_scale: 1.0,
            words: &snapshot.words,
            buffers: &snapshot.buffers,
            previous_timestamp: None,
        };
        let mut images = snapshot.image_cache;
        let mut layers = snapshot.layer_cache;
        let output = execute_pass(
            &inputs,
            &mut images,
            &mut layers,
            &engine.diagnostics,
            &crate::raster::text::FontContext::synthetic(),
        )
        .unwrap();
        section.publish(images, layers, Some((output.pixmap, output.timestamps)));

        // the detached section published quietly; the engine ignores it
        assert!(engine.section(1).is_none());
        assert!(repaints.try_recv().is_err());
        assert!(engine.render_once().is_none());
    }

    #[tokio::test]
    async fn producer_update_wakes_a_worker() {
        let (engine, mut repaints) = CanvasEngine::new(CanvasConfig::default());
        engine.replace_section(1, Rect::new(0, 0, 8, 8), 1.0, red_rect_words(), BufferMap::new());

        let request = tokio::time::timeout(std::time::Duration::from_secs(5), repaints.recv())
            .await
            .expect("worker should publish within the timeout")
            .expect("channel open");
        assert_eq!(request.section_id, 1);
    }

    #[tokio::test]
    async fn backlog_drains_without_further_producer_calls() {
        let (engine, mut repaints) = CanvasEngine::new(CanvasConfig::default());
        for id in 0..4 {
            engine.replace_section(id, Rect::new(0, 0, 8, 8), 1.0, red_rect_words(), BufferMap::new());
        }
        let mut seen = std::collections::HashSet::new();
        for _ in 0..4 {
            let request =
                tokio::time::timeout(std::time::Duration::from_secs(5), repaints.recv())
                    .await
                    .expect("workers should drain the backlog")
                    .expect("channel open");
            seen.insert(request.section_id);
        }
        assert_eq!(seen.len(), 4);
    }
}
