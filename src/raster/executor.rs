//! Display-list execution.
//!
//! One render pass decodes a section's command buffer and rasterizes
//! it into a device-resolution bitmap. The executor owns a stack of
//! surfaces: the section's top-level bitmap at the bottom, plus one
//! off-surface bitmap per open nested layer. Drawing attributes live
//! in a single [`StateStack`] shared across layer boundaries; the
//! transform and clip are per surface.
//!
//! Cached layers are skipped without re-rasterizing, but the skipped
//! operations are still scanned forward to find the matching
//! `end_layer`, since the stream carries no length-prefixed skip.

use crate::cache::{ImageCache, LayerCache, LayerEntry};
use crate::diagnostics::{
    now_epoch_ns, parse_utc_timestamp, DiagnosticsRegistry, RenderedTimestamp,
};
use crate::errors::RenderError;
use crate::geometry::Rect;
use crate::raster::color::parse_color;
use crate::raster::image::{
    colormap_from_buffer, downscale_target, pixmap_from_rgba, pixmap_from_scalar, resample,
    BufferMap, SampledBuffer,
};
use crate::raster::text::{parse_font, FontContext, TextAlign, TextBaseline};
use crate::state::{GradientSpec, StateStack};
use crate::wire::{Command, CommandDecoder};
use hashbrown::HashSet;
use std::f32::consts::PI;
use tiny_skia::{
    FillRule, FilterQuality, GradientStop, LineCap, LineJoin, LinearGradient, Mask, Paint,
    PathBuilder, Pixmap, PixmapPaint, Point, SpreadMode, Stroke, StrokeDash, Transform,
};

/// Everything one render pass needs from its section snapshot.
pub struct PassInputs<'a> {
    pub section_id: u32,
    pub rect: Rect,
    pub device_pixel_ratio: f32,
    pub display_scale: f32,
    pub words: &'a [u32],
    pub buffers: &'a BufferMap,
    /// Timestamp published by the previous pass, reused when the
    /// stream carries a short placeholder payload.
    pub previous_timestamp: Option<(u64, String)>,
}

/// Result of a successful pass.
pub struct PassOutput {
    /// Device-resolution bitmap for the section rect.
    pub pixmap: Pixmap,
    /// Timestamps found mid-stream, with their world transforms.
    pub timestamps: Vec<RenderedTimestamp>,
}

/// Renders one snapshot. Caches are mutated in place: image entries
/// are marked and swept, layer entries inserted and swept against the
/// pass's referenced-layer set.
pub fn execute_pass(
    inputs: &PassInputs<'_>,
    image_cache: &mut ImageCache,
    layer_cache: &mut LayerCache,
    diagnostics: &DiagnosticsRegistry,
    fonts: &FontContext,
) -> Result<PassOutput, RenderError> {
    let device_width = scaled_dim(inputs.rect.width, inputs.device_pixel_ratio);
    let device_height = scaled_dim(inputs.rect.height, inputs.device_pixel_ratio);
    let pixmap = Pixmap::new(device_width, device_height).ok_or(
        RenderError::SurfaceAllocation {
            width: device_width,
            height: device_height,
        },
    )?;

    image_cache.begin_pass();

    let mut exec = Executor {
        inputs,
        image_cache,
        layer_cache,
        diagnostics,
        fonts,
        state: StateStack::new(),
        surfaces: vec![Surface::top_level(pixmap, inputs.device_pixel_ratio)],
        open_layers: Vec::new(),
        layers_used: HashSet::new(),
        timestamps: Vec::new(),
    };

    let mut decoder = CommandDecoder::new(inputs.words);
    while let Some(cmd) = decoder.decode_next()? {
        exec.apply(cmd, &mut decoder)?;
    }

    // unbalanced begin_layer: composite what was drawn rather than
    // dropping it
    while exec.surfaces.len() > 1 {
        log::warn!(
            "section {}: layer left open at end of stream",
            inputs.section_id
        );
        exec.close_layer()?;
    }

    exec.image_cache.sweep();
    let used = exec.layers_used;
    exec.layer_cache.sweep(&used);

    let surface = exec.surfaces.pop().ok_or(RenderError::SurfaceAllocation {
        width: device_width,
        height: device_height,
    })?;
    Ok(PassOutput {
        pixmap: surface.pixmap,
        timestamps: exec.timestamps,
    })
}

fn scaled_dim(logical: u32, scale: f32) -> u32 {
    ((logical as f32 * scale).round() as u32).max(1)
}

/// One drawing target: the section bitmap or an off-surface layer.
struct Surface {
    pixmap: Pixmap,
    /// Maps logical coordinates to this surface's device pixels.
    transform: Transform,
    /// Maps logical coordinates to the top-level surface's device
    /// pixels; diverges from `transform` inside nested layers.
    world: Transform,
    clip: Option<Mask>,
    /// Uniform device scale of this surface (compounds per layer).
    scale: f32,
    saved: Vec<(Transform, Transform, Option<Mask>)>,
}

impl Surface {
    fn top_level(pixmap: Pixmap, device_pixel_ratio: f32) -> Self {
        let base = Transform::from_scale(device_pixel_ratio, device_pixel_ratio);
        Self {
            pixmap,
            transform: base,
            world: base,
            clip: None,
            scale: device_pixel_ratio,
            saved: Vec::new(),
        }
    }

    fn save(&mut self) {
        self.saved
            .push((self.transform, self.world, self.clip.clone()));
    }

    fn restore(&mut self) {
        // surface stack may be shallower than the attribute stack when
        // a save/restore pair straddles a layer boundary
        if let Some((transform, world, clip)) = self.saved.pop() {
            self.transform = transform;
            self.world = world;
            self.clip = clip;
        }
    }

    fn concat(&mut self, t: Transform) {
        self.transform = self.transform.pre_concat(t);
        self.world = self.world.pre_concat(t);
    }

    fn intersect_clip_rect(&mut self, x: f32, y: f32, width: f32, height: f32) {
        let Some(rect) = tiny_skia::Rect::from_xywh(x, y, width, height) else {
            return;
        };
        let path = PathBuilder::from_rect(rect);
        match &mut self.clip {
            Some(mask) => mask.intersect_path(&path, FillRule::Winding, true, self.transform),
            None => {
                let Some(mut mask) = Mask::new(self.pixmap.width(), self.pixmap.height()) else {
                    return;
                };
                mask.fill_path(&path, FillRule::Winding, true, self.transform);
                self.clip = Some(mask);
            }
        }
    }
}

/// An open (cache-missed) nested layer being rendered.
struct OpenLayer {
    layer_id: u32,
    seed: u32,
    left: f32,
    top: f32,
    width: f32,
    height: f32,
}

struct Executor<'a, 'b> {
    inputs: &'a PassInputs<'b>,
    image_cache: &'a mut ImageCache,
    layer_cache: &'a mut LayerCache,
    diagnostics: &'a DiagnosticsRegistry,
    fonts: &'a FontContext,
    state: StateStack,
    surfaces: Vec<Surface>,
    open_layers: Vec<OpenLayer>,
    layers_used: HashSet<u32>,
    timestamps: Vec<RenderedTimestamp>,
}

impl Executor<'_, '_> {
    fn surface(&mut self) -> &mut Surface {
        // the stack always holds at least the top-level surface
        let last = self.surfaces.len() - 1;
        &mut self.surfaces[last]
    }

    fn apply(
        &mut self,
        cmd: Command,
        decoder: &mut CommandDecoder<'_>,
    ) -> Result<(), RenderError> {
        match cmd {
            Command::Save => {
                self.state.save();
                self.surface().save();
            }
            Command::Restore => {
                self.state.restore()?;
                self.surface().restore();
            }
            Command::BeginPath => {
                self.state.current_mut().path = PathBuilder::new();
            }
            Command::ClosePath => {
                self.state.current_mut().path.close();
            }
            Command::Clip {
                x,
                y,
                width,
                height,
            } => {
                self.surface().intersect_clip_rect(x, y, width, height);
            }
            Command::Translate { x, y } => {
                self.surface().concat(Transform::from_translate(x, y));
            }
            Command::Scale { x, y } => {
                self.surface().concat(Transform::from_scale(x, y));
                let state = self.state.current_mut();
                state.scale_x *= x;
                state.scale_y *= y;
            }
            Command::Rotate { degrees } => {
                self.surface().concat(Transform::from_rotate(degrees));
            }
            Command::MoveTo { x, y } => {
                self.state.current_mut().path.move_to(x, y);
            }
            Command::LineTo { x, y } => {
                self.state.current_mut().path.line_to(x, y);
            }
            Command::RectPath {
                x,
                y,
                width,
                height,
            } => {
                if let Some(rect) = tiny_skia::Rect::from_xywh(x, y, width, height) {
                    self.state.current_mut().path.push_rect(rect);
                }
            }
            Command::Arc {
                x,
                y,
                radius,
                start_angle,
                end_angle,
                anticlockwise,
            } => {
                append_arc(
                    &mut self.state.current_mut().path,
                    x,
                    y,
                    radius,
                    start_angle,
                    end_angle,
                    anticlockwise,
                );
            }
            Command::ArcTo {
                x1,
                y1,
                x2,
                y2,
                radius,
            } => {
                append_arc_to(&mut self.state.current_mut().path, x1, y1, x2, y2, radius);
            }
            Command::CubicTo {
                c1x,
                c1y,
                c2x,
                c2y,
                x,
                y,
            } => {
                self.state.current_mut().path.cubic_to(c1x, c1y, c2x, c2y, x, y);
            }
            Command::QuadTo { cx, cy, x, y } => {
                self.state.current_mut().path.quad_to(cx, cy, x, y);
            }
            Command::Stroke => self.stroke_current_path(),
            Command::Fill => self.fill_current_path(),
            Command::FillStyle { color } => {
                let state = self.state.current_mut();
                state.fill_color = parse_color(&color);
                state.fill_gradient = -1;
            }
            Command::FillStyleGradient { gradient_id } => {
                self.state.current_mut().fill_gradient = gradient_id;
            }
            Command::FillText { text, x, y, .. } => self.draw_text(&text, x, y, TextMode::Fill),
            Command::StrokeText { text, x, y, .. } => {
                self.draw_text(&text, x, y, TextMode::Stroke)
            }
            Command::Font { spec } => {
                self.state.current_mut().font = parse_font(&spec, self.inputs.display_scale);
            }
            Command::TextAlign { mode } => {
                if let Some(align) = TextAlign::from_name(&mode) {
                    self.state.current_mut().text_align = align;
                }
            }
            Command::TextBaseline { mode } => {
                if let Some(baseline) = TextBaseline::from_name(&mode) {
                    self.state.current_mut().text_baseline = baseline;
                }
            }
            Command::StrokeStyle { color } => {
                self.state.current_mut().line_color = parse_color(&color);
            }
            Command::LineDash { dash } => {
                self.state.current_mut().line_dash = dash.max(0.0);
            }
            Command::LineWidth { width } => {
                self.state.current_mut().line_width = width.max(0.0);
            }
            Command::LineCap { style } => {
                self.state.current_mut().line_cap = match style.as_str() {
                    "butt" => LineCap::Butt,
                    "round" => LineCap::Round,
                    _ => LineCap::Square,
                };
            }
            Command::LineJoin { style } => {
                self.state.current_mut().line_join = match style.as_str() {
                    "round" => LineJoin::Round,
                    "miter" => LineJoin::Miter,
                    _ => LineJoin::Bevel,
                };
            }
            Command::Gradient {
                gradient_id,
                x,
                y,
                dx,
                dy,
            } => {
                self.state.current_mut().gradients.insert(
                    gradient_id,
                    GradientSpec {
                        x0: x,
                        y0: y,
                        x1: x + dx,
                        y1: y + dy,
                        stops: Vec::new(),
                    },
                );
            }
            Command::ColorStop {
                gradient_id,
                position,
                color,
            } => {
                // a stop before the gradient definition creates the
                // default spec
                let color = parse_color(&color);
                self.state
                    .current_mut()
                    .gradients
                    .entry(gradient_id)
                    .or_default()
                    .stops
                    .push((position, color));
            }
            Command::DrawImage {
                image_id,
                x,
                y,
                width,
                height,
                ..
            } => {
                self.draw_image(image_id, x, y, width, height);
            }
            Command::DrawData {
                image_id,
                x,
                y,
                width,
                height,
                low,
                high,
                colormap_id,
                ..
            } => {
                self.draw_data(image_id, x, y, width, height, low, high, colormap_id);
            }
            Command::Statistics { label } => {
                self.diagnostics.mark(&label);
            }
            Command::Sleep { seconds } => {
                // blocks this rendering worker only
                if seconds > 0.0 {
                    std::thread::sleep(std::time::Duration::from_secs_f32(seconds));
                }
            }
            Command::Latency { seconds } => {
                let elapsed = now_epoch_ns() as f64 / 1e9 - seconds;
                log::debug!(
                    "section {} producer latency {:.1}ms",
                    self.inputs.section_id,
                    elapsed * 1e3
                );
            }
            Command::Message { text } => {
                log::info!("section {}: {text}", self.inputs.section_id);
            }
            Command::Timestamp { text } => self.record_timestamp(text),
            Command::BeginLayer {
                layer_id,
                seed,
                top,
                left,
                height,
                width,
            } => {
                self.begin_layer(layer_id, seed, top, left, height, width, decoder)?;
            }
            Command::EndLayer { layer_id, .. } => {
                if self.open_layers.last().map(|l| l.layer_id) != Some(layer_id) {
                    return Err(RenderError::LayerUnderflow { layer_id });
                }
                self.close_layer()?;
            }
        }
        Ok(())
    }

    fn fill_paint(&self) -> Option<Paint<'static>> {
        let state = self.state.current();
        let mut paint = Paint {
            anti_alias: true,
            ..Paint::default()
        };
        if state.fill_gradient >= 0 {
            let spec = state.gradients.get(&state.fill_gradient)?;
            let stops: Vec<GradientStop> = spec
                .stops
                .iter()
                .map(|&(pos, color)| GradientStop::new(pos.clamp(0.0, 1.0), color))
                .collect();
            paint.shader = LinearGradient::new(
                Point::from_xy(spec.x0, spec.y0),
                Point::from_xy(spec.x1, spec.y1),
                stops,
                SpreadMode::Pad,
                Transform::identity(),
            )?;
        } else {
            paint.set_color(state.fill_color);
        }
        Some(paint)
    }

    fn stroke_pen(&self) -> (Paint<'static>, Stroke) {
        let state = self.state.current();
        let mut paint = Paint {
            anti_alias: true,
            ..Paint::default()
        };
        paint.set_color(state.line_color);
        let dash = if state.line_dash > 0.0 {
            StrokeDash::new(vec![state.line_dash, state.line_dash], 0.0)
        } else {
            None
        };
        let stroke = Stroke {
            width: state.line_width,
            line_cap: state.line_cap,
            line_join: state.line_join,
            dash,
            ..Stroke::default()
        };
        (paint, stroke)
    }

    fn fill_current_path(&mut self) {
        let Some(path) = self.state.current().path.clone().finish() else {
            return;
        };
        let Some(paint) = self.fill_paint() else {
            return;
        };
        let surface = self.surface();
        let transform = surface.transform;
        let clip = surface.clip.clone();
        surface
            .pixmap
            .fill_path(&path, &paint, FillRule::EvenOdd, transform, clip.as_ref());
    }

    fn stroke_current_path(&mut self) {
        let Some(path) = self.state.current().path.clone().finish() else {
            return;
        };
        let (paint, stroke) = self.stroke_pen();
        let surface = self.surface();
        let transform = surface.transform;
        let clip = surface.clip.clone();
        surface
            .pixmap
            .stroke_path(&path, &paint, &stroke, transform, clip.as_ref());
    }

    fn draw_text(&mut self, text: &str, x: f32, y: f32, mode: TextMode) {
        let state = self.state.current();
        let metrics = self.fonts.measure(text, &state.font);
        let (ox, oy) = crate::raster::text::aligned_origin(
            x,
            y,
            &metrics,
            state.text_align,
            state.text_baseline,
        );
        let Some(path) = self.fonts.outline_text(text, &state.font, ox, oy) else {
            return;
        };
        match mode {
            TextMode::Fill => {
                let Some(paint) = self.fill_paint() else {
                    return;
                };
                let surface = self.surface();
                let transform = surface.transform;
                let clip = surface.clip.clone();
                surface
                    .pixmap
                    // glyph outlines are wound, not even-odd
                    .fill_path(&path, &paint, FillRule::Winding, transform, clip.as_ref());
            }
            TextMode::Stroke => {
                let (paint, stroke) = self.stroke_pen();
                let surface = self.surface();
                let transform = surface.transform;
                let clip = surface.clip.clone();
                surface
                    .pixmap
                    .stroke_path(&path, &paint, &stroke, transform, clip.as_ref());
            }
        }
    }

    /// Device-space destination size used for resampling decisions.
    fn dest_device_size(&mut self, width: f32, height: f32) -> (f32, f32) {
        let state_scale = (self.state.current().scale_x, self.state.current().scale_y);
        let surface_scale = self.surface().scale;
        (
            width * state_scale.0.abs() * surface_scale,
            height * state_scale.1.abs() * surface_scale,
        )
    }

    fn blit(&mut self, bitmap: &Pixmap, x: f32, y: f32, width: f32, height: f32) {
        if width <= 0.0 || height <= 0.0 {
            return;
        }
        let paint = PixmapPaint {
            quality: FilterQuality::Bilinear,
            ..PixmapPaint::default()
        };
        let surface = self.surface();
        let transform = surface
            .transform
            .pre_translate(x, y)
            .pre_scale(width / bitmap.width() as f32, height / bitmap.height() as f32);
        let clip = surface.clip.clone();
        surface
            .pixmap
            .draw_pixmap(0, 0, bitmap.as_ref(), &paint, transform, clip.as_ref());
    }

    fn draw_image(&mut self, image_id: u32, x: f32, y: f32, width: f32, height: f32) {
        if let Some(bitmap) = self.image_cache.get(image_id) {
            let bitmap = bitmap.clone();
            self.blit(&bitmap, x, y, width, height);
            return;
        }
        let Some(SampledBuffer::Rgba {
            width: sw,
            height: sh,
            data,
        }) = self.inputs.buffers.get(&image_id)
        else {
            log::warn!("image {image_id} missing from buffer map, skipping blit");
            return;
        };
        let Some(decoded) = pixmap_from_rgba(*sw, *sh, data) else {
            return;
        };
        let bitmap = self.maybe_downscale(decoded, width, height);
        self.image_cache.insert(image_id, bitmap.clone());
        self.blit(&bitmap, x, y, width, height);
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_data(
        &mut self,
        image_id: u32,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        low: f32,
        high: f32,
        colormap_id: u32,
    ) {
        if let Some(bitmap) = self.image_cache.get(image_id) {
            let bitmap = bitmap.clone();
            self.blit(&bitmap, x, y, width, height);
            return;
        }
        let Some(SampledBuffer::Scalar {
            width: sw,
            height: sh,
            data,
        }) = self.inputs.buffers.get(&image_id)
        else {
            log::warn!("data buffer {image_id} missing from buffer map, skipping blit");
            return;
        };
        // colormap id 0 means no lookup table
        let colormap = if colormap_id != 0 {
            self.inputs
                .buffers
                .get(&colormap_id)
                .and_then(colormap_from_buffer)
        } else {
            None
        };
        let Some(decoded) = pixmap_from_scalar(*sw, *sh, data, low, high, colormap.as_ref())
        else {
            return;
        };
        let bitmap = self.maybe_downscale(decoded, width, height);
        self.image_cache.insert(image_id, bitmap.clone());
        self.blit(&bitmap, x, y, width, height);
    }

    fn maybe_downscale(&mut self, decoded: Pixmap, width: f32, height: f32) -> Pixmap {
        let (dw, dh) = self.dest_device_size(width, height);
        match downscale_target(decoded.width(), decoded.height(), dw, dh)
            .and_then(|(tw, th)| resample(&decoded, tw, th))
        {
            Some(smaller) => smaller,
            None => decoded,
        }
    }

    fn record_timestamp(&mut self, text: String) {
        // short placeholder payloads reuse the previous pass's
        // timestamp, keeping the overlay stable across cache-heavy
        // passes
        let resolved = if text.len() <= 4 {
            self.inputs.previous_timestamp.clone()
        } else {
            parse_utc_timestamp(&text).map(|ns| (ns, text))
        };
        let Some((timestamp_ns, text)) = resolved else {
            return;
        };
        let world = self.surface().world;
        self.timestamps.push(RenderedTimestamp {
            section_id: self.inputs.section_id,
            transform: world,
            timestamp_ns,
            text,
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn begin_layer(
        &mut self,
        layer_id: u32,
        seed: u32,
        top: f32,
        left: f32,
        height: f32,
        width: f32,
        decoder: &mut CommandDecoder<'_>,
    ) -> Result<(), RenderError> {
        self.layers_used.insert(layer_id);

        if let Some(cached) = self.layer_cache.get(layer_id, seed) {
            let bitmap = cached.bitmap.clone();
            // the cached entry carries the rect it was rendered for
            let (left, top, width, height) = (cached.left, cached.top, cached.width, cached.height);
            self.skip_to_end_layer(layer_id, decoder)?;
            self.blit(&bitmap, left, top, width, height);
            return Ok(());
        }

        let scale = self.surface().scale;
        let device_width = scaled_dim(width.max(1.0) as u32, scale);
        let device_height = scaled_dim(height.max(1.0) as u32, scale);
        let pixmap =
            Pixmap::new(device_width, device_height).ok_or(RenderError::SurfaceAllocation {
                width: device_width,
                height: device_height,
            })?;

        // the layer contributes its own translation to the world
        // transform carried by recorded timestamps
        let parent_world = self.surface().world;
        let transform = Transform::from_scale(scale, scale).pre_translate(left, top);
        self.surfaces.push(Surface {
            pixmap,
            transform,
            world: parent_world.pre_translate(left, top),
            clip: None,
            scale,
            saved: Vec::new(),
        });
        self.open_layers.push(OpenLayer {
            layer_id,
            seed,
            left,
            top,
            width,
            height,
        });
        Ok(())
    }

    /// Consumes operations up to the `end_layer` matching a cache-hit
    /// `begin_layer`. Nested layer ids seen along the way still count
    /// as referenced so their cache entries survive the sweep.
    fn skip_to_end_layer(
        &mut self,
        layer_id: u32,
        decoder: &mut CommandDecoder<'_>,
    ) -> Result<(), RenderError> {
        let mut depth: Vec<u32> = Vec::new();
        while let Some(cmd) = decoder.decode_next()? {
            match cmd {
                Command::BeginLayer { layer_id: inner, .. } => {
                    self.layers_used.insert(inner);
                    depth.push(inner);
                }
                Command::EndLayer { layer_id: inner, .. } => {
                    if depth.pop().is_none() {
                        if inner == layer_id {
                            return Ok(());
                        }
                        return Err(RenderError::LayerUnderflow { layer_id: inner });
                    }
                }
                _ => {}
            }
        }
        Err(RenderError::StructuralTruncation {
            offset: self.inputs.words.len(),
        })
    }

    fn close_layer(&mut self) -> Result<(), RenderError> {
        let info = self.open_layers.pop();
        if self.surfaces.len() <= 1 {
            return Ok(());
        }
        let Some(surface) = self.surfaces.pop() else {
            return Ok(());
        };
        // an orphan surface without bookkeeping is dropped undrawn
        let Some(info) = info else {
            return Ok(());
        };
        self.layer_cache.insert(
            info.layer_id,
            LayerEntry {
                seed: info.seed,
                bitmap: surface.pixmap.clone(),
                left: info.left,
                top: info.top,
                width: info.width,
                height: info.height,
            },
        );
        self.blit(&surface.pixmap, info.left, info.top, info.width, info.height);
        Ok(())
    }
}

enum TextMode {
    Fill,
    Stroke,
}

/// Appends a circular arc as cubic segments. A non-positive radius
/// degenerates to a straight line to the center point.
pub fn append_arc(
    pb: &mut PathBuilder,
    cx: f32,
    cy: f32,
    radius: f32,
    start_angle: f32,
    end_angle: f32,
    anticlockwise: bool,
) {
    if radius <= 0.0 || !radius.is_finite() {
        pb.line_to(cx, cy);
        return;
    }

    let mut sweep = end_angle - start_angle;
    if anticlockwise {
        if sweep <= -2.0 * PI {
            sweep = -2.0 * PI;
        } else {
            sweep %= 2.0 * PI;
            if sweep >= 0.0 {
                sweep -= 2.0 * PI;
            }
        }
    } else if sweep >= 2.0 * PI {
        sweep = 2.0 * PI;
    } else {
        sweep %= 2.0 * PI;
        if sweep <= 0.0 {
            sweep += 2.0 * PI;
        }
    }

    let start = Point::from_xy(
        cx + radius * start_angle.cos(),
        cy + radius * start_angle.sin(),
    );
    if pb.last_point().is_some() {
        pb.line_to(start.x, start.y);
    } else {
        pb.move_to(start.x, start.y);
    }

    let segments = (sweep.abs() / (PI / 2.0)).ceil().max(1.0) as u32;
    let delta = sweep / segments as f32;
    let k = 4.0 / 3.0 * (delta / 4.0).tan();

    let mut angle = start_angle;
    for _ in 0..segments {
        let next = angle + delta;
        let (sin0, cos0) = angle.sin_cos();
        let (sin1, cos1) = next.sin_cos();
        let c1x = cx + radius * (cos0 - k * sin0);
        let c1y = cy + radius * (sin0 + k * cos0);
        let c2x = cx + radius * (cos1 + k * sin1);
        let c2y = cy + radius * (sin1 - k * cos1);
        pb.cubic_to(
            c1x,
            c1y,
            c2x,
            c2y,
            cx + radius * cos1,
            cy + radius * sin1,
        );
        angle = next;
    }
}

/// Appends an arc tangent to the lines p0→p1 and p1→p2. Degenerate
/// inputs (coincident points, zero radius, collinear points) emit a
/// straight line to p1 instead.
pub fn append_arc_to(pb: &mut PathBuilder, x1: f32, y1: f32, x2: f32, y2: f32, radius: f32) {
    let Some(p0) = pb.last_point() else {
        pb.move_to(x1, y1);
        return;
    };

    let v1 = (p0.x - x1, p0.y - y1);
    let v2 = (x2 - x1, y2 - y1);
    let len1 = (v1.0 * v1.0 + v1.1 * v1.1).sqrt();
    let len2 = (v2.0 * v2.0 + v2.1 * v2.1).sqrt();
    let cross = v1.0 * v2.1 - v1.1 * v2.0;
    if radius <= 0.0 || len1 < f32::EPSILON || len2 < f32::EPSILON || cross.abs() < f32::EPSILON {
        pb.line_to(x1, y1);
        return;
    }

    let u1 = (v1.0 / len1, v1.1 / len1);
    let u2 = (v2.0 / len2, v2.1 / len2);
    let cos_theta = (u1.0 * u2.0 + u1.1 * u2.1).clamp(-1.0, 1.0);
    let half = cos_theta.acos() / 2.0;
    if half.sin().abs() < f32::EPSILON {
        pb.line_to(x1, y1);
        return;
    }
    let tangent_dist = radius / half.tan();

    let t1 = Point::from_xy(x1 + u1.0 * tangent_dist, y1 + u1.1 * tangent_dist);
    let t2 = Point::from_xy(x1 + u2.0 * tangent_dist, y1 + u2.1 * tangent_dist);

    let bisector = (u1.0 + u2.0, u1.1 + u2.1);
    let bis_len = (bisector.0 * bisector.0 + bisector.1 * bisector.1).sqrt();
    let center_dist = radius / half.sin();
    let center = Point::from_xy(
        x1 + bisector.0 / bis_len * center_dist,
        y1 + bisector.1 / bis_len * center_dist,
    );

    let start_angle = (t1.y - center.y).atan2(t1.x - center.x);
    let end_angle = (t2.y - center.y).atan2(t2.x - center.x);
    // cross > 0 means p2 lies clockwise of p0 in y-down coordinates
    let anticlockwise = cross > 0.0;

    pb.line_to(t1.x, t1.y);
    append_arc(pb, center.x, center.y, radius, start_angle, end_angle, anticlockwise);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::stream::StreamBuilder;
    use hashbrown::HashMap;

    fn run(words: &[u32]) -> PassOutput {
        run_with(words, &HashMap::new(), &mut ImageCache::new(), &mut LayerCache::new())
    }

    fn run_with(
        words: &[u32],
        buffers: &BufferMap,
        image_cache: &mut ImageCache,
        layer_cache: &mut LayerCache,
    ) -> PassOutput {
        let inputs = PassInputs {
            section_id: 1,
            rect: Rect::new(0, 0, 32, 32),
            device_pixel_ratio: 1.0,
            display_scale: 1.0,
            words,
            buffers,
            previous_timestamp: None,
        };
        let diagnostics = DiagnosticsRegistry::new(50);
        let fonts = FontContext::synthetic();
        execute_pass(&inputs, image_cache, layer_cache, &diagnostics, &fonts).unwrap()
    }

    fn pixel(out: &PassOutput, x: u32, y: u32) -> (u8, u8, u8, u8) {
        let px = out.pixmap.pixels()[(y * out.pixmap.width() + x) as usize];
        (px.red(), px.green(), px.blue(), px.alpha())
    }

    #[test]
    fn filled_triangle_covers_inside_not_outside() {
        let words = StreamBuilder::new()
            .op("bpth")
            .op_f32("move", &[0.0, 0.0])
            .op_f32("line", &[10.0, 0.0])
            .op_f32("line", &[10.0, 10.0])
            .op("cpth")
            .op_str("flst", "rgb(255,0,0)")
            .op("fill")
            .finish();

        let out = run(&words);
        // inside the right triangle (0,0)-(10,0)-(10,10)
        assert_eq!(pixel(&out, 8, 2), (255, 0, 0, 255));
        // outside, below the hypotenuse
        assert_eq!(pixel(&out, 2, 8).3, 0);
        // well outside
        assert_eq!(pixel(&out, 20, 20).3, 0);
    }

    #[test]
    fn surface_starts_transparent() {
        let out = run(&[]);
        assert_eq!(pixel(&out, 0, 0).3, 0);
    }

    #[test]
    fn stroke_respects_stroke_style() {
        let words = StreamBuilder::new()
            .op("bpth")
            .op_f32("move", &[2.0, 16.0])
            .op_f32("line", &[30.0, 16.0])
            .op_str("stst", "rgb(0,0,255)")
            .op_f32("linw", &[4.0])
            .op("strk")
            .finish();

        let out = run(&words);
        assert_eq!(pixel(&out, 16, 16), (0, 0, 255, 255));
        assert_eq!(pixel(&out, 16, 2).3, 0);
    }

    #[test]
    fn clip_masks_out_fills() {
        let words = StreamBuilder::new()
            .op_f32("clip", &[0.0, 0.0, 8.0, 8.0])
            .op("bpth")
            .op_f32("rect", &[0.0, 0.0, 32.0, 32.0])
            .op_str("flst", "rgb(0,255,0)")
            .op("fill")
            .finish();

        let out = run(&words);
        assert_eq!(pixel(&out, 4, 4), (0, 255, 0, 255));
        assert_eq!(pixel(&out, 20, 20).3, 0);
    }

    #[test]
    fn save_restore_round_trips_transform() {
        let words = StreamBuilder::new()
            .op("save")
            .op_f32("tran", &[16.0, 16.0])
            .op("rest")
            .op("bpth")
            .op_f32("rect", &[0.0, 0.0, 4.0, 4.0])
            .op_str("flst", "rgb(255,255,255)")
            .op("fill")
            .finish();

        let out = run(&words);
        // the translate was restored away, so the rect lands at origin
        assert_eq!(pixel(&out, 1, 1), (255, 255, 255, 255));
        assert_eq!(pixel(&out, 17, 17).3, 0);
    }

    #[test]
    fn restore_underflow_fails_the_pass() {
        let words = StreamBuilder::new().op("rest").finish();
        let inputs = PassInputs {
            section_id: 1,
            rect: Rect::new(0, 0, 8, 8),
            device_pixel_ratio: 1.0,
            display_scale: 1.0,
            words: &words,
            buffers: &HashMap::new(),
            previous_timestamp: None,
        };
        let diagnostics = DiagnosticsRegistry::new(50);
        let fonts = FontContext::synthetic();
        let result = execute_pass(
            &inputs,
            &mut ImageCache::new(),
            &mut LayerCache::new(),
            &diagnostics,
            &fonts,
        );
        assert!(matches!(result, Err(RenderError::StateUnderflow)));
    }

    #[test]
    fn gradient_fill_interpolates_between_stops() {
        let words = StreamBuilder::new()
            .op("grad")
            .i32(1)
            .f32(0.0)
            .f32(0.0)
            .f32(0.0)
            .f32(0.0)
            .f32(32.0)
            .f32(0.0)
            .op("grcs")
            .i32(1)
            .f32(0.0)
            .str("rgb(0,0,0)")
            .op("grcs")
            .i32(1)
            .f32(1.0)
            .str("rgb(255,255,255)")
            .op("flsg")
            .i32(1)
            .op("bpth")
            .op_f32("rect", &[0.0, 0.0, 32.0, 32.0])
            .op("fill")
            .finish();

        let out = run(&words);
        let left = pixel(&out, 1, 16).0;
        let right = pixel(&out, 30, 16).0;
        assert!(left < 40, "left end should be near black, got {left}");
        assert!(right > 215, "right end should be near white, got {right}");
    }

    #[test]
    fn stops_before_gradient_definition_still_paint() {
        // stops alone create the default gradient spec
        let words = StreamBuilder::new()
            .op("grcs")
            .i32(1)
            .f32(0.0)
            .str("rgb(255,0,0)")
            .op("grcs")
            .i32(1)
            .f32(1.0)
            .str("rgb(255,0,0)")
            .op("flsg")
            .i32(1)
            .op("bpth")
            .op_f32("rect", &[0.0, 0.0, 16.0, 16.0])
            .op("fill")
            .finish();

        let out = run(&words);
        assert_eq!(pixel(&out, 8, 8), (255, 0, 0, 255));
    }

    #[test]
    fn image_blit_draws_and_caches() {
        let mut buffers: BufferMap = HashMap::new();
        buffers.insert(
            5,
            SampledBuffer::Rgba {
                width: 2,
                height: 2,
                data: vec![0xFFFF0000; 4],
            },
        );
        let words = StreamBuilder::new()
            .op("imag")
            .u32(2)
            .u32(2)
            .u32(5)
            .f32(0.0)
            .f32(0.0)
            .f32(8.0)
            .f32(8.0)
            .finish();

        let mut images = ImageCache::new();
        let mut layers = LayerCache::new();
        let out = run_with(&words, &buffers, &mut images, &mut layers);
        assert_eq!(pixel(&out, 4, 4), (255, 0, 0, 255));
        assert_eq!(images.len(), 1);

        // second pass with an empty buffer map still draws from cache
        let out = run_with(&words, &HashMap::new(), &mut images, &mut layers);
        assert_eq!(pixel(&out, 4, 4), (255, 0, 0, 255));
    }

    #[test]
    fn missing_buffer_skips_blit() {
        let words = StreamBuilder::new()
            .op("imag")
            .u32(2)
            .u32(2)
            .u32(9)
            .f32(0.0)
            .f32(0.0)
            .f32(8.0)
            .f32(8.0)
            .finish();
        let out = run(&words);
        assert_eq!(pixel(&out, 4, 4).3, 0);
    }

    #[test]
    fn data_blit_applies_display_range() {
        let mut buffers: BufferMap = HashMap::new();
        buffers.insert(
            3,
            SampledBuffer::Scalar {
                width: 1,
                height: 1,
                data: vec![1.0],
            },
        );
        let words = StreamBuilder::new()
            .op("data")
            .u32(1)
            .u32(1)
            .u32(3)
            .f32(0.0)
            .f32(0.0)
            .f32(8.0)
            .f32(8.0)
            .f32(0.0)
            .f32(1.0)
            .u32(0)
            .finish();

        let out = run_with(
            &words,
            &buffers,
            &mut ImageCache::new(),
            &mut LayerCache::new(),
        );
        // top of range, no colormap: white
        assert_eq!(pixel(&out, 4, 4), (255, 255, 255, 255));
    }

    fn layer_stream(seed: u32, color: &str) -> Vec<u32> {
        StreamBuilder::new()
            .op("bgly")
            .u32(7)
            .u32(seed)
            .f32(0.0)
            .f32(0.0)
            .f32(16.0)
            .f32(16.0)
            .op("bpth")
            .op_f32("rect", &[0.0, 0.0, 16.0, 16.0])
            .op_str("flst", color)
            .op("fill")
            .op("enly")
            .u32(7)
            .u32(seed)
            .f32(0.0)
            .f32(0.0)
            .f32(16.0)
            .f32(16.0)
            .finish()
    }

    #[test]
    fn layer_cache_hit_skips_enclosed_operations() {
        let mut images = ImageCache::new();
        let mut layers = LayerCache::new();

        let out = run_with(&layer_stream(1, "rgb(255,0,0)"), &HashMap::new(), &mut images, &mut layers);
        assert_eq!(pixel(&out, 4, 4), (255, 0, 0, 255));
        assert_eq!(layers.len(), 1);

        // same seed, different enclosed fill color: cached red wins
        let out = run_with(&layer_stream(1, "rgb(0,0,255)"), &HashMap::new(), &mut images, &mut layers);
        assert_eq!(pixel(&out, 4, 4), (255, 0, 0, 255));

        // changed seed forces a re-render
        let out = run_with(&layer_stream(2, "rgb(0,0,255)"), &HashMap::new(), &mut images, &mut layers);
        assert_eq!(pixel(&out, 4, 4), (0, 0, 255, 255));
    }

    #[test]
    fn layer_cache_hit_draws_at_the_recorded_rect() {
        let mut images = ImageCache::new();
        let mut layers = LayerCache::new();

        // first pass renders the layer at the origin
        run_with(&layer_stream(1, "rgb(255,0,0)"), &HashMap::new(), &mut images, &mut layers);

        // a later stream moves the begin_layer rect; the hit still
        // lands at the rect stored with the cached entry
        let moved = StreamBuilder::new()
            .op("bgly")
            .u32(7)
            .u32(1)
            .f32(0.0)
            .f32(16.0)
            .f32(16.0)
            .f32(16.0)
            .op("enly")
            .u32(7)
            .u32(1)
            .f32(0.0)
            .f32(16.0)
            .f32(16.0)
            .f32(16.0)
            .finish();
        let out = run_with(&moved, &HashMap::new(), &mut images, &mut layers);
        assert_eq!(pixel(&out, 4, 4), (255, 0, 0, 255));
        assert_eq!(pixel(&out, 20, 4).3, 0);
    }

    #[test]
    fn unreferenced_layer_is_swept() {
        let mut images = ImageCache::new();
        let mut layers = LayerCache::new();
        run_with(&layer_stream(1, "rgb(255,0,0)"), &HashMap::new(), &mut images, &mut layers);
        assert_eq!(layers.len(), 1);
        run_with(&[], &HashMap::new(), &mut images, &mut layers);
        assert_eq!(layers.len(), 0);
    }

    #[test]
    fn end_layer_without_begin_is_layer_underflow() {
        let words = StreamBuilder::new()
            .op("enly")
            .u32(9)
            .u32(0)
            .f32(0.0)
            .f32(0.0)
            .f32(4.0)
            .f32(4.0)
            .finish();
        let inputs = PassInputs {
            section_id: 1,
            rect: Rect::new(0, 0, 8, 8),
            device_pixel_ratio: 1.0,
            display_scale: 1.0,
            words: &words,
            buffers: &HashMap::new(),
            previous_timestamp: None,
        };
        let diagnostics = DiagnosticsRegistry::new(50);
        let fonts = FontContext::synthetic();
        let result = execute_pass(
            &inputs,
            &mut ImageCache::new(),
            &mut LayerCache::new(),
            &diagnostics,
            &fonts,
        );
        assert!(matches!(
            result,
            Err(RenderError::LayerUnderflow { layer_id: 9 })
        ));
    }

    #[test]
    fn timestamp_is_recorded_not_drawn() {
        let words = StreamBuilder::new()
            .op_str("time", "19700101T000001.500000")
            .finish();
        let out = run(&words);
        assert_eq!(out.timestamps.len(), 1);
        assert_eq!(out.timestamps[0].timestamp_ns, 1_500_000_000);
        // nothing painted
        assert_eq!(pixel(&out, 0, 0).3, 0);
    }

    #[test]
    fn timestamp_inside_layer_carries_the_layer_offset() {
        let words = StreamBuilder::new()
            .op("bgly")
            .u32(7)
            .u32(1)
            .f32(20.0)
            .f32(10.0)
            .f32(8.0)
            .f32(8.0)
            .op_str("time", "19700101T000001.500000")
            .op("enly")
            .u32(7)
            .u32(1)
            .f32(20.0)
            .f32(10.0)
            .f32(8.0)
            .f32(8.0)
            .finish();

        let out = run(&words);
        assert_eq!(out.timestamps.len(), 1);
        let world = out.timestamps[0].transform;
        assert_eq!((world.tx, world.ty), (10.0, 20.0));
    }

    #[test]
    fn short_timestamp_reuses_previous_pass() {
        let words = StreamBuilder::new().op_str("time", "last").finish();
        let inputs = PassInputs {
            section_id: 1,
            rect: Rect::new(0, 0, 8, 8),
            device_pixel_ratio: 1.0,
            display_scale: 1.0,
            words: &words,
            buffers: &HashMap::new(),
            previous_timestamp: Some((42, "prior".to_string())),
        };
        let diagnostics = DiagnosticsRegistry::new(50);
        let fonts = FontContext::synthetic();
        let out = execute_pass(
            &inputs,
            &mut ImageCache::new(),
            &mut LayerCache::new(),
            &diagnostics,
            &fonts,
        )
        .unwrap();
        assert_eq!(out.timestamps.len(), 1);
        assert_eq!(out.timestamps[0].timestamp_ns, 42);

        // no previous pass: the placeholder is dropped
        let inputs = PassInputs {
            previous_timestamp: None,
            ..inputs
        };
        let out = execute_pass(
            &inputs,
            &mut ImageCache::new(),
            &mut LayerCache::new(),
            &diagnostics,
            &fonts,
        )
        .unwrap();
        assert!(out.timestamps.is_empty());
    }

    #[test]
    fn arc_to_with_coincident_points_degenerates_to_line() {
        let mut pb = PathBuilder::new();
        pb.move_to(10.0, 10.0);
        append_arc_to(&mut pb, 10.0, 10.0, 20.0, 20.0, 5.0);
        let path = pb.finish().unwrap();
        // a single line segment: move + line verbs only
        assert_eq!(path.verbs().len(), 2);
    }

    #[test]
    fn arc_full_circle_closes_on_itself() {
        let mut pb = PathBuilder::new();
        append_arc(&mut pb, 10.0, 10.0, 5.0, 0.0, 2.0 * PI, false);
        let path = pb.finish().unwrap();
        let last = path.points().last().copied().unwrap();
        assert!((last.x - 15.0).abs() < 1e-3);
        assert!((last.y - 10.0).abs() < 1e-3);
    }

    #[test]
    fn zero_radius_arc_degenerates_to_line() {
        let mut pb = PathBuilder::new();
        pb.move_to(0.0, 0.0);
        append_arc(&mut pb, 8.0, 8.0, 0.0, 0.0, 1.0, false);
        let path = pb.finish().unwrap();
        assert_eq!(path.verbs().len(), 2);
    }

    #[test]
    fn device_pixel_ratio_scales_backing_store() {
        let words = StreamBuilder::new()
            .op("bpth")
            .op_f32("rect", &[0.0, 0.0, 4.0, 4.0])
            .op_str("flst", "rgb(255,0,0)")
            .op("fill")
            .finish();
        let inputs = PassInputs {
            section_id: 1,
            rect: Rect::new(0, 0, 16, 16),
            device_pixel_ratio: 2.0,
            display_scale: 1.0,
            words: &words,
            buffers: &HashMap::new(),
            previous_timestamp: None,
        };
        let diagnostics = DiagnosticsRegistry::new(50);
        let fonts = FontContext::synthetic();
        let out = execute_pass(
            &inputs,
            &mut ImageCache::new(),
            &mut LayerCache::new(),
            &diagnostics,
            &fonts,
        )
        .unwrap();
        assert_eq!(out.pixmap.width(), 32);
        // the 4x4 logical rect covers 8x8 device pixels
        assert_eq!(pixel(&out, 7, 7), (255, 0, 0, 255));
        assert_eq!(pixel(&out, 9, 9).3, 0);
    }
}
