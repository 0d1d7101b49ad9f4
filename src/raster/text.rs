//! Font parsing, baseline metrics, and glyph outlines.
//!
//! Text support is deliberately small: per-character advances summed
//! with kerning, baseline metrics for vertical placement, and glyph
//! outlines converted to fillable paths. There is no shaping or bidi.
//!
//! A process-wide font is loaded from well-known system locations; if
//! none is found, measurement falls back to deterministic synthetic
//! metrics and glyph drawing is skipped.

use ab_glyph::{Font, FontArc, OutlineCurve, PxScale, ScaleFont};
use tiny_skia::{Path, PathBuilder};

/// Parsed form of the CSS-ish `font` attribute string.
#[derive(Clone, Debug, PartialEq)]
pub struct FontSpec {
    /// Size in logical pixels (display scale already applied).
    pub size: f32,
    pub bold: bool,
    pub italic: bool,
    pub family: String,
}

impl Default for FontSpec {
    fn default() -> Self {
        Self {
            size: 12.0,
            bold: false,
            italic: false,
            family: "sans-serif".to_string(),
        }
    }
}

/// Parses strings like `"italic bold 13px sans-serif"`. Unknown tokens
/// before the size are ignored; everything after the size token is the
/// family.
pub fn parse_font(spec: &str, display_scale: f32) -> FontSpec {
    let mut out = FontSpec::default();
    let mut family_parts: Vec<&str> = Vec::new();
    let mut size_seen = false;

    for token in spec.split_whitespace() {
        if size_seen {
            family_parts.push(token);
            continue;
        }
        match token {
            "bold" => out.bold = true,
            "italic" => out.italic = true,
            "normal" => {}
            _ => {
                if let Some(px) = token.strip_suffix("px").and_then(|t| t.parse::<f32>().ok()) {
                    out.size = px * display_scale;
                    size_seen = true;
                }
            }
        }
    }
    if !family_parts.is_empty() {
        out.family = family_parts.join(" ");
    }
    out
}

/// Horizontal anchoring of the text position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TextAlign {
    #[default]
    Start,
    End,
    Left,
    Center,
    Right,
}

impl TextAlign {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "start" => Some(Self::Start),
            "end" => Some(Self::End),
            "left" => Some(Self::Left),
            "center" => Some(Self::Center),
            "right" => Some(Self::Right),
            _ => None,
        }
    }
}

/// Vertical anchoring of the text position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TextBaseline {
    Top,
    Hanging,
    Middle,
    #[default]
    Alphabetic,
    Ideographic,
    Bottom,
}

impl TextBaseline {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "top" => Some(Self::Top),
            "hanging" => Some(Self::Hanging),
            "middle" => Some(Self::Middle),
            "alphabetic" => Some(Self::Alphabetic),
            "ideographic" => Some(Self::Ideographic),
            "bottom" => Some(Self::Bottom),
            _ => None,
        }
    }
}

/// Measured extents of a text run at a given font size.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TextMetrics {
    /// Total advance width of the run.
    pub advance: f32,
    pub ascent: f32,
    /// Positive distance below the baseline.
    pub descent: f32,
    /// Line height (ascent + descent).
    pub height: f32,
    pub x_height: f32,
}

/// Maps a nominal text position to the baseline origin for the run,
/// applying alignment then baseline adjustment.
pub fn aligned_origin(
    x: f32,
    y: f32,
    metrics: &TextMetrics,
    align: TextAlign,
    baseline: TextBaseline,
) -> (f32, f32) {
    let x = match align {
        TextAlign::Start | TextAlign::Left => x,
        TextAlign::End | TextAlign::Right => x - metrics.advance,
        TextAlign::Center => x - metrics.advance * 0.5,
    };
    let y = match baseline {
        TextBaseline::Top => y + metrics.ascent,
        TextBaseline::Hanging => y + 2.0 * metrics.ascent - metrics.height,
        TextBaseline::Middle => y + metrics.x_height * 0.5,
        TextBaseline::Alphabetic | TextBaseline::Ideographic => y,
        TextBaseline::Bottom => y + metrics.ascent - metrics.height,
    };
    (x, y)
}

const FONT_SEARCH_PATHS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/truetype/noto/NotoSans-Regular.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Loaded font plus measurement entry points.
pub struct FontContext {
    font: Option<FontArc>,
}

lazy_static::lazy_static! {
    /// Process-wide font, loaded once from the system search paths.
    pub static ref SYSTEM_FONT: FontContext = FontContext::system();
}

impl FontContext {
    /// Loads the first usable font from the search paths.
    pub fn system() -> Self {
        for path in FONT_SEARCH_PATHS {
            if let Ok(bytes) = std::fs::read(path) {
                match FontArc::try_from_vec(bytes) {
                    Ok(font) => {
                        log::debug!("loaded font {path}");
                        return Self { font: Some(font) };
                    }
                    Err(e) => log::debug!("unusable font {path}: {e}"),
                }
            }
        }
        log::warn!("no system font found; text will be measured synthetically and not drawn");
        Self { font: None }
    }

    /// A context with no font file: synthetic metrics, no glyphs.
    /// Deterministic across machines, which the tests rely on.
    pub fn synthetic() -> Self {
        Self { font: None }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Measures a run at the spec's size. Bold/italic variants reuse
    /// the single loaded face.
    pub fn measure(&self, text: &str, spec: &FontSpec) -> TextMetrics {
        let size = spec.size.max(1.0);
        let Some(font) = &self.font else {
            return synthetic_metrics(text, size);
        };
        let scaled = font.as_scaled(PxScale::from(size));
        let ascent = scaled.ascent();
        let descent = -scaled.descent();

        let mut advance = 0.0;
        let mut prev = None;
        for ch in text.chars() {
            let id = font.glyph_id(ch);
            if let Some(p) = prev {
                advance += scaled.kern(p, id);
            }
            advance += scaled.h_advance(id);
            prev = Some(id);
        }

        let x_height = font
            .outline(font.glyph_id('x'))
            .map(|o| o.bounds.max.y.abs() * scaled.v_scale_factor())
            .unwrap_or(ascent * 0.5);

        TextMetrics {
            advance,
            ascent,
            descent,
            height: ascent + descent,
            x_height,
        }
    }

    /// Builds one path containing the outlines of every glyph in the
    /// run, with the baseline origin at `(x, y)`. `None` when no font
    /// is loaded or the run produces no geometry.
    pub fn outline_text(&self, text: &str, spec: &FontSpec, x: f32, y: f32) -> Option<Path> {
        let font = self.font.as_ref()?;
        let size = spec.size.max(1.0);
        let scaled = font.as_scaled(PxScale::from(size));
        let hf = scaled.h_scale_factor();
        let vf = scaled.v_scale_factor();

        let mut pb = PathBuilder::new();
        let mut pen_x = x;
        let mut prev = None;
        for ch in text.chars() {
            let id = font.glyph_id(ch);
            if let Some(p) = prev {
                pen_x += scaled.kern(p, id);
            }
            if let Some(outline) = font.outline(id) {
                // font units are y-up; flip around the baseline
                let px = |p: ab_glyph::Point| (pen_x + p.x * hf, y - p.y * vf);
                // curves chain within a contour; a gap starts a new one
                let mut last: Option<(f32, f32)> = None;
                for curve in &outline.curves {
                    match *curve {
                        OutlineCurve::Line(a, b) => {
                            let (ax, ay) = px(a);
                            let (bx, by) = px(b);
                            if contour_break(last, (ax, ay)) {
                                pb.move_to(ax, ay);
                            }
                            pb.line_to(bx, by);
                            last = Some((bx, by));
                        }
                        OutlineCurve::Quad(a, c, b) => {
                            let (ax, ay) = px(a);
                            let (cx, cy) = px(c);
                            let (bx, by) = px(b);
                            if contour_break(last, (ax, ay)) {
                                pb.move_to(ax, ay);
                            }
                            pb.quad_to(cx, cy, bx, by);
                            last = Some((bx, by));
                        }
                        OutlineCurve::Cubic(a, c1, c2, b) => {
                            let (ax, ay) = px(a);
                            let (c1x, c1y) = px(c1);
                            let (c2x, c2y) = px(c2);
                            let (bx, by) = px(b);
                            if contour_break(last, (ax, ay)) {
                                pb.move_to(ax, ay);
                            }
                            pb.cubic_to(c1x, c1y, c2x, c2y, bx, by);
                            last = Some((bx, by));
                        }
                    }
                }
            }
            pen_x += scaled.h_advance(id);
            prev = Some(id);
        }
        pb.finish()
    }
}

fn contour_break(last: Option<(f32, f32)>, at: (f32, f32)) -> bool {
    last.map(|(lx, ly)| (lx - at.0).abs() > 1e-4 || (ly - at.1).abs() > 1e-4)
        .unwrap_or(true)
}

fn synthetic_metrics(text: &str, size: f32) -> TextMetrics {
    let ascent = size * 0.8;
    let descent = size * 0.2;
    TextMetrics {
        advance: size * 0.6 * text.chars().count() as f32,
        ascent,
        descent,
        height: ascent + descent,
        x_height: ascent * 0.5,
    }
}
