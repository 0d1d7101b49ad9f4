//! Drawing operations and the tag table.
//!
//! Each wire operation starts with a four-byte ASCII tag; the closed
//! set of tags is listed in [`tag`]. Decoded operations are immutable
//! [`Command`] values consumed in stream order.
//!
//! # Main Types
//!
//! - [`Command`]: tagged union of every drawing operation.
//! - [`tag`]: the tag constants, as big-endian ASCII words.

/// Operation tags as big-endian ASCII words. The reader byte-swaps the
/// raw tag word before comparing against these.
pub mod tag {
    pub const SAVE: u32 = u32::from_be_bytes(*b"save");
    pub const RESTORE: u32 = u32::from_be_bytes(*b"rest");
    pub const BEGIN_PATH: u32 = u32::from_be_bytes(*b"bpth");
    pub const CLOSE_PATH: u32 = u32::from_be_bytes(*b"cpth");
    pub const CLIP: u32 = u32::from_be_bytes(*b"clip");
    pub const TRANSLATE: u32 = u32::from_be_bytes(*b"tran");
    pub const SCALE: u32 = u32::from_be_bytes(*b"scal");
    pub const ROTATE: u32 = u32::from_be_bytes(*b"rota");
    pub const MOVE_TO: u32 = u32::from_be_bytes(*b"move");
    pub const LINE_TO: u32 = u32::from_be_bytes(*b"line");
    pub const RECT: u32 = u32::from_be_bytes(*b"rect");
    pub const ARC: u32 = u32::from_be_bytes(*b"arc ");
    pub const ARC_TO: u32 = u32::from_be_bytes(*b"arct");
    pub const CUBIC_TO: u32 = u32::from_be_bytes(*b"cubc");
    pub const QUAD_TO: u32 = u32::from_be_bytes(*b"quad");
    pub const STROKE: u32 = u32::from_be_bytes(*b"strk");
    pub const FILL: u32 = u32::from_be_bytes(*b"fill");
    pub const FILL_STYLE: u32 = u32::from_be_bytes(*b"flst");
    pub const FILL_STYLE_GRADIENT: u32 = u32::from_be_bytes(*b"flsg");
    pub const FILL_TEXT: u32 = u32::from_be_bytes(*b"text");
    pub const STROKE_TEXT: u32 = u32::from_be_bytes(*b"stxt");
    pub const FONT: u32 = u32::from_be_bytes(*b"font");
    pub const TEXT_ALIGN: u32 = u32::from_be_bytes(*b"algn");
    pub const TEXT_BASELINE: u32 = u32::from_be_bytes(*b"tbas");
    pub const STROKE_STYLE: u32 = u32::from_be_bytes(*b"stst");
    pub const LINE_DASH: u32 = u32::from_be_bytes(*b"ldsh");
    pub const LINE_WIDTH: u32 = u32::from_be_bytes(*b"linw");
    pub const LINE_CAP: u32 = u32::from_be_bytes(*b"lcap");
    pub const LINE_JOIN: u32 = u32::from_be_bytes(*b"lnjn");
    pub const GRADIENT: u32 = u32::from_be_bytes(*b"grad");
    pub const COLOR_STOP: u32 = u32::from_be_bytes(*b"grcs");
    pub const DRAW_IMAGE: u32 = u32::from_be_bytes(*b"imag");
    pub const DRAW_DATA: u32 = u32::from_be_bytes(*b"data");
    pub const STATISTICS: u32 = u32::from_be_bytes(*b"stat");
    pub const SLEEP: u32 = u32::from_be_bytes(*b"slep");
    pub const LATENCY: u32 = u32::from_be_bytes(*b"latn");
    pub const MESSAGE: u32 = u32::from_be_bytes(*b"mesg");
    pub const TIMESTAMP: u32 = u32::from_be_bytes(*b"time");
    pub const BEGIN_LAYER: u32 = u32::from_be_bytes(*b"bgly");
    pub const END_LAYER: u32 = u32::from_be_bytes(*b"enly");
}

/// A single decoded drawing operation.
///
/// Coordinates are logical (pre display-scale); the rasterizer applies
/// scaling at execution time.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Push a snapshot of all drawing attributes.
    Save,
    /// Pop the attribute stack, replacing all current attributes.
    Restore,
    /// Replace the current path with an empty one.
    BeginPath,
    /// Close the current subpath.
    ClosePath,
    /// Intersect the active clip with a rect under the current transform.
    Clip { x: f32, y: f32, width: f32, height: f32 },
    Translate { x: f32, y: f32 },
    Scale { x: f32, y: f32 },
    /// Rotation in degrees, clockwise in the y-down coordinate space.
    Rotate { degrees: f32 },
    MoveTo { x: f32, y: f32 },
    LineTo { x: f32, y: f32 },
    /// Append a rectangle subpath to the current path.
    RectPath { x: f32, y: f32, width: f32, height: f32 },
    /// Circular arc; angles in radians measured from the positive x axis.
    Arc {
        x: f32,
        y: f32,
        radius: f32,
        start_angle: f32,
        end_angle: f32,
        anticlockwise: bool,
    },
    /// Arc between two tangent lines, from the current point through
    /// `(x1, y1)` towards `(x2, y2)`.
    ArcTo { x1: f32, y1: f32, x2: f32, y2: f32, radius: f32 },
    CubicTo { c1x: f32, c1y: f32, c2x: f32, c2y: f32, x: f32, y: f32 },
    QuadTo { cx: f32, cy: f32, x: f32, y: f32 },
    /// Stroke the current path with the current pen.
    Stroke,
    /// Fill the current path with the current brush.
    Fill,
    /// Set the fill to a solid color, clearing any gradient reference.
    FillStyle { color: String },
    /// Set the fill to a previously defined gradient.
    FillStyleGradient { gradient_id: i32 },
    FillText { text: String, x: f32, y: f32, max_width: f32 },
    StrokeText { text: String, x: f32, y: f32, max_width: f32 },
    Font { spec: String },
    TextAlign { mode: String },
    TextBaseline { mode: String },
    StrokeStyle { color: String },
    LineDash { dash: f32 },
    LineWidth { width: f32 },
    LineCap { style: String },
    LineJoin { style: String },
    /// Define a linear gradient from `(x, y)` to `(x + dx, y + dy)`.
    Gradient { gradient_id: i32, x: f32, y: f32, dx: f32, dy: f32 },
    /// Append a color stop; insertion order is significant.
    ColorStop { gradient_id: i32, position: f32, color: String },
    /// Blit a direct-color image into a destination rect.
    DrawImage {
        source_width: u32,
        source_height: u32,
        image_id: u32,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
    /// Blit a scalar array mapped through `[low, high]` and an optional
    /// 256-entry lookup table (`colormap_id == 0` means none).
    DrawData {
        source_width: u32,
        source_height: u32,
        image_id: u32,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        low: f32,
        high: f32,
        colormap_id: u32,
    },
    /// Record a frame-rate sample for a label.
    Statistics { label: String },
    /// Block the rendering worker; diagnostic only.
    Sleep { seconds: f32 },
    /// Log elapsed time against an absolute timestamp in seconds.
    Latency { seconds: f64 },
    /// Log a producer-supplied message.
    Message { text: String },
    /// Record a latency timestamp to be resolved at composite time.
    Timestamp { text: String },
    /// Open a cacheable nested layer; rect fields arrive top-first.
    BeginLayer {
        layer_id: u32,
        seed: u32,
        top: f32,
        left: f32,
        height: f32,
        width: f32,
    },
    /// Close a nested layer and composite it into the parent.
    EndLayer {
        layer_id: u32,
        seed: u32,
        top: f32,
        left: f32,
        height: f32,
        width: f32,
    },
}
