//! Graphics state machine.
//!
//! The rasterizer keeps one [`DrawState`] of current attributes plus a
//! linear stack of full snapshots. `save` pushes a copy of everything;
//! `restore` pops and replaces the current attributes wholesale. A
//! `restore` with an empty stack is an explicit
//! [`RenderError::StateUnderflow`] that aborts the pass.
//!
//! # Main Types
//!
//! - [`DrawState`]: one full attribute snapshot.
//! - [`StateStack`]: current attributes + save/restore stack.
//! - [`GradientSpec`]: a linear gradient definition with ordered stops.

use crate::errors::RenderError;
use crate::raster::text::{FontSpec, TextAlign, TextBaseline};
use hashbrown::HashMap;
use tiny_skia::{Color, LineCap, LineJoin, PathBuilder};

/// Linear gradient definition: a line from `(x0, y0)` to `(x1, y1)`
/// with ordered color stops. Stops keep insertion order and are not
/// deduplicated. A stop that arrives before the gradient definition
/// creates the default spec, whose interpolation line runs from
/// (0, 0) to (1, 1).
#[derive(Clone, Debug)]
pub struct GradientSpec {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
    pub stops: Vec<(f32, Color)>,
}

impl Default for GradientSpec {
    fn default() -> Self {
        Self {
            x0: 0.0,
            y0: 0.0,
            x1: 1.0,
            y1: 1.0,
            stops: Vec::new(),
        }
    }
}

/// One full snapshot of the drawing attributes.
#[derive(Clone)]
pub struct DrawState {
    /// Solid fill color; ignored while a gradient reference is active.
    pub fill_color: Color,
    /// Active gradient id, or a negative value for "solid fill".
    pub fill_gradient: i32,
    pub line_color: Color,
    pub line_width: f32,
    /// Symmetric dash length; `0.0` disables dashing.
    pub line_dash: f32,
    pub line_cap: LineCap,
    pub line_join: LineJoin,
    pub font: FontSpec,
    pub text_baseline: TextBaseline,
    pub text_align: TextAlign,
    /// Gradient table; part of the saved snapshot.
    pub gradients: HashMap<i32, GradientSpec>,
    /// The current path under construction.
    pub path: PathBuilder,
    /// Cumulative scale factors, mutated only by `scale` operations.
    /// Used for image resampling decisions, not for the transform.
    pub scale_x: f32,
    pub scale_y: f32,
}

impl Default for DrawState {
    fn default() -> Self {
        Self {
            fill_color: Color::TRANSPARENT,
            fill_gradient: -1,
            line_color: Color::BLACK,
            line_width: 1.0,
            line_dash: 0.0,
            line_cap: LineCap::Square,
            line_join: LineJoin::Bevel,
            font: FontSpec::default(),
            text_baseline: TextBaseline::Alphabetic,
            text_align: TextAlign::Start,
            gradients: HashMap::new(),
            path: PathBuilder::new(),
            scale_x: 1.0,
            scale_y: 1.0,
        }
    }
}

/// Current attributes plus the save/restore stack.
#[derive(Default)]
pub struct StateStack {
    current: DrawState,
    saved: Vec<DrawState>,
}

impl StateStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> &DrawState {
        &self.current
    }

    pub fn current_mut(&mut self) -> &mut DrawState {
        &mut self.current
    }

    /// Push a copy of every current attribute.
    pub fn save(&mut self) {
        self.saved.push(self.current.clone());
    }

    /// Pop and replace the current attributes wholesale.
    pub fn restore(&mut self) -> Result<(), RenderError> {
        self.current = self.saved.pop().ok_or(RenderError::StateUnderflow)?;
        Ok(())
    }

    pub fn depth(&self) -> usize {
        self.saved.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_restore_is_observably_unchanged() {
        let mut stack = StateStack::new();
        stack.current_mut().line_width = 3.5;
        stack.current_mut().fill_gradient = 2;
        stack.current_mut().scale_x = 2.0;
        stack.current_mut().gradients.insert(
            2,
            GradientSpec {
                x0: 0.0,
                y0: 0.0,
                x1: 10.0,
                y1: 0.0,
                stops: vec![(0.0, Color::BLACK)],
            },
        );

        stack.save();
        stack.restore().unwrap();

        let s = stack.current();
        assert_eq!(s.line_width, 3.5);
        assert_eq!(s.fill_gradient, 2);
        assert_eq!(s.scale_x, 2.0);
        assert_eq!(s.gradients.len(), 1);
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn restore_discards_changes_made_after_save() {
        let mut stack = StateStack::new();
        stack.save();
        stack.current_mut().line_width = 9.0;
        stack.current_mut().text_align = TextAlign::Center;
        stack.restore().unwrap();
        assert_eq!(stack.current().line_width, 1.0);
        assert_eq!(stack.current().text_align, TextAlign::Start);
    }

    #[test]
    fn restore_on_empty_stack_underflows() {
        let mut stack = StateStack::new();
        assert!(matches!(stack.restore(), Err(RenderError::StateUnderflow)));
    }

    #[test]
    fn gradient_stops_keep_insertion_order() {
        let mut spec = GradientSpec::default();
        spec.stops.push((1.0, Color::WHITE));
        spec.stops.push((0.0, Color::BLACK));
        spec.stops.push((0.0, Color::BLACK));
        assert_eq!(spec.stops[0].0, 1.0);
        assert_eq!(spec.stops.len(), 3);
    }
}
