//! Rasterization and compositing.
//!
//! [`execute_pass`] turns one decoded command buffer into a
//! device-resolution bitmap, resolving colors, fonts, gradients,
//! sampled buffers, and nested cached layers along the way.

pub mod color;
pub mod executor;
pub mod image;
pub mod text;

pub use executor::{execute_pass, PassInputs, PassOutput};
pub use image::{BufferMap, SampledBuffer};
