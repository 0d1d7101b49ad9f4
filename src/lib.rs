pub mod cache;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod errors;
pub mod geometry;
pub mod raster;
pub mod section;
pub mod state;
pub mod wire;

pub use config::CanvasConfig;
pub use engine::{CanvasEngine, RepaintRequest};
pub use errors::RenderError;
pub use geometry::Rect;
pub use raster::{BufferMap, SampledBuffer};
pub use wire::{decode_all, Command};
