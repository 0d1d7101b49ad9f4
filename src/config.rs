use serde::{Deserialize, Serialize};

/// Engine-wide configuration.
///
/// All values have working defaults; construct with
/// `CanvasConfig::default()` and override as needed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasConfig {
    /// Multiplier applied to font sizes parsed from the command
    /// stream. Distinct from a section's device pixel ratio, which
    /// affects backing-store resolution.
    pub display_scale: f32,

    /// Number of per-section latency samples kept for the overlay.
    pub latency_window: usize,

    /// Window length for the `statistics` diagnostic operation; a
    /// summary is logged every time this many samples accumulate.
    pub stats_window: usize,

    /// Cap on concurrently executing render passes.
    pub max_concurrent_renders: usize,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            display_scale: 1.0,
            latency_window: 40,
            stats_window: 50,
            max_concurrent_renders: num_cpus::get().max(1),
        }
    }
}
