//! Render diagnostics: per-label timing statistics, producer
//! timestamps carried through nested-layer transforms, and the rolling
//! latency window behind the on-surface overlay.
//!
//! # Main Types
//!
//! - [`DiagnosticsRegistry`]: interval statistics per label, logged in
//!   fixed-size batches.
//! - [`RenderedTimestamp`]: a producer timestamp recorded mid-stream
//!   with the world transform it was found under; elapsed time is
//!   resolved at composite time, not at decode time.
//! - [`LatencyWindow`]: bounded per-section sample queue feeding the
//!   overlay string.

use hashbrown::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tiny_skia::Transform;

/// Interval statistics keyed by label. Each `mark` measures the time
/// since the previous mark for the same label; every full window is
/// summarized to the log.
pub struct DiagnosticsRegistry {
    window: usize,
    series: Mutex<HashMap<String, LabelSeries>>,
}

struct LabelSeries {
    last_mark: Instant,
    samples: VecDeque<f64>,
    total: u64,
}

impl DiagnosticsRegistry {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            series: Mutex::new(HashMap::new()),
        }
    }

    /// Records the interval since the previous mark for `label`. The
    /// first mark for a label only starts its clock.
    pub fn mark(&self, label: &str) {
        let now = Instant::now();
        let Ok(mut series) = self.series.lock() else {
            return;
        };
        match series.get_mut(label) {
            None => {
                series.insert(
                    label.to_string(),
                    LabelSeries {
                        last_mark: now,
                        samples: VecDeque::with_capacity(self.window),
                        total: 0,
                    },
                );
            }
            Some(entry) => {
                let interval = now.duration_since(entry.last_mark).as_secs_f64();
                entry.last_mark = now;
                if entry.samples.len() == self.window {
                    entry.samples.pop_front();
                }
                entry.samples.push_back(interval);
                entry.total += 1;
                if entry.total % self.window as u64 == 0 {
                    log_series(label, &entry.samples);
                }
            }
        }
    }

    /// Number of completed interval samples for a label.
    pub fn sample_count(&self, label: &str) -> usize {
        self.series
            .lock()
            .map(|s| s.get(label).map_or(0, |e| e.samples.len()))
            .unwrap_or(0)
    }
}

fn log_series(label: &str, samples: &VecDeque<f64>) {
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let var = samples.iter().map(|s| (s - mean) * (s - mean)).sum::<f64>() / n;
    let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
    let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    log::info!(
        "{label}: mean {:.1}ms dev {:.1}ms min {:.1}ms max {:.1}ms ({} samples)",
        mean * 1e3,
        var.sqrt() * 1e3,
        min * 1e3,
        max * 1e3,
        samples.len()
    );
}

/// A `timestamp` operation captured during rasterization. The
/// transform is the accumulated world transform of every enclosing
/// nested layer, so the overlay lands in top-level surface coordinates
/// no matter how many cached layers the op passed through.
#[derive(Clone, Debug)]
pub struct RenderedTimestamp {
    pub section_id: u32,
    pub transform: Transform,
    /// Producer wall-clock time, nanoseconds since the Unix epoch.
    pub timestamp_ns: u64,
    pub text: String,
}

impl RenderedTimestamp {
    /// Elapsed seconds between the producer timestamp and `now_ns`,
    /// resolved lazily at composite time.
    pub fn elapsed_seconds(&self, now_ns: u64) -> f64 {
        now_ns.saturating_sub(self.timestamp_ns) as f64 / 1e9
    }
}

/// Current wall-clock time as nanoseconds since the Unix epoch.
pub fn now_epoch_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Parses a producer timestamp of the form `YYYYMMDDTHHMMSS.ffffff`
/// (UTC) into nanoseconds since the Unix epoch.
pub fn parse_utc_timestamp(text: &str) -> Option<u64> {
    let bytes = text.as_bytes();
    if bytes.len() < 15 || bytes[8] != b'T' {
        return None;
    }
    let digits = |range: std::ops::Range<usize>| -> Option<i64> {
        text.get(range)?.parse::<i64>().ok()
    };
    let year = digits(0..4)?;
    let month = digits(4..6)?;
    let day = digits(6..8)?;
    let hour = digits(9..11)?;
    let minute = digits(11..13)?;
    let second = digits(13..15)?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }

    // days since 1970-01-01 for a civil date (Gregorian arithmetic)
    let y = year - i64::from(month <= 2);
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let doy = (153 * (month + if month > 2 { -3 } else { 9 }) + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    let days = era * 146_097 + doe - 719_468;
    if days < 0 {
        return None;
    }

    let mut ns = ((days * 86_400 + hour * 3_600 + minute * 60 + second) as u64)
        .checked_mul(1_000_000_000)?;
    if bytes.get(15) == Some(&b'.') {
        let frac = text.get(16..)?;
        if frac.is_empty() {
            return None;
        }
        let digits = frac.get(..frac.len().min(9))?;
        let value: u64 = digits.parse().ok()?;
        ns += value * 10u64.pow(9 - digits.len() as u32);
    }
    Some(ns)
}

/// Summary of a latency window, in seconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LatencyStats {
    pub current: f64,
    pub mean: f64,
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
}

/// Bounded queue of per-frame latency samples. The oldest tenth of the
/// queue is dropped before averaging so startup spikes age out of the
/// overlay quickly.
pub struct LatencyWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, seconds: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(seconds);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn stats(&self) -> Option<LatencyStats> {
        let current = *self.samples.back()?;
        let trimmed: Vec<f64> = self
            .samples
            .iter()
            .copied()
            .skip(self.samples.len() / 10)
            .collect();
        let n = trimmed.len() as f64;
        let mean = trimmed.iter().sum::<f64>() / n;
        let var = trimmed.iter().map(|s| (s - mean) * (s - mean)).sum::<f64>() / n;
        Some(LatencyStats {
            current,
            mean,
            stddev: var.sqrt(),
            min: trimmed.iter().copied().fold(f64::INFINITY, f64::min),
            max: trimmed.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

/// Overlay label text: current/average/stddev/min/max, milliseconds,
/// right-justified numeric fields.
pub fn overlay_text(stats: &LatencyStats) -> String {
    format!(
        "latency {:>6.1}ms  avg {:>6.1}  sd {:>5.1}  min {:>6.1}  max {:>6.1}",
        stats.current * 1e3,
        stats.mean * 1e3,
        stats.stddev * 1e3,
        stats.min * 1e3,
        stats.max * 1e3
    )
}
