//! Face-presence heuristic over fixed frame regions, with debounce.
//!
//! A frame "has presence" when any of five overlapping regions shows a
//! skin-toned mean color, moderate texture variance, and plausible
//! channel proportions. The bands are field-tuned carryovers, not
//! calibrated thresholds; they gate identification, nothing else.

use crate::frame::{region_stats, Region, RegionStats, RgbFrame};

/// Sampling regions as fractions of the frame: a primary center box and
/// four boxes shifted up, down, left, and right.
const DETECTION_REGIONS: [Region; 5] = [
    Region { x: 0.35, y: 0.25, width: 0.30, height: 0.50 },
    Region { x: 0.35, y: 0.15, width: 0.30, height: 0.30 },
    Region { x: 0.35, y: 0.40, width: 0.30, height: 0.35 },
    Region { x: 0.25, y: 0.25, width: 0.30, height: 0.50 },
    Region { x: 0.45, y: 0.25, width: 0.30, height: 0.50 },
];

const MIN_MEAN_RED: f32 = 50.0;
const MAX_MEAN_RED: f32 = 250.0;
const MIN_MEAN_GREEN: f32 = 30.0;
const MIN_MEAN_BLUE: f32 = 15.0;
const MIN_VARIANCE: f32 = 80.0;
const MAX_VARIANCE: f32 = 6000.0;
const MIN_RG_RATIO: f32 = 0.9;
const MAX_RG_RATIO: f32 = 2.2;
const MIN_RB_RATIO: f32 = 1.1;
const MAX_RB_RATIO: f32 = 5.0;

/// Consecutive agreeing frames required before the reported state flips.
pub const PRESENCE_DEBOUNCE_FRAMES: u32 = 2;

fn region_passes(stats: &RegionStats) -> bool {
    let r = stats.mean_r;
    let g = stats.mean_g;
    let b = stats.mean_b;

    let skin_tone = r > g
        && r > b
        && r > MIN_MEAN_RED
        && g > MIN_MEAN_GREEN
        && b > MIN_MEAN_BLUE
        && r < MAX_MEAN_RED;
    let textured = stats.variance > MIN_VARIANCE && stats.variance < MAX_VARIANCE;
    // Division by a zero mean yields inf, which fails the upper bounds.
    let rg_ratio = r / g;
    let rb_ratio = r / b;
    let proportioned = rg_ratio > MIN_RG_RATIO
        && rg_ratio < MAX_RG_RATIO
        && rb_ratio > MIN_RB_RATIO
        && rb_ratio < MAX_RB_RATIO;

    skin_tone && textured && proportioned
}

/// Single-frame judgment: does any region look like a face?
///
/// Stops at the first passing region.
pub fn frame_has_presence(frame: &RgbFrame) -> bool {
    DETECTION_REGIONS
        .iter()
        .any(|region| region_stats(frame, region).is_some_and(|stats| region_passes(&stats)))
}

/// Debounced presence state.
///
/// Each frame outcome resets the opposing counter; the reported state
/// flips after [`PRESENCE_DEBOUNCE_FRAMES`] consecutive agreeing frames
/// and the flip is reported exactly once.
#[derive(Debug, Default)]
pub struct PresenceHysteresis {
    present: bool,
    hits: u32,
    misses: u32,
}

impl PresenceHysteresis {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn present(&self) -> bool {
        self.present
    }

    /// Feed one frame outcome; `Some(state)` exactly when the reported
    /// state flips.
    pub fn observe(&mut self, detected: bool) -> Option<bool> {
        if detected {
            self.hits += 1;
            self.misses = 0;
        } else {
            self.misses += 1;
            self.hits = 0;
        }

        if self.hits >= PRESENCE_DEBOUNCE_FRAMES && !self.present {
            self.present = true;
            Some(true)
        } else if self.misses >= PRESENCE_DEBOUNCE_FRAMES && self.present {
            self.present = false;
            Some(false)
        } else {
            None
        }
    }
}

/// Frame-level detector: region heuristic plus debounce.
#[derive(Debug, Default)]
pub struct PresenceDetector {
    hysteresis: PresenceHysteresis,
}

impl PresenceDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn present(&self) -> bool {
        self.hysteresis.present()
    }

    /// Feed one frame; `Some(state)` exactly when the debounced state flips.
    pub fn observe(&mut self, frame: &RgbFrame) -> Option<bool> {
        let detected = frame_has_presence(frame);
        let flip = self.hysteresis.observe(detected);
        if let Some(state) = flip {
            tracing::debug!(present = state, "presence changed");
        }
        flip
    }
}
