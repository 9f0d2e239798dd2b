//! Euclidean nearest-neighbor descriptor matching with slot precedence.
//!
//! Angled templates (front/left/right/tilt) always compete. The single
//! `legacy` template of an enrollee is only consulted while the best
//! distance seen so far across the whole scan is above
//! [`LEGACY_SLOT_CUTOFF`]; once any template comes that close, legacy
//! templates stop competing for the rest of the scan.

use crate::gallery::Gallery;
use crate::types::{Embedding, MatchPath, MatchResult, SlotName};

/// A candidate is accepted when its distance is strictly below this.
pub const DISTANCE_ACCEPT_THRESHOLD: f32 = 0.4;

/// Legacy templates compete only while the best distance is above this.
pub const LEGACY_SLOT_CUTOFF: f32 = 0.5;

/// Distances at or above the ceiling never win, even as a near miss.
const DISTANCE_CEILING: f32 = 1.0;

/// Nearest-neighbor matcher over a gallery scan.
#[derive(Debug, Clone)]
pub struct DescriptorMatcher {
    threshold: f32,
}

impl Default for DescriptorMatcher {
    fn default() -> Self {
        Self {
            threshold: DISTANCE_ACCEPT_THRESHOLD,
        }
    }
}

impl DescriptorMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Match one probe descriptor against every stored vector.
    ///
    /// The winner is the strictly smallest distance; on a tie the earlier
    /// vector in gallery order keeps the win. Vectors whose dimension
    /// disagrees with the probe are skipped. An unaccepted result carries
    /// distance and similarity for feedback but no identity.
    pub fn identify(&self, probe: &Embedding, gallery: &Gallery) -> MatchResult {
        let mut best_distance = DISTANCE_CEILING;
        let mut best: Option<(String, SlotName)> = None;

        for (enrollee_id, slot, vector) in gallery.iter_vectors() {
            if slot == SlotName::Legacy && best_distance <= LEGACY_SLOT_CUTOFF {
                continue;
            }
            let Some(distance) = probe.distance(vector) else {
                continue;
            };
            if distance < best_distance {
                best_distance = distance;
                best = Some((enrollee_id.to_string(), slot));
            }
        }

        let accepted = best.is_some() && best_distance < self.threshold;
        tracing::debug!(
            accepted,
            distance = best_distance,
            candidates = gallery.vector_count(),
            "descriptor scan finished"
        );

        let (enrollee_id, slot) = match (accepted, best) {
            (true, Some((id, slot))) => (Some(id), Some(slot)),
            _ => (None, None),
        };
        MatchResult {
            accepted,
            enrollee_id,
            slot,
            distance: best_distance,
            similarity: 1.0 - best_distance,
            path: MatchPath::Descriptor,
        }
    }
}
