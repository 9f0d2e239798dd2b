//! Raw-pixel similarity for captures that arrive without a descriptor.
//!
//! This is not a biometric matcher. It blends three cheap heuristics
//! over sampled bytes of the two pixel buffers (color triplets, grayscale
//! intensity, a value histogram) into one weighted ratio, and exists only
//! so enrollees with nothing but a legacy reference image can still clock
//! in when descriptor extraction is unavailable.

use crate::gallery::Gallery;
use crate::types::{MatchPath, MatchResult, SlotName};

/// A fallback candidate is accepted when its similarity reaches this.
pub const FALLBACK_ACCEPT_THRESHOLD: f32 = 0.7;

const PAIR_STRIDE: usize = 15;
const COLOR_DISTANCE_CUTOFF: f32 = 80.0;
const INTENSITY_CUTOFF: f32 = 60.0;
const HISTOGRAM_STRIDE: usize = 20;
const HISTOGRAM_BINS: usize = 32;

const WEIGHT_TRIPLETS: f32 = 0.5;
const WEIGHT_INTENSITY: f32 = 0.3;
const WEIGHT_HISTOGRAM: f32 = 0.2;

struct StrategyScore {
    matches: u32,
    samples: u32,
}

/// Color distance between sampled RGB triplets.
fn triplet_score(a: &[u8], b: &[u8], min_len: usize) -> StrategyScore {
    let mut matches = 0;
    let mut samples = 0;
    for i in (0..min_len.saturating_sub(3)).step_by(PAIR_STRIDE) {
        samples += 1;
        let dr = a[i] as f32 - b[i] as f32;
        let dg = a[i + 1] as f32 - b[i + 1] as f32;
        let db = a[i + 2] as f32 - b[i + 2] as f32;
        if (dr * dr + dg * dg + db * db).sqrt() < COLOR_DISTANCE_CUTOFF {
            matches += 1;
        }
    }
    StrategyScore { matches, samples }
}

/// Grayscale intensity difference, tolerant of lighting changes.
fn intensity_score(a: &[u8], b: &[u8], min_len: usize) -> StrategyScore {
    let mut matches = 0;
    let mut samples = 0;
    for i in (0..min_len.saturating_sub(3)).step_by(PAIR_STRIDE) {
        samples += 1;
        let luma_a = a[i] as f32 * 0.299 + a[i + 1] as f32 * 0.587 + a[i + 2] as f32 * 0.114;
        let luma_b = b[i] as f32 * 0.299 + b[i + 1] as f32 * 0.587 + b[i + 2] as f32 * 0.114;
        if (luma_a - luma_b).abs() < INTENSITY_CUTOFF {
            matches += 1;
        }
    }
    StrategyScore { matches, samples }
}

/// Histogram intersection over coarsely sampled byte values.
fn histogram_score(a: &[u8], b: &[u8], min_len: usize) -> StrategyScore {
    let mut hist_a = [0u32; HISTOGRAM_BINS];
    let mut hist_b = [0u32; HISTOGRAM_BINS];
    for i in (0..min_len).step_by(HISTOGRAM_STRIDE) {
        hist_a[(a[i] as usize / (256 / HISTOGRAM_BINS)).min(HISTOGRAM_BINS - 1)] += 1;
        hist_b[(b[i] as usize / (256 / HISTOGRAM_BINS)).min(HISTOGRAM_BINS - 1)] += 1;
    }
    let mut matches = 0;
    let mut samples = 0;
    for i in 0..HISTOGRAM_BINS {
        matches += hist_a[i].min(hist_b[i]);
        samples += hist_a[i].max(hist_b[i]);
    }
    StrategyScore { matches, samples }
}

/// Similarity of two pixel buffers in [0, 1].
///
/// Buffers of different length are compared over the overlapping prefix.
/// Symmetric; 0.0 when there is nothing to sample.
pub fn compare(a: &[u8], b: &[u8]) -> f32 {
    let min_len = a.len().min(b.len());

    let triplets = triplet_score(a, b, min_len);
    let intensity = intensity_score(a, b, min_len);
    let histogram = histogram_score(a, b, min_len);

    let weighted_matches = triplets.matches as f32 * WEIGHT_TRIPLETS
        + intensity.matches as f32 * WEIGHT_INTENSITY
        + histogram.matches as f32 * WEIGHT_HISTOGRAM;
    let weighted_samples = triplets.samples as f32 * WEIGHT_TRIPLETS
        + intensity.samples as f32 * WEIGHT_INTENSITY
        + histogram.samples as f32 * WEIGHT_HISTOGRAM;

    if weighted_samples > 0.0 {
        weighted_matches / weighted_samples
    } else {
        0.0
    }
}

/// Match a capture's pixels against every legacy reference image.
///
/// Highest similarity wins, strictly, so the first enrollee in gallery
/// order keeps a tie. Enrollees without a legacy image never compete.
pub fn identify(capture: &[u8], gallery: &Gallery, threshold: f32) -> MatchResult {
    let mut best_similarity = 0.0f32;
    let mut best: Option<String> = None;

    for enrollee in gallery.enrollees() {
        let Some(image) = &enrollee.slots.legacy.reference_image else {
            continue;
        };
        let similarity = compare(capture, image);
        if similarity > best_similarity {
            best_similarity = similarity;
            best = Some(enrollee.id.clone());
        }
    }

    let accepted = best.is_some() && best_similarity >= threshold;
    tracing::debug!(
        accepted,
        similarity = best_similarity,
        "fallback image scan finished"
    );
    MatchResult {
        accepted,
        enrollee_id: if accepted { best } else { None },
        slot: if accepted { Some(SlotName::Legacy) } else { None },
        distance: 1.0 - best_similarity,
        similarity: best_similarity,
        path: MatchPath::FallbackImage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Enrollee;

    fn gallery_with_legacy_images(images: &[(&str, Vec<u8>)]) -> Gallery {
        let entries = images
            .iter()
            .map(|(id, image)| {
                let mut enrollee = Enrollee::new(*id, *id);
                enrollee.slots.legacy.reference_image = Some(image.clone());
                enrollee
            })
            .collect();
        Gallery::with_enrollees(128, entries)
    }

    #[test]
    fn test_identical_buffers_score_one() {
        let buf: Vec<u8> = (0..240).map(|i| (i % 251) as u8).collect();
        assert_eq!(compare(&buf, &buf), 1.0);
    }

    #[test]
    fn test_empty_buffers_score_zero() {
        assert_eq!(compare(&[], &[]), 0.0);
        assert_eq!(compare(&[1, 2, 3], &[]), 0.0);
    }

    #[test]
    fn test_opposite_extremes_score_zero() {
        let dark = vec![0u8; 300];
        let bright = vec![255u8; 300];
        assert_eq!(compare(&dark, &bright), 0.0);
    }

    #[test]
    fn test_compare_is_symmetric() {
        let a: Vec<u8> = (0..600).map(|i| (i * 37 % 256) as u8).collect();
        let b: Vec<u8> = (0..540).map(|i| (i * 91 % 256) as u8).collect();
        assert_eq!(compare(&a, &b), compare(&b, &a));
    }

    #[test]
    fn test_tiny_buffers_use_histogram_only() {
        // 3 bytes: the triplet strategies have no room to sample, the
        // histogram sees one value each. Same bucket means full score.
        assert_eq!(compare(&[10, 10, 10], &[12, 200, 200]), 1.0);
        assert_eq!(compare(&[10, 10, 10], &[255, 10, 10]), 0.0);
    }

    #[test]
    fn test_weighted_blend_hand_computed() {
        // One sample per strategy. Triplet misses (distance ~86.6),
        // intensity matches (delta ~50), histogram is disjoint (0 of 2).
        // Weighted: 0.3 / (0.5 + 0.3 + 2 * 0.2) = 0.25.
        let a = [0u8, 0, 0, 0];
        let b = [50u8, 50, 50, 50];
        let similarity = compare(&a, &b);
        assert!((similarity - 0.25).abs() < 1e-5);
    }

    #[test]
    fn test_identify_exact_image_accepted() {
        let image: Vec<u8> = (0..240).map(|i| (i % 200) as u8).collect();
        let gallery = gallery_with_legacy_images(&[("a", vec![255u8; 240]), ("b", image.clone())]);
        let result = identify(&image, &gallery, FALLBACK_ACCEPT_THRESHOLD);
        assert!(result.accepted);
        assert_eq!(result.enrollee_id.as_deref(), Some("b"));
        assert_eq!(result.slot, Some(SlotName::Legacy));
        assert_eq!(result.similarity, 1.0);
        assert_eq!(result.path, MatchPath::FallbackImage);
    }

    #[test]
    fn test_identify_below_threshold_reports_similarity() {
        let gallery = gallery_with_legacy_images(&[("a", vec![50u8; 4])]);
        let result = identify(&[0u8, 0, 0, 0], &gallery, FALLBACK_ACCEPT_THRESHOLD);
        assert!(!result.accepted);
        assert!(result.enrollee_id.is_none());
        assert!((result.similarity - 0.25).abs() < 1e-5);
    }

    #[test]
    fn test_identify_ignores_enrollees_without_legacy_image() {
        let mut enrollee = Enrollee::new("a", "Al");
        enrollee.slots.front.reference_image = Some(vec![7u8; 240]);
        let gallery = Gallery::with_enrollees(128, vec![enrollee]);
        let result = identify(&[7u8; 240], &gallery, FALLBACK_ACCEPT_THRESHOLD);
        assert!(!result.accepted);
        assert_eq!(result.similarity, 0.0);
    }

    #[test]
    fn test_identify_empty_capture_never_matches() {
        let gallery = gallery_with_legacy_images(&[("a", vec![9u8; 240])]);
        let result = identify(&[], &gallery, FALLBACK_ACCEPT_THRESHOLD);
        assert!(!result.accepted);
        assert_eq!(result.similarity, 0.0);
    }
}
