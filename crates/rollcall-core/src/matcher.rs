//! Nearest-neighbour matching of a probe embedding against enrolled descriptors.

use crate::types::{Embedding, EnrolledDescriptor, Match};

/// Euclidean distance below which two 128-d face-api style embeddings are
/// treated as the same person. Model-specific: recalibrate for other models.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn find_best_match(&self, probe: &Embedding, gallery: &[EnrolledDescriptor]) -> Option<Match>;
}

/// Single-pass Euclidean nearest-neighbour matcher.
///
/// The closest descriptor wins only if its distance is strictly below
/// `threshold`. On equal distances the earlier gallery entry wins.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    threshold: f32,
}

impl EuclideanMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_THRESHOLD)
    }
}

impl Matcher for EuclideanMatcher {
    fn find_best_match(&self, probe: &Embedding, gallery: &[EnrolledDescriptor]) -> Option<Match> {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, descriptor) in gallery.iter().enumerate() {
            let dist = probe.euclidean_distance(&descriptor.embedding);
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_dist < self.threshold => {
                let descriptor = &gallery[idx];
                Some(Match {
                    identity_id: descriptor.identity_id.clone(),
                    display_name: descriptor.display_name.clone(),
                    distance: best_dist,
                    confidence: confidence_from_distance(best_dist),
                })
            }
            _ => None,
        }
    }
}

/// Match against `gallery` with the default threshold.
pub fn find_best_match(probe: &Embedding, gallery: &[EnrolledDescriptor]) -> Option<Match> {
    EuclideanMatcher::default().find_best_match(probe, gallery)
}

/// `max(0, (1 - distance) * 100)` rounded to one decimal place.
///
/// Monotonically decreasing in distance. 100.0 means a zero distance, not
/// certainty.
pub fn confidence_from_distance(distance: f32) -> f32 {
    let raw = ((1.0 - distance) * 100.0).max(0.0);
    (raw * 10.0).round() / 10.0
}
