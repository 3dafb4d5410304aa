//! Nearest-candidate matching of a query encoding against enrolled encodings.

use crate::types::{Encoding, MatchResult};

/// Default match threshold; lower is stricter.
pub const DEFAULT_THRESHOLD: f64 = 0.6;

/// Distance between two encodings of the same kind. 0 = identical.
pub trait Distance {
    fn distance(&self, known: &Encoding, query: &Encoding) -> f64;
}

/// Cosine similarity mapped onto [0, 1]: identical 0, orthogonal 0.5,
/// opposite 1. A zero-norm vector is maximally distant from everything.
pub struct CosineDistance;

impl Distance for CosineDistance {
    fn distance(&self, known: &Encoding, query: &Encoding) -> f64 {
        match known.cosine_similarity(query) {
            Some(similarity) => 1.0 - (similarity + 1.0) / 2.0,
            None => MatchResult::MAX_DISTANCE,
        }
    }
}

/// Plain Euclidean distance, the native convention of 128-d face encoders.
pub struct EuclideanDistance;

impl Distance for EuclideanDistance {
    fn distance(&self, known: &Encoding, query: &Encoding) -> f64 {
        known.euclidean_distance(query)
    }
}

/// Pick the closest comparable candidate.
///
/// Candidates whose encoder kind or length differs from the query's are
/// skipped, since their distances are meaningless. Ties go to the lowest index, and a match
/// requires `distance < threshold`.
pub fn best_match(
    known: &[Encoding],
    query: &Encoding,
    threshold: f64,
    metric: &dyn Distance,
) -> MatchResult {
    let mut best: Option<(usize, f64)> = None;
    let mut skipped = 0usize;

    for (i, candidate) in known.iter().enumerate() {
        if !candidate.is_comparable(query) {
            skipped += 1;
            continue;
        }
        let distance = metric.distance(candidate, query);
        // Strict comparison keeps the first of equal distances.
        if best.map_or(true, |(_, d)| distance < d) {
            best = Some((i, distance));
        }
    }

    if skipped > 0 {
        tracing::warn!(
            skipped,
            query_kind = ?query.kind,
            query_len = query.len(),
            "ignored enrolled encodings from a different encoder or of the wrong length"
        );
    }

    match best {
        Some((index, distance)) => MatchResult {
            best_index: Some(index),
            distance,
            is_match: distance < threshold,
        },
        None => MatchResult::no_candidates(),
    }
}
