//! Similarity Engine
//!
//! Cosine similarity between two users' preference vectors. The dot product
//! runs over the movies both users rated; each norm covers the user's whole
//! rated set, so a small overlap between large profiles scores low.

use super::preferences::UserPreferenceVector;

/// Cosine similarity of two sparse preference vectors.
///
/// Total over all inputs: returns 0.0 when either vector is empty, when they
/// share no movie, or when a norm (or the dot product) is zero. Both vectors
/// are walked in movie order, so `sim(a, b)` and `sim(b, a)` are bit-identical.
pub fn cosine_similarity(a: &UserPreferenceVector, b: &UserPreferenceVector) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let dot = intersection_dot(a, b);
    let norm_a = a.squared_norm();
    let norm_b = b.squared_norm();

    if dot == 0.0 || norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Merge-join over the two sorted entry lists
fn intersection_dot(a: &UserPreferenceVector, b: &UserPreferenceVector) -> f64 {
    let mut left = a.iter().peekable();
    let mut right = b.iter().peekable();
    let mut dot = 0.0;

    while let (Some(&(ma, sa)), Some(&(mb, sb))) = (left.peek(), right.peek()) {
        match ma.cmp(&mb) {
            std::cmp::Ordering::Less => {
                left.next();
            }
            std::cmp::Ordering::Greater => {
                right.next();
            }
            std::cmp::Ordering::Equal => {
                dot += sa * sb;
                left.next();
                right.next();
            }
        }
    }

    dot
}
