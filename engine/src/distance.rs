//! Distance kernels used by the HNSW graph.
//!
//! All kernels accumulate in eight independent lanes so the compiler can
//! vectorize them without `unsafe` intrinsics or runtime feature detection.
//! Every metric is expressed as a distance: lower means closer.

use crate::config::DistanceMetric;

const LANES: usize = 8;

/// Distance between `a` and `b` under `metric`.
///
/// # Panics
/// Panics in debug builds if `a.len() != b.len()`; callers validate
/// dimensions before reaching the graph.
#[inline]
pub fn distance(metric: DistanceMetric, a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(
        a.len(),
        b.len(),
        "input slices must have the same length: got {} and {}",
        a.len(),
        b.len()
    );
    match metric {
        DistanceMetric::Cosine => 1.0 - cosine_similarity(a, b),
        DistanceMetric::SquaredEuclidean => squared_l2(a, b),
        DistanceMetric::InnerProduct => 1.0 - dot(a, b),
    }
}

/// Returns the dot product $\sum_i a_i b_i$.
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    let mut acc = [0.0f32; LANES];
    let chunks_a = a.chunks_exact(LANES);
    let chunks_b = b.chunks_exact(LANES);
    let tail: f32 = chunks_a
        .remainder()
        .iter()
        .zip(chunks_b.remainder())
        .map(|(x, y)| x * y)
        .sum();
    for (ca, cb) in chunks_a.zip(chunks_b) {
        for i in 0..LANES {
            acc[i] += ca[i] * cb[i];
        }
    }
    acc.iter().sum::<f32>() + tail
}

/// Returns $\sum_i (a_i - b_i)^2$.
#[inline]
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    let mut acc = [0.0f32; LANES];
    let chunks_a = a.chunks_exact(LANES);
    let chunks_b = b.chunks_exact(LANES);
    let tail: f32 = chunks_a
        .remainder()
        .iter()
        .zip(chunks_b.remainder())
        .map(|(x, y)| (x - y) * (x - y))
        .sum();
    for (ca, cb) in chunks_a.zip(chunks_b) {
        for i in 0..LANES {
            let d = ca[i] - cb[i];
            acc[i] += d * d;
        }
    }
    acc.iter().sum::<f32>() + tail
}

/// Cosine similarity $(a\cdot b)/(\|a\|\|b\|)$ clamped to `[-1, 1]`.
/// Degenerate (zero or non-finite) inputs yield 0.0.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() {
        return 0.0;
    }
    let mut dot_acc = [0.0f32; LANES];
    let mut na_acc = [0.0f32; LANES];
    let mut nb_acc = [0.0f32; LANES];
    let chunks_a = a.chunks_exact(LANES);
    let chunks_b = b.chunks_exact(LANES);
    let (mut dot_tail, mut na_tail, mut nb_tail) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in chunks_a.remainder().iter().zip(chunks_b.remainder()) {
        dot_tail += x * y;
        na_tail += x * x;
        nb_tail += y * y;
    }
    for (ca, cb) in chunks_a.zip(chunks_b) {
        for i in 0..LANES {
            dot_acc[i] += ca[i] * cb[i];
            na_acc[i] += ca[i] * ca[i];
            nb_acc[i] += cb[i] * cb[i];
        }
    }
    let dot = dot_acc.iter().sum::<f32>() + dot_tail;
    let norm_a_sq = na_acc.iter().sum::<f32>() + na_tail;
    let norm_b_sq = nb_acc.iter().sum::<f32>() + nb_tail;

    if !dot.is_finite() || norm_a_sq <= 0.0 || norm_b_sq <= 0.0 {
        return 0.0;
    }
    let denom = norm_a_sq.sqrt() * norm_b_sq.sqrt();
    if !denom.is_finite() || denom <= f32::EPSILON {
        return 0.0;
    }
    (dot / denom).clamp(-1.0, 1.0)
}
