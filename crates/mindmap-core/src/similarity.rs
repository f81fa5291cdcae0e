//! Cosine similarity between embedding vectors.

/// Cosine similarity clamped to `[0, 1]`.
///
/// Returns `0.0` when either vector is empty, has zero magnitude, or the
/// lengths differ. Negative cosine (opposed vectors) is treated as "no
/// similarity" so callers can compare the result against thresholds directly.
pub fn similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 || !norm_a.is_finite() || !norm_b.is_finite() {
        return 0.0;
    }

    let cos = dot / (norm_a * norm_b);
    if cos.is_nan() {
        return 0.0;
    }
    cos.clamp(0.0, 1.0) as f32
}
