//! Float reference distances used to measure quantization error.

const LANES: usize = 8;

/// Dot product accumulated in eight independent lanes.
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len());
    let mut acc = [0.0f32; LANES];
    let chunks = a.chunks_exact(LANES).zip(b.chunks_exact(LANES));
    for (x, y) in chunks {
        for k in 0..LANES {
            acc[k] += x[k] * y[k];
        }
    }
    let tail = a.len() / LANES * LANES;
    let rest: f32 = a[tail..].iter().zip(&b[tail..]).map(|(x, y)| x * y).sum();
    acc.iter().sum::<f32>() + rest
}

#[inline]
pub fn l2_norm_sqr(v: &[f32]) -> f32 {
    dot(v, v)
}

/// Exact cosine distance with the same zero-norm convention as encoded codes.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let norms = (l2_norm_sqr(a) * l2_norm_sqr(b)).sqrt();
    if norms == 0.0 || !norms.is_finite() {
        return crate::distance::ZERO_NORM_DISTANCE;
    }
    (1.0 - dot(a, b) / norms).clamp(0.0, 2.0)
}

/// Row-major `M x N` matrix of exact cosine distances.
pub fn cosine_distances_mxn(a: &[&[f32]], b: &[&[f32]], out: &mut [f32]) {
    assert_eq!(out.len(), a.len() * b.len());
    for (row, dst) in a.iter().zip(out.chunks_exact_mut(b.len().max(1))) {
        for (col, value) in b.iter().zip(dst.iter_mut()) {
            *value = cosine_distance(row, col);
        }
    }
}

/// Largest absolute component-wise difference.
pub fn max_abs_diff(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).fold(0.0, f32::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_handles_tails() {
        let a: Vec<f32> = (0..11).map(|i| i as f32).collect();
        let b = vec![2.0f32; 11];
        assert_eq!(dot(&a, &b), 110.0);
    }

    #[test]
    fn cosine_distance_edges() {
        let x = [1.0f32, 0.0, 0.0, 0.0];
        let y = [0.0f32, 1.0, 0.0, 0.0];
        let z = [-1.0f32, 0.0, 0.0, 0.0];
        assert!((cosine_distance(&x, &y) - 1.0).abs() < 1e-6);
        assert!((cosine_distance(&x, &z) - 2.0).abs() < 1e-6);
        assert_eq!(cosine_distance(&x, &x), 0.0);
        assert_eq!(cosine_distance(&x, &[0.0; 4]), 1.0);
    }
}
