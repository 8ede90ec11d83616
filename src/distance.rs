//! Cosine distance reconstructed from an integer correlation and two headers.

use crate::quantizer::EncodedParams;

/// Distance reported when either descriptor has zero (or non-finite) norm.
pub const ZERO_NORM_DISTANCE: f32 = 1.0;

/// Assemble the cosine distance of two encoded descriptors.
///
/// With `x = code * scale + shift` the float dot product expands to
/// `sa*sb*C + sa*mb*ΣA + sb*ma*ΣB + n*ma*mb`, which the header folds into
/// `sa*sb*C + biasA*shiftB + biasB*shiftA`. The result is clamped to `[0, 2]`.
#[inline(always)]
pub fn cosine_distance(a: &EncodedParams, b: &EncodedParams, correlation: u64) -> f32 {
    let norms = a.norm * b.norm;
    if norms == 0.0 || !norms.is_finite() {
        return ZERO_NORM_DISTANCE;
    }
    // Cross terms are summed first so swapping `a` and `b` yields identical bits.
    let cross = a.bias * b.shift + b.bias * a.shift;
    let dot = a.scale * b.scale * correlation as f32 + cross;
    (1.0 - dot / norms).clamp(0.0, 2.0)
}
