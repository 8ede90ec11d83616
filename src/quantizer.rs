use half::f16;

use crate::simd::{self, GROUP};

/// Bytes of per-code metadata preceding the packed payload.
pub const HEADER_SIZE: usize = 16;

/// Largest code value at `depth` bits.
#[inline]
pub fn max_code(depth: usize) -> u32 {
    (1u32 << depth) - 1
}

/// Total encoded size of a descriptor with `size` components at `depth` bits.
#[inline]
pub fn encoded_size(size: usize, depth: usize) -> usize {
    HEADER_SIZE + simd::packed_len(size, depth)
}

/// Side sums accumulated while encoding, consumed by the distance assembler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodeSums {
    /// Sum of all codes.
    pub sum: u64,
    /// Sum of all squared codes.
    pub sqsum: u64,
}

impl CodeSums {
    #[inline(always)]
    fn accumulate(&mut self, group: &[u8; GROUP]) {
        let mut sum = 0u32;
        let mut sqsum = 0u32;
        for &code in group {
            let code = code as u32;
            sum += code;
            sqsum += code * code;
        }
        self.sum += sum as u64;
        self.sqsum += sqsum as u64;
    }
}

/// Metadata header stored in front of every encoded descriptor.
///
/// Layout: four little-endian `f32` values `[scale, shift, bias, norm]`.
/// `scale` is the decode step and `shift` the minimum of the source
/// descriptor, so `max = shift + scale * max_code(depth)`. `bias` holds
/// `scale * sum + size * shift / 2` and `norm` the Euclidean norm of the
/// decoded descriptor; together they let the assembler rebuild a float dot
/// product from the integer correlation of two payloads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodedParams {
    pub scale: f32,
    pub shift: f32,
    pub bias: f32,
    pub norm: f32,
}

impl EncodedParams {
    /// Derive the header from the range and the sums of the encoded payload.
    pub fn from_sums(min: f32, step: f32, size: usize, sums: CodeSums) -> Self {
        let s = step as f64;
        let m = min as f64;
        let n = size as f64;
        let sum = sums.sum as f64;
        let sqsum = sums.sqsum as f64;
        let norm_sqr = s * s * sqsum + 2.0 * s * m * sum + n * m * m;
        Self {
            scale: step,
            shift: min,
            bias: (s * sum + 0.5 * n * m) as f32,
            norm: norm_sqr.max(0.0).sqrt() as f32,
        }
    }

    /// Read the header of an encoded descriptor.
    #[inline]
    pub fn read(code: &[u8]) -> Self {
        let field = |i: usize| {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&code[i * 4..i * 4 + 4]);
            f32::from_le_bytes(bytes)
        };
        Self {
            scale: field(0),
            shift: field(1),
            bias: field(2),
            norm: field(3),
        }
    }

    /// Write the header into the first [`HEADER_SIZE`] bytes of `code`.
    #[inline]
    pub fn write(&self, code: &mut [u8]) {
        code[0..4].copy_from_slice(&self.scale.to_le_bytes());
        code[4..8].copy_from_slice(&self.shift.to_le_bytes());
        code[8..12].copy_from_slice(&self.bias.to_le_bytes());
        code[12..16].copy_from_slice(&self.norm.to_le_bytes());
    }

    pub fn min(&self) -> f32 {
        self.shift
    }

    pub fn max(&self, depth: usize) -> f32 {
        self.shift + self.scale * max_code(depth) as f32
    }
}

/// Range scan over a descriptor whose length is a multiple of 8.
pub fn min_max_32f(src: &[f32]) -> (f32, f32) {
    min_max_with(src, |x| x)
}

/// Range scan over a half-precision descriptor.
pub fn min_max_16f(src: &[f16]) -> (f32, f32) {
    min_max_with(src, f16::to_f32)
}

#[inline(always)]
fn min_max_with<T: Copy, F: Fn(T) -> f32>(src: &[T], convert: F) -> (f32, f32) {
    debug_assert!(!src.is_empty() && src.len() % GROUP == 0);
    let mut min = [f32::MAX; GROUP];
    let mut max = [-f32::MAX; GROUP];
    for chunk in src.chunks_exact(GROUP) {
        for k in 0..GROUP {
            let value = convert(chunk[k]);
            min[k] = value.min(min[k]);
            max[k] = value.max(max[k]);
        }
    }
    let min = min.iter().copied().fold(f32::MAX, f32::min);
    let max = max.iter().copied().fold(-f32::MAX, f32::max);
    (min, max)
}

/// Encode multiplier mapping `[min, max]` onto `[0, max_code(depth)]`.
///
/// Returns zero for an empty or non-finite range; every code is then 0.
#[inline]
pub fn encode_scale(min: f32, max: f32, depth: usize) -> f32 {
    let range = max - min;
    if range > 0.0 && range.is_finite() {
        max_code(depth) as f32 / range
    } else {
        0.0
    }
}

/// Decode step matching [`encode_scale`].
#[inline]
pub fn decode_step(min: f32, max: f32, depth: usize) -> f32 {
    if encode_scale(min, max, depth) == 0.0 {
        0.0
    } else {
        (max - min) / max_code(depth) as f32
    }
}

#[inline(always)]
fn quantize(value: f32, min: f32, scale: f32, max_code: f32) -> u8 {
    ((value - min) * scale).round_ties_even().clamp(0.0, max_code) as u8
}

#[inline(always)]
fn encode_payload_with<const BITS: usize, T: Copy, F: Fn(T) -> f32>(
    src: &[T],
    convert: F,
    scale: f32,
    min: f32,
    dst: &mut [u8],
) -> CodeSums {
    debug_assert_eq!(src.len() % GROUP, 0);
    debug_assert_eq!(dst.len(), simd::packed_len(src.len(), BITS));
    let top = max_code(BITS) as f32;
    let mut sums = CodeSums::default();
    let mut group = [0u8; GROUP];
    for (chunk, out) in src.chunks_exact(GROUP).zip(dst.chunks_exact_mut(BITS)) {
        for (code, &value) in group.iter_mut().zip(chunk) {
            *code = quantize(convert(value), min, scale, top);
        }
        sums.accumulate(&group);
        simd::store_group::<BITS>(&group, out);
    }
    sums
}

/// Quantize `src` into a packed `BITS`-wide payload.
pub fn encode_payload_32f<const BITS: usize>(
    src: &[f32],
    scale: f32,
    min: f32,
    dst: &mut [u8],
) -> CodeSums {
    encode_payload_with::<BITS, _, _>(src, |x| x, scale, min, dst)
}

/// Quantize a half-precision descriptor into a packed `BITS`-wide payload.
pub fn encode_payload_16f<const BITS: usize>(
    src: &[f16],
    scale: f32,
    min: f32,
    dst: &mut [u8],
) -> CodeSums {
    encode_payload_with::<BITS, _, _>(src, f16::to_f32, scale, min, dst)
}

/// Encode `src` against an explicit `[min, max]` range, header included.
pub fn encode_code_32f<const BITS: usize>(src: &[f32], min: f32, max: f32, code: &mut [u8]) {
    let scale = encode_scale(min, max, BITS);
    let (header, payload) = code.split_at_mut(HEADER_SIZE);
    let sums = encode_payload_32f::<BITS>(src, scale, min, payload);
    EncodedParams::from_sums(min, decode_step(min, max, BITS), src.len(), sums).write(header);
}

/// Half-precision counterpart of [`encode_code_32f`].
pub fn encode_code_16f<const BITS: usize>(src: &[f16], min: f32, max: f32, code: &mut [u8]) {
    let scale = encode_scale(min, max, BITS);
    let (header, payload) = code.split_at_mut(HEADER_SIZE);
    let sums = encode_payload_16f::<BITS>(src, scale, min, payload);
    EncodedParams::from_sums(min, decode_step(min, max, BITS), src.len(), sums).write(header);
}

/// Reconstruct `code * scale + shift` for every component of a payload.
pub fn decode_payload_32f<const BITS: usize>(src: &[u8], scale: f32, shift: f32, dst: &mut [f32]) {
    debug_assert_eq!(src.len(), simd::packed_len(dst.len(), BITS));
    for (packed, out) in src.chunks_exact(BITS).zip(dst.chunks_exact_mut(GROUP)) {
        for (value, code) in out.iter_mut().zip(simd::load_group::<BITS>(packed)) {
            *value = code as f32 * scale + shift;
        }
    }
}

/// Reconstruct a payload into half precision.
pub fn decode_payload_16f<const BITS: usize>(src: &[u8], scale: f32, shift: f32, dst: &mut [f16]) {
    debug_assert_eq!(src.len(), simd::packed_len(dst.len(), BITS));
    for (packed, out) in src.chunks_exact(BITS).zip(dst.chunks_exact_mut(GROUP)) {
        for (value, code) in out.iter_mut().zip(simd::load_group::<BITS>(packed)) {
            *value = f16::from_f32(code as f32 * scale + shift);
        }
    }
}

/// Decode a full encoded descriptor (header and payload).
pub fn decode_code_32f<const BITS: usize>(code: &[u8], dst: &mut [f32]) {
    let params = EncodedParams::read(code);
    decode_payload_32f::<BITS>(&code[HEADER_SIZE..], params.scale, params.shift, dst);
}

/// Decode a full encoded descriptor into half precision.
pub fn decode_code_16f<const BITS: usize>(code: &[u8], dst: &mut [f16]) {
    let params = EncodedParams::read(code);
    decode_payload_16f::<BITS>(&code[HEADER_SIZE..], params.scale, params.shift, dst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_max_scans_all_lanes() {
        let mut data = vec![0.5f32; 24];
        data[3] = -2.0;
        data[17] = 9.5;
        assert_eq!(min_max_32f(&data), (-2.0, 9.5));

        let half: Vec<f16> = data.iter().map(|&x| f16::from_f32(x)).collect();
        assert_eq!(min_max_16f(&half), (-2.0, 9.5));
    }

    #[test]
    fn header_round_trips_through_bytes() {
        let params = EncodedParams {
            scale: 0.25,
            shift: -1.5,
            bias: 3.0,
            norm: 7.75,
        };
        let mut code = [0u8; HEADER_SIZE];
        params.write(&mut code);
        assert_eq!(EncodedParams::read(&code), params);
        assert_eq!(params.max(4), -1.5 + 0.25 * 15.0);
    }

    #[test]
    fn encoding_rounds_half_to_even() {
        // 0.5 and 2.5 steps land exactly on ties.
        let src = [0.0f32, 0.5, 2.5, 1.5, 255.0, 3.0, 100.0, 254.5];
        let mut payload = [0u8; 8];
        let sums = encode_payload_32f::<8>(&src, 1.0, 0.0, &mut payload);
        assert_eq!(payload, [0, 0, 2, 2, 255, 3, 100, 254]);
        let sum: u64 = payload.iter().map(|&c| c as u64).sum();
        let sqsum: u64 = payload.iter().map(|&c| (c as u64) * (c as u64)).sum();
        assert_eq!(sums, CodeSums { sum, sqsum });
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let src = [-10.0f32, 0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 100.0];
        let mut payload = [0u8; 4];
        encode_payload_32f::<4>(&src, 1.0, 0.0, &mut payload);
        let mut codes = [0u8; 8];
        simd::unpack_codes(&payload, &mut codes, 4);
        assert_eq!(codes, [0, 0, 1, 2, 3, 4, 5, 15]);
    }

    #[test]
    fn constant_descriptor_decodes_to_itself() {
        let src = [3.25f32; 16];
        let (min, max) = min_max_32f(&src);
        let mut code = vec![0u8; encoded_size(16, 6)];
        encode_code_32f::<6>(&src, min, max, &mut code);
        let params = EncodedParams::read(&code);
        assert_eq!(params.scale, 0.0);
        assert!((params.norm - 3.25 * 4.0).abs() < 1e-4);

        let mut out = [0.0f32; 16];
        decode_code_32f::<6>(&code, &mut out);
        assert!(out.iter().all(|&x| x == 3.25));
    }

    #[test]
    fn header_norm_matches_decoded_norm() {
        let src: Vec<f32> = (0..32).map(|i| ((i * 37) % 11) as f32 * 0.3 - 1.0).collect();
        let (min, max) = min_max_32f(&src);
        let mut code = vec![0u8; encoded_size(32, 5)];
        encode_code_32f::<5>(&src, min, max, &mut code);
        let mut decoded = vec![0.0f32; 32];
        decode_code_32f::<5>(&code, &mut decoded);
        let norm = decoded.iter().map(|x| x * x).sum::<f32>().sqrt();
        let params = EncodedParams::read(&code);
        assert!((params.norm - norm).abs() < 1e-3 * norm.max(1.0));
    }

    #[test]
    fn half_precision_decode_tracks_float_decode() {
        let src: Vec<f32> = (0..16).map(|i| i as f32 * 0.125).collect();
        let half: Vec<f16> = src.iter().map(|&x| f16::from_f32(x)).collect();
        let (min, max) = min_max_16f(&half);
        let mut code = vec![0u8; encoded_size(16, 8)];
        encode_code_16f::<8>(&half, min, max, &mut code);

        let mut wide = vec![0.0f32; 16];
        decode_code_32f::<8>(&code, &mut wide);
        let mut narrow = vec![f16::ZERO; 16];
        decode_code_16f::<8>(&code, &mut narrow);
        for (w, n) in wide.iter().zip(&narrow) {
            assert!((w - n.to_f32()).abs() < 2e-3);
        }
    }
}
