//! Unpack path: codes widened to `u16` lanes before the multiply-accumulate.
//!
//! Rows of A are expanded row-major. Columns of B are expanded into panels of
//! [`PANEL`] columns laid out `[k][PANEL]`, so the micro kernel reads one
//! contiguous line of B per component. A panel shorter than [`PANEL`] repeats
//! its last column; the extra results are computed and dropped.

use crate::distance;
use crate::quantizer::{EncodedParams, HEADER_SIZE};
use crate::simd;

/// Columns per interleaved B panel.
pub const PANEL: usize = 8;
/// Largest number of A rows handled by one micro kernel call.
pub const MICRO_ROWS: usize = 6;

/// Headers of a batch of codes, gathered once per macro tile.
pub fn unpack_params(codes: &[&[u8]]) -> Vec<EncodedParams> {
    codes.iter().map(|code| EncodedParams::read(code)).collect()
}

/// Widen each code of `codes` into `dst[r * size..(r + 1) * size]`.
pub fn unpack_rows<const BITS: usize>(codes: &[&[u8]], size: usize, dst: &mut [u16]) {
    debug_assert!(dst.len() >= codes.len() * size);
    for (code, row) in codes.iter().zip(dst.chunks_exact_mut(size)) {
        simd::unpack_codes_u16_bits::<BITS>(&code[HEADER_SIZE..], row);
    }
}

/// Number of `u16` lanes needed for the panels of `count` columns.
#[inline]
pub fn panels_len(count: usize, size: usize) -> usize {
    count.div_ceil(PANEL) * PANEL * size
}

/// Widen `codes` into interleaved column panels.
///
/// `row` is scratch space of at least `size` lanes.
pub fn unpack_panels<const BITS: usize>(
    codes: &[&[u8]],
    size: usize,
    row: &mut [u16],
    dst: &mut [u16],
) {
    debug_assert!(dst.len() >= panels_len(codes.len(), size));
    let row = &mut row[..size];
    for (p, panel) in codes.chunks(PANEL).enumerate() {
        let lanes = &mut dst[p * PANEL * size..(p + 1) * PANEL * size];
        for c in 0..PANEL {
            let code = panel[c.min(panel.len() - 1)];
            simd::unpack_codes_u16_bits::<BITS>(&code[HEADER_SIZE..], row);
            for (k, &value) in row.iter().enumerate() {
                lanes[k * PANEL + c] = value;
            }
        }
    }
}

#[inline(always)]
fn correlation_rows_x8<const R: usize>(
    a: &[u16],
    size: usize,
    panel: &[u16],
) -> [[u64; PANEL]; R] {
    let mut acc = [[0u64; PANEL]; R];
    for k in 0..size {
        let line = &panel[k * PANEL..(k + 1) * PANEL];
        for r in 0..R {
            let value = a[r * size + k] as u64;
            for c in 0..PANEL {
                acc[r][c] += value * line[c] as u64;
            }
        }
    }
    acc
}

#[allow(clippy::too_many_arguments)]
#[inline(always)]
fn micro_rows_x8<const R: usize>(
    a: &[u16],
    a_params: &[EncodedParams],
    panel: &[u16],
    b_params: &[EncodedParams],
    size: usize,
    cols: usize,
    out: &mut [f32],
    stride: usize,
) {
    let ab = correlation_rows_x8::<R>(a, size, panel);
    for r in 0..R {
        for c in 0..cols {
            out[r * stride + c] = distance::cosine_distance(&a_params[r], &b_params[c], ab[r][c]);
        }
    }
}

/// Distances for one macro tile of pre-widened rows against pre-widened panels.
///
/// `a` holds `a_params.len()` rows of `size` lanes, `b` the panels of
/// `b_params.len()` columns. `out[i * stride + j]` receives the distance of
/// row `i` to column `j`.
#[allow(clippy::too_many_arguments)]
pub fn macro_cosine_distances_unpack(
    a: &[u16],
    a_params: &[EncodedParams],
    b: &[u16],
    b_params: &[EncodedParams],
    size: usize,
    out: &mut [f32],
    stride: usize,
) {
    let (m, n) = (a_params.len(), b_params.len());
    for j in (0..n).step_by(PANEL) {
        let cols = PANEL.min(n - j);
        let panel = &b[j * size..(j + PANEL) * size];
        let bp = &b_params[j..];
        let mut i = 0;
        while i < m {
            let rows = MICRO_ROWS.min(m - i);
            let ra = &a[i * size..];
            let pa = &a_params[i..];
            let dst = &mut out[i * stride + j..];
            match rows {
                6 => micro_rows_x8::<6>(ra, pa, panel, bp, size, cols, dst, stride),
                5 => micro_rows_x8::<5>(ra, pa, panel, bp, size, cols, dst, stride),
                4 => micro_rows_x8::<4>(ra, pa, panel, bp, size, cols, dst, stride),
                3 => micro_rows_x8::<3>(ra, pa, panel, bp, size, cols, dst, stride),
                2 => micro_rows_x8::<2>(ra, pa, panel, bp, size, cols, dst, stride),
                _ => micro_rows_x8::<1>(ra, pa, panel, bp, size, cols, dst, stride),
            }
            i += rows;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation;
    use crate::quantizer;

    fn encode(values: &[f32]) -> Vec<u8> {
        let (min, max) = quantizer::min_max_32f(values);
        let mut code = vec![0u8; quantizer::encoded_size(values.len(), 6)];
        quantizer::encode_code_32f::<6>(values, min, max, &mut code);
        code
    }

    fn dataset(count: usize, size: usize, seed: usize) -> Vec<Vec<u8>> {
        (0..count)
            .map(|s| {
                (0..size)
                    .map(|k| ((k * 5 + (s + seed) * 11) % 17) as f32 * 0.25 - 1.0)
                    .collect::<Vec<_>>()
            })
            .map(|v| encode(&v))
            .collect()
    }

    #[test]
    fn short_panel_repeats_last_column() {
        let size = 16;
        let codes = dataset(3, size, 0);
        let refs: Vec<&[u8]> = codes.iter().map(Vec::as_slice).collect();
        let mut row = vec![0u16; size];
        let mut lanes = vec![0u16; panels_len(refs.len(), size)];
        unpack_panels::<6>(&refs, size, &mut row, &mut lanes);

        let mut last = vec![0u8; size];
        simd::unpack_codes(&codes[2][HEADER_SIZE..], &mut last, 6);
        for k in 0..size {
            for c in 2..PANEL {
                assert_eq!(lanes[k * PANEL + c], last[k] as u16);
            }
        }
    }

    #[test]
    fn macro_tile_matches_packed_correlation() {
        let size = 24;
        let a_codes = dataset(7, size, 1);
        let b_codes = dataset(11, size, 40);
        let a: Vec<&[u8]> = a_codes.iter().map(Vec::as_slice).collect();
        let b: Vec<&[u8]> = b_codes.iter().map(Vec::as_slice).collect();

        let mut rows = vec![0u16; a.len() * size];
        unpack_rows::<6>(&a, size, &mut rows);
        let mut scratch = vec![0u16; size];
        let mut panels = vec![0u16; panels_len(b.len(), size)];
        unpack_panels::<6>(&b, size, &mut scratch, &mut panels);
        let pa = unpack_params(&a);
        let pb = unpack_params(&b);

        let mut out = vec![0.0f32; a.len() * b.len()];
        macro_cosine_distances_unpack(&rows, &pa, &panels, &pb, size, &mut out, b.len());

        for i in 0..a.len() {
            for j in 0..b.len() {
                let ab = correlation::correlation::<6>(&a[i][HEADER_SIZE..], &b[j][HEADER_SIZE..]);
                let expected = distance::cosine_distance(&pa[i], &pb[j], ab);
                assert_eq!(out[i * b.len() + j].to_bits(), expected.to_bits());
            }
        }
    }
}
