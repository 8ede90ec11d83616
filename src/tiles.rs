//! Direct-path tiling: correlations computed straight from packed codes.
//!
//! A macro tile is a block of rows and columns small enough to stay in L2.
//! Inside it rows advance two at a time against four columns; a trailing odd
//! row falls back to a 1x4 tile and trailing columns to single pairs.

use crate::correlation;
use crate::distance;
use crate::quantizer::{EncodedParams, HEADER_SIZE};

/// Rows per direct micro tile.
pub const MICRO_ROWS: usize = 2;
/// Columns per direct micro tile.
pub const MICRO_COLS: usize = 4;

/// Round `value` down to a multiple of `align`.
#[inline]
pub fn align_lo(value: usize, align: usize) -> usize {
    value / align * align
}

#[inline(always)]
fn payload(code: &[u8]) -> &[u8] {
    &code[HEADER_SIZE..]
}

#[inline(always)]
fn micro_rows_x4<const BITS: usize, const R: usize>(
    a: &[&[u8]],
    a_params: &[EncodedParams],
    b: &[&[u8]],
    b_params: &[EncodedParams],
    out: &mut [f32],
    stride: usize,
) {
    let rows: [&[u8]; R] = std::array::from_fn(|r| payload(a[r]));
    let cols: [&[u8]; 4] = std::array::from_fn(|c| payload(b[c]));
    let ab = correlation::correlation_rows_x4::<BITS, R>(rows, cols);
    for r in 0..R {
        let line = &mut out[r * stride..r * stride + MICRO_COLS];
        for c in 0..MICRO_COLS {
            line[c] = distance::cosine_distance(&a_params[r], &b_params[c], ab[r][c]);
        }
    }
}

#[inline(always)]
fn micro_1x1<const BITS: usize>(
    a: &[u8],
    a_params: &EncodedParams,
    b: &[u8],
    b_params: &EncodedParams,
) -> f32 {
    let ab = correlation::correlation::<BITS>(payload(a), payload(b));
    distance::cosine_distance(a_params, b_params, ab)
}

/// Distances for one macro tile of `a.len()` rows by `b.len()` columns.
///
/// `out[i * stride + j]` receives the distance between `a[i]` and `b[j]`.
pub fn macro_cosine_distances_direct<const BITS: usize>(
    a: &[&[u8]],
    b: &[&[u8]],
    out: &mut [f32],
    stride: usize,
) {
    let (m, n) = (a.len(), b.len());
    if m == 0 || n == 0 {
        return;
    }
    debug_assert!(out.len() >= (m - 1) * stride + n);
    let a_params: Vec<EncodedParams> = a.iter().map(|code| EncodedParams::read(code)).collect();
    let b_params: Vec<EncodedParams> = b.iter().map(|code| EncodedParams::read(code)).collect();
    let m2 = align_lo(m, MICRO_ROWS);
    let n4 = align_lo(n, MICRO_COLS);

    let mut i = 0;
    while i < m2 {
        let row = i * stride;
        let mut j = 0;
        while j < n4 {
            micro_rows_x4::<BITS, 2>(
                &a[i..],
                &a_params[i..],
                &b[j..],
                &b_params[j..],
                &mut out[row + j..],
                stride,
            );
            j += MICRO_COLS;
        }
        for r in i..i + MICRO_ROWS {
            for j in n4..n {
                out[r * stride + j] = micro_1x1::<BITS>(a[r], &a_params[r], b[j], &b_params[j]);
            }
        }
        i += MICRO_ROWS;
    }
    if m2 < m {
        let row = m2 * stride;
        let mut j = 0;
        while j < n4 {
            micro_rows_x4::<BITS, 1>(
                &a[m2..],
                &a_params[m2..],
                &b[j..],
                &b_params[j..],
                &mut out[row + j..],
                stride,
            );
            j += MICRO_COLS;
        }
        for j in n4..n {
            out[row + j] = micro_1x1::<BITS>(a[m2], &a_params[m2], b[j], &b_params[j]);
        }
    }
}
