//! Integer dot products computed directly on packed payloads.
//!
//! Every kernel returns the exact sum of code products. The per-group partial
//! fits in `u32` (8 * 255 * 255) and is widened before accumulation, so no
//! descriptor length can overflow the result.

use crate::simd::{self, GROUP};

#[inline(always)]
fn dot_group(a: &[u16; GROUP], b: &[u16; GROUP]) -> u32 {
    let mut acc = 0u32;
    for k in 0..GROUP {
        acc += a[k] as u32 * b[k] as u32;
    }
    acc
}

/// Correlation of two `BITS`-wide payloads of equal length.
#[inline]
pub fn correlation<const BITS: usize>(a: &[u8], b: &[u8]) -> u64 {
    debug_assert_eq!(a.len(), b.len());
    debug_assert_eq!(a.len() % BITS, 0);
    if BITS == 8 {
        return a
            .chunks_exact(GROUP)
            .zip(b.chunks_exact(GROUP))
            .map(|(x, y)| {
                x.iter()
                    .zip(y)
                    .map(|(&p, &q)| p as u32 * q as u32)
                    .sum::<u32>() as u64
            })
            .sum();
    }
    let mut acc = 0u64;
    for (x, y) in a.chunks_exact(BITS).zip(b.chunks_exact(BITS)) {
        let x = simd::load_group::<BITS>(x);
        let y = simd::load_group::<BITS>(y);
        acc += dot_group(&x, &y) as u64;
    }
    acc
}

/// Register tile of `R` rows against four columns.
///
/// Each column group is extracted once and reused across the rows, each row
/// group once and reused across the columns.
#[inline(always)]
pub fn correlation_rows_x4<const BITS: usize, const R: usize>(
    a: [&[u8]; R],
    b: [&[u8]; 4],
) -> [[u64; 4]; R] {
    let len = b[0].len();
    debug_assert!(a.iter().chain(b.iter()).all(|row| row.len() == len));
    let mut acc = [[0u64; 4]; R];
    let mut offset = 0;
    while offset < len {
        let end = offset + BITS;
        let cols: [[u16; GROUP]; 4] =
            std::array::from_fn(|c| simd::load_group::<BITS>(&b[c][offset..end]));
        for r in 0..R {
            let row = simd::load_group::<BITS>(&a[r][offset..end]);
            for c in 0..4 {
                acc[r][c] += dot_group(&row, &cols[c]) as u64;
            }
        }
        offset = end;
    }
    acc
}

/// Depth-dispatched correlation of two payloads.
pub fn correlation_payload(a: &[u8], b: &[u8], depth: usize) -> u64 {
    match depth {
        4 => correlation::<4>(a, b),
        5 => correlation::<5>(a, b),
        6 => correlation::<6>(a, b),
        7 => correlation::<7>(a, b),
        8 => correlation::<8>(a, b),
        _ => panic!("unsupported code depth {depth}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(a: &[u8], b: &[u8]) -> u64 {
        a.iter().zip(b).map(|(&x, &y)| x as u64 * y as u64).sum()
    }

    fn codes(len: usize, depth: usize, seed: usize) -> Vec<u8> {
        let top = (1usize << depth) - 1;
        (0..len).map(|i| ((i * 31 + seed * 17 + 5) % (top + 1)) as u8).collect()
    }

    fn packed(codes: &[u8], depth: usize) -> Vec<u8> {
        let mut out = vec![0u8; simd::packed_len(codes.len(), depth)];
        simd::pack_codes(codes, &mut out, depth);
        out
    }

    #[test]
    fn correlation_matches_unpacked_dot_at_every_depth() {
        for depth in 4..=8 {
            let a = codes(64, depth, 1);
            let b = codes(64, depth, 2);
            let got = correlation_payload(&packed(&a, depth), &packed(&b, depth), depth);
            assert_eq!(got, reference(&a, &b), "depth {depth}");
        }
    }

    #[test]
    fn saturated_codes_do_not_overflow() {
        let a = vec![255u8; 4096];
        let got = correlation::<8>(&a, &a);
        assert_eq!(got, 4096 * 255 * 255);
    }

    #[test]
    fn register_tiles_match_scalar_kernel() {
        let depth = 5;
        let rows: Vec<Vec<u8>> = (0..2).map(|s| packed(&codes(40, depth, s), depth)).collect();
        let cols: Vec<Vec<u8>> = (2..6).map(|s| packed(&codes(40, depth, s), depth)).collect();
        let b = [&cols[0][..], &cols[1][..], &cols[2][..], &cols[3][..]];

        let tile = correlation_rows_x4::<5, 2>([&rows[0][..], &rows[1][..]], b);
        let single = correlation_rows_x4::<5, 1>([&rows[1][..]], b);
        for r in 0..2 {
            for c in 0..4 {
                assert_eq!(tile[r][c], correlation::<5>(&rows[r], &cols[c]));
            }
        }
        assert_eq!(single[0], tile[1]);
    }
}
