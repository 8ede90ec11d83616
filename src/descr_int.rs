//! The `DescrInt` engine: one descriptor shape, one code depth.
//!
//! Kernels are monomorphised per depth and selected once at construction, so
//! every call dispatches through a small table of function pointers instead of
//! matching on the depth.

use half::f16;
use rayon::prelude::*;

use crate::config::{DescrIntConfig, DistanceStrategy};
use crate::memory::UnpackScratch;
use crate::quantizer::{self, EncodedParams, HEADER_SIZE};
use crate::tiles::{self, align_lo};
use crate::unpack;
use crate::{distance, DescrIntError};

type EncodeFn<T> = fn(&[T], f32, f32, &mut [u8]);
type DecodeFn<T> = fn(&[u8], &mut [T]);
type CorrelationFn = fn(&[u8], &[u8]) -> u64;
type MacroDirectFn = fn(&[&[u8]], &[&[u8]], &mut [f32], usize);
type UnpackRowsFn = fn(&[&[u8]], usize, &mut [u16]);
type UnpackPanelsFn = fn(&[&[u8]], usize, &mut [u16], &mut [u16]);

#[derive(Clone, Copy)]
struct DepthKernels {
    encode_32f: EncodeFn<f32>,
    encode_16f: EncodeFn<f16>,
    decode_32f: DecodeFn<f32>,
    decode_16f: DecodeFn<f16>,
    correlation: CorrelationFn,
    macro_direct: MacroDirectFn,
    unpack_rows: UnpackRowsFn,
    unpack_panels: UnpackPanelsFn,
}

impl DepthKernels {
    fn of<const BITS: usize>() -> Self {
        Self {
            encode_32f: quantizer::encode_code_32f::<BITS>,
            encode_16f: quantizer::encode_code_16f::<BITS>,
            decode_32f: quantizer::decode_code_32f::<BITS>,
            decode_16f: quantizer::decode_code_16f::<BITS>,
            correlation: crate::correlation::correlation::<BITS>,
            macro_direct: tiles::macro_cosine_distances_direct::<BITS>,
            unpack_rows: unpack::unpack_rows::<BITS>,
            unpack_panels: unpack::unpack_panels::<BITS>,
        }
    }

    fn for_depth(depth: usize) -> Option<Self> {
        match depth {
            4 => Some(Self::of::<4>()),
            5 => Some(Self::of::<5>()),
            6 => Some(Self::of::<6>()),
            7 => Some(Self::of::<7>()),
            8 => Some(Self::of::<8>()),
            _ => None,
        }
    }
}

/// Quantizes descriptors of a fixed size to a fixed depth and computes cosine
/// distances between the resulting codes.
#[derive(Clone)]
pub struct DescrInt {
    config: DescrIntConfig,
    encoded_size: usize,
    kernels: DepthKernels,
}

impl std::fmt::Debug for DescrInt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescrInt")
            .field("config", &self.config)
            .field("encoded_size", &self.encoded_size)
            .finish()
    }
}

impl DescrInt {
    /// Whether descriptors of `size` components can be encoded at `depth` bits.
    pub fn valid(size: usize, depth: usize) -> bool {
        DescrIntConfig::is_valid(size, depth)
    }

    /// Engine with default strategy and cache sizes.
    pub fn new(size: usize, depth: usize) -> Result<Self, DescrIntError> {
        Self::with_config(DescrIntConfig::new(size, depth))
    }

    pub fn with_config(config: DescrIntConfig) -> Result<Self, DescrIntError> {
        config.validate()?;
        let kernels = DepthKernels::for_depth(config.depth).ok_or(DescrIntError::InvalidConfig {
            size: config.size,
            depth: config.depth,
        })?;
        let encoded_size = quantizer::encoded_size(config.size, config.depth);
        tracing::debug!(
            size = config.size,
            depth = config.depth,
            encoded_size,
            strategy = config.strategy.name(),
            "created descriptor engine"
        );
        Ok(Self {
            config,
            encoded_size,
            kernels,
        })
    }

    pub fn size(&self) -> usize {
        self.config.size
    }

    pub fn depth(&self) -> usize {
        self.config.depth
    }

    /// Bytes per encoded descriptor, header included.
    pub fn encoded_size(&self) -> usize {
        self.encoded_size
    }

    pub fn config(&self) -> &DescrIntConfig {
        &self.config
    }

    #[inline]
    fn check_code(&self, code: &[u8]) {
        assert_eq!(
            code.len(),
            self.encoded_size,
            "encoded descriptor must be {} bytes",
            self.encoded_size
        );
    }

    #[inline]
    fn check_descriptor(&self, len: usize) {
        assert_eq!(len, self.config.size, "descriptor must have {} components", self.config.size);
    }

    pub fn encode_32f(&self, src: &[f32]) -> Vec<u8> {
        let mut code = vec![0u8; self.encoded_size];
        self.encode_32f_into(src, &mut code);
        code
    }

    pub fn encode_32f_into(&self, src: &[f32], dst: &mut [u8]) {
        self.check_descriptor(src.len());
        let (min, max) = quantizer::min_max_32f(src);
        self.encode_32f_with_range_into(src, min, max, dst);
    }

    /// Encode against a caller-supplied range; components outside it clamp.
    pub fn encode_32f_with_range_into(&self, src: &[f32], min: f32, max: f32, dst: &mut [u8]) {
        self.check_descriptor(src.len());
        self.check_code(dst);
        (self.kernels.encode_32f)(src, min, max, dst);
    }

    pub fn encode_16f(&self, src: &[f16]) -> Vec<u8> {
        let mut code = vec![0u8; self.encoded_size];
        self.encode_16f_into(src, &mut code);
        code
    }

    pub fn encode_16f_into(&self, src: &[f16], dst: &mut [u8]) {
        self.check_descriptor(src.len());
        self.check_code(dst);
        let (min, max) = quantizer::min_max_16f(src);
        (self.kernels.encode_16f)(src, min, max, dst);
    }

    pub fn decode_32f(&self, code: &[u8]) -> Vec<f32> {
        let mut out = vec![0.0f32; self.config.size];
        self.decode_32f_into(code, &mut out);
        out
    }

    pub fn decode_32f_into(&self, code: &[u8], dst: &mut [f32]) {
        self.check_code(code);
        self.check_descriptor(dst.len());
        (self.kernels.decode_32f)(code, dst);
    }

    pub fn decode_16f(&self, code: &[u8]) -> Vec<f16> {
        let mut out = vec![f16::ZERO; self.config.size];
        self.decode_16f_into(code, &mut out);
        out
    }

    pub fn decode_16f_into(&self, code: &[u8], dst: &mut [f16]) {
        self.check_code(code);
        self.check_descriptor(dst.len());
        (self.kernels.decode_16f)(code, dst);
    }

    /// Header of an encoded descriptor.
    pub fn params(&self, code: &[u8]) -> EncodedParams {
        self.check_code(code);
        EncodedParams::read(code)
    }

    /// Exact integer dot product of the codes of two encoded descriptors.
    pub fn correlation(&self, a: &[u8], b: &[u8]) -> u64 {
        self.check_code(a);
        self.check_code(b);
        (self.kernels.correlation)(&a[HEADER_SIZE..], &b[HEADER_SIZE..])
    }

    pub fn cosine_distance(&self, a: &[u8], b: &[u8]) -> f32 {
        let ab = self.correlation(a, b);
        distance::cosine_distance(&EncodedParams::read(a), &EncodedParams::read(b), ab)
    }

    /// Strategy used for an `m` x `n` matrix.
    pub fn select_strategy(&self, m: usize, n: usize) -> DistanceStrategy {
        match self.config.strategy {
            DistanceStrategy::Auto => {
                if self.encoded_size * 4 <= self.config.cache.l1 / 2 || n < 16 || m < 6 {
                    DistanceStrategy::Direct
                } else {
                    DistanceStrategy::Unpack
                }
            }
            fixed => fixed,
        }
    }

    fn check_matrix(&self, a: &[&[u8]], b: &[&[u8]], out: &[f32]) {
        assert_eq!(out.len(), a.len() * b.len(), "output must hold M x N distances");
        a.iter().chain(b.iter()).for_each(|code| self.check_code(code));
    }

    /// Row-major `M x N` matrix: `out[i * N + j]` is the distance of `a[i]` to `b[j]`.
    pub fn cosine_distances_mxn(&self, a: &[&[u8]], b: &[&[u8]], out: &mut [f32]) {
        let strategy = self.select_strategy(a.len(), b.len());
        tracing::debug!(m = a.len(), n = b.len(), strategy = strategy.name(), "distance matrix");
        match strategy {
            DistanceStrategy::Unpack => self.cosine_distances_unpack(a, b, out),
            _ => self.cosine_distances_direct(a, b, out),
        }
    }

    /// Matrix over contiguous code arrays, code `i` at byte offset `i * encoded_size`.
    pub fn cosine_distances_mxn_packed(&self, a: &[u8], b: &[u8], out: &mut [f32]) {
        assert_eq!(a.len() % self.encoded_size, 0, "A is not a whole number of codes");
        assert_eq!(b.len() % self.encoded_size, 0, "B is not a whole number of codes");
        let a: Vec<&[u8]> = a.chunks_exact(self.encoded_size).collect();
        let b: Vec<&[u8]> = b.chunks_exact(self.encoded_size).collect();
        self.cosine_distances_mxn(&a, &b, out);
    }

    /// Direct path: packed codes correlated in place, blocked to L2.
    pub fn cosine_distances_direct(&self, a: &[&[u8]], b: &[&[u8]], out: &mut [f32]) {
        self.check_matrix(a, b, out);
        let (m, n) = (a.len(), b.len());
        if m == 0 || n == 0 {
            return;
        }
        let l2 = self.config.cache.l2;
        let mm = align_lo(l2 / self.encoded_size, tiles::MICRO_ROWS).max(tiles::MICRO_ROWS);
        let nn = align_lo(l2 / self.encoded_size, tiles::MICRO_COLS).max(tiles::MICRO_COLS);
        for i in (0..m).step_by(mm) {
            let dm = mm.min(m - i);
            for j in (0..n).step_by(nn) {
                let dn = nn.min(n - j);
                (self.kernels.macro_direct)(&a[i..i + dm], &b[j..j + dn], &mut out[i * n + j..], n);
            }
        }
    }

    /// Unpack path: each macro tile is widened to 16-bit lanes first.
    pub fn cosine_distances_unpack(&self, a: &[&[u8]], b: &[&[u8]], out: &mut [f32]) {
        self.check_matrix(a, b, out);
        let (m, n) = (a.len(), b.len());
        if m == 0 || n == 0 {
            return;
        }
        let size = self.config.size;
        let cache = &self.config.cache;
        let mm = align_lo(cache.l2 / (2 * size), unpack::MICRO_ROWS).max(unpack::MICRO_ROWS);
        let nn = align_lo(cache.l3 / (2 * size), unpack::PANEL).max(unpack::PANEL);
        let mut scratch = UnpackScratch::new(size, mm.min(m), nn.min(n));
        for j in (0..n).step_by(nn) {
            let cols = &b[j..j + nn.min(n - j)];
            (self.kernels.unpack_panels)(cols, size, &mut scratch.line, &mut scratch.panels);
            let b_params = unpack::unpack_params(cols);
            for i in (0..m).step_by(mm) {
                let rows = &a[i..i + mm.min(m - i)];
                (self.kernels.unpack_rows)(rows, size, &mut scratch.rows);
                let a_params = unpack::unpack_params(rows);
                unpack::macro_cosine_distances_unpack(
                    &scratch.rows,
                    &a_params,
                    &scratch.panels,
                    &b_params,
                    size,
                    &mut out[i * n + j..],
                    n,
                );
            }
        }
    }

    /// [`Self::cosine_distances_mxn`] with row blocks spread over the rayon pool.
    ///
    /// Every block runs the single-threaded algorithm on a disjoint slice of
    /// `out`, so the result is identical to the sequential call.
    pub fn par_cosine_distances_mxn(&self, a: &[&[u8]], b: &[&[u8]], out: &mut [f32]) {
        self.check_matrix(a, b, out);
        let (m, n) = (a.len(), b.len());
        if m == 0 || n == 0 {
            return;
        }
        let block = m.div_ceil(rayon::current_num_threads()).max(1);
        out.par_chunks_mut(block * n)
            .zip(a.par_chunks(block))
            .for_each(|(dst, rows)| self.cosine_distances_mxn(rows, b, dst));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheSizes;

    #[test]
    fn rejects_invalid_shapes() {
        assert!(DescrInt::new(8, 3).is_err());
        assert!(DescrInt::new(8, 9).is_err());
        assert!(DescrInt::new(10, 6).is_err());
        assert!(DescrInt::new(0, 6).is_err());
        let engine = DescrInt::new(8, 4).expect("valid shape");
        assert_eq!(engine.encoded_size(), HEADER_SIZE + 4);
        assert_eq!(DescrInt::new(128, 7).expect("valid").encoded_size(), 16 + 112);
    }

    #[test]
    fn auto_strategy_follows_shape_and_cache() {
        let small = DescrInt::new(64, 8).expect("valid");
        assert_eq!(small.select_strategy(100, 100), DistanceStrategy::Direct);

        let cache = CacheSizes {
            l1: 1024,
            l2: 64 * 1024,
            l3: 1024 * 1024,
        };
        let wide = DescrInt::with_config(DescrIntConfig::new(512, 8).with_cache(cache)).expect("valid");
        assert_eq!(wide.select_strategy(100, 100), DistanceStrategy::Unpack);
        assert_eq!(wide.select_strategy(5, 100), DistanceStrategy::Direct);
        assert_eq!(wide.select_strategy(100, 15), DistanceStrategy::Direct);

        let forced = DescrInt::with_config(
            DescrIntConfig::new(64, 8).with_strategy(DistanceStrategy::Unpack),
        )
        .expect("valid");
        assert_eq!(forced.select_strategy(1, 1), DistanceStrategy::Unpack);
    }

    #[test]
    #[should_panic(expected = "encoded descriptor must be")]
    fn wrong_code_length_panics() {
        let engine = DescrInt::new(16, 6).expect("valid");
        let short = vec![0u8; engine.encoded_size() - 1];
        engine.cosine_distance(&short, &short);
    }

    #[test]
    fn empty_matrices_are_noops() {
        let engine = DescrInt::new(16, 6).expect("valid");
        let code = engine.encode_32f(&[1.0; 16]);
        let mut out: Vec<f32> = Vec::new();
        engine.cosine_distances_mxn(&[], &[code.as_slice()], &mut out);
        engine.par_cosine_distances_mxn(&[code.as_slice()], &[], &mut out);
        engine.cosine_distances_unpack(&[], &[], &mut out);
    }
}
