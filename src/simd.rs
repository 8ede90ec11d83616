//! Bit packing for quantized descriptor codes
//!
//! Codes are packed in groups of eight components. A group at depth `BITS`
//! occupies exactly `BITS` bytes and component `k` of the group sits at bits
//! `[k * BITS, (k + 1) * BITS)` of the little-endian integer formed by those
//! bytes. Depth 8 is therefore a plain byte copy and depth 4 stores two
//! nibbles per byte, low nibble first.
//!
//! The group helpers are `#[inline(always)]` so the correlation kernels can
//! isolate sub-byte fields locally without materialising an unpacked copy.

/// Number of components sharing one packed group.
pub const GROUP: usize = 8;

/// Number of payload bytes for `size` components at `depth` bits.
#[inline]
pub fn packed_len(size: usize, depth: usize) -> usize {
    debug_assert_eq!(size % GROUP, 0);
    size / GROUP * depth
}

/// Load one packed group as a 64-bit little-endian word.
#[inline(always)]
fn load_word<const BITS: usize>(src: &[u8]) -> u64 {
    let mut word = 0u64;
    for (i, &byte) in src[..BITS].iter().enumerate() {
        word |= (byte as u64) << (8 * i);
    }
    word
}

/// Extract the eight codes of one packed group.
#[inline(always)]
pub fn load_group<const BITS: usize>(src: &[u8]) -> [u16; GROUP] {
    let word = load_word::<BITS>(src);
    let mask = (1u64 << BITS) - 1;
    let mut out = [0u16; GROUP];
    for (k, value) in out.iter_mut().enumerate() {
        *value = ((word >> (k * BITS)) & mask) as u16;
    }
    out
}

/// Pack eight codes into `BITS` bytes of `dst`.
#[inline(always)]
pub fn store_group<const BITS: usize>(codes: &[u8], dst: &mut [u8]) {
    let mask = (1u64 << BITS) - 1;
    let mut word = 0u64;
    for (k, &code) in codes[..GROUP].iter().enumerate() {
        word |= (code as u64 & mask) << (k * BITS);
    }
    dst[..BITS].copy_from_slice(&word.to_le_bytes()[..BITS]);
}

/// Pack one code per byte into the `BITS`-wide layout.
pub fn pack_codes_bits<const BITS: usize>(codes: &[u8], packed: &mut [u8]) {
    debug_assert_eq!(codes.len() % GROUP, 0);
    debug_assert_eq!(packed.len(), packed_len(codes.len(), BITS));
    if BITS == 8 {
        packed.copy_from_slice(codes);
        return;
    }
    for (group, dst) in codes
        .chunks_exact(GROUP)
        .zip(packed.chunks_exact_mut(BITS))
    {
        store_group::<BITS>(group, dst);
    }
}

/// Expand a `BITS`-wide payload into one code per byte.
pub fn unpack_codes_bits<const BITS: usize>(packed: &[u8], codes: &mut [u8]) {
    debug_assert_eq!(codes.len() % GROUP, 0);
    debug_assert_eq!(packed.len(), packed_len(codes.len(), BITS));
    if BITS == 8 {
        codes.copy_from_slice(packed);
        return;
    }
    for (src, group) in packed.chunks_exact(BITS).zip(codes.chunks_exact_mut(GROUP)) {
        for (dst, value) in group.iter_mut().zip(load_group::<BITS>(src)) {
            *dst = value as u8;
        }
    }
}

/// Expand a `BITS`-wide payload into 16-bit lanes.
pub fn unpack_codes_u16_bits<const BITS: usize>(packed: &[u8], codes: &mut [u16]) {
    debug_assert_eq!(codes.len() % GROUP, 0);
    debug_assert_eq!(packed.len(), packed_len(codes.len(), BITS));
    if BITS == 8 {
        for (dst, &src) in codes.iter_mut().zip(packed) {
            *dst = src as u16;
        }
        return;
    }
    for (src, group) in packed.chunks_exact(BITS).zip(codes.chunks_exact_mut(GROUP)) {
        group.copy_from_slice(&load_group::<BITS>(src));
    }
}

/// Pack codes (one per byte, each `< 2^depth`) into `packed`.
///
/// # Arguments
/// * `codes` - Input codes, length a multiple of 8
/// * `packed` - Output buffer of `packed_len(codes.len(), depth)` bytes
/// * `depth` - Bits per code (4-8)
pub fn pack_codes(codes: &[u8], packed: &mut [u8], depth: usize) {
    match depth {
        4 => pack_codes_bits::<4>(codes, packed),
        5 => pack_codes_bits::<5>(codes, packed),
        6 => pack_codes_bits::<6>(codes, packed),
        7 => pack_codes_bits::<7>(codes, packed),
        8 => pack_codes_bits::<8>(codes, packed),
        _ => panic!("unsupported code depth {depth}"),
    }
}

/// Unpack codes produced by [`pack_codes`].
pub fn unpack_codes(packed: &[u8], codes: &mut [u8], depth: usize) {
    match depth {
        4 => unpack_codes_bits::<4>(packed, codes),
        5 => unpack_codes_bits::<5>(packed, codes),
        6 => unpack_codes_bits::<6>(packed, codes),
        7 => unpack_codes_bits::<7>(packed, codes),
        8 => unpack_codes_bits::<8>(packed, codes),
        _ => panic!("unsupported code depth {depth}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(len: usize, depth: usize, salt: usize) -> Vec<u8> {
        let max = (1usize << depth) - 1;
        (0..len).map(|i| ((i * 7 + salt * 13) % (max + 1)) as u8).collect()
    }

    #[test]
    fn pack_unpack_identity_every_depth() {
        for depth in 4..=8 {
            for salt in 0..5 {
                let codes = pattern(64, depth, salt);
                let mut packed = vec![0u8; packed_len(codes.len(), depth)];
                pack_codes(&codes, &mut packed, depth);
                let mut restored = vec![0u8; codes.len()];
                unpack_codes(&packed, &mut restored, depth);
                assert_eq!(restored, codes, "depth {depth} salt {salt}");
            }
        }
    }

    #[test]
    fn every_value_survives_every_slot() {
        for depth in 4..=8 {
            let max = (1u16 << depth) - 1;
            for slot in 0..GROUP {
                for value in 0..=max {
                    let mut codes = [0u8; GROUP];
                    codes[slot] = value as u8;
                    let mut packed = vec![0u8; depth];
                    pack_codes(&codes, &mut packed, depth);
                    let mut wide = [0u16; GROUP];
                    unpack_codes_u16_bits_dyn(&packed, &mut wide, depth);
                    for (k, &got) in wide.iter().enumerate() {
                        let expected = if k == slot { value } else { 0 };
                        assert_eq!(got, expected, "depth {depth} slot {slot} value {value}");
                    }
                }
            }
        }
    }

    fn unpack_codes_u16_bits_dyn(packed: &[u8], codes: &mut [u16], depth: usize) {
        match depth {
            4 => unpack_codes_u16_bits::<4>(packed, codes),
            5 => unpack_codes_u16_bits::<5>(packed, codes),
            6 => unpack_codes_u16_bits::<6>(packed, codes),
            7 => unpack_codes_u16_bits::<7>(packed, codes),
            _ => unpack_codes_u16_bits::<8>(packed, codes),
        }
    }

    #[test]
    fn depth_four_is_low_nibble_first() {
        let codes = [1u8, 2, 3, 4, 5, 6, 7, 15];
        let mut packed = [0u8; 4];
        pack_codes(&codes, &mut packed, 4);
        assert_eq!(packed, [0x21, 0x43, 0x65, 0xF7]);
    }

    #[test]
    fn depth_five_layout_is_lsb_first() {
        let mut packed = [0u8; 5];
        pack_codes(&[0, 1, 0, 0, 0, 0, 0, 0], &mut packed, 5);
        assert_eq!(packed, [0x20, 0, 0, 0, 0]);

        pack_codes(&[0, 0, 0, 0, 0, 0, 0, 31], &mut packed, 5);
        assert_eq!(packed, [0, 0, 0, 0, 0xF8]);

        pack_codes(&[31; 8], &mut packed, 5);
        assert_eq!(packed, [0xFF; 5]);
    }

    #[test]
    fn depth_eight_is_a_copy() {
        let codes: Vec<u8> = (0..16).map(|i| (i * 17) as u8).collect();
        let mut packed = vec![0u8; 16];
        pack_codes(&codes, &mut packed, 8);
        assert_eq!(packed, codes);
    }

    #[test]
    fn packed_len_matches_depth() {
        assert_eq!(packed_len(8, 4), 4);
        assert_eq!(packed_len(8, 7), 7);
        assert_eq!(packed_len(512, 5), 320);
        assert_eq!(packed_len(512, 8), 512);
    }
}
