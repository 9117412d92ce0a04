//! Deterministic bucketing for percentage rollouts and variant splits.
//!
//! Buckets are derived from a 32-bit MurmurHash3 of `"{flag_key}:{targeting_key}"`
//! reduced modulo 100, so the same context always lands in the same bucket for
//! a given flag, and different flags shuffle the population independently.

const C1: u32 = 0xcc9e_2d51;
const C2: u32 = 0x1b87_3593;

/// 32-bit MurmurHash3 (x86 variant).
pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    let mut h = seed;

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h ^= k;
        h = h.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k: u32 = 0;
        for (i, &b) in tail.iter().enumerate() {
            k ^= (b as u32) << (8 * i);
        }
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h ^= k;
    }

    h ^= data.len() as u32;
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

/// Maps a context to a bucket in `0..100` for the given flag.
pub(crate) fn bucket(flag_key: &str, targeting_key: &str) -> u32 {
    let input = format!("{}:{}", flag_key, targeting_key);
    murmur3_32(input.as_bytes(), 0) % 100
}
