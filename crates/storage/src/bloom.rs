//! Probabilistic membership filter
//!
//! Standard bloom filter over 64-bit keys using xxh3 double hashing
//! (`h1 + i * h2`). Keys are only ever added, so a key that was written is
//! always reported as present: false positives are possible, false
//! negatives are not. `clear()` resets the filter after a drop-all.

use strata_core::Key;
use xxhash_rust::xxh3::xxh3_64_with_seed;

const SEED_A: u64 = 0x9E37_79B9_7F4A_7C15;
const SEED_B: u64 = 0xC2B2_AE3D_27D4_EB4F;

/// Bloom filter sized for an expected item count and false positive rate
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    /// Create a filter for `expected_items` at false positive rate `fp_rate`
    ///
    /// `fp_rate` is clamped into `[1e-9, 0.5]` and `expected_items` to at
    /// least 1.
    pub fn new(expected_items: usize, fp_rate: f64) -> Self {
        let n = expected_items.max(1) as f64;
        let p = fp_rate.clamp(1e-9, 0.5);
        let ln2 = std::f64::consts::LN_2;
        let num_bits = ((-n * p.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let num_hashes = ((num_bits as f64 / n) * ln2).round().clamp(1.0, 16.0) as u32;
        let words = ((num_bits + 63) / 64) as usize;
        Self {
            bits: vec![0; words],
            num_bits,
            num_hashes,
        }
    }

    fn positions(&self, key: Key) -> impl Iterator<Item = u64> + '_ {
        let bytes = key.to_le_bytes();
        let h1 = xxh3_64_with_seed(&bytes, SEED_A);
        let h2 = xxh3_64_with_seed(&bytes, SEED_B) | 1;
        (0..self.num_hashes as u64)
            .map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits)
    }

    /// Add a key
    pub fn insert(&mut self, key: Key) {
        let positions: Vec<u64> = self.positions(key).collect();
        for bit in positions {
            self.bits[(bit / 64) as usize] |= 1 << (bit % 64);
        }
    }

    /// Check whether a key may have been added
    pub fn might_contain(&self, key: Key) -> bool {
        self.positions(key)
            .all(|bit| self.bits[(bit / 64) as usize] & (1 << (bit % 64)) != 0)
    }

    /// Forget every key
    pub fn clear(&mut self) {
        self.bits.iter_mut().for_each(|word| *word = 0);
    }

    /// Number of bits in the filter
    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    /// Number of hash functions
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }
}
