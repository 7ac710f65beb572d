//! Bloom filter over `(trace id, attribute value)` pairs.
//!
//! Keys are the first 16 bytes of `blake3(trace_id \0 value)`. The 128-bit
//! key is split into two 64-bit halves that drive double hashing, so no
//! second hash pass is needed per probe.

use serde::{Deserialize, Serialize};

use crate::error::{QueryError, Result};

pub const BITS_PER_KEY: usize = 10;
pub const NUM_HASHES: u32 = 7;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloomFilter {
    num_bits: u64,
    num_hashes: u32,
    words: Vec<u64>,
}

/// Probe key of one trace/value pair.
pub fn bloom_key(trace_id: &str, value: &str) -> u128 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(trace_id.as_bytes());
    hasher.update(&[0]);
    hasher.update(value.as_bytes());
    let digest = hasher.finalize();
    let mut prefix = [0u8; 16];
    prefix.copy_from_slice(&digest.as_bytes()[..16]);
    u128::from_le_bytes(prefix)
}

fn probes(key: u128, num_hashes: u32, num_bits: u64) -> impl Iterator<Item = u64> {
    let low = key as u64;
    // Odd step is coprime with any power-of-two bit count.
    let step = ((key >> 64) as u64) | 1;
    (0..u64::from(num_hashes)).map(move |i| low.wrapping_add(i.wrapping_mul(step)) % num_bits)
}

impl BloomFilter {
    /// Filter sized for `expected_keys`, at least one 64-bit word.
    pub fn with_capacity(expected_keys: usize) -> Self {
        let bits = expected_keys.saturating_mul(BITS_PER_KEY).max(64);
        let words = (bits + 63) / 64;
        Self {
            num_bits: (words * 64) as u64,
            num_hashes: NUM_HASHES,
            words: vec![0; words],
        }
    }

    pub fn insert(&mut self, key: u128) {
        for bit in probes(key, self.num_hashes, self.num_bits) {
            self.words[(bit / 64) as usize] |= 1 << (bit % 64);
        }
    }

    /// `false` means definitely absent.
    pub fn may_contain(&self, key: u128) -> bool {
        probes(key, self.num_hashes, self.num_bits)
            .all(|bit| self.words[(bit / 64) as usize] & (1 << (bit % 64)) != 0)
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    /// Reject decoded filters whose header disagrees with their bit array.
    pub fn validate(&self) -> Result<()> {
        if self.num_bits == 0 || self.num_hashes == 0 {
            return Err(QueryError::MalformedRecord(
                "bloom filter has no bits or no hashes".to_string(),
            ));
        }
        if (self.words.len() as u64) * 64 < self.num_bits {
            return Err(QueryError::MalformedRecord(format!(
                "bloom filter claims {} bits but stores {} words",
                self.num_bits,
                self.words.len()
            )));
        }
        Ok(())
    }
}
