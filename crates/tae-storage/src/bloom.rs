use std::hash::{Hash, Hasher};

use ahash::AHasher;
use tae_primitives::Value;

/// A per-object (here, per-block) primary-key bloom filter, consulted after
/// the zone-map passes. Built once at freeze time from the block's
/// committed primary-key values; never mutated afterward.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
}

const BITS_PER_KEY: usize = 10;
const NUM_HASHES: u32 = 4;

impl BloomFilter {
    pub fn build<'a>(keys: impl Iterator<Item = &'a Value>) -> Self {
        let keys: Vec<&Value> = keys.collect();
        let n = keys.len().max(1);
        let num_bits = (n * BITS_PER_KEY).next_power_of_two().max(64) as u64;
        let mut filter = BloomFilter {
            bits: vec![0u64; (num_bits / 64) as usize],
            num_bits,
            num_hashes: NUM_HASHES,
        };
        for k in keys {
            filter.insert(k);
        }
        filter
    }

    fn hash_pair(value: &Value) -> (u64, u64) {
        let bytes = encode_value(value);
        let mut h1 = AHasher::default();
        bytes.hash(&mut h1);
        let a = h1.finish();
        let mut h2 = AHasher::default();
        (a, bytes.len() as u64).hash(&mut h2);
        let b = h2.finish() | 1; // odd stride keeps the double-hash probe from degenerating
        (a, b)
    }

    fn insert(&mut self, value: &Value) {
        let (a, b) = Self::hash_pair(value);
        for i in 0..self.num_hashes {
            let bit = a.wrapping_add((i as u64).wrapping_mul(b)) % self.num_bits;
            self.bits[(bit / 64) as usize] |= 1 << (bit % 64);
        }
    }

    /// `false` is authoritative ("definitely not present"); `true` means
    /// "maybe present" and the caller must still load and check the actual
    /// column.
    pub fn maybe_contains(&self, value: &Value) -> bool {
        let (a, b) = Self::hash_pair(value);
        for i in 0..self.num_hashes {
            let bit = a.wrapping_add((i as u64).wrapping_mul(b)) % self.num_bits;
            if self.bits[(bit / 64) as usize] & (1 << (bit % 64)) == 0 {
                return false;
            }
        }
        true
    }
}

fn encode_value(value: &Value) -> Vec<u8> {
    match value {
        Value::Null => vec![0],
        Value::I64(v) => {
            let mut b = vec![1];
            b.extend_from_slice(&v.to_le_bytes());
            b
        }
        Value::Bool(v) => vec![2, *v as u8],
        Value::Str(s) => {
            let mut b = vec![3];
            b.extend_from_slice(s.as_bytes());
            b
        }
        Value::Bytes(v) => {
            let mut b = vec![4];
            b.extend_from_slice(v);
            b
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_keys_are_found() {
        let keys = vec![Value::I64(1), Value::I64(2), Value::I64(3)];
        let filter = BloomFilter::build(keys.iter());
        for k in &keys {
            assert!(filter.maybe_contains(k));
        }
    }

    #[test]
    fn absent_keys_are_usually_rejected() {
        let present: Vec<Value> = (0..50).map(Value::I64).collect();
        let filter = BloomFilter::build(present.iter());
        let absent: Vec<Value> = (1000..1050).map(Value::I64).collect();
        let false_positives = absent.iter().filter(|k| filter.maybe_contains(k)).count();
        assert!(false_positives < absent.len() / 2, "bloom filter is rejecting too few absent keys");
    }
}
