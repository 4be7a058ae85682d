//! Partition selection.
//!
//! Out of scope as a *design* (callers may plug in their own strategy), but
//! the crate ships a default so it works out of the box, matching the
//! upstream `kafka-python`/`aiokafka` `DefaultPartitioner` semantics byte for
//! byte (see `examples/original_source/aiokafka/producer.py`, which wires
//! `DefaultPartitioner()` in as the default and calls it
//! `partitioner(key_bytes, all_partitions, available_partitions)`).

use rand::Rng;

/// A pluggable partition-selection strategy.
///
/// Called with the serialized key (if any), the full partition list for the
/// topic, and the subset of partitions whose leader is currently available.
/// Deterministic for a fixed `(key, all, available)` input when a key is
/// present; a `None` key picks uniformly at random among the candidates on
/// every call, so no determinism guarantee applies there.
pub trait Partitioner: Send + Sync {
    fn partition(&self, key: Option<&[u8]>, all_partitions: &[i32], available: &[i32]) -> i32;
}

/// The default strategy: hash the key with the same murmur2 variant as the
/// Java client when a key is present, otherwise pick uniformly at random
/// among the partitions with a known, available leader.
#[derive(Debug, Default)]
pub struct DefaultPartitioner;

impl DefaultPartitioner {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Partitioner for DefaultPartitioner {
    fn partition(&self, key: Option<&[u8]>, all_partitions: &[i32], available: &[i32]) -> i32 {
        match key {
            Some(key_bytes) => {
                let candidates = if available.is_empty() {
                    all_partitions
                } else {
                    available
                };
                if candidates.is_empty() {
                    return 0;
                }
                let hash = murmur2(key_bytes) & 0x7fff_ffff;
                candidates[(hash as usize) % candidates.len()]
            }
            None => {
                let candidates = if available.is_empty() {
                    all_partitions
                } else {
                    available
                };
                if candidates.is_empty() {
                    return 0;
                }
                let idx = rand::thread_rng().gen_range(0..candidates.len());
                candidates[idx]
            }
        }
    }
}

/// The 32-bit murmur2 hash used by Kafka's Java client (and ported by
/// `kafka-python`'s `murmur2` helper) to route keyed records.
///
/// This is *not* the general-purpose MurmurHash2 reference implementation:
/// Kafka seeds it with `0x9747b28c` and folds the tail bytes in a specific
/// order, so a byte-for-byte port is required for key-based partitioning to
/// agree with other language clients writing to the same topic.
pub fn murmur2(data: &[u8]) -> i32 {
    const M: u32 = 0x5bd1_e995;
    const SEED: u32 = 0x9747_b28c;
    const R: u32 = 24;

    let len = data.len();
    let mut h: u32 = SEED ^ (len as u32);
    let nblocks = len / 4;

    for i in 0..nblocks {
        let b = &data[i * 4..i * 4 + 4];
        let mut k = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = &data[nblocks * 4..];
    match tail.len() {
        3 => {
            h ^= (tail[2] as u32) << 16;
            h ^= (tail[1] as u32) << 8;
            h ^= tail[0] as u32;
            h = h.wrapping_mul(M);
        }
        2 => {
            h ^= (tail[1] as u32) << 8;
            h ^= tail[0] as u32;
            h = h.wrapping_mul(M);
        }
        1 => {
            h ^= tail[0] as u32;
            h = h.wrapping_mul(M);
        }
        _ => {}
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;

    h as i32
}
