//! K-mer membership oracle.
//!
//! The compactor and partitioner only ever see the [`KmerOracle`] trait: a
//! probabilistic membership structure with neighbor queries derived from
//! `contains`. The bundled [`CountingOracle`] is a bank of prime-sized
//! saturating counter tables; false positives are possible and tolerated by
//! the engine, false negatives are not.

pub mod cursor;

use crate::core::kmer::{Kmer, KmerCodec};
use crate::Result;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

pub use cursor::{Direction, DirectedCursor};

/// Membership oracle consumed by the graph engine.
///
/// All methods take `&self`; implementations synchronize internally so one
/// oracle can be shared by the partitioner's concurrent writers.
pub trait KmerOracle: Send + Sync {
    /// Word length the oracle was built with.
    fn ksize(&self) -> usize;

    /// Codec matching `ksize`.
    fn codec(&self) -> KmerCodec;

    /// Count every k-mer of `seq`, returning the number of k-mers consumed.
    fn consume_string(&self, seq: &str) -> Result<u64>;

    /// Number of distinct k-mers seen so far (subject to the oracle's own
    /// collision behavior).
    fn n_unique_kmers(&self) -> u64;

    /// Membership test on a canonical key.
    fn contains(&self, canonical: u64) -> bool;

    /// Fill `out` with the left extensions of `kmer` present in the oracle.
    fn left_neighbors(&self, kmer: Kmer, out: &mut Vec<Kmer>) {
        let codec = self.codec();
        out.clear();
        for code in 0..4 {
            let neighbor = codec.extend_left_code(kmer, code);
            if self.contains(neighbor.canonical()) {
                out.push(neighbor);
            }
        }
    }

    /// Fill `out` with the right extensions of `kmer` present in the oracle.
    fn right_neighbors(&self, kmer: Kmer, out: &mut Vec<Kmer>) {
        let codec = self.codec();
        out.clear();
        for code in 0..4 {
            let neighbor = codec.extend_right_code(kmer, code);
            if self.contains(neighbor.canonical()) {
                out.push(neighbor);
            }
        }
    }

    fn left_degree(&self, kmer: Kmer) -> u8 {
        let codec = self.codec();
        let mut degree = 0;
        for code in 0..4 {
            if self.contains(codec.extend_left_code(kmer, code).canonical()) {
                degree += 1;
            }
        }
        degree
    }

    fn right_degree(&self, kmer: Kmer) -> u8 {
        let codec = self.codec();
        let mut degree = 0;
        for code in 0..4 {
            if self.contains(codec.extend_right_code(kmer, code).canonical()) {
                degree += 1;
            }
        }
        degree
    }

    /// Combined neighbor count on both sides.
    fn degree(&self, kmer: Kmer) -> u8 {
        self.left_degree(kmer) + self.right_degree(kmer)
    }
}

/// A k-mer whose combined degree exceeds 2 is a branch point of the compact
/// graph (an HDN).
#[inline]
pub fn is_high_degree<O: KmerOracle + ?Sized>(oracle: &O, kmer: Kmer) -> bool {
    oracle.degree(kmer) > 2
}

/// Counting membership oracle over prime-sized tables of saturating bytes.
///
/// A k-mer is present when every table reports a nonzero count; the count of
/// a k-mer is the minimum across tables. `n_unique_kmers` counts first-time
/// insertions. Collisions only ever inflate counts, so membership has false
/// positives but no false negatives.
pub struct CountingOracle {
    codec: KmerCodec,
    tables: Vec<Box<[AtomicU8]>>,
    table_sizes: Vec<u64>,
    n_unique: AtomicU64,
}

impl CountingOracle {
    /// Build with `n_tables` tables of prime size just below `table_size`.
    pub fn new(k: usize, n_tables: usize, table_size: u64) -> Result<Self> {
        let codec = KmerCodec::new(k)?;
        let table_sizes = primes_below(table_size, n_tables);
        anyhow::ensure!(
            table_sizes.len() == n_tables,
            "could not find {} primes below {}",
            n_tables,
            table_size
        );
        let tables = table_sizes
            .iter()
            .map(|&size| {
                let mut cells = Vec::with_capacity(size as usize);
                cells.resize_with(size as usize, || AtomicU8::new(0));
                cells.into_boxed_slice()
            })
            .collect();
        Ok(Self {
            codec,
            tables,
            table_sizes,
            n_unique: AtomicU64::new(0),
        })
    }

    /// Count one canonical key. Returns true when the key was new.
    pub fn count(&self, canonical: u64) -> bool {
        let mut prev_min = u8::MAX;
        for (table, &size) in self.tables.iter().zip(&self.table_sizes) {
            let cell = &table[(canonical % size) as usize];
            let prev = cell
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_add(1))
                .unwrap_or_else(|saturated| saturated);
            prev_min = prev_min.min(prev);
        }
        if prev_min == 0 {
            self.n_unique.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Minimum count across tables for a canonical key.
    pub fn get_count(&self, canonical: u64) -> u8 {
        let mut count = u8::MAX;
        for (table, &size) in self.tables.iter().zip(&self.table_sizes) {
            count = count.min(table[(canonical % size) as usize].load(Ordering::Relaxed));
        }
        count
    }
}

impl KmerOracle for CountingOracle {
    fn ksize(&self) -> usize {
        self.codec.k()
    }

    fn codec(&self) -> KmerCodec {
        self.codec
    }

    fn consume_string(&self, seq: &str) -> Result<u64> {
        let normalized = self.codec.check_sequence(seq)?;
        let mut n_consumed = 0;
        for kmer in crate::core::kmer::KmerScanner::new(self.codec, &normalized)? {
            self.count(kmer.canonical());
            n_consumed += 1;
        }
        Ok(n_consumed)
    }

    fn n_unique_kmers(&self) -> u64 {
        self.n_unique.load(Ordering::Relaxed)
    }

    fn contains(&self, canonical: u64) -> bool {
        self.get_count(canonical) > 0
    }
}

fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut d = 3;
    while d * d <= n {
        if n % d == 0 {
            return false;
        }
        d += 2;
    }
    true
}

/// The first `n` primes at or below `x`, descending.
fn primes_below(x: u64, n: usize) -> Vec<u64> {
    let mut candidate = if x % 2 == 0 { x.saturating_sub(1) } else { x };
    let mut primes = Vec::with_capacity(n);
    while primes.len() < n && candidate >= 3 {
        if is_prime(candidate) {
            primes.push(candidate);
        }
        candidate -= 2;
    }
    primes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_oracle(k: usize) -> CountingOracle {
        CountingOracle::new(k, 4, 100_003).unwrap()
    }

    #[test]
    fn test_primes_below() {
        assert_eq!(primes_below(100, 3), vec![97, 89, 83]);
    }

    #[test]
    fn test_consume_and_membership() {
        let oracle = test_oracle(5);
        let n = oracle.consume_string("ACGTACGT").unwrap();
        assert_eq!(n, 4);

        let codec = oracle.codec();
        assert!(oracle.contains(codec.encode("ACGTA").unwrap().canonical()));
        // reverse complement of a consumed k-mer is the same key
        assert!(oracle.contains(codec.encode("TACGT").unwrap().canonical()));
        assert!(!oracle.contains(codec.encode("GGGGG").unwrap().canonical()));
    }

    #[test]
    fn test_unique_kmer_accounting() {
        let oracle = test_oracle(5);
        oracle.consume_string("ACGTAC").unwrap();
        let first = oracle.n_unique_kmers();
        assert_eq!(first, 2);
        // consuming the same sequence adds nothing new
        oracle.consume_string("ACGTAC").unwrap();
        assert_eq!(oracle.n_unique_kmers(), first);
    }

    #[test]
    fn test_counts_saturate() {
        let oracle = test_oracle(5);
        let key = oracle.codec().encode("ACGTA").unwrap().canonical();
        for _ in 0..300 {
            oracle.count(key);
        }
        assert_eq!(oracle.get_count(key), u8::MAX);
    }

    #[test]
    fn test_neighbor_queries() {
        let oracle = test_oracle(5);
        oracle.consume_string("GATTACAT").unwrap();
        let codec = oracle.codec();

        let mid = codec.encode("ATTAC").unwrap();
        let mut out = Vec::new();
        oracle.left_neighbors(mid, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(codec.decode(out[0].fwd), "GATTA");

        oracle.right_neighbors(mid, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(codec.decode(out[0].fwd), "TTACA");

        assert_eq!(oracle.left_degree(mid), 1);
        assert_eq!(oracle.right_degree(mid), 1);
        assert_eq!(oracle.degree(mid), 2);
        assert!(!is_high_degree(&oracle, mid));
    }

    #[test]
    fn test_fork_is_high_degree() {
        let oracle = test_oracle(5);
        // three branches leaving GCGTA on the right, one entering on the left
        oracle.consume_string("TGCGTAC").unwrap();
        oracle.consume_string("TGCGTAG").unwrap();
        oracle.consume_string("TGCGTAT").unwrap();
        let hub = oracle.codec().encode("GCGTA").unwrap();
        assert_eq!(oracle.right_degree(hub), 3);
        assert_eq!(oracle.left_degree(hub), 1);
        assert!(is_high_degree(&oracle, hub));
    }
}
