//! Directed linear assembler.
//!
//! Walks a cursor through the oracle one base at a time and returns the
//! maximal unambiguous segment, starting k-mer included. The result is a
//! pure function of oracle state and the cursor's position, direction,
//! filters, and compacting mode.

use crate::core::kmer::KmerCodec;
use crate::oracle::cursor::{Direction, DirectedCursor};
use crate::oracle::KmerOracle;
use ahash::AHashSet;

pub struct SegmentAssembler {
    codec: KmerCodec,
}

impl SegmentAssembler {
    pub fn new(codec: KmerCodec) -> Self {
        Self { codec }
    }

    /// Assemble the maximal segment from the cursor's position in its walk
    /// direction. The returned string reads left-to-right in the frame of
    /// the starting k-mer; for a left walk, the cursor's final position is
    /// the leftmost k-mer of the result. Revisiting a k-mer ends the walk,
    /// so cycles terminate.
    pub fn assemble_directed<O: KmerOracle + ?Sized>(
        &self,
        cursor: &mut DirectedCursor<'_, O>,
    ) -> String {
        let start = self.codec.decode(cursor.cursor.fwd);
        let mut seen: AHashSet<u64> = AHashSet::new();
        seen.insert(cursor.cursor.canonical());

        let mut walked = String::new();
        loop {
            let before = cursor.cursor;
            let Some(base) = cursor.step() else {
                break;
            };
            if !seen.insert(cursor.cursor.canonical()) {
                cursor.reset(before);
                break;
            }
            walked.push(base as char);
        }

        match cursor.direction {
            Direction::Right => {
                let mut contig = start;
                contig.push_str(&walked);
                contig
            }
            Direction::Left => {
                let mut contig: String = walked.chars().rev().collect();
                contig.push_str(&start);
                contig
            }
        }
    }
}
