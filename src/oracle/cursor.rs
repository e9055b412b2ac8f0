//! Directional traversal cursor over the oracle.
//!
//! A cursor walks one base at a time in a fixed direction, moving only while
//! the walk is unambiguous. Stop predicates can be pushed onto the filter
//! stack; a compacting cursor additionally refuses to walk out of a
//! high-degree k-mer, so walks come to rest exactly on branch points.

use crate::core::kmer::{code_base, Kmer, KmerCodec};
use crate::oracle::{is_high_degree, KmerOracle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Left,
    Right,
}

/// Stop predicate over a candidate k-mer. Returning true vetoes the step.
pub type KmerFilter<'a> = Box<dyn Fn(&Kmer) -> bool + 'a>;

pub struct DirectedCursor<'a, O: KmerOracle + ?Sized> {
    oracle: &'a O,
    codec: KmerCodec,
    /// Current position, in the frame of the starting k-mer.
    pub cursor: Kmer,
    pub direction: Direction,
    filters: Vec<KmerFilter<'a>>,
    compacting: bool,
}

impl<'a, O: KmerOracle + ?Sized> DirectedCursor<'a, O> {
    pub fn new(oracle: &'a O, start: Kmer, direction: Direction) -> Self {
        Self {
            oracle,
            codec: oracle.codec(),
            cursor: start,
            direction,
            filters: Vec::new(),
            compacting: false,
        }
    }

    pub fn new_left(oracle: &'a O, start: Kmer) -> Self {
        Self::new(oracle, start, Direction::Left)
    }

    pub fn new_right(oracle: &'a O, start: Kmer) -> Self {
        Self::new(oracle, start, Direction::Right)
    }

    /// A cursor that treats high-degree k-mers as walk endpoints.
    pub fn new_compacting(oracle: &'a O, start: Kmer, direction: Direction) -> Self {
        let mut cursor = Self::new(oracle, start, direction);
        cursor.compacting = true;
        cursor
    }

    pub fn push_filter(&mut self, filter: KmerFilter<'a>) {
        self.filters.push(filter);
    }

    pub fn pop_filter(&mut self) -> Option<KmerFilter<'a>> {
        self.filters.pop()
    }

    fn passes_filters(&self, kmer: &Kmer) -> bool {
        !self.filters.iter().any(|f| f(kmer))
    }

    /// Reposition without touching direction or filters.
    pub fn reset(&mut self, start: Kmer) {
        self.cursor = start;
    }

    /// Fill `out` with the unfiltered neighbors of the current k-mer in the
    /// walk direction.
    pub fn neighbors(&self, out: &mut Vec<Kmer>) {
        match self.direction {
            Direction::Left => self.oracle.left_neighbors(self.cursor, out),
            Direction::Right => self.oracle.right_neighbors(self.cursor, out),
        }
        out.retain(|kmer| self.passes_filters(kmer));
    }

    /// Advance one base. Returns the ASCII base added on the walk side (in
    /// the cursor's frame), or None when the walk must stop: no neighbor,
    /// more than one neighbor, every neighbor filtered, or (compacting) the
    /// current k-mer is itself a branch point.
    pub fn step(&mut self) -> Option<u8> {
        if self.compacting && is_high_degree(self.oracle, self.cursor) {
            return None;
        }
        let mut chosen: Option<(Kmer, u8)> = None;
        for code in 0..4 {
            let candidate = match self.direction {
                Direction::Left => self.codec.extend_left_code(self.cursor, code),
                Direction::Right => self.codec.extend_right_code(self.cursor, code),
            };
            if !self.oracle.contains(candidate.canonical()) {
                continue;
            }
            if !self.passes_filters(&candidate) {
                continue;
            }
            if chosen.is_some() {
                // ambiguous in the walk direction
                return None;
            }
            chosen = Some((candidate, code_base(code)));
        }
        let (next, base) = chosen?;
        self.cursor = next;
        Some(base)
    }
}
