//! High-degree node store and orientation algebra.
//!
//! Because DNA is double-stranded, a unitig can meet a node on either
//! strand. The orientation algebra lives here, centralized: it compares the
//! `k-1` overlap between a node's canonical k-mer and the appropriate end of
//! a segment, picks the *pivot base* (the base just outside the overlap,
//! complemented when the strands disagree), and slots the edge into one of
//! the node's four in- or four out-slots indexed by the pivot's 2-bit code.

use crate::core::errors::EngineError;
use crate::core::kmer::{base_code, complement, Kmer, KmerCodec, KmerScanner};
use crate::graph::{EdgeId, NodeId};
use crate::Result;
use ahash::AHashMap;

use super::edge::CompactEdge;

/// A high-degree k-mer materialized as a graph vertex.
///
/// Nodes are never deleted or renumbered; any ID handed out stays valid for
/// the life of the store.
#[derive(Debug, Clone)]
pub struct CompactNode {
    pub kmer: Kmer,
    pub node_id: NodeId,
    /// Canonical-strand rendering of the k-mer.
    pub sequence: String,
    /// Times this node was touched by disturbed-set classification.
    pub count: u32,
    /// Whether the forward strand was canonical when first seen.
    pub direction: bool,
    in_edges: [Option<EdgeId>; 4],
    out_edges: [Option<EdgeId>; 4],
}

impl CompactNode {
    fn new(kmer: Kmer, node_id: NodeId, sequence: String) -> Self {
        Self {
            kmer,
            node_id,
            sequence,
            count: 0,
            direction: kmer.is_forward(),
            in_edges: [None; 4],
            out_edges: [None; 4],
        }
    }

    pub fn in_edge(&self, pivot: u8) -> Option<EdgeId> {
        base_code(pivot).and_then(|code| self.in_edges[code as usize])
    }

    pub fn out_edge(&self, pivot: u8) -> Option<EdgeId> {
        base_code(pivot).and_then(|code| self.out_edges[code as usize])
    }

    fn set_in_edge(&mut self, pivot: u8, edge: EdgeId) {
        if let Some(code) = base_code(pivot) {
            self.in_edges[code as usize] = Some(edge);
        }
    }

    fn set_out_edge(&mut self, pivot: u8, edge: EdgeId) {
        if let Some(code) = base_code(pivot) {
            self.out_edges[code as usize] = Some(edge);
        }
    }

    /// Clear every slot holding `edge`. Returns how many slots were cleared
    /// (a self-loop edge occupies one slot per endpoint side).
    pub fn clear_edge(&mut self, edge: EdgeId) -> usize {
        let mut cleared = 0;
        for slot in self.in_edges.iter_mut().chain(self.out_edges.iter_mut()) {
            if *slot == Some(edge) {
                *slot = None;
                cleared += 1;
            }
        }
        cleared
    }

    pub fn in_degree(&self) -> u8 {
        self.in_edges.iter().flatten().count() as u8
    }

    pub fn out_degree(&self) -> u8 {
        self.out_edges.iter().flatten().count() as u8
    }

    /// Occupied slot count across both sides.
    pub fn degree(&self) -> u8 {
        self.in_degree() + self.out_degree()
    }

    /// Iterate occupied slots as `(is_in_side, pivot base, edge)`.
    pub fn slots(&self) -> impl Iterator<Item = (bool, u8, EdgeId)> + '_ {
        let ins = self
            .in_edges
            .iter()
            .enumerate()
            .filter_map(|(code, slot)| slot.map(|e| (true, crate::core::kmer::code_base(code as u64), e)));
        let outs = self
            .out_edges
            .iter()
            .enumerate()
            .filter_map(|(code, slot)| slot.map(|e| (false, crate::core::kmer::code_base(code as u64), e)));
        ins.chain(outs)
    }
}

/// Append-only arena of compact nodes plus the canonical-hash index.
pub struct NodeStore {
    codec: KmerCodec,
    kmer_id_map: AHashMap<u64, NodeId>,
    nodes: Vec<CompactNode>,
    n_updates: u64,
}

impl NodeStore {
    pub fn new(codec: KmerCodec) -> Self {
        Self {
            codec,
            kmer_id_map: AHashMap::new(),
            nodes: Vec::new(),
            n_updates: 0,
        }
    }

    pub fn n_nodes(&self) -> u64 {
        self.nodes.len() as u64
    }

    pub fn n_updates(&self) -> u64 {
        self.n_updates
    }

    /// Fetch-or-allocate. A hit bumps the visit count; a miss appends a new
    /// node. Returns the ID and whether the node was just created.
    pub fn build_or_get(&mut self, kmer: Kmer) -> (NodeId, bool) {
        let canonical = kmer.canonical();
        if let Some(&id) = self.kmer_id_map.get(&canonical) {
            self.nodes[id as usize].count += 1;
            return (id, false);
        }
        let id = self.nodes.len() as NodeId;
        let mut node = CompactNode::new(kmer, id, self.codec.decode(canonical));
        node.count = 1;
        self.nodes.push(node);
        self.kmer_id_map.insert(canonical, id);
        self.n_updates += 1;
        (id, true)
    }

    pub fn get_id_by_kmer(&self, canonical: u64) -> Option<NodeId> {
        self.kmer_id_map.get(&canonical).copied()
    }

    pub fn get_by_kmer(&self, canonical: u64) -> Option<&CompactNode> {
        self.get_id_by_kmer(canonical)
            .map(|id| &self.nodes[id as usize])
    }

    pub fn get_by_id(&self, id: NodeId) -> Option<&CompactNode> {
        self.nodes.get(id as usize)
    }

    /// Existing nodes for the k-mers of `sequence`, in sweep order.
    pub fn get_nodes(&self, sequence: &str) -> Result<Vec<&CompactNode>> {
        let normalized = self.codec.check_sequence(sequence)?;
        let mut found = Vec::new();
        for kmer in KmerScanner::new(self.codec, &normalized)? {
            if let Some(node) = self.get_by_kmer(kmer.canonical()) {
                found.push(node);
            }
        }
        Ok(found)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompactNode> {
        self.nodes.iter()
    }

    /// Remove `edge` from the slot arrays of both its endpoints.
    pub fn unlink_edge(&mut self, edge: &CompactEdge) {
        for endpoint in [edge.in_node_id, edge.out_node_id].into_iter().flatten() {
            if let Some(node) = self.nodes.get_mut(endpoint as usize) {
                node.clear_edge(edge.edge_id);
                self.n_updates += 1;
            }
        }
    }

    /// True when `sequence` (which does NOT include the node) meets the node
    /// from graph left on the opposite strand.
    pub fn is_rc_from_left(&self, id: NodeId, sequence: &str) -> bool {
        let k = self.codec.k();
        let node_seq = self.nodes[id as usize].sequence.as_bytes();
        let seq = sequence.as_bytes();
        node_seq[..k - 1] != seq[seq.len() - (k - 1)..]
    }

    /// True when `sequence` (which does NOT include the node) meets the node
    /// from graph right on the opposite strand.
    pub fn is_rc_from_right(&self, id: NodeId, sequence: &str) -> bool {
        let k = self.codec.k();
        let node_seq = self.nodes[id as usize].sequence.as_bytes();
        let seq = sequence.as_bytes();
        node_seq[1..] != seq[..k - 1]
    }

    /// Pivot base for a segment that contains the node at its right end.
    /// Returns the (possibly complemented) pivot and the opposite-strand
    /// flag, or None when the segment is too short to carry a pivot.
    pub fn pivot_from_left(&self, id: NodeId, sequence: &str) -> Option<(u8, bool)> {
        let k = self.codec.k();
        let seq = sequence.as_bytes();
        if seq.len() < k + 1 {
            return None;
        }
        let node_seq = self.nodes[id as usize].sequence.as_bytes();
        let pivot = seq[seq.len() - k - 1];
        if node_seq[..k - 1] == seq[seq.len() - k..seq.len() - 1] {
            Some((pivot, false))
        } else {
            Some((complement(pivot), true))
        }
    }

    /// Pivot base for a segment that contains the node at its left end.
    pub fn pivot_from_right(&self, id: NodeId, sequence: &str) -> Option<(u8, bool)> {
        let k = self.codec.k();
        let seq = sequence.as_bytes();
        if seq.len() < k + 1 {
            return None;
        }
        let node_seq = self.nodes[id as usize].sequence.as_bytes();
        let pivot = seq[k];
        if node_seq[1..] == seq[1..k] {
            Some((pivot, false))
        } else {
            Some((complement(pivot), true))
        }
    }

    /// A palindromic node reads identically on both strands, so a segment
    /// and its reverse complement would land in different slots for the
    /// same incidence. Canonicalizing the segment strand (and flipping the
    /// side with it) collapses the two descriptions into one slot.
    fn palindromic(&self, id: NodeId) -> bool {
        let kmer = self.nodes[id as usize].kmer;
        kmer.fwd == kmer.rev
    }

    /// Slot `edge` into the node it reaches from graph left. Same strand
    /// lands in the in-array, opposite strand in the out-array. Returns the
    /// opposite-strand flag.
    pub fn add_edge_from_left(&mut self, id: NodeId, edge: EdgeId, edge_seq: &str) -> Result<bool> {
        if self.palindromic(id) {
            let rc = crate::core::kmer::revcomp(edge_seq);
            if rc.as_str() < edge_seq {
                return self.add_edge_from_right(id, edge, &rc);
            }
        }
        let (pivot, rc) = self.pivot_from_left(id, edge_seq).ok_or_else(|| {
            EngineError::CorruptIndex(format!(
                "segment of length {} cannot carry a pivot into node {}",
                edge_seq.len(),
                id
            ))
        })?;
        let node = &mut self.nodes[id as usize];
        if rc {
            node.set_out_edge(pivot, edge);
        } else {
            node.set_in_edge(pivot, edge);
        }
        self.n_updates += 1;
        Ok(rc)
    }

    /// Slot `edge` into the node it leaves from graph right (mirror of
    /// [`Self::add_edge_from_left`]).
    pub fn add_edge_from_right(&mut self, id: NodeId, edge: EdgeId, edge_seq: &str) -> Result<bool> {
        if self.palindromic(id) {
            let rc = crate::core::kmer::revcomp(edge_seq);
            if rc.as_str() < edge_seq {
                return self.add_edge_from_left(id, edge, &rc);
            }
        }
        let (pivot, rc) = self.pivot_from_right(id, edge_seq).ok_or_else(|| {
            EngineError::CorruptIndex(format!(
                "segment of length {} cannot carry a pivot out of node {}",
                edge_seq.len(),
                id
            ))
        })?;
        let node = &mut self.nodes[id as usize];
        if rc {
            node.set_in_edge(pivot, edge);
        } else {
            node.set_out_edge(pivot, edge);
        }
        self.n_updates += 1;
        Ok(rc)
    }

    /// Edge currently slotted where `sequence` would arrive from graph left.
    pub fn get_edge_from_left(&self, id: NodeId, sequence: &str) -> Option<EdgeId> {
        if self.palindromic(id) {
            let rc = crate::core::kmer::revcomp(sequence);
            if rc.as_str() < sequence {
                return self.get_edge_from_right(id, &rc);
            }
        }
        let (pivot, rc) = self.pivot_from_left(id, sequence)?;
        let node = &self.nodes[id as usize];
        if rc {
            node.out_edge(pivot)
        } else {
            node.in_edge(pivot)
        }
    }

    /// Edge currently slotted where `sequence` would leave from graph right.
    pub fn get_edge_from_right(&self, id: NodeId, sequence: &str) -> Option<EdgeId> {
        if self.palindromic(id) {
            let rc = crate::core::kmer::revcomp(sequence);
            if rc.as_str() < sequence {
                return self.get_edge_from_left(id, &rc);
            }
        }
        let (pivot, rc) = self.pivot_from_right(id, sequence)?;
        let node = &self.nodes[id as usize];
        if rc {
            node.in_edge(pivot)
        } else {
            node.out_edge(pivot)
        }
    }
}
