//! Streaming compactor: per-sequence local repair of the compact graph.
//!
//! An update runs in five phases: gather the disturbed k-mer set, classify
//! induced high-degree nodes, assemble outward from each induced node,
//! validate or replace the incident edges, and fall back to a pure-linear
//! rebuild when no branch points were touched. Repair is local: only edges
//! incident to disturbed k-mers are consulted or altered, and the result
//! matches a from-scratch rebuild over the oracle's k-mer set.

use crate::assembly::assembler::SegmentAssembler;
use crate::core::errors::EngineError;
use crate::core::kmer::{complement, Kmer, KmerCodec, KmerScanner};
use crate::graph::edge::{CompactEdge, EdgeMeta, EdgeStore};
use crate::graph::node::{CompactNode, NodeStore};
use crate::graph::{EdgeId, NodeId};
use crate::oracle::cursor::{Direction, DirectedCursor};
use crate::oracle::KmerOracle;
use crate::utils::configuration::{CompactorConfig, IslandPolicy};
use crate::Result;
use ahash::AHashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

pub struct StreamingCompactor<O: KmerOracle> {
    config: CompactorConfig,
    codec: KmerCodec,
    graph: Arc<O>,
    nodes: NodeStore,
    edges: EdgeStore,
    n_sequences_added: u64,
}

impl<O: KmerOracle> StreamingCompactor<O> {
    /// Bind a compactor to an oracle. The oracle must share the configured
    /// word length; a mismatch is fatal here rather than later.
    pub fn new(graph: Arc<O>, config: CompactorConfig) -> Result<Self> {
        config.validate()?;
        if graph.ksize() != config.k {
            return Err(EngineError::OracleMismatch {
                oracle_k: graph.ksize(),
                engine_k: config.k,
            }
            .into());
        }
        let codec = graph.codec();
        Ok(Self {
            nodes: NodeStore::new(codec),
            edges: EdgeStore::new(codec, config.tag_density),
            config,
            codec,
            graph,
            n_sequences_added: 0,
        })
    }

    pub fn config(&self) -> &CompactorConfig {
        &self.config
    }

    pub fn graph(&self) -> &Arc<O> {
        &self.graph
    }

    pub fn n_nodes(&self) -> u64 {
        self.nodes.n_nodes()
    }

    pub fn n_edges(&self) -> u64 {
        self.edges.n_edges()
    }

    /// Monotone update clock: node creations, edge builds/deletes, and slot
    /// changes all tick it.
    pub fn n_updates(&self) -> u64 {
        self.nodes.n_updates() + self.edges.n_updates()
    }

    pub fn n_sequences_added(&self) -> u64 {
        self.n_sequences_added
    }

    pub fn get_node_by_kmer(&self, kmer: &str) -> Result<Option<&CompactNode>> {
        let encoded = self.codec.encode(kmer)?;
        Ok(self.nodes.get_by_kmer(encoded.canonical()))
    }

    pub fn get_node_by_id(&self, id: NodeId) -> Option<&CompactNode> {
        self.nodes.get_by_id(id)
    }

    /// Existing nodes along `sequence`, in sweep order.
    pub fn get_nodes(&self, sequence: &str) -> Result<Vec<&CompactNode>> {
        self.nodes.get_nodes(sequence)
    }

    pub fn get_edge(&self, tag: u64) -> Option<&CompactEdge> {
        self.edges.get_edge(tag)
    }

    pub fn get_edge_by_id(&self, id: EdgeId) -> Option<&CompactEdge> {
        self.edges.get_edge_by_id(id)
    }

    pub fn get_edge_from_tags(&self, tags: &AHashSet<u64>) -> Option<&CompactEdge> {
        self.edges.get_edge_from_tags(tags)
    }

    pub fn get_tag_edge_pair(&self, tag: u64) -> Option<(u64, EdgeId)> {
        self.edges.get_tag_edge_pair(tag)
    }

    pub fn node_store(&self) -> &NodeStore {
        &self.nodes
    }

    pub fn edge_store(&self) -> &EdgeStore {
        &self.edges
    }

    pub fn iter_nodes(&self) -> impl Iterator<Item = &CompactNode> {
        self.nodes.iter()
    }

    pub fn iter_edges(&self) -> impl Iterator<Item = &CompactEdge> {
        self.edges.iter()
    }

    /// Feed a sequence to the oracle without touching the graph. Returns the
    /// number of previously-unseen k-mers.
    pub fn consume_sequence(&mut self, sequence: &str) -> Result<u64> {
        let normalized = self.codec.check_sequence(sequence)?;
        let before = self.graph.n_unique_kmers();
        self.graph.consume_string(&normalized)?;
        Ok(self.graph.n_unique_kmers() - before)
    }

    /// Feed a sequence to the oracle and repair the compact graph around it.
    /// Returns the number of update events; a sequence introducing no new
    /// k-mers returns 0 and changes nothing.
    pub fn consume_sequence_and_update(&mut self, sequence: &str) -> Result<u64> {
        let normalized = self.codec.check_sequence(sequence)?;
        let before = self.graph.n_unique_kmers();
        self.graph.consume_string(&normalized)?;
        if self.graph.n_unique_kmers() > before {
            self.update(&normalized)
        } else {
            Ok(0)
        }
    }

    /// Repair the graph around an already-consumed sequence. `sequence` must
    /// be validated uppercase ACGT of at least `k` bases.
    pub fn update(&mut self, sequence: &str) -> Result<u64> {
        self.n_sequences_added += 1;
        let updates_before = self.n_updates();
        if self.config.update_debug {
            debug!(sequence, "updating compact graph");
        }

        // Phase 1: every k-mer of the sequence, plus the outside neighbors
        // of its two flanking k-mers, may have changed incidence.
        let kmers: Vec<Kmer> = KmerScanner::new(self.codec, sequence)?.collect();
        let (first, last) = match (kmers.first(), kmers.last()) {
            (Some(&f), Some(&l)) => (f, l),
            _ => {
                return Err(EngineError::InvalidSequence {
                    reason: "sequence yields no k-mers".to_string(),
                }
                .into())
            }
        };
        let mut disturbed: Vec<Kmer> = Vec::with_capacity(kmers.len() + 8);
        let mut flank = Vec::new();
        self.graph.left_neighbors(first, &mut flank);
        disturbed.extend_from_slice(&flank);
        disturbed.extend_from_slice(&kmers);
        self.graph.right_neighbors(last, &mut flank);
        disturbed.extend_from_slice(&flank);

        // Phase 2: split the disturbed high-degree k-mers into induced
        // (newly promoted, or holding stale slots) and merely disturbed.
        let mut induced: Vec<Kmer> = Vec::new();
        let mut induced_seen: AHashSet<u64> = AHashSet::new();
        let mut valid_hdns: Vec<Kmer> = Vec::new();
        let mut valid_seen: AHashSet<u64> = AHashSet::new();
        for kmer in disturbed {
            let l_degree = self.graph.left_degree(kmer);
            let r_degree = self.graph.right_degree(kmer);
            if l_degree + r_degree <= 2 {
                continue;
            }
            let (node_id, created) = self.nodes.build_or_get(kmer);
            let slot_degree = self
                .nodes
                .get_by_id(node_id)
                .map(|n| n.degree())
                .unwrap_or(0);
            // a palindrome sees every incidence mirrored on both sides, so
            // the oracle reports each of its branches twice
            let expected_slots = if kmer.fwd == kmer.rev {
                (l_degree + r_degree) / 2
            } else {
                l_degree + r_degree
            };
            if created || slot_degree != expected_slots {
                if induced_seen.insert(kmer.canonical()) {
                    induced.push(kmer);
                }
            } else if valid_seen.insert(kmer.canonical()) {
                valid_hdns.push(kmer);
            }
        }
        if self.config.update_debug {
            debug!(
                n_induced = induced.len(),
                n_valid = valid_hdns.len(),
                "classified disturbed high-degree k-mers"
            );
        }

        // Phase 5 (early): no branch points anywhere near the sequence, so
        // it extended a tip or fused tips into one linear segment.
        if induced.is_empty() && valid_hdns.is_empty() {
            self.update_linear(sequence)?;
            return Ok(self.n_updates() - updates_before);
        }
        // Only already-valid nodes were disturbed: re-check them anyway.
        if induced.is_empty() {
            induced = valid_hdns;
        }

        // Phases 3 + 4: rebuild outward from every induced node.
        for root in induced {
            self.repair_from_root(root, Direction::Left)?;
            self.repair_from_root(root, Direction::Right)?;
        }

        Ok(self.n_updates() - updates_before)
    }

    /// Assemble away from `root_kmer` through each neighbor on `direction`,
    /// keep incident edges that still describe the oracle, and replace the
    /// rest.
    fn repair_from_root(&mut self, root_kmer: Kmer, direction: Direction) -> Result<()> {
        let graph = Arc::clone(&self.graph);
        let root_id = self
            .nodes
            .get_id_by_kmer(root_kmer.canonical())
            .ok_or_else(|| {
                EngineError::CorruptIndex(format!(
                    "repair root {:#018x} was never materialized",
                    root_kmer.canonical()
                ))
            })?;
        let (root_front, root_back) = {
            let node = self.nodes.get_by_id(root_id).ok_or_else(|| {
                EngineError::CorruptIndex(format!("node {root_id} missing from arena"))
            })?;
            let bytes = node.sequence.as_bytes();
            (bytes[0], bytes[bytes.len() - 1])
        };

        let assembler = SegmentAssembler::new(self.codec);
        let mut neighbors = Vec::new();
        match direction {
            Direction::Left => graph.left_neighbors(root_kmer, &mut neighbors),
            Direction::Right => graph.right_neighbors(root_kmer, &mut neighbors),
        }
        if self.config.update_debug {
            debug!(
                root = root_id,
                ?direction,
                n_neighbors = neighbors.len(),
                "repairing from induced node"
            );
        }

        for neighbor in neighbors {
            let mut cursor = DirectedCursor::new_compacting(graph.as_ref(), neighbor, direction);
            let mut segment = assembler.assemble_directed(&mut cursor);

            // Terminate the segment with the root's pivot base so it spans
            // exactly far-end .. root (or root .. far-end).
            match direction {
                Direction::Left => {
                    if self.nodes.is_rc_from_left(root_id, &segment) {
                        segment.push(complement(root_front) as char);
                    } else {
                        segment.push(root_back as char);
                    }
                }
                Direction::Right => {
                    if self.nodes.is_rc_from_right(root_id, &segment) {
                        segment.insert(0, complement(root_back) as char);
                    } else {
                        segment.insert(0, root_front as char);
                    }
                }
            }
            if self.config.update_debug {
                debug!(segment = %segment, len = segment.len(), "assembled segment");
            }

            self.drop_covered_islands(&segment)?;

            let far_id = self.nodes.get_id_by_kmer(cursor.cursor.canonical());
            let (root_slot, far_slot) = match direction {
                Direction::Left => (
                    self.nodes.get_edge_from_left(root_id, &segment),
                    far_id.and_then(|id| self.nodes.get_edge_from_right(id, &segment)),
                ),
                Direction::Right => (
                    self.nodes.get_edge_from_right(root_id, &segment),
                    far_id.and_then(|id| self.nodes.get_edge_from_left(id, &segment)),
                ),
            };

            match (root_slot, far_slot) {
                (Some(existing), Some(far_existing)) => {
                    if existing == far_existing
                        && self.segment_matches(root_id, far_id, existing, &segment)
                    {
                        continue;
                    }
                    Self::drop_edge(&mut self.nodes, &mut self.edges, existing);
                    if far_existing != existing {
                        Self::drop_edge(&mut self.nodes, &mut self.edges, far_existing);
                    }
                }
                (Some(existing), None) => {
                    if self.segment_matches(root_id, far_id, existing, &segment) {
                        continue;
                    }
                    Self::drop_edge(&mut self.nodes, &mut self.edges, existing);
                }
                (None, Some(far_existing)) => {
                    // nothing leaves the root here, so the far edge is stale
                    Self::drop_edge(&mut self.nodes, &mut self.edges, far_existing);
                }
                (None, None) => {}
            }

            let (in_id, out_id) = match direction {
                Direction::Left => (far_id, Some(root_id)),
                Direction::Right => (Some(root_id), far_id),
            };
            let meta = Self::deduce_edge_meta(in_id, out_id, segment.len(), self.codec.k());
            let edge_id = self.edges.build_edge(in_id, out_id, meta, segment.clone());
            if let Some(far) = far_id {
                match direction {
                    Direction::Left => {
                        self.nodes.add_edge_from_right(far, edge_id, &segment)?;
                    }
                    Direction::Right => {
                        self.nodes.add_edge_from_left(far, edge_id, &segment)?;
                    }
                }
            }
            match direction {
                Direction::Left => {
                    self.nodes.add_edge_from_left(root_id, edge_id, &segment)?;
                }
                Direction::Right => {
                    self.nodes.add_edge_from_right(root_id, edge_id, &segment)?;
                }
            }
        }
        Ok(())
    }

    /// Pure-linear repair: assemble through the first k-mer in both
    /// directions, drop whatever stale edges hang off the end nodes, and
    /// lay down one replacement segment.
    fn update_linear(&mut self, sequence: &str) -> Result<()> {
        if self.config.update_debug {
            debug!("no induced nodes, linear update");
        }
        let graph = Arc::clone(&self.graph);
        let k = self.codec.k();
        let root = self.codec.encode(&sequence[..k])?;

        let assembler = SegmentAssembler::new(self.codec);
        let mut lcursor = DirectedCursor::new_compacting(graph.as_ref(), root, Direction::Left);
        let mut rcursor = DirectedCursor::new_compacting(graph.as_ref(), root, Direction::Right);
        let left_seq = assembler.assemble_directed(&mut lcursor);
        let right_seq = assembler.assemble_directed(&mut rcursor);
        let mut segment = left_seq;
        segment.push_str(&right_seq[k..]);

        self.drop_covered_islands(&segment)?;

        let left_id = self.nodes.get_id_by_kmer(lcursor.cursor.canonical());
        let right_id = self.nodes.get_id_by_kmer(rcursor.cursor.canonical());

        let left_edge = left_id.and_then(|id| self.nodes.get_edge_from_right(id, &segment));
        let right_edge = right_id.and_then(|id| self.nodes.get_edge_from_left(id, &segment));
        if let Some(edge) = left_edge {
            Self::drop_edge(&mut self.nodes, &mut self.edges, edge);
        }
        if let Some(edge) = right_edge {
            if left_edge != Some(edge) {
                Self::drop_edge(&mut self.nodes, &mut self.edges, edge);
            }
        }

        let meta = Self::deduce_edge_meta(left_id, right_id, segment.len(), k);
        if meta == EdgeMeta::Island && matches!(self.config.island_policy, IslandPolicy::Skip) {
            if self.config.update_debug {
                debug!(len = segment.len(), "island segment skipped by policy");
            }
            return Ok(());
        }

        let edge_id = self.edges.build_edge(left_id, right_id, meta, segment.clone());
        if let Some(id) = left_id {
            self.nodes.add_edge_from_right(id, edge_id, &segment)?;
        }
        if let Some(id) = right_id {
            self.nodes.add_edge_from_left(id, edge_id, &segment)?;
        }
        Ok(())
    }

    /// Under the emitting island policy, any island whose tag falls inside a
    /// freshly assembled segment has been overtaken by that segment.
    fn drop_covered_islands(&mut self, segment: &str) -> Result<()> {
        if !matches!(self.config.island_policy, IslandPolicy::Emit) {
            return Ok(());
        }
        let mut victims: AHashSet<EdgeId> = AHashSet::new();
        for kmer in KmerScanner::new(self.codec, segment)? {
            if let Some((_, edge_id)) = self.edges.get_tag_edge_pair(kmer.canonical()) {
                if self
                    .edges
                    .get_edge_by_id(edge_id)
                    .is_some_and(|e| e.meta == EdgeMeta::Island)
                {
                    victims.insert(edge_id);
                }
            }
        }
        for edge_id in victims {
            Self::drop_edge(&mut self.nodes, &mut self.edges, edge_id);
        }
        Ok(())
    }

    fn drop_edge(nodes: &mut NodeStore, edges: &mut EdgeStore, id: EdgeId) {
        if let Some(edge) = edges.delete_edge(id) {
            nodes.unlink_edge(&edge);
        }
    }

    /// Does `edge` still describe the segment just assembled between the
    /// root and `far_id`?
    fn segment_matches(
        &self,
        root_id: NodeId,
        far_id: Option<NodeId>,
        edge_id: EdgeId,
        segment: &str,
    ) -> bool {
        let Some(edge) = self.edges.get_edge_by_id(edge_id) else {
            return false;
        };
        match edge.meta {
            EdgeMeta::Tip => {
                far_id.is_none()
                    && (edge.in_node_id == Some(root_id) || edge.out_node_id == Some(root_id))
                    && edge.sequence.len() == segment.len()
            }
            EdgeMeta::Full | EdgeMeta::Trivial => {
                let Some(far) = far_id else {
                    return false;
                };
                let endpoints_match = (edge.in_node_id == Some(root_id)
                    && edge.out_node_id == Some(far))
                    || (edge.out_node_id == Some(root_id) && edge.in_node_id == Some(far));
                endpoints_match && edge.sequence.len() == segment.len()
            }
            EdgeMeta::Island => false,
        }
    }

    fn deduce_edge_meta(
        in_id: Option<NodeId>,
        out_id: Option<NodeId>,
        segment_len: usize,
        k: usize,
    ) -> EdgeMeta {
        match (in_id, out_id) {
            (None, None) => EdgeMeta::Island,
            (Some(_), Some(_)) => {
                if segment_len == k + 1 {
                    EdgeMeta::Trivial
                } else {
                    EdgeMeta::Full
                }
            }
            _ => EdgeMeta::Tip,
        }
    }

    /// Structural audit of the node/edge cross-references and the tag
    /// index. Any violation is a `CorruptIndex`.
    pub fn check_consistency(&self) -> Result<()> {
        self.edges.check_tag_index()?;
        for edge in self.edges.iter() {
            for endpoint in [edge.in_node_id, edge.out_node_id].into_iter().flatten() {
                let node = self.nodes.get_by_id(endpoint).ok_or_else(|| {
                    EngineError::CorruptIndex(format!(
                        "edge {} references missing node {endpoint}",
                        edge.edge_id
                    ))
                })?;
                let expected = [edge.in_node_id, edge.out_node_id]
                    .iter()
                    .filter(|&&e| e == Some(endpoint))
                    .count();
                let held = node
                    .slots()
                    .filter(|(_, _, held)| *held == edge.edge_id)
                    .count();
                if held != expected {
                    return Err(EngineError::CorruptIndex(format!(
                        "edge {} occupies {held} slots of node {endpoint}, expected {expected}",
                        edge.edge_id
                    ))
                    .into());
                }
            }
        }
        for node in self.nodes.iter() {
            for (_, _, edge_id) in node.slots() {
                let edge = self.edges.get_edge_by_id(edge_id).ok_or_else(|| {
                    EngineError::CorruptIndex(format!(
                        "node {} slot points at dead edge {edge_id}",
                        node.node_id
                    ))
                })?;
                if edge.in_node_id != Some(node.node_id) && edge.out_node_id != Some(node.node_id)
                {
                    return Err(EngineError::CorruptIndex(format!(
                        "node {} holds edge {edge_id} that does not end on it",
                        node.node_id
                    ))
                    .into());
                }
            }
        }
        Ok(())
    }

    pub fn write_gml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        crate::utils::format_writers::write_gml(self.nodes.iter(), self.edges.iter(), path)
    }

    pub fn write_fasta<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        crate::utils::format_writers::write_fasta(self.edges.iter(), path)
    }

    /// Convert to a petgraph for downstream algorithms. Only edges with two
    /// concrete endpoints appear; tips and islands have no vertex to attach
    /// to on the missing side.
    pub fn as_petgraph(
        &self,
    ) -> petgraph::Graph<crate::utils::format_writers::HdnWeight, crate::utils::format_writers::UnitigWeight>
    {
        crate::utils::format_writers::compact_graph_to_petgraph(self.nodes.iter(), self.edges.iter())
    }

    pub fn report(&self) {
        info!(
            n_nodes = self.n_nodes(),
            n_edges = self.n_edges(),
            n_updates = self.n_updates(),
            n_sequences_added = self.n_sequences_added,
            "🧬 compact graph status"
        );
    }
}
