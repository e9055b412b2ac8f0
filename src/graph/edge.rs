//! Compact-edge store: ID-keyed unitig records plus the tag→edge index.

use crate::core::kmer::{revcomp, KmerCodec};
use crate::graph::{EdgeId, NodeId};
use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Shape classification of a compact edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeMeta {
    /// Both endpoints are high-degree nodes.
    Full,
    /// Exactly one endpoint exists; the other end dangles.
    Tip,
    /// No endpoints at all.
    Island,
    /// Full, with the two endpoint nodes directly adjacent (length `k+1`).
    Trivial,
}

impl fmt::Display for EdgeMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let repr = match self {
            EdgeMeta::Full => "FULL",
            EdgeMeta::Tip => "TIP",
            EdgeMeta::Island => "ISLAND",
            EdgeMeta::Trivial => "TRIVIAL",
        };
        f.write_str(repr)
    }
}

/// A maximal non-branching unitig between two (possibly missing) endpoints.
///
/// The sequence spans the whole unitig, endpoint k-mers included where the
/// endpoints exist.
#[derive(Debug, Clone)]
pub struct CompactEdge {
    pub edge_id: EdgeId,
    pub in_node_id: Option<NodeId>,
    pub out_node_id: Option<NodeId>,
    pub meta: EdgeMeta,
    pub sequence: String,
    /// Canonical hashes of interior k-mers planted as lookup tags.
    pub tags: AHashSet<u64>,
}

impl CompactEdge {
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// The edge read on the opposite strand.
    pub fn rc_sequence(&self) -> String {
        revcomp(&self.sequence)
    }

    /// Observed bases-per-tag spacing. Edges short enough to carry no tags
    /// report infinity.
    pub fn tag_spacing(&self) -> f32 {
        if self.tags.is_empty() {
            f32::INFINITY
        } else {
            self.sequence.len() as f32 / self.tags.len() as f32
        }
    }

    /// Debug rendering interleaving tag positions with the sequence.
    pub fn tag_viz(&self, codec: KmerCodec) -> String {
        let k = codec.k();
        let mut out = format!("L={} ", self.sequence.len());
        let bytes = self.sequence.as_bytes();
        for pos in 0..=self.sequence.len().saturating_sub(k) {
            if let Ok(kmer) = codec.encode(&self.sequence[pos..pos + k]) {
                if self.tags.contains(&kmer.canonical()) {
                    out.push_str(&format!("({pos})"));
                }
            }
            out.push(bytes[pos] as char);
        }
        out
    }
}

impl fmt::Display for CompactEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<CompactEdge id={} in={:?} out={:?} length={} meta={} n_tags={}>",
            self.edge_id,
            self.in_node_id,
            self.out_node_id,
            self.sequence.len(),
            self.meta,
            self.tags.len()
        )
    }
}

/// Owner of all live compact edges and the tag→edge index.
///
/// Edge IDs are drawn from the store's monotone update counter, so an ID
/// doubles as a creation timestamp and is never reused.
pub struct EdgeStore {
    codec: KmerCodec,
    tag_density: u32,
    edges: AHashMap<EdgeId, CompactEdge>,
    tags_to_edges: AHashMap<u64, EdgeId>,
    n_compact_edges: u64,
    n_updates: u64,
}

impl EdgeStore {
    pub fn new(codec: KmerCodec, tag_density: u32) -> Self {
        Self {
            codec,
            tag_density: tag_density.max(1),
            edges: AHashMap::new(),
            tags_to_edges: AHashMap::new(),
            n_compact_edges: 0,
            n_updates: 0,
        }
    }

    pub fn n_edges(&self) -> u64 {
        self.n_compact_edges
    }

    pub fn n_updates(&self) -> u64 {
        self.n_updates
    }

    pub fn n_tags(&self) -> usize {
        self.tags_to_edges.len()
    }

    pub fn tag_density(&self) -> u32 {
        self.tag_density
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompactEdge> {
        self.edges.values()
    }

    /// Allocate a new edge, planting interior tags at the configured
    /// density. A hash already owned by a live edge is never re-planted, so
    /// the tag index stays a partial function onto live edges.
    pub fn build_edge(
        &mut self,
        in_node_id: Option<NodeId>,
        out_node_id: Option<NodeId>,
        meta: EdgeMeta,
        sequence: String,
    ) -> EdgeId {
        let edge_id = self.n_updates;
        let mut tags = self.plant_tags(edge_id, &sequence);
        if meta == EdgeMeta::Island && tags.is_empty() {
            // islands have no endpoint slots; a tag is their only handle,
            // so short ones get their middle k-mer regardless of density
            self.plant_middle_tag(edge_id, &sequence, &mut tags);
        }
        let edge = CompactEdge {
            edge_id,
            in_node_id,
            out_node_id,
            meta,
            sequence,
            tags,
        };
        tracing::debug!(edge = %edge, "built compact edge");
        self.edges.insert(edge_id, edge);
        self.n_compact_edges += 1;
        self.n_updates += 1;
        edge_id
    }

    fn plant_tags(&mut self, edge_id: EdgeId, sequence: &str) -> AHashSet<u64> {
        let k = self.codec.k();
        let mut tags = AHashSet::new();
        if sequence.len() < k + 2 {
            // no interior k-mer to tag
            return tags;
        }
        let n_kmers = sequence.len() - k + 1;
        let mut pos = self.tag_density as usize;
        while pos < n_kmers - 1 {
            if let Ok(kmer) = self.codec.encode(&sequence[pos..pos + k]) {
                let hash = kmer.canonical();
                if !self.tags_to_edges.contains_key(&hash) {
                    self.tags_to_edges.insert(hash, edge_id);
                    tags.insert(hash);
                }
            }
            pos += self.tag_density as usize;
        }
        tags
    }

    fn plant_middle_tag(&mut self, edge_id: EdgeId, sequence: &str, tags: &mut AHashSet<u64>) {
        let k = self.codec.k();
        if sequence.len() < k {
            return;
        }
        let n_kmers = sequence.len() - k + 1;
        let pos = n_kmers / 2;
        if let Ok(kmer) = self.codec.encode(&sequence[pos..pos + k]) {
            let hash = kmer.canonical();
            if !self.tags_to_edges.contains_key(&hash) {
                self.tags_to_edges.insert(hash, edge_id);
                tags.insert(hash);
            }
        }
    }

    pub fn get_edge_by_id(&self, id: EdgeId) -> Option<&CompactEdge> {
        self.edges.get(&id)
    }

    /// Edge owning `tag`, if any.
    pub fn get_edge(&self, tag: u64) -> Option<&CompactEdge> {
        self.tags_to_edges
            .get(&tag)
            .and_then(|id| self.edges.get(id))
    }

    pub fn get_tag_edge_pair(&self, tag: u64) -> Option<(u64, EdgeId)> {
        self.tags_to_edges.get(&tag).map(|&id| (tag, id))
    }

    /// First edge owning any tag of `tags`.
    pub fn get_edge_from_tags(&self, tags: &AHashSet<u64>) -> Option<&CompactEdge> {
        tags.iter().find_map(|&tag| self.get_edge(tag))
    }

    /// Drop an edge, scrubbing exactly the tag entries it owns. Returns the
    /// removed record so callers can unlink its endpoints.
    pub fn delete_edge(&mut self, id: EdgeId) -> Option<CompactEdge> {
        let edge = self.edges.remove(&id)?;
        for tag in &edge.tags {
            if self.tags_to_edges.get(tag) == Some(&id) {
                self.tags_to_edges.remove(tag);
            }
        }
        self.n_compact_edges -= 1;
        self.n_updates += 1;
        tracing::debug!(edge = %edge, "deleted compact edge");
        Some(edge)
    }

    pub fn delete_edge_by_tag(&mut self, tag: u64) -> Option<CompactEdge> {
        let id = *self.tags_to_edges.get(&tag)?;
        self.delete_edge(id)
    }

    /// Internal audit: every tag entry must point at a live edge that owns
    /// it, and the edge counter must match the map.
    pub fn check_tag_index(&self) -> crate::Result<()> {
        if self.n_compact_edges != self.edges.len() as u64 {
            return Err(crate::core::errors::EngineError::CorruptIndex(format!(
                "edge counter {} disagrees with edge map size {}",
                self.n_compact_edges,
                self.edges.len()
            ))
            .into());
        }
        for (&tag, &id) in &self.tags_to_edges {
            let owner = self.edges.get(&id).ok_or_else(|| {
                crate::core::errors::EngineError::CorruptIndex(format!(
                    "tag {tag:#x} points at missing edge {id}"
                ))
            })?;
            if !owner.tags.contains(&tag) {
                return Err(crate::core::errors::EngineError::CorruptIndex(format!(
                    "tag {tag:#x} points at edge {id} which does not own it"
                ))
                .into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(tag_density: u32) -> EdgeStore {
        EdgeStore::new(KmerCodec::new(5).unwrap(), tag_density)
    }

    #[test]
    fn test_build_and_counters() {
        let mut edges = store(40);
        let a = edges.build_edge(None, None, EdgeMeta::Island, "GATTACAGAT".to_string());
        let b = edges.build_edge(Some(0), None, EdgeMeta::Tip, "ACCTGGATCC".to_string());
        assert_eq!(edges.n_edges(), 2);
        assert!(b > a, "edge ids are monotone");
        assert_eq!(edges.get_edge_by_id(a).unwrap().meta, EdgeMeta::Island);
    }

    #[test]
    fn test_tags_are_interior_and_dense() {
        let mut edges = store(1);
        let id = edges.build_edge(None, None, EdgeMeta::Island, "GATTACAGATC".to_string());
        let edge = edges.get_edge_by_id(id).unwrap();
        // 7 k-mers; endpoints excluded leaves 5 interior positions
        assert_eq!(edge.tags.len(), 5);
        let codec = KmerCodec::new(5).unwrap();
        let first = codec.encode("GATTA").unwrap().canonical();
        let last = codec.encode("AGATC").unwrap().canonical();
        assert!(!edge.tags.contains(&first));
        assert!(!edge.tags.contains(&last));
        assert!(edges.check_tag_index().is_ok());
    }

    #[test]
    fn test_tag_lookup_round_trip() {
        let mut edges = store(1);
        let id = edges.build_edge(None, None, EdgeMeta::Island, "GATTACAGATC".to_string());
        let codec = KmerCodec::new(5).unwrap();
        let interior = codec.encode("ATTAC").unwrap().canonical();
        assert_eq!(edges.get_edge(interior).unwrap().edge_id, id);
        assert_eq!(edges.get_tag_edge_pair(interior), Some((interior, id)));

        let mut probe = AHashSet::new();
        probe.insert(codec.encode("GGGGG").unwrap().canonical());
        probe.insert(interior);
        assert_eq!(edges.get_edge_from_tags(&probe).unwrap().edge_id, id);
    }

    #[test]
    fn test_delete_scrubs_tags() {
        let mut edges = store(1);
        let id = edges.build_edge(None, None, EdgeMeta::Island, "GATTACAGATC".to_string());
        assert!(edges.n_tags() > 0);
        let removed = edges.delete_edge(id).unwrap();
        assert_eq!(removed.edge_id, id);
        assert_eq!(edges.n_edges(), 0);
        assert_eq!(edges.n_tags(), 0);
        assert!(edges.get_edge_by_id(id).is_none());
        assert!(edges.check_tag_index().is_ok());
        // double delete is a no-op
        assert!(edges.delete_edge(id).is_none());
    }

    #[test]
    fn test_no_two_edges_share_a_tag() {
        let mut edges = store(1);
        let a = edges.build_edge(None, None, EdgeMeta::Island, "GATTACAGATC".to_string());
        // same sequence again: all interior hashes are already owned
        let b = edges.build_edge(None, None, EdgeMeta::Island, "GATTACAGATC".to_string());
        let edge_b = edges.get_edge_by_id(b).unwrap();
        assert!(edge_b.tags.is_empty());
        let edge_a = edges.get_edge_by_id(a).unwrap();
        assert!(!edge_a.tags.is_empty());
        assert!(edges.check_tag_index().is_ok());
    }

    #[test]
    fn test_rc_sequence_and_spacing() {
        let mut edges = store(2);
        let id = edges.build_edge(None, None, EdgeMeta::Island, "GATTACAGATC".to_string());
        let edge = edges.get_edge_by_id(id).unwrap();
        assert_eq!(edge.rc_sequence(), "GATCTGTAATC");
        assert!(edge.tag_spacing() > 0.0);
    }

    #[test]
    fn test_short_tips_carry_no_tags() {
        let mut edges = store(1);
        let id = edges.build_edge(None, Some(0), EdgeMeta::Tip, "GATTAC".to_string());
        assert!(edges.get_edge_by_id(id).unwrap().tags.is_empty());
    }

    #[test]
    fn test_islands_always_carry_a_tag() {
        // too short for interior tags at this density, but islands have no
        // endpoint slots, so the middle k-mer is planted anyway
        let mut edges = store(40);
        let id = edges.build_edge(None, None, EdgeMeta::Island, "GATTAC".to_string());
        let edge = edges.get_edge_by_id(id).unwrap();
        assert_eq!(edge.tags.len(), 1);
        let tag = *edge.tags.iter().next().unwrap();
        assert_eq!(edges.get_edge(tag).unwrap().edge_id, id);
    }
}
