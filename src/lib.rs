//! # unitig-forge — streaming compact de Bruijn graph engine
//!
//! Maintains a *compact* de Bruijn graph online: vertices are the
//! high-degree k-mers (HDNs) induced by the sequence stream, edges are the
//! maximal non-branching unitigs between them. Each consumed sequence
//! mutates a probabilistic k-mer membership oracle and triggers a local
//! repair of the compact graph, so the structure always matches what a
//! from-scratch rebuild over the oracle's k-mer set would produce.
//!
//! The crate also ships a streaming partitioner that tracks disjoint
//! connected components over a sparse tag set as sequences arrive.

pub mod assembly;
pub mod core;
pub mod graph;
pub mod oracle;
pub mod partition;
pub mod utils;

// Re-export the working set most callers need
pub use crate::assembly::compactor::StreamingCompactor;
pub use crate::core::errors::EngineError;
pub use crate::core::kmer::{Kmer, KmerCodec, KmerScanner};
pub use crate::graph::edge::{CompactEdge, EdgeMeta};
pub use crate::graph::node::CompactNode;
pub use crate::oracle::{CountingOracle, KmerOracle};
pub use crate::partition::StreamingPartitioner;
pub use crate::utils::configuration::{CompactorConfig, IslandPolicy, PartitionerConfig};

/// Result type used throughout the crate
pub type Result<T> = anyhow::Result<T>;

/// Error type used throughout the crate
pub type Error = anyhow::Error;
