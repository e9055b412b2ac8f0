//! Core k-mer model shared by the oracle, the compactor, and the partitioner.

pub mod errors;
pub mod kmer;

pub use errors::EngineError;
pub use kmer::{Kmer, KmerCodec, KmerScanner};
