//! Unitig assembly: the directed linear assembler and the streaming
//! compactor that drives per-sequence graph repair.

pub mod assembler;
pub mod compactor;

pub use assembler::SegmentAssembler;
pub use compactor::StreamingCompactor;
