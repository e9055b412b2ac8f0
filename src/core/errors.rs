use thiserror::Error;

/// Typed failure kinds surfaced by the engine.
///
/// These convert into `anyhow::Error` at the public surface; callers that
/// need to branch on the kind can downcast. `InvalidSequence` leaves all
/// engine state untouched. `CorruptIndex` means an internal invariant was
/// violated and the graph can no longer be trusted; the engine never retries
/// after one.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Non-ACGT character, or sequence shorter than `k`.
    #[error("invalid sequence: {reason}")]
    InvalidSequence { reason: String },

    /// Oracle was built with a different word length than the engine.
    #[error("oracle k-mer size {oracle_k} does not match engine k-mer size {engine_k}")]
    OracleMismatch { oracle_k: usize, engine_k: usize },

    /// Internal bookkeeping inconsistency (dangling tag pointer, slot that
    /// does not point back at its endpoint, counter drift).
    #[error("corrupt graph index: {0}")]
    CorruptIndex(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_is_single_line() {
        let err = EngineError::OracleMismatch {
            oracle_k: 21,
            engine_k: 31,
        };
        let msg = err.to_string();
        assert!(msg.contains("21"));
        assert!(msg.contains("31"));
        assert!(!msg.contains('\n'));
    }
}
