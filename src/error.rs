use thiserror::Error;

use crate::memory::region::RegionError;
use crate::state::StateError;

/// Failures raised by [`Heap`](crate::memory::Heap) operations.
///
/// Every variant names the heap it came from so the owning subsystem can
/// report which guest region failed without extra bookkeeping.
#[derive(Debug, Error)]
pub enum HeapError {
    #[error("heap '{heap}': allocate called with alignment {align}, which is not zero or a power of two")]
    InvalidAlignment { heap: String, align: u64 },

    #[error("heap '{heap}': aligning {used} bytes to {align} overflows the {capacity}-byte capacity")]
    AlignmentOverflow {
        heap: String,
        align: u64,
        used: u64,
        capacity: u64,
    },

    #[error("heap '{heap}': allocating {requested} bytes at offset {used} exceeds the {capacity}-byte capacity")]
    CapacityExceeded {
        heap: String,
        requested: u64,
        used: u64,
        capacity: u64,
    },

    #[error("heap '{heap}': allocate rejected, the heap is sealed")]
    SealedHeapMutation { heap: String },

    #[error("heap '{heap}': seal rejected, the heap is already sealed")]
    ReSeal { heap: String },

    #[error("heap '{heap}': state record belongs to heap '{found}'")]
    NameMismatch { heap: String, found: String },

    #[error("heap '{heap}': state record holds {used} bytes but capacity is {capacity}")]
    OversizedState {
        heap: String,
        used: u64,
        capacity: u64,
    },

    /// The sealed content digest in the state record does not match the one
    /// captured at seal time. This signals that the replay was seeded with
    /// different deterministic content (for example a different image), not
    /// that the stream itself is corrupt.
    #[error("heap '{heap}': sealed content digest mismatch; the restored session was seeded with different content")]
    HashMismatch { heap: String },

    #[error("heap '{heap}': region failure during {op}")]
    Region {
        heap: String,
        op: &'static str,
        #[source]
        source: RegionError,
    },

    #[error("heap '{heap}': state stream failure during {op}")]
    State {
        heap: String,
        op: &'static str,
        #[source]
        source: StateError,
    },
}

pub type HeapResult<T> = Result<T, HeapError>;
