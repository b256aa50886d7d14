//! Named, inspectable heaps for a deterministically-replayable guest.
//!
//! A [`Heap`] is a grow-only bump allocator inside a single fixed-capacity
//! reserved address range. Allocations widen the read-write window over the
//! allocated prefix; [`Heap::seal`] freezes the whole range read-only and
//! captures a content digest; [`Heap::save_state`] and [`Heap::load_state`]
//! persist or restore the heap, snapshotting content while growing and
//! verifying the digest once sealed.

pub mod error;
pub mod hash;
pub mod memory;
pub mod state;

pub use error::{HeapError, HeapResult};
pub use hash::{ContentHasher, Sha256Hasher, DIGEST_LEN};
pub use memory::{Heap, MemoryRegion, Permission, RegionError};
pub use state::{StateError, StateReader, StateWriter};
