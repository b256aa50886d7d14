//! Guest memory: the reserved region and the grow-only heap on top of it.

pub mod heap;
pub mod region;

pub use heap::Heap;
pub use region::{MemoryRegion, Permission, RegionError};
