use std::io::{Read, Write};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{HeapError, HeapResult};
use crate::hash::{ContentHasher, Sha256Hasher, DIGEST_LEN};
use crate::state::{StateReader, StateWriter};

use super::region::{MemoryRegion, Permission};

#[derive(Debug)]
enum HeapState {
    Growing,
    Sealed { digest: [u8; DIGEST_LEN] },
}

/// Grow-only bump allocator over a reserved guest address range.
///
/// A heap starts in the growing state with every byte inaccessible. Each
/// allocation widens the read-write window over the allocated prefix. Sealing
/// is a one-way transition that makes the entire reservation read-only and
/// captures a digest of the allocated prefix; from then on state records
/// carry the digest instead of the content, because sealed content is
/// reproduced by deterministic re-initialization and only needs verifying.
///
/// Single-owner: no operation is safe to call concurrently on one instance,
/// and the heap performs no internal locking.
pub struct Heap {
    name: String,
    region: MemoryRegion,
    used: u64,
    state: HeapState,
    hasher: Arc<dyn ContentHasher>,
}

impl Heap {
    /// Binds a heap to a reserved region with the default SHA-256 hasher.
    pub fn new(region: MemoryRegion, name: impl Into<String>) -> Self {
        Self::with_hasher(region, name, Arc::new(Sha256Hasher))
    }

    pub fn with_hasher(
        region: MemoryRegion,
        name: impl Into<String>,
        hasher: Arc<dyn ContentHasher>,
    ) -> Self {
        Self {
            name: name.into(),
            region,
            used: 0,
            state: HeapState::Growing,
            hasher,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> u64 {
        self.region.base()
    }

    pub fn capacity(&self) -> u64 {
        self.region.capacity() as u64
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn is_sealed(&self) -> bool {
        matches!(self.state, HeapState::Sealed { .. })
    }

    /// Digest captured at seal time; present exactly when the heap is sealed.
    pub fn digest(&self) -> Option<&[u8; DIGEST_LEN]> {
        match &self.state {
            HeapState::Growing => None,
            HeapState::Sealed { digest } => Some(digest),
        }
    }

    /// Carves `size` bytes out of the reservation and returns their guest
    /// address.
    ///
    /// `align` must be zero or a power of two; values of one or less apply no
    /// alignment. The newly covered bytes become read-write; bytes granted by
    /// earlier allocations are untouched. On any failure nothing is mutated.
    pub fn allocate(&mut self, size: u64, align: u64) -> HeapResult<u64> {
        if self.is_sealed() {
            return Err(HeapError::SealedHeapMutation {
                heap: self.name.clone(),
            });
        }
        if align != 0 && !align.is_power_of_two() {
            return Err(HeapError::InvalidAlignment {
                heap: self.name.clone(),
                align,
            });
        }

        let capacity = self.capacity();
        let rounded = if align > 1 && self.used > 0 {
            // round `used` up to the next multiple of `align`; the `used = 0`
            // case is handled above so the subtraction cannot underflow
            ((self.used - 1) | (align - 1))
                .checked_add(1)
                .filter(|rounded| *rounded <= capacity)
                .ok_or_else(|| HeapError::AlignmentOverflow {
                    heap: self.name.clone(),
                    align,
                    used: self.used,
                    capacity,
                })?
        } else {
            self.used
        };

        let new_used = rounded
            .checked_add(size)
            .filter(|new_used| *new_used <= capacity)
            .ok_or_else(|| HeapError::CapacityExceeded {
                heap: self.name.clone(),
                requested: size,
                used: self.used,
                capacity,
            })?;

        // the grant starts at the old `used`, not at `rounded`, so alignment
        // padding is covered too; seal and save read the whole prefix
        self.region
            .protect(
                self.used as usize,
                (new_used - self.used) as usize,
                Permission::ReadWrite,
            )
            .map_err(|source| self.region_err("allocate", source))?;
        self.used = new_used;
        Ok(self.region.base() + rounded)
    }

    /// Freezes the heap: the whole reservation, including the never-allocated
    /// tail, becomes permanently read-only, and a digest of the allocated
    /// prefix is captured. Irreversible; a second call fails.
    pub fn seal(&mut self) -> HeapResult<()> {
        if self.is_sealed() {
            return Err(HeapError::ReSeal {
                heap: self.name.clone(),
            });
        }
        let content = self
            .region
            .view(0, self.used as usize)
            .map_err(|source| self.region_err("seal", source))?;
        let digest = self.hasher.digest(content);
        self.region
            .protect(0, self.region.capacity(), Permission::Read)
            .map_err(|source| self.region_err("seal", source))?;
        debug!(heap = %self.name, used = self.used, "heap sealed");
        self.state = HeapState::Sealed { digest };
        Ok(())
    }

    /// Writes the heap's state record: name, used byte count, then either the
    /// raw content (growing) or the seal-time digest (sealed).
    pub fn save_state<W: Write>(&self, writer: &mut StateWriter<W>) -> HeapResult<()> {
        writer
            .write_str(&self.name)
            .and_then(|_| writer.write_u64(self.used))
            .map_err(|source| self.state_err("save_state", source))?;
        match &self.state {
            HeapState::Growing => {
                let content = self
                    .region
                    .view(0, self.used as usize)
                    .map_err(|source| self.region_err("save_state", source))?;
                writer
                    .write_bytes(content)
                    .map_err(|source| self.state_err("save_state", source))?;
            }
            HeapState::Sealed { digest } => {
                writer
                    .write_bytes(digest)
                    .map_err(|source| self.state_err("save_state", source))?;
            }
        }
        Ok(())
    }

    /// Restores from a state record written by [`save_state`](Self::save_state).
    ///
    /// The branch taken depends on this heap's own current state, not on the
    /// stream: the caller must reconstruct the heap in the state it was saved
    /// in. A growing heap has its content replaced; a sealed heap keeps its
    /// memory untouched and only verifies the recorded digest.
    pub fn load_state<R: Read>(&mut self, reader: &mut StateReader<R>) -> HeapResult<()> {
        let found = reader
            .read_str()
            .map_err(|source| self.state_err("load_state", source))?;
        if found != self.name {
            return Err(HeapError::NameMismatch {
                heap: self.name.clone(),
                found,
            });
        }
        let used = reader
            .read_u64()
            .map_err(|source| self.state_err("load_state", source))?;
        if used > self.capacity() {
            return Err(HeapError::OversizedState {
                heap: self.name.clone(),
                used,
                capacity: self.capacity(),
            });
        }
        match &self.state {
            HeapState::Growing => {
                // read the payload in full before touching the heap so a
                // truncated stream cannot leave partial content behind
                let content = reader
                    .read_bytes(used as usize)
                    .map_err(|source| self.state_err("load_state", source))?;
                self.region
                    .protect(0, self.region.capacity(), Permission::None)
                    .and_then(|_| {
                        self.region
                            .protect(0, used as usize, Permission::ReadWrite)
                    })
                    .map_err(|source| self.region_err("load_state", source))?;
                let heap = self.name.clone();
                self.region
                    .view_mut(0, used as usize)
                    .map_err(|source| HeapError::Region {
                        heap,
                        op: "load_state",
                        source,
                    })?
                    .copy_from_slice(&content);
                self.used = used;
                debug!(heap = %self.name, used, "growing heap content restored");
            }
            HeapState::Sealed { digest } => {
                let mut recorded = [0u8; DIGEST_LEN];
                reader
                    .read_into(&mut recorded)
                    .map_err(|source| self.state_err("load_state", source))?;
                if recorded != *digest {
                    warn!(heap = %self.name, "sealed digest mismatch on restore");
                    return Err(HeapError::HashMismatch {
                        heap: self.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Readable view of `len` bytes at a guest address inside this heap.
    pub fn view(&self, addr: u64, len: u64) -> HeapResult<&[u8]> {
        let offset = self.offset_of(addr, len)?;
        self.region
            .view(offset, len as usize)
            .map_err(|source| self.region_err("view", source))
    }

    /// Writable view of `len` bytes at a guest address. Fails once sealed,
    /// since sealed pages no longer allow writes.
    pub fn view_mut(&mut self, addr: u64, len: u64) -> HeapResult<&mut [u8]> {
        let offset = self.offset_of(addr, len)?;
        let heap = self.name.clone();
        self.region
            .view_mut(offset, len as usize)
            .map_err(|source| HeapError::Region {
                heap,
                op: "view_mut",
                source,
            })
    }

    /// Releases the underlying reservation. Safe to call more than once.
    pub fn release(&mut self) {
        self.region.release();
    }

    fn offset_of(&self, addr: u64, len: u64) -> HeapResult<usize> {
        addr.checked_sub(self.region.base())
            .filter(|offset| offset.checked_add(len).is_some_and(|end| end <= self.capacity()))
            .map(|offset| offset as usize)
            .ok_or_else(|| HeapError::Region {
                heap: self.name.clone(),
                op: "view",
                source: super::region::RegionError::OutOfRange {
                    offset: addr.wrapping_sub(self.region.base()),
                    len,
                    capacity: self.capacity(),
                },
            })
    }

    fn region_err(&self, op: &'static str, source: super::region::RegionError) -> HeapError {
        HeapError::Region {
            heap: self.name.clone(),
            op,
            source,
        }
    }

    fn state_err(&self, op: &'static str, source: crate::state::StateError) -> HeapError {
        HeapError::State {
            heap: self.name.clone(),
            op,
            source,
        }
    }
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("name", &self.name)
            .field("base", &self.base())
            .field("capacity", &self.capacity())
            .field("used", &self.used)
            .field("sealed", &self.is_sealed())
            .finish()
    }
}
