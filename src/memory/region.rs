use std::collections::BTreeMap;
use std::ops::Bound;

use thiserror::Error;

/// Page-style access level for a byte range.
///
/// Ordered so that `ReadWrite` implies `Read`: a range is accessible for some
/// required level whenever every byte carries that level or a stronger one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Permission {
    None,
    Read,
    ReadWrite,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegionError {
    #[error("range [{offset}, {offset}+{len}) is outside the {capacity}-byte reservation")]
    OutOfRange {
        offset: u64,
        len: u64,
        capacity: u64,
    },
    #[error("range [{offset}, {offset}+{len}) does not allow {required:?} access")]
    PermissionDenied {
        offset: u64,
        len: u64,
        required: Permission,
    },
    #[error("the reservation has been released")]
    Released,
}

/// A reserved, fixed-capacity guest address range.
///
/// The reservation is backed by host memory and carries a byte-granular
/// permission map, initially `None` everywhere. The handle is move-only, so
/// exactly one owner can change permissions or release the reservation, and
/// release is idempotent.
#[derive(Debug)]
pub struct MemoryRegion {
    base: u64,
    bytes: Vec<u8>,
    // segment start offset -> permission in force until the next key;
    // a segment always starts at 0 while the region is live
    perms: BTreeMap<usize, Permission>,
    released: bool,
}

impl MemoryRegion {
    /// Reserves `capacity` bytes of guest address space starting at `base`.
    pub fn reserve(base: u64, capacity: usize) -> Self {
        let mut perms = BTreeMap::new();
        perms.insert(0, Permission::None);
        Self {
            base,
            bytes: vec![0u8; capacity],
            perms,
            released: false,
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Permission in force at a single byte offset.
    pub fn permission_at(&self, offset: usize) -> Permission {
        self.perms
            .range(..=offset)
            .next_back()
            .map(|(_, perm)| *perm)
            .unwrap_or(Permission::None)
    }

    fn checked_range(&self, offset: usize, len: usize) -> Result<usize, RegionError> {
        if self.released {
            return Err(RegionError::Released);
        }
        offset
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(RegionError::OutOfRange {
                offset: offset as u64,
                len: len as u64,
                capacity: self.bytes.len() as u64,
            })
    }

    /// Weakest permission held anywhere in `[offset, offset+len)`.
    fn common_permission(&self, offset: usize, end: usize) -> Permission {
        let mut weakest = self.permission_at(offset);
        for (_, perm) in self
            .perms
            .range((Bound::Excluded(offset), Bound::Excluded(end)))
        {
            weakest = weakest.min(*perm);
        }
        weakest
    }

    /// Sets the permission of an arbitrary sub-range of the reservation.
    pub fn protect(
        &mut self,
        offset: usize,
        len: usize,
        perm: Permission,
    ) -> Result<(), RegionError> {
        let end = self.checked_range(offset, len)?;
        if len == 0 {
            return Ok(());
        }
        // preserve whatever was in force from `end` onward
        if end < self.bytes.len() {
            let after = self.permission_at(end);
            self.perms.insert(end, after);
        }
        let inside: Vec<usize> = self.perms.range(offset..end).map(|(k, _)| *k).collect();
        for key in inside {
            self.perms.remove(&key);
        }
        self.perms.insert(offset, perm);
        self.coalesce();
        Ok(())
    }

    fn coalesce(&mut self) {
        let mut previous: Option<Permission> = None;
        let keys: Vec<usize> = self.perms.keys().copied().collect();
        for key in keys {
            let perm = self.perms[&key];
            if key != 0 && previous == Some(perm) {
                self.perms.remove(&key);
            } else {
                previous = Some(perm);
            }
        }
    }

    /// Readable view of `[offset, offset+len)`; every byte must allow `Read`.
    pub fn view(&self, offset: usize, len: usize) -> Result<&[u8], RegionError> {
        let end = self.checked_range(offset, len)?;
        if len > 0 && self.common_permission(offset, end) < Permission::Read {
            return Err(RegionError::PermissionDenied {
                offset: offset as u64,
                len: len as u64,
                required: Permission::Read,
            });
        }
        Ok(&self.bytes[offset..end])
    }

    /// Writable view of `[offset, offset+len)`; every byte must allow `ReadWrite`.
    pub fn view_mut(&mut self, offset: usize, len: usize) -> Result<&mut [u8], RegionError> {
        let end = self.checked_range(offset, len)?;
        if len > 0 && self.common_permission(offset, end) < Permission::ReadWrite {
            return Err(RegionError::PermissionDenied {
                offset: offset as u64,
                len: len as u64,
                required: Permission::ReadWrite,
            });
        }
        Ok(&mut self.bytes[offset..end])
    }

    /// Releases the backing reservation. Later calls are no-ops; every other
    /// operation on a released region fails with [`RegionError::Released`].
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.bytes = Vec::new();
        self.perms.clear();
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for MemoryRegion {
    fn drop(&mut self) {
        self.release();
    }
}
