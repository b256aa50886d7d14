//! Content digests for sealed heaps.

use sha2::{Digest, Sha256};

/// Length in bytes of every digest produced by a [`ContentHasher`].
pub const DIGEST_LEN: usize = 32;

/// Computes a fixed-length digest over a byte range.
///
/// The heap captures one hasher at construction and uses it both at seal time
/// and at every later verification, so the two digests are always comparable.
pub trait ContentHasher: Send + Sync {
    fn digest(&self, bytes: &[u8]) -> [u8; DIGEST_LEN];
}

/// SHA-256 hasher used by default.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Hasher;

impl ContentHasher for Sha256Hasher {
    fn digest(&self, bytes: &[u8]) -> [u8; DIGEST_LEN] {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hasher.finalize().into()
    }
}
