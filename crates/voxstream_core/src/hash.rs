//! Path hashing for the texture cache.
//!
//! DJB2 over the UTF-8 (lossy) bytes of the resolved path. Collisions are
//! possible; callers that key on [`PathHash`] must keep the path alongside
//! and compare it.

use std::fmt;
use std::path::Path;

/// DJB2 string hash (`h * 33 + c`, seeded with 5381).
#[inline]
#[must_use]
pub fn djb2(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(5381u32, |h, &c| h.wrapping_mul(33).wrapping_add(u32::from(c)))
}

/// Hash of a resolved asset path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathHash(pub u32);

impl PathHash {
    /// Hashes a path.
    #[must_use]
    pub fn of(path: &Path) -> Self {
        Self(djb2(path.to_string_lossy().as_bytes()))
    }
}

impl fmt::Display for PathHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_djb2_known_values() {
        assert_eq!(djb2(b""), 5381);
        // 5381 * 33 + 'a'
        assert_eq!(djb2(b"a"), 177_670);
    }

    #[test]
    fn test_path_hash_is_stable() {
        let a = PathHash::of(Path::new("assets/textures/brick.png"));
        let b = PathHash::of(Path::new("assets/textures/brick.png"));
        let c = PathHash::of(Path::new("assets/textures/stone.png"));

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
