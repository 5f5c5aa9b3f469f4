//! # Riptide Primitives
//!
//! BLAKE3 tree primitives for the riptide parallel hasher.
//!
//! This crate provides:
//! - Single-shot hashing for inputs that fit one leaf
//! - Non-root subtree chaining values at arbitrary chunk offsets
//! - Parent and root merges over pairs of chaining values
//! - The canonical left/right split rule and subtree alignment limit
//!
//! The root/non-root distinction is encoded in the type system: merging two
//! chaining values with [`parent_cv`] yields another [`ChainingValue`], while
//! [`root_hash`] and [`hash_single`] are the only operations that produce a
//! [`Digest`]. A tree assembled through these functions therefore cannot
//! apply the root-finalization flag anywhere except at its root.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::fmt;

use blake3::hazmat::{self, HasherExt, Mode};

/// BLAKE3 chunk length in bytes. Subtree offsets must be multiples of this.
pub const CHUNK_LEN: usize = 1024;

/// A 32-byte non-root chaining value.
///
/// Opaque at this boundary: callers combine chaining values with
/// [`parent_cv`] or [`root_hash`] and must not reinterpret the bytes.
pub type ChainingValue = [u8; 32];

/// A finalized 32-byte BLAKE3 digest.
///
/// Only [`hash_single`] and [`root_hash`] construct this type.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; 32]);

impl Digest {
    /// View the digest as raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Render the digest as lowercase hex.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<blake3::Hash> for Digest {
    fn from(hash: blake3::Hash) -> Self {
        Digest(*hash.as_bytes())
    }
}

impl From<[u8; 32]> for Digest {
    fn from(bytes: [u8; 32]) -> Self {
        Digest(bytes)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

/// Hash `data` as a complete input.
///
/// Used for inputs that fit in a single leaf; the result carries the
/// root-finalization flag and is the final digest of `data`.
#[must_use]
pub fn hash_single(data: &[u8]) -> Digest {
    blake3::hash(data).into()
}

/// Hash `data` as a subtree of a larger input starting at absolute byte
/// `input_offset`, returning its non-root chaining value.
///
/// `input_offset` must be a multiple of [`CHUNK_LEN`], `data` must be
/// non-empty, and `data.len()` must not exceed [`max_subtree_len`] for the
/// offset. Violations panic; callers that plan subtrees with
/// [`left_subtree_len`] and [`max_subtree_len`] always satisfy the contract.
#[must_use]
pub fn hash_subtree(data: &[u8], input_offset: u64) -> ChainingValue {
    debug_assert!(!data.is_empty(), "empty subtrees are never valid");
    debug_assert_eq!(input_offset % CHUNK_LEN as u64, 0);
    let mut hasher = blake3::Hasher::new();
    hasher.set_input_offset(input_offset);
    hasher.update(data);
    hasher.finalize_non_root()
}

/// Combine two child chaining values into their parent's chaining value.
///
/// Never valid at the tree root; use [`root_hash`] there.
#[must_use]
pub fn parent_cv(left: &ChainingValue, right: &ChainingValue) -> ChainingValue {
    hazmat::merge_subtrees_non_root(left, right, Mode::Hash)
}

/// Combine the root's two child chaining values with the root-finalization
/// flag, producing the final digest.
#[must_use]
pub fn root_hash(left: &ChainingValue, right: &ChainingValue) -> Digest {
    hazmat::merge_subtrees_root(left, right, Mode::Hash).into()
}

/// Byte length of the left child in BLAKE3's canonical split of an input of
/// `input_len` bytes.
///
/// The left subtree is the largest power-of-two number of chunks strictly
/// less than the total chunk count, times [`CHUNK_LEN`]. `input_len` must
/// exceed one chunk for the split to exist.
#[must_use]
pub fn left_subtree_len(input_len: u64) -> u64 {
    hazmat::left_subtree_len(input_len)
}

/// Maximum byte length of a subtree starting at `input_offset`.
///
/// `None` for offset zero (unbounded). For a subtree starting at chunk index
/// `N > 0` the limit is `2^(trailing zeros of N)` chunks: a subtree must
/// begin at an offset aligned to its own size.
#[must_use]
pub fn max_subtree_len(input_offset: u64) -> Option<u64> {
    hazmat::max_subtree_len(input_offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_DIGEST: &str = "af1349b9f5f9a1a6a0404dea36dcc9499bca393f98a7d814826d3bd8e3e9e8bd";

    #[test]
    fn test_hash_single_empty() {
        assert_eq!(hash_single(b"").to_hex(), EMPTY_DIGEST);
    }

    #[test]
    fn test_hash_single_abc() {
        assert_eq!(
            hash_single(b"abc").to_hex(),
            "6437b3ac38465133ffb63b75273a8db548c558465d79db03fd359c6cd5bd9d85"
        );
    }

    #[test]
    fn test_two_chunk_composition() {
        let input = vec![0x5au8; 2 * CHUNK_LEN];
        let left = hash_subtree(&input[..CHUNK_LEN], 0);
        let right = hash_subtree(&input[CHUNK_LEN..], CHUNK_LEN as u64);
        assert_eq!(root_hash(&left, &right), hash_single(&input));
    }

    #[test]
    fn test_three_chunk_composition() {
        // Canonical split of 3 chunks is 2 + 1.
        let input: Vec<u8> = (0..3 * CHUNK_LEN).map(|i| (i % 251) as u8).collect();
        let split = left_subtree_len(input.len() as u64) as usize;
        assert_eq!(split, 2 * CHUNK_LEN);

        let left = hash_subtree(&input[..split], 0);
        let right = hash_subtree(&input[split..], split as u64);
        assert_eq!(root_hash(&left, &right), hash_single(&input));
    }

    #[test]
    fn test_deeper_composition_with_parent_cv() {
        // Four chunks: ((0,1),(2,3)) with parent_cv below the root.
        let input: Vec<u8> = (0..4 * CHUNK_LEN).map(|i| (i * 7 % 256) as u8).collect();
        let c: Vec<ChainingValue> = (0..4)
            .map(|i| {
                let off = i * CHUNK_LEN;
                hash_subtree(&input[off..off + CHUNK_LEN], off as u64)
            })
            .collect();
        let left = parent_cv(&c[0], &c[1]);
        let right = parent_cv(&c[2], &c[3]);
        assert_eq!(root_hash(&left, &right), hash_single(&input));
    }

    #[test]
    fn test_left_subtree_len_rule() {
        // (input_len, left_len) per the power-of-two-chunks rule
        let cases = [
            (1025, 1024),
            (2048, 1024),
            (2049, 2048),
            (4096, 2048),
            (4097, 4096),
            (1024 * 1024 + 1, 1024 * 1024),
        ];
        for (input_len, left_len) in cases {
            assert_eq!(left_subtree_len(input_len), left_len, "input_len={input_len}");
        }
    }

    #[test]
    fn test_max_subtree_len_alignment() {
        assert_eq!(max_subtree_len(0), None);
        assert_eq!(max_subtree_len(1024), Some(1024));
        assert_eq!(max_subtree_len(2048), Some(2048));
        assert_eq!(max_subtree_len(3072), Some(1024));
        assert_eq!(max_subtree_len(8192), Some(8192));
    }

    #[test]
    fn test_digest_display_is_hex() {
        let d = hash_single(b"");
        assert_eq!(format!("{d}"), EMPTY_DIGEST);
        assert_eq!(format!("{d:?}"), format!("Digest({EMPTY_DIGEST})"));
    }
}
