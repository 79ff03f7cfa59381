//! Content digests used as cache keys.
//!
//! A [`Digest`] identifies "what would be computed" for a plug without
//! computing it. Digests are built with a [`DigestHasher`], which mixes its
//! inputs sequentially: appending `a` then `b` differs from `b` then `a`.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

/// A 256-bit content digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Digest([u8; 32]);

impl Digest {
    /// Digest of no input at all. Used for contexts and plugs with nothing to hash.
    pub fn empty() -> Self {
        DigestHasher::new().finish()
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The first eight bytes are plenty to tell digests apart in logs.
        write!(f, "Digest({})", hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Incremental builder for a [`Digest`].
///
/// Variable-length inputs are length-prefixed so that `("ab", "c")` and
/// `("a", "bc")` never collide.
#[derive(Clone)]
pub struct DigestHasher {
    inner: Sha256,
}

impl Default for DigestHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DigestHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestHasher").finish_non_exhaustive()
    }
}

impl DigestHasher {
    /// Create an empty hasher.
    pub fn new() -> Self {
        Self {
            inner: Sha256::new(),
        }
    }

    /// Append raw bytes, length-prefixed.
    pub fn append_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.inner.update((bytes.len() as u64).to_le_bytes());
        self.inner.update(bytes);
        self
    }

    /// Append a string.
    pub fn append_str(&mut self, s: &str) -> &mut Self {
        self.append_bytes(s.as_bytes())
    }

    /// Append a single tag byte, typically a type discriminator.
    pub fn append_tag(&mut self, tag: u8) -> &mut Self {
        self.inner.update([tag]);
        self
    }

    /// Append a boolean.
    pub fn append_bool(&mut self, value: bool) -> &mut Self {
        self.append_tag(value as u8)
    }

    /// Append an unsigned integer.
    pub fn append_u64(&mut self, value: u64) -> &mut Self {
        self.inner.update(value.to_le_bytes());
        self
    }

    /// Append a signed integer.
    pub fn append_i64(&mut self, value: i64) -> &mut Self {
        self.inner.update(value.to_le_bytes());
        self
    }

    /// Append a float by its bit pattern.
    ///
    /// `0.0` and `-0.0` hash differently, as do distinct NaN payloads.
    pub fn append_f64(&mut self, value: f64) -> &mut Self {
        self.append_u64(value.to_bits())
    }

    /// Append another digest.
    pub fn append_digest(&mut self, digest: &Digest) -> &mut Self {
        self.inner.update(digest.0);
        self
    }

    /// Finish hashing.
    pub fn finish(self) -> Digest {
        Digest(self.inner.finalize().into())
    }
}
