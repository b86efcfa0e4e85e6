// Digest type and hashing over the canonical packed form
//
// A digest is the SHA-256 of a resource's canonical byte encoding. Digests
// are the only identity resources have: equal bytes, equal digest, equal
// resource.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest as _, Sha256};
use thiserror::Error;

/// Errors from parsing digest strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DigestError {
    /// Not valid hexadecimal.
    #[error("invalid hex in digest")]
    InvalidHex,

    /// Hex decoded to the wrong number of bytes.
    #[error("digest must be {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },
}

/// A 256-bit content digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; Digest::LEN]);

impl Digest {
    /// Byte length of a digest.
    pub const LEN: usize = 32;

    /// Construct from raw bytes.
    pub fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    /// Hash arbitrary bytes into a digest.
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(data);
        hasher.finalize()
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    /// Lowercase hex rendering, 64 characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, DigestError> {
        let bytes = hex::decode(s).map_err(|_| DigestError::InvalidHex)?;
        if bytes.len() != Self::LEN {
            return Err(DigestError::InvalidLength {
                expected: Self::LEN,
                got: bytes.len(),
            });
        }
        let mut data = [0u8; Self::LEN];
        data.copy_from_slice(&bytes);
        Ok(Self(data))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// Incremental SHA-256 hasher producing a [`Digest`].
pub struct Hasher(Sha256);

impl Hasher {
    /// Create a hasher in its initial state.
    pub fn new() -> Self {
        Self(Sha256::new())
    }

    /// Feed more bytes into the hasher.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Finish and return the digest.
    pub fn finalize(self) -> Digest {
        let out = self.0.finalize();
        let mut bytes = [0u8; Digest::LEN];
        bytes.copy_from_slice(&out);
        Digest::from_bytes(bytes)
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}
