use crate::error::TypesError;
use crate::pack::{take, Pack, Unpack};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::str::FromStr;

/// 32-byte SHA-256 digest.
///
/// Ordering compares bytes big-endian first, which is the tiebreak order used
/// by the best-branch index.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Digest([u8; 32]);

impl Digest {
    pub const ZERO: Self = Self([0u8; 32]);
    pub const LEN: usize = 32;

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Create from a byte slice
    pub fn from_slice(slice: &[u8]) -> Result<Self, TypesError> {
        if slice.len() != 32 {
            return Err(TypesError::InvalidDigestLength(slice.len()));
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    /// Compute the SHA-256 hash of data
    pub fn hash(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Compute the SHA-256 hash of multiple data slices
    pub fn hash_multi(data: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();
        for chunk in data {
            hasher.update(chunk);
        }
        Self(hasher.finalize().into())
    }

    pub fn is_zero(&self) -> bool {
        self == &Self::ZERO
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Pack for Digest {
    fn pack(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0);
    }
}

impl Unpack for Digest {
    fn unpack(buf: &mut &[u8]) -> Result<Self, TypesError> {
        let bytes = take(buf, 32, "digest")?;
        Digest::from_slice(bytes)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self)
    }
}

impl FromStr for Digest {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes)
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
