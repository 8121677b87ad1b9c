use crate::digest::Digest;
use crate::error::TypesError;
use crate::pack::{Pack, Unpack};
use std::fmt;
use std::str::FromStr;

/// Block identifier.
///
/// A block id is the SHA-256 digest of the packed header with the block
/// number spliced over the first four bytes, big-endian, so the height can
/// be read back without consulting the header.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BlockId(Digest);

impl BlockId {
    pub const ZERO: Self = Self(Digest::ZERO);

    /// Splice `block_num` into the first four bytes of a raw header digest.
    pub fn from_digest(raw: Digest, block_num: u32) -> Self {
        let mut bytes = *raw.as_bytes();
        bytes[..4].copy_from_slice(&block_num.to_be_bytes());
        Self(Digest::from_bytes(bytes))
    }

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(Digest::from_bytes(bytes))
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, TypesError> {
        Ok(Self(Digest::from_slice(slice)?))
    }

    /// Block number encoded in the first four bytes.
    pub fn block_num(&self) -> u32 {
        let bytes = self.0.as_bytes();
        u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    pub const fn as_digest(&self) -> &Digest {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl Pack for BlockId {
    fn pack(&self, out: &mut Vec<u8>) {
        self.0.pack(out);
    }
}

impl Unpack for BlockId {
    fn unpack(buf: &mut &[u8]) -> Result<Self, TypesError> {
        Ok(Self(Digest::unpack(buf)?))
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId(#{} {})", self.block_num(), self.0)
    }
}

impl FromStr for BlockId {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Digest::from_str(s)?))
    }
}
