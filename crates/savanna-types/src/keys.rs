use crate::error::TypesError;
use crate::pack::{take, Pack, Unpack};
use std::fmt;

/// BLS12-381 public key: a G1 point, 96-byte affine serialization.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlsPublicKey([u8; 96]);

impl BlsPublicKey {
    pub const LEN: usize = 96;

    pub const fn from_bytes(bytes: [u8; 96]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 96] {
        &self.0
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, TypesError> {
        if slice.len() != Self::LEN {
            return Err(TypesError::InvalidPublicKeyLength {
                expected: Self::LEN,
                actual: slice.len(),
            });
        }
        let mut bytes = [0u8; 96];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

impl Default for BlsPublicKey {
    fn default() -> Self {
        Self([0u8; 96])
    }
}

impl fmt::Debug for BlsPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlsPublicKey(0x{}...)", hex::encode(&self.0[..8]))
    }
}

impl fmt::LowerHex for BlsPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Pack for BlsPublicKey {
    fn pack(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0);
    }
}

impl Unpack for BlsPublicKey {
    fn unpack(buf: &mut &[u8]) -> Result<Self, TypesError> {
        let bytes = take(buf, Self::LEN, "bls public key")?;
        Self::from_slice(bytes)
    }
}

/// BLS12-381 signature: a G2 point, 192-byte affine serialization.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlsSignature([u8; 192]);

impl BlsSignature {
    pub const LEN: usize = 192;

    pub const fn from_bytes(bytes: [u8; 192]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 192] {
        &self.0
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, TypesError> {
        if slice.len() != Self::LEN {
            return Err(TypesError::InvalidSignatureLength {
                expected: Self::LEN,
                actual: slice.len(),
            });
        }
        let mut bytes = [0u8; 192];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

impl Default for BlsSignature {
    fn default() -> Self {
        Self([0u8; 192])
    }
}

impl fmt::Debug for BlsSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlsSignature(0x{}...)", hex::encode(&self.0[..8]))
    }
}

impl fmt::LowerHex for BlsSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Pack for BlsSignature {
    fn pack(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0);
    }
}

impl Unpack for BlsSignature {
    fn unpack(buf: &mut &[u8]) -> Result<Self, TypesError> {
        let bytes = take(buf, Self::LEN, "bls signature")?;
        Self::from_slice(bytes)
    }
}
