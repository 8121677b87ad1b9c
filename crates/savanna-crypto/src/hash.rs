use savanna_types::Digest;
use sha2::{Digest as _, Sha256};

/// SHA-256 of a byte slice.
pub fn sha256(data: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(data);
    Digest::from_bytes(hasher.finalize().into())
}

/// Hash two child digests into their parent node.
pub fn hash_pair(left: &Digest, right: &Digest) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    Digest::from_bytes(hasher.finalize().into())
}
