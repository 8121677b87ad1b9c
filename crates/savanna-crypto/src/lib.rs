//! Cryptographic primitives for the SAVANNA finality protocol: SHA-256,
//! Merkle hashing, and BLS12-381 signing, verification, and aggregation.

pub mod bls;
pub mod error;
pub mod hash;
#[cfg(feature = "serde")]
pub mod keyfile;
pub mod merkle;

pub use bls::{
    aggregate_public_keys, aggregate_signatures, verify, verify_aggregate, verify_multi,
    BlsKeypair, BLS_DST,
};
pub use error::CryptoError;
pub use hash::{hash_pair, sha256};
pub use merkle::{MerkleProof, MerkleTree};
