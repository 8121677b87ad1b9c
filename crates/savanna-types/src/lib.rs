//! Core types for the SAVANNA instant-finality protocol: block identity,
//! headers and extensions, finalizer policies, votes, quorum certificates,
//! and the canonical packing every digest commits to.

pub mod bitset;
pub mod block_id;
pub mod digest;
pub mod error;
pub mod extension;
pub mod header;
pub mod keys;
pub mod name;
pub mod pack;
pub mod policy;
pub mod qc;
pub mod serialization;
pub mod timestamp;
pub mod vote;

pub use bitset::Bitset;
pub use block_id::BlockId;
pub use digest::Digest;
pub use error::TypesError;
pub use extension::{
    AdditionalSignatures, FinalityExtension, QcClaim, ADDITIONAL_SIGNATURES_EXTENSION_ID,
    FINALITY_EXTENSION_ID,
};
pub use header::BlockHeader;
pub use keys::{BlsPublicKey, BlsSignature};
pub use name::AccountName;
pub use pack::{Pack, Unpack, VarUint32};
pub use policy::{FinalizerAuthority, FinalizerPolicy};
pub use qc::{QcKind, QuorumCertificate};
pub use timestamp::BlockTimestamp;
pub use vote::{vote_payload, VoteMessage, STRONG_VOTE_DOMAIN, WEAK_VOTE_DOMAIN};
