//! Block states and the fork database for the SAVANNA finality protocol.
//!
//! The fork database indexes every candidate block descending from the
//! irreversible root, maintains the best-branch total order, and survives
//! restarts through a versioned durability file.

pub mod block_state;
pub mod error;
pub mod finality_core;
pub mod fork_db;

pub use block_state::{BlockState, FINALITY_DIGEST_MAJOR_VERSION, FINALITY_DIGEST_MINOR_VERSION};
pub use error::ChainError;
pub use finality_core::FinalityCore;
pub use fork_db::{
    ForkDatabase, ForkDb, ForkItem, ForkItemCodec, SavannaBranchKey, FORK_DB_MAGIC,
    LEGACY_FORK_DB_MAGIC, MAX_SUPPORTED_VERSION, MIN_SUPPORTED_VERSION,
};
