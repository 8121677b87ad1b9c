//! Vote aggregation, finalizer safety, and the LIB engine for the SAVANNA
//! instant-finality protocol.
//!
//! Dataflow: an incoming block becomes a [`savanna_chain::BlockState`] and
//! enters the fork database; local finalizers vote on it; peer votes are
//! tallied per block until a quorum certificate forms; certificates claimed
//! by later blocks drive the last irreversible block forward under the
//! two-chain rule.

pub mod aggregator;
pub mod config;
pub mod engine;
pub mod error;
pub mod voter;

pub use aggregator::{QcAggregator, VoteStatus};
pub use config::ConsensusConfig;
pub use engine::{BlockApplied, FinalityEngine};
pub use error::ConsensusError;
pub use voter::{
    load_safety_file, save_safety_file, BlockRef, Finalizer, FinalizerSafety, SafetyMap,
    VoteDecision,
};
