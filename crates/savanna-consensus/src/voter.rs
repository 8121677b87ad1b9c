//! Local finalizer voting.
//!
//! Each finalizer carries persistent safety state `(last_vote, lock,
//! other_branch_latest_time)`. A finalizer votes strong only on a block that
//! extends the branch containing its lock, weak when the liveness rule makes
//! a branch switch safe, and abstains otherwise. The safety state advances
//! monotonically and must hit disk before any vote is released.

use crate::error::ConsensusError;
use savanna_chain::BlockState;
use savanna_crypto::BlsKeypair;
use savanna_types::{vote_payload, BlockId, BlockTimestamp, BlsPublicKey, VoteMessage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

/// Reference to a block: enough to anchor safety decisions without keeping
/// the block state alive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub id: BlockId,
    pub timestamp: BlockTimestamp,
}

impl BlockRef {
    pub fn new(id: BlockId, timestamp: BlockTimestamp) -> Self {
        Self { id, timestamp }
    }

    pub fn from_state(state: &BlockState) -> Self {
        Self {
            id: state.id(),
            timestamp: state.timestamp(),
        }
    }

    pub fn block_num(&self) -> u32 {
        self.id.block_num()
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_zero()
    }
}

/// Durable per-finalizer safety state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizerSafety {
    pub last_vote: BlockRef,
    pub lock: BlockRef,
    /// Latest timestamp seen on any branch conflicting with the lock.
    pub other_branch_latest_time: BlockTimestamp,
}

/// Decision for one block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteDecision {
    Strong,
    Weak,
    Abstain,
}

/// A local finalizer: its signing key and safety state.
pub struct Finalizer {
    pub keypair: BlsKeypair,
    pub safety: FinalizerSafety,
}

impl Finalizer {
    pub fn new(keypair: BlsKeypair) -> Self {
        Self {
            keypair,
            safety: FinalizerSafety::default(),
        }
    }

    pub fn public_key(&self) -> BlsPublicKey {
        self.keypair.public_key()
    }

    /// Decide how to vote on `block`.
    ///
    /// `extends_lock_branch` says whether the block descends from the locked
    /// block; `claimed_ref` is the block the new block's QC claim points at,
    /// which becomes the new lock after a strong vote.
    pub fn decide_vote(
        &mut self,
        block: &BlockState,
        extends_lock_branch: bool,
        claimed_ref: BlockRef,
    ) -> VoteDecision {
        let block_ref = BlockRef::from_state(block);

        // never vote twice at or before the last voted timestamp
        if !self.safety.last_vote.is_empty() && block_ref.timestamp <= self.safety.last_vote.timestamp
        {
            return VoteDecision::Abstain;
        }

        if extends_lock_branch {
            // a recently seen conflicting block means this vote could pair
            // with an earlier weak vote elsewhere, so it must stay weak
            let decision = if block_ref.timestamp > self.safety.other_branch_latest_time {
                VoteDecision::Strong
            } else {
                VoteDecision::Weak
            };
            if decision == VoteDecision::Strong {
                self.safety.other_branch_latest_time = BlockTimestamp::default();
                if claimed_ref.timestamp > self.safety.lock.timestamp {
                    self.safety.lock = claimed_ref;
                }
            }
            self.safety.last_vote = block_ref;
            decision
        } else {
            // conflicting branch: remember it, then apply the liveness rule
            if block_ref.timestamp > self.safety.other_branch_latest_time {
                self.safety.other_branch_latest_time = block_ref.timestamp;
            }
            if claimed_ref.timestamp > self.safety.lock.timestamp {
                // the other branch carries finality progress newer than our
                // lock, so abandoning the lock cannot break safety
                self.safety.last_vote = block_ref;
                VoteDecision::Weak
            } else {
                VoteDecision::Abstain
            }
        }
    }

    /// Sign a decided vote over the block's finality digest.
    pub fn sign_vote(&self, block: &BlockState, strong: bool) -> VoteMessage {
        let payload = vote_payload(&block.finality_digest(), strong);
        VoteMessage {
            block_id: block.id(),
            strong,
            finalizer_key: self.keypair.public_key(),
            signature: self.keypair.sign(&payload),
        }
    }
}

/// Safety state for every local finalizer, keyed by public key hex.
pub type SafetyMap = HashMap<BlsPublicKey, FinalizerSafety>;

#[derive(Serialize, Deserialize)]
struct SafetyFile {
    version: u32,
    finalizers: Vec<(BlsPublicKey, FinalizerSafety)>,
}

const SAFETY_FILE_VERSION: u32 = 1;

/// Persist safety state durably: write to a temporary file, fsync, rename.
/// The vote must not leave the node before this returns.
pub fn save_safety_file(path: &Path, safety: &SafetyMap) -> Result<(), ConsensusError> {
    let mut finalizers: Vec<(BlsPublicKey, FinalizerSafety)> =
        safety.iter().map(|(k, v)| (*k, *v)).collect();
    finalizers.sort_by_key(|(k, _)| *k.as_bytes());

    let file = SafetyFile {
        version: SAFETY_FILE_VERSION,
        finalizers,
    };
    let json = serde_json::to_string_pretty(&file)
        .map_err(|e| ConsensusError::Io(e.to_string()))?;

    let tmp_path = path.with_extension("tmp");
    {
        let mut tmp = std::fs::File::create(&tmp_path)?;
        tmp.write_all(json.as_bytes())?;
        tmp.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

pub fn load_safety_file(path: &Path) -> Result<SafetyMap, ConsensusError> {
    let json = std::fs::read_to_string(path)?;
    let file: SafetyFile =
        serde_json::from_str(&json).map_err(|e| ConsensusError::Io(e.to_string()))?;
    if file.version != SAFETY_FILE_VERSION {
        return Err(ConsensusError::Config(format!(
            "unsupported safety file version {}",
            file.version
        )));
    }
    Ok(file.finalizers.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use savanna_types::{AccountName, BlockHeader, Digest, FinalizerAuthority, FinalizerPolicy};

    fn policy(keypair: &BlsKeypair) -> FinalizerPolicy {
        FinalizerPolicy {
            generation: 1,
            threshold: 1,
            finalizers: vec![FinalizerAuthority {
                description: "solo".to_string(),
                weight: 1,
                public_key: keypair.public_key(),
            }],
        }
    }

    fn block_at(slot: u32, previous: BlockId, keypair: &BlsKeypair) -> BlockState {
        let header = BlockHeader {
            producer: "node1".parse::<AccountName>().unwrap(),
            timestamp: BlockTimestamp::new(slot),
            previous,
            ..Default::default()
        };
        BlockState::genesis(header, policy(keypair), Digest::hash(&slot.to_le_bytes())).unwrap()
    }

    fn reference(slot: u32, tag: u8) -> BlockRef {
        BlockRef::new(
            BlockId::from_digest(Digest::hash(&[tag]), slot),
            BlockTimestamp::new(slot),
        )
    }

    #[test]
    fn test_strong_vote_on_lock_branch() {
        let keypair = BlsKeypair::from_seed(&[1u8; 32]).unwrap();
        let mut finalizer = Finalizer::new(keypair);
        finalizer.safety.lock = reference(5, 0);

        let block = block_at(10, BlockId::ZERO, &finalizer.keypair);
        let claimed = reference(9, 1);
        assert_eq!(
            finalizer.decide_vote(&block, true, claimed),
            VoteDecision::Strong
        );
        // lock advanced to the claimed block, last vote recorded
        assert_eq!(finalizer.safety.lock, claimed);
        assert_eq!(finalizer.safety.last_vote.id, block.id());
    }

    #[test]
    fn test_monotony_prevents_revote() {
        let keypair = BlsKeypair::from_seed(&[1u8; 32]).unwrap();
        let mut finalizer = Finalizer::new(keypair);
        finalizer.safety.lock = reference(5, 0);

        let block = block_at(10, BlockId::ZERO, &finalizer.keypair);
        assert_eq!(
            finalizer.decide_vote(&block, true, reference(9, 1)),
            VoteDecision::Strong
        );

        // any block at the same or an earlier slot is refused, even on the
        // lock branch
        let sibling = block_at(10, BlockId::ZERO, &finalizer.keypair);
        assert_eq!(
            finalizer.decide_vote(&sibling, true, reference(9, 1)),
            VoteDecision::Abstain
        );
    }

    #[test]
    fn test_conflicting_branch_with_newer_qc_gets_weak_vote() {
        let keypair = BlsKeypair::from_seed(&[1u8; 32]).unwrap();
        let mut finalizer = Finalizer::new(keypair);
        finalizer.safety.lock = reference(5, 0);

        let block = block_at(10, BlockId::ZERO, &finalizer.keypair);
        // the conflicting branch claims a QC newer than our lock
        assert_eq!(
            finalizer.decide_vote(&block, false, reference(8, 1)),
            VoteDecision::Weak
        );
        assert_eq!(finalizer.safety.last_vote.id, block.id());
        // the lock does not move on a weak vote
        assert_eq!(finalizer.safety.lock, reference(5, 0));
    }

    #[test]
    fn test_conflicting_branch_with_stale_qc_abstains() {
        let keypair = BlsKeypair::from_seed(&[1u8; 32]).unwrap();
        let mut finalizer = Finalizer::new(keypair);
        finalizer.safety.lock = reference(8, 0);

        let block = block_at(10, BlockId::ZERO, &finalizer.keypair);
        assert_eq!(
            finalizer.decide_vote(&block, false, reference(6, 1)),
            VoteDecision::Abstain
        );
        // the conflict is still recorded
        assert_eq!(
            finalizer.safety.other_branch_latest_time,
            BlockTimestamp::new(10)
        );
    }

    #[test]
    fn test_weak_vote_until_conflict_ages_out() {
        let keypair = BlsKeypair::from_seed(&[1u8; 32]).unwrap();
        let mut finalizer = Finalizer::new(keypair);
        finalizer.safety.lock = reference(5, 0);
        finalizer.safety.other_branch_latest_time = BlockTimestamp::new(12);

        // back on the lock branch, but a conflicting block at slot 12 was
        // seen: a block at slot 11 only earns a weak vote
        let early = block_at(11, BlockId::ZERO, &finalizer.keypair);
        assert_eq!(
            finalizer.decide_vote(&early, true, reference(9, 1)),
            VoteDecision::Weak
        );

        // once past the conflict window the strong vote returns
        let late = block_at(13, BlockId::ZERO, &finalizer.keypair);
        assert_eq!(
            finalizer.decide_vote(&late, true, reference(11, 2)),
            VoteDecision::Strong
        );
        assert_eq!(
            finalizer.safety.other_branch_latest_time,
            BlockTimestamp::default()
        );
    }

    #[test]
    fn test_sign_vote_verifies() {
        let keypair = BlsKeypair::from_seed(&[1u8; 32]).unwrap();
        let finalizer = Finalizer::new(keypair);
        let block = block_at(10, BlockId::ZERO, &finalizer.keypair);

        let vote = finalizer.sign_vote(&block, true);
        let payload = vote_payload(&block.finality_digest(), true);
        assert!(savanna_crypto::verify(&vote.finalizer_key, &payload, &vote.signature).is_ok());
        assert_eq!(vote.block_id, block.id());
    }

    #[test]
    fn test_safety_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("finalizer_safety.json");

        let keypair = BlsKeypair::from_seed(&[1u8; 32]).unwrap();
        let mut safety = SafetyMap::new();
        safety.insert(
            keypair.public_key(),
            FinalizerSafety {
                last_vote: reference(10, 1),
                lock: reference(8, 2),
                other_branch_latest_time: BlockTimestamp::new(9),
            },
        );

        save_safety_file(&path, &safety).unwrap();
        let loaded = load_safety_file(&path).unwrap();
        assert_eq!(loaded, safety);
        // no temporary file left behind
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_safety_file_missing() {
        assert!(load_safety_file(Path::new("/nonexistent/safety.json")).is_err());
    }
}
