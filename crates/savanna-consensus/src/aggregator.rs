//! Per-block vote aggregation.
//!
//! Each block the node wants to help finalize gets a [`PendingQc`]: a strong
//! tally and a weak tally, each with its signer bitset, running weight, and
//! running aggregate signature, plus one has-voted bitset for O(1) duplicate
//! detection. Tallies live behind per-block locks; the registry itself is
//! bounded by the configured cap.

use crate::error::ConsensusError;
use parking_lot::{Mutex, RwLock};
use savanna_chain::BlockState;
use savanna_crypto::aggregate_signatures;
use savanna_types::{
    vote_payload, Bitset, BlockId, BlsSignature, Digest, FinalizerPolicy, QcKind,
    QuorumCertificate, VoteMessage,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of processing one vote. These form the vote-processing taxonomy
/// shared with the finalizer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteStatus {
    Success,
    UnknownBlock,
    UnknownPublicKey,
    Duplicate,
    InvalidSignature,
    /// The pending-block registry is at its cap.
    Busy,
}

impl fmt::Display for VoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VoteStatus::Success => "success",
            VoteStatus::UnknownBlock => "unknown_block",
            VoteStatus::UnknownPublicKey => "unknown_public_key",
            VoteStatus::Duplicate => "duplicate",
            VoteStatus::InvalidSignature => "invalid_signature",
            VoteStatus::Busy => "busy",
        };
        write!(f, "{s}")
    }
}

/// Dropped-vote counters for diagnostics. Duplicate and invalid votes are
/// dropped silently at the network boundary but still counted.
#[derive(Debug, Default)]
pub struct VoteCounters {
    pub duplicate: AtomicU64,
    pub invalid: AtomicU64,
    pub dropped: AtomicU64,
}

struct Tally {
    signers: Bitset,
    weight: u64,
    aggregate: Option<BlsSignature>,
}

impl Tally {
    fn new(finalizer_count: u32) -> Self {
        Self {
            signers: Bitset::new(finalizer_count),
            weight: 0,
            aggregate: None,
        }
    }

    fn add(
        &mut self,
        index: usize,
        weight: u64,
        signature: &BlsSignature,
    ) -> Result<(), ConsensusError> {
        let aggregate = match &self.aggregate {
            Some(running) => aggregate_signatures(&[*running, *signature])?,
            None => *signature,
        };
        self.signers
            .set(index)
            .map_err(ConsensusError::Types)?;
        self.weight += weight;
        self.aggregate = Some(aggregate);
        Ok(())
    }
}

/// Vote tallies for one block.
pub struct PendingQc {
    block_id: BlockId,
    block_num: u32,
    finality_digest: Digest,
    policy: Arc<FinalizerPolicy>,
    strong: Tally,
    weak: Tally,
    voted: Bitset,
}

impl PendingQc {
    fn new(block: &BlockState) -> Self {
        let policy = block.active_finalizer_policy.clone();
        let count = policy.finalizer_count() as u32;
        Self {
            block_id: block.id(),
            block_num: block.block_num(),
            finality_digest: block.finality_digest(),
            policy,
            strong: Tally::new(count),
            weak: Tally::new(count),
            voted: Bitset::new(count),
        }
    }

    fn process(&mut self, vote: &VoteMessage) -> (VoteStatus, Option<QuorumCertificate>) {
        let index = match self.policy.finalizer_index(&vote.finalizer_key) {
            Some(index) => index,
            None => return (VoteStatus::UnknownPublicKey, None),
        };

        if self.voted.test(index) {
            return (VoteStatus::Duplicate, None);
        }

        let payload = vote_payload(&self.finality_digest, vote.strong);
        if savanna_crypto::verify(&vote.finalizer_key, &payload, &vote.signature).is_err() {
            return (VoteStatus::InvalidSignature, None);
        }

        let weight = self.policy.finalizers[index].weight;
        let tally = if vote.strong {
            &mut self.strong
        } else {
            &mut self.weak
        };
        if tally.add(index, weight, &vote.signature).is_err() {
            return (VoteStatus::InvalidSignature, None);
        }
        if self.voted.set(index).is_err() {
            return (VoteStatus::InvalidSignature, None);
        }

        (VoteStatus::Success, self.completed_qc())
    }

    /// A finished certificate once a quorum is met. Strong votes alone form
    /// a strong certificate; otherwise strong votes also back the weak
    /// quorum, and the mixed aggregate carries both signer sets.
    fn completed_qc(&self) -> Option<QuorumCertificate> {
        let threshold = self.policy.threshold;
        let width = self.voted.size();

        if self.strong.weight >= threshold {
            return Some(QuorumCertificate {
                block_num: self.block_num,
                block_id: self.block_id,
                kind: QcKind::Strong,
                strong_signers: self.strong.signers.clone(),
                weak_signers: Bitset::new(width),
                weight: self.strong.weight,
                signature: self.strong.aggregate?,
            });
        }

        let combined = self.strong.weight + self.weak.weight;
        if combined >= threshold {
            let signature = match (&self.strong.aggregate, &self.weak.aggregate) {
                (Some(strong), Some(weak)) => aggregate_signatures(&[*strong, *weak]).ok()?,
                (None, Some(weak)) => *weak,
                (Some(strong), None) => *strong,
                (None, None) => return None,
            };
            return Some(QuorumCertificate {
                block_num: self.block_num,
                block_id: self.block_id,
                kind: QcKind::Weak,
                strong_signers: self.strong.signers.clone(),
                weak_signers: self.weak.signers.clone(),
                weight: combined,
                signature,
            });
        }
        None
    }
}

/// Registry of pending tallies, keyed by block id.
pub struct QcAggregator {
    pending: RwLock<HashMap<BlockId, Arc<Mutex<PendingQc>>>>,
    max_pending: usize,
    pub counters: VoteCounters,
}

impl QcAggregator {
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
            max_pending,
            counters: VoteCounters::default(),
        }
    }

    /// Start tallying votes for a block. Returns false (and counts a drop)
    /// when the registry is at its cap.
    pub fn register_block(&self, block: &BlockState) -> bool {
        let mut pending = self.pending.write();
        if pending.contains_key(&block.id()) {
            return true;
        }
        if pending.len() >= self.max_pending {
            warn!(block = %block.id(), "pending vote registry at capacity; block not tracked");
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        pending.insert(block.id(), Arc::new(Mutex::new(PendingQc::new(block))));
        true
    }

    /// Drop tallies at or below `block_num` (they are final or pruned).
    pub fn prune_below(&self, block_num: u32) {
        self.pending
            .write()
            .retain(|id, _| id.block_num() > block_num);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.read().len()
    }

    /// Apply one incoming vote. Verification runs under the per-block lock;
    /// the returned certificate, if any, is ready to hand to the finality
    /// engine.
    pub fn process_vote(
        &self,
        vote: &VoteMessage,
    ) -> (VoteStatus, Option<QuorumCertificate>) {
        let entry = self.pending.read().get(&vote.block_id).cloned();
        let Some(entry) = entry else {
            let saturated = self.pending.read().len() >= self.max_pending;
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return if saturated {
                (VoteStatus::Busy, None)
            } else {
                (VoteStatus::UnknownBlock, None)
            };
        };

        let (status, qc) = entry.lock().process(vote);
        match status {
            VoteStatus::Duplicate => {
                self.counters.duplicate.fetch_add(1, Ordering::Relaxed);
            }
            VoteStatus::InvalidSignature => {
                self.counters.invalid.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        if let Some(qc) = &qc {
            debug!(%qc, "quorum reached");
        }
        (status, qc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use savanna_crypto::BlsKeypair;
    use savanna_types::{
        AccountName, BlockHeader, BlockTimestamp, FinalizerAuthority,
    };

    fn keypairs() -> Vec<BlsKeypair> {
        (0..3u8)
            .map(|i| BlsKeypair::from_seed(&[i + 1; 32]).unwrap())
            .collect()
    }

    fn policy(keypairs: &[BlsKeypair]) -> FinalizerPolicy {
        FinalizerPolicy {
            generation: 1,
            threshold: 2,
            finalizers: keypairs
                .iter()
                .enumerate()
                .map(|(i, kp)| FinalizerAuthority {
                    description: format!("node{}", i + 1),
                    weight: 1,
                    public_key: kp.public_key(),
                })
                .collect(),
        }
    }

    fn block(keypairs: &[BlsKeypair]) -> BlockState {
        let header = BlockHeader {
            producer: "node1".parse::<AccountName>().unwrap(),
            timestamp: BlockTimestamp::new(10),
            previous: BlockId::ZERO,
            ..Default::default()
        };
        BlockState::genesis(header, policy(keypairs), Digest::hash(b"mroot")).unwrap()
    }

    fn vote_for(block: &BlockState, keypair: &BlsKeypair, strong: bool) -> VoteMessage {
        let payload = vote_payload(&block.finality_digest(), strong);
        VoteMessage {
            block_id: block.id(),
            strong,
            finalizer_key: keypair.public_key(),
            signature: keypair.sign(&payload),
        }
    }

    #[test]
    fn test_quorum_reached_at_threshold() {
        let kps = keypairs();
        let block = block(&kps);
        let agg = QcAggregator::new(16);
        assert!(agg.register_block(&block));

        let (status, qc) = agg.process_vote(&vote_for(&block, &kps[0], true));
        assert_eq!(status, VoteStatus::Success);
        assert!(qc.is_none());

        let (status, qc) = agg.process_vote(&vote_for(&block, &kps[1], true));
        assert_eq!(status, VoteStatus::Success);
        let qc = qc.unwrap();
        assert!(qc.is_strong());
        assert_eq!(qc.weight, 2);
        assert_eq!(qc.strong_signers.count_ones(), 2);
        assert!(qc.weak_signers.is_empty());
        assert_eq!(qc.block_id, block.id());
    }

    #[test]
    fn test_unknown_block() {
        let kps = keypairs();
        let block = block(&kps);
        let agg = QcAggregator::new(16);
        // vote arrives before the block: not buffered
        let (status, qc) = agg.process_vote(&vote_for(&block, &kps[0], true));
        assert_eq!(status, VoteStatus::UnknownBlock);
        assert!(qc.is_none());
        assert_eq!(agg.counters.dropped.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_unknown_public_key() {
        let kps = keypairs();
        let block = block(&kps);
        let agg = QcAggregator::new(16);
        agg.register_block(&block);

        let outsider = BlsKeypair::from_seed(&[99u8; 32]).unwrap();
        let (status, _) = agg.process_vote(&vote_for(&block, &outsider, true));
        assert_eq!(status, VoteStatus::UnknownPublicKey);
    }

    #[test]
    fn test_duplicate_is_idempotent() {
        let kps = keypairs();
        let block = block(&kps);
        let agg = QcAggregator::new(16);
        agg.register_block(&block);

        let vote = vote_for(&block, &kps[0], true);
        assert_eq!(agg.process_vote(&vote).0, VoteStatus::Success);
        assert_eq!(agg.process_vote(&vote).0, VoteStatus::Duplicate);
        assert_eq!(agg.counters.duplicate.load(Ordering::Relaxed), 1);

        // a strong-then-weak switch from the same finalizer is also a duplicate
        let weak = vote_for(&block, &kps[0], false);
        assert_eq!(agg.process_vote(&weak).0, VoteStatus::Duplicate);

        // the tally is unchanged: one more vote still completes the quorum
        let (_, qc) = agg.process_vote(&vote_for(&block, &kps[1], true));
        assert_eq!(qc.unwrap().weight, 2);
    }

    #[test]
    fn test_invalid_signature() {
        let kps = keypairs();
        let block = block(&kps);
        let agg = QcAggregator::new(16);
        agg.register_block(&block);

        let mut vote = vote_for(&block, &kps[0], true);
        let mut bytes = *vote.signature.as_bytes();
        bytes[20] ^= 0x01;
        vote.signature = BlsSignature::from_bytes(bytes);

        assert_eq!(agg.process_vote(&vote).0, VoteStatus::InvalidSignature);
        assert_eq!(agg.counters.invalid.load(Ordering::Relaxed), 1);

        // the original vote is still accepted afterwards
        assert_eq!(
            agg.process_vote(&vote_for(&block, &kps[0], true)).0,
            VoteStatus::Success
        );
    }

    #[test]
    fn test_wrong_domain_rejected() {
        let kps = keypairs();
        let block = block(&kps);
        let agg = QcAggregator::new(16);
        agg.register_block(&block);

        // signature over the weak payload presented as a strong vote
        let payload = vote_payload(&block.finality_digest(), false);
        let vote = VoteMessage {
            block_id: block.id(),
            strong: true,
            finalizer_key: kps[0].public_key(),
            signature: kps[0].sign(&payload),
        };
        assert_eq!(agg.process_vote(&vote).0, VoteStatus::InvalidSignature);
    }

    #[test]
    fn test_weak_quorum() {
        let kps = keypairs();
        let block = block(&kps);
        let agg = QcAggregator::new(16);
        agg.register_block(&block);

        agg.process_vote(&vote_for(&block, &kps[0], false));
        let (_, qc) = agg.process_vote(&vote_for(&block, &kps[1], false));
        let qc = qc.unwrap();
        assert!(!qc.is_strong());
        assert_eq!(qc.weight, 2);
    }

    #[test]
    fn test_aggregation_order_independent() {
        let kps = keypairs();
        let block = block(&kps);

        let votes: Vec<VoteMessage> = kps.iter().map(|kp| vote_for(&block, kp, true)).collect();

        let mut qcs = Vec::new();
        for order in [[0usize, 1, 2], [2, 0, 1], [1, 2, 0]] {
            let agg = QcAggregator::new(16);
            agg.register_block(&block);
            let mut last_qc = None;
            for &i in &order {
                let (status, qc) = agg.process_vote(&votes[i]);
                assert_eq!(status, VoteStatus::Success);
                if let Some(qc) = qc {
                    last_qc = Some(qc);
                }
            }
            qcs.push(last_qc.unwrap());
        }
        // all three votes aggregated in any order give bitwise-identical QCs
        assert_eq!(qcs[0].signature, qcs[1].signature);
        assert_eq!(qcs[1].signature, qcs[2].signature);
        assert_eq!(qcs[0].strong_signers, qcs[1].strong_signers);
    }

    #[test]
    fn test_strong_vote_backs_weak_quorum() {
        let kps = keypairs();
        let block = block(&kps);
        let agg = QcAggregator::new(16);
        agg.register_block(&block);

        // a single strong vote completes nothing
        let (status, qc) = agg.process_vote(&vote_for(&block, &kps[0], true));
        assert_eq!(status, VoteStatus::Success);
        assert!(qc.is_none());

        // a weak vote joins it: the strong quorum is still short, but the
        // combined weight completes a weak certificate over both domains
        let (_, qc) = agg.process_vote(&vote_for(&block, &kps[1], false));
        let qc = qc.unwrap();
        assert!(!qc.is_strong());
        assert_eq!(qc.weight, 2);
        assert_eq!(qc.strong_signers.count_ones(), 1);
        assert_eq!(qc.weak_signers.count_ones(), 1);

        // a second strong vote then upgrades the block to a strong quorum
        let (_, qc) = agg.process_vote(&vote_for(&block, &kps[2], true));
        let qc = qc.unwrap();
        assert!(qc.is_strong());
        assert_eq!(qc.weight, 2);
    }

    #[test]
    fn test_registry_cap_returns_busy() {
        let kps = keypairs();
        let b = block(&kps);
        let agg = QcAggregator::new(0);
        assert!(!agg.register_block(&b));

        let (status, _) = agg.process_vote(&vote_for(&b, &kps[0], true));
        assert_eq!(status, VoteStatus::Busy);
    }

    #[test]
    fn test_prune_below() {
        let kps = keypairs();
        let b = block(&kps);
        let agg = QcAggregator::new(16);
        agg.register_block(&b);
        assert_eq!(agg.pending_count(), 1);

        agg.prune_below(b.block_num());
        assert_eq!(agg.pending_count(), 0);
    }
}
