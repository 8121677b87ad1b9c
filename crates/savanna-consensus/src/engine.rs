//! The finality engine: block ingress, embedded-QC verification, local
//! voting, and the LIB driver that advances the fork database root under the
//! two-chain rule.

use crate::aggregator::{QcAggregator, VoteStatus};
use crate::config::ConsensusConfig;
use crate::error::ConsensusError;
use crate::voter::{
    load_safety_file, save_safety_file, BlockRef, Finalizer, SafetyMap, VoteDecision,
};
use parking_lot::Mutex;
use savanna_chain::{BlockState, ChainError, ForkDatabase};
use savanna_crypto::{aggregate_public_keys, verify_aggregate, verify_multi, BlsKeypair};
use savanna_types::{
    vote_payload, BlockHeader, BlockId, Digest, QcClaim, QuorumCertificate, VoteMessage,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Result of applying one block: the derived state and any votes the local
/// finalizers produced for broadcast.
#[derive(Debug)]
pub struct BlockApplied {
    pub state: Arc<BlockState>,
    pub votes: Vec<VoteMessage>,
}

/// Drives finality for one node.
pub struct FinalityEngine {
    config: ConsensusConfig,
    fork_db: ForkDatabase,
    aggregator: QcAggregator,
    finalizers: Mutex<Vec<Finalizer>>,
    /// Best completed certificate not yet claimed by a produced block.
    latest_qc: Mutex<Option<QuorumCertificate>>,
}

impl FinalityEngine {
    pub fn new(config: ConsensusConfig) -> Result<Self, ConsensusError> {
        std::fs::create_dir_all(&config.data_dir)?;
        let aggregator = QcAggregator::new(config.max_pending_blocks);
        Ok(Self {
            config,
            fork_db: ForkDatabase::new(),
            aggregator,
            finalizers: Mutex::new(Vec::new()),
            latest_qc: Mutex::new(None),
        })
    }

    pub fn fork_db(&self) -> &ForkDatabase {
        &self.fork_db
    }

    pub fn aggregator(&self) -> &QcAggregator {
        &self.aggregator
    }

    /// Register a local finalizer, restoring its persisted safety state when
    /// present.
    pub fn add_finalizer(&self, keypair: BlsKeypair) -> Result<(), ConsensusError> {
        let mut finalizer = Finalizer::new(keypair);
        let path = self.config.safety_path();
        if path.exists() {
            let safety = load_safety_file(&path)?;
            if let Some(state) = safety.get(&finalizer.public_key()) {
                finalizer.safety = *state;
            }
        }
        if finalizer.safety.lock.is_empty() {
            if let Some(root) = self.fork_db.root() {
                finalizer.safety.lock = BlockRef::from_state(&root);
            }
        }
        self.finalizers.lock().push(finalizer);
        Ok(())
    }

    /// Install the irreversible starting block.
    pub fn init_genesis(&self, genesis: BlockState) -> Result<Arc<BlockState>, ConsensusError> {
        let root = Arc::new(genesis);
        self.fork_db.reset_root(root.clone());
        let root_ref = BlockRef::from_state(&root);
        for finalizer in self.finalizers.lock().iter_mut() {
            if finalizer.safety.lock.is_empty() {
                finalizer.safety.lock = root_ref;
            }
        }
        info!(root = %root.id(), "finality engine initialized");
        Ok(root)
    }

    /// Restore the fork database from disk if a file is present.
    pub fn startup(&self) -> Result<bool, ConsensusError> {
        let path = self.config.fork_db_path();
        if !path.exists() {
            return Ok(false);
        }
        self.fork_db.load(&path)?;
        Ok(true)
    }

    /// Persist the fork database for the next start.
    pub fn shutdown(&self) -> Result<(), ConsensusError> {
        self.fork_db.save(&self.config.fork_db_path())?;
        Ok(())
    }

    /// The last irreversible block number.
    pub fn irreversible_block_num(&self) -> u32 {
        self.fork_db.root().map(|root| root.block_num()).unwrap_or(0)
    }

    /// The claim the producer should embed in the next header built on the
    /// current head.
    pub fn next_qc_claim(&self) -> Result<QcClaim, ConsensusError> {
        let head = self
            .fork_db
            .head()
            .ok_or(ChainError::RootNotSet)
            .map_err(ConsensusError::Chain)?;
        let inherited = head.core.latest_qc_claim;

        let latest = self.latest_qc.lock().clone();
        if let Some(qc) = latest {
            let claim = qc.to_claim();
            let advances = claim.block_num > inherited.block_num
                || (claim.block_num == inherited.block_num
                    && claim.is_strong
                    && !inherited.is_strong);
            if advances && self.on_branch(&head, &qc.block_id) {
                return Ok(claim);
            }
        }
        Ok(inherited)
    }

    /// The best certificate formed so far, for embedding beside a produced
    /// block.
    pub fn best_qc(&self) -> Option<QuorumCertificate> {
        self.latest_qc.lock().clone()
    }

    /// Ingest a block: derive its state, verify any newly claimed QC, insert
    /// it into the fork database, and vote with every local finalizer. The
    /// produced votes are also tallied locally.
    pub fn apply_block(
        &self,
        header: BlockHeader,
        finality_mroot: Digest,
        qc: Option<&QuorumCertificate>,
    ) -> Result<BlockApplied, ConsensusError> {
        let parent = self
            .fork_db
            .get_block_header(&header.previous)
            .ok_or(ChainError::Unlinkable {
                id: header.compute_id(),
                previous: header.previous,
            })?;

        let extension = header
            .finality_extension()?
            .ok_or_else(|| ChainError::InvalidHeader("missing finality extension".to_string()))?;
        let claim = extension.qc_claim;

        // a repeated claim may reference a block already behind the root;
        // the parent then stands in, since nothing new is derived from it
        let parent_claim = parent.core.latest_qc_claim;
        let claimed = match self.find_claimed_state(&parent, claim.block_num) {
            Ok(claimed) => claimed,
            Err(_) if claim == parent_claim => parent.clone(),
            Err(err) => return Err(err),
        };

        let advances = claim.block_num > parent_claim.block_num
            || (claim.block_num == parent_claim.block_num
                && claim.is_strong != parent_claim.is_strong);
        if advances {
            let qc = qc.ok_or_else(|| {
                ConsensusError::InvalidQc(format!(
                    "claim on block {} advances without a certificate",
                    claim.block_num
                ))
            })?;
            self.verify_qc(qc, &claimed, claim)?;
        }

        let state = Arc::new(BlockState::next(
            &parent,
            header,
            &claimed.core,
            finality_mroot,
        )?);
        self.fork_db.add(state.clone(), false, false)?;
        self.aggregator.register_block(&state);

        let votes = self.vote_on(&state, &claimed);
        for vote in &votes {
            let status = self.process_vote(vote);
            debug!(block = %state.id(), %status, "local vote processed");
        }

        Ok(BlockApplied { state, votes })
    }

    /// Flip a block to validated after successful execution, then
    /// re-evaluate head and LIB.
    pub fn mark_block_validated(&self, id: &BlockId) -> Result<(), ConsensusError> {
        let state = self
            .fork_db
            .get_block(id)
            .ok_or(ChainError::UnknownBlock(*id))?;
        self.fork_db.mark_valid(&state)?;
        self.refresh_lib();
        Ok(())
    }

    /// Tally one incoming vote. Duplicates and invalid signatures are
    /// dropped (and counted); a completed certificate is retained for the
    /// next produced block.
    pub fn process_vote(&self, vote: &VoteMessage) -> VoteStatus {
        let (status, qc) = self.aggregator.process_vote(vote);
        if let Some(qc) = qc {
            let mut latest = self.latest_qc.lock();
            let better = match latest.as_ref() {
                Some(existing) => {
                    qc.block_num > existing.block_num
                        || (qc.block_num == existing.block_num
                            && qc.is_strong()
                            && !existing.is_strong())
                }
                None => true,
            };
            if better {
                *latest = Some(qc);
            }
        }
        status
    }

    fn find_claimed_state(
        &self,
        parent: &Arc<BlockState>,
        claim_num: u32,
    ) -> Result<Arc<BlockState>, ConsensusError> {
        if claim_num == parent.block_num() {
            return Ok(parent.clone());
        }
        if let Some(root) = self.fork_db.root() {
            if claim_num == root.block_num() {
                return Ok(root);
            }
        }
        self.fork_db
            .search_on_branch(&parent.id(), claim_num)
            .ok_or_else(|| {
                ConsensusError::InvalidQc(format!(
                    "claimed block {claim_num} not found on the parent branch"
                ))
            })
    }

    /// Check a certificate against the policy active at the claimed block.
    fn verify_qc(
        &self,
        qc: &QuorumCertificate,
        claimed: &Arc<BlockState>,
        claim: QcClaim,
    ) -> Result<(), ConsensusError> {
        if qc.block_num != claim.block_num || qc.is_strong() != claim.is_strong {
            return Err(ConsensusError::InvalidQc(
                "certificate does not match the header claim".to_string(),
            ));
        }
        if qc.block_id != claimed.id() {
            return Err(ConsensusError::InvalidQc(format!(
                "certificate is for block {} but the branch has {}",
                qc.block_id,
                claimed.id()
            )));
        }

        let policy = &claimed.active_finalizer_policy;
        let roster = policy.finalizer_count();
        if qc.strong_signers.size() as usize != roster
            || qc.weak_signers.size() as usize != roster
        {
            return Err(ConsensusError::InvalidQc(format!(
                "signer bitset width {}/{} does not match the policy roster {roster}",
                qc.strong_signers.size(),
                qc.weak_signers.size(),
            )));
        }
        if qc.is_strong() && !qc.weak_signers.is_empty() {
            return Err(ConsensusError::InvalidQc(
                "strong certificate carries weak signers".to_string(),
            ));
        }

        let mut weight = 0u64;
        let mut strong_keys = Vec::new();
        let mut weak_keys = Vec::new();
        for index in qc.strong_signers.iter_set() {
            weight += policy.finalizers[index].weight;
            strong_keys.push(policy.finalizers[index].public_key);
        }
        for index in qc.weak_signers.iter_set() {
            if qc.strong_signers.test(index) {
                return Err(ConsensusError::InvalidQc(format!(
                    "finalizer {index} appears in both signer sets"
                )));
            }
            weight += policy.finalizers[index].weight;
            weak_keys.push(policy.finalizers[index].public_key);
        }
        if weight != qc.weight {
            return Err(ConsensusError::InvalidQc(format!(
                "declared weight {} does not match signer weight {weight}",
                qc.weight
            )));
        }
        if weight < policy.threshold {
            return Err(ConsensusError::InvalidQc(format!(
                "weight {weight} is below the threshold {}",
                policy.threshold
            )));
        }

        let strong_payload = vote_payload(&claimed.finality_digest(), true);
        let weak_payload = vote_payload(&claimed.finality_digest(), false);
        let result = if qc.is_strong() {
            verify_aggregate(&strong_keys, &strong_payload, &qc.signature)
        } else {
            let mut items = Vec::new();
            if !strong_keys.is_empty() {
                items.push((aggregate_public_keys(&strong_keys)?, strong_payload.to_vec()));
            }
            if !weak_keys.is_empty() {
                items.push((aggregate_public_keys(&weak_keys)?, weak_payload.to_vec()));
            }
            verify_multi(&items, &qc.signature)
        };
        result.map_err(|_| ConsensusError::InvalidQc("aggregate signature mismatch".to_string()))
    }

    /// Whether `target` is on the branch ending at `tip` (root and final
    /// ancestors included).
    fn on_branch(&self, tip: &Arc<BlockState>, target: &BlockId) -> bool {
        let num = target.block_num();
        let Some(root) = self.fork_db.root() else {
            return false;
        };
        if num < root.block_num() {
            // below the root everything is final and shared by all branches
            return true;
        }
        if num == root.block_num() {
            return *target == root.id();
        }
        if num == tip.block_num() {
            return *target == tip.id();
        }
        match self.fork_db.search_on_branch(&tip.id(), num) {
            Some(state) => state.id() == *target,
            None => false,
        }
    }

    /// Run every local finalizer against a freshly inserted block. Safety
    /// state is made durable before any vote is handed out; a persistence
    /// failure withholds all votes.
    fn vote_on(&self, state: &Arc<BlockState>, claimed: &Arc<BlockState>) -> Vec<VoteMessage> {
        let mut finalizers = self.finalizers.lock();
        if finalizers.is_empty() {
            return Vec::new();
        }

        let claimed_ref = BlockRef::from_state(claimed);
        let mut decisions = Vec::new();
        for finalizer in finalizers.iter_mut() {
            let extends = finalizer.safety.lock.is_empty()
                || self.on_branch(state, &finalizer.safety.lock.id);
            let decision = finalizer.decide_vote(state, extends, claimed_ref);
            decisions.push(decision);
        }

        let safety: SafetyMap = finalizers
            .iter()
            .map(|f| (f.public_key(), f.safety))
            .collect();
        if let Err(err) = save_safety_file(&self.config.safety_path(), &safety) {
            error!(%err, "failed to persist finalizer safety state; withholding votes");
            return Vec::new();
        }

        finalizers
            .iter()
            .zip(decisions)
            .filter_map(|(finalizer, decision)| match decision {
                VoteDecision::Strong => Some(finalizer.sign_vote(state, true)),
                VoteDecision::Weak => Some(finalizer.sign_vote(state, false)),
                VoteDecision::Abstain => None,
            })
            .collect()
    }

    /// Recompute LIB from the head and advance the root past newly final
    /// blocks. LIB is monotonic: the root only ever moves forward.
    pub fn refresh_lib(&self) {
        let (Some(head), Some(root)) = (self.fork_db.head(), self.fork_db.root()) else {
            return;
        };
        let lib = head.last_final_block_num();
        if lib <= root.block_num() {
            return;
        }

        let Some(target) = self.fork_db.search_on_branch(&head.id(), lib) else {
            warn!(lib, "newly final block not found on the head branch");
            return;
        };
        match self.fork_db.advance_root(&target.id()) {
            Ok(()) => {
                self.aggregator.prune_below(target.block_num());
            }
            Err(ChainError::NotValidated(id)) => {
                // execution has not caught up with this ancestor yet; the
                // next head change retries
                debug!(%id, "deferring root advance until validation completes");
            }
            Err(err) => warn!(%err, "root advance failed"),
        }
    }
}
