use crate::error::ChainError;
use crate::finality_core::FinalityCore;
use savanna_types::pack::{Pack, Unpack};
use savanna_types::{
    BlockHeader, BlockId, BlockTimestamp, Digest, FinalizerPolicy,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Version of the finality digest layout.
pub const FINALITY_DIGEST_MAJOR_VERSION: u32 = 1;
pub const FINALITY_DIGEST_MINOR_VERSION: u32 = 0;

/// Derived per-block state.
///
/// Constructed once when a block is first seen, mutated only to flip
/// `validated` after execution succeeds. The fork database owns every
/// instance; everything else holds `Arc` references.
#[derive(Debug)]
pub struct BlockState {
    id: BlockId,
    pub header: BlockHeader,
    pub core: FinalityCore,
    pub active_finalizer_policy: Arc<FinalizerPolicy>,
    /// Policy proposed but not yet final, with the block number that
    /// proposed it.
    pub pending_finalizer_policy: Option<(u32, Arc<FinalizerPolicy>)>,
    /// Merkle root over committed finality data of predecessors.
    pub finality_mroot: Digest,
    witness_hash: Digest,
    finality_digest: Digest,
    validated: AtomicBool,
}

fn static_data_digest(header: &BlockHeader) -> Digest {
    Digest::hash(&header.packed())
}

fn witness_hash_for(header: &BlockHeader, new_policy: Option<&FinalizerPolicy>) -> Digest {
    let static_digest = static_data_digest(header);
    match new_policy {
        Some(policy) => {
            let mut bytes = Vec::with_capacity(64);
            bytes.extend_from_slice(policy.digest().as_bytes());
            bytes.extend_from_slice(static_digest.as_bytes());
            Digest::hash(&bytes)
        }
        None => static_digest,
    }
}

fn compute_finality_digest(
    generation: u32,
    finality_mroot: &Digest,
    witness_hash: &Digest,
) -> Digest {
    let mut bytes = Vec::with_capacity(76);
    FINALITY_DIGEST_MAJOR_VERSION.pack(&mut bytes);
    FINALITY_DIGEST_MINOR_VERSION.pack(&mut bytes);
    generation.pack(&mut bytes);
    finality_mroot.pack(&mut bytes);
    witness_hash.pack(&mut bytes);
    Digest::hash(&bytes)
}

impl BlockState {
    /// State of an irreversible starting block installing `policy`.
    pub fn genesis(
        header: BlockHeader,
        policy: FinalizerPolicy,
        finality_mroot: Digest,
    ) -> Result<Self, ChainError> {
        policy.validate()?;
        let id = header.compute_id();
        let core = FinalityCore::genesis(header.block_num());
        let witness_hash = witness_hash_for(&header, Some(&policy));
        let finality_digest = compute_finality_digest(policy.generation, &finality_mroot, &witness_hash);
        Ok(Self {
            id,
            header,
            core,
            active_finalizer_policy: Arc::new(policy),
            pending_finalizer_policy: None,
            finality_mroot,
            witness_hash,
            finality_digest,
            validated: AtomicBool::new(false),
        })
    }

    /// Build the state of a block extending `parent`.
    ///
    /// `claimed_core` is the finality core of the ancestor the header's QC
    /// claim refers to. `finality_mroot` comes from executing the block.
    pub fn next(
        parent: &BlockState,
        header: BlockHeader,
        claimed_core: &FinalityCore,
        finality_mroot: Digest,
    ) -> Result<Self, ChainError> {
        if header.previous != parent.id {
            return Err(ChainError::Unlinkable {
                id: header.compute_id(),
                previous: header.previous,
            });
        }
        if header.timestamp <= parent.header.timestamp {
            return Err(ChainError::InvalidHeader(format!(
                "timestamp {} does not advance past parent {}",
                header.timestamp, parent.header.timestamp
            )));
        }

        let extension = header.finality_extension()?.ok_or_else(|| {
            ChainError::InvalidHeader("missing finality extension".to_string())
        })?;

        let core = parent.core.next(extension.qc_claim, claimed_core)?;

        // inherit policies, promoting a pending policy whose proposing block
        // has become final
        let mut active = parent.active_finalizer_policy.clone();
        let mut pending = parent.pending_finalizer_policy.clone();
        if let Some((proposed_in, policy)) = &pending {
            if *proposed_in <= core.last_final_block_num {
                active = policy.clone();
                pending = None;
            }
        }

        if let Some(new_policy) = &extension.new_finalizer_policy {
            new_policy.validate()?;
            if pending.is_some() {
                return Err(ChainError::InvalidPolicyTransition(
                    "a finalizer policy change is already pending".to_string(),
                ));
            }
            if new_policy.generation <= active.generation {
                return Err(ChainError::InvalidPolicyTransition(format!(
                    "policy generation {} does not advance past active generation {}",
                    new_policy.generation, active.generation
                )));
            }
            pending = Some((header.block_num(), Arc::new(new_policy.clone())));
        }

        let witness_hash = witness_hash_for(&header, extension.new_finalizer_policy.as_ref());
        let finality_digest =
            compute_finality_digest(active.generation, &finality_mroot, &witness_hash);

        Ok(Self {
            id: header.compute_id(),
            header,
            core,
            active_finalizer_policy: active,
            pending_finalizer_policy: pending,
            finality_mroot,
            witness_hash,
            finality_digest,
            validated: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn previous(&self) -> BlockId {
        self.header.previous
    }

    pub fn block_num(&self) -> u32 {
        self.core.current_block_num
    }

    pub fn timestamp(&self) -> BlockTimestamp {
        self.header.timestamp
    }

    pub fn last_final_block_num(&self) -> u32 {
        self.core.last_final_block_num
    }

    pub fn last_qc_block_num(&self) -> u32 {
        self.core.last_qc_block_num()
    }

    /// The exact commitment finalizers sign over.
    pub fn finality_digest(&self) -> Digest {
        self.finality_digest
    }

    pub fn witness_hash(&self) -> Digest {
        self.witness_hash
    }

    pub fn is_valid(&self) -> bool {
        self.validated.load(Ordering::Acquire)
    }

    pub(crate) fn set_valid(&self, valid: bool) {
        self.validated.store(valid, Ordering::Release);
    }

    /// Pack for the fork database file. Digests and the id are recomputed on
    /// load.
    pub fn pack_state(&self, out: &mut Vec<u8>) {
        self.header.pack(out);
        self.core.pack(out);
        self.active_finalizer_policy.as_ref().pack(out);
        match &self.pending_finalizer_policy {
            Some((proposed_in, policy)) => {
                out.push(1);
                proposed_in.pack(out);
                policy.as_ref().pack(out);
            }
            None => out.push(0),
        }
        self.finality_mroot.pack(out);
        self.is_valid().pack(out);
    }

    pub fn unpack_state(buf: &mut &[u8]) -> Result<Self, ChainError> {
        let header = BlockHeader::unpack(buf)?;
        let core = FinalityCore::unpack(buf)?;
        let active = FinalizerPolicy::unpack(buf)?;
        let pending = match u8::unpack(buf)? {
            0 => None,
            1 => {
                let proposed_in = u32::unpack(buf)?;
                Some((proposed_in, Arc::new(FinalizerPolicy::unpack(buf)?)))
            }
            b => return Err(savanna_types::TypesError::InvalidOptionFlag(b).into()),
        };
        let finality_mroot = Digest::unpack(buf)?;
        let validated = bool::unpack(buf)?;

        let new_policy = header.finality_extension()?.and_then(|e| e.new_finalizer_policy);
        let witness_hash = witness_hash_for(&header, new_policy.as_ref());
        let finality_digest =
            compute_finality_digest(active.generation, &finality_mroot, &witness_hash);

        Ok(Self {
            id: header.compute_id(),
            header,
            core,
            active_finalizer_policy: Arc::new(active),
            pending_finalizer_policy: pending,
            finality_mroot,
            witness_hash,
            finality_digest,
            validated: AtomicBool::new(validated),
        })
    }
}

impl PartialEq for BlockState {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.header == other.header
            && self.core == other.core
            && self.active_finalizer_policy == other.active_finalizer_policy
            && self.pending_finalizer_policy == other.pending_finalizer_policy
            && self.finality_mroot == other.finality_mroot
    }
}

impl Eq for BlockState {}

#[cfg(test)]
mod tests {
    use super::*;
    use savanna_types::{
        AccountName, FinalityExtension, FinalizerAuthority, QcClaim,
    };

    fn test_policy(generation: u32) -> FinalizerPolicy {
        FinalizerPolicy {
            generation,
            threshold: 2,
            finalizers: (0..3u8)
                .map(|i| FinalizerAuthority {
                    description: format!("node{}", i + 1),
                    weight: 1,
                    public_key: savanna_types::BlsPublicKey::from_bytes([i + 1; 96]),
                })
                .collect(),
        }
    }

    fn child_header(parent: &BlockState, claim: QcClaim) -> BlockHeader {
        let mut header = BlockHeader {
            producer: "node1".parse::<AccountName>().unwrap(),
            timestamp: parent.timestamp().next(),
            previous: parent.id(),
            ..Default::default()
        };
        header
            .set_finality_extension(&FinalityExtension::claim_only(claim))
            .unwrap();
        header
    }

    fn genesis() -> BlockState {
        let header = BlockHeader {
            producer: "node1".parse::<AccountName>().unwrap(),
            timestamp: BlockTimestamp::new(100),
            previous: BlockId::ZERO,
            ..Default::default()
        };
        BlockState::genesis(header, test_policy(1), Digest::hash(b"mroot")).unwrap()
    }

    #[test]
    fn test_genesis_state() {
        let state = genesis();
        assert_eq!(state.block_num(), 1);
        assert_eq!(state.last_final_block_num(), 1);
        assert_eq!(state.last_qc_block_num(), 1);
        assert!(!state.is_valid());
        assert_eq!(state.active_finalizer_policy.generation, 1);
    }

    #[test]
    fn test_next_advances_core() {
        let root = genesis();
        let header = child_header(
            &root,
            QcClaim {
                block_num: root.block_num(),
                is_strong: true,
            },
        );
        let state = BlockState::next(&root, header, &root.core, Digest::hash(b"mroot2")).unwrap();
        assert_eq!(state.block_num(), root.block_num() + 1);
        assert_eq!(state.previous(), root.id());
        assert_eq!(state.last_qc_block_num(), root.block_num());
    }

    #[test]
    fn test_next_rejects_wrong_parent() {
        let root = genesis();
        let mut header = child_header(
            &root,
            QcClaim {
                block_num: root.block_num(),
                is_strong: true,
            },
        );
        header.previous = BlockId::from_digest(Digest::hash(b"elsewhere"), root.block_num());
        assert!(matches!(
            BlockState::next(&root, header, &root.core, Digest::ZERO),
            Err(ChainError::Unlinkable { .. })
        ));
    }

    #[test]
    fn test_next_rejects_stale_timestamp() {
        let root = genesis();
        let mut header = child_header(
            &root,
            QcClaim {
                block_num: root.block_num(),
                is_strong: true,
            },
        );
        header.timestamp = root.timestamp();
        assert!(matches!(
            BlockState::next(&root, header, &root.core, Digest::ZERO),
            Err(ChainError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_next_requires_finality_extension() {
        let root = genesis();
        let header = BlockHeader {
            producer: "node1".parse::<AccountName>().unwrap(),
            timestamp: root.timestamp().next(),
            previous: root.id(),
            ..Default::default()
        };
        assert!(matches!(
            BlockState::next(&root, header, &root.core, Digest::ZERO),
            Err(ChainError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_finality_digest_commits_to_mroot() {
        let root = genesis();
        let claim = QcClaim {
            block_num: root.block_num(),
            is_strong: true,
        };
        let a = BlockState::next(&root, child_header(&root, claim), &root.core, Digest::hash(b"m1"))
            .unwrap();
        let b = BlockState::next(&root, child_header(&root, claim), &root.core, Digest::hash(b"m2"))
            .unwrap();
        assert_ne!(a.finality_digest(), b.finality_digest());
    }

    #[test]
    fn test_new_policy_becomes_pending_then_active() {
        let root = genesis();
        let base = root.block_num();

        // block carrying a new policy proposal
        let mut header = child_header(
            &root,
            QcClaim {
                block_num: base,
                is_strong: true,
            },
        );
        header.header_extensions.clear();
        header
            .set_finality_extension(&FinalityExtension {
                qc_claim: QcClaim {
                    block_num: base,
                    is_strong: true,
                },
                new_finalizer_policy: Some(test_policy(2)),
                new_pending_policy_diff: None,
            })
            .unwrap();
        let proposer =
            BlockState::next(&root, header, &root.core, Digest::hash(b"m")).unwrap();
        assert_eq!(proposer.active_finalizer_policy.generation, 1);
        let (proposed_in, pending) = proposer.pending_finalizer_policy.clone().unwrap();
        assert_eq!(proposed_in, proposer.block_num());
        assert_eq!(pending.generation, 2);

        // the proposal contributes to the witness hash
        assert_ne!(proposer.witness_hash(), static_data_digest(&proposer.header));

        // extend with strong claims until the proposing block is final
        let mut parent = proposer;
        loop {
            let claim = QcClaim {
                block_num: parent.block_num(),
                is_strong: true,
            };
            let state =
                BlockState::next(&parent, child_header(&parent, claim), &parent.core, Digest::ZERO)
                    .unwrap();
            let done = state.last_final_block_num() >= proposed_in;
            parent = state;
            if done {
                break;
            }
        }
        assert_eq!(parent.active_finalizer_policy.generation, 2);
        assert!(parent.pending_finalizer_policy.is_none());
    }

    #[test]
    fn test_second_proposal_while_pending_rejected() {
        let root = genesis();
        let base = root.block_num();
        let mut header = child_header(
            &root,
            QcClaim {
                block_num: base,
                is_strong: true,
            },
        );
        header.header_extensions.clear();
        header
            .set_finality_extension(&FinalityExtension {
                qc_claim: QcClaim {
                    block_num: base,
                    is_strong: true,
                },
                new_finalizer_policy: Some(test_policy(2)),
                new_pending_policy_diff: None,
            })
            .unwrap();
        let proposer = BlockState::next(&root, header, &root.core, Digest::ZERO).unwrap();

        let mut header2 = child_header(
            &proposer,
            QcClaim {
                block_num: base,
                is_strong: true,
            },
        );
        header2.header_extensions.clear();
        header2
            .set_finality_extension(&FinalityExtension {
                qc_claim: QcClaim {
                    block_num: base,
                    is_strong: true,
                },
                new_finalizer_policy: Some(test_policy(3)),
                new_pending_policy_diff: None,
            })
            .unwrap();
        assert!(matches!(
            BlockState::next(&proposer, header2, &root.core, Digest::ZERO),
            Err(ChainError::InvalidPolicyTransition(_))
        ));
    }

    #[test]
    fn test_stale_generation_rejected() {
        let root = genesis();
        let base = root.block_num();
        let mut header = child_header(
            &root,
            QcClaim {
                block_num: base,
                is_strong: true,
            },
        );
        header.header_extensions.clear();
        header
            .set_finality_extension(&FinalityExtension {
                qc_claim: QcClaim {
                    block_num: base,
                    is_strong: true,
                },
                new_finalizer_policy: Some(test_policy(1)), // does not advance
                new_pending_policy_diff: None,
            })
            .unwrap();
        assert!(matches!(
            BlockState::next(&root, header, &root.core, Digest::ZERO),
            Err(ChainError::InvalidPolicyTransition(_))
        ));
    }

    #[test]
    fn test_pack_state_roundtrip() {
        let root = genesis();
        let claim = QcClaim {
            block_num: root.block_num(),
            is_strong: true,
        };
        let state = BlockState::next(&root, child_header(&root, claim), &root.core, Digest::hash(b"m"))
            .unwrap();

        let mut bytes = Vec::new();
        state.pack_state(&mut bytes);
        let mut buf = bytes.as_slice();
        let decoded = BlockState::unpack_state(&mut buf).unwrap();
        assert!(buf.is_empty());
        assert_eq!(decoded, state);
        assert_eq!(decoded.finality_digest(), state.finality_digest());
        assert!(!decoded.is_valid());
    }
}
