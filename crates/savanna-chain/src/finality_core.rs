use crate::error::ChainError;
use savanna_types::pack::{Pack, Unpack};
use savanna_types::{QcClaim, TypesError};

/// Per-block finality bookkeeping realizing the two-chain rule.
///
/// A strong QC on this block finalizes `final_on_strong_qc_block_num`; that
/// field is the block's own QC claim when the claim is strong, and `None`
/// after a weak claim. `last_final_block_num` is the highest block already
/// guaranteed final on this branch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FinalityCore {
    pub current_block_num: u32,
    pub latest_qc_claim: QcClaim,
    pub final_on_strong_qc_block_num: Option<u32>,
    pub last_final_block_num: u32,
}

impl FinalityCore {
    /// Core of an irreversible starting block: it claims itself strongly and
    /// is its own finality frontier.
    pub fn genesis(block_num: u32) -> Self {
        Self {
            current_block_num: block_num,
            latest_qc_claim: QcClaim {
                block_num,
                is_strong: true,
            },
            final_on_strong_qc_block_num: Some(block_num),
            last_final_block_num: block_num,
        }
    }

    pub fn last_qc_block_num(&self) -> u32 {
        self.latest_qc_claim.block_num
    }

    /// Advance the core by one block carrying `claim`.
    ///
    /// `claimed` is the core of the ancestor the claim refers to; it is only
    /// consulted for strong claims, where the two-chain rule finalizes the
    /// claimed block's own strong-QC target.
    pub fn next(&self, claim: QcClaim, claimed: &FinalityCore) -> Result<FinalityCore, ChainError> {
        if claim.block_num > self.current_block_num {
            return Err(ChainError::InvalidQcClaim(format!(
                "claim on block {} is ahead of parent block {}",
                claim.block_num, self.current_block_num
            )));
        }
        if claim.block_num < self.latest_qc_claim.block_num {
            return Err(ChainError::InvalidQcClaim(format!(
                "claim on block {} retreats behind previous claim on {}",
                claim.block_num, self.latest_qc_claim.block_num
            )));
        }
        if claim.block_num == self.latest_qc_claim.block_num
            && self.latest_qc_claim.is_strong
            && !claim.is_strong
        {
            return Err(ChainError::InvalidQcClaim(format!(
                "weak claim on block {} downgrades an existing strong claim",
                claim.block_num
            )));
        }
        // an unchanged claim carries no new information: everything is
        // inherited, and the claimed block may already be behind the root
        if claim == self.latest_qc_claim {
            return Ok(FinalityCore {
                current_block_num: self.current_block_num + 1,
                latest_qc_claim: claim,
                final_on_strong_qc_block_num: self.final_on_strong_qc_block_num,
                last_final_block_num: self.last_final_block_num,
            });
        }

        if claimed.current_block_num != claim.block_num {
            return Err(ChainError::InvalidQcClaim(format!(
                "claimed core is for block {} but claim references {}",
                claimed.current_block_num, claim.block_num
            )));
        }

        let (final_on_strong_qc_block_num, last_final_block_num) = if claim.is_strong {
            // strong QC on the new block would finalize its claim target; the
            // claim itself finalizes whatever the claimed block would have
            // finalized under a strong QC
            let last_final = claimed
                .final_on_strong_qc_block_num
                .unwrap_or(self.last_final_block_num)
                .max(self.last_final_block_num);
            (Some(claim.block_num), last_final)
        } else {
            (None, self.last_final_block_num)
        };

        Ok(FinalityCore {
            current_block_num: self.current_block_num + 1,
            latest_qc_claim: claim,
            final_on_strong_qc_block_num,
            last_final_block_num,
        })
    }
}

impl Pack for FinalityCore {
    fn pack(&self, out: &mut Vec<u8>) {
        self.current_block_num.pack(out);
        self.latest_qc_claim.pack(out);
        self.final_on_strong_qc_block_num.pack(out);
        self.last_final_block_num.pack(out);
    }
}

impl Unpack for FinalityCore {
    fn unpack(buf: &mut &[u8]) -> Result<Self, TypesError> {
        Ok(Self {
            current_block_num: u32::unpack(buf)?,
            latest_qc_claim: QcClaim::unpack(buf)?,
            final_on_strong_qc_block_num: Option::unpack(buf)?,
            last_final_block_num: u32::unpack(buf)?,
        })
    }
}
