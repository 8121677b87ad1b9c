use crate::error::TypesError;
use crate::keys::BlsSignature;
use crate::pack::{Pack, Unpack, VarUint32};
use crate::policy::FinalizerPolicy;

/// Header extension id carrying the finality payload.
pub const FINALITY_EXTENSION_ID: u16 = 2;

/// Block extension id carrying additional proposer signatures.
pub const ADDITIONAL_SIGNATURES_EXTENSION_ID: u16 = 2;

/// The proposer's claim about the best quorum certificate it has seen on an
/// ancestor of the block carrying the claim.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QcClaim {
    pub block_num: u32,
    pub is_strong: bool,
}

impl Pack for QcClaim {
    fn pack(&self, out: &mut Vec<u8>) {
        self.block_num.pack(out);
        self.is_strong.pack(out);
    }
}

impl Unpack for QcClaim {
    fn unpack(buf: &mut &[u8]) -> Result<Self, TypesError> {
        Ok(Self {
            block_num: u32::unpack(buf)?,
            is_strong: bool::unpack(buf)?,
        })
    }
}

/// Finality header extension: the QC claim, plus the proposed finalizer
/// policy when the producer schedules a policy change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinalityExtension {
    pub qc_claim: QcClaim,
    pub new_finalizer_policy: Option<FinalizerPolicy>,
    pub new_pending_policy_diff: Option<Vec<u8>>,
}

impl FinalityExtension {
    pub fn claim_only(qc_claim: QcClaim) -> Self {
        Self {
            qc_claim,
            new_finalizer_policy: None,
            new_pending_policy_diff: None,
        }
    }
}

impl Pack for FinalityExtension {
    fn pack(&self, out: &mut Vec<u8>) {
        self.qc_claim.pack(out);
        self.new_finalizer_policy.pack(out);
        match &self.new_pending_policy_diff {
            Some(diff) => {
                out.push(1);
                VarUint32(diff.len() as u32).pack(out);
                out.extend_from_slice(diff);
            }
            None => out.push(0),
        }
    }
}

impl Unpack for FinalityExtension {
    fn unpack(buf: &mut &[u8]) -> Result<Self, TypesError> {
        let qc_claim = QcClaim::unpack(buf)?;
        let new_finalizer_policy = Option::<FinalizerPolicy>::unpack(buf)?;
        let new_pending_policy_diff = match u8::unpack(buf)? {
            0 => None,
            1 => {
                let len = VarUint32::unpack(buf)?.0 as usize;
                Some(crate::pack::take(buf, len, "policy diff")?.to_vec())
            }
            b => return Err(TypesError::InvalidOptionFlag(b)),
        };
        Ok(Self {
            qc_claim,
            new_finalizer_policy,
            new_pending_policy_diff,
        })
    }
}

/// Additional proposer signatures, carried as a block extension when a
/// producer co-signs with more than one key.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct AdditionalSignatures {
    pub signatures: Vec<BlsSignature>,
}

impl Pack for AdditionalSignatures {
    fn pack(&self, out: &mut Vec<u8>) {
        self.signatures.pack(out);
    }
}

impl Unpack for AdditionalSignatures {
    fn unpack(buf: &mut &[u8]) -> Result<Self, TypesError> {
        Ok(Self {
            signatures: Vec::unpack(buf)?,
        })
    }
}
