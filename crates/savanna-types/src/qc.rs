use crate::bitset::Bitset;
use crate::block_id::BlockId;
use crate::error::TypesError;
use crate::extension::QcClaim;
use crate::keys::BlsSignature;
use crate::pack::{Pack, Unpack};
use std::fmt;

/// Certificate flavor: only strong certificates advance finality.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QcKind {
    Strong,
    Weak,
}

impl Pack for QcKind {
    fn pack(&self, out: &mut Vec<u8>) {
        matches!(self, QcKind::Strong).pack(out);
    }
}

impl Unpack for QcKind {
    fn unpack(buf: &mut &[u8]) -> Result<Self, TypesError> {
        Ok(if bool::unpack(buf)? {
            QcKind::Strong
        } else {
            QcKind::Weak
        })
    }
}

/// Quorum certificate: an aggregated BLS signature from finalizers whose
/// combined weight meets the threshold of the policy active at the claimed
/// block.
///
/// A strong certificate aggregates strong-domain signatures only. A weak
/// certificate may mix both domains (a strong vote also backs a weak
/// quorum), so the signer sets are tracked per domain and the aggregate is
/// verified against both messages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuorumCertificate {
    pub block_num: u32,
    pub block_id: BlockId,
    pub kind: QcKind,
    /// Finalizers whose signature covers the strong domain.
    pub strong_signers: Bitset,
    /// Finalizers whose signature covers the weak domain; empty for a
    /// strong certificate.
    pub weak_signers: Bitset,
    pub weight: u64,
    pub signature: BlsSignature,
}

impl QuorumCertificate {
    pub fn is_strong(&self) -> bool {
        self.kind == QcKind::Strong
    }

    pub fn signer_count(&self) -> u32 {
        self.strong_signers.count_ones() + self.weak_signers.count_ones()
    }

    /// The claim a producer embeds in the next header for this certificate.
    pub fn to_claim(&self) -> QcClaim {
        QcClaim {
            block_num: self.block_num,
            is_strong: self.is_strong(),
        }
    }
}

impl Pack for QuorumCertificate {
    fn pack(&self, out: &mut Vec<u8>) {
        self.block_num.pack(out);
        self.block_id.pack(out);
        self.kind.pack(out);
        self.strong_signers.pack(out);
        self.weak_signers.pack(out);
        self.weight.pack(out);
        self.signature.pack(out);
    }
}

impl Unpack for QuorumCertificate {
    fn unpack(buf: &mut &[u8]) -> Result<Self, TypesError> {
        Ok(Self {
            block_num: u32::unpack(buf)?,
            block_id: BlockId::unpack(buf)?,
            kind: QcKind::unpack(buf)?,
            strong_signers: Bitset::unpack(buf)?,
            weak_signers: Bitset::unpack(buf)?,
            weight: u64::unpack(buf)?,
            signature: BlsSignature::unpack(buf)?,
        })
    }
}

impl fmt::Display for QuorumCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "QC {{ block: {}, kind: {:?}, weight: {}, signers: {} }}",
            self.block_num,
            self.kind,
            self.weight,
            self.signer_count()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Digest;

    fn test_qc(kind: QcKind) -> QuorumCertificate {
        let mut strong_signers = Bitset::new(3);
        strong_signers.set(0).unwrap();
        let mut weak_signers = Bitset::new(3);
        if kind == QcKind::Weak {
            weak_signers.set(1).unwrap();
        } else {
            strong_signers.set(1).unwrap();
        }
        QuorumCertificate {
            block_num: 11,
            block_id: BlockId::from_digest(Digest::hash(b"eleven"), 11),
            kind,
            strong_signers,
            weak_signers,
            weight: 2,
            signature: BlsSignature::from_bytes([8u8; 192]),
        }
    }

    #[test]
    fn test_to_claim() {
        let claim = test_qc(QcKind::Strong).to_claim();
        assert_eq!(claim.block_num, 11);
        assert!(claim.is_strong);

        assert!(!test_qc(QcKind::Weak).to_claim().is_strong);
    }

    #[test]
    fn test_signer_count_spans_domains() {
        assert_eq!(test_qc(QcKind::Strong).signer_count(), 2);
        assert_eq!(test_qc(QcKind::Weak).signer_count(), 2);
    }

    #[test]
    fn test_pack_roundtrip() {
        for kind in [QcKind::Strong, QcKind::Weak] {
            let qc = test_qc(kind);
            assert_eq!(QuorumCertificate::unpack_exact(&qc.packed()).unwrap(), qc);
        }
    }
}
