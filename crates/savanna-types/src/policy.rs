use crate::digest::Digest;
use crate::error::TypesError;
use crate::keys::BlsPublicKey;
use crate::pack::{Pack, Unpack};

/// One finalizer in a policy: a descriptive label, a voting weight, and the
/// BLS public key its votes are verified against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinalizerAuthority {
    pub description: String,
    pub weight: u64,
    pub public_key: BlsPublicKey,
}

impl Pack for FinalizerAuthority {
    fn pack(&self, out: &mut Vec<u8>) {
        self.description.pack(out);
        self.weight.pack(out);
        self.public_key.pack(out);
    }
}

impl Unpack for FinalizerAuthority {
    fn unpack(buf: &mut &[u8]) -> Result<Self, TypesError> {
        Ok(Self {
            description: String::unpack(buf)?,
            weight: u64::unpack(buf)?,
            public_key: BlsPublicKey::unpack(buf)?,
        })
    }
}

/// The versioned roster of finalizers permitted to produce quorum
/// certificates.
///
/// `generation` strictly increases across installed policies. `threshold`
/// is the weight sum a certificate must represent; it must exceed half of
/// the total weight.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinalizerPolicy {
    pub generation: u32,
    pub threshold: u64,
    pub finalizers: Vec<FinalizerAuthority>,
}

impl FinalizerPolicy {
    /// Hash of the canonical packed representation.
    pub fn digest(&self) -> Digest {
        Digest::hash(&self.packed())
    }

    pub fn total_weight(&self) -> u64 {
        self.finalizers.iter().map(|f| f.weight).sum()
    }

    /// Index of a finalizer by public key within this policy's roster.
    pub fn finalizer_index(&self, key: &BlsPublicKey) -> Option<usize> {
        self.finalizers.iter().position(|f| &f.public_key == key)
    }

    pub fn finalizer_count(&self) -> usize {
        self.finalizers.len()
    }

    /// The weight an adversary can hold without blocking liveness.
    pub fn max_weak_sum(&self) -> u64 {
        self.total_weight() - self.threshold
    }

    pub fn validate(&self) -> Result<(), TypesError> {
        if self.finalizers.is_empty() {
            return Err(TypesError::InvalidPolicy("no finalizers".into()));
        }
        if self.finalizers.iter().any(|f| f.weight == 0) {
            return Err(TypesError::InvalidPolicy("zero-weight finalizer".into()));
        }
        for (i, f) in self.finalizers.iter().enumerate() {
            if self.finalizers[..i].iter().any(|g| g.public_key == f.public_key) {
                return Err(TypesError::InvalidPolicy(format!(
                    "duplicate finalizer key at index {i}"
                )));
            }
        }
        let total = self.total_weight();
        if self.threshold <= total / 2 {
            return Err(TypesError::InvalidPolicy(format!(
                "threshold {} does not exceed half of total weight {total}",
                self.threshold
            )));
        }
        if self.threshold > total {
            return Err(TypesError::InvalidPolicy(format!(
                "threshold {} exceeds total weight {total}",
                self.threshold
            )));
        }
        Ok(())
    }
}

impl Pack for FinalizerPolicy {
    fn pack(&self, out: &mut Vec<u8>) {
        self.generation.pack(out);
        self.threshold.pack(out);
        self.finalizers.pack(out);
    }
}

impl Unpack for FinalizerPolicy {
    fn unpack(buf: &mut &[u8]) -> Result<Self, TypesError> {
        Ok(Self {
            generation: u32::unpack(buf)?,
            threshold: u64::unpack(buf)?,
            finalizers: Vec::unpack(buf)?,
        })
    }
}
