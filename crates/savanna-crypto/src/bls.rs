use crate::error::CryptoError;
use blst::min_pk::{AggregatePublicKey, AggregateSignature, PublicKey, SecretKey, Signature};
use blst::BLST_ERROR;
use rand::RngCore;
use savanna_types::{BlsPublicKey, BlsSignature};
use zeroize::Zeroize;

/// Ciphersuite for hashing vote payloads to G2. Must match peer
/// implementations bit-for-bit.
pub const BLS_DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

/// BLS12-381 keypair: public keys in G1 (96-byte affine), signatures in G2
/// (192-byte affine).
pub struct BlsKeypair {
    secret_key: SecretKey,
}

impl BlsKeypair {
    /// Generate a new random keypair.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut ikm = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut ikm);
        let secret_key = SecretKey::key_gen(&ikm, &[])
            .map_err(|e| CryptoError::KeyDerivationFailed(format!("{e:?}")))?;
        ikm.zeroize();
        Ok(Self { secret_key })
    }

    /// Derive a keypair deterministically from 32 bytes of keying material.
    pub fn from_seed(seed: &[u8; 32]) -> Result<Self, CryptoError> {
        let secret_key =
            SecretKey::key_gen(seed, &[]).map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self { secret_key })
    }

    /// Reconstruct from a serialized secret scalar.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let secret_key =
            SecretKey::deserialize(bytes).map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self { secret_key })
    }

    /// Serialized secret scalar.
    pub fn to_secret_bytes(&self) -> [u8; 32] {
        self.secret_key.serialize()
    }

    pub fn public_key(&self) -> BlsPublicKey {
        BlsPublicKey::from_bytes(self.secret_key.sk_to_pk().serialize())
    }

    /// Sign a message under the fixed ciphersuite.
    pub fn sign(&self, message: &[u8]) -> BlsSignature {
        let signature = self.secret_key.sign(message, BLS_DST, &[]);
        BlsSignature::from_bytes(signature.serialize())
    }
}

fn decode_public_key(key: &BlsPublicKey) -> Result<PublicKey, CryptoError> {
    PublicKey::deserialize(key.as_bytes()).map_err(|_| CryptoError::InvalidPublicKey)
}

fn decode_signature(sig: &BlsSignature) -> Result<Signature, CryptoError> {
    Signature::deserialize(sig.as_bytes()).map_err(|_| CryptoError::InvalidSignature)
}

/// Verify a single signature. Subgroup and infinity checks are performed on
/// both the key and the signature.
pub fn verify(
    public_key: &BlsPublicKey,
    message: &[u8],
    signature: &BlsSignature,
) -> Result<(), CryptoError> {
    let pk = decode_public_key(public_key)?;
    let sig = decode_signature(signature)?;

    match sig.verify(true, message, BLS_DST, &[], &pk, true) {
        BLST_ERROR::BLST_SUCCESS => Ok(()),
        _ => Err(CryptoError::VerificationFailed),
    }
}

/// Aggregate signatures by group addition. Order is irrelevant; an empty set
/// is an error.
pub fn aggregate_signatures(signatures: &[BlsSignature]) -> Result<BlsSignature, CryptoError> {
    if signatures.is_empty() {
        return Err(CryptoError::AggregationError(
            "cannot aggregate an empty signature set".to_string(),
        ));
    }

    let sigs: Vec<Signature> = signatures
        .iter()
        .map(decode_signature)
        .collect::<Result<Vec<_>, _>>()?;

    let aggregate = AggregateSignature::aggregate(&sigs.iter().collect::<Vec<_>>(), true)
        .map_err(|e| CryptoError::AggregationError(format!("{e:?}")))?;

    Ok(BlsSignature::from_bytes(aggregate.to_signature().serialize()))
}

/// Aggregate public keys by group addition.
pub fn aggregate_public_keys(public_keys: &[BlsPublicKey]) -> Result<BlsPublicKey, CryptoError> {
    if public_keys.is_empty() {
        return Err(CryptoError::AggregationError(
            "cannot aggregate an empty key set".to_string(),
        ));
    }

    let pks: Vec<PublicKey> = public_keys
        .iter()
        .map(decode_public_key)
        .collect::<Result<Vec<_>, _>>()?;

    let aggregate = AggregatePublicKey::aggregate(&pks.iter().collect::<Vec<_>>(), true)
        .map_err(|e| CryptoError::AggregationError(format!("{e:?}")))?;

    Ok(BlsPublicKey::from_bytes(aggregate.to_public_key().serialize()))
}

/// Verify an aggregate signature from `public_keys` over one common message.
pub fn verify_aggregate(
    public_keys: &[BlsPublicKey],
    message: &[u8],
    aggregate_signature: &BlsSignature,
) -> Result<(), CryptoError> {
    let agg_pk = aggregate_public_keys(public_keys)?;
    verify(&agg_pk, message, aggregate_signature)
}

/// Verify an aggregate signature where each key signed its own message.
/// Messages must be pairwise distinct; a mixed strong/weak certificate
/// verifies with one aggregated key per domain.
pub fn verify_multi(
    items: &[(BlsPublicKey, Vec<u8>)],
    aggregate_signature: &BlsSignature,
) -> Result<(), CryptoError> {
    if items.is_empty() {
        return Err(CryptoError::AggregationError(
            "cannot verify against an empty key set".to_string(),
        ));
    }

    let pks: Vec<PublicKey> = items
        .iter()
        .map(|(pk, _)| decode_public_key(pk))
        .collect::<Result<Vec<_>, _>>()?;
    let msgs: Vec<&[u8]> = items.iter().map(|(_, msg)| msg.as_slice()).collect();
    let sig = decode_signature(aggregate_signature)?;
    let pk_refs: Vec<&PublicKey> = pks.iter().collect();

    match sig.aggregate_verify(true, &msgs, BLS_DST, &pk_refs, true) {
        BLST_ERROR::BLST_SUCCESS => Ok(()),
        _ => Err(CryptoError::VerificationFailed),
    }
}
