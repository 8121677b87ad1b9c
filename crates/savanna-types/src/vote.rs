use crate::block_id::BlockId;
use crate::digest::Digest;
use crate::error::TypesError;
use crate::keys::{BlsPublicKey, BlsSignature};
use crate::pack::{Pack, Unpack};

/// Domain label prepended to the finality digest before hashing to G2 for a
/// strong vote.
pub const STRONG_VOTE_DOMAIN: [u8; 2] = [0x00, 0x00];

/// Domain label for a weak vote.
pub const WEAK_VOTE_DOMAIN: [u8; 2] = [0x00, 0x01];

/// The exact message a finalizer signs: a two-byte big-endian domain label
/// followed by the block's finality digest.
pub fn vote_payload(finality_digest: &Digest, strong: bool) -> [u8; 34] {
    let mut payload = [0u8; 34];
    payload[..2].copy_from_slice(if strong {
        &STRONG_VOTE_DOMAIN
    } else {
        &WEAK_VOTE_DOMAIN
    });
    payload[2..].copy_from_slice(finality_digest.as_bytes());
    payload
}

/// A finalizer's vote on a block, as sent over the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoteMessage {
    pub block_id: BlockId,
    pub finalizer_key: BlsPublicKey,
    pub strong: bool,
    pub signature: BlsSignature,
}

impl Pack for VoteMessage {
    fn pack(&self, out: &mut Vec<u8>) {
        self.block_id.pack(out);
        self.finalizer_key.pack(out);
        self.strong.pack(out);
        self.signature.pack(out);
    }
}

impl Unpack for VoteMessage {
    fn unpack(buf: &mut &[u8]) -> Result<Self, TypesError> {
        Ok(Self {
            block_id: BlockId::unpack(buf)?,
            finalizer_key: BlsPublicKey::unpack(buf)?,
            strong: bool::unpack(buf)?,
            signature: BlsSignature::unpack(buf)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_domains_differ() {
        let digest = Digest::hash(b"finality");
        let strong = vote_payload(&digest, true);
        let weak = vote_payload(&digest, false);
        assert_ne!(strong, weak);
        assert_eq!(&strong[2..], digest.as_bytes());
        assert_eq!(&weak[2..], digest.as_bytes());
        assert_eq!(strong[..2], [0, 0]);
        assert_eq!(weak[..2], [0, 1]);
    }

    #[test]
    fn test_vote_roundtrip() {
        let vote = VoteMessage {
            block_id: BlockId::from_digest(Digest::hash(b"block"), 7),
            strong: true,
            finalizer_key: BlsPublicKey::from_bytes([3u8; 96]),
            signature: BlsSignature::from_bytes([4u8; 192]),
        };
        assert_eq!(VoteMessage::unpack_exact(&vote.packed()).unwrap(), vote);
    }
}
