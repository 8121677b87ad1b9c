use crate::block_id::BlockId;
use crate::digest::Digest;
use crate::error::TypesError;
use crate::extension::{FinalityExtension, FINALITY_EXTENSION_ID};
use crate::name::AccountName;
use crate::pack::{take, Pack, Unpack, VarUint32};
use crate::timestamp::BlockTimestamp;
use std::fmt;

/// Block header.
///
/// Extensions are typed by a u16 id; unknown ids are preserved untouched.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct BlockHeader {
    pub producer: AccountName,
    pub timestamp: BlockTimestamp,
    pub previous: BlockId,
    pub action_mroot: Digest,
    pub transaction_mroot: Digest,
    pub schedule_version: u32,
    pub header_extensions: Vec<(u16, Vec<u8>)>,
}

impl BlockHeader {
    /// Height of the block carrying this header.
    pub fn block_num(&self) -> u32 {
        self.previous.block_num() + 1
    }

    /// Block id: SHA-256 of the packed header with the block number spliced
    /// over the first four bytes.
    pub fn compute_id(&self) -> BlockId {
        BlockId::from_digest(Digest::hash(&self.packed()), self.block_num())
    }

    /// Extract the finality extension.
    ///
    /// At most one finality extension is permitted per header; a duplicate is
    /// a decode error rather than a lower-bound lookup.
    pub fn finality_extension(&self) -> Result<Option<FinalityExtension>, TypesError> {
        let mut found: Option<&[u8]> = None;
        for (id, data) in &self.header_extensions {
            if *id == FINALITY_EXTENSION_ID {
                if found.is_some() {
                    return Err(TypesError::DuplicateExtension(FINALITY_EXTENSION_ID));
                }
                found = Some(data);
            }
        }
        found
            .map(FinalityExtension::unpack_exact)
            .transpose()
    }

    /// Attach a finality extension, replacing none; fails if one is present.
    pub fn set_finality_extension(&mut self, ext: &FinalityExtension) -> Result<(), TypesError> {
        if self.finality_extension()?.is_some() {
            return Err(TypesError::DuplicateExtension(FINALITY_EXTENSION_ID));
        }
        self.header_extensions
            .push((FINALITY_EXTENSION_ID, ext.packed()));
        Ok(())
    }
}

impl Pack for BlockHeader {
    fn pack(&self, out: &mut Vec<u8>) {
        self.producer.pack(out);
        self.timestamp.pack(out);
        self.previous.pack(out);
        self.action_mroot.pack(out);
        self.transaction_mroot.pack(out);
        self.schedule_version.pack(out);
        VarUint32(self.header_extensions.len() as u32).pack(out);
        for (id, data) in &self.header_extensions {
            id.pack(out);
            VarUint32(data.len() as u32).pack(out);
            out.extend_from_slice(data);
        }
    }
}

impl Unpack for BlockHeader {
    fn unpack(buf: &mut &[u8]) -> Result<Self, TypesError> {
        let producer = AccountName::unpack(buf)?;
        let timestamp = BlockTimestamp::unpack(buf)?;
        let previous = BlockId::unpack(buf)?;
        let action_mroot = Digest::unpack(buf)?;
        let transaction_mroot = Digest::unpack(buf)?;
        let schedule_version = u32::unpack(buf)?;
        let count = VarUint32::unpack(buf)?.0 as usize;
        let mut header_extensions = Vec::with_capacity(count.min(16));
        for _ in 0..count {
            let id = u16::unpack(buf)?;
            let len = VarUint32::unpack(buf)?.0 as usize;
            header_extensions.push((id, take(buf, len, "header extension")?.to_vec()));
        }
        Ok(Self {
            producer,
            timestamp,
            previous,
            action_mroot,
            transaction_mroot,
            schedule_version,
            header_extensions,
        })
    }
}

impl fmt::Display for BlockHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BlockHeader {{ num: {}, producer: {}, {} }}",
            self.block_num(),
            self.producer,
            self.timestamp
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::QcClaim;

    fn test_header() -> BlockHeader {
        BlockHeader {
            producer: "node1".parse().unwrap(),
            timestamp: BlockTimestamp::new(100),
            previous: BlockId::from_digest(Digest::hash(b"parent"), 41),
            action_mroot: Digest::hash(b"actions"),
            transaction_mroot: Digest::hash(b"transactions"),
            schedule_version: 1,
            header_extensions: Vec::new(),
        }
    }

    #[test]
    fn test_block_num_from_previous() {
        let header = test_header();
        assert_eq!(header.block_num(), 42);
    }

    #[test]
    fn test_id_invariant() {
        // block_num(id) always equals the number derived from the header
        let header = test_header();
        let id = header.compute_id();
        assert_eq!(id.block_num(), header.block_num());
    }

    #[test]
    fn test_id_is_deterministic_and_content_sensitive() {
        let header = test_header();
        assert_eq!(header.compute_id(), header.compute_id());

        let mut other = header.clone();
        other.schedule_version = 2;
        assert_ne!(header.compute_id(), other.compute_id());
    }

    #[test]
    fn test_pack_roundtrip() {
        let mut header = test_header();
        header
            .set_finality_extension(&FinalityExtension::claim_only(QcClaim {
                block_num: 40,
                is_strong: true,
            }))
            .unwrap();
        header.header_extensions.push((0xbeef, vec![1, 2, 3]));
        assert_eq!(BlockHeader::unpack_exact(&header.packed()).unwrap(), header);
    }

    #[test]
    fn test_unknown_extensions_preserved() {
        let mut header = test_header();
        header.header_extensions.push((0x7777, vec![9, 9]));
        let decoded = BlockHeader::unpack_exact(&header.packed()).unwrap();
        assert_eq!(decoded.header_extensions, header.header_extensions);
        assert!(decoded.finality_extension().unwrap().is_none());
    }

    #[test]
    fn test_duplicate_finality_extension_rejected() {
        let mut header = test_header();
        let ext = FinalityExtension::claim_only(QcClaim {
            block_num: 40,
            is_strong: true,
        });
        header.set_finality_extension(&ext).unwrap();
        assert_eq!(
            header.set_finality_extension(&ext),
            Err(TypesError::DuplicateExtension(FINALITY_EXTENSION_ID))
        );

        // a forged duplicate is also rejected on read
        header
            .header_extensions
            .push((FINALITY_EXTENSION_ID, ext.packed()));
        assert_eq!(
            header.finality_extension(),
            Err(TypesError::DuplicateExtension(FINALITY_EXTENSION_ID))
        );
    }

    #[test]
    fn test_finality_extension_roundtrip() {
        let mut header = test_header();
        let ext = FinalityExtension::claim_only(QcClaim {
            block_num: 40,
            is_strong: false,
        });
        header.set_finality_extension(&ext).unwrap();
        assert_eq!(header.finality_extension().unwrap(), Some(ext));
    }
}
