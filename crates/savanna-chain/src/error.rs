use savanna_types::{BlockId, TypesError};
use thiserror::Error;

/// Errors from block-state construction and the fork database.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("Unlinkable block {id}: previous block {previous} not found")]
    Unlinkable { id: BlockId, previous: BlockId },

    #[error("Duplicate block added: {0}")]
    DuplicateBlock(BlockId),

    #[error("Block not found in fork database: {0}")]
    UnknownBlock(BlockId),

    #[error("Block has not been validated: {0}")]
    NotValidated(BlockId),

    #[error("Removing {0} and its descendants would remove the current head block")]
    WouldRemoveHead(BlockId),

    #[error("Fork database root not yet set")]
    RootNotSet,

    #[error("Invalid block header: {0}")]
    InvalidHeader(String),

    #[error("Invalid QC claim: {0}")]
    InvalidQcClaim(String),

    #[error("Invalid finalizer policy transition: {0}")]
    InvalidPolicyTransition(String),

    #[error("Fork database error: {0}")]
    ForkDatabase(String),

    #[error("Type error: {0}")]
    Types(#[from] TypesError),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use savanna_types::Digest;

    #[test]
    fn test_error_display() {
        let id = BlockId::from_digest(Digest::hash(b"x"), 5);
        let err = ChainError::UnknownBlock(id);
        assert!(err.to_string().contains("not found"));
    }
}
