use thiserror::Error;

/// Errors produced while decoding or validating core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypesError {
    #[error("Invalid digest length: {0}")]
    InvalidDigestLength(usize),

    #[error("Invalid public key length: expected {expected}, got {actual}")]
    InvalidPublicKeyLength { expected: usize, actual: usize },

    #[error("Invalid signature length: expected {expected}, got {actual}")]
    InvalidSignatureLength { expected: usize, actual: usize },

    #[error("Invalid hex encoding: {0}")]
    InvalidHex(String),

    #[error("Invalid account name: {0}")]
    InvalidName(String),

    #[error("Unexpected end of input while unpacking {0}")]
    StreamUnderflow(&'static str),

    #[error("{0} trailing bytes after unpacking")]
    TrailingBytes(usize),

    #[error("Varint overflows 32 bits")]
    VarintOverflow,

    #[error("Invalid boolean byte: {0}")]
    InvalidBool(u8),

    #[error("Invalid option flag byte: {0}")]
    InvalidOptionFlag(u8),

    #[error("Invalid UTF-8 in packed string")]
    InvalidUtf8,

    #[error("Duplicate header extension id {0}")]
    DuplicateExtension(u16),

    #[error("Invalid bitset: {0}")]
    InvalidBitset(String),

    #[error("Invalid finalizer policy: {0}")]
    InvalidPolicy(String),
}

impl From<hex::FromHexError> for TypesError {
    fn from(err: hex::FromHexError) -> Self {
        TypesError::InvalidHex(err.to_string())
    }
}
