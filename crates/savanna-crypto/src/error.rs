use thiserror::Error;

/// Errors from cryptographic operations. All are non-fatal to the node; a
/// vote or certificate that fails here is dropped with the reason preserved.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Invalid private key")]
    InvalidPrivateKey,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Signature verification failed")]
    VerificationFailed,

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("BLS aggregation error: {0}")]
    AggregationError(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for CryptoError {
    fn from(err: std::io::Error) -> Self {
        CryptoError::Io(err.to_string())
    }
}
