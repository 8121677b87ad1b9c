use savanna_chain::ChainError;
use savanna_crypto::CryptoError;
use savanna_types::TypesError;
use thiserror::Error;

/// Errors from vote aggregation, finalizer safety, and the finality engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Type error: {0}")]
    Types(#[from] TypesError),

    #[error("Invalid quorum certificate: {0}")]
    InvalidQc(String),

    #[error("Finalizer safety violation: {0}")]
    SafetyViolation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ConsensusError {
    fn from(err: std::io::Error) -> Self {
        ConsensusError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConsensusError::InvalidQc("weight below threshold".to_string());
        assert!(err.to_string().contains("weight below threshold"));
    }

    #[test]
    fn test_chain_error_conversion() {
        let err: ConsensusError = ChainError::RootNotSet.into();
        assert!(matches!(err, ConsensusError::Chain(_)));
    }
}
