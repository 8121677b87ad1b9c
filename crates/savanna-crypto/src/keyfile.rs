//! Finalizer key files.
//!
//! Plain JSON with hex-encoded fields, written by the operator tooling and
//! read at startup to configure local finalizers.

use crate::bls::BlsKeypair;
use crate::error::CryptoError;
use savanna_types::BlsPublicKey;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BlsKeyFile {
    pub public_key: BlsPublicKey,
    /// Serialized secret scalar, hex.
    pub private_key: String,
}

/// Write a keypair to a JSON key file.
pub fn save_key_file(keypair: &BlsKeypair, path: &Path) -> Result<(), CryptoError> {
    let file = BlsKeyFile {
        public_key: keypair.public_key(),
        private_key: hex::encode(keypair.to_secret_bytes()),
    };
    let json = serde_json::to_string_pretty(&file)
        .map_err(|e| CryptoError::Serialization(e.to_string()))?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Load a keypair from a JSON key file, checking that the stored public key
/// matches the secret.
pub fn load_key_file(path: &Path) -> Result<BlsKeypair, CryptoError> {
    let json = std::fs::read_to_string(path)?;
    let file: BlsKeyFile =
        serde_json::from_str(&json).map_err(|e| CryptoError::Serialization(e.to_string()))?;

    let bytes = hex::decode(&file.private_key).map_err(|_| CryptoError::InvalidPrivateKey)?;
    let mut secret = [0u8; 32];
    if bytes.len() != 32 {
        return Err(CryptoError::InvalidPrivateKey);
    }
    secret.copy_from_slice(&bytes);

    let keypair = BlsKeypair::from_secret_bytes(&secret)?;
    if keypair.public_key() != file.public_key {
        return Err(CryptoError::Serialization(
            "public key does not match secret key".to_string(),
        ));
    }
    Ok(keypair)
}
