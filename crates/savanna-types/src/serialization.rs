//! Serde implementations for types that appear in JSON-facing files
//! (finalizer key files, the vote safety file). Digests and keys serialize
//! as hex strings.

#[cfg(feature = "serde")]
mod serde_impls {
    use crate::{AccountName, BlockId, BlockTimestamp, BlsPublicKey, BlsSignature, Digest};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;

    impl Serialize for Digest {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            self.to_string().serialize(serializer)
        }
    }

    impl<'de> Deserialize<'de> for Digest {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            let s = String::deserialize(deserializer)?;
            Digest::from_str(&s).map_err(serde::de::Error::custom)
        }
    }

    impl Serialize for BlockId {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            self.to_string().serialize(serializer)
        }
    }

    impl<'de> Deserialize<'de> for BlockId {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            let s = String::deserialize(deserializer)?;
            BlockId::from_str(&s).map_err(serde::de::Error::custom)
        }
    }

    impl Serialize for AccountName {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            self.to_string().serialize(serializer)
        }
    }

    impl<'de> Deserialize<'de> for AccountName {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            let s = String::deserialize(deserializer)?;
            AccountName::from_str(&s).map_err(serde::de::Error::custom)
        }
    }

    impl Serialize for BlockTimestamp {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            self.0.serialize(serializer)
        }
    }

    impl<'de> Deserialize<'de> for BlockTimestamp {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            Ok(BlockTimestamp(u32::deserialize(deserializer)?))
        }
    }

    impl Serialize for BlsPublicKey {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            hex::encode(self.as_bytes()).serialize(serializer)
        }
    }

    impl<'de> Deserialize<'de> for BlsPublicKey {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            let s = String::deserialize(deserializer)?;
            let bytes = hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom)?;
            BlsPublicKey::from_slice(&bytes).map_err(serde::de::Error::custom)
        }
    }

    impl Serialize for BlsSignature {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            hex::encode(self.as_bytes()).serialize(serializer)
        }
    }

    impl<'de> Deserialize<'de> for BlsSignature {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            let s = String::deserialize(deserializer)?;
            let bytes = hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom)?;
            BlsSignature::from_slice(&bytes).map_err(serde::de::Error::custom)
        }
    }
}
