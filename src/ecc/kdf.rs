//! Chip key derivation from a recovered signature.

use crate::bits::Signature;
use blake3::Hasher as Blake3Hasher;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const KEY_CONTEXT: &str = "puf-identify 2024 chip key v1";

/// Hash used to derive chip keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// BLAKE3 in key-derivation mode.
    #[default]
    Blake3,
    /// SHA-256 over a context prefix.
    Sha256,
}

/// 32-byte key bound to one chip.
#[derive(Clone, PartialEq, Eq)]
pub struct ChipKey {
    data: [u8; 32],
}

impl ChipKey {
    /// Key bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.data
    }

    /// Lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.data)
    }
}

impl std::fmt::Debug for ChipKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChipKey").finish_non_exhaustive()
    }
}

/// Hashes recovered signatures into chip keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyDeriver {
    algorithm: HashAlgorithm,
}

impl KeyDeriver {
    /// Creates a deriver using `algorithm`.
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }

    /// Derives the key for `signature`. The bit length is mixed in so
    /// signatures differing only in padding never collide.
    pub fn derive(&self, signature: &Signature) -> ChipKey {
        let len = (signature.len() as u64).to_le_bytes();
        let data = match self.algorithm {
            HashAlgorithm::Blake3 => {
                let mut hasher = Blake3Hasher::new_derive_key(KEY_CONTEXT);
                hasher.update(&len);
                hasher.update(signature.as_bytes());
                *hasher.finalize().as_bytes()
            }
            HashAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(KEY_CONTEXT.as_bytes());
                hasher.update(len);
                hasher.update(signature.as_bytes());
                let result = hasher.finalize();
                let mut data = [0u8; 32];
                data.copy_from_slice(&result);
                data
            }
        };
        ChipKey { data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_is_deterministic() {
        let sig = Signature::from_hex("deadbeef").unwrap();
        for algorithm in [HashAlgorithm::Blake3, HashAlgorithm::Sha256] {
            let deriver = KeyDeriver::new(algorithm);
            assert_eq!(deriver.derive(&sig), deriver.derive(&sig));
        }
    }

    #[test]
    fn test_algorithms_differ() {
        let sig = Signature::from_hex("deadbeef").unwrap();
        let blake = KeyDeriver::new(HashAlgorithm::Blake3).derive(&sig);
        let sha = KeyDeriver::new(HashAlgorithm::Sha256).derive(&sig);
        assert_ne!(blake, sha);
    }

    #[test]
    fn test_single_bit_changes_key() {
        let deriver = KeyDeriver::default();
        let a = Signature::from_hex("deadbeef").unwrap();
        let mut b = a.clone();
        b.flip(7);
        assert_ne!(deriver.derive(&a), deriver.derive(&b));
    }

    #[test]
    fn test_length_is_bound() {
        let deriver = KeyDeriver::default();
        let short = Signature::from_hex("f").unwrap();
        let long = Signature::from_hex("f0").unwrap();
        assert_eq!(short.as_bytes(), long.as_bytes());
        assert_ne!(deriver.derive(&short), deriver.derive(&long));
    }

    #[test]
    fn test_debug_hides_key() {
        let key = KeyDeriver::default().derive(&Signature::zeros(8));
        assert!(!format!("{key:?}").contains(&key.to_hex()));
        assert_eq!(key.to_hex().len(), 64);
    }
}
