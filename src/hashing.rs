//! Hash algorithm registry
//!
//! The set of algorithms the network uses is closed and small, so dispatch is a
//! `match` over [`HashAlgorithm`]. [`HashRegistry`] exposes the same algorithms by
//! identifier for callers that select them dynamically.

use crate::error::{ConsensusError, Result};
use crate::types::Hash;
use bitcoin_hashes::{hash160 as btc_hash160, sha1, sha256d as btc_sha256d, Hash as BitcoinHash};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Litecoin-style scrypt proof-of-work parameters: N = 2^10, r = 1, p = 1
const SCRYPT_LOG_N: u8 = 10;
const SCRYPT_R: u32 = 1;
const SCRYPT_P: u32 = 1;
const SCRYPT_OUTPUT_LEN: usize = 32;

/// A hashing function resolved from a registry
pub type HashFn = Arc<dyn Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Ripemd160,
    /// SHA256(SHA256(x))
    DoubleSha256,
    /// RIPEMD160(SHA256(x))
    Sha256Ripemd160,
    Scrypt,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 6] = [
        HashAlgorithm::Sha1,
        HashAlgorithm::Sha256,
        HashAlgorithm::Ripemd160,
        HashAlgorithm::DoubleSha256,
        HashAlgorithm::Sha256Ripemd160,
        HashAlgorithm::Scrypt,
    ];

    pub fn identifier(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => "SHA1",
            HashAlgorithm::Sha256 => "SHA256",
            HashAlgorithm::Ripemd160 => "RIPEMD160",
            HashAlgorithm::DoubleSha256 => "HASH256",
            HashAlgorithm::Sha256Ripemd160 => "HASH160",
            HashAlgorithm::Scrypt => "SCRYPT",
        }
    }

    /// Digest length in bytes
    pub fn output_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha1 | HashAlgorithm::Ripemd160 | HashAlgorithm::Sha256Ripemd160 => 20,
            HashAlgorithm::Sha256 | HashAlgorithm::DoubleSha256 | HashAlgorithm::Scrypt => 32,
        }
    }

    /// Only scrypt can fail, on parameters its crate rejects
    pub fn digest(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(match self {
            HashAlgorithm::Sha1 => sha1_hash(data).to_vec(),
            HashAlgorithm::Sha256 => sha256(data).to_vec(),
            HashAlgorithm::Ripemd160 => ripemd160(data).to_vec(),
            HashAlgorithm::DoubleSha256 => sha256d(data).to_vec(),
            HashAlgorithm::Sha256Ripemd160 => hash160(data).to_vec(),
            HashAlgorithm::Scrypt => scrypt_hash(data)?.to_vec(),
        })
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

impl FromStr for HashAlgorithm {
    type Err = ConsensusError;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.to_ascii_uppercase();
        HashAlgorithm::ALL
            .iter()
            .copied()
            .find(|alg| alg.identifier() == upper)
            .ok_or_else(|| ConsensusError::NotFound(format!("hash algorithm {}", s)))
    }
}

pub fn sha1_hash(data: &[u8]) -> [u8; 20] {
    sha1::Hash::hash(data).into_inner()
}

pub fn sha256(data: &[u8]) -> Hash {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(data));
    out
}

pub fn ripemd160(data: &[u8]) -> [u8; 20] {
    let mut out = [0u8; 20];
    out.copy_from_slice(&Ripemd160::digest(data));
    out
}

/// SHA256(SHA256(x))
pub fn sha256d(data: &[u8]) -> Hash {
    btc_sha256d::Hash::hash(data).into_inner()
}

/// RIPEMD160(SHA256(x))
pub fn hash160(data: &[u8]) -> [u8; 20] {
    btc_hash160::Hash::hash(data).into_inner()
}

/// scrypt(data, salt = data) with the proof-of-work parameters
pub fn scrypt_hash(data: &[u8]) -> Result<Hash> {
    let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, SCRYPT_OUTPUT_LEN)
        .map_err(|e| ConsensusError::Internal(format!("scrypt parameters: {}", e)))?;
    let mut out = [0u8; 32];
    scrypt::scrypt(data, data, &params, &mut out)
        .map_err(|e| ConsensusError::Internal(format!("scrypt output: {}", e)))?;
    Ok(out)
}

/// Lookup of hashing functions by identifier
pub trait HashRegistry: Send + Sync {
    fn get(&self, identifier: &str) -> Result<HashFn>;

    fn register(&mut self, identifier: &str, hash_fn: HashFn) -> Result<()>;
}

fn builtin_fn(alg: HashAlgorithm) -> HashFn {
    Arc::new(move |data: &[u8]| alg.digest(data))
}

/// The fixed set of network algorithms; registration is not permitted
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinHashRegistry;

impl HashRegistry for BuiltinHashRegistry {
    fn get(&self, identifier: &str) -> Result<HashFn> {
        Ok(builtin_fn(identifier.parse()?))
    }

    fn register(&mut self, identifier: &str, _hash_fn: HashFn) -> Result<()> {
        Err(ConsensusError::Unsupported(format!(
            "built-in hash registry cannot register {}",
            identifier
        )))
    }
}

/// Built-in algorithms plus caller-registered ones
pub struct ExtensibleHashRegistry {
    entries: HashMap<String, HashFn>,
}

impl ExtensibleHashRegistry {
    pub fn new() -> Self {
        let entries = HashAlgorithm::ALL
            .iter()
            .map(|alg| (alg.identifier().to_string(), builtin_fn(*alg)))
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ExtensibleHashRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HashRegistry for ExtensibleHashRegistry {
    fn get(&self, identifier: &str) -> Result<HashFn> {
        self.entries
            .get(&identifier.to_ascii_uppercase())
            .cloned()
            .ok_or_else(|| ConsensusError::NotFound(format!("hash algorithm {}", identifier)))
    }

    fn register(&mut self, identifier: &str, hash_fn: HashFn) -> Result<()> {
        let key = identifier.to_ascii_uppercase();
        if self.entries.contains_key(&key) {
            return Err(ConsensusError::Unsupported(format!(
                "hash algorithm {} is already registered",
                identifier
            )));
        }
        self.entries.insert(key, hash_fn);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_empty() {
        assert_eq!(
            hex::encode(HashAlgorithm::Sha256.digest(b"").unwrap()),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_sha1_abc() {
        assert_eq!(
            hex::encode(HashAlgorithm::Sha1.digest(b"abc").unwrap()),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_ripemd160_empty() {
        assert_eq!(
            hex::encode(HashAlgorithm::Ripemd160.digest(b"").unwrap()),
            "9c1185a5c5e9fc54612808977ee8f548b2258d31"
        );
    }

    #[test]
    fn test_double_sha256_matches_composition() {
        let once = Sha256::digest(b"hello");
        let twice = Sha256::digest(once);
        assert_eq!(sha256d(b"hello").to_vec(), twice.to_vec());
    }

    #[test]
    fn test_hash160_matches_composition() {
        let inner = Sha256::digest(b"key");
        let outer = Ripemd160::digest(inner);
        assert_eq!(hash160(b"key").to_vec(), outer.to_vec());
    }

    #[test]
    fn test_scrypt_output_length_and_determinism() {
        let a = HashAlgorithm::Scrypt.digest(&[0u8; 80]).unwrap();
        let b = HashAlgorithm::Scrypt.digest(&[0u8; 80]).unwrap();
        assert_eq!(a.len(), 32);
        assert_eq!(a, b);
        assert_ne!(a, scrypt_hash(&[1u8; 80]).unwrap().to_vec());
    }

    #[test]
    fn test_scrypt_through_registry() {
        let f = BuiltinHashRegistry.get("scrypt").unwrap();
        assert_eq!(f(b"header").unwrap(), scrypt_hash(b"header").unwrap().to_vec());
    }

    #[test]
    fn test_output_len_matches_digest() {
        for alg in HashAlgorithm::ALL {
            assert_eq!(alg.digest(b"x").unwrap().len(), alg.output_len(), "{}", alg);
        }
    }

    #[test]
    fn test_identifier_round_trip() {
        for alg in HashAlgorithm::ALL {
            assert_eq!(alg.identifier().parse::<HashAlgorithm>().unwrap(), alg);
        }
        assert_eq!("hash160".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256Ripemd160);
        assert!(matches!("MD5".parse::<HashAlgorithm>(), Err(ConsensusError::NotFound(_))));
    }

    #[test]
    fn test_builtin_registry_rejects_register() {
        let mut registry = BuiltinHashRegistry;
        let f = registry.get("SHA256").unwrap();
        assert_eq!(f(b"").unwrap().len(), 32);
        let result = registry.register("ZERO", Arc::new(|_: &[u8]| Ok(vec![0u8])));
        assert!(matches!(result, Err(ConsensusError::Unsupported(_))));
    }

    #[test]
    fn test_extensible_registry_register_and_get() {
        let mut registry = ExtensibleHashRegistry::new();
        assert_eq!(registry.len(), HashAlgorithm::ALL.len());
        registry.register("ZERO", Arc::new(|_: &[u8]| Ok(vec![0u8; 4]))).unwrap();
        assert_eq!(registry.get("zero").unwrap()(b"abc").unwrap(), vec![0u8; 4]);

        let dup = registry.register("SHA256", Arc::new(|_: &[u8]| Ok(vec![])));
        assert!(matches!(dup, Err(ConsensusError::Unsupported(_))));
        assert!(matches!(registry.get("BLAKE3"), Err(ConsensusError::NotFound(_))));
    }
}
