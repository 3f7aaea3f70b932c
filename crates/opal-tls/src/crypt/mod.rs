//! TLS cryptographic parameter types and primitive wrappers.

pub mod hkdf;
pub mod key_schedule;
pub mod transcript;

use crate::CipherSuite;
use opal_types::TlsError;
use sha2::{Digest, Sha256, Sha384};

/// The transcript/HKDF hash of a TLS 1.3 cipher suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
}

impl HashAlgorithm {
    /// Hash output size in bytes.
    pub fn output_size(&self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
        }
    }

    /// One-shot hash of `data`.
    pub fn hash(&self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            HashAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
        }
    }

    /// Hash of the empty string, used for `Derive-Secret(secret, label, "")`.
    pub fn empty_hash(&self) -> Vec<u8> {
        self.hash(&[])
    }
}

/// Parameters associated with a TLS 1.3 cipher suite.
#[derive(Debug, Clone)]
pub struct CipherSuiteParams {
    /// The cipher suite identifier.
    pub suite: CipherSuite,
    /// The suite's transcript/HKDF hash.
    pub hash: HashAlgorithm,
    /// Hash output size in bytes (32 for SHA-256, 48 for SHA-384).
    pub hash_len: usize,
}

impl CipherSuiteParams {
    /// Look up parameters for a TLS 1.3 cipher suite.
    pub fn from_suite(suite: CipherSuite) -> Result<Self, TlsError> {
        let hash = match suite {
            CipherSuite::TLS_AES_128_GCM_SHA256 => HashAlgorithm::Sha256,
            CipherSuite::TLS_CHACHA20_POLY1305_SHA256 => HashAlgorithm::Sha256,
            CipherSuite::TLS_AES_256_GCM_SHA384 => HashAlgorithm::Sha384,
            _ => return Err(TlsError::UnsupportedCipherSuite),
        };
        Ok(Self {
            suite,
            hash,
            hash_len: hash.output_size(),
        })
    }
}

/// TLS named group identifiers (for key exchange).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NamedGroup(pub u16);

impl NamedGroup {
    pub const SECP256R1: Self = Self(0x0017);
    pub const SECP384R1: Self = Self(0x0018);
    pub const X25519: Self = Self(0x001D);
    pub const X448: Self = Self(0x001E);
}

/// TLS signature scheme identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureScheme(pub u16);

impl SignatureScheme {
    pub const ECDSA_SECP256R1_SHA256: Self = Self(0x0403);
    pub const ED25519: Self = Self(0x0807);
}

/// PSK key exchange modes (RFC 8446 §4.2.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PskKeyExchangeMode {
    /// PSK-only key establishment.
    PskKe = 0,
    /// PSK with (EC)DHE key establishment.
    PskDheKe = 1,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    #[test]
    fn test_suite_params() {
        let p = CipherSuiteParams::from_suite(CipherSuite::TLS_AES_128_GCM_SHA256).unwrap();
        assert_eq!(p.hash, HashAlgorithm::Sha256);
        assert_eq!(p.hash_len, 32);

        let p = CipherSuiteParams::from_suite(CipherSuite::TLS_AES_256_GCM_SHA384).unwrap();
        assert_eq!(p.hash, HashAlgorithm::Sha384);
        assert_eq!(p.hash_len, 48);

        assert!(CipherSuiteParams::from_suite(CipherSuite(0xFFFF)).is_err());
    }

    #[test]
    fn test_empty_hash_sha256() {
        assert_eq!(
            to_hex(&HashAlgorithm::Sha256.empty_hash()),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_hash_lengths() {
        assert_eq!(HashAlgorithm::Sha256.hash(b"abc").len(), 32);
        assert_eq!(HashAlgorithm::Sha384.hash(b"abc").len(), 48);
    }

    #[test]
    fn test_group_and_scheme_code_points() {
        assert_eq!(NamedGroup::X25519.0, 0x001D);
        assert_eq!(NamedGroup::SECP256R1.0, 0x0017);
        assert_eq!(SignatureScheme::ECDSA_SECP256R1_SHA256.0, 0x0403);
        assert_eq!(SignatureScheme::ED25519.0, 0x0807);
        assert_eq!(PskKeyExchangeMode::PskKe as u8, 0);
        assert_eq!(PskKeyExchangeMode::PskDheKe as u8, 1);
    }
}
