//! Ephemeral key exchange for the TLS 1.3 `key_share` extension.
//!
//! Supports X25519 and secp256r1. Private scalars are handed back as raw
//! bytes so the connection context can hold one per offered group and
//! consume it when the server's selection arrives.

use crate::crypt::NamedGroup;
use opal_types::TlsError;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use zeroize::Zeroize;

/// An ephemeral keypair for one named group.
pub struct KeyExchange {
    group: NamedGroup,
    private_key: Vec<u8>,
    public_key: Vec<u8>,
}

impl Drop for KeyExchange {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

impl KeyExchange {
    /// Generate a new ephemeral keypair for the given named group.
    pub fn generate(group: NamedGroup) -> Result<Self, TlsError> {
        match group {
            NamedGroup::X25519 => {
                let mut scalar = [0u8; 32];
                getrandom::getrandom(&mut scalar).map_err(|_| TlsError::EntropyFailure)?;
                let secret = x25519_dalek::StaticSecret::from(scalar);
                let public = x25519_dalek::PublicKey::from(&secret);
                scalar.zeroize();
                Ok(Self {
                    group,
                    private_key: secret.to_bytes().to_vec(),
                    public_key: public.as_bytes().to_vec(),
                })
            }
            NamedGroup::SECP256R1 => {
                // Rejection-sample until the bytes form a valid scalar.
                let mut attempts = 0;
                let secret = loop {
                    let mut scalar = [0u8; 32];
                    getrandom::getrandom(&mut scalar).map_err(|_| TlsError::EntropyFailure)?;
                    let candidate = p256::SecretKey::from_slice(&scalar);
                    scalar.zeroize();
                    match candidate {
                        Ok(secret) => break secret,
                        Err(_) if attempts < 16 => attempts += 1,
                        Err(_) => return Err(TlsError::EntropyFailure),
                    }
                };
                let public = secret.public_key().to_encoded_point(false);
                Ok(Self {
                    group,
                    private_key: secret.to_bytes().to_vec(),
                    public_key: public.as_bytes().to_vec(),
                })
            }
            _ => Err(TlsError::UnsupportedGroup),
        }
    }

    /// The named group for this key exchange.
    pub fn group(&self) -> NamedGroup {
        self.group
    }

    /// The public key bytes to include in the `key_share` extension.
    pub fn public_key_bytes(&self) -> &[u8] {
        &self.public_key
    }

    /// Take ownership of the private scalar for later agreement.
    pub fn into_private_key_bytes(mut self) -> Vec<u8> {
        std::mem::take(&mut self.private_key)
    }

    /// Compute the shared secret from the peer's public key.
    pub fn compute_shared_secret(&self, peer_public: &[u8]) -> Result<Vec<u8>, TlsError> {
        key_agreement(self.group, peer_public, &self.private_key)
    }
}

/// Compute a DH shared secret from a stored private scalar.
pub fn key_agreement(
    group: NamedGroup,
    peer_public: &[u8],
    private_key: &[u8],
) -> Result<Vec<u8>, TlsError> {
    match group {
        NamedGroup::X25519 => {
            let scalar: [u8; 32] = private_key
                .try_into()
                .map_err(|_| TlsError::CryptoFailure("bad X25519 private key length".into()))?;
            let peer: [u8; 32] = peer_public
                .try_into()
                .map_err(|_| TlsError::CryptoFailure("bad X25519 public key length".into()))?;
            let secret = x25519_dalek::StaticSecret::from(scalar);
            let shared = secret.diffie_hellman(&x25519_dalek::PublicKey::from(peer));
            if !shared.was_contributory() {
                return Err(TlsError::CryptoFailure("low-order X25519 point".into()));
            }
            Ok(shared.as_bytes().to_vec())
        }
        NamedGroup::SECP256R1 => {
            let secret = p256::SecretKey::from_slice(private_key)
                .map_err(|e| TlsError::CryptoFailure(e.to_string()))?;
            let peer = p256::PublicKey::from_sec1_bytes(peer_public)
                .map_err(|e| TlsError::CryptoFailure(e.to_string()))?;
            let shared =
                p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());
            Ok(shared.raw_secret_bytes().to_vec())
        }
        _ => Err(TlsError::UnsupportedGroup),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_x25519_agreement() {
        let a = KeyExchange::generate(NamedGroup::X25519).unwrap();
        let b = KeyExchange::generate(NamedGroup::X25519).unwrap();
        assert_eq!(a.public_key_bytes().len(), 32);

        let shared_a = a.compute_shared_secret(b.public_key_bytes()).unwrap();
        let shared_b = b.compute_shared_secret(a.public_key_bytes()).unwrap();
        assert_eq!(shared_a, shared_b);
        assert_eq!(shared_a.len(), 32);
    }

    #[test]
    fn test_p256_agreement() {
        let a = KeyExchange::generate(NamedGroup::SECP256R1).unwrap();
        let b = KeyExchange::generate(NamedGroup::SECP256R1).unwrap();
        // SEC1 uncompressed point
        assert_eq!(a.public_key_bytes().len(), 65);
        assert_eq!(a.public_key_bytes()[0], 0x04);

        let shared_a = a.compute_shared_secret(b.public_key_bytes()).unwrap();
        let shared_b = b.compute_shared_secret(a.public_key_bytes()).unwrap();
        assert_eq!(shared_a, shared_b);
        assert_eq!(shared_a.len(), 32);
    }

    #[test]
    fn test_stored_scalar_agreement() {
        let a = KeyExchange::generate(NamedGroup::X25519).unwrap();
        let b = KeyExchange::generate(NamedGroup::X25519).unwrap();
        let b_public = b.public_key_bytes().to_vec();
        let expected = b.compute_shared_secret(a.public_key_bytes()).unwrap();

        let stored = a.into_private_key_bytes();
        let shared = key_agreement(NamedGroup::X25519, &b_public, &stored).unwrap();
        assert_eq!(shared, expected);
    }

    #[test]
    fn test_unsupported_group() {
        assert!(KeyExchange::generate(NamedGroup::X448).is_err());
        assert!(key_agreement(NamedGroup::SECP384R1, &[], &[]).is_err());
    }

    #[test]
    fn test_low_order_point_rejected() {
        let a = KeyExchange::generate(NamedGroup::X25519).unwrap();
        assert!(a.compute_shared_secret(&[0u8; 32]).is_err());
    }

    #[test]
    fn test_bad_p256_point_rejected() {
        let a = KeyExchange::generate(NamedGroup::SECP256R1).unwrap();
        assert!(a.compute_shared_secret(&[0x04; 65]).is_err());
        assert!(a.compute_shared_secret(&[0x04]).is_err());
    }
}
