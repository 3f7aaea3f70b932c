//! CertificateVerify verification (RFC 8446 §4.4.3) and transcript hashing
//! over retained handshake messages.

use super::codec::HandshakeMessage;
use crate::config::PublicKey;
use crate::crypt::{HashAlgorithm, SignatureScheme};
use ed25519_dalek::Verifier;
use opal_types::TlsError;
use p256::ecdsa::signature::Verifier as _;

/// Context string for server CertificateVerify.
const SERVER_CONTEXT: &[u8] = b"TLS 1.3, server CertificateVerify";

/// Context string for client CertificateVerify.
const CLIENT_CONTEXT: &[u8] = b"TLS 1.3, client CertificateVerify";

/// Build the content to be signed/verified in CertificateVerify.
///
/// Format: 64 spaces || context_string || 0x00 || transcript_hash
pub fn build_verify_content(transcript_hash: &[u8], is_server: bool) -> Vec<u8> {
    let context = if is_server {
        SERVER_CONTEXT
    } else {
        CLIENT_CONTEXT
    };
    let mut content = Vec::with_capacity(64 + context.len() + 1 + transcript_hash.len());
    content.extend_from_slice(&[0x20u8; 64]);
    content.extend_from_slice(context);
    content.push(0x00);
    content.extend_from_slice(transcript_hash);
    content
}

/// Hash the concatenated encodings of retained handshake messages.
///
/// The CertificateVerify transcript is rebuilt from the context's message
/// slots rather than the key schedule's running transcript, which advances
/// only at flight boundaries.
pub fn handshake_transcript_hash(alg: HashAlgorithm, messages: &[&HandshakeMessage]) -> Vec<u8> {
    let mut buffer = Vec::new();
    for message in messages {
        buffer.extend_from_slice(message.encoded());
    }
    alg.hash(&buffer)
}

/// Verify a CertificateVerify signature against the peer certificate's
/// public key. `is_server` selects the context string.
pub fn verify_certificate_verify(
    public_key: &PublicKey,
    scheme: SignatureScheme,
    signature: &[u8],
    transcript_hash: &[u8],
    is_server: bool,
) -> Result<(), TlsError> {
    let content = build_verify_content(transcript_hash, is_server);

    match (scheme, public_key) {
        (SignatureScheme::ED25519, PublicKey::Ed25519(key)) => {
            let verifier = ed25519_dalek::VerifyingKey::from_bytes(key)
                .map_err(|e| TlsError::CryptoFailure(e.to_string()))?;
            let sig_bytes: [u8; 64] = signature
                .try_into()
                .map_err(|_| TlsError::SignatureVerifyFailed)?;
            let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
            verifier
                .verify(&content, &sig)
                .map_err(|_| TlsError::SignatureVerifyFailed)
        }
        (SignatureScheme::ECDSA_SECP256R1_SHA256, PublicKey::EcdsaP256(key)) => {
            let verifier = p256::ecdsa::VerifyingKey::from_sec1_bytes(key)
                .map_err(|e| TlsError::CryptoFailure(e.to_string()))?;
            let sig = p256::ecdsa::Signature::from_der(signature)
                .map_err(|_| TlsError::SignatureVerifyFailed)?;
            verifier
                .verify(&content, &sig)
                .map_err(|_| TlsError::SignatureVerifyFailed)
        }
        _ => Err(TlsError::UnsupportedSignatureScheme),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PrivateKey;
    use crate::handshake::signing::sign_certificate_verify;

    #[test]
    fn test_build_verify_content() {
        let transcript_hash = vec![0xAA; 32];
        let content = build_verify_content(&transcript_hash, true);

        assert_eq!(&content[..64], &[0x20u8; 64]);
        assert_eq!(&content[64..64 + SERVER_CONTEXT.len()], SERVER_CONTEXT);
        assert_eq!(content[64 + SERVER_CONTEXT.len()], 0x00);
        assert_eq!(&content[64 + SERVER_CONTEXT.len() + 1..], &transcript_hash);

        let client_content = build_verify_content(&transcript_hash, false);
        assert_ne!(content, client_content);
    }

    #[test]
    fn test_ed25519_roundtrip() {
        let key = PrivateKey::Ed25519([0x42; 32]);
        let public = PublicKey::Ed25519(
            ed25519_dalek::SigningKey::from_bytes(&[0x42; 32])
                .verifying_key()
                .to_bytes(),
        );

        let hash = vec![0xAA; 32];
        let sig =
            sign_certificate_verify(&key, SignatureScheme::ED25519, &hash, true).unwrap();
        verify_certificate_verify(&public, SignatureScheme::ED25519, &sig, &hash, true).unwrap();

        // Tampered signature fails
        let mut bad = sig.clone();
        bad[0] ^= 0xFF;
        assert!(
            verify_certificate_verify(&public, SignatureScheme::ED25519, &bad, &hash, true)
                .is_err()
        );

        // Wrong transcript fails
        assert!(verify_certificate_verify(
            &public,
            SignatureScheme::ED25519,
            &sig,
            &[0xBB; 32],
            true
        )
        .is_err());

        // Wrong role context fails
        assert!(
            verify_certificate_verify(&public, SignatureScheme::ED25519, &sig, &hash, false)
                .is_err()
        );
    }

    #[test]
    fn test_ecdsa_p256_roundtrip() {
        use p256::elliptic_curve::sec1::ToEncodedPoint;

        let scalar = vec![0x17; 32];
        let secret = p256::SecretKey::from_slice(&scalar).unwrap();
        let public_bytes = secret.public_key().to_encoded_point(false).as_bytes().to_vec();

        let key = PrivateKey::EcdsaP256(scalar);
        let public = PublicKey::EcdsaP256(public_bytes);

        let hash = vec![0xCC; 32];
        let sig = sign_certificate_verify(
            &key,
            SignatureScheme::ECDSA_SECP256R1_SHA256,
            &hash,
            false,
        )
        .unwrap();
        verify_certificate_verify(
            &public,
            SignatureScheme::ECDSA_SECP256R1_SHA256,
            &sig,
            &hash,
            false,
        )
        .unwrap();

        let mut bad = sig.clone();
        let last = bad.len() - 1;
        bad[last] ^= 0x01;
        assert!(verify_certificate_verify(
            &public,
            SignatureScheme::ECDSA_SECP256R1_SHA256,
            &bad,
            &hash,
            false
        )
        .is_err());
    }

    #[test]
    fn test_scheme_key_mismatch() {
        let public = PublicKey::Ed25519([0; 32]);
        assert!(matches!(
            verify_certificate_verify(
                &public,
                SignatureScheme::ECDSA_SECP256R1_SHA256,
                &[0; 64],
                &[0; 32],
                true
            ),
            Err(TlsError::UnsupportedSignatureScheme)
        ));
    }
}
