//! CertificateVerify signing dispatch (RFC 8446 §4.4.3).

use super::verify::build_verify_content;
use crate::config::PrivateKey;
use crate::crypt::SignatureScheme;
use ed25519_dalek::Signer;
use opal_types::TlsError;
use p256::ecdsa::signature::Signer as _;

/// Select a signature scheme that matches the key type and is present in
/// the peer's `signature_algorithms` list.
pub fn select_signature_scheme(
    key: &PrivateKey,
    peer_schemes: &[SignatureScheme],
) -> Result<SignatureScheme, TlsError> {
    let candidate = match key {
        PrivateKey::Ed25519(_) => SignatureScheme::ED25519,
        PrivateKey::EcdsaP256(_) => SignatureScheme::ECDSA_SECP256R1_SHA256,
    };
    if peer_schemes.contains(&candidate) {
        Ok(candidate)
    } else {
        Err(TlsError::UnsupportedSignatureScheme)
    }
}

/// Sign CertificateVerify content with a private key.
///
/// Builds the verify content (64 spaces || context || 0x00 ||
/// transcript_hash) and dispatches on the key type. `is_server` selects the
/// context string.
pub fn sign_certificate_verify(
    key: &PrivateKey,
    scheme: SignatureScheme,
    transcript_hash: &[u8],
    is_server: bool,
) -> Result<Vec<u8>, TlsError> {
    let content = build_verify_content(transcript_hash, is_server);

    match (scheme, key) {
        (SignatureScheme::ED25519, PrivateKey::Ed25519(seed)) => {
            let signing_key = ed25519_dalek::SigningKey::from_bytes(seed);
            Ok(signing_key.sign(&content).to_bytes().to_vec())
        }
        (SignatureScheme::ECDSA_SECP256R1_SHA256, PrivateKey::EcdsaP256(scalar)) => {
            let signing_key = p256::ecdsa::SigningKey::from_slice(scalar)
                .map_err(|e| TlsError::CryptoFailure(e.to_string()))?;
            let signature: p256::ecdsa::Signature = signing_key.sign(&content);
            Ok(signature.to_der().as_bytes().to_vec())
        }
        _ => Err(TlsError::UnsupportedSignatureScheme),
    }
}
