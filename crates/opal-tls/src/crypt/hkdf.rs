//! TLS 1.3 HKDF primitives (RFC 8446 Section 7.1).

use super::HashAlgorithm;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use opal_types::TlsError;
use sha2::{Sha256, Sha384};

/// One-shot HMAC: `HMAC(key, data)`.
pub(crate) fn hmac_hash(
    alg: HashAlgorithm,
    key: &[u8],
    data: &[u8],
) -> Result<Vec<u8>, TlsError> {
    match alg {
        HashAlgorithm::Sha256 => {
            let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
                .map_err(|e| TlsError::CryptoFailure(e.to_string()))?;
            mac.update(data);
            Ok(mac.finalize().into_bytes().to_vec())
        }
        HashAlgorithm::Sha384 => {
            let mut mac = <Hmac<Sha384> as Mac>::new_from_slice(key)
                .map_err(|e| TlsError::CryptoFailure(e.to_string()))?;
            mac.update(data);
            Ok(mac.finalize().into_bytes().to_vec())
        }
    }
}

/// HKDF-Extract(salt, IKM) -> PRK.
///
/// An empty salt means `hash_len` zero bytes, per RFC 5869.
pub fn hkdf_extract(alg: HashAlgorithm, salt: &[u8], ikm: &[u8]) -> Vec<u8> {
    let salt = if salt.is_empty() { None } else { Some(salt) };
    match alg {
        HashAlgorithm::Sha256 => Hkdf::<Sha256>::extract(salt, ikm).0.to_vec(),
        HashAlgorithm::Sha384 => Hkdf::<Sha384>::extract(salt, ikm).0.to_vec(),
    }
}

/// HKDF-Expand(PRK, info, length) -> OKM.
pub fn hkdf_expand(
    alg: HashAlgorithm,
    prk: &[u8],
    info: &[u8],
    length: usize,
) -> Result<Vec<u8>, TlsError> {
    let mut okm = vec![0u8; length];
    let res = match alg {
        HashAlgorithm::Sha256 => Hkdf::<Sha256>::from_prk(prk)
            .map_err(|e| TlsError::CryptoFailure(e.to_string()))?
            .expand(info, &mut okm),
        HashAlgorithm::Sha384 => Hkdf::<Sha384>::from_prk(prk)
            .map_err(|e| TlsError::CryptoFailure(e.to_string()))?
            .expand(info, &mut okm),
    };
    res.map_err(|e| TlsError::CryptoFailure(e.to_string()))?;
    Ok(okm)
}

/// Encode the HkdfLabel structure per RFC 8446 Section 7.1:
///
/// ```text
/// struct {
///     uint16 length;
///     opaque label<7..255>;   // "tls13 " + label
///     opaque context<0..255>;
/// } HkdfLabel;
/// ```
fn encode_hkdf_label(length: u16, label: &[u8], context: &[u8]) -> Vec<u8> {
    let full_label_len = 6 + label.len(); // "tls13 " prefix = 6 bytes
    let mut buf = Vec::with_capacity(2 + 1 + full_label_len + 1 + context.len());
    buf.extend_from_slice(&length.to_be_bytes());
    buf.push(full_label_len as u8);
    buf.extend_from_slice(b"tls13 ");
    buf.extend_from_slice(label);
    buf.push(context.len() as u8);
    buf.extend_from_slice(context);
    buf
}

/// HKDF-Expand-Label(Secret, Label, Context, Length).
///
/// `= HKDF-Expand(Secret, HkdfLabel, Length)`
pub fn hkdf_expand_label(
    alg: HashAlgorithm,
    secret: &[u8],
    label: &[u8],
    context: &[u8],
    length: usize,
) -> Result<Vec<u8>, TlsError> {
    let info = encode_hkdf_label(length as u16, label, context);
    hkdf_expand(alg, secret, &info, length)
}

/// Derive-Secret(Secret, Label, Messages).
///
/// `= HKDF-Expand-Label(Secret, Label, transcript_hash, Hash.length)`
pub fn derive_secret(
    alg: HashAlgorithm,
    secret: &[u8],
    label: &[u8],
    transcript_hash: &[u8],
) -> Result<Vec<u8>, TlsError> {
    hkdf_expand_label(alg, secret, label, transcript_hash, alg.output_size())
}
