//! Pure negotiation decisions for the server's ClientHello processing.
//!
//! Each function maps offered parameters and local policy to one outcome
//! and has no access to connection state; the server automaton sequences
//! them and turns their failures into alerts.

use super::codec::{HandshakeMessage, KeyShareEntry, PskIdentity};
use super::key_exchange::KeyExchange;
use super::signing::select_signature_scheme;
use crate::config::{Certificate, PreSharedKey, PskStore};
use crate::crypt::key_schedule::KeySchedule;
use crate::crypt::{CipherSuiteParams, NamedGroup, PskKeyExchangeMode, SignatureScheme};
use crate::{CipherSuite, TLS13_VERSION};
use opal_types::TlsError;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

/// Whether the peer's `supported_versions` includes TLS 1.3.
pub fn version_supported(offered: &[u16]) -> bool {
    offered.contains(&TLS13_VERSION)
}

/// Outcome of a successful DH negotiation.
pub struct DhNegotiation {
    pub group: NamedGroup,
    pub public_key: Vec<u8>,
    pub shared_secret: Vec<u8>,
}

impl Drop for DhNegotiation {
    fn drop(&mut self) {
        self.shared_secret.zeroize();
    }
}

/// Pick the first supported group (server preference order) the client sent
/// a key share for, generate the server share, and compute the secret.
///
/// A malformed client share skips to the next candidate; an entropy failure
/// propagates.
pub fn dh_negotiation(
    shares: &[KeyShareEntry],
    supported: &[NamedGroup],
) -> Result<Option<DhNegotiation>, TlsError> {
    for group in supported {
        let Some(share) = shares.iter().find(|s| s.group == *group) else {
            continue;
        };
        let kx = match KeyExchange::generate(*group) {
            Ok(kx) => kx,
            Err(TlsError::EntropyFailure) => return Err(TlsError::EntropyFailure),
            Err(_) => continue,
        };
        let Ok(shared_secret) = kx.compute_shared_secret(&share.key_exchange) else {
            continue;
        };
        return Ok(Some(DhNegotiation {
            group: *group,
            public_key: kx.public_key_bytes().to_vec(),
            shared_secret,
        }));
    }
    Ok(None)
}

/// Outcome of a successful PSK negotiation.
pub struct PskNegotiation {
    /// Index of the accepted identity, echoed as `selected_identity`.
    pub index: usize,
    pub psk: PreSharedKey,
    /// Key schedule pre-initialized from the accepted PSK.
    pub key_schedule: KeySchedule,
}

/// Verify offered PSK binders and accept the first identity that matches.
///
/// The binder transcript is `message_hash(first hello) ∥ HRR` when a retry
/// happened (`prior_hello`), followed by the truncated current ClientHello.
pub fn psk_negotiation(
    identities: &[PskIdentity],
    binders: &[Vec<u8>],
    prior_hello: Option<(&HandshakeMessage, &HandshakeMessage)>,
    truncated_hello: &[u8],
    store: &PskStore,
) -> Result<Option<PskNegotiation>, TlsError> {
    if identities.len() != binders.len() {
        return Err(TlsError::HandshakeFailed(
            "psk identity and binder counts differ".into(),
        ));
    }

    for (index, identity) in identities.iter().enumerate() {
        let Some(psk) = store.get(&identity.identity) else {
            continue;
        };

        let mut key_schedule = KeySchedule::new();
        key_schedule.pre_init(psk.cipher_suite, &psk.key, psk.external)?;

        let mut transcript = Vec::new();
        if let Some((first_hello, hrr)) = prior_hello {
            transcript.extend_from_slice(&key_schedule.message_hash_of(first_hello.encoded())?);
            transcript.extend_from_slice(hrr.encoded());
        }
        transcript.extend_from_slice(truncated_hello);

        let expected = key_schedule.compute_binder(&transcript)?;
        if bool::from(expected.ct_eq(&binders[index])) {
            return Ok(Some(PskNegotiation {
                index,
                psk: psk.clone(),
                key_schedule,
            }));
        }
    }
    Ok(None)
}

/// Map what is cryptographically possible onto what the client's
/// `psk_key_exchange_modes` permit. Returns `(using_dh, using_psk)`.
pub fn psk_mode_negotiation(
    can_do_dh: bool,
    can_do_psk: bool,
    modes: &[PskKeyExchangeMode],
) -> (bool, bool) {
    let mut using_dh = can_do_dh;
    let mut using_psk = false;
    if can_do_psk {
        if can_do_dh && modes.contains(&PskKeyExchangeMode::PskDheKe) {
            using_psk = true;
            using_dh = true;
        } else if modes.contains(&PskKeyExchangeMode::PskKe) {
            using_psk = true;
            using_dh = false;
        }
    }
    (using_dh, using_psk)
}

/// Whether to accept 0-RTT early data.
pub fn early_data_negotiation(using_psk: bool, client_offered: bool, allowed: bool) -> bool {
    using_psk && client_offered && allowed
}

/// Choose a cipher suite from the client's offer, in server preference
/// order. A PSK constrains candidates to suites with the PSK's hash.
pub fn cipher_suite_negotiation(
    psk: Option<&PreSharedKey>,
    client_suites: &[CipherSuite],
    server_suites: &[CipherSuite],
) -> Result<CipherSuite, TlsError> {
    let required_hash = match psk {
        Some(psk) => Some(CipherSuiteParams::from_suite(psk.cipher_suite)?.hash),
        None => None,
    };
    for suite in server_suites {
        if !client_suites.contains(suite) {
            continue;
        }
        let Ok(params) = CipherSuiteParams::from_suite(*suite) else {
            continue;
        };
        if let Some(required) = required_hash {
            if params.hash != required {
                continue;
            }
        }
        return Ok(*suite);
    }
    Err(TlsError::HandshakeFailed("no common cipher suite".into()))
}

/// Choose the application protocol. A PSK that carries one constrains the
/// choice to it. `Ok(None)` when the client offered no ALPN.
pub fn alpn_negotiation(
    psk: Option<&PreSharedKey>,
    client_protos: &[String],
    server_protos: &[String],
) -> Result<Option<String>, TlsError> {
    if client_protos.is_empty() {
        return Ok(None);
    }
    if let Some(proto) = psk.and_then(|p| p.next_proto.as_ref()) {
        if client_protos.contains(proto) {
            return Ok(Some(proto.clone()));
        }
        return Err(TlsError::HandshakeFailed(
            "client did not re-offer the PSK's protocol".into(),
        ));
    }
    for proto in server_protos {
        if client_protos.contains(proto) {
            return Ok(Some(proto.clone()));
        }
    }
    Err(TlsError::HandshakeFailed(
        "no common application protocol".into(),
    ))
}

/// Pick a certificate matching the requested name and a signature scheme
/// from the peer's list. With no name constraint, the first scheme-viable
/// certificate wins.
pub fn certificate_selection(
    server_name: Option<&str>,
    schemes: &[SignatureScheme],
    certificates: &[Certificate],
) -> Result<(Certificate, SignatureScheme), TlsError> {
    for certificate in certificates {
        if let Some(name) = server_name {
            match certificate.leaf() {
                Some(leaf) if leaf.subject_name == name => {}
                _ => continue,
            }
        }
        let Ok(scheme) = select_signature_scheme(&certificate.private_key, schemes) else {
            continue;
        };
        return Ok((certificate.clone(), scheme));
    }
    Err(TlsError::HandshakeFailed("no suitable certificate".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CertificateData, PrivateKey, PublicKey};

    #[test]
    fn test_version_negotiation() {
        assert!(version_supported(&[0x0303, TLS13_VERSION]));
        assert!(!version_supported(&[0x0303]));
        assert!(!version_supported(&[]));
    }

    #[test]
    fn test_dh_negotiation_prefers_server_order() {
        let client_a = KeyExchange::generate(NamedGroup::X25519).unwrap();
        let client_b = KeyExchange::generate(NamedGroup::SECP256R1).unwrap();
        let shares = vec![
            KeyShareEntry {
                group: NamedGroup::X25519,
                key_exchange: client_a.public_key_bytes().to_vec(),
            },
            KeyShareEntry {
                group: NamedGroup::SECP256R1,
                key_exchange: client_b.public_key_bytes().to_vec(),
            },
        ];

        let result = dh_negotiation(&shares, &[NamedGroup::SECP256R1, NamedGroup::X25519])
            .unwrap()
            .unwrap();
        assert_eq!(result.group, NamedGroup::SECP256R1);

        let expected = client_b.compute_shared_secret(&result.public_key).unwrap();
        assert_eq!(result.shared_secret, expected);
    }

    #[test]
    fn test_dh_negotiation_no_overlap() {
        let shares = vec![KeyShareEntry {
            group: NamedGroup::X448,
            key_exchange: vec![0; 56],
        }];
        assert!(dh_negotiation(&shares, &[NamedGroup::X25519]).unwrap().is_none());
        assert!(dh_negotiation(&[], &[NamedGroup::X25519]).unwrap().is_none());
    }

    #[test]
    fn test_psk_mode_negotiation() {
        let both = [PskKeyExchangeMode::PskKe, PskKeyExchangeMode::PskDheKe];
        // PSK + DHE preferred when possible
        assert_eq!(psk_mode_negotiation(true, true, &both), (true, true));
        // PSK-only fallback when DH is unavailable
        assert_eq!(psk_mode_negotiation(false, true, &both), (false, true));
        // No PSK: whatever DH allows
        assert_eq!(psk_mode_negotiation(true, false, &both), (true, false));
        assert_eq!(psk_mode_negotiation(false, false, &both), (false, false));
        // Client permits no mode we can serve
        assert_eq!(psk_mode_negotiation(false, true, &[]), (false, false));
        assert_eq!(
            psk_mode_negotiation(false, true, &[PskKeyExchangeMode::PskDheKe]),
            (false, false)
        );
    }

    #[test]
    fn test_early_data_negotiation() {
        assert!(early_data_negotiation(true, true, true));
        assert!(!early_data_negotiation(false, true, true));
        assert!(!early_data_negotiation(true, false, true));
        assert!(!early_data_negotiation(true, true, false));
    }

    fn external_psk(suite: CipherSuite) -> PreSharedKey {
        PreSharedKey {
            identity: b"client-1".to_vec(),
            key: vec![0x42; 32],
            cipher_suite: suite,
            next_proto: None,
            external: true,
        }
    }

    #[test]
    fn test_cipher_suite_negotiation() {
        let client = vec![
            CipherSuite::TLS_AES_256_GCM_SHA384,
            CipherSuite::TLS_AES_128_GCM_SHA256,
        ];
        let server = vec![
            CipherSuite::TLS_AES_128_GCM_SHA256,
            CipherSuite::TLS_AES_256_GCM_SHA384,
        ];
        // Server preference wins
        assert_eq!(
            cipher_suite_negotiation(None, &client, &server).unwrap(),
            CipherSuite::TLS_AES_128_GCM_SHA256
        );

        // PSK hash constrains the choice
        let psk = external_psk(CipherSuite::TLS_AES_256_GCM_SHA384);
        assert_eq!(
            cipher_suite_negotiation(Some(&psk), &client, &server).unwrap(),
            CipherSuite::TLS_AES_256_GCM_SHA384
        );

        // SHA-256 PSK against a SHA-384-only intersection fails
        let psk = external_psk(CipherSuite::TLS_AES_128_GCM_SHA256);
        assert!(cipher_suite_negotiation(
            Some(&psk),
            &[CipherSuite::TLS_AES_256_GCM_SHA384],
            &server
        )
        .is_err());

        assert!(cipher_suite_negotiation(None, &client, &[]).is_err());
    }

    #[test]
    fn test_alpn_negotiation() {
        let client = vec!["h2".to_string(), "http/1.1".to_string()];
        let server = vec!["http/1.1".to_string(), "h2".to_string()];

        assert_eq!(
            alpn_negotiation(None, &client, &server).unwrap(),
            Some("http/1.1".to_string())
        );
        assert_eq!(alpn_negotiation(None, &[], &server).unwrap(), None);
        assert!(alpn_negotiation(None, &client, &[]).is_err());

        let mut psk = external_psk(CipherSuite::TLS_AES_128_GCM_SHA256);
        psk.next_proto = Some("h2".to_string());
        assert_eq!(
            alpn_negotiation(Some(&psk), &client, &server).unwrap(),
            Some("h2".to_string())
        );
        assert!(alpn_negotiation(Some(&psk), &["http/1.1".to_string()], &server).is_err());
    }

    fn ed25519_cert(name: &str, seed: u8) -> Certificate {
        let signing = ed25519_dalek::SigningKey::from_bytes(&[seed; 32]);
        Certificate {
            chain: vec![CertificateData {
                der: vec![seed; 64],
                subject_name: name.to_string(),
                public_key: PublicKey::Ed25519(signing.verifying_key().to_bytes()),
            }],
            private_key: PrivateKey::Ed25519([seed; 32]),
        }
    }

    #[test]
    fn test_certificate_selection() {
        let certs = vec![ed25519_cert("a.example", 1), ed25519_cert("b.example", 2)];

        let (cert, scheme) =
            certificate_selection(Some("b.example"), &[SignatureScheme::ED25519], &certs)
                .unwrap();
        assert_eq!(cert.leaf().unwrap().subject_name, "b.example");
        assert_eq!(scheme, SignatureScheme::ED25519);

        assert!(certificate_selection(
            Some("c.example"),
            &[SignatureScheme::ED25519],
            &certs
        )
        .is_err());
        assert!(certificate_selection(
            Some("a.example"),
            &[SignatureScheme::ECDSA_SECP256R1_SHA256],
            &certs
        )
        .is_err());

        // No name constraint: first viable certificate
        let (cert, _) =
            certificate_selection(None, &[SignatureScheme::ED25519], &certs).unwrap();
        assert_eq!(cert.leaf().unwrap().subject_name, "a.example");
    }
}
