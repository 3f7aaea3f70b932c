//! TLS 1.3 key schedule (RFC 8446 Section 7.1), flight-oriented.
//!
//! Wraps the Early Secret → Handshake Secret → Master Secret derivation
//! chain behind the operations a handshake actually performs, in order:
//! `pre_init` (PSK offered), `early_update_with_client_hello`, `init`,
//! `update_with_server_hello`, `update_with_server_first_flight`,
//! `update_with_client_second_flight`. The transcript advances at flight
//! boundaries, never per message, and each operation is phase-checked so
//! earlier derivations cannot be requested after advancement.

use super::hkdf::{derive_secret, hkdf_expand_label, hkdf_extract, hmac_hash};
use super::transcript::TranscriptHash;
use super::{CipherSuiteParams, HashAlgorithm};
use crate::CipherSuite;
use opal_types::TlsError;
use zeroize::Zeroize;

// Handshake message type codes the schedule synthesizes itself: the
// message_hash substitution for HelloRetryRequest (RFC 8446 §4.4.1) and the
// Finished messages whose MACs it computes.
const MESSAGE_HASH_TYPE: u8 = 254;
const FINISHED_TYPE: u8 = 20;

/// Current phase of the key schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySchedulePhase {
    Uninit,
    /// Early secret derived (from a PSK or from zeros).
    Early,
    /// Handshake secret and handshake traffic secrets derived.
    Handshake,
    /// Master secret and application traffic secrets derived.
    Application,
}

/// TLS 1.3 key schedule state.
///
/// All secret material is zeroized on drop.
pub struct KeySchedule {
    params: Option<CipherSuiteParams>,
    phase: KeySchedulePhase,
    transcript: Option<TranscriptHash>,
    /// The ladder secret: Early → Handshake → Master.
    current_secret: Vec<u8>,
    binder_key: Vec<u8>,
    early_traffic_secret: Vec<u8>,
    early_exporter_master_secret: Vec<u8>,
    client_hs_traffic_secret: Vec<u8>,
    server_hs_traffic_secret: Vec<u8>,
    client_finished_key: Vec<u8>,
    server_finished_key: Vec<u8>,
    client_app_traffic_secret: Vec<u8>,
    server_app_traffic_secret: Vec<u8>,
    exporter_master_secret: Vec<u8>,
    resumption_master_secret: Vec<u8>,
    transcript_hash_at_server_finished: Vec<u8>,
}

impl Drop for KeySchedule {
    fn drop(&mut self) {
        self.current_secret.zeroize();
        self.binder_key.zeroize();
        self.early_traffic_secret.zeroize();
        self.early_exporter_master_secret.zeroize();
        self.client_hs_traffic_secret.zeroize();
        self.server_hs_traffic_secret.zeroize();
        self.client_finished_key.zeroize();
        self.server_finished_key.zeroize();
        self.client_app_traffic_secret.zeroize();
        self.server_app_traffic_secret.zeroize();
        self.exporter_master_secret.zeroize();
        self.resumption_master_secret.zeroize();
    }
}

impl Default for KeySchedule {
    fn default() -> Self {
        Self::new()
    }
}

impl KeySchedule {
    /// Create an uninitialized key schedule.
    pub fn new() -> Self {
        Self {
            params: None,
            phase: KeySchedulePhase::Uninit,
            transcript: None,
            current_secret: Vec::new(),
            binder_key: Vec::new(),
            early_traffic_secret: Vec::new(),
            early_exporter_master_secret: Vec::new(),
            client_hs_traffic_secret: Vec::new(),
            server_hs_traffic_secret: Vec::new(),
            client_finished_key: Vec::new(),
            server_finished_key: Vec::new(),
            client_app_traffic_secret: Vec::new(),
            server_app_traffic_secret: Vec::new(),
            exporter_master_secret: Vec::new(),
            resumption_master_secret: Vec::new(),
            transcript_hash_at_server_finished: Vec::new(),
        }
    }

    pub fn phase(&self) -> KeySchedulePhase {
        self.phase
    }

    pub fn params(&self) -> Option<&CipherSuiteParams> {
        self.params.as_ref()
    }

    /// The suite hash, once `pre_init` or `init` has fixed it.
    pub fn hash_algorithm(&self) -> Option<HashAlgorithm> {
        self.params.as_ref().map(|p| p.hash)
    }

    fn alg(&self) -> Result<HashAlgorithm, TlsError> {
        self.hash_algorithm()
            .ok_or(TlsError::KeySchedulePhase("no cipher suite fixed"))
    }

    /// Derive the early secret and binder key from a PSK.
    ///
    /// Permitted only before `init`. `external` selects the binder label
    /// (`ext binder` / `res binder`).
    pub fn pre_init(
        &mut self,
        suite: CipherSuite,
        psk: &[u8],
        external: bool,
    ) -> Result<(), TlsError> {
        if self.phase != KeySchedulePhase::Uninit {
            return Err(TlsError::KeySchedulePhase("pre_init"));
        }
        let params = CipherSuiteParams::from_suite(suite)?;
        let alg = params.hash;
        self.current_secret = hkdf_extract(alg, &[], psk);
        let label: &[u8] = if external { b"ext binder" } else { b"res binder" };
        self.binder_key =
            derive_secret(alg, &self.current_secret, label, &alg.empty_hash())?;
        self.params = Some(params);
        self.phase = KeySchedulePhase::Early;
        Ok(())
    }

    /// Compute a PSK binder over the truncated ClientHello transcript bytes.
    ///
    /// `binder = HMAC(HKDF-Expand-Label(binder_key, "finished", "", L),
    /// Hash(truncated_transcript))`
    pub fn compute_binder(&self, truncated_transcript: &[u8]) -> Result<Vec<u8>, TlsError> {
        if self.binder_key.is_empty() {
            return Err(TlsError::KeySchedulePhase("compute_binder"));
        }
        let alg = self.alg()?;
        let finished_key = hkdf_expand_label(
            alg,
            &self.binder_key,
            b"finished",
            b"",
            alg.output_size(),
        )?;
        hmac_hash(alg, &finished_key, &alg.hash(truncated_transcript))
    }

    /// Derive the client early traffic and early exporter secrets from the
    /// full ClientHello bytes. Requires `pre_init` or `init` already done.
    pub fn early_update_with_client_hello(
        &mut self,
        client_hello: &[u8],
    ) -> Result<(), TlsError> {
        if self.phase != KeySchedulePhase::Early {
            return Err(TlsError::KeySchedulePhase("early_update_with_client_hello"));
        }
        let alg = self.alg()?;
        let hash = alg.hash(client_hello);
        self.early_traffic_secret =
            derive_secret(alg, &self.current_secret, b"c e traffic", &hash)?;
        self.early_exporter_master_secret =
            derive_secret(alg, &self.current_secret, b"e exp master", &hash)?;
        Ok(())
    }

    /// The synthetic `message_hash` handshake message replacing the first
    /// ClientHello in a transcript that spans a HelloRetryRequest
    /// (RFC 8446 §4.4.1).
    pub fn message_hash_of(&self, message: &[u8]) -> Result<Vec<u8>, TlsError> {
        let alg = self.alg()?;
        let hash = alg.hash(message);
        let mut out = Vec::with_capacity(4 + hash.len());
        out.push(MESSAGE_HASH_TYPE);
        out.extend_from_slice(&[0, 0, hash.len() as u8]);
        out.extend_from_slice(&hash);
        Ok(out)
    }

    fn finished_message(verify_data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + verify_data.len());
        out.push(FINISHED_TYPE);
        out.extend_from_slice(&[0, 0, verify_data.len() as u8]);
        out.extend_from_slice(verify_data);
        out
    }

    /// Fix the cipher suite and seed the transcript with the Hello exchange.
    ///
    /// Without a prior `pre_init`, the early secret is derived from a
    /// zero PSK. With one, the suite's hash must match the PSK's. A second
    /// `init` is a phase violation; derived secrets are never reset.
    pub fn init(
        &mut self,
        suite: CipherSuite,
        client_hello: &[u8],
        hello_retry_request: Option<&[u8]>,
        retry_client_hello: Option<&[u8]>,
    ) -> Result<(), TlsError> {
        if self.transcript.is_some() {
            return Err(TlsError::KeySchedulePhase("init"));
        }
        match self.phase {
            KeySchedulePhase::Uninit => {
                let params = CipherSuiteParams::from_suite(suite)?;
                let zero_psk = vec![0u8; params.hash_len];
                self.current_secret = hkdf_extract(params.hash, &[], &zero_psk);
                self.params = Some(params);
                self.phase = KeySchedulePhase::Early;
            }
            KeySchedulePhase::Early => {
                let params = CipherSuiteParams::from_suite(suite)?;
                let prior = self.alg()?;
                if params.hash != prior {
                    return Err(TlsError::HandshakeFailed(
                        "selected suite hash differs from offered PSK".into(),
                    ));
                }
                self.params = Some(params);
            }
            _ => return Err(TlsError::KeySchedulePhase("init")),
        }

        let alg = self.alg()?;
        let mut transcript = TranscriptHash::new(alg);
        match hello_retry_request {
            Some(hrr) => {
                let retry = retry_client_hello.ok_or_else(|| {
                    TlsError::HandshakeFailed("HelloRetryRequest without retried hello".into())
                })?;
                transcript.update(&self.message_hash_of(client_hello)?);
                transcript.update(hrr);
                transcript.update(retry);
            }
            None => transcript.update(client_hello),
        }
        self.transcript = Some(transcript);
        Ok(())
    }

    /// Absorb the ServerHello, derive the handshake secret from the DH
    /// shared secret (or zeros for PSK-only), and produce the handshake
    /// traffic secrets and Finished keys.
    pub fn update_with_server_hello(
        &mut self,
        server_hello: &[u8],
        dh_secret: Option<&[u8]>,
    ) -> Result<(), TlsError> {
        if self.phase != KeySchedulePhase::Early {
            return Err(TlsError::KeySchedulePhase("update_with_server_hello"));
        }
        let alg = self.alg()?;
        let hash_len = alg.output_size();

        let Some(transcript) = self.transcript.as_mut() else {
            return Err(TlsError::KeySchedulePhase("update_with_server_hello"));
        };
        transcript.update(server_hello);
        let hash = transcript.current_hash();

        let mut salt =
            derive_secret(alg, &self.current_secret, b"derived", &alg.empty_hash())?;
        let zero_dh = vec![0u8; hash_len];
        let ikm = dh_secret.unwrap_or(&zero_dh);
        self.current_secret.zeroize();
        self.current_secret = hkdf_extract(alg, &salt, ikm);
        salt.zeroize();

        self.client_hs_traffic_secret =
            derive_secret(alg, &self.current_secret, b"c hs traffic", &hash)?;
        self.server_hs_traffic_secret =
            derive_secret(alg, &self.current_secret, b"s hs traffic", &hash)?;
        self.client_finished_key =
            hkdf_expand_label(alg, &self.client_hs_traffic_secret, b"finished", b"", hash_len)?;
        self.server_finished_key =
            hkdf_expand_label(alg, &self.server_hs_traffic_secret, b"finished", b"", hash_len)?;

        self.phase = KeySchedulePhase::Handshake;
        Ok(())
    }

    /// Absorb the server's first flight (EncryptedExtensions through
    /// CertificateVerify), returning the server Finished MAC. The schedule
    /// appends the Finished message itself, derives the master secret, and
    /// produces the application traffic, exporter, and resumption inputs.
    pub fn update_with_server_first_flight(
        &mut self,
        flight: &[&[u8]],
    ) -> Result<Vec<u8>, TlsError> {
        if self.phase != KeySchedulePhase::Handshake {
            return Err(TlsError::KeySchedulePhase("update_with_server_first_flight"));
        }
        let alg = self.alg()?;
        let hash_len = alg.output_size();

        let Some(transcript) = self.transcript.as_mut() else {
            return Err(TlsError::KeySchedulePhase("update_with_server_first_flight"));
        };
        for message in flight {
            transcript.update(message);
        }
        let hash = transcript.current_hash();
        let verify_data = hmac_hash(alg, &self.server_finished_key, &hash)?;
        transcript.update(&Self::finished_message(&verify_data));
        let hash_at_finished = transcript.current_hash();

        let mut salt =
            derive_secret(alg, &self.current_secret, b"derived", &alg.empty_hash())?;
        let zero_ikm = vec![0u8; hash_len];
        self.current_secret.zeroize();
        self.current_secret = hkdf_extract(alg, &salt, &zero_ikm);
        salt.zeroize();

        self.client_app_traffic_secret =
            derive_secret(alg, &self.current_secret, b"c ap traffic", &hash_at_finished)?;
        self.server_app_traffic_secret =
            derive_secret(alg, &self.current_secret, b"s ap traffic", &hash_at_finished)?;
        self.exporter_master_secret =
            derive_secret(alg, &self.current_secret, b"exp master", &hash_at_finished)?;
        self.transcript_hash_at_server_finished = hash_at_finished;

        self.phase = KeySchedulePhase::Application;
        Ok(verify_data)
    }

    /// Absorb the client's second flight (EndOfEarlyData, Certificate,
    /// CertificateVerify as applicable), returning the client Finished MAC.
    /// The schedule appends the Finished message itself and derives the
    /// resumption master secret.
    pub fn update_with_client_second_flight(
        &mut self,
        flight: &[&[u8]],
    ) -> Result<Vec<u8>, TlsError> {
        if self.phase != KeySchedulePhase::Application {
            return Err(TlsError::KeySchedulePhase("update_with_client_second_flight"));
        }
        let alg = self.alg()?;

        let Some(transcript) = self.transcript.as_mut() else {
            return Err(TlsError::KeySchedulePhase("update_with_client_second_flight"));
        };
        for message in flight {
            transcript.update(message);
        }
        let hash = transcript.current_hash();
        let verify_data = hmac_hash(alg, &self.client_finished_key, &hash)?;
        transcript.update(&Self::finished_message(&verify_data));

        self.resumption_master_secret = derive_secret(
            alg,
            &self.current_secret,
            b"res master",
            &transcript.current_hash(),
        )?;
        Ok(verify_data)
    }

    /// The current transcript hash.
    pub fn transcript_hash(&self) -> Result<Vec<u8>, TlsError> {
        self.transcript
            .as_ref()
            .map(|t| t.current_hash())
            .ok_or(TlsError::KeySchedulePhase("transcript_hash"))
    }

    pub fn transcript_hash_at_server_finished(&self) -> &[u8] {
        &self.transcript_hash_at_server_finished
    }

    pub fn early_traffic_secret(&self) -> &[u8] {
        &self.early_traffic_secret
    }

    pub fn early_exporter_master_secret(&self) -> &[u8] {
        &self.early_exporter_master_secret
    }

    pub fn client_handshake_traffic_secret(&self) -> &[u8] {
        &self.client_hs_traffic_secret
    }

    pub fn server_handshake_traffic_secret(&self) -> &[u8] {
        &self.server_hs_traffic_secret
    }

    pub fn client_application_traffic_secret(&self) -> &[u8] {
        &self.client_app_traffic_secret
    }

    pub fn server_application_traffic_secret(&self) -> &[u8] {
        &self.server_app_traffic_secret
    }

    pub fn exporter_master_secret(&self) -> &[u8] {
        &self.exporter_master_secret
    }

    pub fn resumption_master_secret(&self) -> &[u8] {
        &self.resumption_master_secret
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUITE: CipherSuite = CipherSuite::TLS_AES_128_GCM_SHA256;

    fn to_hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    #[test]
    fn test_zero_psk_early_secret() {
        let mut ks = KeySchedule::new();
        ks.init(SUITE, b"client hello bytes", None, None).unwrap();
        assert_eq!(ks.phase(), KeySchedulePhase::Early);
        // Early Secret with zero PSK, RFC 8448 Section 3
        assert_eq!(
            to_hex(&ks.current_secret),
            "33ad0a1c607ec03b09e6cd9893680ce210adf300aa1f2660e1b22e10f170f92a"
        );
    }

    #[test]
    fn test_phase_enforcement() {
        let mut ks = KeySchedule::new();
        assert!(ks.update_with_server_hello(b"sh", None).is_err());
        assert!(ks.update_with_server_first_flight(&[b"ee"]).is_err());
        assert!(ks.update_with_client_second_flight(&[]).is_err());
        assert!(ks.early_update_with_client_hello(b"ch").is_err());
        assert!(ks.compute_binder(b"x").is_err());

        ks.init(SUITE, b"ch", None, None).unwrap();
        assert!(ks.update_with_server_first_flight(&[b"ee"]).is_err());

        ks.update_with_server_hello(b"sh", Some(&[0x11; 32])).unwrap();
        assert_eq!(ks.phase(), KeySchedulePhase::Handshake);
        assert!(ks.update_with_server_hello(b"sh", None).is_err());
        assert!(ks.early_update_with_client_hello(b"ch").is_err());

        ks.update_with_server_first_flight(&[b"ee", b"cert", b"cv"]).unwrap();
        assert_eq!(ks.phase(), KeySchedulePhase::Application);
        ks.update_with_client_second_flight(&[]).unwrap();
    }

    #[test]
    fn test_init_twice_rejected() {
        let mut ks = KeySchedule::new();
        ks.init(SUITE, b"ch", None, None).unwrap();
        let secret_before = ks.current_secret.clone();
        assert!(ks.init(SUITE, b"ch", None, None).is_err());
        // The spurious call must not reset derived secrets
        assert_eq!(ks.current_secret, secret_before);
    }

    #[test]
    fn test_pre_init_then_init_requires_matching_hash() {
        let mut ks = KeySchedule::new();
        ks.pre_init(SUITE, &[0x42; 32], true).unwrap();
        assert!(ks
            .init(CipherSuite::TLS_AES_256_GCM_SHA384, b"ch", None, None)
            .is_err());

        let mut ks = KeySchedule::new();
        ks.pre_init(SUITE, &[0x42; 32], true).unwrap();
        // Same hash, different suite is fine
        ks.init(CipherSuite::TLS_CHACHA20_POLY1305_SHA256, b"ch", None, None)
            .unwrap();
    }

    #[test]
    fn test_binder_is_deterministic_and_keyed() {
        let mut ks = KeySchedule::new();
        ks.pre_init(SUITE, &[0x42; 32], true).unwrap();
        let b1 = ks.compute_binder(b"truncated hello").unwrap();
        let b2 = ks.compute_binder(b"truncated hello").unwrap();
        assert_eq!(b1, b2);
        assert_eq!(b1.len(), 32);

        let b3 = ks.compute_binder(b"different hello").unwrap();
        assert_ne!(b1, b3);

        let mut other = KeySchedule::new();
        other.pre_init(SUITE, &[0x43; 32], true).unwrap();
        assert_ne!(other.compute_binder(b"truncated hello").unwrap(), b1);
    }

    #[test]
    fn test_binder_label_selects_external_or_resumption() {
        let mut ext = KeySchedule::new();
        ext.pre_init(SUITE, &[0x42; 32], true).unwrap();
        let mut res = KeySchedule::new();
        res.pre_init(SUITE, &[0x42; 32], false).unwrap();
        assert_ne!(
            ext.compute_binder(b"hello").unwrap(),
            res.compute_binder(b"hello").unwrap()
        );
    }

    #[test]
    fn test_peer_schedules_agree() {
        // Two schedules fed the same message bytes derive identical secrets
        // and Finished values.
        let run = || {
            let mut ks = KeySchedule::new();
            ks.init(SUITE, b"ch bytes", None, None).unwrap();
            ks.update_with_server_hello(b"sh bytes", Some(&[0x7E; 32])).unwrap();
            let sf = ks
                .update_with_server_first_flight(&[b"ee bytes", b"cert bytes", b"cv bytes"])
                .unwrap();
            let cf = ks.update_with_client_second_flight(&[b"eoed"]).unwrap();
            (ks, sf, cf)
        };
        let (client, client_sf, client_cf) = run();
        let (server, server_sf, server_cf) = run();

        assert_eq!(client_sf, server_sf);
        assert_eq!(client_cf, server_cf);
        assert_ne!(client_sf, client_cf);
        assert_eq!(
            client.client_application_traffic_secret(),
            server.client_application_traffic_secret()
        );
        assert_eq!(
            client.server_application_traffic_secret(),
            server.server_application_traffic_secret()
        );
        assert_eq!(client.exporter_master_secret(), server.exporter_master_secret());
        assert_eq!(
            client.resumption_master_secret(),
            server.resumption_master_secret()
        );
        assert_eq!(
            client.transcript_hash_at_server_finished(),
            server.transcript_hash_at_server_finished()
        );
    }

    #[test]
    fn test_dh_secret_changes_everything() {
        let run = |dh: &[u8]| {
            let mut ks = KeySchedule::new();
            ks.init(SUITE, b"ch", None, None).unwrap();
            ks.update_with_server_hello(b"sh", Some(dh)).unwrap();
            ks.update_with_server_first_flight(&[b"ee"]).unwrap()
        };
        assert_ne!(run(&[0x01; 32]), run(&[0x02; 32]));
    }

    #[test]
    fn test_hrr_transcript_uses_message_hash() {
        let mut plain = KeySchedule::new();
        plain.init(SUITE, b"ch2", None, None).unwrap();

        let mut retried = KeySchedule::new();
        retried.init(SUITE, b"ch1", Some(b"hrr"), Some(b"ch2")).unwrap();

        plain.update_with_server_hello(b"sh", Some(&[0x7E; 32])).unwrap();
        retried.update_with_server_hello(b"sh", Some(&[0x7E; 32])).unwrap();
        assert_ne!(
            plain.client_handshake_traffic_secret(),
            retried.client_handshake_traffic_secret()
        );
    }

    #[test]
    fn test_message_hash_shape() {
        let mut ks = KeySchedule::new();
        ks.init(SUITE, b"ch", None, None).unwrap();
        let mh = ks.message_hash_of(b"ch1 bytes").unwrap();
        assert_eq!(mh[0], 254);
        assert_eq!(&mh[1..4], &[0, 0, 32]);
        assert_eq!(mh.len(), 4 + 32);
    }

    #[test]
    fn test_early_secrets_require_early_phase() {
        let mut ks = KeySchedule::new();
        ks.pre_init(SUITE, &[0x42; 32], true).unwrap();
        ks.early_update_with_client_hello(b"ch bytes").unwrap();
        assert_eq!(ks.early_traffic_secret().len(), 32);
        assert_eq!(ks.early_exporter_master_secret().len(), 32);

        ks.init(SUITE, b"ch bytes", None, None).unwrap();
        ks.update_with_server_hello(b"sh", None).unwrap();
        assert!(ks.early_update_with_client_hello(b"ch bytes").is_err());
    }
}
