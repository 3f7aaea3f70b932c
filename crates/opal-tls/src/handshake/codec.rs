//! Parsed handshake message bodies and their canonical encoding.
//!
//! The state machine consumes and produces parsed bodies; general wire
//! decoding is the embedder's job. The key schedule, however, is defined
//! over exact message bytes, so every [`HandshakeMessage`] pairs a body with
//! its encoding, fixed once at construction and never re-derived. Encodings
//! follow the RFC 8446 shapes (1-byte type, 24-bit length, real extension
//! code points, `pre_shared_key` last) so transcripts are wire-faithful.

use super::HandshakeType;
use crate::config::CertificateData;
use crate::crypt::{NamedGroup, PskKeyExchangeMode, SignatureScheme};
use crate::CipherSuite;
use opal_types::TlsError;

// Extension code points (RFC 8446 §4.2).
const EXT_SERVER_NAME: u16 = 0;
const EXT_SUPPORTED_GROUPS: u16 = 10;
const EXT_SIGNATURE_ALGORITHMS: u16 = 13;
const EXT_ALPN: u16 = 16;
const EXT_PRE_SHARED_KEY: u16 = 41;
const EXT_EARLY_DATA: u16 = 42;
const EXT_SUPPORTED_VERSIONS: u16 = 43;
const EXT_COOKIE: u16 = 44;
const EXT_PSK_KEY_EXCHANGE_MODES: u16 = 45;
const EXT_KEY_SHARE: u16 = 51;

const LEGACY_VERSION: u16 = 0x0303;

// ---------------------------------------------------------------------------
// Message bodies
// ---------------------------------------------------------------------------

/// One entry of a `key_share` extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyShareEntry {
    pub group: NamedGroup,
    pub key_exchange: Vec<u8>,
}

/// One offered PSK identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PskIdentity {
    pub identity: Vec<u8>,
    pub obfuscated_ticket_age: u32,
}

/// The `pre_shared_key` extension of a ClientHello.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferedPsks {
    pub identities: Vec<PskIdentity>,
    pub binders: Vec<Vec<u8>>,
}

/// ClientHello body. Absent extensions are `None` / empty collections.
#[derive(Debug, Clone, Default)]
pub struct ClientHello {
    pub random: [u8; 32],
    pub cipher_suites: Vec<CipherSuite>,
    pub supported_versions: Vec<u16>,
    pub server_name: Option<String>,
    pub key_shares: Vec<KeyShareEntry>,
    pub supported_groups: Vec<NamedGroup>,
    pub signature_schemes: Vec<SignatureScheme>,
    pub psk_modes: Vec<PskKeyExchangeMode>,
    pub alpn_protocols: Vec<String>,
    pub early_data: bool,
    pub cookie: Option<Vec<u8>>,
    pub pre_shared_key: Option<OfferedPsks>,
}

/// ServerHello body.
#[derive(Debug, Clone)]
pub struct ServerHello {
    /// The selected protocol version (carried in `supported_versions`).
    pub version: u16,
    pub random: [u8; 32],
    pub cipher_suite: CipherSuite,
    pub key_share: Option<KeyShareEntry>,
    /// The `selected_identity` of an accepted PSK.
    pub pre_shared_key: Option<u16>,
}

/// HelloRetryRequest body.
#[derive(Debug, Clone)]
pub struct HelloRetryRequest {
    pub version: u16,
    /// The group the client should retry with.
    pub selected_group: Option<NamedGroup>,
    pub cookie: Option<Vec<u8>>,
}

/// EncryptedExtensions body.
#[derive(Debug, Clone, Default)]
pub struct EncryptedExtensions {
    pub alpn_protocols: Vec<String>,
    pub early_data: bool,
}

/// CertificateRequest body.
#[derive(Debug, Clone)]
pub struct CertificateRequest {
    pub signature_schemes: Vec<SignatureScheme>,
}

/// Certificate body. An empty chain is a client declining authentication.
#[derive(Debug, Clone, Default)]
pub struct CertificateMsg {
    pub context: Vec<u8>,
    pub chain: Vec<CertificateData>,
}

/// CertificateVerify body.
#[derive(Debug, Clone)]
pub struct CertificateVerify {
    pub scheme: SignatureScheme,
    pub signature: Vec<u8>,
}

/// Finished body.
#[derive(Debug, Clone)]
pub struct Finished {
    pub verify_data: Vec<u8>,
}

/// KeyUpdate body.
#[derive(Debug, Clone)]
pub struct KeyUpdate {
    pub request_update: bool,
}

/// NewSessionTicket body.
#[derive(Debug, Clone)]
pub struct NewSessionTicket {
    pub lifetime: u32,
    pub age_add: u32,
    pub nonce: Vec<u8>,
    pub ticket: Vec<u8>,
    pub max_early_data: u32,
}

/// A parsed handshake message body, one variant per message type.
#[derive(Debug, Clone)]
pub enum HandshakeBody {
    ClientHello(ClientHello),
    ServerHello(ServerHello),
    HelloRetryRequest(HelloRetryRequest),
    EncryptedExtensions(EncryptedExtensions),
    CertificateRequest(CertificateRequest),
    Certificate(CertificateMsg),
    CertificateVerify(CertificateVerify),
    Finished(Finished),
    EndOfEarlyData,
    KeyUpdate(KeyUpdate),
    NewSessionTicket(NewSessionTicket),
}

impl HandshakeBody {
    /// The message type of this body.
    pub fn handshake_type(&self) -> HandshakeType {
        match self {
            HandshakeBody::ClientHello(_) => HandshakeType::ClientHello,
            HandshakeBody::ServerHello(_) => HandshakeType::ServerHello,
            HandshakeBody::HelloRetryRequest(_) => HandshakeType::HelloRetryRequest,
            HandshakeBody::EncryptedExtensions(_) => HandshakeType::EncryptedExtensions,
            HandshakeBody::CertificateRequest(_) => HandshakeType::CertificateRequest,
            HandshakeBody::Certificate(_) => HandshakeType::Certificate,
            HandshakeBody::CertificateVerify(_) => HandshakeType::CertificateVerify,
            HandshakeBody::Finished(_) => HandshakeType::Finished,
            HandshakeBody::EndOfEarlyData => HandshakeType::EndOfEarlyData,
            HandshakeBody::KeyUpdate(_) => HandshakeType::KeyUpdate,
            HandshakeBody::NewSessionTicket(_) => HandshakeType::NewSessionTicket,
        }
    }
}

/// A handshake message: parsed body plus its exact encoding.
///
/// For outbound messages the encoding is produced here at construction; for
/// inbound messages the embedder's decoder supplies the received bytes, so
/// the transcript never depends on re-serialization of a received message.
#[derive(Debug, Clone)]
pub struct HandshakeMessage {
    body: HandshakeBody,
    encoded: Vec<u8>,
}

impl HandshakeMessage {
    /// Construct a message from a body, fixing its canonical encoding.
    pub fn from_body(body: HandshakeBody) -> Result<Self, TlsError> {
        let encoded = encode_body(&body)?;
        Ok(Self { body, encoded })
    }

    /// Pair a parsed body with the exact bytes it was decoded from.
    pub fn from_parsed(body: HandshakeBody, encoded: Vec<u8>) -> Self {
        Self { body, encoded }
    }

    pub fn body(&self) -> &HandshakeBody {
        &self.body
    }

    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }

    pub fn handshake_type(&self) -> HandshakeType {
        self.body.handshake_type()
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn put_u24(buf: &mut Vec<u8>, v: usize, what: &'static str) -> Result<(), TlsError> {
    if v > 0xFF_FFFF {
        return Err(TlsError::EncodeOverflow(what));
    }
    buf.extend_from_slice(&[(v >> 16) as u8, (v >> 8) as u8, v as u8]);
    Ok(())
}

fn put_opaque8(buf: &mut Vec<u8>, data: &[u8], what: &'static str) -> Result<(), TlsError> {
    if data.len() > u8::MAX as usize {
        return Err(TlsError::EncodeOverflow(what));
    }
    buf.push(data.len() as u8);
    buf.extend_from_slice(data);
    Ok(())
}

fn put_opaque16(buf: &mut Vec<u8>, data: &[u8], what: &'static str) -> Result<(), TlsError> {
    if data.len() > u16::MAX as usize {
        return Err(TlsError::EncodeOverflow(what));
    }
    put_u16(buf, data.len() as u16);
    buf.extend_from_slice(data);
    Ok(())
}

fn put_extension(
    buf: &mut Vec<u8>,
    ext_type: u16,
    payload: &[u8],
    what: &'static str,
) -> Result<(), TlsError> {
    put_u16(buf, ext_type);
    put_opaque16(buf, payload, what)
}

/// Prepend the handshake message header (type + 24-bit length) to a body.
fn wrap(msg_type: HandshakeType, body: &[u8]) -> Result<Vec<u8>, TlsError> {
    let mut out = Vec::with_capacity(4 + body.len());
    out.push(msg_type as u8);
    put_u24(&mut out, body.len(), "handshake message body")?;
    out.extend_from_slice(body);
    Ok(out)
}

fn encode_key_share_entry(buf: &mut Vec<u8>, entry: &KeyShareEntry) -> Result<(), TlsError> {
    put_u16(buf, entry.group.0);
    put_opaque16(buf, &entry.key_exchange, "key share")
}

fn encode_alpn(protocols: &[String]) -> Result<Vec<u8>, TlsError> {
    let mut list = Vec::new();
    for proto in protocols {
        put_opaque8(&mut list, proto.as_bytes(), "alpn protocol")?;
    }
    let mut payload = Vec::new();
    put_opaque16(&mut payload, &list, "alpn list")?;
    Ok(payload)
}

/// Whether a ClientHello encoding carries its PSK binders, or stops at the
/// identity list (the prefix the binder MAC covers, RFC 8446 §4.2.11.2).
/// Length fields are computed for the full form in both modes, so the
/// truncated output is a byte prefix of the full one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClientHelloEncoding {
    Full,
    TruncatedForBinder,
}

impl ClientHello {
    /// Encoded length of the binder list (the suffix a truncated encoding
    /// omits).
    fn binders_suffix_len(psks: &OfferedPsks) -> usize {
        2 + psks.binders.iter().map(|b| 1 + b.len()).sum::<usize>()
    }

    /// Encode the complete handshake message (header included).
    pub(crate) fn encode(&self, mode: ClientHelloEncoding) -> Result<Vec<u8>, TlsError> {
        // Extensions other than pre_shared_key, in canonical order.
        let mut exts = Vec::new();
        if !self.supported_versions.is_empty() {
            let mut payload = Vec::new();
            let mut list = Vec::new();
            for v in &self.supported_versions {
                put_u16(&mut list, *v);
            }
            put_opaque8(&mut payload, &list, "supported versions")?;
            put_extension(&mut exts, EXT_SUPPORTED_VERSIONS, &payload, "supported versions")?;
        }
        if let Some(name) = &self.server_name {
            let mut entry = Vec::new();
            entry.push(0); // name_type host_name
            put_opaque16(&mut entry, name.as_bytes(), "server name")?;
            let mut payload = Vec::new();
            put_opaque16(&mut payload, &entry, "server name list")?;
            put_extension(&mut exts, EXT_SERVER_NAME, &payload, "server name")?;
        }
        if !self.key_shares.is_empty() {
            let mut list = Vec::new();
            for share in &self.key_shares {
                encode_key_share_entry(&mut list, share)?;
            }
            let mut payload = Vec::new();
            put_opaque16(&mut payload, &list, "key share list")?;
            put_extension(&mut exts, EXT_KEY_SHARE, &payload, "key share")?;
        }
        if !self.supported_groups.is_empty() {
            let mut list = Vec::new();
            for group in &self.supported_groups {
                put_u16(&mut list, group.0);
            }
            let mut payload = Vec::new();
            put_opaque16(&mut payload, &list, "supported groups")?;
            put_extension(&mut exts, EXT_SUPPORTED_GROUPS, &payload, "supported groups")?;
        }
        if !self.signature_schemes.is_empty() {
            let mut list = Vec::new();
            for scheme in &self.signature_schemes {
                put_u16(&mut list, scheme.0);
            }
            let mut payload = Vec::new();
            put_opaque16(&mut payload, &list, "signature schemes")?;
            put_extension(&mut exts, EXT_SIGNATURE_ALGORITHMS, &payload, "signature schemes")?;
        }
        if !self.psk_modes.is_empty() {
            let list: Vec<u8> = self.psk_modes.iter().map(|m| *m as u8).collect();
            let mut payload = Vec::new();
            put_opaque8(&mut payload, &list, "psk modes")?;
            put_extension(&mut exts, EXT_PSK_KEY_EXCHANGE_MODES, &payload, "psk modes")?;
        }
        if !self.alpn_protocols.is_empty() {
            let payload = encode_alpn(&self.alpn_protocols)?;
            put_extension(&mut exts, EXT_ALPN, &payload, "alpn")?;
        }
        if self.early_data {
            put_extension(&mut exts, EXT_EARLY_DATA, &[], "early data")?;
        }
        if let Some(cookie) = &self.cookie {
            let mut payload = Vec::new();
            put_opaque16(&mut payload, cookie, "cookie")?;
            put_extension(&mut exts, EXT_COOKIE, &payload, "cookie")?;
        }

        // pre_shared_key must be last; its identities are encoded now, the
        // binder list only in Full mode, with all length fields covering the
        // full form either way.
        let mut psk_identities = Vec::new();
        let mut psk_binders = Vec::new();
        let mut psk_payload_len = 0;
        if let Some(psks) = &self.pre_shared_key {
            let mut id_list = Vec::new();
            for identity in &psks.identities {
                put_opaque16(&mut id_list, &identity.identity, "psk identity")?;
                id_list.extend_from_slice(&identity.obfuscated_ticket_age.to_be_bytes());
            }
            put_opaque16(&mut psk_identities, &id_list, "psk identity list")?;

            let mut binder_list = Vec::new();
            for binder in &psks.binders {
                put_opaque8(&mut binder_list, binder, "psk binder")?;
            }
            put_opaque16(&mut psk_binders, &binder_list, "psk binder list")?;
            debug_assert_eq!(psk_binders.len(), Self::binders_suffix_len(psks));

            psk_payload_len = psk_identities.len() + psk_binders.len();
            if psk_payload_len > u16::MAX as usize {
                return Err(TlsError::EncodeOverflow("pre shared key"));
            }
        }

        let ext_total = exts.len()
            + if self.pre_shared_key.is_some() {
                4 + psk_payload_len
            } else {
                0
            };
        if ext_total > u16::MAX as usize {
            return Err(TlsError::EncodeOverflow("client hello extensions"));
        }

        let suites_len = 2 * self.cipher_suites.len();
        if suites_len > u16::MAX as usize {
            return Err(TlsError::EncodeOverflow("cipher suites"));
        }
        let body_len = 2 + 32 + 1 + (2 + suites_len) + 2 + (2 + ext_total);

        let mut out = Vec::with_capacity(4 + body_len);
        out.push(HandshakeType::ClientHello as u8);
        put_u24(&mut out, body_len, "client hello")?;
        put_u16(&mut out, LEGACY_VERSION);
        out.extend_from_slice(&self.random);
        out.push(0); // legacy_session_id
        put_u16(&mut out, suites_len as u16);
        for suite in &self.cipher_suites {
            put_u16(&mut out, suite.0);
        }
        out.extend_from_slice(&[1, 0]); // legacy_compression_methods
        put_u16(&mut out, ext_total as u16);
        out.extend_from_slice(&exts);
        if self.pre_shared_key.is_some() {
            put_u16(&mut out, EXT_PRE_SHARED_KEY);
            put_u16(&mut out, psk_payload_len as u16);
            out.extend_from_slice(&psk_identities);
            if mode == ClientHelloEncoding::Full {
                out.extend_from_slice(&psk_binders);
            }
        }
        Ok(out)
    }

    /// The byte prefix the PSK binder MAC covers: the full message with the
    /// binder list left off.
    pub(crate) fn encode_truncated(&self) -> Result<Vec<u8>, TlsError> {
        self.encode(ClientHelloEncoding::TruncatedForBinder)
    }
}

impl ServerHello {
    fn encode(&self) -> Result<Vec<u8>, TlsError> {
        let mut exts = Vec::new();
        {
            let mut payload = Vec::new();
            put_u16(&mut payload, self.version);
            put_extension(&mut exts, EXT_SUPPORTED_VERSIONS, &payload, "supported versions")?;
        }
        if let Some(share) = &self.key_share {
            let mut payload = Vec::new();
            encode_key_share_entry(&mut payload, share)?;
            put_extension(&mut exts, EXT_KEY_SHARE, &payload, "key share")?;
        }
        if let Some(selected) = self.pre_shared_key {
            let mut payload = Vec::new();
            put_u16(&mut payload, selected);
            put_extension(&mut exts, EXT_PRE_SHARED_KEY, &payload, "pre shared key")?;
        }

        let mut body = Vec::new();
        put_u16(&mut body, LEGACY_VERSION);
        body.extend_from_slice(&self.random);
        body.push(0); // legacy_session_id_echo
        put_u16(&mut body, self.cipher_suite.0);
        body.push(0); // legacy_compression_method
        put_opaque16(&mut body, &exts, "server hello extensions")?;
        wrap(HandshakeType::ServerHello, &body)
    }
}

impl HelloRetryRequest {
    fn encode(&self) -> Result<Vec<u8>, TlsError> {
        let mut exts = Vec::new();
        if let Some(group) = self.selected_group {
            let mut payload = Vec::new();
            put_u16(&mut payload, group.0);
            put_extension(&mut exts, EXT_KEY_SHARE, &payload, "key share")?;
        }
        if let Some(cookie) = &self.cookie {
            let mut payload = Vec::new();
            put_opaque16(&mut payload, cookie, "cookie")?;
            put_extension(&mut exts, EXT_COOKIE, &payload, "cookie")?;
        }

        let mut body = Vec::new();
        put_u16(&mut body, self.version);
        put_opaque16(&mut body, &exts, "hello retry request extensions")?;
        wrap(HandshakeType::HelloRetryRequest, &body)
    }
}

impl EncryptedExtensions {
    fn encode(&self) -> Result<Vec<u8>, TlsError> {
        let mut exts = Vec::new();
        if !self.alpn_protocols.is_empty() {
            let payload = encode_alpn(&self.alpn_protocols)?;
            put_extension(&mut exts, EXT_ALPN, &payload, "alpn")?;
        }
        if self.early_data {
            put_extension(&mut exts, EXT_EARLY_DATA, &[], "early data")?;
        }

        let mut body = Vec::new();
        put_opaque16(&mut body, &exts, "encrypted extensions")?;
        wrap(HandshakeType::EncryptedExtensions, &body)
    }
}

impl CertificateRequest {
    fn encode(&self) -> Result<Vec<u8>, TlsError> {
        let mut list = Vec::new();
        for scheme in &self.signature_schemes {
            put_u16(&mut list, scheme.0);
        }
        let mut payload = Vec::new();
        put_opaque16(&mut payload, &list, "signature schemes")?;
        let mut exts = Vec::new();
        put_extension(&mut exts, EXT_SIGNATURE_ALGORITHMS, &payload, "signature schemes")?;

        let mut body = Vec::new();
        body.push(0); // certificate_request_context
        put_opaque16(&mut body, &exts, "certificate request extensions")?;
        wrap(HandshakeType::CertificateRequest, &body)
    }
}

impl CertificateMsg {
    fn encode(&self) -> Result<Vec<u8>, TlsError> {
        let mut list = Vec::new();
        for entry in &self.chain {
            put_u24(&mut list, entry.der.len(), "certificate entry")?;
            list.extend_from_slice(&entry.der);
            put_u16(&mut list, 0); // per-entry extensions
        }

        let mut body = Vec::new();
        put_opaque8(&mut body, &self.context, "certificate context")?;
        put_u24(&mut body, list.len(), "certificate list")?;
        body.extend_from_slice(&list);
        wrap(HandshakeType::Certificate, &body)
    }
}

impl CertificateVerify {
    fn encode(&self) -> Result<Vec<u8>, TlsError> {
        let mut body = Vec::new();
        put_u16(&mut body, self.scheme.0);
        put_opaque16(&mut body, &self.signature, "signature")?;
        wrap(HandshakeType::CertificateVerify, &body)
    }
}

impl Finished {
    fn encode(&self) -> Result<Vec<u8>, TlsError> {
        wrap(HandshakeType::Finished, &self.verify_data)
    }
}

impl KeyUpdate {
    fn encode(&self) -> Result<Vec<u8>, TlsError> {
        wrap(HandshakeType::KeyUpdate, &[u8::from(self.request_update)])
    }
}

impl NewSessionTicket {
    fn encode(&self) -> Result<Vec<u8>, TlsError> {
        let mut exts = Vec::new();
        if self.max_early_data > 0 {
            let payload = self.max_early_data.to_be_bytes();
            put_extension(&mut exts, EXT_EARLY_DATA, &payload, "max early data")?;
        }

        let mut body = Vec::new();
        body.extend_from_slice(&self.lifetime.to_be_bytes());
        body.extend_from_slice(&self.age_add.to_be_bytes());
        put_opaque8(&mut body, &self.nonce, "ticket nonce")?;
        put_opaque16(&mut body, &self.ticket, "ticket")?;
        put_opaque16(&mut body, &exts, "ticket extensions")?;
        wrap(HandshakeType::NewSessionTicket, &body)
    }
}

fn encode_body(body: &HandshakeBody) -> Result<Vec<u8>, TlsError> {
    match body {
        HandshakeBody::ClientHello(ch) => ch.encode(ClientHelloEncoding::Full),
        HandshakeBody::ServerHello(sh) => sh.encode(),
        HandshakeBody::HelloRetryRequest(hrr) => hrr.encode(),
        HandshakeBody::EncryptedExtensions(ee) => ee.encode(),
        HandshakeBody::CertificateRequest(cr) => cr.encode(),
        HandshakeBody::Certificate(cert) => cert.encode(),
        HandshakeBody::CertificateVerify(cv) => cv.encode(),
        HandshakeBody::Finished(fin) => fin.encode(),
        HandshakeBody::EndOfEarlyData => wrap(HandshakeType::EndOfEarlyData, &[]),
        HandshakeBody::KeyUpdate(ku) => ku.encode(),
        HandshakeBody::NewSessionTicket(nst) => nst.encode(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TLS13_VERSION;

    fn sample_client_hello() -> ClientHello {
        ClientHello {
            random: [0xAB; 32],
            cipher_suites: vec![CipherSuite::TLS_AES_128_GCM_SHA256],
            supported_versions: vec![TLS13_VERSION],
            server_name: Some("example.com".into()),
            key_shares: vec![KeyShareEntry {
                group: NamedGroup::X25519,
                key_exchange: vec![0x11; 32],
            }],
            supported_groups: vec![NamedGroup::X25519],
            signature_schemes: vec![SignatureScheme::ED25519],
            psk_modes: vec![PskKeyExchangeMode::PskDheKe],
            ..Default::default()
        }
    }

    #[test]
    fn test_message_header() {
        let msg = HandshakeMessage::from_body(HandshakeBody::EndOfEarlyData).unwrap();
        assert_eq!(msg.encoded(), &[HandshakeType::EndOfEarlyData as u8, 0, 0, 0]);
        assert_eq!(msg.handshake_type(), HandshakeType::EndOfEarlyData);
    }

    #[test]
    fn test_client_hello_header_length_consistent() {
        let msg =
            HandshakeMessage::from_body(HandshakeBody::ClientHello(sample_client_hello()))
                .unwrap();
        let encoded = msg.encoded();
        assert_eq!(encoded[0], HandshakeType::ClientHello as u8);
        let body_len =
            ((encoded[1] as usize) << 16) | ((encoded[2] as usize) << 8) | encoded[3] as usize;
        assert_eq!(body_len, encoded.len() - 4);
    }

    #[test]
    fn test_truncated_client_hello_is_prefix_of_full() {
        let mut ch = sample_client_hello();
        ch.pre_shared_key = Some(OfferedPsks {
            identities: vec![PskIdentity {
                identity: b"example.com".to_vec(),
                obfuscated_ticket_age: 0,
            }],
            binders: vec![vec![0u8; 32]],
        });

        let full = ch.encode(ClientHelloEncoding::Full).unwrap();
        let trunc = ch.encode_truncated().unwrap();
        assert!(trunc.len() < full.len());
        assert_eq!(&full[..trunc.len()], &trunc[..]);
        // The suffix is exactly the binder list: u16 list length + one
        // 32-byte binder with a 1-byte length.
        assert_eq!(full.len() - trunc.len(), 2 + 1 + 32);
    }

    #[test]
    fn test_truncated_encoding_keeps_full_lengths() {
        let mut ch = sample_client_hello();
        ch.pre_shared_key = Some(OfferedPsks {
            identities: vec![PskIdentity {
                identity: b"id".to_vec(),
                obfuscated_ticket_age: 0,
            }],
            binders: vec![vec![0u8; 48]],
        });

        let full = ch.encode(ClientHelloEncoding::Full).unwrap();
        let trunc = ch.encode_truncated().unwrap();
        // The 24-bit message length in the truncated form still describes
        // the full body.
        assert_eq!(&full[..4], &trunc[..4]);
    }

    #[test]
    fn test_psk_extension_is_last() {
        let mut ch = sample_client_hello();
        ch.pre_shared_key = Some(OfferedPsks {
            identities: vec![PskIdentity {
                identity: b"id".to_vec(),
                obfuscated_ticket_age: 0,
            }],
            binders: vec![vec![0u8; 32]],
        });
        let full = ch.encode(ClientHelloEncoding::Full).unwrap();
        let trunc = ch.encode_truncated().unwrap();
        // Everything after the truncation point belongs to the PSK
        // extension, so the extension block ends with the binder list.
        assert_eq!(full.len(), trunc.len() + 2 + 1 + 32);
    }

    #[test]
    fn test_finished_encoding_shape() {
        let fin = Finished {
            verify_data: vec![0xCD; 32],
        };
        let msg = HandshakeMessage::from_body(HandshakeBody::Finished(fin)).unwrap();
        let encoded = msg.encoded();
        assert_eq!(encoded[0], HandshakeType::Finished as u8);
        assert_eq!(&encoded[1..4], &[0, 0, 32]);
        assert_eq!(&encoded[4..], &[0xCD; 32][..]);
    }

    #[test]
    fn test_server_hello_roundtrip_fields() {
        let sh = ServerHello {
            version: TLS13_VERSION,
            random: [0x5A; 32],
            cipher_suite: CipherSuite::TLS_AES_256_GCM_SHA384,
            key_share: Some(KeyShareEntry {
                group: NamedGroup::SECP256R1,
                key_exchange: vec![0x04; 65],
            }),
            pre_shared_key: None,
        };
        let msg = HandshakeMessage::from_body(HandshakeBody::ServerHello(sh)).unwrap();
        assert_eq!(msg.handshake_type(), HandshakeType::ServerHello);
        // legacy version || random follow the header
        assert_eq!(&msg.encoded()[4..6], &LEGACY_VERSION.to_be_bytes());
        assert_eq!(&msg.encoded()[6..38], &[0x5A; 32][..]);
    }

    #[test]
    fn test_encode_overflow_rejected() {
        let cv = CertificateVerify {
            scheme: SignatureScheme::ED25519,
            signature: vec![0; u16::MAX as usize + 1],
        };
        assert!(HandshakeMessage::from_body(HandshakeBody::CertificateVerify(cv)).is_err());
    }

    #[test]
    fn test_from_parsed_preserves_bytes() {
        let fin = Finished {
            verify_data: vec![1, 2, 3],
        };
        let wire = vec![HandshakeType::Finished as u8, 0, 0, 3, 1, 2, 3];
        let msg = HandshakeMessage::from_parsed(HandshakeBody::Finished(fin), wire.clone());
        assert_eq!(msg.encoded(), &wire[..]);
    }
}
