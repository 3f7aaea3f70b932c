//! Static handshake policy and per-connection options.
//!
//! `Capabilities` is the endpoint's immutable policy (supported algorithms,
//! key material, feature flags); `ConnectionOptions` carries the inputs that
//! vary per connection. Both are read-only to the state machine.

use crate::crypt::{NamedGroup, PskKeyExchangeMode, SignatureScheme};
use crate::CipherSuite;
use opal_types::TlsError;
use std::collections::HashMap;
use std::fmt;
use zeroize::Zeroize;

/// A certificate's public key, already parsed from its SPKI by the embedder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKey {
    /// Ed25519 public key (32 bytes).
    Ed25519([u8; 32]),
    /// ECDSA P-256 public key, SEC1 uncompressed point.
    EcdsaP256(Vec<u8>),
}

/// A signing private key.
#[derive(Clone)]
pub enum PrivateKey {
    /// Ed25519 seed (32 bytes).
    Ed25519([u8; 32]),
    /// ECDSA P-256 scalar (32 bytes).
    EcdsaP256(Vec<u8>),
}

impl Drop for PrivateKey {
    fn drop(&mut self) {
        match self {
            PrivateKey::Ed25519(seed) => seed.zeroize(),
            PrivateKey::EcdsaP256(scalar) => scalar.zeroize(),
        }
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrivateKey::Ed25519(_) => f.write_str("PrivateKey::Ed25519(..)"),
            PrivateKey::EcdsaP256(_) => f.write_str("PrivateKey::EcdsaP256(..)"),
        }
    }
}

/// One element of a certificate chain.
///
/// `der` is the encoded certificate as it appears on the wire; `public_key`
/// and `subject_name` are its parsed companions and must agree with it
/// (X.509 parsing is the embedder's job).
#[derive(Debug, Clone)]
pub struct CertificateData {
    pub der: Vec<u8>,
    pub subject_name: String,
    pub public_key: PublicKey,
}

/// A certificate chain (leaf first) together with the leaf's private key.
#[derive(Debug, Clone)]
pub struct Certificate {
    pub chain: Vec<CertificateData>,
    pub private_key: PrivateKey,
}

impl Certificate {
    /// The end-entity certificate.
    pub fn leaf(&self) -> Option<&CertificateData> {
        self.chain.first()
    }
}

/// A pre-shared key, external or resumption-derived.
#[derive(Clone)]
pub struct PreSharedKey {
    /// The PSK identity presented in the `pre_shared_key` extension.
    pub identity: Vec<u8>,
    /// The raw key.
    pub key: Vec<u8>,
    /// The cipher suite this PSK was provisioned for; its hash constrains
    /// the suites negotiable alongside the PSK.
    pub cipher_suite: CipherSuite,
    /// The application protocol bound to this PSK, if any.
    pub next_proto: Option<String>,
    /// Selects the binder label: `ext binder` for external PSKs,
    /// `res binder` for resumption PSKs.
    pub external: bool,
}

impl Drop for PreSharedKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl fmt::Debug for PreSharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreSharedKey")
            .field("identity", &self.identity)
            .field("cipher_suite", &self.cipher_suite)
            .field("next_proto", &self.next_proto)
            .field("external", &self.external)
            .finish_non_exhaustive()
    }
}

/// In-memory PSK store, keyed by opaque bytes.
///
/// Clients look keys up by server name, servers by PSK identity; the
/// embedder inserts entries under whichever keys it wants resolvable.
#[derive(Debug, Clone, Default)]
pub struct PskStore {
    entries: HashMap<Vec<u8>, PreSharedKey>,
}

impl PskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a PSK under `key`, replacing any existing entry.
    pub fn insert(&mut self, key: impl Into<Vec<u8>>, psk: PreSharedKey) {
        self.entries.insert(key.into(), psk);
    }

    /// Look up a PSK.
    pub fn get(&self, key: &[u8]) -> Option<&PreSharedKey> {
        self.entries.get(key)
    }
}

/// Certificate-chain acceptance hook.
///
/// Invoked with the received chain after the CertificateVerify signature has
/// been checked; rejection terminates the handshake with `bad_certificate`.
pub type AuthCertificateHook =
    Box<dyn Fn(&[CertificateData]) -> Result<(), TlsError> + Send + Sync>;

/// Static endpoint policy.
#[derive(Debug, Clone)]
pub struct Capabilities {
    /// Supported DH groups, in preference order.
    pub groups: Vec<NamedGroup>,
    /// Supported cipher suites, in preference order.
    pub cipher_suites: Vec<CipherSuite>,
    /// Accepted signature schemes.
    pub signature_schemes: Vec<SignatureScheme>,
    /// Accepted PSK key exchange modes.
    pub psk_modes: Vec<PskKeyExchangeMode>,
    /// Pre-shared keys.
    pub psks: PskStore,
    /// Certificates this endpoint can authenticate with.
    pub certificates: Vec<Certificate>,
    /// Application protocols the server is willing to select.
    pub next_protos: Vec<String>,
    /// Server: accept 0-RTT early data when otherwise eligible.
    pub allow_early_data: bool,
    /// Server: demand a cookie round trip before negotiating.
    pub require_cookie: bool,
    /// Server: demand a client certificate.
    pub require_client_auth: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            groups: vec![NamedGroup::X25519, NamedGroup::SECP256R1],
            cipher_suites: vec![
                CipherSuite::TLS_AES_128_GCM_SHA256,
                CipherSuite::TLS_AES_256_GCM_SHA384,
            ],
            signature_schemes: vec![
                SignatureScheme::ED25519,
                SignatureScheme::ECDSA_SECP256R1_SHA256,
            ],
            psk_modes: vec![PskKeyExchangeMode::PskDheKe, PskKeyExchangeMode::PskKe],
            psks: PskStore::new(),
            certificates: Vec::new(),
            next_protos: Vec::new(),
            allow_early_data: false,
            require_cookie: false,
            require_client_auth: false,
        }
    }
}

/// Per-connection inputs.
#[derive(Debug, Clone, Default)]
pub struct ConnectionOptions {
    /// Name of the server the client intends to reach (SNI).
    pub server_name: Option<String>,
    /// Application protocols the client offers via ALPN.
    pub next_protos: Vec<String>,
    /// 0-RTT payload the client wants to send; non-empty means early data
    /// is offered (requires a PSK).
    pub early_data: Vec<u8>,
}
