//! Per-handshake connection state shared by the automata.

use super::codec::{CertificateMsg, CertificateRequest, HandshakeMessage};
use crate::config::{AuthCertificateHook, Capabilities, Certificate, ConnectionOptions, PreSharedKey};
use crate::crypt::key_schedule::KeySchedule;
use crate::crypt::{NamedGroup, SignatureScheme};
use crate::{CipherSuite, TlsRole};
use std::collections::HashMap;
use zeroize::Zeroize;

/// Parameters negotiated during the handshake.
#[derive(Debug, Clone, Default)]
pub struct ConnectionParameters {
    pub cipher_suite: Option<CipherSuite>,
    pub server_name: Option<String>,
    pub next_proto: Option<String>,
    pub using_psk: bool,
    pub using_dh: bool,
    pub using_early_data: bool,
    pub using_client_auth: bool,
}

/// The long-lived per-handshake record. Owned by the embedder and mutated
/// only by the currently active state's transition.
///
/// Messages are retained because the key schedule hashes them at flight
/// boundaries, not per message, and because CertificateVerify signatures
/// cover transcripts the running hash has not reached yet.
pub struct ConnectionContext {
    pub role: TlsRole,
    pub caps: Capabilities,
    pub opts: ConnectionOptions,
    pub params: ConnectionParameters,
    pub key_schedule: KeySchedule,
    /// Optional certificate-chain acceptance hook. Without one the
    /// handshake proceeds and logs a warning.
    pub auth_certificate: Option<AuthCertificateHook>,

    // Client key-establishment scratch.
    pub(crate) offered_dh: HashMap<NamedGroup, Vec<u8>>,
    pub(crate) offered_psk: Option<PreSharedKey>,
    pub(crate) psk_secret: Option<Vec<u8>>,

    // Transcript slots.
    pub(crate) client_hello: Option<HandshakeMessage>,
    pub(crate) hello_retry_request: Option<HandshakeMessage>,
    pub(crate) retry_client_hello: Option<HandshakeMessage>,
    pub(crate) server_hello: Option<HandshakeMessage>,
    pub(crate) server_first_flight: Vec<HandshakeMessage>,
    pub(crate) server_finished: Option<HandshakeMessage>,
    pub(crate) server_certificate: Option<CertificateMsg>,
    pub(crate) server_certificate_request: Option<CertificateRequest>,
    pub(crate) client_second_flight: Vec<HandshakeMessage>,
    pub(crate) client_certificate: Option<CertificateMsg>,

    // Server scratch.
    pub(crate) cookie: Option<Vec<u8>>,
    pub(crate) cert: Option<Certificate>,
    pub(crate) cert_scheme: Option<SignatureScheme>,
    pub(crate) dh_group: Option<NamedGroup>,
    pub(crate) dh_public: Option<Vec<u8>>,
    pub(crate) dh_secret: Option<Vec<u8>>,
    pub(crate) selected_psk_index: Option<usize>,
}

impl Drop for ConnectionContext {
    fn drop(&mut self) {
        for (_, private_key) in self.offered_dh.iter_mut() {
            private_key.zeroize();
        }
        if let Some(secret) = self.psk_secret.as_mut() {
            secret.zeroize();
        }
        if let Some(secret) = self.dh_secret.as_mut() {
            secret.zeroize();
        }
    }
}

impl ConnectionContext {
    fn new(role: TlsRole, caps: Capabilities, opts: ConnectionOptions) -> Self {
        Self {
            role,
            caps,
            opts,
            params: ConnectionParameters::default(),
            key_schedule: KeySchedule::new(),
            auth_certificate: None,
            offered_dh: HashMap::new(),
            offered_psk: None,
            psk_secret: None,
            client_hello: None,
            hello_retry_request: None,
            retry_client_hello: None,
            server_hello: None,
            server_first_flight: Vec::new(),
            server_finished: None,
            server_certificate: None,
            server_certificate_request: None,
            client_second_flight: Vec::new(),
            client_certificate: None,
            cookie: None,
            cert: None,
            cert_scheme: None,
            dh_group: None,
            dh_public: None,
            dh_secret: None,
            selected_psk_index: None,
        }
    }

    /// Create the context for an initiated (client-role) connection.
    pub fn client(caps: Capabilities, opts: ConnectionOptions) -> Self {
        Self::new(TlsRole::Client, caps, opts)
    }

    /// Create the context for an accepted (server-role) connection.
    pub fn server(caps: Capabilities) -> Self {
        Self::new(TlsRole::Server, caps, ConnectionOptions::default())
    }

    /// Install a certificate-chain acceptance hook.
    pub fn with_auth_certificate(mut self, hook: AuthCertificateHook) -> Self {
        self.auth_certificate = Some(hook);
        self
    }

    /// The transcript's first message slots, available once a ClientHello
    /// has been recorded: `(client_hello, hello_retry_request?,
    /// retry_client_hello?)`.
    pub(crate) fn hello_transcript(
        &self,
    ) -> Option<(
        &HandshakeMessage,
        Option<&HandshakeMessage>,
        Option<&HandshakeMessage>,
    )> {
        Some((
            self.client_hello.as_ref()?,
            self.hello_retry_request.as_ref(),
            self.retry_client_hello.as_ref(),
        ))
    }

    /// Messages covered by a CertificateVerify up to the Hello exchange:
    /// `client_hello ∥ hello_retry_request? ∥ retry_client_hello? ∥
    /// server_hello`.
    pub(crate) fn hello_messages(&self) -> Vec<&HandshakeMessage> {
        let mut messages = Vec::with_capacity(4);
        if let Some(ch) = &self.client_hello {
            messages.push(ch);
        }
        if let Some(hrr) = &self.hello_retry_request {
            messages.push(hrr);
        }
        if let Some(retry) = &self.retry_client_hello {
            messages.push(retry);
        }
        if let Some(sh) = &self.server_hello {
            messages.push(sh);
        }
        messages
    }
}
