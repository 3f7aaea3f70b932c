//! TLS 1.3 handshake state machine.
//!
//! Two automata (client and server) share a [`context::ConnectionContext`].
//! Each state exposes one transition: given an optional parsed handshake
//! body, produce the successor state and zero or more outbound messages, or
//! a fatal alert. See [`client::ClientState`] and [`server::ServerState`].

pub mod client;
pub mod codec;
pub mod context;
pub mod key_exchange;
pub mod negotiate;
pub mod server;
pub mod signing;
pub mod verify;


use crate::alert::Alert;
use codec::{HandshakeBody, HandshakeMessage};
use log::debug;

/// Handshake message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandshakeType {
    ClientHello = 1,
    ServerHello = 2,
    NewSessionTicket = 4,
    EndOfEarlyData = 5,
    HelloRetryRequest = 6,
    EncryptedExtensions = 8,
    Certificate = 11,
    CertificateRequest = 13,
    CertificateVerify = 15,
    Finished = 20,
    KeyUpdate = 24,
    MessageHash = 254,
}

/// Post-handshake message handling, identical for both roles: `Connected`
/// accepts KeyUpdate and NewSessionTicket (issuance and rekeying are the
/// embedder's concern) and rejects everything else.
pub(crate) fn connected_next<S>(
    connected: S,
    input: Option<HandshakeMessage>,
) -> Result<(S, Vec<HandshakeMessage>), Alert> {
    let Some(message) = input else {
        return Err(Alert::UnexpectedMessage);
    };
    match message.body() {
        HandshakeBody::KeyUpdate(_) => {
            debug!("[Connected] ignoring KeyUpdate");
            Ok((connected, Vec::new()))
        }
        HandshakeBody::NewSessionTicket(_) => {
            debug!("[Connected] ignoring NewSessionTicket");
            Ok((connected, Vec::new()))
        }
        _ => Err(Alert::UnexpectedMessage),
    }
}

#[cfg(test)]
mod type_tests {
    use super::*;

    #[test]
    fn test_handshake_type_discriminant_values() {
        // RFC 8446 §4: wire values are security-critical
        assert_eq!(HandshakeType::ClientHello as u8, 1);
        assert_eq!(HandshakeType::ServerHello as u8, 2);
        assert_eq!(HandshakeType::NewSessionTicket as u8, 4);
        assert_eq!(HandshakeType::EndOfEarlyData as u8, 5);
        assert_eq!(HandshakeType::HelloRetryRequest as u8, 6);
        assert_eq!(HandshakeType::EncryptedExtensions as u8, 8);
        assert_eq!(HandshakeType::Certificate as u8, 11);
        assert_eq!(HandshakeType::CertificateRequest as u8, 13);
        assert_eq!(HandshakeType::CertificateVerify as u8, 15);
        assert_eq!(HandshakeType::Finished as u8, 20);
        assert_eq!(HandshakeType::KeyUpdate as u8, 24);
        assert_eq!(HandshakeType::MessageHash as u8, 254);
    }
}
