//! TLS alert codes surfaced by the handshake state machine.
//!
//! The automata return `Err(Alert)` from a transition to terminate the
//! handshake; the caller encodes the alert and closes the record layer.
//! `NoAlert` exists to name the success value and is never produced by a
//! transition.

/// Alert description codes (RFC 8446 Section 6), restricted to the set the
/// handshake machine can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Alert {
    UnexpectedMessage = 10,
    HandshakeFailure = 40,
    BadCertificate = 42,
    IllegalParameter = 47,
    AccessDenied = 49,
    DecodeError = 50,
    ProtocolVersion = 70,
    InternalError = 80,
    MissingExtension = 109,
    NoApplicationProtocol = 120,
    /// Not a wire value; names the "no alert" success outcome.
    NoAlert = 255,
}

impl Alert {
    /// Convert from a wire code to an Alert.
    pub fn from_u8(v: u8) -> Result<Self, u8> {
        match v {
            10 => Ok(Alert::UnexpectedMessage),
            40 => Ok(Alert::HandshakeFailure),
            42 => Ok(Alert::BadCertificate),
            47 => Ok(Alert::IllegalParameter),
            49 => Ok(Alert::AccessDenied),
            50 => Ok(Alert::DecodeError),
            70 => Ok(Alert::ProtocolVersion),
            80 => Ok(Alert::InternalError),
            109 => Ok(Alert::MissingExtension),
            120 => Ok(Alert::NoApplicationProtocol),
            _ => Err(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_code_points() {
        // RFC 8446 §6: wire values are security-critical
        assert_eq!(Alert::UnexpectedMessage as u8, 10);
        assert_eq!(Alert::HandshakeFailure as u8, 40);
        assert_eq!(Alert::BadCertificate as u8, 42);
        assert_eq!(Alert::IllegalParameter as u8, 47);
        assert_eq!(Alert::AccessDenied as u8, 49);
        assert_eq!(Alert::DecodeError as u8, 50);
        assert_eq!(Alert::ProtocolVersion as u8, 70);
        assert_eq!(Alert::InternalError as u8, 80);
        assert_eq!(Alert::MissingExtension as u8, 109);
        assert_eq!(Alert::NoApplicationProtocol as u8, 120);
    }

    #[test]
    fn test_alert_from_u8_roundtrip() {
        let codes: &[u8] = &[10, 40, 42, 47, 49, 50, 70, 80, 109, 120];
        for &code in codes {
            let alert = Alert::from_u8(code).unwrap();
            assert_eq!(alert as u8, code);
        }
    }

    #[test]
    fn test_alert_from_u8_unknown() {
        assert!(Alert::from_u8(0).is_err());
        assert!(Alert::from_u8(20).is_err());
        // NoAlert is not a wire value and must not round-trip
        assert!(Alert::from_u8(255).is_err());
    }
}
