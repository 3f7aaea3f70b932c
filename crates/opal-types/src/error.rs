/// TLS handshake errors.
///
/// These are internal failures; protocol-visible outcomes are expressed as
/// alerts by the state machine, which maps any of these to `internal_error`
/// before surfacing them to the peer.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("key schedule: {0} called in wrong phase")]
    KeySchedulePhase(&'static str),
    #[error("encoding overflow: {0}")]
    EncodeOverflow(&'static str),
    #[error("unsupported cipher suite")]
    UnsupportedCipherSuite,
    #[error("unsupported named group")]
    UnsupportedGroup,
    #[error("unsupported signature scheme")]
    UnsupportedSignatureScheme,
    #[error("signature verification failed")]
    SignatureVerifyFailed,
    #[error("failed to read entropy")]
    EntropyFailure,
    #[error("crypto backend failure: {0}")]
    CryptoFailure(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            TlsError::HandshakeFailed("bad finished".into()).to_string(),
            "handshake failed: bad finished"
        );
        assert_eq!(
            TlsError::KeySchedulePhase("init").to_string(),
            "key schedule: init called in wrong phase"
        );
        assert_eq!(
            TlsError::EncodeOverflow("client hello").to_string(),
            "encoding overflow: client hello"
        );
        assert_eq!(
            TlsError::UnsupportedCipherSuite.to_string(),
            "unsupported cipher suite"
        );
        assert_eq!(
            TlsError::SignatureVerifyFailed.to_string(),
            "signature verification failed"
        );
        assert_eq!(
            TlsError::EntropyFailure.to_string(),
            "failed to read entropy"
        );
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TlsError>();
    }
}
