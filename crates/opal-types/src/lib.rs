#![forbid(unsafe_code)]
#![doc = "Shared type and error definitions for the opal TLS handshake crates."]

pub mod error;

pub use error::TlsError;
