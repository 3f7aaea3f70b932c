//! Transcript hash for TLS 1.3 handshake messages.
//!
//! Maintains a running hash over all handshake messages in order. Uses a
//! message buffer + replay approach: `current_hash()` hashes all buffered
//! data from scratch, so the transcript can keep being extended after an
//! intermediate hash has been taken.

use super::HashAlgorithm;

/// Running transcript hash over handshake messages.
#[derive(Debug, Clone)]
pub struct TranscriptHash {
    alg: HashAlgorithm,
    message_buffer: Vec<u8>,
}

impl TranscriptHash {
    /// Create a new TranscriptHash with the given hash algorithm.
    pub fn new(alg: HashAlgorithm) -> Self {
        Self {
            alg,
            message_buffer: Vec::new(),
        }
    }

    /// Feed handshake message data into the transcript.
    pub fn update(&mut self, data: &[u8]) {
        self.message_buffer.extend_from_slice(data);
    }

    /// Get the current transcript hash without consuming the state.
    pub fn current_hash(&self) -> Vec<u8> {
        self.alg.hash(&self.message_buffer)
    }

    /// Hash output size in bytes.
    pub fn hash_len(&self) -> usize {
        self.alg.output_size()
    }
}
