//! Chunked artifact transfer (spec.md §6): splitting a blob into
//! `Artifact` wire messages on the send side, and reassembling + verifying
//! them on the receive side.

use hodei_core::artifact::{checksum, Encoding, MAX_CHUNK_BYTES};

use crate::messages::OrchestratorMessage;

/// Splits `data` into a sequence of `Artifact` messages, each carrying at
/// most `MAX_CHUNK_BYTES` bytes, with `is_last` set on the final chunk. An
/// empty payload still produces exactly one (empty, `is_last`) chunk so the
/// receiver always gets a terminal message to assemble against.
pub fn split_into_chunks(artifact_id: &str, data: &[u8], encoding: Encoding) -> Vec<OrchestratorMessage> {
    if data.is_empty() {
        return vec![OrchestratorMessage::Artifact {
            artifact_id: artifact_id.to_string(),
            chunk_index: 0,
            is_last: true,
            bytes: Vec::new(),
            encoding,
        }];
    }

    let chunks: Vec<&[u8]> = data.chunks(MAX_CHUNK_BYTES).collect();
    let last = chunks.len() - 1;
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| OrchestratorMessage::Artifact {
            artifact_id: artifact_id.to_string(),
            chunk_index: i as u32,
            is_last: i == last,
            bytes: chunk.to_vec(),
            encoding,
        })
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ReassemblyError {
    #[error("chunk {got} received out of order, expected {expected}")]
    OutOfOrder { expected: u32, got: u32 },
    #[error("checksum mismatch: expected {expected}, computed {computed}")]
    ChecksumMismatch { expected: String, computed: String },
}

/// Accumulates chunks for one in-flight artifact transfer on the worker
/// side and validates the SHA-256 checksum once the final chunk arrives
/// (P6: artifact round-trip).
#[derive(Debug, Default)]
pub struct Reassembler {
    buffer: Vec<u8>,
    next_index: u32,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk. Returns `Some(bytes)` once `is_last` is received and
    /// the assembled content is returned to the caller for checksum
    /// verification via [`verify`].
    pub fn feed(
        &mut self,
        chunk_index: u32,
        is_last: bool,
        bytes: &[u8],
    ) -> Result<Option<Vec<u8>>, ReassemblyError> {
        if chunk_index != self.next_index {
            return Err(ReassemblyError::OutOfOrder {
                expected: self.next_index,
                got: chunk_index,
            });
        }
        self.buffer.extend_from_slice(bytes);
        self.next_index += 1;
        if is_last {
            Ok(Some(std::mem::take(&mut self.buffer)))
        } else {
            Ok(None)
        }
    }
}

/// Verifies reassembled content against the declared checksum.
pub fn verify(data: &[u8], expected_checksum: &str) -> Result<(), ReassemblyError> {
    let computed = checksum(data);
    if computed != expected_checksum {
        return Err(ReassemblyError::ChecksumMismatch {
            expected: expected_checksum.to_string(),
            computed,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_multi_chunk_artifact() {
        let data = vec![7u8; MAX_CHUNK_BYTES * 2 + 100];
        let expected = checksum(&data);
        let chunks = split_into_chunks("a1", &data, Encoding::Raw);
        assert_eq!(chunks.len(), 3);

        let mut reassembler = Reassembler::new();
        let mut result = None;
        for msg in chunks {
            if let OrchestratorMessage::Artifact {
                chunk_index,
                is_last,
                bytes,
                ..
            } = msg
            {
                result = reassembler.feed(chunk_index, is_last, &bytes).unwrap();
            }
        }
        let assembled = result.expect("last chunk should yield the assembled buffer");
        assert_eq!(assembled, data);
        verify(&assembled, &expected).unwrap();
    }

    #[test]
    fn empty_artifact_produces_one_terminal_chunk() {
        let chunks = split_into_chunks("empty", &[], Encoding::Raw);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn checksum_mismatch_is_detected() {
        let data = b"hello".to_vec();
        assert!(verify(&data, "deadbeef").is_err());
    }

    #[test]
    fn out_of_order_chunk_is_rejected() {
        let mut reassembler = Reassembler::new();
        assert!(reassembler.feed(1, false, b"x").is_err());
    }
}
