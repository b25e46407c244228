//! Worker-side artifact cache: reassembles chunked transfers and serves
//! cache-hit checks back to the orchestrator (spec.md §6 `CacheQuery`/
//! `CacheQueryResponse`).

use std::collections::HashMap;

use bytes::Bytes;
use hodei_protocol::chunk::{verify, Reassembler};
use tokio::sync::Mutex;

#[derive(Default)]
pub struct ArtifactCache {
    complete: Mutex<HashMap<String, Bytes>>,
    in_flight: Mutex<HashMap<String, Reassembler>>,
}

impl ArtifactCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, artifact_id: &str) -> bool {
        self.complete.lock().await.contains_key(artifact_id)
    }

    pub async fn get(&self, artifact_id: &str) -> Option<Bytes> {
        self.complete.lock().await.get(artifact_id).cloned()
    }

    /// Feeds one chunk of an artifact transfer. `artifact_id` is the hex
    /// SHA-256 of the decompressed content (spec.md §3), so it doubles as
    /// the expected checksum once the final chunk arrives.
    pub async fn feed(
        &self,
        artifact_id: &str,
        chunk_index: u32,
        is_last: bool,
        bytes: &[u8],
    ) -> anyhow::Result<Option<Bytes>> {
        let assembled = {
            let mut in_flight = self.in_flight.lock().await;
            let reassembler = in_flight.entry(artifact_id.to_string()).or_default();
            reassembler.feed(chunk_index, is_last, bytes)?
        };

        let Some(data) = assembled else {
            return Ok(None);
        };

        self.in_flight.lock().await.remove(artifact_id);
        verify(&data, artifact_id)?;
        let bytes = Bytes::from(data);
        self.complete.lock().await.insert(artifact_id.to_string(), bytes.clone());
        Ok(Some(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hodei_core::artifact::checksum;

    #[tokio::test]
    async fn single_chunk_round_trips_and_caches() {
        let cache = ArtifactCache::new();
        let data = b"hello world".to_vec();
        let sum = checksum(&data);
        let result = cache.feed(&sum, 0, true, &data).await.unwrap();
        assert_eq!(result.unwrap().as_ref(), data.as_slice());
        assert!(cache.contains(&sum).await);
    }

    #[tokio::test]
    async fn checksum_mismatch_is_rejected() {
        let cache = ArtifactCache::new();
        let data = b"hello".to_vec();
        let result = cache.feed("deadbeef", 0, true, &data).await;
        assert!(result.is_err());
        assert!(!cache.contains("deadbeef").await);
    }
}
