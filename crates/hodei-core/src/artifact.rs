//! Content-addressed blobs transferred between orchestrator and worker.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    Raw,
    Gzip,
}

/// `{artifactId, checksum (SHA-256), sizeBytes, encoding}` per spec.md §3.
/// Workers cache by `artifact_id` and validate `checksum` after assembly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub artifact_id: String,
    pub checksum: String,
    pub size_bytes: u64,
    pub encoding: Encoding,
}

/// Manifest entry for a worker-local artifact cache (spec.md §6 persisted
/// state layout: `artifact_cache`), used for LRU-style eviction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub artifact: Artifact,
    pub last_used_at: DateTime<Utc>,
}

/// Policy controlling eviction of cached artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub max_age: Option<std::time::Duration>,
    pub max_total_bytes: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PruneStats {
    pub artifacts_deleted: u64,
    pub bytes_freed: u64,
}

/// Content-addressed blob storage, implemented both on the orchestrator side
/// (the source of truth for artifacts produced by completed stages) and on
/// the worker side (the local cache described in spec.md §6).
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Stores `data`, returning the computed `Artifact` descriptor
    /// (`artifact_id` is the hex SHA-256 of the decompressed content).
    async fn put(&self, data: Bytes) -> Result<Artifact>;

    async fn get(&self, artifact_id: &str) -> Result<Bytes>;

    async fn stream(
        &self,
        artifact_id: &str,
    ) -> Result<BoxStream<'static, std::result::Result<Bytes, std::io::Error>>>;

    async fn contains(&self, artifact_id: &str) -> Result<bool>;

    async fn list(&self) -> Result<Vec<CacheEntry>>;

    async fn delete(&self, artifact_id: &str) -> Result<()>;

    async fn prune(&self, policy: RetentionPolicy) -> Result<PruneStats>;
}

/// Computes the canonical `artifact_id`/`checksum` (SHA-256 over the
/// decompressed content, per spec.md §6) for a blob.
pub fn checksum(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Maximum size of one `Artifact` wire chunk (spec.md §6: "chunks ≤ 64 KiB").
pub const MAX_CHUNK_BYTES: usize = 64 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_stable_and_content_addressed() {
        let a = checksum(b"hello");
        let b = checksum(b"hello");
        let c = checksum(b"world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
