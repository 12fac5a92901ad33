//! VideoPayloadStore - In-memory Upload Holding Area
//!
//! ## Responsibilities
//!
//! - Hold uploaded video bytes until a session processes them
//! - Hand out collision-free payload ids
//! - Atomic take: a payload is consumed at most once
//!
//! There is no eviction. Every exit path of a processing pass owns the
//! payload after `take`, so nothing is left behind once processing starts.

use crate::error::{Error, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// Opaque payload identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PayloadId(String);

impl PayloadId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PayloadId {
    fn from(s: &str) -> Self {
        PayloadId(s.to_string())
    }
}

impl From<String> for PayloadId {
    fn from(s: String) -> Self {
        PayloadId(s)
    }
}

impl fmt::Display for PayloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Uploaded video bytes plus their id
#[derive(Debug)]
pub struct VideoPayload {
    pub id: PayloadId,
    pub bytes: Vec<u8>,
}

/// Store statistics
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct PayloadStats {
    /// Payloads waiting to be processed
    pub pending: usize,
    /// Total bytes held
    pub total_bytes: usize,
}

/// VideoPayloadStore instance
pub struct VideoPayloadStore {
    payloads: Mutex<HashMap<PayloadId, Vec<u8>>>,
    sequence: AtomicU64,
}

impl VideoPayloadStore {
    /// Create empty store
    pub fn new() -> Self {
        Self {
            payloads: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Store bytes and return a fresh id
    pub async fn put(&self, bytes: Vec<u8>) -> PayloadId {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let id = PayloadId(format!("upload-{}-{}", Utc::now().timestamp_millis(), seq));
        let size = bytes.len();

        {
            let mut payloads = self.payloads.lock().await;
            payloads.insert(id.clone(), bytes);
        }

        tracing::info!(payload_id = %id, size_bytes = size, "Video payload stored");
        id
    }

    /// Remove and return a payload. A second take of the same id fails.
    pub async fn take(&self, id: &PayloadId) -> Result<VideoPayload> {
        let removed = {
            let mut payloads = self.payloads.lock().await;
            payloads.remove(id)
        };

        match removed {
            Some(bytes) => {
                tracing::debug!(payload_id = %id, size_bytes = bytes.len(), "Video payload taken");
                Ok(VideoPayload {
                    id: id.clone(),
                    bytes,
                })
            }
            None => {
                tracing::warn!(payload_id = %id, "Video payload not found");
                Err(Error::PayloadNotFound(id.to_string()))
            }
        }
    }

    pub async fn stats(&self) -> PayloadStats {
        let payloads = self.payloads.lock().await;
        PayloadStats {
            pending: payloads.len(),
            total_bytes: payloads.values().map(|b| b.len()).sum(),
        }
    }
}

impl Default for VideoPayloadStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_take_returns_identical_bytes_once() {
        let store = VideoPayloadStore::new();
        let bytes: Vec<u8> = (0..=255).collect();
        let id = store.put(bytes.clone()).await;

        let payload = store.take(&id).await.unwrap();
        assert_eq!(payload.bytes, bytes);
        assert_eq!(payload.id, id);

        let second = store.take(&id).await;
        assert!(matches!(second, Err(Error::PayloadNotFound(_))));
    }

    #[tokio::test]
    async fn test_unknown_id_not_found() {
        let store = VideoPayloadStore::new();
        let result = store.take(&PayloadId::from("temp_123.mp4")).await;
        assert!(matches!(result, Err(Error::PayloadNotFound(_))));
    }

    #[tokio::test]
    async fn test_ids_unique() {
        let store = VideoPayloadStore::new();
        let mut ids = HashSet::new();
        for _ in 0..100 {
            assert!(ids.insert(store.put(vec![1]).await));
        }
        assert_eq!(store.stats().await.pending, 100);
    }

    #[tokio::test]
    async fn test_racing_takes_single_winner() {
        let store = Arc::new(VideoPayloadStore::new());
        let id = store.put(vec![7; 32]).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move { store.take(&id).await.is_ok() }));
        }

        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert!(store.take(&id).await.is_err());
    }

    #[tokio::test]
    async fn test_stats_track_pending() {
        let store = VideoPayloadStore::new();
        let a = store.put(vec![0; 10]).await;
        let _b = store.put(vec![0; 5]).await;

        let stats = store.stats().await;
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.total_bytes, 15);

        store.take(&a).await.unwrap();
        let stats = store.stats().await;
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.total_bytes, 5);
    }
}
