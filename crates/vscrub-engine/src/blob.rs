//! Artifact blob storage.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{EngineError, EngineResult};

/// Key-value blob storage. `put` overwrites.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, ttl: Option<Duration>) -> EngineResult<()>;

    async fn get(&self, key: &str) -> EngineResult<Vec<u8>>;

    async fn delete(&self, key: &str) -> EngineResult<()>;
}

struct StoredBlob {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

/// Process-local blob store.
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<String, StoredBlob>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.get(key).await.is_ok()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, ttl: Option<Duration>) -> EngineResult<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.blobs
            .write()
            .await
            .insert(key.to_string(), StoredBlob { bytes, expires_at });
        Ok(())
    }

    async fn get(&self, key: &str) -> EngineResult<Vec<u8>> {
        let blobs = self.blobs.read().await;
        match blobs.get(key) {
            Some(blob) if blob.expires_at.map_or(true, |at| Instant::now() < at) => {
                Ok(blob.bytes.clone())
            }
            _ => Err(EngineError::NotFound(key.to_string())),
        }
    }

    async fn delete(&self, key: &str) -> EngineResult<()> {
        self.blobs.write().await.remove(key);
        Ok(())
    }
}

/// Blob store on Redis strings, for deployments that keep artifacts short-lived.
pub struct RedisBlobStore {
    client: redis::Client,
    prefix: String,
}

impl RedisBlobStore {
    pub fn new(redis_url: &str, prefix: impl Into<String>) -> EngineResult<Self> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            prefix: prefix.into(),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> EngineResult<Self> {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let prefix = std::env::var("BLOB_KEY_PREFIX").unwrap_or_else(|_| "vscrub:blob".to_string());
        Self::new(&redis_url, prefix)
    }

    fn blob_key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }

    async fn connection(&self) -> EngineResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl BlobStore for RedisBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, ttl: Option<Duration>) -> EngineResult<()> {
        let mut conn = self.connection().await?;
        let size = bytes.len();
        match ttl {
            Some(ttl) => {
                conn.set_ex::<_, _, ()>(self.blob_key(key), bytes, ttl.as_secs().max(1))
                    .await?
            }
            None => conn.set::<_, _, ()>(self.blob_key(key), bytes).await?,
        }
        debug!(key, size, "Stored blob");
        Ok(())
    }

    async fn get(&self, key: &str) -> EngineResult<Vec<u8>> {
        let mut conn = self.connection().await?;
        let bytes: Option<Vec<u8>> = conn.get(self.blob_key(key)).await?;
        bytes.ok_or_else(|| EngineError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> EngineResult<()> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(self.blob_key(key)).await?;
        Ok(())
    }
}
