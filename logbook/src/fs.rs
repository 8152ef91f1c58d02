//! The filesystem capability books are persisted through.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;

/// Blob storage for encrypted book blobs.
///
/// `put` returns the location of the stored content, which may differ from
/// the requested one: content-addressed stores derive the location from the
/// data. Callers must adopt the returned location.
#[async_trait]
pub trait Filesystem: Send + Sync + 'static {
    /// Store `data` at (or near) `location`, returning the actual location.
    async fn put(&self, location: &str, data: Bytes) -> Result<String>;
    /// Fetch the content at `location`. `None` when nothing is stored there.
    async fn get(&self, location: &str) -> Result<Option<Bytes>>;
}

/// In-memory [`Filesystem`], keyed by location.
#[derive(Debug, Clone, Default)]
pub struct MemFs {
    blobs: Arc<Mutex<HashMap<String, Bytes>>>,
}

impl MemFs {
    /// Create an empty in-memory filesystem.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Filesystem for MemFs {
    async fn put(&self, location: &str, data: Bytes) -> Result<String> {
        self.blobs.lock().await.insert(location.to_string(), data);
        Ok(location.to_string())
    }

    async fn get(&self, location: &str) -> Result<Option<Bytes>> {
        Ok(self.blobs.lock().await.get(location).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get() -> Result<()> {
        let fs = MemFs::new();
        assert!(fs.get("/mem/book").await?.is_none());
        let location = fs.put("/mem/book", Bytes::from_static(b"data")).await?;
        assert_eq!(location, "/mem/book");
        assert_eq!(fs.get(&location).await?.unwrap().as_ref(), b"data");
        Ok(())
    }
}
