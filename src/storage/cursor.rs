//! Height Cursor Store

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{read_json, write_json_atomic};
use crate::error::{RelayError, RelayResult};

/// Durable watermark of the last fully processed CKB height.
///
/// Implementations refuse to move the cursor backwards; saving the current
/// value again is a no-op.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// The persisted height, or `None` before the first block completes.
    async fn load(&self) -> RelayResult<Option<u64>>;

    /// Persists `height`. Returns only once the value is durable.
    async fn save(&self, height: u64) -> RelayResult<()>;
}

#[async_trait]
impl<T: CursorStore + ?Sized> CursorStore for Arc<T> {
    async fn load(&self) -> RelayResult<Option<u64>> {
        (**self).load().await
    }

    async fn save(&self, height: u64) -> RelayResult<()> {
        (**self).save(height).await
    }
}

fn check_forward(current: Option<u64>, height: u64) -> RelayResult<()> {
    match current {
        Some(current) if height < current => Err(RelayError::Storage(anyhow::anyhow!(
            "refusing to move height cursor backwards from {} to {}",
            current,
            height
        ))),
        _ => Ok(()),
    }
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    height: RwLock<Option<u64>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_height(height: u64) -> Self {
        Self {
            height: RwLock::new(Some(height)),
        }
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self) -> RelayResult<Option<u64>> {
        Ok(*self.height.read().await)
    }

    async fn save(&self, height: u64) -> RelayResult<()> {
        let mut current = self.height.write().await;
        check_forward(*current, height)?;
        *current = Some(height);
        Ok(())
    }
}

// ============================================================================
// FILE STORE
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct CursorFile {
    height: u64,
}

/// Cursor persisted as `{"height": n}`.
#[derive(Debug)]
pub struct FileCursorStore {
    path: PathBuf,
    /// Serializes writers and caches the last durable value
    current: RwLock<Option<u64>>,
}

impl FileCursorStore {
    /// Opens the cursor file, reading the persisted height if present.
    pub async fn open(path: impl AsRef<Path>) -> RelayResult<Self> {
        let path = path.as_ref().to_path_buf();
        let current = read_json::<CursorFile>(&path).await?.map(|f| f.height);
        Ok(Self {
            path,
            current: RwLock::new(current),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CursorStore for FileCursorStore {
    async fn load(&self) -> RelayResult<Option<u64>> {
        Ok(*self.current.read().await)
    }

    async fn save(&self, height: u64) -> RelayResult<()> {
        let mut current = self.current.write().await;
        check_forward(*current, height)?;
        if *current == Some(height) {
            return Ok(());
        }
        write_json_atomic(&self.path, &CursorFile { height }).await?;
        *current = Some(height);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_cursor_refuses_regression() {
        let store = MemoryCursorStore::new();
        assert_eq!(store.load().await.unwrap(), None);

        store.save(5).await.unwrap();
        store.save(5).await.unwrap();
        assert!(matches!(store.save(4).await, Err(RelayError::Storage(_))));
        assert_eq!(store.load().await.unwrap(), Some(5));
    }
}
