//! Header Buffer Store

use anyhow::Context;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::warn;

use super::create_parent_dir;
use crate::ckb_client::BlockHeader;
use crate::error::{RelayError, RelayResult};

/// Ordered queue of CKB headers awaiting `update_headers`.
/// Append-only until cleared.
#[async_trait]
pub trait HeaderStore: Send + Sync {
    async fn append(&self, header: BlockHeader) -> RelayResult<()>;

    /// Buffered headers, oldest first.
    async fn read_all(&self) -> RelayResult<Vec<BlockHeader>>;

    /// Number of the most recently appended header.
    async fn last_number(&self) -> RelayResult<Option<u64>>;

    async fn len(&self) -> RelayResult<usize>;

    async fn clear(&self) -> RelayResult<()>;
}

#[async_trait]
impl<T: HeaderStore + ?Sized> HeaderStore for Arc<T> {
    async fn append(&self, header: BlockHeader) -> RelayResult<()> {
        (**self).append(header).await
    }

    async fn read_all(&self) -> RelayResult<Vec<BlockHeader>> {
        (**self).read_all().await
    }

    async fn last_number(&self) -> RelayResult<Option<u64>> {
        (**self).last_number().await
    }

    async fn len(&self) -> RelayResult<usize> {
        (**self).len().await
    }

    async fn clear(&self) -> RelayResult<()> {
        (**self).clear().await
    }
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryHeaderStore {
    headers: RwLock<Vec<BlockHeader>>,
}

impl MemoryHeaderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HeaderStore for MemoryHeaderStore {
    async fn append(&self, header: BlockHeader) -> RelayResult<()> {
        self.headers.write().await.push(header);
        Ok(())
    }

    async fn read_all(&self) -> RelayResult<Vec<BlockHeader>> {
        Ok(self.headers.read().await.clone())
    }

    async fn last_number(&self) -> RelayResult<Option<u64>> {
        Ok(self.headers.read().await.last().map(|h| h.number))
    }

    async fn len(&self) -> RelayResult<usize> {
        Ok(self.headers.read().await.len())
    }

    async fn clear(&self) -> RelayResult<()> {
        self.headers.write().await.clear();
        Ok(())
    }
}

// ============================================================================
// FILE STORE
// ============================================================================

/// Header buffer persisted as JSON lines, one header per line, and mirrored in
/// memory for reads. `append` writes and syncs a single line; `clear`
/// truncates the file.
#[derive(Debug)]
pub struct FileHeaderStore {
    path: PathBuf,
    headers: RwLock<Vec<BlockHeader>>,
}

impl FileHeaderStore {
    /// Opens the buffer file, loading previously buffered headers if present.
    ///
    /// A final line without its newline is the remnant of an interrupted
    /// append; it is dropped and cut from the file. Any other unparseable
    /// line is a storage error.
    pub async fn open(path: impl AsRef<Path>) -> RelayResult<Self> {
        let path = path.as_ref().to_path_buf();

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(RelayError::Storage(
                    anyhow::Error::new(e).context(format!("Failed to read header buffer {}", path.display())),
                ))
            }
        };

        let (headers, complete_len) = parse_records(&path, &bytes)?;
        if complete_len < bytes.len() {
            warn!(
                "Dropping {} byte(s) of an interrupted append at the end of {}",
                bytes.len() - complete_len,
                path.display()
            );
            truncate_to(&path, complete_len as u64).await?;
        }

        Ok(Self {
            path,
            headers: RwLock::new(headers),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Parses newline-terminated records, returning them with the byte length
/// they cover.
fn parse_records(path: &Path, bytes: &[u8]) -> RelayResult<(Vec<BlockHeader>, usize)> {
    let mut headers = Vec::new();
    let mut complete_len = 0;

    for (index, line) in bytes.split_inclusive(|b| *b == b'\n').enumerate() {
        let Some(record) = line.strip_suffix(b"\n") else {
            break;
        };
        if !record.iter().all(u8::is_ascii_whitespace) {
            let header = serde_json::from_slice(record)
                .with_context(|| format!("Corrupt header record on line {} of {}", index + 1, path.display()))
                .map_err(RelayError::Storage)?;
            headers.push(header);
        }
        complete_len += line.len();
    }

    Ok((headers, complete_len))
}

async fn truncate_to(path: &Path, len: u64) -> RelayResult<()> {
    let truncate = async {
        let file = OpenOptions::new().write(true).open(path).await?;
        file.set_len(len).await?;
        file.sync_all().await
    };
    truncate
        .await
        .with_context(|| format!("Failed to truncate header buffer {}", path.display()))
        .map_err(RelayError::Storage)
}

/// Appends one record, cutting the file back to its previous length if the
/// write does not complete.
async fn append_record(path: &Path, record: &[u8]) -> RelayResult<()> {
    create_parent_dir(path).await?;

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to open header buffer {}", path.display()))
        .map_err(RelayError::Storage)?;
    let previous_len = file
        .metadata()
        .await
        .with_context(|| format!("Failed to stat header buffer {}", path.display()))
        .map_err(RelayError::Storage)?
        .len();

    let write = async {
        file.write_all(record).await?;
        file.sync_data().await
    };
    if let Err(e) = write.await {
        if let Err(truncate) = file.set_len(previous_len).await {
            warn!("Failed to roll back partial append to {}: {}", path.display(), truncate);
        }
        return Err(RelayError::Storage(
            anyhow::Error::new(e).context(format!("Failed to append to header buffer {}", path.display())),
        ));
    }
    Ok(())
}

#[async_trait]
impl HeaderStore for FileHeaderStore {
    async fn append(&self, header: BlockHeader) -> RelayResult<()> {
        let mut record = serde_json::to_vec(&header)
            .context("Failed to serialize block header")
            .map_err(RelayError::Storage)?;
        record.push(b'\n');

        let mut headers = self.headers.write().await;
        append_record(&self.path, &record).await?;
        headers.push(header);
        Ok(())
    }

    async fn read_all(&self) -> RelayResult<Vec<BlockHeader>> {
        Ok(self.headers.read().await.clone())
    }

    async fn last_number(&self) -> RelayResult<Option<u64>> {
        Ok(self.headers.read().await.last().map(|h| h.number))
    }

    async fn len(&self) -> RelayResult<usize> {
        Ok(self.headers.read().await.len())
    }

    async fn clear(&self) -> RelayResult<()> {
        let mut headers = self.headers.write().await;
        create_parent_dir(&self.path).await?;
        let truncate = async {
            let file = tokio::fs::File::create(&self.path).await?;
            file.sync_all().await
        };
        truncate
            .await
            .with_context(|| format!("Failed to clear header buffer {}", self.path.display()))
            .map_err(RelayError::Storage)?;
        headers.clear();
        Ok(())
    }
}
