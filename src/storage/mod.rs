//! Persisted Relay State
//!
//! The sync loop owns two pieces of durable state:
//! - the height cursor: the last CKB height whose processing fully completed
//! - the header buffer: CKB headers waiting for an `update_headers` call
//!
//! Both come as in-memory stores for tests and as files for the service. The
//! cursor is a JSON document written to a sibling temp file which is synced
//! and then renamed over the target, so a crash leaves either the old or the
//! new content. The header buffer is a JSON-lines file: each append writes and
//! syncs one line, so the per-block cost does not grow with the buffer.

mod cursor;
mod headers;

pub use cursor::{CursorStore, FileCursorStore, MemoryCursorStore};
pub use headers::{FileHeaderStore, HeaderStore, MemoryHeaderStore};

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::error::{RelayError, RelayResult};

/// File name of the height cursor inside the state directory.
pub const CURSOR_FILE: &str = "cursor.json";
/// File name of the header buffer inside the state directory.
pub const HEADERS_FILE: &str = "headers.jsonl";

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

pub(crate) async fn create_parent_dir(path: &Path) -> RelayResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create state directory {}", parent.display()))
            .map_err(RelayError::Storage)?;
    }
    Ok(())
}

/// Writes `value` as JSON to `path` via temp file + fsync + rename.
pub(crate) async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> RelayResult<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .context("Failed to serialize relay state")
        .map_err(RelayError::Storage)?;

    create_parent_dir(path).await?;

    let tmp = temp_path(path);
    let write = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        tokio::fs::rename(&tmp, path).await
    };
    write
        .await
        .with_context(|| format!("Failed to write relay state to {}", path.display()))
        .map_err(RelayError::Storage)
}

/// Reads JSON from `path`, returning `None` if the file does not exist.
pub(crate) async fn read_json<T: DeserializeOwned>(path: &Path) -> RelayResult<Option<T>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(RelayError::Storage(
                anyhow::Error::new(e).context(format!("Failed to read relay state from {}", path.display())),
            ))
        }
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .with_context(|| format!("Corrupt relay state in {}", path.display()))
        .map_err(RelayError::Storage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_path_is_a_sibling() {
        let tmp = temp_path(Path::new("/var/lib/relayer/cursor.json"));
        assert_eq!(tmp, PathBuf::from("/var/lib/relayer/cursor.json.tmp"));
    }
}
