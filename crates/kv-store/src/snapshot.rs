//! Store snapshot persistence using JSON file storage

use crate::error::StoreError;
use crate::types::KeyValue;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

/// On-disk image of the non-leased part of a store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    /// Store revision at the time of the snapshot
    pub revision: i64,
    pub entries: Vec<KeyValue>,
}

/// Load a snapshot from a JSON file
///
/// A missing file yields an empty snapshot. A file that exists but does not
/// parse is an error: starting empty would overwrite it on the next write.
pub async fn load_snapshot(path: &Path) -> Result<Snapshot, StoreError> {
    match fs::read_to_string(path).await {
        Ok(contents) => {
            let snapshot = serde_json::from_str::<Snapshot>(&contents)?;
            tracing::info!(
                "Loaded {} keys (revision {}) from {:?}",
                snapshot.entries.len(),
                snapshot.revision,
                path
            );
            Ok(snapshot)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No store snapshot found at {:?}, starting fresh", path);
            Ok(Snapshot::default())
        }
        Err(e) => Err(e.into()),
    }
}

/// Save a snapshot to a JSON file atomically
pub async fn save_snapshot(path: &Path, snapshot: &Snapshot) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let json = serde_json::to_string_pretty(snapshot)?;

    // Write to temp file, then rename
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, &json).await?;
    fs::rename(&tmp_path, path).await?;

    tracing::debug!("Saved {} keys to {:?}", snapshot.entries.len(), path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = load_snapshot(&dir.path().join("store.json")).await.unwrap();
        assert_eq!(snapshot.revision, 0);
        assert!(snapshot.entries.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "{ not json").await.unwrap();
        assert!(matches!(
            load_snapshot(&path).await,
            Err(StoreError::Json(_))
        ));
    }
}
