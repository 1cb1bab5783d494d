//! Seed definitions loaded from JSON files in the data directory

use crate::error::AutomationError;
use presence_core::{BleDevice, Person};
use serde::de::DeserializeOwned;
use std::path::Path;
use tokio::fs;

/// BLE device definitions
pub const BLE_DEVICES_FILE: &str = "ble_devices.json";
/// Person groups
pub const PEOPLE_FILE: &str = "people.json";

/// Load a JSON array from `path`
///
/// A missing file yields an empty list; a file that does not parse is an
/// error.
async fn load_seed<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, AutomationError> {
    match fs::read_to_string(path).await {
        Ok(contents) => {
            let items = serde_json::from_str::<Vec<T>>(&contents)?;
            tracing::info!("Loaded {} seed records from {:?}", items.len(), path);
            Ok(items)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No seed file found at {:?}", path);
            Ok(Vec::new())
        }
        Err(e) => Err(e.into()),
    }
}

/// Load BLE device definitions from the data directory
pub async fn load_ble_devices(data_dir: &Path) -> Result<Vec<BleDevice>, AutomationError> {
    load_seed(&data_dir.join(BLE_DEVICES_FILE)).await
}

/// Load person groups from the data directory
pub async fn load_people(data_dir: &Path) -> Result<Vec<Person>, AutomationError> {
    load_seed(&data_dir.join(PEOPLE_FILE)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_files_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_ble_devices(dir.path()).await.unwrap().is_empty());
        assert!(load_people(dir.path()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_ble_devices() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(BLE_DEVICES_FILE),
            r#"[{"id": "watch1", "name": "Watch", "home": "office",
                 "commands": [{"id": "lights", "timeout_seconds": 60, "command": "turn lights on"}]}]"#,
        )
        .await
        .unwrap();

        let devices = load_ble_devices(dir.path()).await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].commands[0].timeout_seconds, 60);
        assert_eq!(devices[0].last_seen, 0);
    }

    #[tokio::test]
    async fn test_corrupt_seed_is_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(PEOPLE_FILE), "[{").await.unwrap();
        assert!(matches!(
            load_people(dir.path()).await,
            Err(AutomationError::Json(_))
        ));
    }
}
