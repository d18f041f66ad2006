use std::path::Path;

use async_trait::async_trait;

use crate::errors::{Result, SimError};
use crate::models::tracking::TrackingRecord;
use crate::services::expectation_pipeline::Storage;

/// Writes records as a pretty-printed JSON array, replacing any previous file.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFileStorage;

#[async_trait]
impl Storage for JsonFileStorage {
    async fn save(&self, records: &[TrackingRecord], destination: &Path) -> Result<()> {
        let body = serde_json::to_vec_pretty(records)
            .map_err(|e| SimError::Storage(format!("cannot serialise records: {}", e)))?;
        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                SimError::Storage(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        tokio::fs::write(destination, body)
            .await
            .map_err(|e| SimError::Storage(format!("cannot write {}: {}", destination.display(), e)))
    }
}
