use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::models::PrintJobSummary;

/// Name of the single slot holding the most recent summary.
pub const PRINT_DATA_KEY: &str = "printData";

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Local key-value store with one slot in use. Kept in memory and, when a
/// path is configured, mirrored to a JSON object on disk.
pub struct SummaryCache {
    path: Option<PathBuf>,
    slot: RwLock<Option<PrintJobSummary>>,
}

impl SummaryCache {
    pub fn in_memory() -> Self {
        Self { path: None, slot: RwLock::new(None) }
    }

    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self { path: Some(path.into()), slot: RwLock::new(None) }
    }

    /// Overwrite the slot with `summary`.
    pub async fn store(&self, summary: &PrintJobSummary) -> Result<(), CacheError> {
        let mut slot = self.slot.write().await;
        if let Some(path) = &self.path {
            write_slot(path, summary).await?;
            tracing::debug!(path = %path.display(), "cache slot written");
        }
        *slot = Some(summary.clone());
        Ok(())
    }

    #[cfg(test)]
    pub async fn latest(&self) -> Option<PrintJobSummary> {
        self.slot.read().await.clone()
    }
}

async fn write_slot(path: &Path, summary: &PrintJobSummary) -> Result<(), CacheError> {
    // Other keys in an existing file are preserved.
    let mut object = match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice::<Value>(&bytes)? {
            Value::Object(map) => map,
            _ => Map::new(),
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
        Err(e) => return Err(e.into()),
    };
    object.insert(PRINT_DATA_KEY.to_string(), serde_json::to_value(summary)?);

    let body = serde_json::to_vec_pretty(&Value::Object(object))?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
