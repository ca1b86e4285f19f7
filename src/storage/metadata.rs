use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::anyhow;

use crate::error::{DatasetError, Result};

/// Track id -> metadata record.
pub type TrackMetadataMap = BTreeMap<String, serde_json::Value>;

/// Reads the per-track metadata a dataset ships as part of its download.
pub trait MetadataLoader: Send + Sync {
    /// `Ok(None)` when the metadata is not available locally yet.
    fn load(&self, data_home: &Path) -> Result<Option<TrackMetadataMap>>;
}

/// A JSON object keyed by track id.
#[derive(Debug, Clone)]
pub struct JsonMetadataLoader {
    pub relative_path: PathBuf,
}

impl JsonMetadataLoader {
    pub fn new(relative_path: impl Into<PathBuf>) -> Self {
        Self {
            relative_path: relative_path.into(),
        }
    }
}

impl MetadataLoader for JsonMetadataLoader {
    fn load(&self, data_home: &Path) -> Result<Option<TrackMetadataMap>> {
        let path = data_home.join(&self.relative_path);
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("metadata file {} not found", path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let value: serde_json::Value =
            serde_json::from_str(&contents).map_err(|e| DatasetError::MalformedMetadata {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        match value {
            serde_json::Value::Object(map) => Ok(Some(map.into_iter().collect())),
            other => Err(DatasetError::MalformedMetadata {
                path,
                reason: format!("expected an object keyed by track id, got {other}"),
            }),
        }
    }
}

/// Remembers the metadata of the last storage root it was asked for.
///
/// Absent metadata is not remembered, the file may show up with a later
/// download.
#[derive(Debug, Default)]
pub struct MetadataCache {
    last: Mutex<Option<(PathBuf, Arc<TrackMetadataMap>)>>,
}

impl MetadataCache {
    pub fn get_or_load(
        &self,
        data_home: &Path,
        loader: &dyn MetadataLoader,
    ) -> Result<Option<Arc<TrackMetadataMap>>> {
        let mut last = self
            .last
            .lock()
            .map_err(|e| DatasetError::Internal(anyhow!("metadata cache is poisoned: {e}")))?;

        if let Some((root, metadata)) = last.as_ref() {
            if root == data_home {
                return Ok(Some(metadata.clone()));
            }
        }

        match loader.load(data_home)? {
            Some(metadata) => {
                let metadata = Arc::new(metadata);
                *last = Some((data_home.to_path_buf(), metadata.clone()));
                Ok(Some(metadata))
            }
            None => {
                *last = None;
                Ok(None)
            }
        }
    }

    pub fn clear(&self) {
        if let Ok(mut last) = self.last.lock() {
            *last = None;
        }
    }
}
