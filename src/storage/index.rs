//! Resolution of a dataset's index versions to index files on disk.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::anyhow;

use crate::{
    domain::manifest::Manifest,
    error::{DatasetError, Result},
};

/// Alias that always resolves to a dataset's default index version.
pub const DEFAULT_VERSION: &str = "default";

/// The index files of one dataset, named `<dataset>_index_<version>.json`.
///
/// Loaded indexes are kept for the lifetime of the catalog.
#[derive(Debug)]
pub struct IndexCatalog {
    dataset: String,
    index_dir: PathBuf,
    default_version: String,
    loaded: Mutex<HashMap<String, Arc<Manifest>>>,
}

impl IndexCatalog {
    pub fn new(dataset: &str, index_dir: &Path, default_version: &str) -> Self {
        Self {
            dataset: dataset.to_string(),
            index_dir: index_dir.to_path_buf(),
            default_version: default_version.to_string(),
            loaded: Mutex::new(HashMap::new()),
        }
    }

    pub fn default_version(&self) -> &str {
        &self.default_version
    }

    pub fn index_path(&self, version: &str) -> PathBuf {
        self.index_dir
            .join(format!("{}_index_{}.json", self.dataset, version))
    }

    /// Versions that have an index file, sorted.
    pub fn available_versions(&self) -> Result<Vec<String>> {
        let prefix = format!("{}_index_", self.dataset);
        let entries = match std::fs::read_dir(&self.index_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut versions = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .filter_map(|name| {
                name.strip_prefix(&prefix)
                    .and_then(|rest| rest.strip_suffix(".json"))
                    .map(str::to_string)
            })
            .collect::<Vec<_>>();
        versions.sort();
        Ok(versions)
    }

    /// Maps a requested version (`None` or `"default"` for the default one)
    /// to a version that has an index file.
    pub fn resolve(&self, version: Option<&str>) -> Result<String> {
        let version = match version {
            None | Some(DEFAULT_VERSION) => self.default_version.as_str(),
            Some(v) => v,
        };
        if self.index_path(version).is_file() {
            return Ok(version.to_string());
        }
        Err(DatasetError::UnknownIndexVersion {
            version: version.to_string(),
            dataset: self.dataset.clone(),
            available: self.available_versions()?,
        })
    }

    pub fn load(&self, version: Option<&str>) -> Result<Arc<Manifest>> {
        let version = self.resolve(version)?;

        let mut loaded = self.loaded.lock().map_err(|e| {
            DatasetError::Internal(anyhow!("index cache of {} is poisoned: {e}", self.dataset))
        })?;
        if let Some(manifest) = loaded.get(&version) {
            return Ok(manifest.clone());
        }

        let path = self.index_path(&version);
        log::debug!("loading index {}", path.display());
        let manifest = Manifest::load(&path)?;
        manifest.check_references()?;

        if !manifest.version.matches(&version) {
            log::warn!(
                "index {} declares version {} but was requested as version {version}",
                path.display(),
                manifest.version
            );
        }

        let manifest = Arc::new(manifest);
        loaded.insert(version, manifest.clone());
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn write_index(dir: &Path, name: &str, version: &str) {
        std::fs::write(
            dir.join(name),
            format!(r#"{{"version": "{version}", "tracks": {{"a": {{}}}}}}"#),
        )
        .unwrap();
    }

    #[test]
    fn resolves_default_and_explicit_versions() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        write_index(tmp.path(), "toy_index_1.0.json", "1.0");
        write_index(tmp.path(), "toy_index_sample.json", "sample");
        write_index(tmp.path(), "other_index_1.0.json", "1.0");
        std::fs::write(tmp.path().join("README.md"), "not an index")?;

        let catalog = IndexCatalog::new("toy", tmp.path(), "1.0");
        assert_eq!(catalog.available_versions()?, vec!["1.0", "sample"]);
        assert_eq!(catalog.resolve(None)?, "1.0");
        assert_eq!(catalog.resolve(Some("default"))?, "1.0");
        assert_eq!(catalog.resolve(Some("sample"))?, "sample");
        Ok(())
    }

    #[test]
    fn unknown_version_lists_available_ones() {
        let tmp = TempDir::new().unwrap();
        write_index(tmp.path(), "toy_index_1.0.json", "1.0");

        let catalog = IndexCatalog::new("toy", tmp.path(), "1.0");
        match catalog.resolve(Some("2.0")) {
            Err(DatasetError::UnknownIndexVersion {
                version,
                dataset,
                available,
            }) => {
                assert_eq!(version, "2.0");
                assert_eq!(dataset, "toy");
                assert_eq!(available, vec!["1.0"]);
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn load_is_cached_per_version() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        write_index(tmp.path(), "toy_index_1.0.json", "1.0");

        let catalog = IndexCatalog::new("toy", tmp.path(), "1.0");
        let first = catalog.load(None)?;
        std::fs::remove_file(tmp.path().join("toy_index_1.0.json"))?;
        write_index(tmp.path(), "toy_index_1.0.json", "1.0");
        let second = catalog.load(Some("1.0"))?;

        assert!(Arc::ptr_eq(&first, &second));
        Ok(())
    }

    #[test]
    fn version_mismatch_is_only_informational() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        write_index(tmp.path(), "toy_index_2.0.json", "1.9");

        let catalog = IndexCatalog::new("toy", tmp.path(), "2.0");
        assert_eq!(catalog.load(None)?.version.to_string(), "1.9");
        Ok(())
    }

    #[test]
    fn broken_multitrack_reference_fails_the_load() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("toy_index_1.json"),
            r#"{"version": "1", "tracks": {}, "multitracks": {"m": {"tracks": ["x"]}}}"#,
        )
        .unwrap();

        let catalog = IndexCatalog::new("toy", tmp.path(), "1");
        assert!(matches!(
            catalog.load(None),
            Err(DatasetError::BrokenReference { .. })
        ));
    }

    #[test]
    fn missing_index_dir_has_no_versions() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let catalog = IndexCatalog::new("toy", &tmp.path().join("nope"), "1");
        assert!(catalog.available_versions()?.is_empty());
        Ok(())
    }
}
