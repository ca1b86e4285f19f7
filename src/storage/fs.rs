//! Generation of a dataset index by scanning a local copy of the dataset.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Component, Path, PathBuf},
};

use walkdir::WalkDir;

use crate::{
    domain::{
        checksum::md5,
        manifest::{FileMap, FileRef, Manifest, ManifestVersion},
        schema::DatasetSchema,
    },
    error::Result,
};

/// Where the files of each role live inside a dataset tree.
///
/// A file `<role dir>/<sub dirs>/<name>.<ext>` belongs to the track
/// `<sub dirs>/<name>`.
#[derive(Debug, Clone, Default)]
pub struct Layout {
    /// directory relative to the root -> role
    pub role_dirs: BTreeMap<PathBuf, String>,
    /// file relative to the root -> metadata key
    pub metadata_files: BTreeMap<PathBuf, String>,
    pub required_roles: BTreeSet<String>,
    pub follow_symlinks: bool,
    pub ignored_dirs: Vec<PathBuf>,
}

impl Layout {
    /// One directory per role, named after the role.
    pub fn from_schema(schema: &DatasetSchema) -> Self {
        Self {
            role_dirs: schema
                .roles
                .keys()
                .map(|role| (PathBuf::from(role), role.clone()))
                .collect(),
            required_roles: schema
                .roles
                .iter()
                .filter(|(_, spec)| spec.required)
                .map(|(role, _)| role.clone())
                .collect(),
            ..Default::default()
        }
    }

    pub fn with_metadata_file(mut self, relative_path: impl Into<PathBuf>, key: &str) -> Self {
        self.metadata_files
            .insert(relative_path.into(), key.to_string());
        self
    }

    /// Role and track id of a file, given its path relative to the root.
    fn classify(&self, relative: &Path) -> Option<(String, String)> {
        let (dir, role) = self
            .role_dirs
            .iter()
            .filter(|(dir, _)| relative.starts_with(dir))
            .max_by_key(|(dir, _)| dir.components().count())?;
        let inner = relative.strip_prefix(dir).ok()?;
        let stem = inner.file_stem()?.to_str()?;
        let mut parts = inner
            .parent()
            .into_iter()
            .flat_map(|p| p.components())
            .filter_map(|c| match c {
                Component::Normal(s) => s.to_str(),
                _ => None,
            })
            .collect::<Vec<_>>();
        parts.push(stem);
        Some((role.clone(), parts.join("/")))
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

fn relative_string(path: &Path) -> PathBuf {
    PathBuf::from(
        path.components()
            .filter_map(|c| match c {
                Component::Normal(s) => s.to_str(),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/"),
    )
}

/// Recursively scans a dataset tree and builds its index, hashing every
/// file that the layout assigns to a role or to the metadata section.
pub fn build_index(root: &Path, layout: &Layout, version: &str) -> Result<Manifest> {
    let root_str = root.to_string_lossy();

    let paths = WalkDir::new(root)
        .follow_links(layout.follow_symlinks)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let entry_path = entry.path();
            entry.depth() == 0
                || (!is_hidden(entry_path)
                    && !layout
                        .ignored_dirs
                        .iter()
                        .any(|ignored| entry_path.starts_with(root.join(ignored))))
        })
        .filter_map(|e| match e {
            Ok(e) => Some(e),
            Err(err) => {
                log::warn!("error while scanning dir {root_str}, skipping an entry: {err:?}");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_path_buf())
        .collect::<Vec<PathBuf>>();

    let mut manifest = Manifest::new(ManifestVersion::from(version));
    let mut metadata = FileMap::new();

    for path in paths {
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let relative = relative_string(relative);

        if let Some(key) = layout.metadata_files.get(&relative) {
            metadata.insert(key.clone(), Some(FileRef::new(&relative, md5(&path)?)));
            continue;
        }

        let Some((role, track_id)) = layout.classify(&relative) else {
            log::debug!("{} does not belong to any role", relative.display());
            continue;
        };
        let files = manifest.tracks.entry(track_id.clone()).or_default();
        if let Some(Some(existing)) = files.get(&role) {
            log::warn!(
                "track {track_id} has several {role} files, keeping {} and ignoring {}",
                existing.path.display(),
                relative.display()
            );
            continue;
        }
        files.insert(role, Some(FileRef::new(&relative, md5(&path)?)));
    }

    for (track_id, files) in manifest.tracks.iter_mut() {
        for role in layout.role_dirs.values() {
            if files.contains_key(role) {
                continue;
            }
            if layout.required_roles.contains(role) {
                log::warn!("track {track_id} has no {role} file");
            }
            files.insert(role.clone(), None);
        }
    }

    if !metadata.is_empty() {
        manifest.metadata = Some(metadata);
    }
    log::info!(
        "indexed {} tracks ({} files) under {}",
        manifest.tracks.len(),
        manifest.file_count(),
        root_str
    );
    Ok(manifest)
}
