use std::{
    cell::OnceCell,
    collections::BTreeMap,
    fmt::Display,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    domain::{
        annotation::{Annotation, AnnotationRegistry},
        audio::{AudioLoader, Signal},
        manifest::{FileMap, FileRef, Manifest},
        schema::{AnnotationKind, DatasetSchema},
    },
    error::{DatasetError, Result},
};

/// Role name of the main audio file of a track.
pub const AUDIO_ROLE: &str = "audio";

/// Everything tracks of one dataset share, read-only.
#[derive(Debug)]
pub struct TrackContext {
    pub dataset: String,
    pub data_home: PathBuf,
    pub manifest: Arc<Manifest>,
    pub schema: Arc<DatasetSchema>,
    pub registry: Arc<AnnotationRegistry>,
}

/// Resolves every role of an index entry, plus the roles the schema declares,
/// to a local path. `None` propagates the "not applicable" sentinel.
pub(crate) fn resolve_paths(
    data_home: &Path,
    files: &FileMap,
    schema: &DatasetSchema,
) -> BTreeMap<String, Option<PathBuf>> {
    let mut paths: BTreeMap<String, Option<PathBuf>> = files
        .iter()
        .map(|(role, entry)| (role.clone(), entry.as_ref().map(|f| f.local_path(data_home))))
        .collect();
    for role in schema.roles.keys() {
        paths.entry(role.clone()).or_insert(None);
    }
    paths
}

/// Parses the annotation of a role at most once per cell.
///
/// Errors are not cached, so a failed parse is retried on the next access.
pub(crate) fn cached_annotation<'a>(
    ctx: &TrackContext,
    cells: &'a BTreeMap<String, OnceCell<Option<Annotation>>>,
    paths: &BTreeMap<String, Option<PathBuf>>,
    role: &str,
) -> Result<Option<&'a Annotation>> {
    let unknown = || DatasetError::UnknownRole {
        role: role.to_string(),
        dataset: ctx.dataset.clone(),
    };
    let cell = cells.get(role).ok_or_else(unknown)?;
    if let Some(cached) = cell.get() {
        return Ok(cached.as_ref());
    }

    let spec = ctx.schema.role(role).ok_or_else(unknown)?;
    let value = match paths.get(role).cloned().flatten() {
        None => None,
        Some(path) => {
            log::debug!("parsing {} annotation {}", spec.kind, path.display());
            Some(ctx.registry.parse(spec.kind, &path)?)
        }
    };
    Ok(cell.get_or_init(|| value).as_ref())
}

pub(crate) fn load_audio(
    ctx: &TrackContext,
    paths: &BTreeMap<String, Option<PathBuf>>,
    role: &str,
    loader: &dyn AudioLoader,
) -> Result<Option<Signal>> {
    let Some(entry) = paths.get(role) else {
        return Err(DatasetError::UnknownRole {
            role: role.to_string(),
            dataset: ctx.dataset.clone(),
        });
    };
    let Some(path) = entry else {
        return Ok(None);
    };
    if !path.exists() {
        return Err(DatasetError::NotFound { path: path.clone() });
    }
    loader.load(path).map(Some).map_err(DatasetError::Audio)
}

fn annotation_cells(schema: &DatasetSchema) -> BTreeMap<String, OnceCell<Option<Annotation>>> {
    schema
        .annotation_roles()
        .map(|(role, _)| (role.to_string(), OnceCell::new()))
        .collect()
}

/// One recording of a dataset and the files the index lists for it.
///
/// Paths are resolved at construction, annotations are parsed on first
/// access and kept for the lifetime of the track, audio is never kept.
#[derive(Debug)]
pub struct Track {
    pub track_id: String,
    ctx: Arc<TrackContext>,
    paths: BTreeMap<String, Option<PathBuf>>,
    metadata: Option<serde_json::Value>,
    annotations: BTreeMap<String, OnceCell<Option<Annotation>>>,
}

impl Track {
    /// Fails when the id is not in the index. Touches no files.
    pub fn new(
        ctx: Arc<TrackContext>,
        track_id: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<Self> {
        let files = ctx
            .manifest
            .tracks
            .get(track_id)
            .ok_or_else(|| DatasetError::UnknownTrack {
                track_id: track_id.to_string(),
                dataset: ctx.dataset.clone(),
            })?;

        Ok(Self {
            track_id: track_id.to_string(),
            paths: resolve_paths(&ctx.data_home, files, &ctx.schema),
            annotations: annotation_cells(&ctx.schema),
            metadata,
            ctx,
        })
    }

    pub fn dataset(&self) -> &str {
        &self.ctx.dataset
    }

    /// Local path of a role. `None` for unknown roles and for files the
    /// index marks as not applicable.
    pub fn path(&self, role: &str) -> Option<&Path> {
        self.paths.get(role).and_then(|p| p.as_deref())
    }

    pub fn paths(&self) -> &BTreeMap<String, Option<PathBuf>> {
        &self.paths
    }

    /// The index entry of a role, with its expected checksum.
    pub fn file_ref(&self, role: &str) -> Option<&FileRef> {
        self.ctx
            .manifest
            .tracks
            .get(&self.track_id)
            .and_then(|files| files.get(role))
            .and_then(|entry| entry.as_ref())
    }

    pub fn annotation(&self, role: &str) -> Result<Option<&Annotation>> {
        cached_annotation(&self.ctx, &self.annotations, &self.paths, role)
    }

    /// Whether the annotation of a role has already been parsed.
    pub fn is_loaded(&self, role: &str) -> bool {
        self.annotations
            .get(role)
            .map(|cell| cell.get().is_some())
            .unwrap_or(false)
    }

    pub fn audio(&self, loader: &dyn AudioLoader) -> Result<Option<Signal>> {
        self.audio_of(AUDIO_ROLE, loader)
    }

    pub fn audio_of(&self, role: &str, loader: &dyn AudioLoader) -> Result<Option<Signal>> {
        load_audio(&self.ctx, &self.paths, role, loader)
    }

    pub fn metadata(&self) -> Option<&serde_json::Value> {
        self.metadata.as_ref()
    }

    pub fn metadata_field(&self, key: &str) -> Result<&serde_json::Value> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(key))
            .ok_or_else(|| DatasetError::UnknownRole {
                role: key.to_string(),
                dataset: self.ctx.dataset.clone(),
            })
    }
}

pub(crate) fn fmt_entry(
    f: &mut std::fmt::Formatter<'_>,
    name: &str,
    id_field: &str,
    id: &str,
    ctx: &TrackContext,
    paths: &BTreeMap<String, Option<PathBuf>>,
    metadata: Option<&serde_json::Value>,
) -> std::fmt::Result {
    writeln!(f, "{name}(")?;
    writeln!(f, "  {id_field}=\"{id}\",")?;
    for (role, path) in paths {
        match path {
            Some(p) => writeln!(f, "  {role}_path=\"{}\",", p.display())?,
            None => writeln!(f, "  {role}_path=None,")?,
        }
    }
    if let Some(serde_json::Value::Object(fields)) = metadata {
        let keys: Vec<&str> = fields.keys().map(String::as_str).collect();
        writeln!(f, "  metadata: [{}],", keys.join(", "))?;
    }
    for (role, spec) in &ctx.schema.roles {
        if spec.kind == AnnotationKind::Audio {
            writeln!(f, "  {role}: audio signal, loaded on demand,")?;
        } else {
            writeln!(f, "  {role}: {} annotation,", spec.kind)?;
        }
    }
    write!(f, ")")
}

impl Display for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt_entry(
            f,
            "Track",
            "track_id",
            &self.track_id,
            &self.ctx,
            &self.paths,
            self.metadata.as_ref(),
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::domain::{
        audio::{WavLoader, tests::write_wav},
        schema::RoleSpec,
    };

    pub(crate) const INDEX: &str = r#"
{
  "version": "1.0",
  "tracks": {
    "t1": {
      "audio": ["audio/t1.wav", "00000000000000000000000000000000"],
      "beats": ["beats/t1.txt", "00000000000000000000000000000000"],
      "chords": [null, null]
    },
    "t2": {
      "audio": ["audio/t2.wav", "00000000000000000000000000000000"],
      "beats": ["beats/t2.txt", "00000000000000000000000000000000"],
      "chords": ["chords/t2.lab", "00000000000000000000000000000000"]
    }
  },
  "multitracks": {
    "m1": {
      "tracks": ["t1", "t2"],
      "mix": ["mix/m1.wav", "00000000000000000000000000000000"],
      "sections": ["sections/m1.lab", "00000000000000000000000000000000"]
    }
  }
}
"#;

    pub(crate) fn schema() -> DatasetSchema {
        DatasetSchema::default()
            .with_role("audio", RoleSpec::new(AnnotationKind::Audio))
            .with_role("beats", RoleSpec::new(AnnotationKind::Beats))
            .with_role("chords", RoleSpec::optional(AnnotationKind::Intervals))
            .with_role("mix", RoleSpec::new(AnnotationKind::Audio))
            .with_role("sections", RoleSpec::new(AnnotationKind::Intervals))
    }

    pub(crate) fn context(data_home: &Path) -> Arc<TrackContext> {
        Arc::new(TrackContext {
            dataset: "toy".to_string(),
            data_home: data_home.to_path_buf(),
            manifest: Arc::new(Manifest::from_json_str(INDEX).unwrap()),
            schema: Arc::new(schema()),
            registry: Arc::new(AnnotationRegistry::default()),
        })
    }

    #[test]
    fn unknown_track_fails_without_io() {
        let ctx = context(Path::new("/definitely/not/here"));
        match Track::new(ctx, "t9", None) {
            Err(DatasetError::UnknownTrack { track_id, dataset }) => {
                assert_eq!(track_id, "t9");
                assert_eq!(dataset, "toy");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn construction_does_not_need_local_files() -> anyhow::Result<()> {
        let home = Path::new("/definitely/not/here");
        let track = Track::new(context(home), "t1", None)?;

        assert_eq!(track.path("audio"), Some(home.join("audio/t1.wav").as_path()));
        assert_eq!(track.path("chords"), None);
        // declared by the schema, absent from the track entry
        assert_eq!(track.paths().get("sections"), Some(&None));
        assert_eq!(
            track.file_ref("beats").map(|f| f.path.clone()),
            Some(PathBuf::from("beats/t1.txt"))
        );
        Ok(())
    }

    #[test]
    fn annotations_are_parsed_once() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        std::fs::create_dir_all(tmp.path().join("beats"))?;
        let beats = tmp.path().join("beats/t1.txt");
        std::fs::write(&beats, "0.5\n1.0\n")?;

        let track = Track::new(context(tmp.path()), "t1", None)?;
        assert!(!track.is_loaded("beats"));
        assert_eq!(track.annotation("beats")?.map(|a| a.len()), Some(2));
        assert!(track.is_loaded("beats"));

        // later edits are not seen by the same track object
        std::fs::write(&beats, "0.5\n1.0\n1.5\n")?;
        assert_eq!(track.annotation("beats")?.map(|a| a.len()), Some(2));

        let fresh = Track::new(context(tmp.path()), "t1", None)?;
        assert_eq!(fresh.annotation("beats")?.map(|a| a.len()), Some(3));
        Ok(())
    }

    #[test]
    fn sentinel_role_is_none_and_missing_file_is_error() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let track = Track::new(context(tmp.path()), "t1", None)?;

        assert_eq!(track.annotation("chords")?, None);
        assert!(matches!(
            track.annotation("beats"),
            Err(DatasetError::NotFound { .. })
        ));
        // the error is not cached
        assert!(!track.is_loaded("beats"));
        assert!(matches!(
            track.annotation("tempo"),
            Err(DatasetError::UnknownRole { .. })
        ));
        Ok(())
    }

    #[test]
    fn audio_goes_through_the_loader() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let track = Track::new(context(tmp.path()), "t1", None)?;
        assert!(matches!(
            track.audio(&WavLoader),
            Err(DatasetError::NotFound { .. })
        ));

        std::fs::create_dir_all(tmp.path().join("audio"))?;
        write_wav(&tmp.path().join("audio/t1.wav"), &[0.25, 0.5], 22050);
        let signal = track.audio(&WavLoader)?.unwrap();
        assert_eq!(signal.sample_rate, 22050);
        assert_eq!(signal.samples.len(), 2);
        Ok(())
    }

    #[test]
    fn metadata_fields_and_repr() -> anyhow::Result<()> {
        let meta = serde_json::json!({"artist": "The Beatles", "year": 1963});
        let track = Track::new(context(Path::new("/data")), "t2", Some(meta))?;

        assert_eq!(track.metadata_field("year")?, &serde_json::json!(1963));
        assert!(matches!(
            track.metadata_field("genre"),
            Err(DatasetError::UnknownRole { .. })
        ));

        let repr = track.to_string();
        assert!(repr.starts_with("Track(\n  track_id=\"t2\","));
        assert!(repr.contains("chords_path=\"/data/chords/t2.lab\""));
        assert!(repr.contains("metadata: [artist, year]"));
        assert!(repr.contains("beats: beats annotation"));
        Ok(())
    }
}
