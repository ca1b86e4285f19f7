//! In-memory model of a dataset index: the expected files of a release
//! together with their md5 checksums.

use std::{
    collections::BTreeMap,
    fmt::Display,
    path::{Component, Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::{DatasetError, Result};

/// Key of the member list inside a multitrack entry. Never a file role.
pub const TRACKS_KEY: &str = "tracks";

/// Reference to one expected file, relative to the dataset's storage root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub path: PathBuf,
    /// `None` when the index records the file without a checksum.
    pub checksum: Option<String>,
}

impl FileRef {
    pub fn new(path: impl Into<PathBuf>, checksum: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            checksum: Some(checksum.into()),
        }
    }

    pub fn local_path(&self, data_home: &Path) -> PathBuf {
        data_home.join(&self.path)
    }
}

/// `None` marks a file that intentionally does not exist for an entry.
pub type FileEntry = Option<FileRef>;

/// Role name -> file reference, for one track, multitrack or the metadata section.
pub type FileMap = BTreeMap<String, FileEntry>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ManifestVersion {
    Number(serde_json::Number),
    Text(String),
}

impl ManifestVersion {
    /// Whether this version is the one named by a version key.
    pub fn matches(&self, key: &str) -> bool {
        self.to_string() == key
    }
}

impl Display for ManifestVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManifestVersion::Number(n) => write!(f, "{n}"),
            ManifestVersion::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for ManifestVersion {
    fn from(s: &str) -> Self {
        ManifestVersion::Text(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MultiTrackEntry {
    /// Ids of the member tracks, each a key of the manifest's tracks section.
    pub tracks: Vec<String>,
    pub files: FileMap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawManifest", into = "RawManifest")]
pub struct Manifest {
    pub version: ManifestVersion,
    pub metadata: Option<FileMap>,
    pub tracks: BTreeMap<String, FileMap>,
    pub multitracks: Option<BTreeMap<String, MultiTrackEntry>>,
}

impl Manifest {
    pub fn new(version: ManifestVersion) -> Self {
        Self {
            version,
            metadata: None,
            tracks: BTreeMap::new(),
            multitracks: None,
        }
    }

    pub fn from_json_str(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => DatasetError::NotFound {
                path: path.to_path_buf(),
            },
            _ => DatasetError::Io(e),
        })?;
        Self::from_json_str(&contents).map_err(|source| DatasetError::MalformedManifest {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = self
            .to_json_pretty()
            .map_err(|e| DatasetError::Internal(e.into()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn track_ids(&self) -> impl Iterator<Item = &str> {
        self.tracks.keys().map(String::as_str)
    }

    pub fn mtrack_ids(&self) -> impl Iterator<Item = &str> {
        self.multitracks
            .iter()
            .flat_map(|m| m.keys())
            .map(String::as_str)
    }

    pub fn multitrack(&self, mtrack_id: &str) -> Option<&MultiTrackEntry> {
        self.multitracks.as_ref().and_then(|m| m.get(mtrack_id))
    }

    /// Number of entries that reference an actual file.
    pub fn file_count(&self) -> usize {
        let count = |files: &FileMap| files.values().filter(|e| e.is_some()).count();
        self.metadata.as_ref().map(count).unwrap_or(0)
            + self.tracks.values().map(count).sum::<usize>()
            + self
                .multitracks
                .iter()
                .flat_map(|m| m.values())
                .map(|m| count(&m.files))
                .sum::<usize>()
    }

    /// Checks that every multitrack member is a track of this manifest.
    pub fn check_references(&self) -> Result<()> {
        for (mtrack_id, entry) in self.multitracks.iter().flatten() {
            if let Some(missing) = entry.tracks.iter().find(|t| !self.tracks.contains_key(*t)) {
                return Err(DatasetError::BrokenReference {
                    mtrack_id: mtrack_id.clone(),
                    track_id: missing.clone(),
                });
            }
        }
        Ok(())
    }
}

/// `[path, checksum]` as written in index files, `[null, null]` for absent files.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawPair(Option<String>, Option<String>);

impl From<RawPair> for FileEntry {
    fn from(RawPair(path, checksum): RawPair) -> Self {
        path.map(|path| FileRef {
            path: PathBuf::from(path),
            checksum,
        })
    }
}

impl From<FileEntry> for RawPair {
    fn from(entry: FileEntry) -> Self {
        match entry {
            Some(f) => RawPair(Some(f.path.to_string_lossy().into_owned()), f.checksum),
            None => RawPair(None, None),
        }
    }
}

type RawFileMap = BTreeMap<String, RawPair>;

/// Index paths are relative to the storage root and must stay under it.
fn from_raw(raw: RawFileMap) -> std::result::Result<FileMap, String> {
    let files: FileMap = raw.into_iter().map(|(k, v)| (k, v.into())).collect();
    for file in files.values().flatten() {
        let contained = file
            .path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !contained || file.path.as_os_str().is_empty() {
            return Err(format!(
                "path '{}' is not relative to the storage root",
                file.path.display()
            ));
        }
    }
    Ok(files)
}

fn to_raw(files: FileMap) -> RawFileMap {
    files.into_iter().map(|(k, v)| (k, v.into())).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawMultiTrack {
    tracks: Vec<String>,
    #[serde(flatten)]
    files: RawFileMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawManifest {
    version: ManifestVersion,
    #[serde(default)]
    metadata: Option<RawFileMap>,
    tracks: BTreeMap<String, RawFileMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    multitracks: Option<BTreeMap<String, RawMultiTrack>>,
}

impl TryFrom<RawManifest> for Manifest {
    type Error = String;

    fn try_from(raw: RawManifest) -> std::result::Result<Self, String> {
        let mut tracks = BTreeMap::new();
        for (track_id, files) in raw.tracks {
            if files.contains_key(TRACKS_KEY) {
                return Err(format!(
                    "track '{track_id}' uses the reserved role name '{TRACKS_KEY}'"
                ));
            }
            tracks.insert(track_id, from_raw(files)?);
        }

        let multitracks = raw
            .multitracks
            .map(|m| {
                m.into_iter()
                    .map(|(id, raw)| {
                        let files = from_raw(raw.files)?;
                        Ok((
                            id,
                            MultiTrackEntry {
                                tracks: raw.tracks,
                                files,
                            },
                        ))
                    })
                    .collect::<std::result::Result<BTreeMap<_, _>, String>>()
            })
            .transpose()?;

        Ok(Manifest {
            version: raw.version,
            metadata: raw.metadata.map(from_raw).transpose()?,
            tracks,
            multitracks,
        })
    }
}

impl From<Manifest> for RawManifest {
    fn from(m: Manifest) -> Self {
        RawManifest {
            version: m.version,
            metadata: m.metadata.map(to_raw),
            tracks: m.tracks.into_iter().map(|(k, v)| (k, to_raw(v))).collect(),
            multitracks: m.multitracks.map(|m| {
                m.into_iter()
                    .map(|(id, e)| {
                        (
                            id,
                            RawMultiTrack {
                                tracks: e.tracks,
                                files: to_raw(e.files),
                            },
                        )
                    })
                    .collect()
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX: &str = r#"
{
  "version": "1.0",
  "metadata": {
    "metadata": ["meta/tracks.json", "0123456789abcdef0123456789abcdef"]
  },
  "tracks": {
    "t1": {
      "audio": ["audio/t1.wav", "11111111111111111111111111111111"],
      "beats": [null, null]
    },
    "t2": {
      "audio": ["audio/t2.wav", "22222222222222222222222222222222"],
      "beats": ["beats/t2.txt", null]
    }
  },
  "multitracks": {
    "m1": {
      "tracks": ["t1", "t2"],
      "mix": ["mix/m1.wav", "33333333333333333333333333333333"]
    }
  }
}
"#;

    #[test]
    fn parse_full_manifest() -> anyhow::Result<()> {
        let m = Manifest::from_json_str(INDEX)?;

        assert_eq!(m.version, ManifestVersion::Text("1.0".into()));
        assert_eq!(m.track_ids().collect::<Vec<_>>(), vec!["t1", "t2"]);
        assert_eq!(m.tracks["t1"]["beats"], None);
        assert_eq!(
            m.tracks["t1"]["audio"],
            Some(FileRef::new("audio/t1.wav", "11111111111111111111111111111111"))
        );
        assert_eq!(
            m.tracks["t2"]["beats"],
            Some(FileRef {
                path: "beats/t2.txt".into(),
                checksum: None
            })
        );

        let m1 = m.multitrack("m1").unwrap();
        assert_eq!(m1.tracks, vec!["t1", "t2"]);
        assert!(!m1.files.contains_key(TRACKS_KEY));
        assert!(m1.files.contains_key("mix"));

        // metadata, 2 audio, 1 beats, 1 mix
        assert_eq!(m.file_count(), 5);
        m.check_references()?;
        Ok(())
    }

    #[test]
    fn sentinel_survives_json_round_trip() -> anyhow::Result<()> {
        let m = Manifest::from_json_str(INDEX)?;
        let json = m.to_json_pretty()?;
        let value: serde_json::Value = serde_json::from_str(&json)?;

        assert_eq!(
            value["tracks"]["t1"]["beats"],
            serde_json::json!([null, null])
        );
        assert_eq!(Manifest::from_json_str(&json)?, m);
        Ok(())
    }

    #[test]
    fn numeric_version_and_missing_optional_sections() -> anyhow::Result<()> {
        let m = Manifest::from_json_str(r#"{"version": 2, "metadata": null, "tracks": {}}"#)?;
        assert_eq!(m.version.to_string(), "2");
        assert!(m.version.matches("2"));
        assert!(m.metadata.is_none());
        assert!(m.multitracks.is_none());
        assert_eq!(m.mtrack_ids().count(), 0);

        let json = m.to_json_pretty()?;
        assert!(json.contains("\"version\": 2"));
        assert!(!json.contains("multitracks"));
        Ok(())
    }

    #[test]
    fn broken_multitrack_reference_is_detected() -> anyhow::Result<()> {
        let m = Manifest::from_json_str(
            r#"{"version": "1", "tracks": {"a": {}},
                "multitracks": {"m": {"tracks": ["a", "ghost"]}}}"#,
        )?;
        match m.check_references() {
            Err(DatasetError::BrokenReference { mtrack_id, track_id }) => {
                assert_eq!(mtrack_id, "m");
                assert_eq!(track_id, "ghost");
            }
            other => panic!("unexpected result {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn reserved_role_name_is_rejected() {
        let res = Manifest::from_json_str(
            r#"{"version": "1", "tracks": {"a": {"tracks": ["x.wav", null]}}}"#,
        );
        assert!(res.is_err());
    }

    #[test]
    fn paths_escaping_the_storage_root_are_rejected() {
        for path in ["/etc/passwd", "../outside.wav", "audio/../../x.wav", ""] {
            let json = format!(
                r#"{{"version": "1", "tracks": {{"a": {{"audio": ["{path}", null]}}}}}}"#
            );
            assert!(Manifest::from_json_str(&json).is_err(), "{path} was accepted");
        }
        let json = r#"{"version": "1", "tracks": {}, "multitracks": {"m": {"tracks": [], "mix": ["/mix.wav", null]}}}"#;
        assert!(Manifest::from_json_str(json).is_err());
        assert!(
            Manifest::from_json_str(
                r#"{"version": "1", "tracks": {"a": {"audio": ["./audio/a.wav", null]}}}"#
            )
            .is_ok()
        );
    }

    #[test]
    fn load_reports_missing_and_malformed_files() -> anyhow::Result<()> {
        let tmp = tempfile::TempDir::new()?;
        let missing = tmp.path().join("none.json");
        assert!(matches!(
            Manifest::load(&missing),
            Err(DatasetError::NotFound { .. })
        ));

        let bad = tmp.path().join("bad.json");
        std::fs::write(&bad, "{ not json")?;
        assert!(matches!(
            Manifest::load(&bad),
            Err(DatasetError::MalformedManifest { .. })
        ));

        let good = tmp.path().join("good.json");
        Manifest::from_json_str(INDEX)?.save(&good)?;
        assert_eq!(Manifest::load(&good)?.tracks.len(), 2);
        Ok(())
    }
}
