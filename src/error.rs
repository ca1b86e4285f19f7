use std::path::PathBuf;

use thiserror::Error;

use crate::domain::schema::AnnotationKind;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("track id '{track_id}' is not part of dataset '{dataset}'")]
    UnknownTrack { track_id: String, dataset: String },

    #[error("multitrack id '{mtrack_id}' is not part of dataset '{dataset}'")]
    UnknownMultiTrack { mtrack_id: String, dataset: String },

    #[error("'{key}' is not a remote of dataset '{dataset}', available remotes: {available:?}")]
    UnknownRemote {
        key: String,
        dataset: String,
        available: Vec<String>,
    },

    #[error("index version '{version}' is not available for dataset '{dataset}', available versions: {available:?}")]
    UnknownIndexVersion {
        version: String,
        dataset: String,
        available: Vec<String>,
    },

    #[error("unknown annotation kind '{0}'")]
    UnknownAnnotationKind(String),

    #[error("no annotation parser registered for kind '{0}'")]
    NoParser(AnnotationKind),

    #[error("'{role}' is not a role or metadata field of dataset '{dataset}'")]
    UnknownRole { role: String, dataset: String },

    #[error("malformed manifest {}: {source}", path.display())]
    MalformedManifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed metadata {}: {reason}", path.display())]
    MalformedMetadata { path: PathBuf, reason: String },

    #[error("malformed annotation {}, line {line}: {reason}", path.display())]
    MalformedAnnotation {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("multitrack '{mtrack_id}' references track '{track_id}' which is not in the manifest")]
    BrokenReference { mtrack_id: String, track_id: String },

    #[error("cannot mix audio: {0}")]
    Mix(String),

    #[error("download failed: {0}")]
    Download(#[source] anyhow::Error),

    #[error("audio loading failed: {0}")]
    Audio(#[source] anyhow::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T, E = DatasetError> = std::result::Result<T, E>;
