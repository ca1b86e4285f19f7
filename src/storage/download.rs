use std::{collections::BTreeMap, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    domain::checksum::Checksum,
    error::{DatasetError, Result},
};

/// A file a dataset is downloaded from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub filename: String,
    pub url: String,
    /// md5 of the downloaded file, checked by the downloader.
    pub checksum: Checksum,
    /// Directory under the storage root the file is placed or extracted in.
    #[serde(default)]
    pub destination_dir: Option<String>,
}

pub type Remotes = BTreeMap<String, RemoteFile>;

/// Fetches remote files into a storage root, verifies their checksums and
/// unpacks archives.
pub trait Downloader {
    fn download(
        &self,
        data_home: &Path,
        remotes: &Remotes,
        force_overwrite: bool,
        cleanup: bool,
    ) -> anyhow::Result<()>;
}

/// The remotes named by `partial_download`, or all of them for `None`.
pub fn select_remotes(
    dataset: &str,
    remotes: &Remotes,
    partial_download: Option<&[&str]>,
) -> Result<Remotes> {
    let Some(keys) = partial_download else {
        return Ok(remotes.clone());
    };

    keys.iter()
        .map(|key| {
            remotes
                .get(*key)
                .map(|remote| (key.to_string(), remote.clone()))
                .ok_or_else(|| DatasetError::UnknownRemote {
                    key: key.to_string(),
                    dataset: dataset.to_string(),
                    available: remotes.keys().cloned().collect(),
                })
        })
        .collect()
}
