use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::{Context, anyhow};
use serde::Deserialize;

use crate::{
    domain::schema::{DatasetSchema, RoleSpec},
    storage::download::Remotes,
};

fn default_index_dir() -> PathBuf {
    PathBuf::from("indexes")
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub version: u32,
    /// Parent directory of the datasets' storage roots.
    pub data_home: PathBuf,
    #[serde(default = "default_index_dir")]
    pub index_dir: PathBuf,
    #[serde(default)]
    pub datasets: Vec<DatasetConfig>,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Config> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&contents).with_context(|| "Failed to parse config TOML")
    }

    pub fn dataset(&self, name: &str) -> anyhow::Result<&DatasetConfig> {
        self.datasets.iter().find(|d| d.name == name).ok_or_else(|| {
            let known: Vec<&str> = self.datasets.iter().map(|d| d.name.as_str()).collect();
            anyhow!("dataset '{name}' is not configured, configured datasets: {known:?}")
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatasetConfig {
    pub name: String,
    pub default_version: String,
    /// Overrides `<data_home>/<name>` as the storage root.
    pub data_home: Option<PathBuf>,
    pub license: Option<String>,
    pub bibtex: Option<String>,
    pub homepage: Option<String>,
    /// JSON object of per-track metadata, relative to the storage root.
    pub metadata_path: Option<PathBuf>,
    #[serde(default)]
    pub roles: BTreeMap<String, RoleSpec>,
    #[serde(default)]
    pub remotes: Remotes,
}

impl DatasetConfig {
    pub fn schema(&self) -> DatasetSchema {
        DatasetSchema {
            roles: self.roles.clone(),
        }
    }
}
