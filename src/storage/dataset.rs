use std::{
    collections::BTreeMap,
    fmt::Display,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

use crate::{
    config::{Config, DatasetConfig},
    domain::{
        annotation::AnnotationRegistry,
        manifest::Manifest,
        multitrack::MultiTrack,
        schema::DatasetSchema,
        track::{Track, TrackContext},
    },
    error::{DatasetError, Result},
    storage::{
        download::{Downloader, Remotes, select_remotes},
        index::IndexCatalog,
        metadata::{JsonMetadataLoader, MetadataCache, MetadataLoader, TrackMetadataMap},
        validate::{ValidationReport, validate},
    },
};

#[derive(Debug, Clone, Default)]
pub struct DatasetInfo {
    pub license: Option<String>,
    pub bibtex: Option<String>,
    pub homepage: Option<String>,
}

/// Main structure tying a dataset's index to its local copy.
///
/// The index is loaded on first use and shared by every track handed out.
pub struct Dataset {
    pub name: String,
    data_home: PathBuf,
    version: Option<String>,
    catalog: IndexCatalog,
    schema: Arc<DatasetSchema>,
    registry: Arc<AnnotationRegistry>,
    metadata_loader: Option<Box<dyn MetadataLoader>>,
    metadata_cache: MetadataCache,
    remotes: Remotes,
    info: DatasetInfo,
    context: OnceLock<Arc<TrackContext>>,
}

impl Dataset {
    pub fn new(name: &str, data_home: &Path, catalog: IndexCatalog, schema: DatasetSchema) -> Self {
        Self {
            name: name.to_string(),
            data_home: data_home.to_path_buf(),
            version: None,
            catalog,
            schema: Arc::new(schema),
            registry: Arc::new(AnnotationRegistry::default()),
            metadata_loader: None,
            metadata_cache: MetadataCache::default(),
            remotes: Remotes::new(),
            info: DatasetInfo::default(),
            context: OnceLock::new(),
        }
    }

    /// Builds a dataset from its configuration. The storage root defaults to
    /// `<data_home>/<name>`.
    pub fn from_config(config: &DatasetConfig, global: &Config) -> Self {
        let root = config
            .data_home
            .clone()
            .unwrap_or_else(|| global.data_home.join(&config.name));
        let catalog = IndexCatalog::new(&config.name, &global.index_dir, &config.default_version);

        let mut dataset = Self::new(&config.name, &root, catalog, config.schema())
            .with_remotes(config.remotes.clone())
            .with_info(DatasetInfo {
                license: config.license.clone(),
                bibtex: config.bibtex.clone(),
                homepage: config.homepage.clone(),
            });
        if let Some(path) = &config.metadata_path {
            dataset = dataset.with_metadata_loader(Box::new(JsonMetadataLoader::new(path)));
        }
        dataset
    }

    /// Selects an index version other than the default one.
    pub fn with_version(mut self, version: Option<&str>) -> Self {
        self.version = version.map(str::to_string);
        self.context = OnceLock::new();
        self
    }

    pub fn with_metadata_loader(mut self, loader: Box<dyn MetadataLoader>) -> Self {
        self.metadata_loader = Some(loader);
        self
    }

    pub fn with_remotes(mut self, remotes: Remotes) -> Self {
        self.remotes = remotes;
        self
    }

    pub fn with_info(mut self, info: DatasetInfo) -> Self {
        self.info = info;
        self
    }

    pub fn with_registry(mut self, registry: AnnotationRegistry) -> Self {
        self.registry = Arc::new(registry);
        self.context = OnceLock::new();
        self
    }

    pub fn data_home(&self) -> &Path {
        &self.data_home
    }

    pub fn schema(&self) -> &DatasetSchema {
        &self.schema
    }

    pub fn remotes(&self) -> &Remotes {
        &self.remotes
    }

    pub fn info(&self) -> &DatasetInfo {
        &self.info
    }

    fn context(&self) -> Result<Arc<TrackContext>> {
        if let Some(ctx) = self.context.get() {
            return Ok(ctx.clone());
        }
        let ctx = Arc::new(TrackContext {
            dataset: self.name.clone(),
            data_home: self.data_home.clone(),
            manifest: self.catalog.load(self.version.as_deref())?,
            schema: self.schema.clone(),
            registry: self.registry.clone(),
        });
        Ok(self.context.get_or_init(|| ctx).clone())
    }

    pub fn manifest(&self) -> Result<Arc<Manifest>> {
        Ok(self.context()?.manifest.clone())
    }

    pub fn track_ids(&self) -> Result<Vec<String>> {
        Ok(self.manifest()?.tracks.keys().cloned().collect())
    }

    pub fn mtrack_ids(&self) -> Result<Vec<String>> {
        Ok(self.manifest()?.mtrack_ids().map(str::to_string).collect())
    }

    /// Metadata of all tracks, loaded once per storage root.
    pub fn metadata(&self) -> Result<Option<Arc<TrackMetadataMap>>> {
        match &self.metadata_loader {
            Some(loader) => self
                .metadata_cache
                .get_or_load(&self.data_home, loader.as_ref()),
            None => Ok(None),
        }
    }

    pub fn track(&self, track_id: &str) -> Result<Track> {
        let ctx = self.context()?;
        if !ctx.manifest.tracks.contains_key(track_id) {
            return Err(DatasetError::UnknownTrack {
                track_id: track_id.to_string(),
                dataset: self.name.clone(),
            });
        }
        let metadata = self.metadata()?.and_then(|m| m.get(track_id).cloned());
        Track::new(ctx, track_id, metadata)
    }

    pub fn multitrack(&self, mtrack_id: &str) -> Result<MultiTrack> {
        let ctx = self.context()?;
        let metadata = self.metadata()?;
        MultiTrack::new(ctx, mtrack_id, |id| {
            metadata.as_ref().and_then(|m| m.get(id).cloned())
        })
    }

    pub fn load_tracks(&self) -> Result<BTreeMap<String, Track>> {
        self.track_ids()?
            .into_iter()
            .map(|id| {
                let track = self.track(&id)?;
                Ok((id, track))
            })
            .collect()
    }

    pub fn load_multitracks(&self) -> Result<BTreeMap<String, MultiTrack>> {
        self.mtrack_ids()?
            .into_iter()
            .map(|id| {
                let mtrack = self.multitrack(&id)?;
                Ok((id, mtrack))
            })
            .collect()
    }

    pub fn validate(&self, verbose: bool) -> Result<ValidationReport> {
        let manifest = self.manifest()?;
        validate(&manifest, &self.data_home, verbose)
    }

    /// Downloads the dataset, or the remotes named in `partial_download`.
    pub fn download(
        &self,
        downloader: &dyn Downloader,
        partial_download: Option<&[&str]>,
        force_overwrite: bool,
        cleanup: bool,
    ) -> Result<()> {
        let remotes = select_remotes(&self.name, &self.remotes, partial_download)?;
        log::info!(
            "downloading {} remote files of {} into {}",
            remotes.len(),
            self.name,
            self.data_home.display()
        );
        downloader
            .download(&self.data_home, &remotes, force_overwrite, cleanup)
            .map_err(DatasetError::Download)?;
        // the metadata file may have just arrived
        self.metadata_cache.clear();
        Ok(())
    }

    pub fn cite(&self) -> Option<&str> {
        self.info.bibtex.as_deref()
    }

    pub fn license(&self) -> Option<&str> {
        self.info.license.as_deref()
    }
}

impl Display for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "The {} dataset", self.name)?;
        writeln!(f, "{}", "-".repeat(30))?;
        let version = self
            .version
            .as_deref()
            .unwrap_or(self.catalog.default_version());
        writeln!(f, "Index version: {version}")?;
        writeln!(f, "Storage root: {}", self.data_home.display())?;
        if let Some(homepage) = &self.info.homepage {
            writeln!(f, "Homepage: {homepage}")?;
        }
        if let Some(license) = &self.info.license {
            writeln!(f, "License: {license}")?;
        }
        writeln!(f, "Track files:")?;
        for (role, spec) in &self.schema.roles {
            let optional = if spec.required { "" } else { ", optional" };
            writeln!(f, "  {role} ({}{optional})", spec.kind)?;
        }
        if !self.remotes.is_empty() {
            let names: Vec<&str> = self.remotes.keys().map(String::as_str).collect();
            writeln!(f, "Remotes: {}", names.join(", "))?;
        }
        write!(f, "{}", "-".repeat(30))
    }
}
