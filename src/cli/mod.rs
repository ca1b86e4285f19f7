use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use crate::config::{self, Config};
use crate::domain::checksum::md5;
use crate::storage::dataset::Dataset;
use crate::storage::download::select_remotes;
use crate::storage::fs::{Layout, build_index};

#[derive(Parser)]
#[command(name = "mirdex")]
#[command(version = "0.1")]
#[command(about = "Index and validate local copies of music datasets")]
pub struct Cli {
    /// Path to the config TOML file
    #[arg(short, long, default_value = "mirdex.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check that every indexed file is present with the right checksum
    Validate {
        dataset: String,
        /// Index version, the dataset's default one if omitted
        #[arg(long)]
        version: Option<String>,
        /// Do not print the list of missing and invalid files
        #[arg(short, long)]
        quiet: bool,
    },
    /// Show dataset description, citation and license
    Info {
        dataset: String,
        #[arg(long)]
        version: Option<String>,
    },
    /// List tracks and their files
    Tracks {
        dataset: String,
        #[arg(long)]
        version: Option<String>,
    },
    /// Generate an index by scanning a local copy of a dataset
    MakeIndex {
        dataset: String,
        /// Root of the dataset tree, the dataset's storage root if omitted
        #[arg(long)]
        root: Option<PathBuf>,
        /// Version recorded in the index
        #[arg(long)]
        version: String,
        /// Output file, `<index_dir>/<dataset>_index_<version>.json` if omitted
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// List the remote files a dataset is downloaded from
    Remotes {
        dataset: String,
        /// Comma separated subset of remote names
        #[arg(long, value_delimiter = ',')]
        partial: Option<Vec<String>>,
    },
    /// Print the md5 checksum of a file
    Md5 { file: PathBuf },
}

fn open_dataset(cfg: &Config, name: &str, version: Option<&str>) -> anyhow::Result<Dataset> {
    let dataset_cfg = cfg.dataset(name)?;
    Ok(Dataset::from_config(dataset_cfg, cfg).with_version(version))
}

/// Entrypoint for CLI
pub fn run() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match execute(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Runs a command, returns whether it succeeded.
fn execute(cli: &Cli) -> anyhow::Result<bool> {
    if let Commands::Md5 { file } = &cli.command {
        println!("{}  {}", md5(file)?, file.to_string_lossy());
        return Ok(true);
    }

    let cfg = config::Config::load(&cli.config)?;

    match &cli.command {
        Commands::Validate {
            dataset,
            version,
            quiet,
        } => {
            let dataset = open_dataset(&cfg, dataset, version.as_deref())?;
            let report = dataset.validate(!quiet)?;
            if report.is_complete() {
                Ok(true)
            } else {
                println!(
                    "{} files missing, {} files with invalid checksums",
                    report.missing_count(),
                    report.invalid_count()
                );
                Ok(false)
            }
        }

        Commands::Info { dataset, version } => {
            let dataset = open_dataset(&cfg, dataset, version.as_deref())?;
            println!("{dataset}");
            let manifest = dataset.manifest()?;
            println!(
                "{} tracks, {} multitracks, {} indexed files",
                manifest.tracks.len(),
                manifest.mtrack_ids().count(),
                manifest.file_count()
            );
            if let Some(bibtex) = dataset.cite() {
                println!("Please cite:\n{bibtex}");
            }
            Ok(true)
        }

        Commands::Tracks { dataset, version } => {
            let dataset = open_dataset(&cfg, dataset, version.as_deref())?;
            for (track_id, track) in dataset.load_tracks()? {
                println!("Track: {track_id}");
                for (role, path) in track.paths() {
                    match path {
                        Some(path) => println!("    - {role}: {}", path.to_string_lossy()),
                        None => println!("    - {role}: not available"),
                    }
                }
            }
            Ok(true)
        }

        Commands::MakeIndex {
            dataset,
            root,
            version,
            out,
        } => {
            let dataset_cfg = cfg.dataset(dataset)?;
            let storage_root = Dataset::from_config(dataset_cfg, &cfg)
                .data_home()
                .to_path_buf();
            let root = root.clone().unwrap_or(storage_root);

            let mut layout = Layout::from_schema(&dataset_cfg.schema());
            if let Some(meta) = &dataset_cfg.metadata_path {
                layout = layout.with_metadata_file(meta, "metadata");
            }

            let manifest = build_index(&root, &layout, version)?;
            let out = out.clone().unwrap_or_else(|| {
                cfg.index_dir
                    .join(format!("{}_index_{}.json", dataset_cfg.name, version))
            });
            manifest.save(&out)?;
            println!(
                "Index of {} tracks written to {}",
                manifest.tracks.len(),
                out.to_string_lossy()
            );
            Ok(true)
        }

        Commands::Remotes { dataset, partial } => {
            let dataset_cfg = cfg.dataset(dataset)?;
            let keys: Option<Vec<&str>> = partial
                .as_ref()
                .map(|p| p.iter().map(String::as_str).collect());
            let remotes = select_remotes(&dataset_cfg.name, &dataset_cfg.remotes, keys.as_deref())?;
            for (name, remote) in &remotes {
                println!("{name}: {} ({})", remote.filename, remote.url);
                println!("    checksum: {}", remote.checksum);
                if let Some(dir) = &remote.destination_dir {
                    println!("    destination: {dir}");
                }
            }
            Ok(true)
        }

        Commands::Md5 { .. } => Ok(true),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_validate_and_remotes() {
        let cli = Cli::parse_from(["mirdex", "-c", "x.toml", "validate", "beatles", "--quiet"]);
        assert_eq!(cli.config, PathBuf::from("x.toml"));
        assert!(matches!(
            cli.command,
            Commands::Validate { ref dataset, version: None, quiet: true } if dataset == "beatles"
        ));

        let cli = Cli::parse_from(["mirdex", "remotes", "beatles", "--partial", "audio,annotations"]);
        match cli.command {
            Commands::Remotes { partial, .. } => {
                assert_eq!(partial, Some(vec!["audio".to_string(), "annotations".to_string()]))
            }
            _ => panic!("expected remotes command"),
        }
    }

    #[test]
    fn make_index_then_validate_through_config() -> anyhow::Result<()> {
        let tmp = tempfile::TempDir::new()?;
        let home = tmp.path().join("home");
        let index_dir = tmp.path().join("indexes");
        std::fs::create_dir_all(home.join("toy/audio"))?;
        std::fs::create_dir_all(&index_dir)?;
        std::fs::write(home.join("toy/audio/a.wav"), b"aaa")?;

        let config_path = tmp.path().join("mirdex.toml");
        std::fs::write(
            &config_path,
            format!(
                r#"
version = 1
data_home = "{}"
index_dir = "{}"

[[datasets]]
name = "toy"
default_version = "1.0"

[datasets.roles.audio]
kind = "audio"
"#,
                home.to_string_lossy(),
                index_dir.to_string_lossy()
            ),
        )?;
        let config = config_path.to_string_lossy().to_string();

        let make = Cli::parse_from(["mirdex", "-c", config.as_str(), "make-index", "toy", "--version", "1.0"]);
        assert!(execute(&make)?);
        assert!(index_dir.join("toy_index_1.0.json").is_file());

        let validate = Cli::parse_from(["mirdex", "-c", config.as_str(), "validate", "toy", "-q"]);
        assert!(execute(&validate)?);

        std::fs::write(home.join("toy/audio/a.wav"), b"bbb")?;
        assert!(!execute(&validate)?);
        Ok(())
    }
}
