//! Checks a local copy of a dataset against its index.
//!
//! The check is driven by the index: every referenced file is classified as
//! valid, missing or having an invalid checksum. Files the index marks as not
//! applicable are skipped, and local files the index does not mention are
//! never looked at.

use std::{
    collections::BTreeMap,
    fmt::Display,
    io::{self, Write},
    path::{Path, PathBuf},
};

use crate::{
    domain::{
        checksum::Checksum,
        manifest::{FileEntry, FileMap, Manifest, TRACKS_KEY},
    },
    error::Result,
};

pub const SUCCESS_LINE: &str = "Success: the dataset is complete and all files are valid.";
const SEPARATOR: &str = "------------------------------";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Section {
    Metadata,
    Tracks,
    Multitracks,
}

impl Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Section::Metadata => write!(f, "metadata"),
            Section::Tracks => write!(f, "tracks"),
            Section::Multitracks => write!(f, "multitracks"),
        }
    }
}

/// Section -> local paths, in index order.
pub type SectionReport = BTreeMap<Section, Vec<PathBuf>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Valid,
    Missing,
    InvalidChecksum,
    /// The index marks the file as intentionally absent.
    NotApplicable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub missing_files: SectionReport,
    pub invalid_checksums: SectionReport,
}

impl ValidationReport {
    pub fn is_complete(&self) -> bool {
        self.missing_files.values().all(Vec::is_empty)
            && self.invalid_checksums.values().all(Vec::is_empty)
    }

    pub fn missing_count(&self) -> usize {
        self.missing_files.values().map(Vec::len).sum()
    }

    pub fn invalid_count(&self) -> usize {
        self.invalid_checksums.values().map(Vec::len).sum()
    }

    fn record(&mut self, section: Section, status: FileStatus, path: PathBuf) {
        let target = match status {
            FileStatus::Missing => &mut self.missing_files,
            FileStatus::InvalidChecksum => &mut self.invalid_checksums,
            FileStatus::Valid | FileStatus::NotApplicable => return,
        };
        target.entry(section).or_default().push(path);
    }

    pub fn write_summary<W: Write>(&self, out: &mut W) -> io::Result<()> {
        if self.is_complete() {
            return writeln!(out, "{SUCCESS_LINE}");
        }

        for (section, paths) in self.missing_files.iter().filter(|(_, p)| !p.is_empty()) {
            writeln!(out, "Files missing for {section}:")?;
            for path in paths {
                writeln!(out, "{}", path.display())?;
            }
            writeln!(out, "{SEPARATOR}")?;
        }
        for (section, paths) in self.invalid_checksums.iter().filter(|(_, p)| !p.is_empty()) {
            writeln!(out, "Invalid checksums for {section}:")?;
            for path in paths {
                writeln!(out, "{}", path.display())?;
            }
            writeln!(out, "{SEPARATOR}")?;
        }
        Ok(())
    }

    pub fn print_summary(&self) -> io::Result<()> {
        self.write_summary(&mut io::stdout().lock())
    }
}

/// Classifies one index entry against the local file system.
///
/// Only errors other than the file being absent are returned as `Err`.
pub fn check_file(entry: &FileEntry, data_home: &Path) -> io::Result<FileStatus> {
    let Some(file) = entry else {
        return Ok(FileStatus::NotApplicable);
    };
    let local = file.local_path(data_home);
    if !local.exists() {
        return Ok(FileStatus::Missing);
    }
    let Some(expected) = &file.checksum else {
        return Ok(FileStatus::Valid);
    };
    if Checksum::of_file(&local)?.matches(expected) {
        Ok(FileStatus::Valid)
    } else {
        Ok(FileStatus::InvalidChecksum)
    }
}

/// Classifies every file of one flat role map into the report.
pub fn validate_files(
    files: &FileMap,
    data_home: &Path,
    section: Section,
    report: &mut ValidationReport,
) -> Result<()> {
    for (role, entry) in files {
        // member list of a multitrack, not a file
        if role == TRACKS_KEY {
            continue;
        }
        let status = check_file(entry, data_home)?;
        if let Some(file) = entry {
            let local = file.local_path(data_home);
            log::debug!("{section} {role} {}: {status:?}", local.display());
            report.record(section, status, local);
        }
    }
    Ok(())
}

pub fn validate(manifest: &Manifest, data_home: &Path, verbose: bool) -> Result<ValidationReport> {
    log::info!(
        "validating {} indexed files (index version {}) under {}",
        manifest.file_count(),
        manifest.version,
        data_home.display()
    );
    let mut report = ValidationReport::default();

    if let Some(metadata) = &manifest.metadata {
        validate_files(metadata, data_home, Section::Metadata, &mut report)?;
    }
    for files in manifest.tracks.values() {
        validate_files(files, data_home, Section::Tracks, &mut report)?;
    }
    for entry in manifest.multitracks.iter().flat_map(|m| m.values()) {
        validate_files(&entry.files, data_home, Section::Multitracks, &mut report)?;
    }

    log::info!(
        "validation finished: {} missing, {} invalid",
        report.missing_count(),
        report.invalid_count()
    );
    if verbose {
        report.print_summary()?;
    }
    Ok(report)
}
