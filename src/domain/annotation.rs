//! Structured annotation values and the parsers that read them from
//! plain-text annotation files.

use std::{collections::HashMap, path::Path};

use crate::{
    domain::schema::AnnotationKind,
    error::{DatasetError, Result},
};

#[derive(Debug, Clone, PartialEq)]
pub struct BeatData {
    pub times: Vec<f64>,
    /// Position of each beat in its bar, when the file has a second column.
    pub positions: Option<Vec<u32>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntervalData {
    pub intervals: Vec<(f64, f64)>,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct F0Data {
    pub times: Vec<f64>,
    pub frequencies: Vec<f64>,
    pub confidence: Option<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventData {
    pub onsets: Vec<f64>,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Annotation {
    Beats(BeatData),
    Intervals(IntervalData),
    F0(F0Data),
    Events(EventData),
    Text(Vec<String>),
}

impl Annotation {
    pub fn kind(&self) -> AnnotationKind {
        match self {
            Annotation::Beats(_) => AnnotationKind::Beats,
            Annotation::Intervals(_) => AnnotationKind::Intervals,
            Annotation::F0(_) => AnnotationKind::F0,
            Annotation::Events(_) => AnnotationKind::Events,
            Annotation::Text(_) => AnnotationKind::Text,
        }
    }

    /// Number of rows the annotation was built from.
    pub fn len(&self) -> usize {
        match self {
            Annotation::Beats(b) => b.times.len(),
            Annotation::Intervals(i) => i.intervals.len(),
            Annotation::F0(f) => f.times.len(),
            Annotation::Events(e) => e.onsets.len(),
            Annotation::Text(lines) => lines.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub type ParseFn = fn(&Path) -> Result<Annotation>;

/// Parsers keyed by annotation kind.
#[derive(Debug, Clone)]
pub struct AnnotationRegistry {
    parsers: HashMap<AnnotationKind, ParseFn>,
}

impl Default for AnnotationRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(AnnotationKind::Beats, parse_beats);
        registry.register(AnnotationKind::Intervals, parse_intervals);
        registry.register(AnnotationKind::F0, parse_f0);
        registry.register(AnnotationKind::Events, parse_events);
        registry.register(AnnotationKind::Text, parse_text);
        registry
    }
}

impl AnnotationRegistry {
    pub fn empty() -> Self {
        Self {
            parsers: HashMap::new(),
        }
    }

    /// Registers a parser, replacing the previous one for that kind.
    pub fn register(&mut self, kind: AnnotationKind, parser: ParseFn) {
        self.parsers.insert(kind, parser);
    }

    pub fn parse(&self, kind: AnnotationKind, path: &Path) -> Result<Annotation> {
        let parser = self.parsers.get(&kind).ok_or(DatasetError::NoParser(kind))?;
        parser(path)
    }
}

/// One non-empty, non-comment line split on commas, tabs and spaces.
struct Row<'a> {
    line: usize,
    fields: Vec<&'a str>,
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => DatasetError::NotFound {
            path: path.to_path_buf(),
        },
        _ => DatasetError::Io(e),
    })
}

fn rows(contents: &str) -> impl Iterator<Item = Row<'_>> {
    contents.lines().enumerate().filter_map(|(i, line)| {
        let line_trimmed = line.trim();
        if line_trimmed.is_empty() || line_trimmed.starts_with('#') {
            return None;
        }
        let fields = line_trimmed
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|f| !f.is_empty())
            .collect();
        Some(Row { line: i + 1, fields })
    })
}

impl Row<'_> {
    fn float(&self, path: &Path, idx: usize) -> Result<f64> {
        let field = self.fields.get(idx).ok_or_else(|| DatasetError::MalformedAnnotation {
            path: path.to_path_buf(),
            line: self.line,
            reason: format!("expected at least {} columns", idx + 1),
        })?;
        field.parse().map_err(|_| DatasetError::MalformedAnnotation {
            path: path.to_path_buf(),
            line: self.line,
            reason: format!("'{field}' is not a number"),
        })
    }

    fn label_from(&self, idx: usize) -> String {
        self.fields.get(idx..).map(|f| f.join(" ")).unwrap_or_default()
    }
}

pub fn parse_beats(path: &Path) -> Result<Annotation> {
    let contents = read_file(path)?;
    let mut times = Vec::new();
    let mut positions = Vec::new();
    let mut has_positions = true;

    for row in rows(&contents) {
        times.push(row.float(path, 0)?);
        match row.fields.get(1) {
            Some(pos) => {
                let pos = pos.parse::<u32>().map_err(|_| DatasetError::MalformedAnnotation {
                    path: path.to_path_buf(),
                    line: row.line,
                    reason: format!("'{pos}' is not a beat position"),
                })?;
                positions.push(pos);
            }
            None => has_positions = false,
        }
    }

    Ok(Annotation::Beats(BeatData {
        positions: (has_positions && !times.is_empty()).then_some(positions),
        times,
    }))
}

pub fn parse_intervals(path: &Path) -> Result<Annotation> {
    let contents = read_file(path)?;
    let mut intervals = Vec::new();
    let mut labels = Vec::new();

    for row in rows(&contents) {
        let start = row.float(path, 0)?;
        let end = row.float(path, 1)?;
        if end < start {
            return Err(DatasetError::MalformedAnnotation {
                path: path.to_path_buf(),
                line: row.line,
                reason: format!("interval ends ({end}) before it starts ({start})"),
            });
        }
        intervals.push((start, end));
        labels.push(row.label_from(2));
    }

    Ok(Annotation::Intervals(IntervalData { intervals, labels }))
}

pub fn parse_f0(path: &Path) -> Result<Annotation> {
    let contents = read_file(path)?;
    let mut times = Vec::new();
    let mut frequencies = Vec::new();
    let mut confidence = Vec::new();
    let mut has_confidence = true;

    for row in rows(&contents) {
        times.push(row.float(path, 0)?);
        frequencies.push(row.float(path, 1)?);
        if row.fields.len() > 2 {
            confidence.push(row.float(path, 2)?);
        } else {
            has_confidence = false;
        }
    }

    Ok(Annotation::F0(F0Data {
        confidence: (has_confidence && !times.is_empty()).then_some(confidence),
        times,
        frequencies,
    }))
}

pub fn parse_events(path: &Path) -> Result<Annotation> {
    let contents = read_file(path)?;
    let mut onsets = Vec::new();
    let mut labels = Vec::new();

    for row in rows(&contents) {
        onsets.push(row.float(path, 0)?);
        labels.push(row.label_from(1));
    }

    Ok(Annotation::Events(EventData { onsets, labels }))
}

pub fn parse_text(path: &Path) -> Result<Annotation> {
    let contents = read_file(path)?;
    Ok(Annotation::Text(
        contents.lines().map(|l| l.trim_end().to_string()).collect(),
    ))
}
