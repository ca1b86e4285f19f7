use std::{collections::BTreeMap, fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::DatasetError;

/// What a track file role holds, and therefore how it is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationKind {
    /// Raw audio, decoded on demand and never cached.
    Audio,
    Beats,
    /// `start end label` rows: chords, sections, keys.
    Intervals,
    /// `time frequency [confidence]` rows.
    F0,
    /// `onset label` rows.
    Events,
    Text,
}

impl AnnotationKind {
    pub const ALL: &[AnnotationKind] = &[
        AnnotationKind::Audio,
        AnnotationKind::Beats,
        AnnotationKind::Intervals,
        AnnotationKind::F0,
        AnnotationKind::Events,
        AnnotationKind::Text,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnnotationKind::Audio => "audio",
            AnnotationKind::Beats => "beats",
            AnnotationKind::Intervals => "intervals",
            AnnotationKind::F0 => "f0",
            AnnotationKind::Events => "events",
            AnnotationKind::Text => "text",
        }
    }
}

impl Display for AnnotationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AnnotationKind {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| DatasetError::UnknownAnnotationKind(s.to_string()))
    }
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSpec {
    pub kind: AnnotationKind,
    /// Optional roles may be `[null, null]` in the index for some tracks.
    #[serde(default = "default_required")]
    pub required: bool,
}

impl RoleSpec {
    pub fn new(kind: AnnotationKind) -> Self {
        Self {
            kind,
            required: true,
        }
    }

    pub fn optional(kind: AnnotationKind) -> Self {
        Self {
            kind,
            required: false,
        }
    }
}

/// Declarative description of the files a dataset's tracks carry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DatasetSchema {
    #[serde(default)]
    pub roles: BTreeMap<String, RoleSpec>,
}

impl DatasetSchema {
    pub fn with_role(mut self, role: &str, spec: RoleSpec) -> Self {
        self.roles.insert(role.to_string(), spec);
        self
    }

    pub fn role(&self, role: &str) -> Option<&RoleSpec> {
        self.roles.get(role)
    }

    /// Roles that hold parsed annotations, as opposed to raw audio.
    pub fn annotation_roles(&self) -> impl Iterator<Item = (&str, &RoleSpec)> {
        self.roles
            .iter()
            .filter(|(_, spec)| spec.kind != AnnotationKind::Audio)
            .map(|(role, spec)| (role.as_str(), spec))
    }
}
