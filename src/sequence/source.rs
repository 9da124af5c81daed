// Where mode and impulse documents come from
//
// On the rig they live under a data root as modes/<name>.json and
// impulses/<name>.json. Names are checked here so nothing downstream has to.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::document::SequenceDocument;
use crate::config::MAX_NAME_LEN;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Invalid name {0:?}")]
    InvalidName(String),

    #[error("{kind} '{name}' not found")]
    NotFound { kind: SequenceKind, name: String },

    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Document has no 'sequence' array")]
    MissingSteps,

    #[error("Document has an empty sequence")]
    EmptySteps,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SequenceKind {
    Mode,
    Impulse,
}

impl SequenceKind {
    pub fn dir(self) -> &'static str {
        match self {
            SequenceKind::Mode => "modes",
            SequenceKind::Impulse => "impulses",
        }
    }
}

impl std::fmt::Display for SequenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SequenceKind::Mode => write!(f, "Mode"),
            SequenceKind::Impulse => write!(f, "Impulse"),
        }
    }
}

/// Reject names that could escape the data root or overflow the name cap
pub fn validate_name(name: &str) -> Result<(), LoadError> {
    let ok = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && !name.starts_with('.')
        && !name.contains(['/', '\\']);
    if ok {
        Ok(())
    } else {
        Err(LoadError::InvalidName(name.to_string()))
    }
}

pub trait DocumentSource: Send {
    fn load(&self, kind: SequenceKind, name: &str) -> Result<SequenceDocument, LoadError>;

    /// Available names, sorted
    fn list(&self, kind: SequenceKind) -> Vec<String>;
}

/// Documents on disk under a data root
#[derive(Debug, Clone)]
pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, kind: SequenceKind, name: &str) -> PathBuf {
        self.root.join(kind.dir()).join(format!("{}.json", name))
    }
}

impl DocumentSource for DirSource {
    fn load(&self, kind: SequenceKind, name: &str) -> Result<SequenceDocument, LoadError> {
        validate_name(name)?;
        let path = self.path(kind, name);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LoadError::NotFound {
                    kind,
                    name: name.to_string(),
                });
            }
            Err(source) => return Err(LoadError::Io { path, source }),
        };
        SequenceDocument::parse(&text)
    }

    fn list(&self, kind: SequenceKind) -> Vec<String> {
        let dir = self.root.join(kind.dir());
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Cannot list {}: {}", dir.display(), e);
                return Vec::new();
            }
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                name.strip_suffix(".json").map(str::to_string)
            })
            .filter(|name| validate_name(name).is_ok())
            .collect();
        names.sort();
        names
    }
}

/// Raw document text held in memory (tests, simulation)
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    docs: BTreeMap<(SequenceKind, String), String>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: SequenceKind, name: &str, text: &str) {
        self.docs.insert((kind, name.to_string()), text.to_string());
    }

    pub fn with(mut self, kind: SequenceKind, name: &str, text: &str) -> Self {
        self.insert(kind, name, text);
        self
    }
}

impl DocumentSource for MemorySource {
    fn load(&self, kind: SequenceKind, name: &str) -> Result<SequenceDocument, LoadError> {
        validate_name(name)?;
        let text = self
            .docs
            .get(&(kind, name.to_string()))
            .ok_or_else(|| LoadError::NotFound {
                kind,
                name: name.to_string(),
            })?;
        SequenceDocument::parse(text)
    }

    fn list(&self, kind: SequenceKind) -> Vec<String> {
        // BTreeMap keys are already ordered
        self.docs
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, name)| name.clone())
            .collect()
    }
}
