//! Single-level directory listings and name patterns.

use std::collections::BTreeMap;

use regex::Regex;

use super::{join_path, FileDescriptor};
use crate::error::Result;

/// Entry type reported by the remote listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    /// Anything else (`cdir`, `pdir`, links...). Kept, never projected.
    Other(String),
}

impl EntryKind {
    fn from_fact(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "file" => Self::File,
            "dir" => Self::Dir,
            _ => Self::Other(value.to_string()),
        }
    }
}

/// Facts the remote host reports for one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFacts {
    pub kind: EntryKind,
    /// Modification token, empty when the host reports none.
    pub modify: String,
    pub size: Option<u64>,
}

impl EntryFacts {
    pub fn file(modify: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::File,
            modify: modify.into(),
            size: None,
        }
    }

    pub fn dir(modify: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::Dir,
            modify: modify.into(),
            size: None,
        }
    }
}

/// A regular expression matched against the start of entry names.
#[derive(Debug, Clone)]
pub struct NamePattern {
    source: String,
    regex: Regex,
}

impl NamePattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(&format!("^(?:{})", pattern))?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// Entries of one remote directory, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryListing {
    directory: String,
    entries: BTreeMap<String, EntryFacts>,
}

impl DirectoryListing {
    pub fn new(directory: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Parse the lines of an MLSD response.
    ///
    /// Each line is `fact=value;fact=value; name`. Lines without a name are
    /// ignored.
    pub fn from_mlsd_lines<I, S>(directory: impl Into<String>, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut listing = Self::new(directory);
        for line in lines {
            if let Some((name, facts)) = parse_mlsd_line(line.as_ref()) {
                listing.insert(name, facts);
            }
        }
        listing
    }

    pub fn insert(&mut self, name: impl Into<String>, facts: EntryFacts) {
        self.entries.insert(name.into(), facts);
    }

    pub fn directory(&self) -> &str {
        &self.directory
    }

    pub fn entries(&self) -> &BTreeMap<String, EntryFacts> {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&EntryFacts> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn matching<'a>(
        &'a self,
        pattern: &'a NamePattern,
        kind: EntryKind,
    ) -> impl Iterator<Item = (&'a String, &'a EntryFacts)> + 'a {
        self.entries
            .iter()
            .filter(move |(name, facts)| facts.kind == kind && pattern.matches(name))
    }

    /// Names of subdirectories matching `pattern`.
    pub fn dirs_matching(&self, pattern: &NamePattern) -> Vec<String> {
        self.matching(pattern, EntryKind::Dir)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Names of files matching `pattern`.
    pub fn files_matching(&self, pattern: &NamePattern) -> Vec<String> {
        self.matching(pattern, EntryKind::File)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Full paths of subdirectories matching `pattern`, ascending.
    pub fn dir_paths_matching(&self, pattern: &NamePattern) -> Vec<String> {
        let mut paths: Vec<String> = self
            .matching(pattern, EntryKind::Dir)
            .map(|(name, _)| join_path(&self.directory, name))
            .collect();
        paths.sort();
        paths
    }

    /// Files matching `pattern` with their full paths, ascending by path.
    pub fn file_paths_matching(&self, pattern: &NamePattern) -> Vec<FileDescriptor> {
        let mut files: Vec<FileDescriptor> = self
            .matching(pattern, EntryKind::File)
            .map(|(name, facts)| {
                FileDescriptor::new(join_path(&self.directory, name), facts.modify.clone())
            })
            .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files
    }
}

fn parse_mlsd_line(line: &str) -> Option<(String, EntryFacts)> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (facts, name) = line.split_once(' ')?;
    if name.is_empty() {
        return None;
    }

    let mut kind = EntryKind::Other(String::new());
    let mut modify = String::new();
    let mut size = None;

    for pair in facts.split(';').filter(|p| !p.is_empty()) {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        match key.to_ascii_lowercase().as_str() {
            "type" => kind = EntryKind::from_fact(value),
            "modify" => modify = value.to_string(),
            "size" => size = value.parse().ok(),
            _ => {}
        }
    }

    Some((name.to_string(), EntryFacts { kind, modify, size }))
}
