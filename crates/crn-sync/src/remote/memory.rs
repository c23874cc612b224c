//! In-memory remote archive.
//!
//! Serves a fixed tree of directories and files. Adding a file registers
//! it (and every missing parent directory) in the parent listings, so a
//! test only has to describe the files it cares about. Fetches can be made
//! to fail part-way through, and connections and fetches are counted.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use super::{
    ContentFetcher, DirectoryListing, EntryFacts, EntryKind, LineStream, RemoteConnector,
    RemoteIndex, RemoteSession,
};
use crate::error::{Result, SyncError};

#[derive(Debug, Clone)]
struct MemoryFile {
    lines: Vec<String>,
    /// Fail the transfer after this many lines have been delivered.
    fail_after: Option<usize>,
}

#[derive(Debug, Default)]
struct Tree {
    directories: BTreeMap<String, DirectoryListing>,
    files: BTreeMap<String, MemoryFile>,
}

#[derive(Debug, Default)]
struct Shared {
    tree: Mutex<Tree>,
    connects: AtomicUsize,
    fetches: AtomicUsize,
    unavailable: Mutex<bool>,
    close_fails: AtomicBool,
}

/// A remote archive held in memory. Clones share the same tree.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemote {
    shared: Arc<Shared>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a file.
    pub fn put_file<I, S>(&self, path: &str, modify: &str, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let file = MemoryFile {
            lines: lines.into_iter().map(Into::into).collect(),
            fail_after: None,
        };

        let mut tree = self.lock_tree();
        let (parent, name) = split_path(path);
        tree.register(parent, name, EntryFacts::file(modify));
        tree.files.insert(path.to_string(), file);
    }

    /// Add an empty directory (and its parents).
    pub fn put_dir(&self, path: &str) {
        let mut tree = self.lock_tree();
        let path = path.trim_end_matches('/');
        tree.directories
            .entry(path.to_string())
            .or_insert_with(|| DirectoryListing::new(path));
        let (parent, name) = split_path(path);
        if !name.is_empty() {
            tree.register(parent, name, EntryFacts::dir(""));
        }
    }

    /// Add a non-file, non-directory entry (a link, say) to a directory.
    pub fn put_other(&self, directory: &str, name: &str, kind: &str) {
        let mut tree = self.lock_tree();
        let facts = EntryFacts {
            kind: EntryKind::Other(kind.to_string()),
            modify: String::new(),
            size: None,
        };
        tree.register(directory.trim_end_matches('/'), name, facts);
    }

    /// Make transfers of `path` fail after `lines` lines.
    pub fn fail_fetch_after(&self, path: &str, lines: usize) {
        if let Some(file) = self.lock_tree().files.get_mut(path) {
            file.fail_after = Some(lines);
        }
    }

    /// Stop serving a file's content while it stays listed, as if it
    /// vanished between discovery and retrieval.
    pub fn delete_content(&self, path: &str) {
        self.lock_tree().files.remove(path);
    }

    /// Refuse every new connection while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut flag) = self.shared.unavailable.lock() {
            *flag = unavailable;
        }
    }

    /// Make `close` report an error on every session while set.
    pub fn set_close_fails(&self, fails: bool) {
        self.shared.close_fails.store(fails, Ordering::SeqCst);
    }

    /// Number of sessions opened so far.
    pub fn connect_count(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// Number of fetches started so far.
    pub fn fetch_count(&self) -> usize {
        self.shared.fetches.load(Ordering::SeqCst)
    }

    fn lock_tree(&self) -> std::sync::MutexGuard<'_, Tree> {
        // A poisoned lock only means a test panicked mid-update.
        self.shared
            .tree
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Tree {
    fn register(&mut self, directory: &str, name: &str, facts: EntryFacts) {
        let mut current = directory.to_string();
        let mut child = name.to_string();
        let mut child_facts = facts;

        // Walk up so every ancestor lists its child directory.
        loop {
            let listing = self
                .directories
                .entry(current.clone())
                .or_insert_with(|| DirectoryListing::new(current.clone()));
            let known = listing.get(&child).is_some();
            if !known || child_facts.kind != EntryKind::Dir {
                listing.insert(child.clone(), child_facts);
            }
            if known && !current.is_empty() {
                break;
            }

            let (parent, name) = split_path(&current);
            if name.is_empty() {
                break;
            }
            child = name.to_string();
            current = parent.to_string();
            child_facts = EntryFacts::dir("");
        }
    }
}

fn split_path(path: &str) -> (&str, &str) {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => ("", path),
    }
}

#[async_trait]
impl RemoteConnector for MemoryRemote {
    async fn connect(&self) -> Result<Box<dyn RemoteSession>> {
        let unavailable = self
            .shared
            .unavailable
            .lock()
            .map(|flag| *flag)
            .unwrap_or(false);
        if unavailable {
            return Err(SyncError::RemoteUnavailable(
                "memory remote refused connection".to_string(),
            ));
        }

        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            remote: self.clone(),
            closed: false,
        }))
    }
}

struct MemorySession {
    remote: MemoryRemote,
    closed: bool,
}

impl MemorySession {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(SyncError::RemoteUnavailable("session closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteIndex for MemorySession {
    async fn list(&mut self, directory: &str) -> Result<DirectoryListing> {
        self.ensure_open()?;
        let directory = directory.trim_end_matches('/');
        self.remote
            .lock_tree()
            .directories
            .get(directory)
            .cloned()
            .ok_or_else(|| {
                SyncError::RemoteUnavailable(format!("no such directory: {}", directory))
            })
    }
}

#[async_trait]
impl ContentFetcher for MemorySession {
    async fn fetch<'a>(&'a mut self, path: &str) -> Result<LineStream<'a>> {
        self.ensure_open()?;
        self.remote.shared.fetches.fetch_add(1, Ordering::SeqCst);

        let file = self
            .remote
            .lock_tree()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| SyncError::Fetch {
                path: path.to_string(),
                reason: "no such file".to_string(),
            })?;

        let delivered = file.fail_after.unwrap_or(file.lines.len());
        let mut items: Vec<Result<String>> =
            file.lines.into_iter().take(delivered).map(Ok).collect();
        if file.fail_after.is_some() {
            items.push(Err(SyncError::Fetch {
                path: path.to_string(),
                reason: "transfer interrupted".to_string(),
            }));
        }

        Ok(stream::iter(items).boxed())
    }
}

#[async_trait]
impl RemoteSession for MemorySession {
    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        if self.remote.shared.close_fails.load(Ordering::SeqCst) {
            return Err(SyncError::RemoteUnavailable("QUIT rejected".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;

    use super::*;
    use crate::remote::NamePattern;

    #[tokio::test]
    async fn test_put_file_registers_parents() {
        let remote = MemoryRemote::new();
        remote.put_file("/products/hourly02/2009/a.txt", "T1", ["x"]);

        let mut session = remote.connect().await.unwrap();
        let root = session.list("/products/hourly02").await.unwrap();
        let years = NamePattern::new(r"\d{4}").unwrap();
        assert_eq!(root.dirs_matching(&years), vec!["2009"]);

        let year = session.list("/products/hourly02/2009").await.unwrap();
        assert_eq!(year.get("a.txt").unwrap().modify, "T1");

        let top = session.list("/products").await.unwrap();
        assert_eq!(top.get("hourly02").unwrap().kind, EntryKind::Dir);
    }

    #[tokio::test]
    async fn test_fetch_lines_and_counts() {
        let remote = MemoryRemote::new();
        remote.put_file("/d/a.txt", "T1", ["one", "two"]);

        let mut session = remote.connect().await.unwrap();
        let lines: Vec<String> = session.fetch("/d/a.txt").await.unwrap().try_collect().await.unwrap();
        assert_eq!(lines, vec!["one", "two"]);
        assert_eq!(remote.fetch_count(), 1);
        assert_eq!(remote.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_midway() {
        let remote = MemoryRemote::new();
        remote.put_file("/d/a.txt", "T1", ["one", "two", "three"]);
        remote.fail_fetch_after("/d/a.txt", 1);

        let mut session = remote.connect().await.unwrap();
        let mut lines = session.fetch("/d/a.txt").await.unwrap();
        assert_eq!(lines.try_next().await.unwrap(), Some("one".to_string()));
        assert!(matches!(lines.try_next().await, Err(SyncError::Fetch { .. })));
    }

    #[tokio::test]
    async fn test_missing_paths() {
        let remote = MemoryRemote::new();
        let mut session = remote.connect().await.unwrap();
        assert!(matches!(
            session.list("/nowhere").await,
            Err(SyncError::RemoteUnavailable(_))
        ));
        assert!(matches!(
            session.fetch("/nowhere/a.txt").await,
            Err(SyncError::Fetch { .. })
        ));
    }

    #[tokio::test]
    async fn test_unavailable() {
        let remote = MemoryRemote::new();
        remote.set_unavailable(true);
        assert!(remote.connect().await.is_err());
        remote.set_unavailable(false);
        assert!(remote.connect().await.is_ok());
    }
}
