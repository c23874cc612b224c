//! Remote archive access.
//!
//! The engine only talks to the remote archive through the capability
//! traits in this module:
//!
//! - [`RemoteIndex`] lists a single directory level
//! - [`ContentFetcher`] streams the lines of one file
//! - [`RemoteConnector`] opens a [`RemoteSession`] combining both
//!
//! [`ftp::FtpConnector`] is the production adapter; [`memory::MemoryRemote`]
//! serves a fixed in-memory tree for tests.

pub mod ftp;
pub mod listing;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::product::DEFAULT_PRODUCTS_ROOT;

pub use listing::{DirectoryListing, EntryFacts, EntryKind, NamePattern};

/// A remote file and the modification token it currently carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub path: String,
    pub modification_token: String,
}

impl FileDescriptor {
    pub fn new(path: impl Into<String>, modification_token: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            modification_token: modification_token.into(),
        }
    }
}

/// Lines of one remote file, produced as they arrive.
pub type LineStream<'a> = BoxStream<'a, Result<String>>;

/// Lists the immediate entries of a remote directory.
#[async_trait]
pub trait RemoteIndex: Send {
    /// Fails with `RemoteUnavailable` if the directory cannot be listed.
    async fn list(&mut self, directory: &str) -> Result<DirectoryListing>;
}

/// Retrieves the content of a remote file.
#[async_trait]
pub trait ContentFetcher: Send {
    /// The returned stream is finite and cannot be restarted; fetching the
    /// same path again re-opens the transfer. Failures surface as
    /// `SyncError::Fetch`.
    async fn fetch<'a>(&'a mut self, path: &str) -> Result<LineStream<'a>>;
}

/// One open connection to the remote archive.
#[async_trait]
pub trait RemoteSession: RemoteIndex + ContentFetcher {
    /// Politely end the session. Dropping a session also releases it, so
    /// the session must not be used after `close`.
    async fn close(&mut self) -> Result<()>;
}

/// Opens sessions against the remote archive.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn RemoteSession>>;
}

/// Connection settings for the remote archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Inactivity timeout applied to every connect and read.
    pub timeout_secs: u64,
    /// Root of the products tree.
    pub root: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: "ftp.ncdc.noaa.gov".to_string(),
            port: 21,
            user: "anonymous".to_string(),
            password: String::new(),
            timeout_secs: 100,
            root: DEFAULT_PRODUCTS_ROOT.to_string(),
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Join a directory and an entry name into a remote path.
pub fn join_path(directory: &str, name: &str) -> String {
    format!("{}/{}", directory.trim_end_matches('/'), name)
}
