//! Incremental synchronization of the USCRN product archive into SQLite.
//!
//! Provides:
//! - Remote archive access (FTP and in-memory) behind small capability traits
//! - Discovery of product files and change detection against an import ledger
//! - Per-product normalization of raw text lines into typed rows
//! - An SQLite store merging each file atomically, and the pipeline tying
//!   it all together

pub mod discovery;
pub mod error;
pub mod normalize;
pub mod product;
pub mod remote;
pub mod revision;
pub mod store;
pub mod sync;

pub use error::{RecordError, Result, SyncError};
pub use normalize::{Normalizer, Row, Value};
pub use product::{Product, ProductSpec, DEFAULT_PRODUCTS_ROOT};
pub use remote::ftp::FtpConnector;
pub use remote::memory::MemoryRemote;
pub use remote::{FileDescriptor, RemoteConfig, RemoteConnector};
pub use store::{MergeOutcome, SyncStore};
pub use sync::{FileFailure, SyncPlan, SyncReport, Synchronizer};
