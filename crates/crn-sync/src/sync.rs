//! Product synchronization pipeline.
//!
//! For one product: discover candidates over a first session, filter them
//! against a ledger snapshot, then fetch and merge the stale files one at
//! a time over a second session. A file that fails to fetch or parse is
//! recorded in the report and skipped; the session it was using is
//! discarded and the next file gets a fresh one.

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::discovery;
use crate::error::Result;
use crate::normalize::Normalizer;
use crate::product::{Product, DEFAULT_PRODUCTS_ROOT};
use crate::remote::{FileDescriptor, RemoteConnector, RemoteSession};
use crate::revision::stale_files;
use crate::store::{MergeOutcome, SyncStore};

/// A file that could not be imported during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub path: String,
    pub error: String,
}

/// Summary of one product synchronization.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub product: Product,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Files found on the remote archive.
    pub candidates: usize,
    /// Files whose token differed from the ledger.
    pub stale: usize,
    /// Files merged and recorded in the ledger.
    pub imported: usize,
    pub rows_merged: usize,
    pub failures: Vec<FileFailure>,
}

impl SyncReport {
    fn new(product: Product) -> Self {
        let now = Utc::now();
        Self {
            product,
            started_at: now,
            finished_at: now,
            candidates: 0,
            stale: 0,
            imported: 0,
            rows_merged: 0,
            failures: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Files a synchronization would re-import, without touching storage.
#[derive(Debug, Clone, Serialize)]
pub struct SyncPlan {
    pub product: Product,
    pub candidates: usize,
    pub stale: Vec<FileDescriptor>,
}

/// Mirrors products from a remote archive into a [`SyncStore`].
pub struct Synchronizer<C> {
    connector: C,
    store: SyncStore,
    root: String,
}

impl<C: RemoteConnector> Synchronizer<C> {
    pub fn new(connector: C, store: SyncStore) -> Self {
        Self {
            connector,
            store,
            root: DEFAULT_PRODUCTS_ROOT.to_string(),
        }
    }

    /// Use a different products root directory on the remote archive.
    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    pub fn store(&self) -> &SyncStore {
        &self.store
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// List the candidate files of `product` over a dedicated session.
    pub async fn discover(&self, product: Product) -> Result<Vec<FileDescriptor>> {
        let mut session = self.connector.connect().await?;
        let discovered = discovery::discover(session.as_mut(), product, &self.root).await;
        close_quietly(session).await;
        discovered
    }

    /// Work out which files of `product` are stale.
    pub async fn plan(&self, product: Product) -> Result<SyncPlan> {
        let candidates = self.discover(product).await?;
        let ledger = self.store.ledger().await?;
        let count = candidates.len();
        let stale = stale_files(candidates, &ledger);

        Ok(SyncPlan {
            product,
            candidates: count,
            stale,
        })
    }

    /// Bring the table of `product` up to date with the remote archive.
    ///
    /// Per-file fetch and parse errors end up in the report. Remote
    /// connection and storage errors abort the call; files committed
    /// before the error stay committed.
    #[instrument(skip(self))]
    pub async fn sync_product(&self, product: Product) -> Result<SyncReport> {
        let mut report = SyncReport::new(product);

        let plan = self.plan(product).await?;
        report.candidates = plan.candidates;
        report.stale = plan.stale.len();
        info!(
            candidates = report.candidates,
            stale = report.stale,
            "Planned synchronization"
        );

        let normalizer = Normalizer::for_product(product);
        let mut session: Option<Box<dyn RemoteSession>> = None;

        for file in &plan.stale {
            let mut active = match session.take() {
                Some(active) => active,
                None => self.connector.connect().await?,
            };

            match self.import_file(active.as_mut(), file, &normalizer).await {
                Ok(outcome) => {
                    report.imported += 1;
                    report.rows_merged += outcome.rows;
                    counter!("crn_files_imported_total", "product" => product.name()).increment(1);
                    counter!("crn_rows_merged_total", "product" => product.name())
                        .increment(outcome.rows as u64);
                    session = Some(active);
                }
                Err(e) if e.is_file_scoped() => {
                    warn!(path = %file.path, error = %e, "File import failed, skipping");
                    counter!("crn_file_failures_total", "product" => product.name()).increment(1);
                    report.failures.push(FileFailure {
                        path: file.path.clone(),
                        error: e.to_string(),
                    });
                    // The transfer may have been cut short, so the session
                    // is in an unknown state.
                    drop(active);
                }
                Err(e) => {
                    close_quietly(active).await;
                    return Err(e);
                }
            }
        }

        if let Some(active) = session {
            close_quietly(active).await;
        }

        report.finished_at = Utc::now();
        info!(
            imported = report.imported,
            rows = report.rows_merged,
            failures = report.failures.len(),
            "Synchronization finished"
        );
        Ok(report)
    }

    /// Synchronize `products` in order, stopping at the first fatal error.
    pub async fn sync_all(&self, products: &[Product]) -> Result<Vec<SyncReport>> {
        let mut reports = Vec::with_capacity(products.len());
        for &product in products {
            reports.push(self.sync_product(product).await?);
        }
        Ok(reports)
    }

    async fn import_file(
        &self,
        session: &mut dyn RemoteSession,
        file: &FileDescriptor,
        normalizer: &Normalizer,
    ) -> Result<MergeOutcome> {
        debug!(path = %file.path, token = %file.modification_token, "Importing file");
        let lines = session.fetch(&file.path).await?;
        self.store.merge_file(file, normalizer, lines).await
    }
}

async fn close_quietly(mut session: Box<dyn RemoteSession>) {
    if let Err(e) = session.close().await {
        debug!(error = %e, "Ignoring error while closing remote session");
    }
}
