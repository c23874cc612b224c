//! Candidate file discovery.
//!
//! Walks a product's directory on the remote archive and returns the files
//! matching its name pattern. The returned order is the processing order:
//! ascending by path, and for year-partitioned products year by year.

use tracing::{debug, info};

use crate::error::Result;
use crate::product::{Layout, Product, YEAR_PATTERN};
use crate::remote::{FileDescriptor, NamePattern, RemoteIndex};

/// Files matching `pattern` directly inside `directory`, ascending by path.
pub async fn scan_files<I>(
    index: &mut I,
    directory: &str,
    pattern: &NamePattern,
) -> Result<Vec<FileDescriptor>>
where
    I: RemoteIndex + ?Sized,
{
    let listing = index.list(directory).await?;
    let files = listing.file_paths_matching(pattern);
    debug!(directory = %directory, files = files.len(), "Scanned directory");
    Ok(files)
}

/// Files matching `pattern` inside each 4-digit year directory below
/// `directory`, years ascending, then paths ascending within a year.
pub async fn scan_years<I>(
    index: &mut I,
    directory: &str,
    pattern: &NamePattern,
) -> Result<Vec<FileDescriptor>>
where
    I: RemoteIndex + ?Sized,
{
    let years = NamePattern::new(YEAR_PATTERN)?;
    let year_dirs = index.list(directory).await?.dir_paths_matching(&years);

    let mut files = Vec::new();
    for year_dir in year_dirs {
        files.extend(scan_files(index, &year_dir, pattern).await?);
    }
    Ok(files)
}

/// Discover every candidate file of `product` below the products `root`.
pub async fn discover<I>(index: &mut I, product: Product, root: &str) -> Result<Vec<FileDescriptor>>
where
    I: RemoteIndex + ?Sized,
{
    let spec = product.spec();
    let directory = product.directory(root);
    let pattern = NamePattern::new(spec.file_pattern)?;

    let files = match spec.layout {
        Layout::Flat => scan_files(index, &directory, &pattern).await?,
        Layout::YearPartitioned => scan_years(index, &directory, &pattern).await?,
    };

    info!(
        product = %product,
        directory = %directory,
        candidates = files.len(),
        "Discovered product files"
    );
    Ok(files)
}
