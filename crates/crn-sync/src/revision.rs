//! Change detection against the import ledger.

use std::collections::HashMap;

use crate::remote::FileDescriptor;

/// Read access to recorded modification tokens, keyed by path.
pub trait LedgerLookup {
    fn recorded_token(&self, path: &str) -> Option<&str>;
}

impl LedgerLookup for HashMap<String, String> {
    fn recorded_token(&self, path: &str) -> Option<&str> {
        self.get(path).map(String::as_str)
    }
}

/// Whether `candidate` must be (re)imported given the ledger.
///
/// A file is stale when the ledger has never seen its path or recorded a
/// different token. Tokens are opaque and compared as strings.
pub fn is_stale<L: LedgerLookup + ?Sized>(candidate: &FileDescriptor, ledger: &L) -> bool {
    match ledger.recorded_token(&candidate.path) {
        Some(token) => token != candidate.modification_token,
        None => true,
    }
}

/// Candidates needing reprocessing, in their original order.
pub fn stale_files<L: LedgerLookup + ?Sized>(
    candidates: Vec<FileDescriptor>,
    ledger: &L,
) -> Vec<FileDescriptor> {
    candidates
        .into_iter()
        .filter(|candidate| is_stale(candidate, ledger))
        .collect()
}
