use thiserror::Error;

use facematch_store::StoreError;

/// Errors surfaced inside the matcher.
///
/// Nothing here is fatal: every failure degrades to "retry on the next
/// trigger" and [`crate::Matcher::on_new_faces`] only logs.
#[derive(Debug, Error)]
pub enum MatcherError {
    #[error("matcher: {0}")]
    Store(#[from] StoreError),
}
