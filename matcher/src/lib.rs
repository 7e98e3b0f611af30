//! Incremental face-identity clustering.
//!
//! Edge cameras stream face detections; persons without a match group are
//! routed to a per-organization worker that compares their embeddings
//! against the organization's stored population and either joins them to an
//! existing match group or creates a fresh one (with its backing profile).
//!
//! The population can be far larger than memory, so each worker scans it
//! through record-block pages: sorted-by-match-group windows fetched on
//! demand, cached process-wide with weighted eviction, and tracked per
//! face by a wrap-around scan window that guarantees every face is compared
//! against the entire population exactly once before a "new group" verdict.
//!
//! # Usage
//!
//! ```ignore
//! let matcher = Matcher::new(store, MatcherConfig::default());
//! // Fire-and-forget; lookup and persistence errors are logged, not returned.
//! matcher.on_new_faces(cam_id, persons, faces).await;
//! ```
//!
//! Workers are created lazily per organization and torn down after an idle
//! period; [`Matcher::shutdown`] stops all of them.

mod actor;
mod block;
mod cache;
mod config;
mod dispatcher;
mod error;
mod loader;
mod pending;


pub use config::MatcherConfig;
pub use dispatcher::Matcher;
pub use error::MatcherError;
