//! Durable data model and persistence interfaces for the face matcher.
//!
//! Persons, faces and profiles live in an external database; this crate
//! defines the record types and the trait seam the matcher talks through.
//! [`MemoryStore`] is the in-memory implementation used by tests and the
//! `matchsim` binary — real engines implement [`MatchStore`] elsewhere.

pub mod memory;

mod error;
mod store;
mod types;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use store::{BoxedStore, MatchStore, StoreTx};
pub use types::{
    CamId, Face, MatchGroupId, MatchRecord, OrgId, Person, Profile, RecordPage, Rect,
    MAX_FACES_PER_PERSON,
};
