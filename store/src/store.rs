use std::sync::Arc;

use async_trait::async_trait;

use crate::{CamId, MatchGroupId, OrgId, Person, RecordPage, StoreError};

/// A shared store handle for use across workers.
pub type BoxedStore = Arc<dyn MatchStore>;

/// Persistence interface consumed by the matcher.
///
/// Implementations must be safe for concurrent use. Calls may block on I/O;
/// the matcher never holds its own locks across them.
#[async_trait]
pub trait MatchStore: Send + Sync {
    /// Resolves the organization owning a camera.
    async fn org_of_camera(&self, cam_id: CamId) -> Result<OrgId, StoreError>;

    /// Returns the organization's clustered persons with
    /// `match_group > max(after_match_group, 0)`, ascending by match group,
    /// together with their faces. Orphans are never returned.
    ///
    /// `face_limit` bounds the page in face rows, not records; like a SQL
    /// LIMIT, the cut may land mid-record. Callers detect a possibly
    /// truncated page by `faces_count == face_limit`.
    async fn records_after(
        &self,
        org_id: OrgId,
        after_match_group: MatchGroupId,
        face_limit: usize,
    ) -> Result<RecordPage, StoreError>;

    /// Assigns a match group to a person. Single-statement update.
    async fn update_person_match_group(
        &self,
        person_id: &str,
        match_group: MatchGroupId,
    ) -> Result<(), StoreError>;

    /// Looks up a person by id.
    async fn get_person(&self, person_id: &str) -> Result<Person, StoreError>;

    /// Opens a transaction. Dropping it without commit discards all
    /// staged writes.
    async fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError>;
}

/// A store transaction. Writes are staged until [`StoreTx::commit`].
///
/// Own writes are visible to reads within the same transaction. Profile id
/// allocation is sequence-like: ids handed out by `insert_profile` are not
/// reused even if the transaction rolls back.
#[async_trait]
pub trait StoreTx: Send {
    /// Looks up a person, seeing this transaction's staged writes.
    async fn get_person(&mut self, person_id: &str) -> Result<Person, StoreError>;

    /// Creates a profile for the organization and returns its id,
    /// which becomes the new match-group id.
    async fn insert_profile(
        &mut self,
        org_id: OrgId,
        picture_id: i64,
    ) -> Result<MatchGroupId, StoreError>;

    /// Stages a match-group assignment for a person.
    async fn update_person_match_group(
        &mut self,
        person_id: &str,
        match_group: MatchGroupId,
    ) -> Result<(), StoreError>;

    /// Applies all staged writes atomically.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Discards all staged writes.
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
