use tracing::debug;

use facematch_store::{BoxedStore, MatchGroupId, OrgId, Person};

use crate::block::RecordBlock;
use crate::MatcherError;

/// Pages one organization's clustered population out of storage and writes
/// match decisions back. Owned by the organization's worker.
pub(crate) struct BlockLoader {
    org_id: OrgId,
    store: BoxedStore,
    /// Match group the previous page ended at; 0 = beginning.
    cursor: MatchGroupId,
    /// Page limit in faces, the per-organization cache budget.
    page_size: usize,
}

impl BlockLoader {
    pub fn new(org_id: OrgId, store: BoxedStore, page_size: usize) -> Self {
        Self {
            org_id,
            store,
            cursor: 0,
            page_size,
        }
    }

    pub fn org_id(&self) -> OrgId {
        self.org_id
    }

    /// Fetches the next sorted window of records after the cursor.
    ///
    /// An empty page with a non-zero cursor means the clustered data
    /// rotated since the cursor was taken; the scan restarts from the
    /// beginning once. A page that exactly fills the face limit may have
    /// been cut mid-group, so its final record is dropped rather than
    /// splitting a match group across pages.
    pub async fn load_next_block(&mut self) -> Result<RecordBlock, MatcherError> {
        let mut from = self.cursor;
        let mut page = self
            .store
            .records_after(self.org_id, from, self.page_size)
            .await?;
        if page.records.is_empty() && from != 0 {
            from = 0;
            self.cursor = 0;
            page = self
                .store
                .records_after(self.org_id, from, self.page_size)
                .await?;
        }

        let last = page.faces_count < self.page_size;
        let mut records = page.records;
        let mut end = page.max_match_group;
        if !last && records.len() > 1 {
            records.pop();
            // records.len() >= 1 after the pop
            end = records
                .last()
                .map(|r| r.match_group())
                .unwrap_or(page.max_match_group);
        }

        let start = if from == 0 { 0 } else { from + 1 };
        let end = end.max(start);
        if !records.is_empty() {
            self.cursor = end;
        }

        debug!(
            org = self.org_id,
            start,
            end,
            last,
            records = records.len(),
            "loaded record block"
        );
        Ok(RecordBlock::new(records, start, end, last))
    }

    /// Persists a match against an existing group. Single-statement update.
    pub async fn apply_existing_group(
        &self,
        person_id: &str,
        match_group: MatchGroupId,
    ) -> Result<(), MatcherError> {
        self.store
            .update_person_match_group(person_id, match_group)
            .await?;
        Ok(())
    }

    /// Creates a fresh match group for a person: inserts the backing
    /// profile (seeded with the person's picture) and assigns the new
    /// group id, all in one transaction. Any failure rolls back and
    /// propagates.
    pub async fn apply_new_group(&self, person: &Person) -> Result<MatchGroupId, MatcherError> {
        let mut tx = self.store.begin().await?;

        let current = match tx.get_person(&person.id).await {
            Ok(p) => p,
            Err(e) => {
                let _ = tx.rollback().await;
                return Err(e.into());
            }
        };
        let match_group = match tx.insert_profile(self.org_id, current.picture_id).await {
            Ok(id) => id,
            Err(e) => {
                let _ = tx.rollback().await;
                return Err(e.into());
            }
        };
        if let Err(e) = tx.update_person_match_group(&person.id, match_group).await {
            let _ = tx.rollback().await;
            return Err(e.into());
        }

        tx.commit().await?;
        Ok(match_group)
    }
}
