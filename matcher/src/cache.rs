use std::sync::Arc;

use mini_moka::sync::Cache;
use parking_lot::RwLock;
use tracing::debug;

use facematch_store::OrgId;

use crate::block::RecordBlock;
use crate::loader::BlockLoader;
use crate::MatcherError;

/// A cached block. Shared with the owning organization's worker, which is
/// the only writer; the cache itself only reads the face count.
pub(crate) type CachedBlock = Arc<RwLock<RecordBlock>>;

/// Process-wide cache of the latest block per organization.
///
/// Bounded by an aggregate face-count budget with least-recently-used
/// eviction; a single organization's block is additionally bounded by the
/// per-organization budget and evicted outright when it outgrows it.
pub(crate) struct MatchCache {
    blocks: Cache<OrgId, CachedBlock>,
    org_budget: usize,
}

impl MatchCache {
    pub fn new(global_budget: u64, org_budget: usize) -> Self {
        let blocks = Cache::builder()
            .max_capacity(global_budget)
            .weigher(|_org: &OrgId, block: &CachedBlock| {
                block.read().faces_count().max(1) as u32
            })
            .build();
        Self { blocks, org_budget }
    }

    /// Returns the next block the worker should compare against: the
    /// cached block when it already covers the whole population, otherwise
    /// the next page from the loader. No lock is held across the load.
    pub async fn next_block(&self, loader: &mut BlockLoader) -> Result<CachedBlock, MatcherError> {
        let org_id = loader.org_id();
        if let Some(cached) = self.blocks.get(&org_id) {
            if cached.read().is_completed() {
                return Ok(cached);
            }
        }

        let block = Arc::new(RwLock::new(loader.load_next_block().await?));
        if block.read().oversized(self.org_budget) {
            debug!(org = org_id, "loaded block over budget; serving uncached");
            self.blocks.invalidate(&org_id);
        } else {
            self.blocks.insert(org_id, block.clone());
        }
        Ok(block)
    }

    /// Re-registers a block after the worker mutated it, updating its
    /// weight — or evicts the entry when the mutation pushed it over the
    /// per-organization budget, forcing a fresh load next round.
    pub fn refresh(&self, org_id: OrgId, block: &CachedBlock) {
        if block.read().oversized(self.org_budget) {
            debug!(org = org_id, "block outgrew budget; evicting");
            self.blocks.invalidate(&org_id);
        } else {
            self.blocks.insert(org_id, block.clone());
        }
    }

    /// True if the organization currently has a cached block.
    #[cfg(test)]
    pub fn contains(&self, org_id: OrgId) -> bool {
        self.blocks.contains_key(&org_id)
    }
}
