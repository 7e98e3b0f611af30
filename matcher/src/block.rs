use facematch_store::{MatchGroupId, MatchRecord};

/// A sorted window over an organization's clustered population.
///
/// Records are kept non-decreasing by match group, with equal groups
/// contiguous. `start_idx..=end_idx` is the match-group range the block is
/// known to fully cover; a block covering from group 0 up to the highest
/// assigned group represents the entire population.
#[derive(Debug)]
pub struct RecordBlock {
    records: Vec<MatchRecord>,
    start_idx: MatchGroupId,
    end_idx: MatchGroupId,
    last: bool,
    faces_count: usize,
}

impl RecordBlock {
    pub(crate) fn new(
        records: Vec<MatchRecord>,
        start_idx: MatchGroupId,
        end_idx: MatchGroupId,
        last: bool,
    ) -> Self {
        let faces_count = records.iter().map(|r| r.faces.len()).sum();
        Self {
            records,
            start_idx,
            end_idx,
            last,
            faces_count,
        }
    }

    pub fn records(&self) -> &[MatchRecord] {
        &self.records
    }

    /// First match group covered by this block (inclusive).
    pub fn start_idx(&self) -> MatchGroupId {
        self.start_idx
    }

    /// Last match group covered by this block (inclusive).
    pub fn end_idx(&self) -> MatchGroupId {
        self.end_idx
    }

    /// True if the scan that produced this block reached the highest
    /// assigned match group in storage.
    pub fn is_last(&self) -> bool {
        self.last
    }

    pub fn faces_count(&self) -> usize {
        self.faces_count
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// True if this block covers the organization's entire population.
    pub fn is_completed(&self) -> bool {
        self.start_idx == 0 && self.last
    }

    /// True if the block outgrew the per-organization face budget.
    pub fn oversized(&self, budget: usize) -> bool {
        self.faces_count > budget
    }

    /// Insertion point for `match_group`: the leftmost position among
    /// records with an equal or greater group. Equal groups therefore stay
    /// contiguous regardless of insertion order.
    pub fn insert_index(&self, match_group: MatchGroupId) -> usize {
        self.records
            .partition_point(|r| r.match_group() < match_group)
    }

    /// Inserts a record that joined an existing match group, keeping sort
    /// order. The caller persists the assignment before calling this, so a
    /// failed commit never leaves a phantom record in the block.
    pub fn insert(&mut self, record: MatchRecord) {
        let idx = self.insert_index(record.match_group());
        self.faces_count += record.faces.len();
        self.records.insert(idx, record);
    }

    /// Appends a record carrying a freshly allocated match group. Only
    /// meaningful on a last block: the new group is the highest in storage.
    ///
    /// If the append would push the block past `budget`, the block instead
    /// clears its `last` flag — it is no longer authoritative for
    /// newest-group appends and the caller must fetch a fresh trailing
    /// block — and returns false.
    pub fn append_new(&mut self, record: MatchRecord, budget: usize) -> bool {
        if self.faces_count + record.faces.len() > budget {
            self.last = false;
            return false;
        }
        self.end_idx = record.match_group();
        self.faces_count += record.faces.len();
        self.records.push(record);
        true
    }
}
