//! Per-face scan tracking and threshold voting.
//!
//! A face may only be declared "new" after it has been compared against the
//! organization's entire clustered population, but the population arrives
//! as pages that do not necessarily start at group zero. Each pending face
//! therefore tracks the half-open match-group window it has not yet
//! covered, advancing it block by block and wrapping back to the beginning
//! when the page cursor does.

use tracing::error;

use facematch_embedding::Embedding;
use facematch_store::{Face, MatchGroupId, MatchRecord, Person, MAX_FACES_PER_PERSON};

use crate::block::RecordBlock;

/// Scan progress of one pending face.
///
/// `Init` — no block seen yet. `FromStart` — the scan covers from group
/// zero upward. `Mid` — the scan started mid-population and still has to
/// wrap around. `End` — scan finished, either by match or full coverage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Init,
    Mid,
    FromStart,
    End,
}

/// A face awaiting a match decision. Owned exclusively by its
/// organization's worker; never shared.
#[derive(Debug)]
pub(crate) struct PendingFace {
    pub face: Face,
    /// First match group not yet compared.
    start_idx: MatchGroupId,
    /// End of the window (exclusive); `MatchGroupId::MAX` = unbounded.
    end_idx: MatchGroupId,
    state: ScanState,
}

impl PendingFace {
    pub fn new(face: Face) -> Self {
        Self {
            face,
            start_idx: 0,
            end_idx: MatchGroupId::MAX,
            state: ScanState::Init,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == ScanState::End
    }

    /// Restarts the scan from scratch. Used after a persistence failure
    /// invalidated a decision this face contributed to.
    pub fn reset(&mut self) {
        self.start_idx = 0;
        self.end_idx = MatchGroupId::MAX;
        self.state = ScanState::Init;
    }

    /// Compares this face against one block, advancing the scan window.
    ///
    /// Returns the index of the matched record, or `None` when the block
    /// held no match. After the call, [`PendingFace::is_done`] reports
    /// whether the scan is finished (matched, or full coverage reached).
    pub fn scan_block(
        &mut self,
        block: &RecordBlock,
        distance_threshold: f32,
        positive_threshold: f32,
    ) -> Option<usize> {
        match self.state {
            ScanState::End => return None,
            ScanState::Init => {
                self.start_idx = block.start_idx();
                self.end_idx = MatchGroupId::MAX;
                self.state = if block.start_idx() == 0 {
                    ScanState::FromStart
                } else {
                    ScanState::Mid
                };
            }
            ScanState::Mid if block.start_idx() == 0 => {
                // The page cursor wrapped back to the beginning: everything
                // from here up to where this face started is still uncovered.
                self.end_idx = self.start_idx;
                self.start_idx = 0;
                self.state = ScanState::FromStart;
            }
            _ => {}
        }

        let cmp_start = self.start_idx.max(block.start_idx());
        let cmp_end = self.end_idx.min(block.end_idx().saturating_add(1));
        if cmp_start > block.end_idx() || cmp_end < block.start_idx() {
            error!(
                face_start = self.start_idx,
                face_end = self.end_idx,
                block_start = block.start_idx(),
                block_end = block.end_idx(),
                "scan window does not overlap the block; ending scan without a match"
            );
            self.state = ScanState::End;
            return None;
        }

        let lo = block.insert_index(cmp_start);
        let hi = block.insert_index(cmp_end);
        for idx in lo..hi {
            let record = &block.records()[idx];
            if vote_match(
                &self.face.embedding,
                record,
                distance_threshold,
                positive_threshold,
            ) {
                self.state = ScanState::End;
                return Some(idx);
            }
        }

        self.start_idx = cmp_end;
        if self.start_idx >= self.end_idx
            || (self.state == ScanState::FromStart && block.is_last())
        {
            self.state = ScanState::End;
        }
        None
    }
}

/// A person whose faces are being matched. Owned exclusively by its
/// organization's worker.
#[derive(Debug)]
pub(crate) struct PendingPerson {
    pub person: Person,
    pub faces: Vec<PendingFace>,
}

impl PendingPerson {
    pub fn new(person: Person) -> Self {
        Self {
            person,
            faces: Vec::new(),
        }
    }

    /// Adds a face, keeping at most [`MAX_FACES_PER_PERSON`] (oldest
    /// dropped first).
    pub fn merge_face(&mut self, face: Face) {
        self.faces.push(PendingFace::new(face));
        if self.faces.len() > MAX_FACES_PER_PERSON {
            self.faces.remove(0);
        }
    }

    /// True once every face finished its scan without a match.
    pub fn all_done(&self) -> bool {
        self.faces.iter().all(PendingFace::is_done)
    }

    /// Restarts every face's scan.
    pub fn reset_faces(&mut self) {
        for face in &mut self.faces {
            face.reset();
        }
    }

    /// Converts into the block record for the person once `match_group`
    /// has been persisted.
    pub fn into_record(self, match_group: MatchGroupId) -> MatchRecord {
        let mut person = self.person;
        person.match_group = match_group;
        person.profile_id = match_group;
        MatchRecord {
            person,
            faces: self.faces.into_iter().map(|pf| pf.face).collect(),
        }
    }
}

/// Number of per-face hits required for a record with `total` stored faces.
pub(crate) fn needed_votes(total: usize, positive_threshold: f32) -> usize {
    ((total as f32 * positive_threshold).round() as usize).max(1)
}

/// Threshold vote: the embedding matches a record when enough of the
/// record's stored faces are within the distance threshold.
///
/// Faces are scanned most-recent-first and the loop stops as soon as the
/// required hits are reached or can no longer be reached. The early exits
/// do not change the boolean outcome of the "at least N of M" rule.
pub(crate) fn vote_match(
    embedding: &Embedding,
    record: &MatchRecord,
    distance_threshold: f32,
    positive_threshold: f32,
) -> bool {
    let total = record.faces.len();
    if total == 0 {
        return false;
    }
    let needed = needed_votes(total, positive_threshold);

    let mut hits = 0usize;
    for (scanned, face) in record.faces.iter().rev().enumerate() {
        if embedding.within_distance(&face.embedding, distance_threshold) {
            hits += 1;
            if hits >= needed {
                return true;
            }
        }
        let remaining = total - scanned - 1;
        if hits + remaining < needed {
            return false;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{face, person, record_with_faces};

    fn pending(values: [f32; 128]) -> PendingFace {
        PendingFace::new(face("new", values))
    }

    fn unit(dim: usize, value: f32) -> [f32; 128] {
        let mut v = [0.0f32; 128];
        v[dim] = value;
        v
    }

    #[test]
    fn needed_votes_table() {
        assert_eq!(needed_votes(5, 0.5), 3, "2.5 rounds up");
        assert_eq!(needed_votes(1, 0.5), 1);
        assert_eq!(needed_votes(1, 0.99), 1);
        assert_eq!(needed_votes(1, 0.0), 1, "at least one hit always needed");
        assert_eq!(needed_votes(4, 0.5), 2);
        assert_eq!(needed_votes(10, 0.3), 3);
    }

    #[test]
    fn vote_match_requires_quorum() {
        // Record with 5 faces, 2 close and 3 far: 3 needed at 0.5 -> no match.
        let probe = face("new", unit(0, 0.0)).embedding;
        let rec = record_with_faces(
            7,
            vec![
                unit(1, 5.0),
                unit(1, 5.0),
                unit(1, 5.0),
                unit(0, 0.1),
                unit(0, 0.1),
            ],
        );
        assert!(!vote_match(&probe, &rec, 0.6, 0.5));

        // 3 close of 5 -> match.
        let rec = record_with_faces(
            7,
            vec![
                unit(1, 5.0),
                unit(1, 5.0),
                unit(0, 0.1),
                unit(0, 0.1),
                unit(0, 0.1),
            ],
        );
        assert!(vote_match(&probe, &rec, 0.6, 0.5));
    }

    #[test]
    fn vote_match_empty_record_never_matches() {
        let probe = face("new", unit(0, 0.0)).embedding;
        let rec = record_with_faces(7, vec![]);
        assert!(!vote_match(&probe, &rec, 100.0, 0.5));
    }

    #[test]
    fn init_on_from_start_block() {
        let block = RecordBlock::new(vec![], 0, 0, true);
        let mut pf = pending(unit(0, 0.0));
        assert!(pf.scan_block(&block, 0.6, 0.5).is_none());
        // Empty completed block: immediate full coverage.
        assert_eq!(pf.state, ScanState::End);
    }

    #[test]
    fn init_on_mid_block_then_wrap() {
        let far = unit(1, 9.0);
        // Population groups 5..=6 in the first block, 0..=4 after the wrap.
        let mid = RecordBlock::new(
            vec![record_with_faces(5, vec![far]), record_with_faces(6, vec![far])],
            5,
            6,
            false,
        );
        let mut pf = pending(unit(0, 0.0));
        assert!(pf.scan_block(&mid, 0.6, 0.5).is_none());
        assert_eq!(pf.state, ScanState::Mid);

        let wrapped = RecordBlock::new(
            vec![record_with_faces(2, vec![far]), record_with_faces(4, vec![far])],
            0,
            4,
            false,
        );
        assert!(pf.scan_block(&wrapped, 0.6, 0.5).is_none());
        assert_eq!(pf.state, ScanState::FromStart);

        // Window reaches the capped end: coverage complete.
        let tail = RecordBlock::new(vec![record_with_faces(6, vec![far])], 5, 6, true);
        assert!(pf.scan_block(&tail, 0.6, 0.5).is_none());
        assert_eq!(pf.state, ScanState::End);
    }

    #[test]
    fn from_start_ends_on_last_block() {
        let far = unit(1, 9.0);
        let block = RecordBlock::new(vec![record_with_faces(3, vec![far])], 0, 3, true);
        let mut pf = pending(unit(0, 0.0));
        assert!(pf.scan_block(&block, 0.6, 0.5).is_none());
        assert_eq!(pf.state, ScanState::End, "full coverage on a last block");
    }

    #[test]
    fn scan_finds_match_and_ends() {
        let block = RecordBlock::new(
            vec![
                record_with_faces(3, vec![unit(1, 9.0)]),
                record_with_faces(7, vec![unit(0, 0.1)]),
            ],
            0,
            7,
            true,
        );
        let mut pf = pending(unit(0, 0.0));
        let hit = pf.scan_block(&block, 0.6, 0.5);
        assert_eq!(hit, Some(1));
        assert_eq!(block.records()[1].match_group(), 7);
        assert_eq!(pf.state, ScanState::End);
    }

    #[test]
    fn non_overlapping_block_forces_end() {
        let far = unit(1, 9.0);
        // Face has covered up to group 8 exclusive...
        let first = RecordBlock::new(vec![record_with_faces(6, vec![far])], 5, 7, false);
        let mut pf = pending(unit(0, 0.0));
        assert!(pf.scan_block(&first, 0.6, 0.5).is_none());
        assert_eq!(pf.state, ScanState::Mid);

        // ...but the next block covers an older, disjoint range.
        let disjoint = RecordBlock::new(vec![record_with_faces(2, vec![far])], 2, 3, false);
        assert!(pf.scan_block(&disjoint, 0.6, 0.5).is_none());
        assert_eq!(pf.state, ScanState::End);
    }

    #[test]
    fn merge_face_caps_pending_faces() {
        let mut pp = PendingPerson::new(person("p", 1, 0));
        for _ in 0..(MAX_FACES_PER_PERSON + 3) {
            pp.merge_face(face("p", unit(0, 0.0)));
        }
        assert_eq!(pp.faces.len(), MAX_FACES_PER_PERSON);
    }

    #[test]
    fn into_record_assigns_group() {
        let mut pp = PendingPerson::new(person("p", 1, 0));
        pp.merge_face(face("p", unit(0, 0.0)));
        let rec = pp.into_record(42);
        assert_eq!(rec.match_group(), 42);
        assert_eq!(rec.person.profile_id, 42);
        assert_eq!(rec.faces.len(), 1);
    }
}
