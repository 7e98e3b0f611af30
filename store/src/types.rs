use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use facematch_embedding::Embedding;

/// Organization identifier.
pub type OrgId = i64;

/// Edge camera identifier.
pub type CamId = i64;

/// Cluster identifier assigned to a person once matched. Doubles as the
/// primary key of the backing [`Profile`]. Zero means orphan/unassigned.
pub type MatchGroupId = i64;

/// Upper bound on faces kept per person for match voting.
/// Older faces beyond this are not stored.
pub const MAX_FACES_PER_PERSON: usize = 5;

/// Face bounding box within the source image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

/// A person observed by an edge camera.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    /// Identity string assigned at detection time.
    pub id: String,
    /// Camera that last observed this person.
    pub cam_id: CamId,
    pub last_seen_at: DateTime<Utc>,
    /// Backing profile id; 0 = unassigned.
    pub profile_id: i64,
    /// Best picture of this person, used to seed a new profile.
    pub picture_id: i64,
    /// Cluster id; 0 = orphan, > 0 = assigned match group.
    pub match_group: MatchGroupId,
}

impl Person {
    /// Returns true if the person has no match group yet.
    pub fn is_orphan(&self) -> bool {
        self.match_group <= 0
    }
}

/// A single face detection belonging to a person.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Face {
    pub person_id: String,
    pub captured_at: DateTime<Utc>,
    /// Source frame image.
    pub image_id: i64,
    pub rect: Rect,
    /// Cropped face image.
    pub face_image_id: i64,
    pub embedding: Embedding,
}

/// Durable identity record created the first time a match group is assigned.
/// Its id is the match-group id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: MatchGroupId,
    pub org_id: OrgId,
    pub picture_id: i64,
    pub created_at: DateTime<Utc>,
}

/// A person paired with its stored faces; the atomic unit returned by
/// match-group range queries and held in matcher blocks.
#[derive(Debug, Clone)]
pub struct MatchRecord {
    pub person: Person,
    pub faces: Vec<Face>,
}

impl MatchRecord {
    /// The record's match group, shorthand for `person.match_group`.
    pub fn match_group(&self) -> MatchGroupId {
        self.person.match_group
    }
}

/// One page of a match-group range query.
#[derive(Debug)]
pub struct RecordPage {
    /// Records ascending by match group. The last record may carry only a
    /// prefix of its faces when the page was cut by `face_limit`.
    pub records: Vec<MatchRecord>,
    /// Total face rows returned across all records.
    pub faces_count: usize,
    /// Match group of the last returned record; 0 when the page is empty.
    pub max_match_group: MatchGroupId,
}
