//! In-memory [`MatchStore`] implementation.
//!
//! Data is lost on restart. Used by tests and the `matchsim` binary;
//! production deployments implement [`MatchStore`] against a real engine.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::{
    CamId, Face, MatchGroupId, MatchRecord, MatchStore, OrgId, Person, Profile, RecordPage,
    StoreError, StoreTx, MAX_FACES_PER_PERSON,
};

#[derive(Default)]
struct Inner {
    cameras: HashMap<CamId, OrgId>,
    persons: HashMap<String, Person>,
    /// Faces per person, ascending by capture time, capped at
    /// [`MAX_FACES_PER_PERSON`].
    faces: HashMap<String, Vec<Face>>,
    profiles: HashMap<MatchGroupId, Profile>,
    next_profile_id: MatchGroupId,
}

/// In-memory store guarded by a single mutex.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Maps a camera to an organization.
    pub fn add_camera(&self, cam_id: CamId, org_id: OrgId) {
        self.inner.lock().cameras.insert(cam_id, org_id);
    }

    /// Inserts or replaces a person. The profile id sequence is kept ahead
    /// of any seeded match group so later allocations never collide.
    pub fn add_person(&self, person: Person) {
        let mut inner = self.inner.lock();
        inner.next_profile_id = inner.next_profile_id.max(person.match_group);
        inner.persons.insert(person.id.clone(), person);
    }

    /// Appends a face to its person, keeping capture-time order and the
    /// per-person cap (oldest faces are dropped).
    pub fn add_face(&self, face: Face) {
        let mut inner = self.inner.lock();
        let faces = inner.faces.entry(face.person_id.clone()).or_default();
        let pos = faces.partition_point(|f| f.captured_at <= face.captured_at);
        faces.insert(pos, face);
        if faces.len() > MAX_FACES_PER_PERSON {
            faces.remove(0);
        }
    }

    /// Returns a person by id, if present.
    pub fn person(&self, person_id: &str) -> Option<Person> {
        self.inner.lock().persons.get(person_id).cloned()
    }

    /// Number of stored profiles.
    pub fn profile_count(&self) -> usize {
        self.inner.lock().profiles.len()
    }

    /// Returns a profile by id, if present.
    pub fn profile(&self, id: MatchGroupId) -> Option<Profile> {
        self.inner.lock().profiles.get(&id).cloned()
    }

    fn org_of_person(inner: &Inner, person: &Person) -> Option<OrgId> {
        inner.cameras.get(&person.cam_id).copied()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MatchStore for MemoryStore {
    async fn org_of_camera(&self, cam_id: CamId) -> Result<OrgId, StoreError> {
        self.inner
            .lock()
            .cameras
            .get(&cam_id)
            .copied()
            .ok_or(StoreError::CameraNotFound(cam_id))
    }

    async fn records_after(
        &self,
        org_id: OrgId,
        after_match_group: MatchGroupId,
        face_limit: usize,
    ) -> Result<RecordPage, StoreError> {
        let inner = self.inner.lock();
        let after = after_match_group.max(0);

        let mut persons: Vec<&Person> = inner
            .persons
            .values()
            .filter(|p| p.match_group > after)
            .filter(|p| Self::org_of_person(&inner, p) == Some(org_id))
            .collect();
        persons.sort_by(|a, b| {
            a.match_group
                .cmp(&b.match_group)
                .then_with(|| a.id.cmp(&b.id))
        });

        // SQL-LIMIT semantics over face rows: the cut may land mid-record.
        let mut records = Vec::new();
        let mut faces_count = 0usize;
        'outer: for person in persons {
            let all = inner.faces.get(&person.id).map(Vec::as_slice).unwrap_or(&[]);
            let mut taken = Vec::new();
            for face in all {
                if faces_count == face_limit {
                    if !taken.is_empty() {
                        records.push(MatchRecord {
                            person: person.clone(),
                            faces: taken,
                        });
                    }
                    break 'outer;
                }
                taken.push(face.clone());
                faces_count += 1;
            }
            records.push(MatchRecord {
                person: person.clone(),
                faces: taken,
            });
            if faces_count == face_limit {
                break;
            }
        }

        let max_match_group = records.last().map(|r| r.match_group()).unwrap_or(0);
        Ok(RecordPage {
            records,
            faces_count,
            max_match_group,
        })
    }

    async fn update_person_match_group(
        &self,
        person_id: &str,
        match_group: MatchGroupId,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let person = inner
            .persons
            .get_mut(person_id)
            .ok_or_else(|| StoreError::PersonNotFound(person_id.to_string()))?;
        person.match_group = match_group;
        person.profile_id = match_group;
        Ok(())
    }

    async fn get_person(&self, person_id: &str) -> Result<Person, StoreError> {
        self.inner
            .lock()
            .persons
            .get(person_id)
            .cloned()
            .ok_or_else(|| StoreError::PersonNotFound(person_id.to_string()))
    }

    async fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError> {
        Ok(Box::new(MemoryTx {
            store: self,
            staged_profiles: Vec::new(),
            staged_updates: Vec::new(),
        }))
    }
}

/// Staged-write transaction over [`MemoryStore`].
///
/// Profile ids are allocated from the store's sequence at
/// `insert_profile` time, so a rollback does not reuse ids — the same
/// behavior a database sequence has.
struct MemoryTx<'a> {
    store: &'a MemoryStore,
    staged_profiles: Vec<Profile>,
    staged_updates: Vec<(String, MatchGroupId)>,
}

#[async_trait]
impl StoreTx for MemoryTx<'_> {
    async fn get_person(&mut self, person_id: &str) -> Result<Person, StoreError> {
        let mut person = self
            .store
            .inner
            .lock()
            .persons
            .get(person_id)
            .cloned()
            .ok_or_else(|| StoreError::PersonNotFound(person_id.to_string()))?;
        // Overlay this transaction's own staged writes.
        for (id, mg) in &self.staged_updates {
            if id == person_id {
                person.match_group = *mg;
                person.profile_id = *mg;
            }
        }
        Ok(person)
    }

    async fn insert_profile(
        &mut self,
        org_id: OrgId,
        picture_id: i64,
    ) -> Result<MatchGroupId, StoreError> {
        let id = {
            let mut inner = self.store.inner.lock();
            inner.next_profile_id += 1;
            inner.next_profile_id
        };
        self.staged_profiles.push(Profile {
            id,
            org_id,
            picture_id,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn update_person_match_group(
        &mut self,
        person_id: &str,
        match_group: MatchGroupId,
    ) -> Result<(), StoreError> {
        if !self.store.inner.lock().persons.contains_key(person_id) {
            return Err(StoreError::PersonNotFound(person_id.to_string()));
        }
        self.staged_updates
            .push((person_id.to_string(), match_group));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut inner = self.store.inner.lock();
        for profile in self.staged_profiles {
            inner.profiles.insert(profile.id, profile);
        }
        for (person_id, match_group) in self.staged_updates {
            if let Some(person) = inner.persons.get_mut(&person_id) {
                person.match_group = match_group;
                person.profile_id = match_group;
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Rect;
    use chrono::TimeZone;
    use facematch_embedding::Embedding;

    fn person(id: &str, cam: CamId, match_group: MatchGroupId) -> Person {
        Person {
            id: id.to_string(),
            cam_id: cam,
            last_seen_at: Utc::now(),
            profile_id: match_group,
            picture_id: 1,
            match_group,
        }
    }

    fn face(person_id: &str, ts: i64) -> Face {
        Face {
            person_id: person_id.to_string(),
            captured_at: Utc.timestamp_opt(ts, 0).unwrap(),
            image_id: 1,
            rect: Rect::default(),
            face_image_id: 1,
            embedding: Embedding::from([0.0f32; 128]),
        }
    }

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.add_camera(10, 1);
        for (pid, mg) in [("a", 3), ("b", 5), ("c", 5), ("d", 9)] {
            store.add_person(person(pid, 10, mg));
            store.add_face(face(pid, 100));
            store.add_face(face(pid, 200));
        }
        store
    }

    #[tokio::test]
    async fn records_after_orders_and_filters() {
        let store = seeded();
        let page = store.records_after(1, 0, 100).await.unwrap();
        let groups: Vec<i64> = page.records.iter().map(|r| r.match_group()).collect();
        assert_eq!(groups, vec![3, 5, 5, 9]);
        assert_eq!(page.faces_count, 8);
        assert_eq!(page.max_match_group, 9);

        let page = store.records_after(1, 5, 100).await.unwrap();
        let groups: Vec<i64> = page.records.iter().map(|r| r.match_group()).collect();
        assert_eq!(groups, vec![9]);
    }

    #[tokio::test]
    async fn records_after_skips_orphans() {
        let store = seeded();
        store.add_person(person("orphan", 10, 0));
        store.add_face(face("orphan", 100));
        let page = store.records_after(1, 0, 100).await.unwrap();
        assert!(page.records.iter().all(|r| r.match_group() > 0));
    }

    #[tokio::test]
    async fn records_after_cuts_mid_record() {
        let store = seeded();
        // 4 persons x 2 faces; limit 3 cuts person "b" down to one face.
        let page = store.records_after(1, 0, 3).await.unwrap();
        assert_eq!(page.faces_count, 3);
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[1].faces.len(), 1);
        assert_eq!(page.max_match_group, 5);
    }

    #[tokio::test]
    async fn faces_capped_per_person() {
        let store = MemoryStore::new();
        store.add_camera(10, 1);
        store.add_person(person("p", 10, 1));
        for ts in 0..10 {
            store.add_face(face("p", ts));
        }
        let page = store.records_after(1, 0, 100).await.unwrap();
        assert_eq!(page.records[0].faces.len(), MAX_FACES_PER_PERSON);
        // Most recent faces survive.
        assert_eq!(
            page.records[0].faces.last().unwrap().captured_at,
            Utc.timestamp_opt(9, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn tx_commit_applies_staged_writes() {
        let store = seeded();
        let mut tx = store.begin().await.unwrap();
        let mg = tx.insert_profile(1, 42).await.unwrap();
        assert!(mg > 0);
        tx.update_person_match_group("a", mg).await.unwrap();

        // Staged writes visible inside the tx, not outside yet.
        assert_eq!(tx.get_person("a").await.unwrap().match_group, mg);
        assert_eq!(store.person("a").unwrap().match_group, 3);

        tx.commit().await.unwrap();
        assert_eq!(store.person("a").unwrap().match_group, mg);
        assert_eq!(store.profile(mg).unwrap().picture_id, 42);
    }

    #[tokio::test]
    async fn tx_rollback_discards_staged_writes() {
        let store = seeded();
        let mut tx = store.begin().await.unwrap();
        let mg = tx.insert_profile(1, 42).await.unwrap();
        tx.update_person_match_group("a", mg).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.person("a").unwrap().match_group, 3);
        assert_eq!(store.profile_count(), 0);

        // Sequence ids are not reused after rollback.
        let mut tx = store.begin().await.unwrap();
        let next = tx.insert_profile(1, 42).await.unwrap();
        assert!(next > mg);
    }

    #[tokio::test]
    async fn org_of_camera_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.org_of_camera(99).await,
            Err(StoreError::CameraNotFound(99))
        ));
    }
}
