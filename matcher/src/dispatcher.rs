use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use facematch_store::{BoxedStore, CamId, Face, OrgId, Person};

use crate::actor::{MatchPacket, OrgActor};
use crate::cache::MatchCache;
use crate::MatcherConfig;

struct ActorEntry {
    tx: mpsc::Sender<MatchPacket>,
    /// Holders of this entry: the running worker plus any submitter
    /// currently between acquire and release.
    refs: usize,
}

/// Registry of organization workers.
///
/// The mutex guards only map and refcount bookkeeping; it is never held
/// across a queue send or any I/O. Workers tear themselves down through
/// [`ActorRegistry::try_idle_stop`], which can only succeed while no
/// submitter holds a reference — so a submission concurrent with teardown
/// either keeps the worker alive or, finding the entry gone, spawns a
/// fresh one. Packets are never silently dropped.
pub(crate) struct ActorRegistry {
    entries: Mutex<HashMap<OrgId, ActorEntry>>,
}

impl ActorRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the organization's queue, spawning a worker if none exists,
    /// and takes a reference that must be paired with
    /// [`ActorRegistry::release`].
    pub fn acquire(
        &self,
        org_id: OrgId,
        spawn: impl FnOnce() -> mpsc::Sender<MatchPacket>,
    ) -> mpsc::Sender<MatchPacket> {
        let mut entries = self.entries.lock();
        let entry = entries.entry(org_id).or_insert_with(|| ActorEntry {
            tx: spawn(),
            // The worker itself holds the first reference.
            refs: 1,
        });
        entry.refs += 1;
        entry.tx.clone()
    }

    /// Releases a submitter's reference.
    pub fn release(&self, org_id: OrgId) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&org_id) {
            entry.refs -= 1;
            if entry.refs == 0 {
                entries.remove(&org_id);
            }
        }
    }

    /// Called by an idle worker: removes its entry and returns true when
    /// the worker's own reference is the only one left. Otherwise the
    /// worker must keep running — a submission is in flight.
    pub fn try_idle_stop(&self, org_id: OrgId) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(&org_id) {
            Some(entry) if entry.refs == 1 => {
                entries.remove(&org_id);
                true
            }
            _ => false,
        }
    }

    /// Called by a worker exiting for any other reason (shutdown, closed
    /// queue) to give up its reference.
    pub fn drop_actor_ref(&self, org_id: OrgId) {
        self.release(org_id);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Public entry point of the matching engine.
///
/// Resolves cameras to organizations and routes orphan persons to the
/// owning organization's worker, creating workers lazily and letting them
/// tear down after [`MatcherConfig::idle_timeout_ms`] without traffic.
pub struct Matcher {
    store: BoxedStore,
    cfg: MatcherConfig,
    cache: Arc<MatchCache>,
    registry: Arc<ActorRegistry>,
    shutdown: CancellationToken,
}

impl Matcher {
    pub fn new(store: BoxedStore, cfg: MatcherConfig) -> Self {
        let cache = Arc::new(MatchCache::new(cfg.global_cache_size, cfg.org_cache_size));
        Self {
            store,
            cfg,
            cache,
            registry: Arc::new(ActorRegistry::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Ingests a batch of detections. Fire-and-forget: persons that
    /// already have a match group are ignored, lookup and delivery
    /// problems are logged, nothing is surfaced to the caller. A full
    /// worker queue blocks until there is room (backpressure).
    pub async fn on_new_faces(&self, cam_id: CamId, persons: Vec<Person>, faces: Vec<Face>) {
        let org_id = match self.store.org_of_camera(cam_id).await {
            Ok(org_id) => org_id,
            Err(e) => {
                warn!(cam = cam_id, error = %e, "dropping packet: organization lookup failed");
                return;
            }
        };

        let persons: Vec<Person> = persons.into_iter().filter(Person::is_orphan).collect();
        if persons.is_empty() {
            return;
        }
        let kept: HashSet<&str> = persons.iter().map(|p| p.id.as_str()).collect();
        let faces: Vec<Face> = faces
            .into_iter()
            .filter(|f| kept.contains(f.person_id.as_str()))
            .collect();

        let tx = self.registry.acquire(org_id, || {
            OrgActor::spawn(
                org_id,
                self.store.clone(),
                self.cache.clone(),
                self.cfg.clone(),
                self.registry.clone(),
                self.shutdown.clone(),
            )
        });
        if tx.send(MatchPacket { persons, faces }).await.is_err() {
            // Only possible while shutting down; workers otherwise outlive
            // every handed-out sender.
            debug!(org = org_id, "packet dropped during shutdown");
        }
        self.registry.release(org_id);
    }

    /// Number of organizations with a live worker.
    pub fn active_workers(&self) -> usize {
        self.registry.len()
    }

    /// Stops all workers. In-flight persistence calls run to completion;
    /// unsettled pending persons are left for the orphan sweeper.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    #[cfg(test)]
    pub(crate) fn cache(&self) -> &MatchCache {
        &self.cache
    }
}
