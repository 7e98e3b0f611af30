use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use facematch_store::{BoxedStore, Face, MatchGroupId, OrgId, Person};

use crate::cache::{CachedBlock, MatchCache};
use crate::dispatcher::ActorRegistry;
use crate::loader::BlockLoader;
use crate::pending::PendingPerson;
use crate::MatcherConfig;

/// One batch of orphan persons and their faces, routed to an organization's
/// worker.
pub(crate) struct MatchPacket {
    pub persons: Vec<Person>,
    pub faces: Vec<Face>,
}

/// Outcome of scanning one pending person against a block.
enum Verdict {
    /// A stored record matched; join its group.
    Matched { group: MatchGroupId },
    /// Every face finished its scan with full coverage and no match.
    Fresh,
    /// Still scanning. `advanced` is false when no face moved its window.
    Open { advanced: bool },
}

/// Single-threaded worker owning all matching state of one organization.
///
/// All mutation of the pending map and the organization's cached block
/// happens here, so none of it needs locking beyond the block's RwLock
/// (which outside writers never take).
pub(crate) struct OrgActor {
    org_id: OrgId,
    cfg: MatcherConfig,
    cache: Arc<MatchCache>,
    loader: BlockLoader,
    pending: HashMap<String, PendingPerson>,
    rx: mpsc::Receiver<MatchPacket>,
    registry: Arc<ActorRegistry>,
    shutdown: CancellationToken,
}

impl OrgActor {
    pub fn spawn(
        org_id: OrgId,
        store: BoxedStore,
        cache: Arc<MatchCache>,
        cfg: MatcherConfig,
        registry: Arc<ActorRegistry>,
        shutdown: CancellationToken,
    ) -> mpsc::Sender<MatchPacket> {
        let (tx, rx) = mpsc::channel(cfg.queue_capacity);
        let loader = BlockLoader::new(org_id, store, cfg.org_cache_size);
        let actor = OrgActor {
            org_id,
            cfg,
            cache,
            loader,
            pending: HashMap::new(),
            rx,
            registry,
            shutdown,
        };
        tokio::spawn(actor.run());
        tx
    }

    async fn run(mut self) {
        debug!(org = self.org_id, "match worker started");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    self.registry.drop_actor_ref(self.org_id);
                    break;
                }
                _ = tokio::time::sleep(self.cfg.idle_timeout()) => {
                    if self.registry.try_idle_stop(self.org_id) {
                        // A packet can land in the queue between its
                        // submitter's release and this deadline firing.
                        // It was accepted, so it is processed before the
                        // worker goes away; no new sends can race in, the
                        // registry entry is already gone.
                        let mut drained = false;
                        while let Ok(packet) = self.rx.try_recv() {
                            self.fold_packet(packet);
                            drained = true;
                        }
                        if drained {
                            self.run_rounds().await;
                        }
                        if !self.pending.is_empty() {
                            warn!(
                                org = self.org_id,
                                pending = self.pending.len(),
                                "worker idle with unsettled persons; the orphan sweeper will resubmit them"
                            );
                        }
                        break;
                    }
                    // A submitter holds a reference right now; its packet
                    // is about to arrive.
                }
                packet = self.rx.recv() => {
                    let Some(packet) = packet else {
                        self.registry.drop_actor_ref(self.org_id);
                        break;
                    };
                    self.fold_packet(packet);
                    while let Ok(more) = self.rx.try_recv() {
                        self.fold_packet(more);
                    }
                    self.run_rounds().await;
                }
            }
        }
        debug!(org = self.org_id, "match worker stopped");
    }

    /// Merges a packet into the pending map, joining face lists for
    /// persons already in progress.
    fn fold_packet(&mut self, packet: MatchPacket) {
        for person in packet.persons {
            self.pending
                .entry(person.id.clone())
                .or_insert_with(|| PendingPerson::new(person));
        }
        for face in packet.faces {
            match self.pending.get_mut(&face.person_id) {
                Some(pending) => pending.merge_face(face),
                None => error!(
                    org = self.org_id,
                    person = %face.person_id,
                    "face references an unknown pending person; skipped"
                ),
            }
        }
    }

    /// Repeats "fetch next block, compare all pending faces, settle" until
    /// no work remains or nothing can move this cycle. Pending persons
    /// left over are retried on the next trigger.
    async fn run_rounds(&mut self) {
        while !self.pending.is_empty() && !self.shutdown.is_cancelled() {
            let block = match self.cache.next_block(&mut self.loader).await {
                Ok(block) => block,
                Err(e) => {
                    warn!(org = self.org_id, error = %e, "block load failed; pausing until the next trigger");
                    return;
                }
            };
            // A round that moved nothing will not move on the next
            // iteration either.
            if !self.run_round(&block).await {
                return;
            }
        }
    }

    /// One comparison round of every pending person against one block.
    /// Returns whether anything settled or advanced. A persistence failure
    /// only skips the failing person; the rest of the round proceeds.
    async fn run_round(&mut self, block: &CachedBlock) -> bool {
        let mut progressed = false;
        let ids: Vec<String> = self.pending.keys().cloned().collect();

        for id in ids {
            // Decide under a short read lock; persistence happens with no
            // lock held; the block is mutated afterwards under a write lock.
            let verdict = {
                let blk = block.read();
                let Some(pending) = self.pending.get_mut(&id) else {
                    continue;
                };
                let mut advanced = false;
                let mut matched = None;
                for pf in pending.faces.iter_mut().filter(|pf| !pf.is_done()) {
                    if let Some(idx) = pf.scan_block(
                        &blk,
                        self.cfg.distance_threshold,
                        self.cfg.positive_threshold,
                    ) {
                        matched = Some(blk.records()[idx].match_group());
                        break;
                    }
                    // Every scan moves the window forward or ends the face.
                    advanced = true;
                }
                match matched {
                    Some(group) => Verdict::Matched { group },
                    // A person with no faces yet cannot settle; it waits
                    // for more detections or idle teardown.
                    None if !pending.faces.is_empty() && pending.all_done() => Verdict::Fresh,
                    None => Verdict::Open { advanced },
                }
            };

            match verdict {
                Verdict::Matched { group } => {
                    if let Err(e) = self.loader.apply_existing_group(&id, group).await {
                        // The block was not touched; rescan from scratch
                        // once the store recovers.
                        warn!(org = self.org_id, person = %id, error = %e, "match persistence failed; person retried on the next trigger");
                        if let Some(pending) = self.pending.get_mut(&id) {
                            pending.reset_faces();
                        }
                        continue;
                    }
                    if let Some(pending) = self.pending.remove(&id) {
                        let record = pending.into_record(group);
                        block.write().insert(record);
                        self.cache.refresh(self.org_id, block);
                        info!(org = self.org_id, person = %id, group, "person joined match group");
                        progressed = true;
                    }
                }
                Verdict::Fresh => {
                    let Some(pending) = self.pending.get(&id) else {
                        continue;
                    };
                    let group = match self.loader.apply_new_group(&pending.person).await {
                        Ok(group) => group,
                        Err(e) => {
                            // Transaction rolled back; the person stays
                            // pending and is retried on the next trigger.
                            warn!(org = self.org_id, person = %id, error = %e, "profile creation failed; person retried on the next trigger");
                            continue;
                        }
                    };
                    if let Some(pending) = self.pending.remove(&id) {
                        let record = pending.into_record(group);
                        {
                            let mut blk = block.write();
                            if blk.is_last() {
                                blk.append_new(record, self.cfg.org_cache_size);
                            }
                        }
                        self.cache.refresh(self.org_id, block);
                        info!(org = self.org_id, person = %id, group, "created new match group");
                        progressed = true;
                    }
                }
                Verdict::Open { advanced } => {
                    progressed |= advanced;
                }
            }
        }
        progressed
    }
}
