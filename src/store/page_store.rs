//! Keyed storage of collections, one per query identity.
//!
//! Every slot carries a generation number. Fetch tickets and mutation
//! snapshots remember the generation they were issued against, so results
//! that land after the slot was evicted or recreated are dropped instead of
//! corrupting a newer collection.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, trace};

use super::collection::{Collection, MergeOutcome, PageList};
use crate::models::{Page, QueryIdentity, QueryKey, Record, RecordId};

/// Store handle shared between the session and spawned tasks.
pub type SharedPageStore = Arc<Mutex<PageStore>>;

/// Permission to fetch one page for one collection generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    pub key: QueryKey,
    pub query: QueryIdentity,
    pub generation: u64,
    pub page: u32,
}

#[derive(Debug, Clone)]
struct SnapshotEntry {
    key: QueryKey,
    generation: u64,
    prior: PageList,
}

/// State captured by [`PageStore::remove_by_ids`], enough to undo it.
#[derive(Debug, Clone, Default)]
pub struct MutationSnapshot {
    entries: Vec<SnapshotEntry>,
    removed: Vec<RecordId>,
}

impl MutationSnapshot {
    /// Ids that were actually present and removed, in display order.
    pub fn removed(&self) -> &[RecordId] {
        &self.removed
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Summary of one collection for schedulers and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CollectionStatus {
    pub len: usize,
    pub pages: u32,
    pub total_records: u64,
    pub has_next_page: bool,
    pub exhausted: bool,
    pub refreshing: bool,
}

struct Slot {
    generation: u64,
    collection: Collection,
}

#[derive(Default)]
pub struct PageStore {
    slots: HashMap<QueryKey, Slot>,
    next_generation: u64,
    active: Option<QueryKey>,
}

impl PageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedPageStore {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn active(&self) -> Option<QueryKey> {
        self.active
    }

    /// Makes `query` the displayed identity.
    ///
    /// Switching away from another identity evicts it, so coming back later
    /// starts over from page 1.
    pub fn activate(&mut self, query: QueryIdentity) -> QueryKey {
        let key = query.cache_key();
        if self.active == Some(key) && self.slots.contains_key(&key) {
            return key;
        }
        if let Some(previous) = self.active.take() {
            if previous != key && self.slots.remove(&previous).is_some() {
                debug!(?previous, "Evicted collection for previous query");
            }
        }
        if !self.slots.contains_key(&key) {
            let generation = self.bump_generation();
            info!(%query, generation, "Created collection");
            self.slots.insert(
                key,
                Slot {
                    generation,
                    collection: Collection::new(query),
                },
            );
        }
        self.active = Some(key);
        key
    }

    fn bump_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    /// Ticket for the next page of `key`, or `None` when exhausted or unknown.
    pub fn ticket(&self, key: QueryKey) -> Option<FetchTicket> {
        let slot = self.slots.get(&key)?;
        let page = slot.collection.next_fetch_page()?;
        Some(FetchTicket {
            key,
            query: *slot.collection.query(),
            generation: slot.generation,
            page,
        })
    }

    pub fn active_ticket(&self) -> Option<FetchTicket> {
        self.ticket(self.active?)
    }

    /// Merges a fetched page into the collection the ticket was issued for.
    pub fn merge(&mut self, ticket: &FetchTicket, page: Page) -> MergeOutcome {
        let Some(slot) = self.slots.get_mut(&ticket.key) else {
            debug!(page = page.page_number, "Collection gone, discarding page");
            return MergeOutcome::Discarded;
        };
        if slot.generation != ticket.generation {
            debug!(
                page = page.page_number,
                ticket = ticket.generation,
                current = slot.generation,
                "Discarding page for replaced collection"
            );
            return MergeOutcome::Discarded;
        }
        let outcome = slot.collection.merge(page);
        trace!(?outcome, len = slot.collection.records().len(), "Merged page");
        outcome
    }

    /// Flattened records of `key` in display order; empty when unknown.
    pub fn flatten(&self, key: QueryKey) -> &[Record] {
        self.slots
            .get(&key)
            .map_or(&[][..], |slot| slot.collection.records())
    }

    pub fn active_records(&self) -> &[Record] {
        match self.active {
            Some(key) => self.flatten(key),
            None => &[],
        }
    }

    pub fn collection(&self, key: QueryKey) -> Option<&Collection> {
        self.slots.get(&key).map(|slot| &slot.collection)
    }

    pub fn has_next_page(&self, key: QueryKey) -> bool {
        self.collection(key)
            .is_some_and(|c| c.live().has_next_page())
    }

    pub fn is_exhausted(&self, key: QueryKey) -> bool {
        self.collection(key).is_some_and(|c| c.live().is_exhausted())
    }

    pub fn status(&self, key: QueryKey) -> CollectionStatus {
        let Some(collection) = self.collection(key) else {
            return CollectionStatus::default();
        };
        let live = collection.live();
        CollectionStatus {
            len: live.len(),
            pages: live.page_count(),
            total_records: live.total_records(),
            has_next_page: collection.next_fetch_page().is_some(),
            exhausted: live.is_exhausted() && !collection.is_stale(),
            refreshing: collection.is_refreshing() || collection.is_stale(),
        }
    }

    pub fn active_status(&self) -> CollectionStatus {
        self.active.map(|key| self.status(key)).unwrap_or_default()
    }

    /// Removes `ids` from every cached collection.
    pub fn remove_by_ids(&mut self, ids: &HashSet<RecordId>) -> MutationSnapshot {
        let mut snapshot = MutationSnapshot::default();
        for (key, slot) in self.slots.iter_mut() {
            let prior = slot.collection.live().clone();
            let removed = slot.collection.remove_ids(ids);
            if removed.is_empty() {
                continue;
            }
            debug!(?key, removed = removed.len(), "Optimistically removed records");
            if Some(*key) == self.active || snapshot.removed.is_empty() {
                snapshot.removed = removed;
            }
            snapshot.entries.push(SnapshotEntry {
                key: *key,
                generation: slot.generation,
                prior,
            });
        }
        snapshot
    }

    /// Undoes a [`remove_by_ids`](Self::remove_by_ids). Collections that were
    /// replaced in the meantime are left alone.
    pub fn rollback(&mut self, snapshot: MutationSnapshot) -> usize {
        let mut restored = 0;
        for entry in snapshot.entries {
            match self.slots.get_mut(&entry.key) {
                Some(slot) if slot.generation == entry.generation => {
                    slot.collection.restore(entry.prior);
                    restored += 1;
                }
                _ => debug!(key = ?entry.key, "Skipping rollback for replaced collection"),
            }
        }
        restored
    }

    /// Applies `f` to the record with `id` in every collection that holds it.
    pub fn patch_record<F>(&mut self, id: RecordId, f: F) -> usize
    where
        F: Fn(&mut Record),
    {
        let mut patched = 0;
        for (_, slot) in self.slots.iter_mut() {
            if slot.collection.patch(id, &f) {
                patched += 1;
            }
        }
        patched
    }

    /// Reads the current copy of a record from the active collection, falling
    /// back to any other cached one.
    pub fn find_record(&self, id: RecordId) -> Option<&Record> {
        let active = self.active.and_then(|key| self.collection(key));
        active
            .into_iter()
            .chain(self.slots.iter().map(|(_, slot)| &slot.collection))
            .find_map(|c| {
                let live = c.live();
                live.position_of(id).map(|pos| &live.records()[pos])
            })
    }

    /// Drops the collection for `key`. In-flight fetches for it are discarded.
    pub fn invalidate(&mut self, key: QueryKey) -> bool {
        if self.active == Some(key) {
            self.active = None;
        }
        self.slots.remove(&key).is_some()
    }

    /// Marks the active collection for refetch and evicts all others.
    pub fn mark_stale(&mut self) {
        let active = self.active;
        self.slots.retain(|key, _| Some(*key) == active);
        if let Some(slot) = active.and_then(|key| self.slots.get_mut(&key)) {
            slot.collection.mark_stale();
            debug!(generation = slot.generation, "Marked collection stale");
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
