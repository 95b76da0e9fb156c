//! Optimistic delete and favorite mutations.
//!
//! Local edits are applied to the page store before the remote call is made,
//! so the grid reflects them immediately. Failures restore the prior state.
//! Every mutation, successful or not, ends by marking the collection and the
//! cached stats stale so the next fetch brings them back in line with the
//! server.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{GalleryError, GalleryResult};
use crate::models::{RecordId, Stats};
use crate::service::SharedService;
use crate::store::{MutationSnapshot, SharedPageStore};

/// Favorite lookups remembered per record.
const FAVORITE_CACHE_CAPACITY: usize = 512;

/// Answer of the confirmation dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation {
    pub confirmed: bool,
    /// Skip the dialog from now on.
    pub remember: bool,
}

/// External dialog asked before destructive actions.
#[async_trait]
pub trait ConfirmationPresenter: Send + Sync {
    async fn confirm_delete(&self, ids: &[RecordId]) -> Confirmation;
}

/// Presenter that answers without asking anyone.
#[derive(Debug, Clone, Copy)]
pub struct FixedConfirmation(pub Confirmation);

#[async_trait]
impl ConfirmationPresenter for FixedConfirmation {
    async fn confirm_delete(&self, _ids: &[RecordId]) -> Confirmation {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteDecision {
    Proceed { remember: bool },
    Cancelled,
}

/// Aggregate counts plus a stale flag.
#[derive(Debug, Default)]
pub struct StatsCache {
    value: Option<Stats>,
    stale: bool,
    fetched_at: Option<Instant>,
}

pub type SharedStats = Arc<Mutex<StatsCache>>;

impl StatsCache {
    pub fn get(&self) -> Option<Stats> {
        self.value
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn needs_refresh(&self) -> bool {
        self.value.is_none() || self.stale
    }

    pub fn fetched_at(&self) -> Option<Instant> {
        self.fetched_at
    }

    pub fn invalidate(&mut self) {
        self.stale = true;
    }

    pub fn store(&mut self, stats: Stats) {
        self.value = Some(stats);
        self.stale = false;
        self.fetched_at = Some(Instant::now());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Delete,
    Favorite,
}

/// Optimistic delete that has been applied locally but not yet sent.
#[derive(Debug)]
pub struct PendingDelete {
    ids: Vec<RecordId>,
    snapshot: MutationSnapshot,
}

impl PendingDelete {
    pub fn ids(&self) -> &[RecordId] {
        &self.ids
    }

    /// Ids that were loaded and removed from view.
    pub fn removed(&self) -> &[RecordId] {
        self.snapshot.removed()
    }
}

/// Optimistic favorite flip that has been applied locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingFavorite {
    pub id: RecordId,
    pub is_favorite: bool,
}

/// How a mutation settled.
#[derive(Debug)]
pub struct MutationOutcome {
    pub kind: MutationKind,
    pub ids: Vec<RecordId>,
    pub rolled_back: bool,
    pub error: Option<GalleryError>,
}

impl MutationOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Clone)]
pub struct MutationCoordinator {
    store: SharedPageStore,
    service: SharedService,
    stats: SharedStats,
    favorites: Arc<Mutex<LruCache<RecordId, bool>>>,
}

impl MutationCoordinator {
    pub fn new(store: SharedPageStore, service: SharedService) -> Self {
        let capacity = NonZeroUsize::new(FAVORITE_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            service,
            stats: Arc::new(Mutex::new(StatsCache::default())),
            favorites: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    pub fn stats(&self) -> SharedStats {
        Arc::clone(&self.stats)
    }

    /// Asks the presenter unless the user opted out of confirmations.
    pub async fn confirm_delete(
        &self,
        ids: &[RecordId],
        skip_confirmation: bool,
        presenter: &dyn ConfirmationPresenter,
    ) -> DeleteDecision {
        if ids.is_empty() {
            return DeleteDecision::Cancelled;
        }
        if skip_confirmation {
            return DeleteDecision::Proceed { remember: false };
        }
        let answer = presenter.confirm_delete(ids).await;
        if answer.confirmed {
            DeleteDecision::Proceed {
                remember: answer.remember,
            }
        } else {
            debug!(count = ids.len(), "Delete cancelled");
            DeleteDecision::Cancelled
        }
    }

    /// Removes `ids` from every cached collection right away.
    pub fn apply_delete(&self, ids: &[RecordId]) -> PendingDelete {
        let set: HashSet<RecordId> = ids.iter().copied().collect();
        let snapshot = self.store.lock().remove_by_ids(&set);
        debug!(
            requested = ids.len(),
            removed = snapshot.removed().len(),
            "Applied optimistic delete"
        );
        PendingDelete {
            ids: ids.to_vec(),
            snapshot,
        }
    }

    /// Sends the delete, rolls back on failure, then invalidates.
    pub async fn commit_delete(&self, pending: PendingDelete) -> MutationOutcome {
        let PendingDelete { ids, snapshot } = pending;
        let result = self.service.delete_records(&ids).await;

        let rolled_back = match &result {
            Ok(()) => {
                info!(count = ids.len(), "Deleted records");
                let mut favorites = self.favorites.lock();
                for id in &ids {
                    favorites.pop(id);
                }
                false
            }
            Err(e) => {
                warn!(error = %e, ids = ?ids, "Delete failed, rolling back");
                self.store.lock().rollback(snapshot) > 0
            }
        };
        self.settle(MutationKind::Delete);

        MutationOutcome {
            kind: MutationKind::Delete,
            ids,
            rolled_back,
            error: result.err(),
        }
    }

    /// Flips the favorite flag locally. `None` if the record is not loaded.
    pub fn apply_favorite(&self, id: RecordId) -> Option<PendingFavorite> {
        let mut store = self.store.lock();
        if store.patch_record(id, |r| r.is_favorite = !r.is_favorite) == 0 {
            return None;
        }
        let is_favorite = store.find_record(id).map(|r| r.is_favorite)?;
        Some(PendingFavorite { id, is_favorite })
    }

    pub async fn commit_favorite(&self, pending: PendingFavorite) -> MutationOutcome {
        let PendingFavorite { id, is_favorite } = pending;
        let result = self.service.toggle_favorite(id).await;

        // Other toggles of the same record may be in flight, so the cached
        // answer is dropped either way and a failure undoes only this flip.
        self.favorites.lock().pop(&id);
        let rolled_back = match &result {
            Ok(()) => {
                debug!(id, is_favorite, "Favorite toggled");
                false
            }
            Err(e) => {
                warn!(error = %e, id, "Favorite toggle failed, restoring flag");
                self.store
                    .lock()
                    .patch_record(id, |r| r.is_favorite = !r.is_favorite)
                    > 0
            }
        };
        self.settle(MutationKind::Favorite);

        MutationOutcome {
            kind: MutationKind::Favorite,
            ids: vec![id],
            rolled_back,
            error: result.err(),
        }
    }

    /// Favorite state as the server sees it; updates the loaded record.
    pub async fn favorite_status(&self, id: RecordId) -> GalleryResult<bool> {
        if let Some(&cached) = self.favorites.lock().get(&id) {
            return Ok(cached);
        }
        let is_favorite = self.service.get_favorite(id).await?;
        self.favorites.lock().put(id, is_favorite);
        let patched = self
            .store
            .lock()
            .patch_record(id, move |r| r.is_favorite = is_favorite);
        debug!(id, is_favorite, patched, "Reconciled favorite status");
        Ok(is_favorite)
    }

    /// Cached stats, fetching them when missing or stale.
    pub async fn current_stats(&self) -> GalleryResult<Stats> {
        {
            let cache = self.stats.lock();
            if let (Some(stats), false) = (cache.get(), cache.needs_refresh()) {
                return Ok(stats);
            }
        }
        self.refresh_stats().await
    }

    pub async fn refresh_stats(&self) -> GalleryResult<Stats> {
        let stats = self.service.get_stats().await?;
        self.stats.lock().store(stats);
        Ok(stats)
    }

    fn settle(&self, kind: MutationKind) {
        self.store.lock().mark_stale();
        self.stats.lock().invalidate();
        debug!(?kind, "Mutation settled, collection and stats invalidated");
    }
}
