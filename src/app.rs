//! Gallery session: wires the page store, fetch scheduler, layout, selection,
//! viewer and mutations together behind host-facing signal handlers.
//!
//! All state lives on the thread that owns the session. Remote calls run as
//! spawned tasks and report back over a channel that [`GallerySession::pump`]
//! drains, so scroll handling and layout never wait on the network.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use flume::{Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::{GalleryConfig, Preferences};
use crate::error::{GalleryError, GalleryResult};
use crate::fetch::{Debouncer, FetchScheduler, FetchTrigger, ScrollMetrics};
use crate::layout::{Relayout, Viewport, VisibleWindow, WindowedLayout};
use crate::models::{Page, QueryIdentity, Record, RecordId, Stats};
use crate::mutation::{
    ConfirmationPresenter, DeleteDecision, MutationCoordinator, MutationOutcome,
};
use crate::selection::{SelectionController, SelectionEvent};
use crate::service::{AssetData, ListRequest, SharedService};
use crate::state::{AppState, StateChange};
use crate::store::{CollectionStatus, FetchTicket, MergeOutcome, PageStore, SharedPageStore};
use crate::viewer::{AssetRequest, AssetSlot, ViewerContext, ViewerStep, ViewerSync};

/// Completion of a spawned task.
enum SessionEvent {
    PageFetched {
        ticket: FetchTicket,
        result: GalleryResult<Page>,
    },
    MutationSettled(MutationOutcome),
    AssetLoaded {
        request: AssetRequest,
        result: GalleryResult<AssetData>,
    },
    StatsRefreshed(GalleryResult<Stats>),
    FavoriteResolved {
        id: RecordId,
        result: GalleryResult<bool>,
    },
}

/// Something the host should reflect in its UI.
#[derive(Debug)]
pub enum SessionNotice {
    /// The visible window or its geometry changed.
    ViewChanged,
    FetchFailed { page: u32, error: GalleryError },
    MutationSettled(MutationOutcome),
    StatsUpdated(Stats),
    AssetReady(RecordId),
    FavoriteResolved { id: RecordId, is_favorite: bool },
}

pub struct GallerySession {
    config: GalleryConfig,
    state: Arc<AppState>,
    state_rx: Receiver<StateChange>,
    service: SharedService,
    store: SharedPageStore,
    scheduler: FetchScheduler,
    layout: WindowedLayout,
    resize: Debouncer,
    pending_viewport: Option<Viewport>,
    scroll_offset: f64,
    selection: SelectionController,
    viewer: ViewerSync,
    asset: AssetSlot,
    coordinator: MutationCoordinator,
    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
    /// Fetch, asset and lookup tasks; aborted on teardown.
    reads: Vec<JoinHandle<()>>,
    outstanding: usize,
    preferences_path: Option<PathBuf>,
    closed: bool,
}

impl GallerySession {
    pub fn new(config: GalleryConfig, service: SharedService, state: Arc<AppState>) -> Self {
        let store = PageStore::shared();
        store.lock().activate(state.query_identity());
        let coordinator = MutationCoordinator::new(Arc::clone(&store), Arc::clone(&service));
        let (events_tx, events_rx) = flume::unbounded();
        let state_rx = state.subscribe();

        Self {
            scheduler: FetchScheduler::new(config.proximity_threshold, config.fetch_debounce()),
            layout: WindowedLayout::new(config.column_policy()),
            resize: Debouncer::new(config.resize_debounce()),
            pending_viewport: None,
            scroll_offset: 0.0,
            selection: SelectionController::new(),
            viewer: ViewerSync::new(),
            asset: AssetSlot::new(),
            config,
            state,
            state_rx,
            service,
            store,
            coordinator,
            events_tx,
            events_rx,
            reads: Vec::new(),
            outstanding: 0,
            preferences_path: None,
            closed: false,
        }
    }

    /// Where "remember my choice" answers are persisted.
    pub fn with_preferences_path(mut self, path: PathBuf) -> Self {
        self.preferences_path = Some(path);
        self
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    pub fn store(&self) -> SharedPageStore {
        Arc::clone(&self.store)
    }

    pub fn scheduler(&self) -> &FetchScheduler {
        &self.scheduler
    }

    pub fn layout(&self) -> &WindowedLayout {
        &self.layout
    }

    pub fn selection(&self) -> &SelectionController {
        &self.selection
    }

    pub fn viewer(&self) -> &ViewerSync {
        &self.viewer
    }

    pub fn asset(&self) -> &AssetSlot {
        &self.asset
    }

    pub fn coordinator(&self) -> &MutationCoordinator {
        &self.coordinator
    }

    pub fn scroll_offset(&self) -> f64 {
        self.scroll_offset
    }

    pub fn query(&self) -> QueryIdentity {
        self.state.query_identity()
    }

    pub fn status(&self) -> CollectionStatus {
        self.store.lock().active_status()
    }

    /// Copy of the flattened collection in display order.
    pub fn records(&self) -> Vec<Record> {
        self.store.lock().active_records().to_vec()
    }

    pub fn record_at(&self, index: usize) -> Option<Record> {
        self.store.lock().active_records().get(index).cloned()
    }

    pub fn window(&self) -> VisibleWindow {
        self.layout.window(self.scroll_offset)
    }

    /// Number of spawned tasks whose result has not been pumped yet.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Requests the first page of the active query.
    pub fn start(&mut self, now: Instant) {
        self.start_fetch(FetchTrigger::Initial, now);
    }

    // =========================================================================
    // Host signals
    // =========================================================================

    /// Container resized. The first size applies at once, later ones are debounced.
    pub fn handle_resize(&mut self, viewport: Viewport, now: Instant) {
        if self.layout.viewport().is_degenerate() {
            self.apply_viewport(viewport);
            return;
        }
        self.pending_viewport = Some(viewport);
        self.resize.signal(now);
    }

    pub fn handle_scroll(&mut self, offset: f64, now: Instant) {
        self.scroll_offset = offset.max(0.0);
        self.check_proximity(now);
    }

    /// Rendered height of an item became known.
    pub fn report_measured(&mut self, id: RecordId, height: f64) {
        let delta = self.layout.measure(id, height, self.scroll_offset);
        if delta != 0.0 {
            self.scroll_offset = (self.scroll_offset + delta).max(0.0);
        }
    }

    /// Fires debounced resize and fetch triggers whose windows elapsed.
    pub fn poll_timers(&mut self, now: Instant) {
        if self.resize.poll(now) {
            if let Some(viewport) = self.pending_viewport.take() {
                self.apply_viewport(viewport);
            }
        }
        let ticket = {
            let store = self.store.lock();
            self.scheduler.poll(now, &store)
        };
        if let Some(ticket) = ticket {
            self.spawn_fetch(ticket);
        }
    }

    /// Earliest instant at which [`poll_timers`](Self::poll_timers) has work.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.resize.deadline(), self.scheduler.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn primary_click(&mut self, index: usize, now: Instant) -> Option<SelectionEvent> {
        let id = self.record_at(index)?.id;
        let event = self.selection.primary_click(id, index);
        if let SelectionEvent::OpenViewer { index } = event {
            self.open_viewer(index, now);
        }
        Some(event)
    }

    pub fn secondary_press(&mut self, index: usize) -> Option<SelectionEvent> {
        let id = self.record_at(index)?.id;
        Some(self.selection.secondary_press(id))
    }

    pub fn cancel_selection(&mut self) -> SelectionEvent {
        self.selection.cancel()
    }

    /// Rebuilds the active collection from page 1, keeping it visible meanwhile.
    pub fn refresh(&mut self, now: Instant) {
        self.store.lock().mark_stale();
        self.scheduler.reset();
        self.start_fetch(FetchTrigger::Refresh, now);
    }

    // =========================================================================
    // Viewer
    // =========================================================================

    fn viewer_context(&self) -> ViewerContext {
        let store = self.store.lock();
        let has_next_page = store
            .active()
            .is_some_and(|key| store.has_next_page(key));
        ViewerContext {
            len: store.active_records().len(),
            has_next_page,
            fetching: self.scheduler.is_fetching(),
        }
    }

    pub fn open_viewer(&mut self, index: usize, now: Instant) -> bool {
        let ctx = self.viewer_context();
        if !self.viewer.open(index, ctx) {
            return false;
        }
        self.after_viewer_move(now);
        true
    }

    pub fn viewer_next(&mut self, now: Instant) -> ViewerStep {
        let ctx = self.viewer_context();
        let step = self.viewer.next(ctx);
        match step {
            ViewerStep::Moved { .. } => self.after_viewer_move(now),
            ViewerStep::Pending => {
                if !ctx.fetching {
                    self.scheduler.request_lookahead(now);
                }
            }
            ViewerStep::Blocked => {}
        }
        step
    }

    pub fn viewer_prev(&mut self, now: Instant) -> ViewerStep {
        let step = self.viewer.prev();
        if let ViewerStep::Moved { .. } = step {
            self.after_viewer_move(now);
        }
        step
    }

    pub fn viewer_jump(&mut self, index: usize, now: Instant) -> ViewerStep {
        let ctx = self.viewer_context();
        let step = self.viewer.jump(index, ctx);
        if let ViewerStep::Moved { .. } = step {
            self.after_viewer_move(now);
        }
        step
    }

    pub fn toggle_viewer_controls(&mut self) -> bool {
        self.viewer.toggle_controls()
    }

    /// Closes the viewer and scrolls the grid to the last viewed record.
    pub fn close_viewer(&mut self) -> Option<usize> {
        let index = self.viewer.close()?;
        self.asset.release();
        self.scroll_offset = self.layout.offset_for_index(index, self.scroll_offset);
        debug!(index, offset = self.scroll_offset, "Viewer closed");
        Some(index)
    }

    fn after_viewer_move(&mut self, now: Instant) {
        self.focus_current();
        if self.viewer.needs_lookahead(self.viewer_context()) {
            trace!(index = self.viewer.current_index(), "Viewer at loaded boundary");
            self.scheduler.request_lookahead(now);
        }
    }

    fn focus_current(&mut self) {
        let Some(record) = self.record_at(self.viewer.current_index()) else {
            return;
        };
        if let Some(request) = self.asset.focus(&record) {
            self.spawn_asset(request);
        }
        self.spawn_favorite_lookup(record.id);
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Deletes the selected records after confirmation.
    pub async fn delete_selected(
        &mut self,
        presenter: &dyn ConfirmationPresenter,
    ) -> DeleteDecision {
        let ids = self.selection.selected().to_vec();
        self.delete(&ids, presenter).await
    }

    pub async fn delete(
        &mut self,
        ids: &[RecordId],
        presenter: &dyn ConfirmationPresenter,
    ) -> DeleteDecision {
        let decision = self
            .coordinator
            .confirm_delete(ids, self.state.skip_delete_confirmation(), presenter)
            .await;
        let DeleteDecision::Proceed { remember } = decision else {
            // Dismissing the dialog also leaves selection mode.
            self.selection.cancel();
            return decision;
        };
        if remember {
            self.remember_skip_confirmation();
        }

        self.selection.take();
        // Pages fetched before the delete would reintroduce removed records.
        self.scheduler.reset();
        let pending = self.coordinator.apply_delete(ids);
        info!(
            requested = ids.len(),
            removed = pending.removed().len(),
            "Deleting records"
        );
        self.relayout();

        let coordinator = self.coordinator.clone();
        let tx = self.events_tx.clone();
        self.outstanding += 1;
        // Not tracked in `reads`: a started delete runs to completion.
        tokio::spawn(async move {
            let outcome = coordinator.commit_delete(pending).await;
            let _ = tx.send(SessionEvent::MutationSettled(outcome));
        });
        decision
    }

    /// Flips the favorite flag of a loaded record. False if it is not loaded.
    pub fn toggle_favorite(&mut self, id: RecordId) -> bool {
        let Some(pending) = self.coordinator.apply_favorite(id) else {
            debug!(id, "Favorite toggle for a record that is not loaded");
            return false;
        };
        let coordinator = self.coordinator.clone();
        let tx = self.events_tx.clone();
        self.outstanding += 1;
        tokio::spawn(async move {
            let outcome = coordinator.commit_favorite(pending).await;
            let _ = tx.send(SessionEvent::MutationSettled(outcome));
        });
        true
    }

    fn remember_skip_confirmation(&self) {
        self.state.set_skip_delete_confirmation(true);
        let Some(path) = &self.preferences_path else {
            return;
        };
        if let Err(e) = self.state.preferences().save(path) {
            warn!("Failed to persist preferences: {:#}", e);
        }
    }

    /// Fetches stats if they are missing or stale.
    pub fn request_stats(&mut self) {
        if !self.coordinator.stats().lock().needs_refresh() {
            return;
        }
        let coordinator = self.coordinator.clone();
        let tx = self.events_tx.clone();
        self.track(tokio::spawn(async move {
            let result = coordinator.refresh_stats().await;
            let _ = tx.send(SessionEvent::StatsRefreshed(result));
        }));
    }

    // =========================================================================
    // Event pump
    // =========================================================================

    /// Handles every completion and state change that is ready, without waiting.
    pub fn pump(&mut self, now: Instant) -> Vec<SessionNotice> {
        let mut notices = Vec::new();
        self.drain_state_changes(now, &mut notices);
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event, now, &mut notices);
        }
        self.reads.retain(|handle| !handle.is_finished());
        notices
    }

    /// Waits for one completion and handles it plus anything else ready.
    pub async fn next_notices(&mut self, now: Instant) -> Vec<SessionNotice> {
        let mut notices = Vec::new();
        self.drain_state_changes(now, &mut notices);
        if self.outstanding == 0 || self.closed {
            return notices;
        }
        if let Ok(event) = self.events_rx.recv_async().await {
            self.handle_event(event, now, &mut notices);
        }
        notices.extend(self.pump(now));
        notices
    }

    /// Runs until no spawned task is outstanding.
    pub async fn settle(&mut self, now: Instant) -> Vec<SessionNotice> {
        let mut notices = self.pump(now);
        while self.outstanding > 0 && !self.closed {
            notices.extend(self.next_notices(now).await);
        }
        notices
    }

    fn drain_state_changes(&mut self, now: Instant, notices: &mut Vec<SessionNotice>) {
        let mut latest_query = None;
        while let Ok(change) = self.state_rx.try_recv() {
            if let StateChange::Query(query) = change {
                latest_query = Some(query);
            }
        }
        if let Some(query) = latest_query {
            self.switch_query(query, now);
            notices.push(SessionNotice::ViewChanged);
        }
    }

    fn handle_event(&mut self, event: SessionEvent, now: Instant, notices: &mut Vec<SessionNotice>) {
        self.outstanding = self.outstanding.saturating_sub(1);
        match event {
            SessionEvent::PageFetched { ticket, result } => {
                self.on_page_fetched(ticket, result, now, notices)
            }
            SessionEvent::MutationSettled(outcome) => {
                self.on_mutation_settled(&outcome, now, notices);
                notices.push(SessionNotice::MutationSettled(outcome));
            }
            SessionEvent::AssetLoaded { request, result } => {
                if self.asset.fulfil(request, result) && self.asset.ready().is_some() {
                    notices.push(SessionNotice::AssetReady(request.id));
                }
            }
            SessionEvent::StatsRefreshed(result) => match result {
                Ok(stats) => notices.push(SessionNotice::StatsUpdated(stats)),
                Err(e) => warn!("Failed to refresh stats: {}", e),
            },
            SessionEvent::FavoriteResolved { id, result } => match result {
                Ok(is_favorite) => {
                    notices.push(SessionNotice::FavoriteResolved { id, is_favorite })
                }
                Err(e) => debug!(id, "Favorite lookup failed: {}", e),
            },
        }
    }

    fn on_page_fetched(
        &mut self,
        ticket: FetchTicket,
        result: GalleryResult<Page>,
        now: Instant,
        notices: &mut Vec<SessionNotice>,
    ) {
        let page = match result {
            Ok(page) => page,
            Err(error) => {
                if self.scheduler.complete_failure(&ticket) {
                    warn!(page = ticket.page, query = %ticket.query, "Page fetch failed: {}", error);
                    notices.push(SessionNotice::FetchFailed {
                        page: ticket.page,
                        error,
                    });
                }
                return;
            }
        };
        if !self.scheduler.complete_success(&ticket) {
            debug!(page = ticket.page, "Dropping page from an abandoned fetch");
            return;
        }

        let outcome = self.store.lock().merge(&ticket, page);
        debug!(page = ticket.page, ?outcome, "Page merged");
        if outcome.changed_view() && self.relayout() {
            notices.push(SessionNotice::ViewChanged);
        }
        if outcome == MergeOutcome::Staged {
            self.start_fetch(FetchTrigger::Refresh, now);
            return;
        }
        self.continue_refresh(now);

        if self.viewer.is_awaiting_next() && !self.scheduler.is_fetching() {
            self.scheduler.request_lookahead(now);
        }
        self.check_proximity(now);
    }

    fn on_mutation_settled(
        &mut self,
        outcome: &MutationOutcome,
        now: Instant,
        notices: &mut Vec<SessionNotice>,
    ) {
        if outcome.rolled_back && self.relayout() {
            notices.push(SessionNotice::ViewChanged);
        }
        if let Some(error) = &outcome.error {
            warn!(kind = ?outcome.kind, ids = ?outcome.ids, "Mutation failed: {}", error);
        }
        self.continue_refresh(now);
        self.request_stats();
    }

    /// Keeps a stale or staged collection fetching until it is rebuilt.
    fn continue_refresh(&mut self, now: Instant) {
        if self.status().refreshing && !self.scheduler.is_fetching() {
            self.start_fetch(FetchTrigger::Refresh, now);
        }
    }

    fn switch_query(&mut self, query: QueryIdentity, now: Instant) {
        info!(%query, "Switching query");
        self.scheduler.reset();
        self.store.lock().activate(query);
        self.layout.reset();
        self.scroll_offset = 0.0;
        self.selection.cancel();
        if self.viewer.close().is_some() {
            self.asset.release();
        }
        self.start_fetch(FetchTrigger::Initial, now);
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn apply_viewport(&mut self, viewport: Viewport) {
        let relayout = {
            let store = self.store.lock();
            self.layout
                .resize(viewport, store.active_records(), self.scroll_offset)
        };
        self.scroll_offset = relayout.scroll_offset(self.scroll_offset);
    }

    /// Re-syncs layout with the store. Returns true if anything moved.
    fn relayout(&mut self) -> bool {
        let relayout = {
            let store = self.store.lock();
            self.layout.sync(store.active_records(), self.scroll_offset)
        };
        self.scroll_offset = relayout.scroll_offset(self.scroll_offset);

        let ctx = self.viewer_context();
        match self.viewer.on_collection_changed(ctx) {
            Some(ViewerStep::Moved { .. }) => self.focus_current(),
            Some(ViewerStep::Blocked) if !self.viewer.is_open() => self.asset.release(),
            _ => {}
        }
        !matches!(relayout, Relayout::Unchanged)
    }

    fn check_proximity(&mut self, now: Instant) {
        let metrics = ScrollMetrics {
            offset: self.scroll_offset,
            viewport_height: self.layout.viewport().height,
            content_height: self.layout.total_height(),
        };
        if self.layout.viewport().is_degenerate() {
            return;
        }
        self.scheduler.observe_scroll(metrics, now);
    }

    fn start_fetch(&mut self, trigger: FetchTrigger, now: Instant) {
        let ticket = {
            let store = self.store.lock();
            self.scheduler.start(trigger, now, &store)
        };
        if let Some(ticket) = ticket {
            self.spawn_fetch(ticket);
        }
    }

    fn spawn_fetch(&mut self, ticket: FetchTicket) {
        let request = ListRequest::for_ticket(&ticket, self.config.page_size);
        let service = Arc::clone(&self.service);
        let tx = self.events_tx.clone();
        self.track(tokio::spawn(async move {
            let result = service.list_records(&request).await;
            let _ = tx.send(SessionEvent::PageFetched { ticket, result });
        }));
    }

    fn spawn_asset(&mut self, request: AssetRequest) {
        let service = Arc::clone(&self.service);
        let tx = self.events_tx.clone();
        self.track(tokio::spawn(async move {
            let result = service.get_full_asset(request.id, request.kind).await;
            let _ = tx.send(SessionEvent::AssetLoaded { request, result });
        }));
    }

    fn spawn_favorite_lookup(&mut self, id: RecordId) {
        let coordinator = self.coordinator.clone();
        let tx = self.events_tx.clone();
        self.track(tokio::spawn(async move {
            let result = coordinator.favorite_status(id).await;
            let _ = tx.send(SessionEvent::FavoriteResolved { id, result });
        }));
    }

    fn track(&mut self, handle: JoinHandle<()>) {
        self.outstanding += 1;
        self.reads.push(handle);
    }

    /// Clears timers, releases the viewer asset and abandons pending reads.
    pub fn teardown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.scheduler.cancel();
        self.resize.cancel();
        self.pending_viewport = None;
        self.viewer.close();
        self.asset.release();
        for handle in self.reads.drain(..) {
            handle.abort();
        }
        info!("Session closed");
    }
}

impl Drop for GallerySession {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Loads preferences from `path` into `state`, logging instead of failing.
pub fn restore_preferences(state: &AppState, path: &std::path::Path) {
    match Preferences::load(path) {
        Ok(prefs) => state.apply_preferences(prefs),
        Err(e) => warn!("Ignoring unreadable preferences: {:#}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;

    use crate::models::{Category, OrderKey};
    use crate::mutation::{Confirmation, FixedConfirmation};
    use crate::selection::SelectionMode;
    use crate::service::{GalleryService, MemoryGalleryService, Operation};
    use crate::viewer::PlaybackState;

    const DEBOUNCE: Duration = Duration::from_millis(200);

    struct Harness {
        session: GallerySession,
        service: Arc<MemoryGalleryService>,
        now: Instant,
    }

    impl Harness {
        async fn new(count: u64) -> Self {
            let service = Arc::new(MemoryGalleryService::generated(count));
            let state = Arc::new(AppState::with_seed(1_700_000_000));
            let shared: SharedService = service.clone();
            let mut session = GallerySession::new(GalleryConfig::default(), shared, state);
            let now = Instant::now();
            session.handle_resize(Viewport::new(1024.0, 400.0), now);
            session.start(now);
            session.settle(now).await;
            Self {
                session,
                service,
                now,
            }
        }

        fn ids(&self) -> Vec<RecordId> {
            self.session.records().iter().map(|r| r.id).collect()
        }

        /// Lets debounce windows elapse and runs whatever they start.
        async fn tick(&mut self) -> Vec<SessionNotice> {
            self.now += DEBOUNCE;
            self.session.poll_timers(self.now);
            self.session.settle(self.now).await
        }

        fn scroll_to_end(&mut self) {
            let end = self.session.layout().total_height() - 400.0;
            self.session.handle_scroll(end, self.now);
        }
    }

    fn skip() -> FixedConfirmation {
        FixedConfirmation(Confirmation {
            confirmed: true,
            remember: false,
        })
    }

    #[tokio::test]
    async fn test_initial_page_is_laid_out() {
        let h = Harness::new(45).await;
        assert_eq!(h.session.records().len(), 15);
        assert_eq!(h.session.layout().columns(), 4);
        assert!(!h.session.window().items.is_empty());
        assert_eq!(h.service.calls(Operation::List), 1);
    }

    #[tokio::test]
    async fn test_scroll_triggers_one_fetch() {
        let mut h = Harness::new(45).await;
        h.service.set_latency(Some(Duration::from_millis(20)));

        h.scroll_to_end();
        h.now += DEBOUNCE;
        h.session.poll_timers(h.now);
        assert!(h.session.scheduler().is_fetching());

        // Second signal while page 2 is in flight.
        h.scroll_to_end();
        h.now += DEBOUNCE;
        h.session.poll_timers(h.now);
        assert_eq!(h.session.scheduler().issued(), 2);

        h.session.settle(h.now).await;
        assert_eq!(h.session.records().len(), 30);
        assert_eq!(h.service.calls(Operation::List), 2);
    }

    #[tokio::test]
    async fn test_exhausted_collection_stops_fetching() {
        let mut h = Harness::new(20).await;
        h.scroll_to_end();
        h.tick().await;
        assert_eq!(h.session.records().len(), 20);
        assert!(h.session.status().exhausted);

        h.scroll_to_end();
        h.tick().await;
        assert_eq!(h.service.calls(Operation::List), 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_returns_to_idle() {
        let mut h = Harness::new(45).await;
        h.service.fail_next(Operation::List, 1);
        h.scroll_to_end();
        let notices = h.tick().await;
        assert!(notices
            .iter()
            .any(|n| matches!(n, SessionNotice::FetchFailed { page: 2, .. })));
        assert!(!h.session.scheduler().is_fetching());
        assert_eq!(h.session.records().len(), 15);

        h.scroll_to_end();
        h.tick().await;
        assert_eq!(h.session.records().len(), 30);
    }

    #[tokio::test]
    async fn test_viewer_lookahead_scenario() {
        let mut h = Harness::new(45).await;
        assert!(h.session.open_viewer(14, h.now));
        h.tick().await;
        assert_eq!(h.session.scheduler().issued(), 2);
        assert_eq!(h.session.records().len(), 30);

        assert_eq!(
            h.session.viewer_next(h.now),
            ViewerStep::Moved { index: 15 }
        );
        h.tick().await;
        assert_eq!(h.session.scheduler().issued(), 2);

        for _ in 16..=29 {
            h.session.viewer_next(h.now);
        }
        assert_eq!(h.session.viewer().current_index(), 29);
        h.tick().await;
        assert_eq!(h.session.scheduler().issued(), 3);
        assert_eq!(h.session.records().len(), 45);
    }

    #[tokio::test]
    async fn test_pending_next_completes_after_fetch() {
        let mut h = Harness::new(45).await;
        h.session.open_viewer(14, h.now);
        assert_eq!(h.session.viewer_next(h.now), ViewerStep::Pending);
        h.tick().await;
        assert_eq!(h.session.viewer().current_index(), 15);
    }

    #[tokio::test]
    async fn test_viewer_asset_is_scoped_to_current_slide() {
        let mut h = Harness::new(45).await;
        // Index 0 is id 45, an image.
        h.session.open_viewer(0, h.now);
        let notices = h.session.settle(h.now).await;
        assert!(notices
            .iter()
            .any(|n| matches!(n, SessionNotice::AssetReady(45))));
        assert_eq!(h.session.asset().live_handles(), 1);

        // Index 3 is id 42, a video.
        for _ in 0..3 {
            h.session.viewer_next(h.now);
        }
        h.session.settle(h.now).await;
        assert_eq!(h.session.asset().live_handles(), 0);
        assert_eq!(h.session.asset().playing(), Some(42));

        h.session.viewer_next(h.now);
        assert!(!matches!(
            h.session.asset().state(),
            crate::viewer::AssetState::Streaming {
                playback: PlaybackState::Playing,
                ..
            }
        ));
        h.session.close_viewer();
        h.session.settle(h.now).await;
        assert_eq!(h.session.asset().live_handles(), 0);
    }

    #[tokio::test]
    async fn test_delete_failure_restores_order() {
        let mut h = Harness::new(15).await;
        h.session.state().set_skip_delete_confirmation(true);
        let before = h.ids();
        let index_of = |id| before.iter().position(|&x| x == id).unwrap();

        h.session.secondary_press(index_of(5));
        h.session.primary_click(index_of(9), h.now);
        assert_eq!(h.session.selection().selected(), &[5, 9]);

        h.service.fail_next(Operation::Delete, 1);
        // Confirmation is skipped, so the presenter's answer is never consulted.
        let decision = h
            .session
            .delete_selected(&FixedConfirmation(Confirmation {
                confirmed: false,
                remember: false,
            }))
            .await;
        assert_eq!(decision, DeleteDecision::Proceed { remember: false });
        assert_eq!(h.session.selection().mode(), SelectionMode::Browsing);

        let optimistic = h.ids();
        assert_eq!(optimistic.len(), 13);
        assert!(!optimistic.contains(&5) && !optimistic.contains(&9));

        let notices = h.session.settle(h.now).await;
        assert!(notices.iter().any(|n| matches!(
            n,
            SessionNotice::MutationSettled(outcome) if outcome.rolled_back
        )));
        assert_eq!(h.ids(), before);
    }

    #[tokio::test]
    async fn test_delete_success_refreshes_collection_and_stats() {
        let mut h = Harness::new(45).await;
        h.scroll_to_end();
        h.tick().await;
        assert_eq!(h.session.records().len(), 30);

        let doomed: Vec<RecordId> = vec![45, 30];
        h.session.delete(&doomed, &skip()).await;
        let notices = h.session.settle(h.now).await;

        let ids: HashSet<RecordId> = h.ids().into_iter().collect();
        assert!(!ids.contains(&45) && !ids.contains(&30));
        // Rebuilt from the server up to the previously loaded page count.
        assert_eq!(h.session.records().len(), 30);
        assert!(!h.session.status().refreshing);
        assert!(notices
            .iter()
            .any(|n| matches!(n, SessionNotice::StatsUpdated(s) if s.count == 43)));
    }

    #[tokio::test]
    async fn test_cancelled_dialog_leaves_selection_mode() {
        let mut h = Harness::new(15).await;
        h.session.secondary_press(0);
        let decision = h
            .session
            .delete_selected(&FixedConfirmation(Confirmation {
                confirmed: false,
                remember: false,
            }))
            .await;
        assert_eq!(decision, DeleteDecision::Cancelled);
        assert_eq!(h.session.selection().mode(), SelectionMode::Browsing);
        assert_eq!(h.ids().len(), 15);
        assert_eq!(h.service.calls(Operation::Delete), 0);
    }

    #[tokio::test]
    async fn test_remembered_confirmation_is_persisted() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("preferences.toml");
        let service = Arc::new(MemoryGalleryService::generated(15));
        let shared: SharedService = service.clone();
        let mut session =
            GallerySession::new(GalleryConfig::default(), shared, Arc::new(AppState::with_seed(1)))
                .with_preferences_path(path.clone());
        let now = Instant::now();
        session.start(now);
        session.settle(now).await;

        let remember = FixedConfirmation(Confirmation {
            confirmed: true,
            remember: true,
        });
        session.delete(&[3], &remember).await;
        session.settle(now).await;

        assert!(session.state().skip_delete_confirmation());
        assert!(Preferences::load(&path).unwrap().skip_delete_confirmation);
        assert!(!service.contains(3));
        assert_eq!(session.records().len(), 14);
    }

    #[tokio::test]
    async fn test_favorite_rolls_back_on_failure() {
        let mut h = Harness::new(15).await;
        h.service.fail_next(Operation::ToggleFavorite, 1);
        assert!(h.session.toggle_favorite(15));
        assert!(h.session.record_at(0).unwrap().is_favorite);

        h.session.settle(h.now).await;
        assert!(!h.session.record_at(0).unwrap().is_favorite);
        assert!(!h.session.toggle_favorite(999));
    }

    #[tokio::test]
    async fn test_overlapping_favorite_toggles_match_server() {
        let mut h = Harness::new(15).await;
        h.service.fail_next(Operation::ToggleFavorite, 1);
        assert!(h.session.toggle_favorite(15));
        assert!(h.session.toggle_favorite(15));

        h.session.settle(h.now).await;
        let server = h.service.get_favorite(15).await.unwrap();
        assert!(server);
        assert_eq!(h.session.record_at(0).unwrap().is_favorite, server);
        assert!(!h.session.status().refreshing);
        assert_eq!(h.session.records().len(), 15);
    }

    #[tokio::test]
    async fn test_query_change_restarts_from_page_one() {
        let mut h = Harness::new(45).await;
        h.scroll_to_end();
        h.tick().await;
        assert_eq!(h.session.records().len(), 30);

        h.session.state().set_category(Category::Video);
        h.session.settle(h.now).await;
        let records = h.session.records();
        assert_eq!(records.len(), 6);
        assert!(records.iter().all(|r| r.is_video()));
        assert_eq!(h.session.scroll_offset(), 0.0);

        h.session.state().set_order(OrderKey::Random);
        h.session.settle(h.now).await;
        assert_eq!(h.session.query().seed, Some(1_700_000_000));
        assert_eq!(h.session.records().len(), 6);

        // Back to the first query: its collection was evicted, so page 1 only.
        h.session.state().set_order(OrderKey::CreatedAt);
        h.session.state().set_category(Category::All);
        h.session.settle(h.now).await;
        assert_eq!(h.session.records().len(), 15);
        assert_eq!(h.service.calls(Operation::List), 5);
    }

    #[tokio::test]
    async fn test_late_page_for_previous_query_is_dropped() {
        let mut h = Harness::new(45).await;
        h.service.set_latency(Some(Duration::from_millis(20)));
        h.scroll_to_end();
        h.now += DEBOUNCE;
        h.session.poll_timers(h.now);
        assert!(h.session.scheduler().is_fetching());

        h.session.state().set_category(Category::Image);
        h.session.settle(h.now).await;
        let records = h.session.records();
        assert_eq!(records.len(), 15);
        assert!(records.iter().all(|r| !r.is_video()));
    }

    #[tokio::test]
    async fn test_resize_is_debounced() {
        let mut h = Harness::new(45).await;
        h.session.handle_resize(Viewport::new(500.0, 800.0), h.now);
        assert_eq!(h.session.layout().columns(), 4);
        h.now += Duration::from_millis(150);
        h.session.poll_timers(h.now);
        assert_eq!(h.session.layout().columns(), 1);
    }

    #[tokio::test]
    async fn test_teardown_clears_timers() {
        let mut h = Harness::new(45).await;
        h.scroll_to_end();
        assert!(h.session.next_deadline().is_some());
        h.session.teardown();
        assert!(h.session.next_deadline().is_none());
        h.now += DEBOUNCE;
        h.session.poll_timers(h.now);
        assert_eq!(h.session.scheduler().issued(), 1);
    }
}
