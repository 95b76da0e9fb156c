//! Decides when the next page is requested.
//!
//! At most one fetch is in flight per session. Proximity and lookahead
//! signals are debounced into a single pending trigger, which is dropped on
//! fire if the collection is exhausted or a fetch is already running.

use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::debounce::Debouncer;
use crate::store::{FetchTicket, PageStore};

/// Distance from the bottom of the content that arms the proximity trigger.
pub const DEFAULT_PROXIMITY_THRESHOLD: f64 = 300.0;

/// Quiet period before a scroll or viewer signal turns into a fetch.
pub const DEFAULT_FETCH_DEBOUNCE: Duration = Duration::from_millis(200);

/// Why a fetch was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchTrigger {
    /// First page of a freshly activated collection.
    Initial,
    /// Grid scrolled close to the end of rendered content.
    Proximity,
    /// Viewer reached the last loaded record.
    Lookahead,
    /// Next page of a staged refresh after invalidation.
    Refresh,
}

/// Scroll geometry reported by the viewport.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScrollMetrics {
    pub offset: f64,
    pub viewport_height: f64,
    pub content_height: f64,
}

impl ScrollMetrics {
    pub fn near_end(&self, threshold: f64) -> bool {
        self.offset + self.viewport_height >= self.content_height - threshold
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Idle,
    Fetching { ticket: FetchTicket, since: Instant },
}

pub struct FetchScheduler {
    state: FetchState,
    threshold: f64,
    debounce: Debouncer,
    pending: Option<FetchTrigger>,
    issued: u64,
    failures: u64,
}

impl FetchScheduler {
    pub fn new(threshold: f64, debounce: Duration) -> Self {
        Self {
            state: FetchState::Idle,
            threshold,
            debounce: Debouncer::new(debounce),
            pending: None,
            issued: 0,
            failures: 0,
        }
    }

    pub fn state(&self) -> FetchState {
        self.state
    }

    pub fn is_fetching(&self) -> bool {
        matches!(self.state, FetchState::Fetching { .. })
    }

    pub fn in_flight(&self) -> Option<FetchTicket> {
        match self.state {
            FetchState::Fetching { ticket, .. } => Some(ticket),
            FetchState::Idle => None,
        }
    }

    /// Number of fetches started since creation.
    pub fn issued(&self) -> u64 {
        self.issued
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn pending_trigger(&self) -> Option<FetchTrigger> {
        self.pending
    }

    /// Instant at which [`poll`](Self::poll) should next be called.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.debounce.deadline()
    }

    /// Feeds a scroll event. Returns true if it armed the proximity trigger.
    pub fn observe_scroll(&mut self, metrics: ScrollMetrics, now: Instant) -> bool {
        if !metrics.near_end(self.threshold) {
            return false;
        }
        trace!(
            offset = metrics.offset,
            content = metrics.content_height,
            "Scroll near end"
        );
        self.arm(FetchTrigger::Proximity, now);
        true
    }

    /// Viewer reached the last loaded record.
    pub fn request_lookahead(&mut self, now: Instant) {
        self.arm(FetchTrigger::Lookahead, now);
    }

    fn arm(&mut self, trigger: FetchTrigger, now: Instant) {
        // Lookahead wins over proximity when both land in one window.
        if self.pending != Some(FetchTrigger::Lookahead) {
            self.pending = Some(trigger);
        }
        self.debounce.signal(now);
    }

    /// Fires a debounced trigger whose quiet period has elapsed.
    pub fn poll(&mut self, now: Instant, store: &PageStore) -> Option<FetchTicket> {
        if !self.debounce.poll(now) {
            return None;
        }
        let trigger = self.pending.take()?;
        self.start(trigger, now, store)
    }

    /// Starts a fetch without waiting for the debounce window.
    pub fn start(
        &mut self,
        trigger: FetchTrigger,
        now: Instant,
        store: &PageStore,
    ) -> Option<FetchTicket> {
        if let FetchState::Fetching { ticket, .. } = self.state {
            debug!(?trigger, page = ticket.page, "Fetch already in flight, coalescing");
            return None;
        }
        let Some(ticket) = store.active_ticket() else {
            debug!(?trigger, "Collection exhausted, dropping trigger");
            return None;
        };
        debug!(?trigger, page = ticket.page, query = %ticket.query, "Starting fetch");
        self.state = FetchState::Fetching { ticket, since: now };
        self.issued += 1;
        Some(ticket)
    }

    /// Marks the in-flight fetch as done. Returns false for a ticket that is no
    /// longer the one in flight (a fetch abandoned by `reset`).
    pub fn complete_success(&mut self, ticket: &FetchTicket) -> bool {
        self.finish(ticket)
    }

    /// Returns to idle without scheduling a retry; the next signal retries.
    pub fn complete_failure(&mut self, ticket: &FetchTicket) -> bool {
        let finished = self.finish(ticket);
        if finished {
            self.failures += 1;
        }
        finished
    }

    fn finish(&mut self, ticket: &FetchTicket) -> bool {
        match self.state {
            FetchState::Fetching { ticket: current, since } if current == *ticket => {
                trace!(page = ticket.page, elapsed = ?since.elapsed(), "Fetch finished");
                self.state = FetchState::Idle;
                true
            }
            _ => false,
        }
    }

    /// Forgets the in-flight fetch and pending triggers, e.g. on query change.
    pub fn reset(&mut self) {
        self.state = FetchState::Idle;
        self.pending = None;
        self.debounce.cancel();
    }

    /// Clears timers on teardown.
    pub fn cancel(&mut self) {
        self.reset();
    }
}

impl Default for FetchScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_PROXIMITY_THRESHOLD, DEFAULT_FETCH_DEBOUNCE)
    }
}
