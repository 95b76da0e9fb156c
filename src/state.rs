//! Shared UI state: sort, filter and remembered choices.
//!
//! Consumers read through accessors and learn about changes from
//! [`AppState::subscribe`]. Query-affecting changes are published as the new
//! [`QueryIdentity`] so the session can switch collections.

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::config::Preferences;
use crate::models::{Category, OrderKey, QueryIdentity, SortDirection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UiState {
    pub order: OrderKey,
    pub direction: SortDirection,
    pub category: Category,
    /// Fixed for the session; sent only with random order.
    pub seed: u64,
    pub skip_delete_confirmation: bool,
    pub dark_mode: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    Query(QueryIdentity),
    SkipDeleteConfirmation(bool),
    DarkMode(bool),
}

pub struct AppState {
    inner: RwLock<UiState>,
    subscribers: Mutex<Vec<flume::Sender<StateChange>>>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    /// Seeds random order from the wall clock, in whole seconds.
    pub fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self::with_seed(seed)
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            inner: RwLock::new(UiState {
                order: OrderKey::default(),
                direction: SortDirection::default(),
                category: Category::default(),
                seed,
                skip_delete_confirmation: false,
                dark_mode: false,
            }),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn snapshot(&self) -> UiState {
        *self.inner.read()
    }

    pub fn subscribe(&self) -> flume::Receiver<StateChange> {
        let (tx, rx) = flume::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn query_identity(&self) -> QueryIdentity {
        identity_of(&self.inner.read())
    }

    /// Direction is fixed while ordering randomly.
    pub fn direction_enabled(&self) -> bool {
        self.inner.read().order != OrderKey::Random
    }

    pub fn skip_delete_confirmation(&self) -> bool {
        self.inner.read().skip_delete_confirmation
    }

    pub fn dark_mode(&self) -> bool {
        self.inner.read().dark_mode
    }

    pub fn set_order(&self, order: OrderKey) -> bool {
        self.update_query(|s| {
            s.order = order;
            if order == OrderKey::Random {
                s.direction = SortDirection::Desc;
            }
        })
    }

    /// Ignored while ordering randomly.
    pub fn set_direction(&self, direction: SortDirection) -> bool {
        if !self.direction_enabled() {
            debug!("Direction is fixed for random order");
            return false;
        }
        self.update_query(|s| s.direction = direction)
    }

    pub fn toggle_direction(&self) -> bool {
        let current = self.inner.read().direction;
        self.set_direction(current.flipped())
    }

    pub fn set_category(&self, category: Category) -> bool {
        self.update_query(|s| s.category = category)
    }

    pub fn set_skip_delete_confirmation(&self, skip: bool) -> bool {
        {
            let mut state = self.inner.write();
            if state.skip_delete_confirmation == skip {
                return false;
            }
            state.skip_delete_confirmation = skip;
        }
        self.publish(StateChange::SkipDeleteConfirmation(skip));
        true
    }

    pub fn set_dark_mode(&self, dark: bool) -> bool {
        {
            let mut state = self.inner.write();
            if state.dark_mode == dark {
                return false;
            }
            state.dark_mode = dark;
        }
        self.publish(StateChange::DarkMode(dark));
        true
    }

    pub fn apply_preferences(&self, prefs: Preferences) {
        self.set_skip_delete_confirmation(prefs.skip_delete_confirmation);
        self.set_dark_mode(prefs.dark_mode);
    }

    pub fn preferences(&self) -> Preferences {
        let state = self.inner.read();
        Preferences {
            skip_delete_confirmation: state.skip_delete_confirmation,
            dark_mode: state.dark_mode,
        }
    }

    fn update_query<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut UiState),
    {
        let (before, after) = {
            let mut state = self.inner.write();
            let before = identity_of(&state);
            f(&mut state);
            (before, identity_of(&state))
        };
        if before == after {
            return false;
        }
        debug!(query = %after, "Query changed");
        self.publish(StateChange::Query(after));
        true
    }

    fn publish(&self, change: StateChange) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(change).is_ok());
    }
}

fn identity_of(state: &UiState) -> QueryIdentity {
    QueryIdentity {
        order: state.order,
        direction: state.direction,
        category: state.category,
        seed: (state.order == OrderKey::Random).then_some(state.seed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_identity() {
        let state = AppState::with_seed(42);
        let query = state.query_identity();
        assert_eq!(query.order, OrderKey::CreatedAt);
        assert_eq!(query.direction, SortDirection::Desc);
        assert_eq!(query.category, Category::All);
        assert_eq!(query.seed, None);
    }

    #[test]
    fn test_random_forces_desc_and_locks_direction() {
        let state = AppState::with_seed(42);
        state.set_direction(SortDirection::Asc);
        state.set_order(OrderKey::Random);

        let query = state.query_identity();
        assert_eq!(query.direction, SortDirection::Desc);
        assert_eq!(query.seed, Some(42));
        assert!(!state.direction_enabled());
        assert!(!state.toggle_direction());

        state.set_order(OrderKey::CreatedAt);
        assert!(state.toggle_direction());
        assert_eq!(state.query_identity().direction, SortDirection::Asc);
    }

    #[test]
    fn test_seed_is_reused() {
        let state = AppState::with_seed(7);
        state.set_order(OrderKey::Random);
        let first = state.query_identity();
        state.set_order(OrderKey::CreatedAt);
        state.set_order(OrderKey::Random);
        assert_eq!(state.query_identity(), first);
    }

    #[test]
    fn test_subscribers_see_changes() {
        let state = AppState::with_seed(1);
        let rx = state.subscribe();
        assert!(state.set_category(Category::Video));
        assert!(!state.set_category(Category::Video));
        state.set_skip_delete_confirmation(true);

        let changes: Vec<_> = rx.try_iter().collect();
        assert_eq!(changes.len(), 2);
        assert!(matches!(changes[0], StateChange::Query(q) if q.category == Category::Video));
        assert_eq!(changes[1], StateChange::SkipDeleteConfirmation(true));
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let state = AppState::with_seed(1);
        drop(state.subscribe());
        state.set_dark_mode(true);
        assert!(state.subscribers.lock().is_empty());
        assert!(state.preferences().dark_mode);
    }
}
