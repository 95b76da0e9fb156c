//! picgrid - incremental-fetch, windowed-layout and optimistic-mutation engine
//! for a paginated media gallery.
//!
//! - `store` - Keyed page collections with merge, rollback and invalidation
//! - `fetch` - Debounced, single-flight page fetch scheduling
//! - `layout` - Lane-based windowed grid layout
//! - `selection` - Browse/select mode
//! - `mutation` - Optimistic delete and favorite with reconciliation
//! - `viewer` - Full-screen viewer index sync and scoped asset loading
//! - `service` - Remote gallery API (HTTP and in-memory)
//! - `app` - Session that drives all of the above from host signals

pub mod app;
pub mod config;
pub mod error;
pub mod fetch;
pub mod layout;
pub mod models;
pub mod mutation;
pub mod selection;
pub mod service;
pub mod state;
pub mod store;
pub mod viewer;

pub use app::{GallerySession, SessionNotice};
pub use config::{GalleryConfig, Preferences};
pub use error::{GalleryError, GalleryResult};
pub use state::AppState;
