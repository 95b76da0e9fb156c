//! Page fetch scheduling.
//!
//! - `FetchScheduler` - Idle/Fetching state machine fed by scroll and viewer signals
//! - `Debouncer` - Deadline-based coalescing of bursty signals

pub mod debounce;
pub mod scheduler;

pub use debounce::Debouncer;
pub use scheduler::*;
