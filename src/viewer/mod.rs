//! Full-screen viewer.
//!
//! - `ViewerSync` - Current index, navigation affordances and lookahead
//! - `AssetSlot` - Full-resolution asset scoped to the current slide

pub mod asset;
pub mod sync;

pub use asset::*;
pub use sync::*;
