//! Windowed grid layout.
//!
//! - `ColumnPolicy` - Breakpoints, overscan and fallback sizing
//! - `WindowedLayout` - Lane placement, measurement and visible-range queries

pub mod columns;
pub mod windowed;

pub use columns::*;
pub use windowed::*;
