pub mod collection;
pub mod page_store;

pub use collection::*;
pub use page_store::*;
