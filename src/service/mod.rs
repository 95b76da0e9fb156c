//! Remote gallery service.
//!
//! - `GalleryService` - The operations the engine consumes
//! - `HttpGalleryService` - JSON API client
//! - `MemoryGalleryService` - In-process implementation for tests and demos

pub mod http;
pub mod memory;
pub mod wire;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::GalleryResult;
use crate::models::{MediaKind, Page, QueryIdentity, RecordId, Stats};
use crate::store::FetchTicket;

pub use http::HttpGalleryService;
pub use memory::{MemoryGalleryService, Operation};

/// Parameters of one page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListRequest {
    pub page: u32,
    pub page_size: u32,
    pub query: QueryIdentity,
}

impl ListRequest {
    pub fn for_ticket(ticket: &FetchTicket, page_size: u32) -> Self {
        Self {
            page: ticket.page,
            page_size,
            query: ticket.query,
        }
    }
}

/// Full-resolution bytes of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetData {
    pub id: RecordId,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait GalleryService: Send + Sync {
    async fn list_records(&self, request: &ListRequest) -> GalleryResult<Page>;

    /// Deletes exactly `ids` on the server.
    async fn delete_records(&self, ids: &[RecordId]) -> GalleryResult<()>;

    async fn toggle_favorite(&self, id: RecordId) -> GalleryResult<()>;

    async fn get_favorite(&self, id: RecordId) -> GalleryResult<bool>;

    async fn get_stats(&self) -> GalleryResult<Stats>;

    async fn get_full_asset(&self, id: RecordId, kind: MediaKind) -> GalleryResult<AssetData>;
}

pub type SharedService = Arc<dyn GalleryService>;

/// Comma-joined id list as the delete endpoint expects it.
pub fn join_ids(ids: &[RecordId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_ids() {
        assert_eq!(join_ids(&[5, 9]), "5,9");
        assert_eq!(join_ids(&[1]), "1");
        assert_eq!(join_ids(&[]), "");
    }
}
