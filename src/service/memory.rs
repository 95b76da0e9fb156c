//! In-process gallery service.
//!
//! Applies the server's ordering, filtering and pagination rules to a record
//! list held in memory. Failures can be injected per operation and responses
//! can be delayed, which is what the session tests use to hold a fetch or a
//! mutation in flight.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use parking_lot::Mutex;
use tracing::debug;

use super::{AssetData, GalleryService, ListRequest};
use crate::error::{GalleryError, GalleryResult};
use crate::models::{
    Category, FullAsset, MediaKind, OrderKey, Page, Record, RecordId, SortDirection, Stats,
    Thumbnail,
};

/// Page size the server applies when the request carries none.
const SERVER_DEFAULT_PAGE_SIZE: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    List,
    Delete,
    ToggleFavorite,
    GetFavorite,
    Stats,
    FullAsset,
}

#[derive(Default)]
struct Inner {
    records: Vec<Record>,
    favorites: HashSet<RecordId>,
    fail_next: HashMap<Operation, u32>,
    calls: HashMap<Operation, usize>,
    latency: Option<Duration>,
}

#[derive(Default)]
pub struct MemoryGalleryService {
    inner: Mutex<Inner>,
}

impl MemoryGalleryService {
    pub fn new(records: Vec<Record>) -> Self {
        let favorites = records
            .iter()
            .filter(|r| r.is_favorite)
            .map(|r| r.id)
            .collect();
        Self {
            inner: Mutex::new(Inner {
                records,
                favorites,
                ..Inner::default()
            }),
        }
    }

    /// A library of `count` records with ids `1..=count`, every seventh a video.
    pub fn generated(count: u64) -> Self {
        Self::new((1..=count).map(generated_record).collect())
    }

    /// Makes the next `times` calls of `op` fail with a transient error.
    pub fn fail_next(&self, op: Operation, times: u32) {
        *self.inner.lock().fail_next.entry(op).or_default() += times;
    }

    /// Delays every response by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.inner.lock().latency = latency;
    }

    pub fn calls(&self, op: Operation) -> usize {
        self.inner.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().records.is_empty()
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.inner.lock().records.iter().any(|r| r.id == id)
    }

    /// Counts the call and returns an injected failure, if one is armed.
    async fn enter(&self, op: Operation) -> GalleryResult<()> {
        let (latency, fail) = {
            let mut inner = self.inner.lock();
            *inner.calls.entry(op).or_default() += 1;
            let fail = match inner.fail_next.get_mut(&op) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            };
            (inner.latency, fail)
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if fail {
            debug!(?op, "Injected failure");
            return Err(GalleryError::unavailable(format!("injected {:?} failure", op)));
        }
        Ok(())
    }
}

fn generated_record(id: u64) -> Record {
    let is_video = id % 7 == 0;
    // Cycle through landscape, portrait and square thumbnails.
    let (thumb_w, thumb_h) = match id % 3 {
        0 => (400, 300),
        1 => (300, 400),
        _ => (300, 300),
    };
    let (kind, mime_type, length_secs) = if is_video {
        (MediaKind::Video, "video/mp4", Some(id % 120 + 5))
    } else {
        (MediaKind::Image, "image/jpeg", None)
    };
    Record {
        id,
        content_hash: format!("{:016x}", xxhash_rust::xxh3::xxh3_64(&id.to_le_bytes())),
        created_at: DateTime::from_timestamp(1_700_000_000 + id as i64 * 60, 0).unwrap_or_default(),
        filename: format!("{}_{:05}.{}", kind.as_str(), id, if is_video { "mp4" } else { "jpg" }),
        size_bytes: 100_000 + id as i64 * 10,
        kind,
        thumbnail: Thumbnail {
            width: thumb_w,
            height: thumb_h,
            encoded_preview: String::new(),
        },
        full: FullAsset {
            width: thumb_w * 10,
            height: thumb_h * 10,
            mime_type: mime_type.to_string(),
            length_secs,
        },
        is_favorite: false,
    }
}

fn ordered(records: &[Record], request: &ListRequest) -> Vec<Record> {
    let query = request.query;
    let mut matching: Vec<Record> = records
        .iter()
        .filter(|r| match query.category {
            Category::All => true,
            Category::Image => r.kind == MediaKind::Image,
            Category::Video => r.kind == MediaKind::Video,
        })
        .cloned()
        .collect();

    match query.order {
        OrderKey::CreatedAt => {
            matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            if query.direction == SortDirection::Desc {
                matching.reverse();
            }
        }
        OrderKey::Random => {
            let seed = query.seed.unwrap_or(0);
            let key = |r: &Record| (r.id.wrapping_add(seed) as f64).sin();
            matching.sort_by(|a, b| key(a).total_cmp(&key(b)).then(a.id.cmp(&b.id)));
        }
    }
    matching
}

#[async_trait]
impl GalleryService for MemoryGalleryService {
    async fn list_records(&self, request: &ListRequest) -> GalleryResult<Page> {
        self.enter(Operation::List).await?;
        let inner = self.inner.lock();

        let page_size = if request.page_size == 0 {
            SERVER_DEFAULT_PAGE_SIZE
        } else {
            request.page_size
        };
        let page = request.page.max(1);
        let all = ordered(&inner.records, request);
        let total_records = all.len() as u64;
        let total_pages = total_records.div_ceil(page_size as u64) as u32;

        let offset = ((page - 1) as usize).saturating_mul(page_size as usize);
        let records = all
            .into_iter()
            .skip(offset)
            .take(page_size as usize)
            .map(|mut r| {
                r.is_favorite = inner.favorites.contains(&r.id);
                r
            })
            .collect();

        Ok(Page {
            records,
            page_number: page,
            total_records,
            total_pages,
            next_page: (page < total_pages).then_some(page + 1),
            prev_page: (page > 1).then_some(page - 1),
        })
    }

    async fn delete_records(&self, ids: &[RecordId]) -> GalleryResult<()> {
        self.enter(Operation::Delete).await?;
        let doomed: HashSet<RecordId> = ids.iter().copied().collect();
        let mut inner = self.inner.lock();
        inner.records.retain(|r| !doomed.contains(&r.id));
        inner.favorites.retain(|id| !doomed.contains(id));
        Ok(())
    }

    async fn toggle_favorite(&self, id: RecordId) -> GalleryResult<()> {
        self.enter(Operation::ToggleFavorite).await?;
        let mut inner = self.inner.lock();
        if !inner.records.iter().any(|r| r.id == id) {
            return Err(GalleryError::NotFound(id));
        }
        if !inner.favorites.remove(&id) {
            inner.favorites.insert(id);
        }
        Ok(())
    }

    async fn get_favorite(&self, id: RecordId) -> GalleryResult<bool> {
        self.enter(Operation::GetFavorite).await?;
        let inner = self.inner.lock();
        if !inner.records.iter().any(|r| r.id == id) {
            return Err(GalleryError::NotFound(id));
        }
        Ok(inner.favorites.contains(&id))
    }

    async fn get_stats(&self) -> GalleryResult<Stats> {
        self.enter(Operation::Stats).await?;
        let inner = self.inner.lock();
        let video_count = inner.records.iter().filter(|r| r.is_video()).count() as u64;
        let count = inner.records.len() as u64;
        Ok(Stats {
            count,
            image_count: count - video_count,
            video_count,
            favorite_count: inner.favorites.len() as u64,
        })
    }

    async fn get_full_asset(&self, id: RecordId, kind: MediaKind) -> GalleryResult<AssetData> {
        self.enter(Operation::FullAsset).await?;
        let inner = self.inner.lock();
        let record = inner
            .records
            .iter()
            .find(|r| r.id == id)
            .ok_or(GalleryError::NotFound(id))?;
        if record.kind != kind {
            return Err(GalleryError::Status {
                endpoint: format!("/api/{}/{}", kind.as_str(), id),
                status: 400,
                message: "Unsupported mimetype".into(),
            });
        }
        Ok(AssetData {
            id,
            mime_type: record.full.mime_type.clone(),
            bytes: record.content_hash.as_bytes().to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QueryIdentity;

    fn request(page: u32, query: QueryIdentity) -> ListRequest {
        ListRequest {
            page,
            page_size: 15,
            query,
        }
    }

    #[tokio::test]
    async fn test_pagination_math() {
        let service = MemoryGalleryService::generated(40);
        let first = service
            .list_records(&request(1, QueryIdentity::default()))
            .await
            .unwrap();
        assert_eq!(first.records.len(), 15);
        assert_eq!(first.total_pages, 3);
        assert_eq!(first.next_page, Some(2));
        assert_eq!(first.prev_page, None);
        // Newest first.
        assert_eq!(first.records[0].id, 40);

        let last = service
            .list_records(&request(3, QueryIdentity::default()))
            .await
            .unwrap();
        assert_eq!(last.records.len(), 10);
        assert_eq!(last.next_page, None);
        assert_eq!(last.prev_page, Some(2));
    }

    #[tokio::test]
    async fn test_category_filter() {
        let service = MemoryGalleryService::generated(70);
        let videos = service
            .list_records(&request(
                1,
                QueryIdentity {
                    category: Category::Video,
                    ..QueryIdentity::default()
                },
            ))
            .await
            .unwrap();
        assert_eq!(videos.total_records, 10);
        assert!(videos.records.iter().all(|r| r.is_video()));
    }

    #[tokio::test]
    async fn test_random_order_is_stable_per_seed() {
        let service = MemoryGalleryService::generated(50);
        let random = |seed| QueryIdentity {
            order: OrderKey::Random,
            seed: Some(seed),
            ..QueryIdentity::default()
        };
        let a = service.list_records(&request(2, random(99))).await.unwrap();
        let b = service.list_records(&request(2, random(99))).await.unwrap();
        let c = service.list_records(&request(2, random(100))).await.unwrap();
        assert_eq!(a.records, b.records);
        assert_ne!(a.records, c.records);
    }

    #[tokio::test]
    async fn test_injected_failure_is_one_shot() {
        let service = MemoryGalleryService::generated(5);
        service.fail_next(Operation::Delete, 1);
        assert!(service.delete_records(&[1]).await.is_err());
        assert!(service.contains(1));
        service.delete_records(&[1]).await.unwrap();
        assert!(!service.contains(1));
        assert_eq!(service.calls(Operation::Delete), 2);
    }

    #[tokio::test]
    async fn test_favorites_and_stats() {
        let service = MemoryGalleryService::generated(14);
        service.toggle_favorite(3).await.unwrap();
        assert!(service.get_favorite(3).await.unwrap());
        let stats = service.get_stats().await.unwrap();
        assert_eq!(stats.count, 14);
        assert_eq!(stats.video_count, 2);
        assert_eq!(stats.image_count, 12);
        assert_eq!(stats.favorite_count, 1);
        assert!(matches!(
            service.toggle_favorite(99).await,
            Err(GalleryError::NotFound(99))
        ));
    }

    #[tokio::test]
    async fn test_full_asset_kind_must_match() {
        let service = MemoryGalleryService::generated(7);
        let asset = service.get_full_asset(7, MediaKind::Video).await.unwrap();
        assert_eq!(asset.mime_type, "video/mp4");
        assert!(service.get_full_asset(7, MediaKind::Image).await.is_err());
    }
}
