//! JSON shapes of the gallery API and their conversion into engine models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{FullAsset, MediaKind, Page, Record, Stats, Thumbnail};

#[derive(Debug, Clone, Deserialize)]
pub struct FilesResponse {
    pub files: Vec<FileDto>,
    pub pagination: PaginationDto,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileDto {
    #[serde(rename = "ID")]
    pub id: u64,
    pub hash: String,
    pub created_at: DateTime<Utc>,
    pub filename: String,
    pub size: i64,
    pub mime_type: String,
    #[serde(default)]
    pub last_modified: i64,
    #[serde(default)]
    pub image: Option<MediaDto>,
    #[serde(default)]
    pub video: Option<MediaDto>,
}

/// Shared shape of the `Image` and `Video` objects.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MediaDto {
    #[serde(default)]
    pub full_mime_type: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub thumbnail_width: u32,
    #[serde(default)]
    pub thumbnail_height: u32,
    #[serde(default)]
    pub thumbnail_base64: String,
    #[serde(default)]
    pub length: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaginationDto {
    pub total_records: u64,
    pub current_page: u32,
    pub total_pages: u32,
    pub next_page: Option<u32>,
    pub prev_page: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatsDto {
    pub count: u64,
    pub video_count: u64,
    pub image_count: u64,
    pub favorite_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteRequest {
    pub ids: String,
}

/// Error body the server sends with non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl From<FileDto> for Record {
    fn from(dto: FileDto) -> Self {
        let kind = MediaKind::from_mime(&dto.mime_type).unwrap_or(if dto.video.is_some() {
            MediaKind::Video
        } else {
            MediaKind::Image
        });
        let media = match kind {
            MediaKind::Video => dto.video.or(dto.image),
            MediaKind::Image => dto.image.or(dto.video),
        };
        let (thumbnail, full) = match media {
            Some(m) => (
                Thumbnail {
                    width: m.thumbnail_width,
                    height: m.thumbnail_height,
                    encoded_preview: m.thumbnail_base64,
                },
                FullAsset {
                    width: m.width,
                    height: m.height,
                    mime_type: m.full_mime_type,
                    length_secs: m.length,
                },
            ),
            None => (
                Thumbnail {
                    width: 0,
                    height: 0,
                    encoded_preview: String::new(),
                },
                FullAsset {
                    width: 0,
                    height: 0,
                    mime_type: String::new(),
                    length_secs: None,
                },
            ),
        };

        Record {
            id: dto.id,
            content_hash: dto.hash,
            created_at: dto.created_at,
            filename: dto.filename,
            size_bytes: dto.size,
            kind,
            thumbnail,
            full,
            // Listing does not carry favorite state; it is reconciled per record.
            is_favorite: false,
        }
    }
}

impl From<FilesResponse> for Page {
    fn from(response: FilesResponse) -> Self {
        let p = response.pagination;
        Page {
            records: response.files.into_iter().map(Record::from).collect(),
            page_number: p.current_page,
            total_records: p.total_records,
            total_pages: p.total_pages,
            next_page: p.next_page,
            prev_page: p.prev_page,
        }
    }
}

impl From<StatsDto> for Stats {
    fn from(dto: StatsDto) -> Self {
        Stats {
            count: dto.count,
            image_count: dto.image_count,
            video_count: dto.video_count,
            favorite_count: dto.favorite_count,
        }
    }
}
