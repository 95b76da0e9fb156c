use chrono::{DateTime, Utc};

/// Server-assigned record identifier. Unique and stable for the lifetime of a record.
pub type RecordId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            other if other.starts_with("image/") => Some(Self::Image),
            other if other.starts_with("video/") => Some(Self::Video),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }
}

/// Thumbnail metadata shipped inline with every record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub width: u32,
    pub height: u32,
    /// Data URL (or bare base64) for the preview image.
    pub encoded_preview: String,
}

/// Intrinsic dimensions of the full-resolution asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullAsset {
    pub width: u32,
    pub height: u32,
    pub mime_type: String,
    /// Video length in seconds, when the server reports one.
    pub length_secs: Option<u64>,
}

/// One media item in the gallery.
///
/// Everything except `is_favorite` is immutable once fetched; the favorite flag
/// is only ever flipped by the mutation coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: RecordId,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub filename: String,
    pub size_bytes: i64,
    pub kind: MediaKind,
    pub thumbnail: Thumbnail,
    pub full: FullAsset,
    pub is_favorite: bool,
}

impl Record {
    /// Thumbnail height over width, if both are usable.
    pub fn thumb_ratio(&self) -> Option<f64> {
        let (w, h) = self.thumb_dimensions()?;
        Some(h as f64 / w as f64)
    }

    /// Thumbnail dimensions, `None` when either side is zero.
    pub fn thumb_dimensions(&self) -> Option<(u32, u32)> {
        match (self.thumbnail.width, self.thumbnail.height) {
            (0, _) | (_, 0) => None,
            (w, h) => Some((w, h)),
        }
    }

    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;

    /// Builds an image record with a 4:3 thumbnail.
    pub fn record(id: RecordId) -> Record {
        record_with_thumb(id, 400, 300)
    }

    pub fn record_with_thumb(id: RecordId, thumb_w: u32, thumb_h: u32) -> Record {
        Record {
            id,
            content_hash: format!("{:016x}", id),
            created_at: Utc
                .timestamp_opt(1_700_000_000 + id as i64, 0)
                .single()
                .unwrap(),
            filename: format!("IMG_{:04}.jpg", id),
            size_bytes: 1024 * id as i64,
            kind: MediaKind::Image,
            thumbnail: Thumbnail {
                width: thumb_w,
                height: thumb_h,
                encoded_preview: String::new(),
            },
            full: FullAsset {
                width: thumb_w * 10,
                height: thumb_h * 10,
                mime_type: "image/jpeg".into(),
                length_secs: None,
            },
            is_favorite: false,
        }
    }
}
