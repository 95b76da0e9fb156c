//! Scoped full-resolution asset for the viewer's current slide.
//!
//! Only the current slide holds a loaded asset. Moving to another slide or
//! closing the viewer releases it, and a load that finishes after the slide
//! changed is discarded.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::GalleryResult;
use crate::models::{MediaKind, Record, RecordId};
use crate::service::AssetData;

/// A load the session should perform for the current slide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetRequest {
    pub id: RecordId,
    pub kind: MediaKind,
    pub generation: u64,
}

/// Loaded bytes. Dropping the handle releases the asset.
#[derive(Debug)]
pub struct AssetHandle {
    data: AssetData,
    live: Arc<AtomicUsize>,
}

impl AssetHandle {
    fn new(data: AssetData, live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self { data, live }
    }

    pub fn id(&self) -> RecordId {
        self.data.id
    }

    pub fn mime_type(&self) -> &str {
        &self.data.mime_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data.bytes
    }
}

impl Drop for AssetHandle {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Playback state of a streamed video slide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Playing,
    /// Paused and rewound to the start.
    Stopped,
}

#[derive(Debug, Default)]
pub enum AssetState {
    #[default]
    Empty,
    Loading(AssetRequest),
    Ready(AssetHandle),
    Failed { id: RecordId, message: String },
    /// Videos are streamed from their URL rather than loaded into memory.
    Streaming { id: RecordId, playback: PlaybackState },
}

#[derive(Debug, Default)]
pub struct AssetSlot {
    state: AssetState,
    generation: u64,
    live: Arc<AtomicUsize>,
}

impl AssetSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &AssetState {
        &self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of loaded assets not yet released.
    pub fn live_handles(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn ready(&self) -> Option<&AssetHandle> {
        match &self.state {
            AssetState::Ready(handle) => Some(handle),
            _ => None,
        }
    }

    /// The video currently playing, if any.
    pub fn playing(&self) -> Option<RecordId> {
        match self.state {
            AssetState::Streaming {
                id,
                playback: PlaybackState::Playing,
            } => Some(id),
            _ => None,
        }
    }

    /// Makes `record` the current slide.
    ///
    /// Releases the previous asset and returns the load to perform for an
    /// image. Videos start playing and need no load.
    pub fn focus(&mut self, record: &Record) -> Option<AssetRequest> {
        if self.current_id() == Some(record.id) {
            return None;
        }
        self.release();
        match record.kind {
            MediaKind::Video => {
                self.state = AssetState::Streaming {
                    id: record.id,
                    playback: PlaybackState::Playing,
                };
                debug!(id = record.id, "Video slide playing");
                None
            }
            MediaKind::Image => {
                let request = AssetRequest {
                    id: record.id,
                    kind: record.kind,
                    generation: self.generation,
                };
                self.state = AssetState::Loading(request);
                Some(request)
            }
        }
    }

    /// Stores the result of `request`, unless the slide moved on meanwhile.
    pub fn fulfil(&mut self, request: AssetRequest, result: GalleryResult<AssetData>) -> bool {
        let current = matches!(self.state, AssetState::Loading(pending) if pending == request);
        if !current {
            debug!(id = request.id, "Discarding asset for a slide no longer shown");
            return false;
        }
        self.state = match result {
            Ok(data) => AssetState::Ready(AssetHandle::new(data, Arc::clone(&self.live))),
            Err(e) => {
                warn!(id = request.id, "Failed to load full asset: {}", e);
                AssetState::Failed {
                    id: request.id,
                    message: e.to_string(),
                }
            }
        };
        true
    }

    /// Drops the loaded asset and stops any playing video.
    pub fn release(&mut self) {
        self.generation += 1;
        if let AssetState::Streaming { id, .. } = self.state {
            debug!(id, "Video slide stopped");
        }
        self.state = AssetState::Empty;
    }

    fn current_id(&self) -> Option<RecordId> {
        match &self.state {
            AssetState::Empty => None,
            AssetState::Loading(request) => Some(request.id),
            AssetState::Ready(handle) => Some(handle.id()),
            AssetState::Failed { id, .. } | AssetState::Streaming { id, .. } => Some(*id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GalleryError;
    use crate::models::media_item::fixtures::record;

    fn data(id: RecordId) -> AssetData {
        AssetData {
            id,
            mime_type: "image/jpeg".into(),
            bytes: vec![1, 2, 3],
        }
    }

    fn video(id: RecordId) -> Record {
        let mut r = record(id);
        r.kind = MediaKind::Video;
        r
    }

    #[test]
    fn test_image_load_and_release() {
        let mut slot = AssetSlot::new();
        let request = slot.focus(&record(1)).unwrap();
        assert!(slot.fulfil(request, Ok(data(1))));
        assert_eq!(slot.live_handles(), 1);
        assert_eq!(slot.ready().unwrap().bytes(), &[1, 2, 3]);

        slot.release();
        assert_eq!(slot.live_handles(), 0);
        assert!(slot.ready().is_none());
    }

    #[test]
    fn test_late_result_is_discarded() {
        let mut slot = AssetSlot::new();
        let first = slot.focus(&record(1)).unwrap();
        let second = slot.focus(&record(2)).unwrap();
        assert!(!slot.fulfil(first, Ok(data(1))));
        assert_eq!(slot.live_handles(), 0);
        assert!(slot.fulfil(second, Ok(data(2))));
        assert_eq!(slot.ready().unwrap().id(), 2);
    }

    #[test]
    fn test_moving_on_releases_previous() {
        let mut slot = AssetSlot::new();
        let request = slot.focus(&record(1)).unwrap();
        slot.fulfil(request, Ok(data(1)));
        slot.focus(&record(2));
        assert_eq!(slot.live_handles(), 0);
    }

    #[test]
    fn test_refocus_same_record_is_noop() {
        let mut slot = AssetSlot::new();
        let request = slot.focus(&record(1)).unwrap();
        assert!(slot.focus(&record(1)).is_none());
        assert!(slot.fulfil(request, Ok(data(1))));
    }

    #[test]
    fn test_video_plays_until_left() {
        let mut slot = AssetSlot::new();
        assert!(slot.focus(&video(7)).is_none());
        assert_eq!(slot.playing(), Some(7));
        let request = slot.focus(&record(8));
        assert!(request.is_some());
        assert_eq!(slot.playing(), None);
    }

    #[test]
    fn test_failed_load_is_recorded() {
        let mut slot = AssetSlot::new();
        let request = slot.focus(&record(3)).unwrap();
        slot.fulfil(request, Err(GalleryError::unavailable("offline")));
        assert!(matches!(slot.state(), AssetState::Failed { id: 3, .. }));
    }
}
