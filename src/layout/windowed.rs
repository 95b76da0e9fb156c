//! Masonry-style windowed layout.
//!
//! Records are dealt into lanes by `index % columns` in collection order; each
//! lane stacks its items independently. Heights come from renderer
//! measurements when available, otherwise from the thumbnail aspect ratio.
//! Only the placements intersecting the viewport (plus overscan rows) are
//! reported for rendering.

use std::collections::HashMap;

use tracing::{debug, trace};

use super::columns::{ColumnPolicy, Viewport};
use crate::models::{Record, RecordId};

/// Height changes smaller than this are ignored when measuring.
const MEASURE_TOLERANCE: f64 = 0.5;

/// Position of one record in the grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub id: RecordId,
    pub index: usize,
    pub lane: usize,
    pub top: f64,
    pub height: f64,
}

impl Placement {
    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }
}

/// A placement resolved to a rectangle, ready to render.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VirtualItem {
    pub index: usize,
    pub id: RecordId,
    pub lane: usize,
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// What a render pass needs: the windowed items and the scrollable extent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisibleWindow {
    pub items: Vec<VirtualItem>,
    pub total_height: f64,
    pub columns: usize,
}

impl VisibleWindow {
    pub fn first_index(&self) -> Option<usize> {
        self.items.first().map(|item| item.index)
    }

    pub fn last_index(&self) -> Option<usize> {
        self.items.last().map(|item| item.index)
    }
}

/// Result of syncing the layout with the collection or the viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Relayout {
    Unchanged,
    /// New records were placed after the existing ones.
    Appended { added: usize },
    /// Everything was re-placed; `scroll_offset` keeps the same content in view.
    Rebuilt { scroll_offset: f64 },
}

impl Relayout {
    /// Scroll offset to apply after this relayout.
    pub fn scroll_offset(self, current: f64) -> f64 {
        match self {
            Self::Rebuilt { scroll_offset } => scroll_offset,
            Self::Unchanged | Self::Appended { .. } => current,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Anchor {
    id: RecordId,
    index: usize,
    /// How far into the anchor item the viewport top sits, 0..=1.
    fraction: f64,
}

pub struct WindowedLayout {
    policy: ColumnPolicy,
    viewport: Viewport,
    columns: usize,
    overscan: usize,
    placements: Vec<Placement>,
    /// Placement indices per lane, in increasing index (and top) order.
    lanes: Vec<Vec<usize>>,
    lane_heights: Vec<f64>,
    index_of: HashMap<RecordId, usize>,
    measured: HashMap<RecordId, f64>,
}

impl WindowedLayout {
    pub fn new(policy: ColumnPolicy) -> Self {
        let viewport = Viewport::default();
        let columns = policy.columns(&viewport);
        Self {
            policy,
            viewport,
            columns,
            overscan: policy.overscan(&viewport),
            placements: Vec::new(),
            lanes: vec![Vec::new(); columns],
            lane_heights: vec![0.0; columns],
            index_of: HashMap::new(),
            measured: HashMap::new(),
        }
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn overscan(&self) -> usize {
        self.overscan
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn len(&self) -> usize {
        self.placements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }

    pub fn placement(&self, index: usize) -> Option<&Placement> {
        self.placements.get(index)
    }

    pub fn lane_of(&self, index: usize) -> usize {
        index % self.columns
    }

    /// Height of the tallest lane; sizes the scrollable area.
    pub fn total_height(&self) -> f64 {
        self.lane_heights.iter().copied().fold(0.0, f64::max)
    }

    /// Estimated height for a record at the current lane width.
    pub fn estimate(&self, record: &Record) -> f64 {
        match (self.policy.lane_width(&self.viewport), record.thumb_ratio()) {
            (Some(lane_width), Some(ratio)) if lane_width > 0.0 => lane_width * ratio,
            _ => self.policy.fallback_height,
        }
    }

    fn item_height(&self, record: &Record) -> f64 {
        self.measured
            .get(&record.id)
            .copied()
            .unwrap_or_else(|| self.estimate(record))
    }

    /// Brings placements in line with `records`.
    ///
    /// Growth at the end is placed incrementally; any other change (removal,
    /// replacement) re-places everything around a scroll anchor.
    pub fn sync(&mut self, records: &[Record], scroll_offset: f64) -> Relayout {
        let is_prefix = self.placements.len() <= records.len()
            && self
                .placements
                .iter()
                .zip(records)
                .all(|(placement, record)| placement.id == record.id);

        if is_prefix {
            let added = records.len() - self.placements.len();
            if added == 0 {
                return Relayout::Unchanged;
            }
            let start = self.placements.len();
            self.place(&records[start..]);
            trace!(added, total = self.placements.len(), "Appended placements");
            return Relayout::Appended { added };
        }

        let scroll_offset = self.rebuild(records, scroll_offset);
        Relayout::Rebuilt { scroll_offset }
    }

    /// Applies a (debounced) container resize.
    pub fn resize(&mut self, viewport: Viewport, records: &[Record], scroll_offset: f64) -> Relayout {
        if viewport == self.viewport {
            return Relayout::Unchanged;
        }
        let width_changed = viewport.width != self.viewport.width;
        let columns = self.policy.columns(&viewport);
        let columns_changed = columns != self.columns;

        self.viewport = viewport;
        self.overscan = self.policy.overscan(&viewport);

        if !width_changed && !columns_changed {
            return Relayout::Unchanged;
        }
        if width_changed {
            // Measurements were taken at the old lane width.
            self.measured.clear();
        }
        debug!(
            width = viewport.width,
            height = viewport.height,
            columns,
            "Re-measuring layout"
        );
        let scroll_offset = self.rebuild_with_columns(records, scroll_offset, columns);
        Relayout::Rebuilt { scroll_offset }
    }

    /// Records a rendered height for `id`.
    ///
    /// Returns the scroll adjustment needed to keep the viewport content still
    /// (non-zero only when the item starts above the viewport).
    pub fn measure(&mut self, id: RecordId, height: f64, scroll_offset: f64) -> f64 {
        if !height.is_finite() || height <= 0.0 {
            return 0.0;
        }
        self.measured.insert(id, height);
        let Some(&index) = self.index_of.get(&id) else {
            return 0.0;
        };

        let placement = self.placements[index];
        let delta = height - placement.height;
        if delta.abs() < MEASURE_TOLERANCE {
            return 0.0;
        }

        let lane = placement.lane;
        self.placements[index].height = height;
        let later = self.lanes[lane].partition_point(|&i| i <= index);
        for &i in &self.lanes[lane][later..] {
            self.placements[i].top += delta;
        }
        self.lane_heights[lane] += delta;

        if placement.top < scroll_offset {
            delta
        } else {
            0.0
        }
    }

    /// Indices of records to render at `scroll_offset`, ascending.
    pub fn visible_indices(&self, scroll_offset: f64) -> Vec<usize> {
        if self.placements.is_empty() {
            return Vec::new();
        }
        let start = scroll_offset.max(0.0);
        let end = start + self.viewport.height.max(0.0);

        let mut indices = Vec::new();
        for lane in &self.lanes {
            let first = lane.partition_point(|&i| self.placements[i].bottom() <= start);
            let last = lane
                .partition_point(|&i| self.placements[i].top < end)
                .max(first);
            let from = first.saturating_sub(self.overscan);
            let to = (last + self.overscan).min(lane.len());
            indices.extend_from_slice(&lane[from..to]);
        }
        indices.sort_unstable();
        indices
    }

    pub fn window(&self, scroll_offset: f64) -> VisibleWindow {
        let width = self.policy.lane_width(&self.viewport).unwrap_or(0.0);
        let items = self
            .visible_indices(scroll_offset)
            .into_iter()
            .map(|index| {
                let p = &self.placements[index];
                VirtualItem {
                    index,
                    id: p.id,
                    lane: p.lane,
                    left: p.lane as f64 * width,
                    top: p.top,
                    width,
                    height: p.height,
                }
            })
            .collect();
        VisibleWindow {
            items,
            total_height: self.total_height(),
            columns: self.columns,
        }
    }

    /// Scroll offset that brings `index` into view, keeping `current` when it
    /// already is.
    pub fn offset_for_index(&self, index: usize, current: f64) -> f64 {
        let Some(placement) = self.placements.get(index) else {
            return current;
        };
        let view_end = current + self.viewport.height;
        if placement.top >= current && placement.bottom() <= view_end {
            return current;
        }
        self.clamp_offset(placement.top)
    }

    /// Drops every placement and measurement, e.g. when the query changes.
    pub fn reset(&mut self) {
        self.measured.clear();
        self.clear_placements(self.columns);
    }

    fn clear_placements(&mut self, columns: usize) {
        self.columns = columns.max(1);
        self.placements.clear();
        self.index_of.clear();
        self.lanes = vec![Vec::new(); self.columns];
        self.lane_heights = vec![0.0; self.columns];
    }

    fn place(&mut self, records: &[Record]) {
        for record in records {
            let index = self.placements.len();
            let lane = index % self.columns;
            let height = self.item_height(record);
            let top = self.lane_heights[lane];
            self.lane_heights[lane] += height;
            self.lanes[lane].push(index);
            self.index_of.insert(record.id, index);
            self.placements.push(Placement {
                id: record.id,
                index,
                lane,
                top,
                height,
            });
        }
    }

    fn rebuild(&mut self, records: &[Record], scroll_offset: f64) -> f64 {
        self.rebuild_with_columns(records, scroll_offset, self.columns)
    }

    fn rebuild_with_columns(&mut self, records: &[Record], scroll_offset: f64, columns: usize) -> f64 {
        let anchor = self.anchor(scroll_offset);
        self.clear_placements(columns);
        self.place(records);

        let Some(anchor) = anchor else {
            return self.clamp_offset(scroll_offset);
        };
        let index = self
            .index_of
            .get(&anchor.id)
            .copied()
            .unwrap_or_else(|| anchor.index.min(self.placements.len().saturating_sub(1)));
        let target = match self.placements.get(index) {
            Some(p) => p.top + anchor.fraction * p.height,
            None => 0.0,
        };
        trace!(anchor = anchor.id, index, target, "Restored scroll anchor");
        self.clamp_offset(target)
    }

    /// The lowest-index item crossing the viewport top.
    fn anchor(&self, scroll_offset: f64) -> Option<Anchor> {
        if scroll_offset <= 0.0 {
            return None;
        }
        let index = self
            .lanes
            .iter()
            .filter_map(|lane| {
                let pos = lane.partition_point(|&i| self.placements[i].bottom() <= scroll_offset);
                lane.get(pos).copied()
            })
            .min()?;
        let placement = &self.placements[index];
        let fraction = if placement.height > 0.0 {
            ((scroll_offset - placement.top) / placement.height).clamp(0.0, 1.0)
        } else {
            0.0
        };
        Some(Anchor {
            id: placement.id,
            index,
            fraction,
        })
    }

    fn clamp_offset(&self, offset: f64) -> f64 {
        let max = (self.total_height() - self.viewport.height).max(0.0);
        offset.clamp(0.0, max)
    }
}

impl Default for WindowedLayout {
    fn default() -> Self {
        Self::new(ColumnPolicy::default())
    }
}
