//! Column count, overscan and fallback sizing as pure functions of the viewport.

/// Container size plus input-kind hint from the resize signal source.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
    /// Set by the host for touch input regardless of width.
    pub touch: bool,
}

impl Viewport {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            touch: false,
        }
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.width.is_finite() && self.height.is_finite()) || self.width <= 0.0
    }
}

/// Fixed breakpoints that map a viewport to a grid shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnPolicy {
    /// Widths strictly below this are laid out as compact (mobile).
    pub compact_below: f64,
    pub compact_columns: usize,
    pub wide_columns: usize,
    pub overscan_touch: usize,
    pub overscan_desktop: usize,
    /// Item height used when no estimate can be derived.
    pub fallback_height: f64,
}

impl Default for ColumnPolicy {
    fn default() -> Self {
        Self {
            compact_below: 768.0,
            compact_columns: 1,
            wide_columns: 4,
            overscan_touch: 2,
            overscan_desktop: 5,
            fallback_height: 300.0,
        }
    }
}

impl ColumnPolicy {
    pub fn is_compact(&self, viewport: &Viewport) -> bool {
        viewport.is_degenerate() || viewport.width < self.compact_below
    }

    pub fn columns(&self, viewport: &Viewport) -> usize {
        let columns = if self.is_compact(viewport) {
            self.compact_columns
        } else {
            self.wide_columns
        };
        columns.max(1)
    }

    /// Rows rendered beyond each edge of the visible range.
    pub fn overscan(&self, viewport: &Viewport) -> usize {
        if viewport.touch || self.is_compact(viewport) {
            self.overscan_touch
        } else {
            self.overscan_desktop
        }
    }

    /// Width of one lane, or `None` for a zero-size container.
    pub fn lane_width(&self, viewport: &Viewport) -> Option<f64> {
        if viewport.is_degenerate() {
            return None;
        }
        Some(viewport.width / self.columns(viewport) as f64)
    }
}
