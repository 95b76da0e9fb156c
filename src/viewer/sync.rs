//! Index synchronisation between the grid and the full-screen viewer.

use tracing::{debug, trace};

/// Loaded-range facts the viewer needs, read from the page store and scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewerContext {
    pub len: usize,
    pub has_next_page: bool,
    pub fetching: bool,
}

/// Result of a navigation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerStep {
    Moved { index: usize },
    /// At the last loaded record with more pages to come; the move completes
    /// when the next page lands.
    Pending,
    /// At an end of the collection.
    Blocked,
}

#[derive(Debug)]
pub struct ViewerSync {
    open: bool,
    current: usize,
    controls_visible: bool,
    awaiting_next: bool,
}

impl Default for ViewerSync {
    fn default() -> Self {
        Self {
            open: false,
            current: 0,
            controls_visible: true,
            awaiting_next: false,
        }
    }
}

impl ViewerSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn controls_visible(&self) -> bool {
        self.controls_visible
    }

    pub fn is_awaiting_next(&self) -> bool {
        self.awaiting_next
    }

    /// Opens at the clicked record's flattened position.
    pub fn open(&mut self, index: usize, ctx: ViewerContext) -> bool {
        if index >= ctx.len {
            debug!(index, len = ctx.len, "Viewer index out of range");
            return false;
        }
        self.open = true;
        self.current = index;
        self.controls_visible = true;
        self.awaiting_next = false;
        debug!(index, "Viewer opened");
        true
    }

    /// Closes the viewer and returns the index the grid should scroll to.
    pub fn close(&mut self) -> Option<usize> {
        if !self.open {
            return None;
        }
        self.open = false;
        self.awaiting_next = false;
        Some(self.current)
    }

    pub fn toggle_controls(&mut self) -> bool {
        self.controls_visible = !self.controls_visible;
        self.controls_visible
    }

    pub fn can_prev(&self) -> bool {
        self.open && self.current > 0
    }

    /// Next stays enabled on the last loaded record while more pages exist.
    pub fn can_next(&self, ctx: ViewerContext) -> bool {
        self.open && (self.current + 1 < ctx.len || ctx.has_next_page)
    }

    pub fn show_prev(&self) -> bool {
        self.controls_visible && self.can_prev()
    }

    pub fn show_next(&self, ctx: ViewerContext) -> bool {
        self.controls_visible && self.can_next(ctx)
    }

    pub fn next(&mut self, ctx: ViewerContext) -> ViewerStep {
        if !self.open {
            return ViewerStep::Blocked;
        }
        if self.current + 1 < ctx.len {
            self.current += 1;
            self.awaiting_next = false;
            trace!(index = self.current, "Viewer advanced");
            return ViewerStep::Moved {
                index: self.current,
            };
        }
        if ctx.has_next_page {
            self.awaiting_next = true;
            return ViewerStep::Pending;
        }
        ViewerStep::Blocked
    }

    pub fn prev(&mut self) -> ViewerStep {
        if !self.can_prev() {
            return ViewerStep::Blocked;
        }
        self.current -= 1;
        self.awaiting_next = false;
        ViewerStep::Moved {
            index: self.current,
        }
    }

    /// Jumps to `index` (thumbnail strip, keyboard Home/End).
    pub fn jump(&mut self, index: usize, ctx: ViewerContext) -> ViewerStep {
        if !self.open || index >= ctx.len {
            return ViewerStep::Blocked;
        }
        self.current = index;
        self.awaiting_next = false;
        ViewerStep::Moved { index }
    }

    /// True when sitting on the last loaded record with more to fetch.
    pub fn needs_lookahead(&self, ctx: ViewerContext) -> bool {
        self.open
            && ctx.len > 0
            && self.current == ctx.len - 1
            && ctx.has_next_page
            && !ctx.fetching
    }

    /// Reconciles after the collection grew or shrank.
    ///
    /// Completes a pending advance once the next page is in, and clamps the
    /// index (or closes) after records were removed.
    pub fn on_collection_changed(&mut self, ctx: ViewerContext) -> Option<ViewerStep> {
        if !self.open {
            return None;
        }
        if ctx.len == 0 {
            self.open = false;
            self.awaiting_next = false;
            debug!("Collection emptied, viewer closed");
            return Some(ViewerStep::Blocked);
        }
        if self.current >= ctx.len {
            self.current = ctx.len - 1;
            return Some(ViewerStep::Moved {
                index: self.current,
            });
        }
        if self.awaiting_next {
            if self.current + 1 < ctx.len {
                return Some(self.next(ctx));
            }
            if !ctx.has_next_page {
                self.awaiting_next = false;
            }
        }
        None
    }
}
