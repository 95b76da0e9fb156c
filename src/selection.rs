//! Browse/select mode for the grid.
//!
//! A strict two-state machine: in `Browsing` a primary click opens the viewer,
//! in `Selecting` it toggles membership. Leaving `Selecting` always clears the
//! selected set.

use tracing::debug;

use crate::models::RecordId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionMode {
    #[default]
    Browsing,
    Selecting,
}

/// What a pointer interaction resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionEvent {
    /// Primary click while browsing.
    OpenViewer { index: usize },
    Selected(RecordId),
    Deselected(RecordId),
    /// The last id was deselected, or the selection was cancelled.
    Exited,
}

#[derive(Debug, Default)]
pub struct SelectionController {
    mode: SelectionMode,
    /// Selected ids in the order they were picked.
    selected: Vec<RecordId>,
}

impl SelectionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    pub fn is_selecting(&self) -> bool {
        self.mode == SelectionMode::Selecting
    }

    pub fn selected(&self) -> &[RecordId] {
        &self.selected
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.selected.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    /// Long-press or secondary click on a record.
    pub fn secondary_press(&mut self, id: RecordId) -> SelectionEvent {
        match self.mode {
            SelectionMode::Browsing => {
                self.mode = SelectionMode::Selecting;
                self.selected.push(id);
                debug!(id, "Entered selection mode");
                SelectionEvent::Selected(id)
            }
            SelectionMode::Selecting => self.toggle(id),
        }
    }

    /// Primary click on the record at flattened position `index`.
    pub fn primary_click(&mut self, id: RecordId, index: usize) -> SelectionEvent {
        match self.mode {
            SelectionMode::Browsing => SelectionEvent::OpenViewer { index },
            SelectionMode::Selecting => self.toggle(id),
        }
    }

    fn toggle(&mut self, id: RecordId) -> SelectionEvent {
        if let Some(pos) = self.selected.iter().position(|&s| s == id) {
            self.selected.remove(pos);
            if self.selected.is_empty() {
                self.mode = SelectionMode::Browsing;
                debug!("Last record deselected, back to browsing");
                return SelectionEvent::Exited;
            }
            SelectionEvent::Deselected(id)
        } else {
            self.selected.push(id);
            SelectionEvent::Selected(id)
        }
    }

    /// Clears the selection and returns to browsing.
    pub fn cancel(&mut self) -> SelectionEvent {
        self.selected.clear();
        self.mode = SelectionMode::Browsing;
        SelectionEvent::Exited
    }

    /// Hands the selected ids to a mutation and resets to browsing.
    pub fn take(&mut self) -> Vec<RecordId> {
        self.mode = SelectionMode::Browsing;
        std::mem::take(&mut self.selected)
    }
}
