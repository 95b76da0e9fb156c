//! Ordered, deduplicated merge of the pages fetched for one query identity.
//!
//! Records live in a single flat vector in display order; pages are kept as
//! lightweight metadata (`PageMeta`) describing how many of those records each
//! page contributed. Flattening is therefore free, and per-page views are
//! slices of the same storage.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, trace};

use crate::models::{Page, QueryIdentity, Record, RecordId};

/// Upper bound on pages parked while waiting for a missing predecessor.
const MAX_BUFFERED_PAGES: usize = 8;

/// Pagination metadata of one merged page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageMeta {
    pub page_number: u32,
    /// Number of records this page currently contributes to the flat list.
    pub len: usize,
    pub total_records: u64,
    pub total_pages: u32,
    pub next_page: Option<u32>,
    pub prev_page: Option<u32>,
}

/// Pages in merge order plus their records, flattened.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageList {
    metas: Vec<PageMeta>,
    records: Vec<Record>,
    ids: HashSet<RecordId>,
    total_records: u64,
}

impl PageList {
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn page_count(&self) -> u32 {
        self.metas.len() as u32
    }

    pub fn metas(&self) -> &[PageMeta] {
        &self.metas
    }

    pub fn last_page_number(&self) -> Option<u32> {
        self.metas.last().map(|m| m.page_number)
    }

    /// Page to request next; page 1 when nothing has been merged yet.
    pub fn next_page(&self) -> Option<u32> {
        match self.metas.last() {
            Some(meta) => meta.next_page,
            None => Some(1),
        }
    }

    pub fn has_next_page(&self) -> bool {
        self.next_page().is_some()
    }

    /// True once a page without a successor has been merged.
    pub fn is_exhausted(&self) -> bool {
        self.metas.last().is_some_and(|m| m.next_page.is_none())
    }

    pub fn total_records(&self) -> u64 {
        self.total_records
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.ids.contains(&id)
    }

    pub fn position_of(&self, id: RecordId) -> Option<usize> {
        if !self.ids.contains(&id) {
            return None;
        }
        self.records.iter().position(|r| r.id == id)
    }

    /// Records contributed by the page at `page_index` (merge order, zero-based).
    pub fn page_records(&self, page_index: usize) -> &[Record] {
        let start: usize = self.metas[..page_index.min(self.metas.len())]
            .iter()
            .map(|m| m.len)
            .sum();
        let len = self.metas.get(page_index).map_or(0, |m| m.len);
        &self.records[start..start + len]
    }

    /// Appends a page, skipping records whose id is already present.
    ///
    /// Returns the number of records actually added.
    pub fn append(&mut self, page: Page) -> usize {
        let Page {
            records,
            page_number,
            total_records,
            total_pages,
            next_page,
            prev_page,
        } = page;

        let mut added = 0;
        for record in records {
            if !self.ids.insert(record.id) {
                trace!(id = record.id, page = page_number, "Skipping duplicate record");
                continue;
            }
            self.records.push(record);
            added += 1;
        }

        self.metas.push(PageMeta {
            page_number,
            len: added,
            total_records,
            total_pages,
            next_page,
            prev_page,
        });
        self.total_records = total_records;
        added
    }

    /// Drops every record whose id is in `ids`. Returns the ids actually removed.
    pub fn remove_ids(&mut self, ids: &HashSet<RecordId>) -> Vec<RecordId> {
        if ids.is_empty() || self.records.is_empty() {
            return Vec::new();
        }

        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.records.len());
        let mut records = std::mem::take(&mut self.records).into_iter();

        for meta in &mut self.metas {
            let mut page_len = 0;
            for record in records.by_ref().take(meta.len) {
                if ids.contains(&record.id) {
                    removed.push(record.id);
                } else {
                    kept.push(record);
                    page_len += 1;
                }
            }
            meta.len = page_len;
        }

        self.records = kept;
        for id in &removed {
            self.ids.remove(id);
        }
        self.total_records = self.total_records.saturating_sub(removed.len() as u64);
        removed
    }

    /// Applies `f` to the record with `id`. Returns false if it is not present.
    pub fn patch<F>(&mut self, id: RecordId, f: F) -> bool
    where
        F: FnOnce(&mut Record),
    {
        if !self.ids.contains(&id) {
            return false;
        }
        match self.records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }

    /// Rebuilds the pages merged after `page_number` as standalone pages.
    pub fn pages_after(&self, page_number: u32) -> Vec<Page> {
        let mut offset = 0;
        let mut pages = Vec::new();
        for meta in &self.metas {
            let slice = &self.records[offset..offset + meta.len];
            offset += meta.len;
            if meta.page_number <= page_number {
                continue;
            }
            pages.push(Page {
                records: slice.to_vec(),
                page_number: meta.page_number,
                total_records: meta.total_records,
                total_pages: meta.total_pages,
                next_page: meta.next_page,
                prev_page: meta.prev_page,
            });
        }
        pages
    }
}

/// Result of offering a page to a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Page extended the visible list.
    Appended { added: usize },
    /// Page was parked until its predecessor arrives.
    Buffered,
    /// Page joined a staged refresh that is still incomplete.
    Staged,
    /// A staged refresh completed and replaced the visible list.
    Replaced,
    /// Page was already merged (retry or out-of-order repeat).
    Duplicate,
    /// Page belongs to an invalidated collection.
    Discarded,
}

impl MergeOutcome {
    /// True when the flattened view changed.
    pub fn changed_view(self) -> bool {
        matches!(self, Self::Appended { .. } | Self::Replaced)
    }
}

#[derive(Debug, Clone)]
struct StagedRefresh {
    list: PageList,
    target_pages: u32,
}

/// All pages fetched for one query identity.
#[derive(Debug, Clone)]
pub struct Collection {
    query: QueryIdentity,
    live: PageList,
    buffered: BTreeMap<u32, Page>,
    staged: Option<StagedRefresh>,
    stale: bool,
}

impl Collection {
    pub fn new(query: QueryIdentity) -> Self {
        Self {
            query,
            live: PageList::default(),
            buffered: BTreeMap::new(),
            staged: None,
            stale: false,
        }
    }

    pub fn query(&self) -> &QueryIdentity {
        &self.query
    }

    pub fn live(&self) -> &PageList {
        &self.live
    }

    pub fn records(&self) -> &[Record] {
        self.live.records()
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn is_refreshing(&self) -> bool {
        self.staged.is_some()
    }

    /// The page the next fetch for this collection should request.
    pub fn next_fetch_page(&self) -> Option<u32> {
        if self.stale {
            return Some(1);
        }
        match &self.staged {
            Some(staged) => staged.list.next_page(),
            None => self.live.next_page(),
        }
    }

    /// Keeps the current records visible but rebuilds them from page 1 on the
    /// next fetch. Any partially staged refresh is abandoned.
    pub fn mark_stale(&mut self) {
        self.stale = true;
        self.staged = None;
        self.buffered.clear();
    }

    pub fn merge(&mut self, page: Page) -> MergeOutcome {
        if self.stale {
            if page.page_number == 1 {
                return self.begin_refresh(page);
            }
            debug!(page = page.page_number, "Dropping page fetched before invalidation");
            return MergeOutcome::Discarded;
        }
        if self.staged.is_some() {
            return self.merge_staged(page);
        }

        let expected = self.live.last_page_number().map_or(1, |n| n + 1);
        if page.page_number < expected || self.live.is_exhausted() {
            debug!(page = page.page_number, expected, "Ignoring already merged page");
            return MergeOutcome::Duplicate;
        }
        if page.page_number > expected {
            if self.buffered.len() >= MAX_BUFFERED_PAGES
                && !self.buffered.contains_key(&page.page_number)
            {
                debug!(page = page.page_number, "Out-of-order buffer full, dropping page");
                return MergeOutcome::Discarded;
            }
            debug!(page = page.page_number, expected, "Buffering out-of-order page");
            self.buffered.insert(page.page_number, page);
            return MergeOutcome::Buffered;
        }

        let mut added = self.live.append(page);
        while let Some(next) = self.live.next_page() {
            let Some(parked) = self.buffered.remove(&next) else {
                break;
            };
            added += self.live.append(parked);
        }
        if self.live.is_exhausted() {
            self.buffered.clear();
        }
        MergeOutcome::Appended { added }
    }

    fn begin_refresh(&mut self, page: Page) -> MergeOutcome {
        let target_pages = self.live.page_count().max(1);
        let mut list = PageList::default();
        list.append(page);
        self.stale = false;
        self.buffered.clear();

        if list.page_count() >= target_pages || list.is_exhausted() {
            self.live = list;
            self.staged = None;
            return MergeOutcome::Replaced;
        }
        debug!(target_pages, "Started staged refresh");
        self.staged = Some(StagedRefresh { list, target_pages });
        MergeOutcome::Staged
    }

    fn merge_staged(&mut self, page: Page) -> MergeOutcome {
        let Some(staged) = self.staged.as_mut() else {
            return MergeOutcome::Duplicate;
        };
        let expected = staged.list.last_page_number().map_or(1, |n| n + 1);
        if page.page_number != expected {
            return MergeOutcome::Duplicate;
        }
        staged.list.append(page);
        if staged.list.page_count() < staged.target_pages && !staged.list.is_exhausted() {
            return MergeOutcome::Staged;
        }
        if let Some(done) = self.staged.take() {
            self.live = done.list;
        }
        MergeOutcome::Replaced
    }

    /// Removes `ids` from the visible list and any staged refresh.
    pub fn remove_ids(&mut self, ids: &HashSet<RecordId>) -> Vec<RecordId> {
        if let Some(staged) = self.staged.as_mut() {
            staged.list.remove_ids(ids);
        }
        self.live.remove_ids(ids)
    }

    pub fn patch<F>(&mut self, id: RecordId, f: F) -> bool
    where
        F: Fn(&mut Record),
    {
        if let Some(staged) = self.staged.as_mut() {
            staged.list.patch(id, &f);
        }
        self.live.patch(id, &f)
    }

    /// Restores `prior` as the visible list, re-applying pages merged since.
    pub fn restore(&mut self, prior: PageList) {
        let since = prior.last_page_number().unwrap_or(0);
        let later = self.live.pages_after(since);
        self.live = prior;
        for page in later {
            self.live.append(page);
        }
    }
}
