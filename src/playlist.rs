//! Playlist transfer engine: chunked upload and paginated download.
//!
//! Two independent flows share one upload's [`PlaylistTransferState`]:
//!
//! - *Upload* (host → server, room creation): the locally fetched playlist is
//!   split into fixed-size [`batches`]; the first batch rides inside the
//!   `createRoom` request and the rest follow as `uploadPlaylistChunk`
//!   requests, each awaiting its ack before the next is sent. Ingestion
//!   progress comes back as `playlistProgress` pushes — the client never
//!   infers readiness from what it sent.
//! - *Download* (paginated read for display): [`PlaylistView`] accumulates
//!   `getPlaylistPage` results, tracking display pagination independently of
//!   ingestion progress.

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::{PlaylistItem, PlaylistPage, RoomId, UploadId};

// ── Upload side ─────────────────────────────────────────────────────

/// One upload batch: a bounded slice of the playlist plus its last-flag.
#[derive(Debug, Clone, Copy)]
pub struct Batch<'a> {
    pub items: &'a [PlaylistItem],
    pub is_last: bool,
}

/// Split `items` into fixed-size upload batches, flagging the final one.
///
/// An empty playlist yields a single empty batch flagged `is_last`, keeping
/// the `createRoom` envelope well-formed.
pub fn batches(items: &[PlaylistItem], chunk_size: usize) -> Vec<Batch<'_>> {
    let chunk_size = chunk_size.max(1);
    if items.is_empty() {
        return vec![Batch {
            items: &[],
            is_last: true,
        }];
    }
    let count = items.len().div_ceil(chunk_size);
    items
        .chunks(chunk_size)
        .enumerate()
        .map(|(i, chunk)| Batch {
            items: chunk,
            is_last: i + 1 == count,
        })
        .collect()
}

/// Drop duplicate items, keeping the first occurrence of each
/// [`dedup_key`](PlaylistItem::dedup_key). Order is otherwise preserved.
pub fn dedup_items(items: Vec<PlaylistItem>) -> Vec<PlaylistItem> {
    let mut seen = std::collections::HashSet::with_capacity(items.len());
    items
        .into_iter()
        .filter(|item| seen.insert(item.dedup_key()))
        .collect()
}

/// Server-side ingestion progress for one chunked upload.
///
/// `ready` only ever comes from a server push; `received_count` is
/// monotonically non-decreasing within one `upload_id`, and a mismatched
/// `upload_id` always wins (a fresh re-upload) and resets progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaylistTransferState {
    pub upload_id: UploadId,
    pub total_count: u32,
    pub received_count: u32,
    pub page_size: u32,
    pub ready: bool,
}

impl PlaylistTransferState {
    pub fn new(upload_id: UploadId, total_count: u32, page_size: u32) -> Self {
        Self {
            upload_id,
            total_count,
            received_count: 0,
            page_size,
            ready: false,
        }
    }

    /// Apply a `playlistProgress` push. Returns `true` when the displayed
    /// state changed; stale or out-of-order pushes return `false` and leave
    /// the state untouched.
    pub fn apply_progress(
        &mut self,
        upload_id: UploadId,
        received_count: u32,
        total_count: u32,
        ready: bool,
    ) -> bool {
        if upload_id != self.upload_id {
            // Fresh re-upload: reset from zero under the new id.
            *self = Self {
                upload_id,
                total_count,
                received_count,
                page_size: self.page_size,
                ready,
            };
            return true;
        }
        // Never regress displayed progress for the same upload.
        if received_count < self.received_count {
            return false;
        }
        let changed = received_count != self.received_count
            || total_count != self.total_count
            || ready != self.ready;
        self.received_count = received_count;
        self.total_count = total_count;
        self.ready = ready;
        changed
    }
}

// ── Download side ───────────────────────────────────────────────────

/// Accumulated playlist pages for display.
///
/// A *reset* fetch discards the cache and starts at page 1; an *append*
/// fetch concatenates. At most one fetch is in flight per room; the
/// completion must present the same room id it was started for or it is
/// dropped.
#[derive(Debug)]
pub struct PlaylistView {
    room_id: Option<RoomId>,
    page_size: u32,
    items: Vec<PlaylistItem>,
    total_count: u32,
    pages_loaded: u32,
    ready: bool,
    in_flight: bool,
}

impl PlaylistView {
    pub fn new(page_size: u32) -> Self {
        Self {
            room_id: None,
            page_size: page_size.max(1),
            items: Vec::new(),
            total_count: 0,
            pages_loaded: 0,
            ready: false,
            in_flight: false,
        }
    }

    /// Discard the cache and retarget the view at `room_id` (join or
    /// playlist-replaced push). The next fetch starts at page 1.
    pub fn reset(&mut self, room_id: RoomId) {
        self.room_id = Some(room_id);
        self.items.clear();
        self.total_count = 0;
        self.pages_loaded = 0;
        self.ready = false;
        self.in_flight = false;
    }

    /// Drop everything, including the room binding (leave/disconnect).
    pub fn clear(&mut self) {
        self.room_id = None;
        self.items.clear();
        self.total_count = 0;
        self.pages_loaded = 0;
        self.ready = false;
        self.in_flight = false;
    }

    pub fn room_id(&self) -> Option<RoomId> {
        self.room_id
    }

    pub fn items(&self) -> &[PlaylistItem] {
        &self.items
    }

    pub fn total_count(&self) -> u32 {
        self.total_count
    }

    pub fn ready(&self) -> bool {
        self.ready
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Whether the server holds more items than the cache. False until the
    /// first page has been loaded.
    pub fn has_more(&self) -> bool {
        self.pages_loaded > 0 && (self.items.len() as u32) < self.total_count
    }

    /// Begin an append fetch for the room's next page.
    ///
    /// Returns the page number to request, or `None` when a fetch is already
    /// in flight (single-flight), no room is bound, or the cache is complete.
    pub fn begin_append(&mut self) -> Option<(RoomId, u32)> {
        let room_id = self.room_id?;
        if self.in_flight {
            return None;
        }
        if self.pages_loaded > 0 && !self.has_more() {
            return None;
        }
        self.in_flight = true;
        Some((room_id, self.pages_loaded + 1))
    }

    /// A fetch completed without a usable page (error, stale room). Clears
    /// the single-flight latch only when the room still matches.
    pub fn abort_fetch(&mut self, room_id: RoomId) {
        if self.room_id == Some(room_id) {
            self.in_flight = false;
        }
    }

    /// Apply a fetched page. Returns `true` when items were appended; a page
    /// for a room this view no longer tracks is silently dropped.
    pub fn apply_page(&mut self, room_id: RoomId, page: PlaylistPage) -> bool {
        if self.room_id != Some(room_id) {
            return false;
        }
        self.in_flight = false;
        // Pages must extend the cache in order; a duplicate or out-of-order
        // page (cache was reset mid-flight) is dropped.
        if page.page != self.pages_loaded + 1 {
            return false;
        }
        self.pages_loaded = page.page;
        self.total_count = page.total_count;
        self.ready = page.ready;
        let appended = !page.items.is_empty();
        self.items.extend(page.items);
        appended
    }
}

// ── Preview boundary ────────────────────────────────────────────────

/// Port for the REST playlist-preview collaborator: given a source URL,
/// fetch the items the host wants to upload. Consumed, not re-specified.
#[async_trait]
pub trait PlaylistSource: Send + Sync {
    async fn fetch_playlist(&self, source_url: &str) -> Result<Vec<PlaylistItem>>;
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn item(n: usize) -> PlaylistItem {
        PlaylistItem {
            title: format!("track {n}"),
            url: format!("https://youtu.be/vid{n:05}"),
            uploader: None,
            duration_secs: None,
            thumbnail: None,
        }
    }

    fn items(n: usize) -> Vec<PlaylistItem> {
        (0..n).map(item).collect()
    }

    fn page(page: u32, total: u32, items: Vec<PlaylistItem>, ready: bool) -> PlaylistPage {
        PlaylistPage {
            items,
            total_count: total,
            page,
            page_size: 50,
            ready,
        }
    }

    // ── batches ─────────────────────────────────────────────────────

    #[test]
    fn batches_450_at_200_gives_three_with_last_flag() {
        let all = items(450);
        let batches = batches(&all, 200);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].items.len(), 200);
        assert_eq!(batches[1].items.len(), 200);
        assert_eq!(batches[2].items.len(), 50);
        assert!(!batches[0].is_last);
        assert!(!batches[1].is_last);
        assert!(batches[2].is_last);
    }

    #[test]
    fn batches_exact_multiple_flags_final_chunk() {
        let all = items(400);
        let batches = batches(&all, 200);
        assert_eq!(batches.len(), 2);
        assert!(!batches[0].is_last);
        assert!(batches[1].is_last);
    }

    #[test]
    fn single_batch_is_last() {
        let all = items(3);
        let batches = batches(&all, 200);
        assert_eq!(batches.len(), 1);
        assert!(batches[0].is_last);
    }

    #[test]
    fn empty_playlist_yields_one_empty_last_batch() {
        let batches = batches(&[], 200);
        assert_eq!(batches.len(), 1);
        assert!(batches[0].items.is_empty());
        assert!(batches[0].is_last);
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let mut all = items(3);
        all.push(item(1)); // duplicate url
        let deduped = dedup_items(all);
        assert_eq!(deduped.len(), 3);
        assert_eq!(deduped[1].title, "track 1");
    }

    // ── transfer progress ───────────────────────────────────────────

    #[test]
    fn progress_is_monotone_within_upload() {
        let upload = Uuid::from_u128(1);
        let mut state = PlaylistTransferState::new(upload, 200, 50);

        assert!(state.apply_progress(upload, 50, 200, false));
        assert!(state.apply_progress(upload, 200, 200, true));
        assert_eq!(state.received_count, 200);
        assert!(state.ready);

        // Late out-of-order arrival of the first push must not regress.
        assert!(!state.apply_progress(upload, 50, 200, false));
        assert_eq!(state.received_count, 200);
        assert!(state.ready);
    }

    #[test]
    fn mismatched_upload_id_resets_progress() {
        let old = Uuid::from_u128(1);
        let fresh = Uuid::from_u128(2);
        let mut state = PlaylistTransferState::new(old, 200, 50);
        state.apply_progress(old, 200, 200, true);

        assert!(state.apply_progress(fresh, 10, 300, false));
        assert_eq!(state.upload_id, fresh);
        assert_eq!(state.received_count, 10);
        assert_eq!(state.total_count, 300);
        assert!(!state.ready);
    }

    #[test]
    fn equal_count_with_ready_flip_applies() {
        let upload = Uuid::from_u128(1);
        let mut state = PlaylistTransferState::new(upload, 100, 50);
        state.apply_progress(upload, 100, 100, false);
        assert!(state.apply_progress(upload, 100, 100, true));
        assert!(state.ready);
    }

    // ── view ────────────────────────────────────────────────────────

    #[test]
    fn append_fetches_are_single_flight() {
        let room = Uuid::from_u128(9);
        let mut view = PlaylistView::new(50);
        view.reset(room);

        let first = view.begin_append();
        assert_eq!(first, Some((room, 1)));
        // Second call while in flight is refused.
        assert!(view.begin_append().is_none());

        assert!(view.apply_page(room, page(1, 120, items(50), false)));
        assert!(view.has_more());
        assert_eq!(view.begin_append(), Some((room, 2)));
    }

    #[test]
    fn has_more_false_once_cache_complete() {
        let room = Uuid::from_u128(9);
        let mut view = PlaylistView::new(50);
        view.reset(room);
        view.begin_append();
        view.apply_page(room, page(1, 30, items(30), true));
        assert!(!view.has_more());
        assert!(view.begin_append().is_none());
    }

    #[test]
    fn page_for_stale_room_is_dropped() {
        let room = Uuid::from_u128(9);
        let other = Uuid::from_u128(10);
        let mut view = PlaylistView::new(50);
        view.reset(room);
        view.begin_append();
        // The user switched rooms while the fetch was in flight.
        view.reset(other);
        assert!(!view.apply_page(room, page(1, 120, items(50), false)));
        assert!(view.items().is_empty());
    }

    #[test]
    fn out_of_order_page_is_dropped() {
        let room = Uuid::from_u128(9);
        let mut view = PlaylistView::new(50);
        view.reset(room);
        view.begin_append();
        assert!(!view.apply_page(room, page(2, 120, items(50), false)));
        assert!(view.items().is_empty());
    }

    #[test]
    fn reset_discards_accumulated_pages() {
        let room = Uuid::from_u128(9);
        let mut view = PlaylistView::new(50);
        view.reset(room);
        view.begin_append();
        view.apply_page(room, page(1, 120, items(50), false));
        assert_eq!(view.items().len(), 50);

        view.reset(room);
        assert!(view.items().is_empty());
        assert_eq!(view.begin_append(), Some((room, 1)));
    }
}
