//! Frame-numbered, bidirectionally-indexed view over the engine's torrents
//! that lets polling clients ask "what changed since frame F?" instead of
//! re-fetching everything on every poll.
//!
//! The ordered side is a doubly linked list threaded through a `Vec` arena
//! (no `unsafe`, no external crate): `on_add`/`on_state_update`/`on_rename`
//! all detach a node and push it back to the front, which is a constant-time
//! operation regardless of list length. The `HashMap<InfoHash, usize>` gives
//! O(1) lookup by identity without walking the list.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::engine::{changed_fields, InfoHash, TorrentStatus, TrackedField};

/// Removed-set retention: keep entries until the FIFO exceeds this size *and*
/// the oldest entry is this many frames stale.
const REMOVED_RETENTION_COUNT: usize = 1000;
const REMOVED_RETENTION_AGE: u64 = 10;

/// A torrent status paired with the frame at which each tracked field last
/// changed. Returned by `updated_fields_since` for callers that need
/// per-field staleness, not just the current value.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub status: TorrentStatus,
    pub stamps: [u64; TrackedField::COUNT],
    pub update_frame: u64,
}

struct Node {
    entry: HistoryEntry,
    prev: Option<usize>,
    next: Option<usize>,
}

struct Inner {
    arena: Vec<Option<Node>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    index: HashMap<InfoHash, usize>,
    removed: VecDeque<(u64, InfoHash)>,
    frame: u64,
    deferred_advance: bool,
}

impl Inner {
    fn new() -> Inner {
        Inner {
            arena: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            index: HashMap::new(),
            removed: VecDeque::new(),
            frame: 0,
            deferred_advance: false,
        }
    }

    fn alloc(&mut self, node: Node) -> usize {
        if let Some(idx) = self.free.pop() {
            self.arena[idx] = Some(node);
            idx
        } else {
            self.arena.push(Some(node));
            self.arena.len() - 1
        }
    }

    fn free_node(&mut self, idx: usize) {
        self.arena[idx] = None;
        self.free.push(idx);
    }

    /// Unlinks `idx` from the ordered list without freeing its arena slot.
    fn detach(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.arena[idx].as_ref().unwrap();
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.arena[p].as_mut().unwrap().next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.arena[n].as_mut().unwrap().prev = prev,
            None => self.tail = prev,
        }
        let node = self.arena[idx].as_mut().unwrap();
        node.prev = None;
        node.next = None;
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let node = self.arena[idx].as_mut().unwrap();
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head {
            self.arena[h].as_mut().unwrap().prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn trim_removed(&mut self) {
        while self.removed.len() > REMOVED_RETENTION_COUNT {
            let oldest = self.removed.back().unwrap();
            if oldest.0 + REMOVED_RETENTION_AGE < self.frame {
                self.removed.pop_back();
            } else {
                break;
            }
        }
    }
}

/// The shared, mutex-guarded torrent registry. Every operation takes `&self`
/// and locks internally, so a single `History` can be handed out behind an
/// `Arc` to worker threads and the alert-ingestion thread alike without an
/// extra layer of external locking.
pub struct History {
    inner: Mutex<Inner>,
}

impl History {
    pub fn new() -> History {
        History { inner: Mutex::new(Inner::new()) }
    }

    pub fn on_add(&self, status: TorrentStatus) {
        let mut inner = self.inner.lock().unwrap();
        let frame = inner.frame + 1;
        let info_hash = status.info_hash;
        let entry = HistoryEntry { status, stamps: [frame; TrackedField::COUNT], update_frame: frame };
        let idx = inner.alloc(Node { entry, prev: None, next: None });
        inner.push_front(idx);
        inner.index.insert(info_hash, idx);
        inner.deferred_advance = true;
    }

    pub fn on_remove(&self, info_hash: InfoHash) {
        let mut inner = self.inner.lock().unwrap();
        let frame = inner.frame + 1;
        if let Some(idx) = inner.index.remove(&info_hash) {
            inner.detach(idx);
            inner.free_node(idx);
        }
        inner.removed.push_front((frame, info_hash));
        inner.trim_removed();
        inner.deferred_advance = true;
    }

    pub fn on_rename(&self, old_hash: InfoHash, new_hash: InfoHash) {
        let mut inner = self.inner.lock().unwrap();
        let frame = inner.frame + 1;
        inner.removed.push_front((frame, old_hash));
        if let Some(idx) = inner.index.remove(&old_hash) {
            inner.detach(idx);
            {
                let node = inner.arena[idx].as_mut().unwrap();
                node.entry.status.info_hash = new_hash;
                node.entry.update_frame = frame;
            }
            inner.push_front(idx);
            inner.index.insert(new_hash, idx);
        }
        inner.trim_removed();
        inner.deferred_advance = true;
    }

    pub fn on_state_update(&self, batch: Vec<TorrentStatus>) {
        let mut inner = self.inner.lock().unwrap();
        inner.frame += 1;
        inner.deferred_advance = false;
        let frame = inner.frame;
        for status in batch {
            let Some(&idx) = inner.index.get(&status.info_hash) else { continue };
            let changed = {
                let node = inner.arena[idx].as_ref().unwrap();
                changed_fields(&node.entry.status, &status)
            };
            {
                let node = inner.arena[idx].as_mut().unwrap();
                for field in changed {
                    node.entry.stamps[field as usize] = frame;
                }
                node.entry.status = status;
                node.entry.update_frame = frame;
            }
            inner.detach(idx);
            inner.push_front(idx);
        }
    }

    pub fn updated_since(&self, frame: u64) -> Vec<TorrentStatus> {
        let inner = self.inner.lock().unwrap();
        let mut out = Vec::new();
        let mut cursor = inner.head;
        while let Some(idx) = cursor {
            let node = inner.arena[idx].as_ref().unwrap();
            if node.entry.update_frame <= frame {
                break;
            }
            out.push(node.entry.status.clone());
            cursor = node.next;
        }
        out
    }

    pub fn updated_fields_since(&self, frame: u64) -> Vec<HistoryEntry> {
        let inner = self.inner.lock().unwrap();
        let mut out = Vec::new();
        let mut cursor = inner.head;
        while let Some(idx) = cursor {
            let node = inner.arena[idx].as_ref().unwrap();
            if node.entry.update_frame <= frame {
                break;
            }
            out.push(node.entry.clone());
            cursor = node.next;
        }
        out
    }

    pub fn removed_since(&self, frame: u64) -> Vec<InfoHash> {
        let inner = self.inner.lock().unwrap();
        let mut out = Vec::new();
        for &(pushed, hash) in inner.removed.iter() {
            if pushed <= frame {
                break;
            }
            out.push(hash);
        }
        out
    }

    pub fn get(&self, info_hash: InfoHash) -> TorrentStatus {
        let inner = self.inner.lock().unwrap();
        match inner.index.get(&info_hash) {
            Some(&idx) => inner.arena[idx].as_ref().unwrap().entry.status.clone(),
            None => TorrentStatus::default_for(info_hash),
        }
    }

    pub fn frame(&self) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        if inner.deferred_advance {
            inner.frame += 1;
            inner.deferred_advance = false;
        }
        inner.frame
    }

    #[cfg(test)]
    fn removed_len(&self) -> usize {
        self.inner.lock().unwrap().removed.len()
    }

    #[cfg(test)]
    fn removed_tail_frame(&self) -> Option<u64> {
        self.inner.lock().unwrap().removed.back().map(|&(f, _)| f)
    }

    #[cfg(test)]
    fn raw_frame(&self) -> u64 {
        self.inner.lock().unwrap().frame
    }
}

impl Default for History {
    fn default() -> History {
        History::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(byte: u8) -> InfoHash {
        InfoHash([byte; 20])
    }

    fn status(byte: u8) -> TorrentStatus {
        TorrentStatus::default_for(hash(byte))
    }

    #[test]
    fn frames_are_monotone_across_reads() {
        let h = History::new();
        h.on_add(status(1));
        let a = h.frame();
        h.on_add(status(2));
        let b = h.frame();
        assert!(a <= b);
    }

    #[test]
    fn add_then_remove_produces_no_live_entries() {
        let h = History::new();
        h.on_add(status(1));
        h.on_remove(hash(1));
        assert!(h.updated_since(0).is_empty());
        assert_eq!(h.removed_since(0), vec![hash(1)]);
    }

    #[test]
    fn delta_completeness_matches_a_multi_round_update_scenario() {
        let h = History::new();
        let h1 = hash(1);
        let h2 = hash(2);
        h.on_add(status(1));
        h.on_add(status(2));

        let mut s1 = status(1);
        s1.progress = 0.5;
        let mut s2 = status(2);
        s2.progress = 0.0;
        h.on_state_update(vec![s1, s2]);

        let mut s2b = status(2);
        s2b.progress = 0.1;
        h.on_state_update(vec![s2b]);

        assert_eq!(h.frame(), 3);
        let updated = h.updated_since(1);
        assert_eq!(updated.len(), 2);
        assert_eq!(updated[0].info_hash, h2);
        assert!((updated[0].progress - 0.1).abs() < 1e-9);
        assert_eq!(updated[1].info_hash, h1);
        assert!((updated[1].progress - 0.5).abs() < 1e-9);
    }

    #[test]
    fn rename_preserves_stamps_and_reports_the_old_hash_as_removed() {
        let h = History::new();
        let h1 = hash(1);
        let h2 = hash(2);
        h.on_add(status(1));
        h.on_rename(h1, h2);

        assert_eq!(h.get(h2).info_hash, h2);
        assert_eq!(h.get(h1).info_hash, h1); // default_for fallback on miss
        assert!(h.removed_since(0).contains(&h1));
    }

    #[test]
    fn updated_since_and_removed_since_are_disjoint() {
        let h = History::new();
        h.on_add(status(1));
        h.on_add(status(2));
        h.on_remove(hash(2));

        let updated: Vec<InfoHash> = h.updated_since(0).into_iter().map(|s| s.info_hash).collect();
        let removed = h.removed_since(0);
        assert!(updated.iter().all(|u| !removed.contains(u)));
        assert_eq!(updated, vec![hash(1)]);
        assert_eq!(removed, vec![hash(2)]);
    }

    #[test]
    fn retention_trims_the_removed_fifo_once_it_is_both_long_and_stale() {
        let h = History::new();
        for i in 0..1100u32 {
            let b = (i % 250) as u8;
            h.on_add(status(b));
            h.on_remove(hash(b));
        }
        // Force enough state updates that the frame counter actually moves,
        // making the oldest removed entries stale under the retention rule.
        for _ in 0..20 {
            h.on_state_update(vec![]);
        }
        let current = h.raw_frame();
        let tail_is_fresh_enough = h
            .removed_tail_frame()
            .map(|tail| tail + REMOVED_RETENTION_AGE >= current)
            .unwrap_or(true);
        assert!(h.removed_len() <= REMOVED_RETENTION_COUNT || tail_is_fresh_enough);
    }

    #[test]
    fn field_change_only_stamps_the_fields_that_actually_changed() {
        let h = History::new();
        h.on_add(status(1));
        let base_frame = h.frame();

        let mut changed = status(1);
        changed.total_download = 999;
        h.on_state_update(vec![changed.clone()]);

        let entries = h.updated_fields_since(base_frame - 1);
        let entry = entries.iter().find(|e| e.status.info_hash == hash(1)).unwrap();
        assert_eq!(entry.stamps[TrackedField::TotalDownload as usize], entry.update_frame);
        assert_ne!(entry.stamps[TrackedField::Progress as usize], entry.update_frame);
    }

    #[test]
    fn default_lookup_on_a_miss_carries_the_queried_hash() {
        let h = History::new();
        let missing = hash(42);
        assert_eq!(h.get(missing), TorrentStatus::default_for(missing));
    }
}
