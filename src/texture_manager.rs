//! GPU texture residency accounting.
//!
//! The memory manager keeps total resident texture bytes within a configured
//! budget. Textures whose renderable-owner set is empty are **idle** and
//! queue for eviction in least-recently-made-idle order; live textures are
//! never evicted. The manager only does the bookkeeping: the engine performs
//! the actual GPU frees when [`TextureMemoryManager::evictions`] returns
//! candidates.

use lru::LruCache;

use crate::id::TextureId;

#[derive(Debug)]
pub struct TextureMemoryManager {
    budget: u64,
    resident_bytes: u64,
    /// Insertion order doubles as made-idle order: entries are only touched
    /// on insert and removal, so the LRU end is the longest-idle texture.
    idle: LruCache<TextureId, ()>,
}

impl TextureMemoryManager {
    pub fn new(budget: u64) -> Self {
        Self {
            budget,
            resident_bytes: 0,
            idle: LruCache::unbounded(),
        }
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    pub fn resident_bytes(&self) -> u64 {
        self.resident_bytes
    }

    /// Records a `Loading -> Loaded` transition of `bytes`.
    pub(crate) fn note_loaded(&mut self, bytes: u64) {
        self.resident_bytes += bytes;
    }

    /// Records a `Loaded -> Freed` transition of `bytes`.
    pub(crate) fn note_freed(&mut self, id: TextureId, bytes: u64) {
        self.resident_bytes = self.resident_bytes.saturating_sub(bytes);
        self.idle.pop(&id);
    }

    /// The texture's owner set just became empty.
    pub(crate) fn mark_idle(&mut self, id: TextureId) {
        self.idle.put(id, ());
    }

    /// The texture was re-referenced before eviction; it stays resident with
    /// no reload.
    pub(crate) fn mark_live(&mut self, id: TextureId) {
        self.idle.pop(&id);
    }

    /// Idle textures to free, oldest-idle first. Eviction triggers only when
    /// residency exceeds the budget (exactly-at-budget never triggers), and
    /// then proceeds until residency is strictly under it. The returned ids
    /// are no longer tracked as idle; the caller must free them and call
    /// [`Self::note_freed`] per texture.
    pub(crate) fn evictions(
        &mut self,
        byte_size_of: impl Fn(TextureId) -> u64,
    ) -> Vec<TextureId> {
        if self.resident_bytes <= self.budget {
            return Vec::new();
        }
        let mut evicted = Vec::new();
        let mut projected = self.resident_bytes;
        while projected >= self.budget {
            let Some((id, ())) = self.idle.pop_lru() else {
                break;
            };
            projected = projected.saturating_sub(byte_size_of(id));
            evicted.push(id);
        }
        if projected > self.budget && !evicted.is_empty() {
            log::warn!(
                "texture memory still over budget after evicting all idle textures \
                 ({projected} > {} bytes)",
                self.budget
            );
        }
        evicted
    }
}
