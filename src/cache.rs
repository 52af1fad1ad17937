//! Generational tile cache with a separate thumbnail lane.
//!
//! Tiles requested by the running scheduling pass live in the current
//! generation. `begin_new_generation()` folds them into the previous
//! generation, so anything the next pass does not ask for again becomes the
//! first thing evicted.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::tile::{Tile, TileKey};

/// Outcome of [`TileCache::lookup_and_promote`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitKind {
    Hit,
    Miss,
}

/// Cache statistics.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub promotions: u64,
    pub evictions: u64,
    pub released_buffers: u64,
    pub released_bytes: usize,
    pub num_tiles: usize,
    pub num_thumbnails: usize,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Tiles ordered by `(priority_order, insertion sequence)`.
///
/// The sequence number breaks ties so equal priorities coexist and leave in
/// insertion order. Promotion is remove + reinsert, never in-place.
#[derive(Default)]
struct Generation {
    tiles: BTreeMap<(u32, u64), Tile>,
}

impl Generation {
    fn len(&self) -> usize {
        self.tiles.len()
    }

    fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    fn find(&self, key: &TileKey) -> Option<(u32, u64)> {
        self.tiles
            .iter()
            .find(|(_, tile)| tile.key.matches(key))
            .map(|(slot, _)| *slot)
    }

    fn remove(&mut self, slot: &(u32, u64)) -> Option<Tile> {
        self.tiles.remove(slot)
    }

    fn pop_smallest(&mut self) -> Option<Tile> {
        self.tiles.pop_first().map(|(_, tile)| tile)
    }

    fn insert(&mut self, seq: u64, tile: Tile) {
        self.tiles.insert((tile.priority_order, seq), tile);
    }

    fn drain(&mut self) -> impl Iterator<Item = Tile> {
        std::mem::take(&mut self.tiles).into_values()
    }
}

struct Generations {
    current: Generation,
    previous: Generation,
    next_seq: u64,
}

impl Generations {
    fn total(&self) -> usize {
        self.current.len() + self.previous.len()
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

/// Bounded tile cache shared between the scheduler and the draw path.
///
/// Every public method takes the lock once, so each call is atomic with
/// respect to the others.
pub struct TileCache {
    generations: Mutex<Generations>,
    /// Oldest first.
    thumbnails: Mutex<VecDeque<Tile>>,
    capacity: usize,
    thumbnail_capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    promotions: AtomicU64,
    evictions: AtomicU64,
    released_buffers: AtomicU64,
    released_bytes: AtomicUsize,
}

impl TileCache {
    /// Create a cache holding at most `capacity` tiles and
    /// `thumbnail_capacity` thumbnails.
    pub fn new(capacity: usize, thumbnail_capacity: usize) -> Self {
        Self {
            generations: Mutex::new(Generations {
                current: Generation::default(),
                previous: Generation::default(),
                next_seq: 0,
            }),
            thumbnails: Mutex::new(VecDeque::with_capacity(thumbnail_capacity)),
            capacity: capacity.max(1),
            thumbnail_capacity: thumbnail_capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            promotions: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            released_buffers: AtomicU64::new(0),
            released_bytes: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn thumbnail_capacity(&self) -> usize {
        self.thumbnail_capacity
    }

    /// Move the current generation into the previous one.
    pub fn begin_new_generation(&self) {
        let mut gens = self.generations.lock();
        let Generations {
            current, previous, ..
        } = &mut *gens;
        previous.tiles.append(&mut current.tiles);
    }

    /// Find `key` and make sure it belongs to the current generation.
    ///
    /// A previous-generation hit is moved to the current generation with
    /// its priority rewritten to `new_priority_order`. A current-generation
    /// hit is left untouched.
    pub fn lookup_and_promote(&self, key: &TileKey, new_priority_order: u32) -> HitKind {
        let mut gens = self.generations.lock();

        if let Some(slot) = gens.previous.find(key) {
            if let Some(mut tile) = gens.previous.remove(&slot) {
                tile.priority_order = new_priority_order;
                let seq = gens.next_seq();
                gens.current.insert(seq, tile);
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.promotions.fetch_add(1, Ordering::Relaxed);
                return HitKind::Hit;
            }
        }

        if gens.current.find(key).is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return HitKind::Hit;
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        HitKind::Miss
    }

    /// Store a freshly rendered tile in the current generation.
    ///
    /// Frees space first: previous-generation tiles go smallest priority
    /// first, and only when none are left does the current generation give
    /// up its smallest-priority tile. If the slot is already cached the
    /// existing tile is promoted and the new buffer is released instead.
    /// Returns `true` if `tile` was stored.
    pub fn insert(&self, tile: Tile) -> bool {
        let mut gens = self.generations.lock();

        if let Some(slot) = gens.previous.find(&tile.key) {
            if let Some(mut existing) = gens.previous.remove(&slot) {
                existing.priority_order = tile.priority_order;
                let seq = gens.next_seq();
                gens.current.insert(seq, existing);
            }
            drop(gens);
            self.release(tile);
            return false;
        }
        if gens.current.find(&tile.key).is_some() {
            drop(gens);
            self.release(tile);
            return false;
        }

        self.make_room(&mut gens);
        let seq = gens.next_seq();
        gens.current.insert(seq, tile);
        true
    }

    fn make_room(&self, gens: &mut Generations) {
        while gens.total() >= self.capacity && !gens.previous.is_empty() {
            if let Some(victim) = gens.previous.pop_smallest() {
                self.evict(victim);
            }
        }
        while gens.total() >= self.capacity && !gens.current.is_empty() {
            if let Some(victim) = gens.current.pop_smallest() {
                self.evict(victim);
            }
        }
    }

    fn evict(&self, tile: Tile) {
        log::trace!(
            "[CACHE] evict page={} order={} bounds={:?}",
            tile.key.document_page,
            tile.priority_order,
            tile.key.bounds
        );
        self.evictions.fetch_add(1, Ordering::Relaxed);
        self.release(tile);
    }

    fn release(&self, tile: Tile) {
        let bytes = tile.release();
        self.released_buffers.fetch_add(1, Ordering::Relaxed);
        self.released_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Whether a matching thumbnail is resident.
    pub fn thumbnail_contains(&self, key: &TileKey) -> bool {
        self.thumbnails.lock().iter().any(|t| t.key.matches(key))
    }

    /// Append a thumbnail, dropping the oldest one when the lane is full.
    /// A thumbnail already in the lane is kept and the new buffer released.
    /// Returns `true` if `tile` was stored.
    pub fn insert_thumbnail(&self, tile: Tile) -> bool {
        let mut thumbs = self.thumbnails.lock();
        if thumbs.iter().any(|t| t.key.matches(&tile.key)) {
            drop(thumbs);
            self.release(tile);
            return false;
        }
        let evicted = if thumbs.len() >= self.thumbnail_capacity {
            thumbs.pop_front()
        } else {
            None
        };
        thumbs.push_back(tile);
        drop(thumbs);
        if let Some(old) = evicted {
            self.evict(old);
        }
        true
    }

    /// Tiles to draw: thumbnails oldest first, then previous and current
    /// generation tiles in ascending priority.
    pub fn snapshot_for_draw(&self) -> Vec<Tile> {
        let gens = self.generations.lock();
        let thumbs = self.thumbnails.lock();

        let mut out = Vec::with_capacity(thumbs.len() + gens.total());
        out.extend(thumbs.iter().cloned());
        out.extend(gens.previous.tiles.values().cloned());
        out.extend(gens.current.tiles.values().cloned());
        out
    }

    /// Release every buffer and return to empty.
    pub fn reset(&self) {
        let mut gens = self.generations.lock();
        let mut thumbs = self.thumbnails.lock();

        let mut drained: Vec<Tile> = gens.previous.drain().collect();
        drained.extend(gens.current.drain());
        drained.extend(thumbs.drain(..));
        drop(thumbs);
        drop(gens);

        let count = drained.len();
        for tile in drained {
            self.release(tile);
        }
        log::debug!("[CACHE] reset released {} buffers", count);
    }

    /// `(current, previous)` generation sizes.
    pub fn generation_sizes(&self) -> (usize, usize) {
        let gens = self.generations.lock();
        (gens.current.len(), gens.previous.len())
    }

    /// Whether `key` is cached in either generation. Does not promote.
    pub fn contains(&self, key: &TileKey) -> bool {
        let gens = self.generations.lock();
        gens.previous.find(key).is_some() || gens.current.find(key).is_some()
    }

    /// Number of non-thumbnail tiles.
    pub fn len(&self) -> usize {
        self.generations.lock().total()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn thumbnail_count(&self) -> usize {
        self.thumbnails.lock().len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            released_buffers: self.released_buffers.load(Ordering::Relaxed),
            released_bytes: self.released_bytes.load(Ordering::Relaxed),
            num_tiles: self.len(),
            num_thumbnails: self.thumbnail_count(),
        }
    }

    /// Reset hit/miss/eviction counters to zero.
    pub fn reset_stats(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.promotions.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.released_buffers.store(0, Ordering::Relaxed);
        self.released_bytes.store(0, Ordering::Relaxed);
    }
}
