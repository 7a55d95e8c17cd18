//! Byte-budgeted LRU of READY tiles plus the adaptive SSE relaxation that
//! lets the working set grow into the overflow budget under memory pressure,
//! then shrink back with hysteresis once it no longer needs to.

use std::collections::HashMap;

use crate::config::CacheConfig;
use crate::tile::{TileArena, TileId, TileState};

const ADAPTIVE_STEP: f64 = 1.02;

/// Doubly-linked LRU list over `TileId`s, indices stored in a side table so
/// no tile needs to know its own cache position.
#[derive(Default)]
pub struct Cache {
    order: Vec<TileId>,
    position: HashMap<TileId, usize>,
    bytes_used: u64,
    memory_adjusted_sse: f64,
}

impl Cache {
    pub fn new(maximum_sse: f64) -> Self {
        Cache {
            order: Vec::new(),
            position: HashMap::new(),
            bytes_used: 0,
            memory_adjusted_sse: maximum_sse,
        }
    }

    pub fn bytes_used(&self) -> u64 {
        self.bytes_used
    }

    pub fn memory_adjusted_sse(&self) -> f64 {
        self.memory_adjusted_sse
    }

    /// Marks a tile touched this frame: moves it to the back of the LRU
    /// list (most-recently-used) if already tracked, or inserts it if the
    /// tile just became READY.
    pub fn touch(&mut self, arena: &mut TileArena, id: TileId) {
        let Some(tile) = arena.get(id) else { return };
        if !tile.state.is_ready() {
            return;
        }

        if let Some(&pos) = self.position.get(&id) {
            self.order.remove(pos);
            for (i, existing) in self.order.iter().enumerate().skip(pos) {
                self.position.insert(*existing, i);
            }
        } else {
            self.bytes_used += tile.byte_length;
            if let Some(tile) = arena.get_mut(id) {
                tile.in_cache = true;
            }
        }
        self.position.insert(id, self.order.len());
        self.order.push(id);
    }

    /// Evicts least-recently-used tiles not touched this frame until usage
    /// is at or below `cache_bytes`. Returns the evicted ids so the caller
    /// can destroy their arena subtrees and fire `on_tile_unload`.
    pub fn evict_untouched(
        &mut self,
        arena: &mut TileArena,
        config: &CacheConfig,
        touched_this_frame: &[TileId],
    ) -> Vec<TileId> {
        let touched: std::collections::HashSet<TileId> = touched_this_frame.iter().copied().collect();
        let mut evicted = Vec::new();

        let mut i = 0;
        while self.bytes_used > config.cache_bytes && i < self.order.len() {
            let id = self.order[i];
            if touched.contains(&id) {
                i += 1;
                continue;
            }
            let byte_length = arena.get(id).map(|t| t.byte_length).unwrap_or(0);
            self.bytes_used = self.bytes_used.saturating_sub(byte_length);
            self.order.remove(i);
            self.position.remove(&id);
            if let Some(tile) = arena.get_mut(id) {
                tile.state = TileState::Unloaded;
                tile.in_cache = false;
            }
            evicted.push(id);
        }

        for (idx, id) in self.order.iter().enumerate() {
            self.position.insert(*id, idx);
        }

        evicted
    }

    /// Drops a single tile from the LRU outside of the normal eviction
    /// sweep, e.g. when content expiry (`Tile::expire_at`) fires mid-frame.
    /// No-op if the tile isn't tracked.
    pub fn remove(&mut self, arena: &TileArena, id: TileId) {
        let Some(&pos) = self.position.get(&id) else { return };
        let byte_length = arena.get(id).map(|t| t.byte_length).unwrap_or(0);
        self.bytes_used = self.bytes_used.saturating_sub(byte_length);
        self.order.remove(pos);
        self.position.remove(&id);
        for (idx, existing) in self.order.iter().enumerate().skip(pos) {
            self.position.insert(*existing, idx);
        }
    }

    /// Adaptive SSE relaxation (hysteresis): when usage exceeds
    /// `cache_bytes + maximum_cache_overflow_bytes`, the effective threshold
    /// climbs by 1.02x per frame; once usage falls back under `cache_bytes`
    /// it relaxes back down, never below `maximum_sse`.
    pub fn adjust_sse(&mut self, config: &CacheConfig, maximum_sse: f64) {
        let overflow_ceiling = config.cache_bytes + config.maximum_cache_overflow_bytes;
        if self.bytes_used > overflow_ceiling {
            self.memory_adjusted_sse *= ADAPTIVE_STEP;
        } else if self.bytes_used < config.cache_bytes {
            self.memory_adjusted_sse = (self.memory_adjusted_sse / ADAPTIVE_STEP).max(maximum_sse);
        }
    }
}
