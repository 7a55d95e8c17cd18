//! Observer hooks an embedder registers on a tileset: load/unload/failure
//! notifications, visibility, load-progress, and the two "everything is
//! settled" signals. Events are buffered during a pass and drained at
//! postPass so a hook can't observe a tileset mid-traversal.

use crate::tile::TileId;

#[derive(Debug, Clone)]
pub enum HookEvent {
    TileLoad { id: TileId, byte_length: u64 },
    TileUnload { id: TileId },
    TileFailed { id: TileId, uri: String, message: String },
    TileVisible { id: TileId },
    LoadProgress { pending: u32, in_flight: u32, processing: u32 },
    AllTilesLoaded,
    InitialTilesLoaded,
}

/// Implemented by embedders that want callbacks; every method has a no-op
/// default so a consumer only overrides what it needs.
pub trait Hooks {
    fn on_tile_load(&mut self, id: TileId, byte_length: u64) {
        let _ = (id, byte_length);
    }
    fn on_tile_unload(&mut self, id: TileId) {
        let _ = id;
    }
    fn on_tile_failed(&mut self, id: TileId, uri: &str, message: &str) {
        let _ = (id, uri, message);
    }
    fn on_tile_visible(&mut self, id: TileId) {
        let _ = id;
    }
    fn on_load_progress(&mut self, pending: u32, in_flight: u32, processing: u32) {
        let _ = (pending, in_flight, processing);
    }
    fn on_all_tiles_loaded(&mut self) {}
    fn on_initial_tiles_loaded(&mut self) {}
}

/// Buffers events raised mid-pass; `drain_into` dispatches them to a `Hooks`
/// implementation at postPass, in emission order.
#[derive(Default)]
pub struct HookQueue {
    events: Vec<HookEvent>,
}

impl HookQueue {
    pub fn push(&mut self, event: HookEvent) {
        self.events.push(event);
    }

    pub fn drain_into(&mut self, hooks: &mut dyn Hooks) {
        for event in self.events.drain(..) {
            match event {
                HookEvent::TileLoad { id, byte_length } => hooks.on_tile_load(id, byte_length),
                HookEvent::TileUnload { id } => hooks.on_tile_unload(id),
                HookEvent::TileFailed { id, uri, message } => hooks.on_tile_failed(id, &uri, &message),
                HookEvent::TileVisible { id } => hooks.on_tile_visible(id),
                HookEvent::LoadProgress { pending, in_flight, processing } => {
                    hooks.on_load_progress(pending, in_flight, processing)
                }
                HookEvent::AllTilesLoaded => hooks.on_all_tiles_loaded(),
                HookEvent::InitialTilesLoaded => hooks.on_initial_tiles_loaded(),
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingHooks {
        loaded: Vec<TileId>,
        all_loaded_fired: u32,
    }

    impl Hooks for RecordingHooks {
        fn on_tile_load(&mut self, id: TileId, _byte_length: u64) {
            self.loaded.push(id);
        }
        fn on_all_tiles_loaded(&mut self) {
            self.all_loaded_fired += 1;
        }
    }

    #[test]
    fn drains_events_in_order() {
        let mut queue = HookQueue::default();
        queue.push(HookEvent::TileLoad { id: 1, byte_length: 10 });
        queue.push(HookEvent::TileLoad { id: 2, byte_length: 20 });
        queue.push(HookEvent::AllTilesLoaded);

        let mut hooks = RecordingHooks::default();
        queue.drain_into(&mut hooks);

        assert_eq!(hooks.loaded, vec![1, 2]);
        assert_eq!(hooks.all_loaded_fired, 1);
        assert!(queue.is_empty());
    }
}
