//! The top-level owner: tile tree, cache, scheduler, hooks, and per-pass
//! statistics. `update` runs the prePass -> traversal -> postPass sequence
//! for one pass and returns whether the view it produced is fully resolved.

use std::collections::HashMap;

use crate::cache::Cache;
use crate::config::Config;
use crate::dynamics::{dynamic_sse_density, Camera, CameraMotion};
use crate::external::{Clock, ContentLoader, Renderer, SelectedTile, Transport};
use crate::hooks::{HookEvent, HookQueue, Hooks};
use crate::manifest::load_manifest;
use crate::pass::{Pass, PassContext};
use crate::scheduler::Scheduler;
use crate::tile::{TileArena, TileId, TileState};
use crate::traversal::{self, DynamicSseParams, TraversalOutput};

#[derive(Debug, Clone, Copy, Default)]
pub struct PassStatistics {
    pub selected: usize,
    pub empty: usize,
    pub requested: usize,
    pub in_flight: usize,
}

#[derive(Default)]
struct LoadedFlags {
    fired_initial: bool,
    fired_all: bool,
}

pub struct Tileset {
    arena: TileArena,
    cache: Cache,
    scheduler: Scheduler,
    config: Config,
    hooks: HookQueue,
    motion: CameraMotion,
    last_eye: Option<cgmath::Point3<f64>>,
    statistics: HashMap<Pass, PassStatistics>,
    loaded_flags: LoadedFlags,
    current_frame: u64,
    min_height: f64,
    max_height: f64,
    last_load_progress: Option<(u32, u32, u32)>,
    show: bool,
}

impl Tileset {
    pub fn from_manifest_json(json: &str, config: Config, max_in_flight: usize) -> crate::errors::Result<Self> {
        let mut arena = TileArena::new();
        load_manifest(json, &mut arena)?;
        let (min_height, max_height) = root_height_extent(&arena);

        Ok(Tileset {
            arena,
            cache: Cache::new(config.traversal.maximum_sse),
            scheduler: Scheduler::new(max_in_flight),
            config,
            hooks: HookQueue::default(),
            motion: CameraMotion::default(),
            last_eye: None,
            statistics: HashMap::new(),
            loaded_flags: LoadedFlags::default(),
            current_frame: 0,
            min_height,
            max_height,
            last_load_progress: None,
            show: true,
        })
    }

    /// Convenience constructor for embedders that don't want to size the
    /// in-flight request budget themselves: defaults it to twice the local
    /// core count, a reasonable ceiling for a decode-bound worker pool.
    pub fn from_manifest_json_default(json: &str, config: Config) -> crate::errors::Result<Self> {
        Self::from_manifest_json(json, config, crate::helpers::default_worker_count() * 2)
    }

    pub fn arena(&self) -> &TileArena {
        &self.arena
    }

    pub fn arena_mut(&mut self) -> &mut TileArena {
        &mut self.arena
    }

    /// The cache's current effective SSE threshold, relaxed above
    /// `traversal.maximum_sse` while the working set exceeds budget. The
    /// only place budget relaxation is observable, per the engine's error
    /// policy: there is no separate "budget exceeded" event.
    pub fn memory_adjusted_sse(&self) -> f64 {
        self.cache.memory_adjusted_sse()
    }

    pub fn cache_bytes_used(&self) -> u64 {
        self.cache.bytes_used()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn statistics(&self, pass: Pass) -> PassStatistics {
        self.statistics.get(&pass).copied().unwrap_or_default()
    }

    pub fn show(&self) -> bool {
        self.show
    }

    /// Toggles tileset visibility. With `show = false` and
    /// `preload_when_hidden` left at its default `false`, `update` skips
    /// traversal and the request scheduler entirely for every pass (no
    /// requests issued, per the configuration table in SPEC_FULL.md §6).
    /// Flipping `preload_when_hidden` on keeps traversal/requests running
    /// while hidden but still withholds the render hand-off, the same way
    /// a preload pass does.
    pub fn set_show(&mut self, show: bool) {
        self.show = show;
    }

    /// Advances the tileset's shared frame counter. Call once per frame,
    /// before running that frame's pass(es) through `update` — a frame that
    /// runs both a render and a preload pass calls this once and then
    /// `update` twice, so `Tile::touched_frame` stamped by one pass isn't
    /// mistaken for stale by another pass's postPass cancellation (both
    /// passes share the same frame number).
    pub fn begin_frame(&mut self) -> u64 {
        self.current_frame = self.current_frame.wrapping_add(1);
        self.current_frame
    }

    /// Runs prePass -> traversal -> scheduler -> postPass for one pass.
    /// Returns true when the selected view has no outstanding requests
    /// (every selected/empty tile is READY or has empty content). Hands the
    /// pass's `(selected_tiles, empty_tiles)` output to `renderer` unless the
    /// pass is a preload/pick pass that must not reach the screen, or the
    /// tileset is hidden with `preload_when_hidden` enabled. Call
    /// `begin_frame` once before the first pass of a new frame.
    pub fn update(
        &mut self,
        ctx: PassContext,
        dt_seconds: f64,
        clock: &dyn Clock,
        transport: &dyn Transport,
        content_loader: &dyn ContentLoader,
        renderer: &mut dyn Renderer,
        hooks: &mut dyn Hooks,
    ) -> bool {
        let _span = tracing::debug_span!("tileset_update", frame = self.current_frame, pass = ?ctx.pass).entered();
        self.pre_pass(ctx.camera, dt_seconds, clock, transport, content_loader);

        let Some(root) = self.arena.root else { return true };

        let skip_lod_enabled = self.config.traversal.is_skipping_lod(false);
        let strategy = ctx.pass.strategy(skip_lod_enabled);

        if ctx.pass == Pass::PreloadFlight && !self.config.traversal.preload_flight_destinations {
            return true;
        }

        // `show = false` with `preload_when_hidden` left off means no
        // traversal runs at all for a hidden tileset, so nothing is ever
        // requested. With `preload_when_hidden` on, traversal/requests keep
        // running (the cache stays warm) but the render hand-off below is
        // withheld the same way a preload pass's is.
        let hidden = !self.show;
        if hidden && !self.config.traversal.preload_when_hidden {
            return true;
        }

        let density = dynamic_sse_density(&self.config.traversal, ctx.camera, ctx.camera.position.eye.z, self.min_height, self.max_height);
        let dynamic = DynamicSseParams {
            density,
            near_cutoff: 0.0,
            max_factor: self.config.traversal.dynamic_sse_factor,
        };

        // Progressively-resolved preload passes traverse against a shrunken
        // viewport height, which raises every tile's computed SSE and so
        // selects coarser LOD than the render pass would — filling the cache
        // with cheap proxies ahead of a camera flight rather than full
        // resolution for a destination not yet on screen.
        let effective_camera;
        let camera_for_pass: &Camera = if ctx.pass.is_preload() && self.config.traversal.progressive_resolution_height_fraction < 1.0 {
            effective_camera = ctx.camera.with_viewport_height_fraction(self.config.traversal.progressive_resolution_height_fraction);
            &effective_camera
        } else {
            ctx.camera
        };

        let output = traversal::traverse(
            &mut self.arena,
            root,
            camera_for_pass,
            &self.config.traversal,
            dynamic,
            strategy,
            self.cache.memory_adjusted_sse(),
            self.current_frame,
        );

        for &id in &output.selected {
            self.hooks.push(HookEvent::TileVisible { id });
        }

        if !ctx.pass.ignore_commands() && !hidden {
            let selected_tiles = self.build_selected_tiles(&output.selected);
            let empty_tiles = self.build_selected_tiles(&output.empty);
            for st in &selected_tiles {
                hooks.on_tile_visible(st.id);
                renderer.on_tile_visible(st);
            }
            renderer.on_selected(&selected_tiles);
            renderer.on_empty(&empty_tiles);
        }

        self.scheduler.issue_requests(
            &mut self.arena,
            output.requested.clone(),
            &self.config.traversal,
            &self.motion,
            transport,
            self.current_frame,
        );

        let all_ready = self.post_pass(&output, ctx.pass, transport);
        all_ready
    }

    /// Snapshots arena tiles into the `Renderer`-facing shape: transform,
    /// world bounding volume, and content handle. Built fresh each pass
    /// rather than cached, since `computed_transform` can change underneath
    /// an id between passes (implicit expansion, subtree re-rooting).
    fn build_selected_tiles(&self, ids: &[TileId]) -> Vec<SelectedTile> {
        ids.iter()
            .filter_map(|&id| {
                self.arena.get(id).map(|tile| SelectedTile {
                    id,
                    computed_transform: tile.computed_transform,
                    bounding_volume: tile.world_content_bounding_volume(),
                    content: tile.content.clone(),
                    ready: tile.state.is_ready(),
                })
            })
            .collect()
    }

    fn pre_pass(&mut self, camera: &Camera, dt_seconds: f64, clock: &dyn Clock, transport: &dyn Transport, content_loader: &dyn ContentLoader) {
        if let Some(previous) = self.last_eye {
            self.motion.update(previous, camera.position.eye, dt_seconds);
        }
        self.last_eye = Some(camera.position.eye);

        self.expire_stale_content(clock);

        let decoded = self.scheduler.collect_completed(&mut self.arena, transport);
        for (id, uri, bytes) in decoded {
            let payload = content_loader.decode(&uri, bytes);
            let failed = payload.is_err();
            let message = payload.as_ref().err().map(|e| e.to_string());
            let availability = self.scheduler.apply_decoded(&mut self.arena, id, payload);

            if failed {
                self.hooks.push(HookEvent::TileFailed {
                    id,
                    uri,
                    message: message.unwrap_or_default(),
                });
                continue;
            }

            // A MULTIPLE-content tile only reaches READY once every one of
            // its URIs has decoded, so this only fires once per tile even
            // though the loop runs once per completed fetch.
            if matches!(self.arena.get(id).map(|t| &t.state), Some(TileState::Ready)) {
                let byte_length = self.arena.get(id).map(|t| t.byte_length).unwrap_or(0);
                self.hooks.push(HookEvent::TileLoad { id, byte_length });
            }

            if let Some(availability) = availability {
                crate::implicit::expand_subtree(&mut self.arena, id, &availability);
            }
        }

        self.cache.adjust_sse(&self.config.cache, self.config.traversal.maximum_sse);
    }

    /// READY tiles whose `expire_at` has passed move to EXPIRED: descendants
    /// are torn down (destroy-and-re-request, matching how subtree expiry is
    /// handled) and the tile drops out of the cache's LRU so eviction
    /// bookkeeping doesn't double-count bytes that traversal is about to
    /// re-request from scratch.
    fn expire_stale_content(&mut self, clock: &dyn Clock) {
        let now = clock.now();
        let expired: Vec<TileId> = self
            .arena
            .iter()
            .filter(|(_, t)| t.state.is_ready() && t.expire_at.map(|at| now >= at).unwrap_or(false))
            .map(|(id, _)| id)
            .collect();

        for id in expired {
            let children = self.arena.get(id).map(|t| t.children.clone()).unwrap_or_default();
            for child in children {
                self.arena.destroy_subtree(child);
            }
            self.cache.remove(&self.arena, id);
            if let Some(tile) = self.arena.get_mut(id) {
                tile.children.clear();
                tile.state = TileState::Expired;
                tile.expire_at = None;
                tile.in_cache = false;
            }
            self.hooks.push(HookEvent::TileUnload { id });
        }
    }

    fn post_pass(&mut self, output: &TraversalOutput, pass: Pass, transport: &dyn Transport) -> bool {
        self.scheduler.cancel_untouched(&mut self.arena, transport, self.current_frame);

        let mut touched = output.selected.clone();
        touched.extend(output.empty.iter().copied());
        for &id in &touched {
            self.cache.touch(&mut self.arena, id);
        }
        let evicted = self.cache.evict_untouched(&mut self.arena, &self.config.cache, &touched);
        if !evicted.is_empty() {
            tracing::event!(tracing::Level::DEBUG, count = evicted.len(), bytes_used = self.cache.bytes_used(), "cache evicted tiles");
        }
        for id in evicted {
            self.hooks.push(HookEvent::TileUnload { id });
        }

        let all_ready = output
            .selected
            .iter()
            .chain(output.empty.iter())
            .all(|id| self.arena.get(*id).map(|t| t.state.is_ready() || t.content.is_empty()).unwrap_or(false));

        if all_ready && output.requested.is_empty() {
            if !self.loaded_flags.fired_initial {
                self.loaded_flags.fired_initial = true;
                self.hooks.push(HookEvent::InitialTilesLoaded);
            }
            if !self.loaded_flags.fired_all {
                self.loaded_flags.fired_all = true;
                self.hooks.push(HookEvent::AllTilesLoaded);
            }
        } else {
            self.loaded_flags.fired_all = false;
        }

        let pending = output.requested.len() as u32;
        let in_flight = self.scheduler.in_flight_count() as u32;
        let processing = self.arena.iter().filter(|(_, t)| t.state == TileState::Processing).count() as u32;
        let progress = (pending, in_flight, processing);
        if self.last_load_progress != Some(progress) {
            self.last_load_progress = Some(progress);
            self.hooks.push(HookEvent::LoadProgress { pending, in_flight, processing });
        }

        self.statistics.insert(
            pass,
            PassStatistics {
                selected: output.selected.len(),
                empty: output.empty.len(),
                requested: output.requested.len(),
                in_flight: self.scheduler.in_flight_count(),
            },
        );

        all_ready
    }

    /// Drains buffered hook events into `hooks`. Call once per frame after
    /// every active pass has run.
    pub fn drain_hooks(&mut self, hooks: &mut dyn Hooks) {
        self.hooks.drain_into(hooks);
    }

    /// Finds the READY tile whose world bounding volume is closest to
    /// `ray_origin` along `ray_direction`, for heightmap/ray-cast queries.
    /// Delegates the actual geometric ray test to the Renderer; here we only
    /// narrow to candidate tiles via most-detailed traversal elsewhere.
    pub fn candidate_tiles_for_ray(&self) -> Vec<TileId> {
        self.arena
            .iter()
            .filter(|(_, t)| t.state == TileState::Ready)
            .map(|(id, _)| id)
            .collect()
    }
}

fn root_height_extent(arena: &TileArena) -> (f64, f64) {
    let Some(root) = arena.root else { return (0.0, 1.0) };
    let Some(tile) = arena.get(root) else { return (0.0, 1.0) };
    match &tile.bounding_volume {
        crate::volumes::BoundingVolume::Region(r) => (r.min_height, r.max_height),
        other => {
            let radius = other.bounding_radius();
            let center_z = other.center().z;
            (center_z - radius, center_z + radius)
        }
    }
}
