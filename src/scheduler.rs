//! Turns a traversal pass's *requested* list into fetches against a
//! `Transport`, tracks in-flight requests, cancels stale ones, and applies
//! move-cull so panning doesn't flood the transport with requests for tiles
//! that will be off-screen again in a few frames.

use std::collections::{HashMap, HashSet};

use crate::config::TraversalConfig;
use crate::dynamics::CameraMotion;
use crate::external::{DecodedPayload, FetchHandle, FetchOutcome, Transport};
use crate::helpers::hash_uri;
use crate::tile::{Content, TileArena, TileId, TileState};
use crate::traversal::sort_by_priority;

struct FlightEntry {
    tile: TileId,
    uri: String,
}

/// Bookkeeping for a MULTIPLE-content tile: several URIs must all land
/// before the tile as a whole can move to READY, and their byte costs sum
/// into a single `Tile::byte_length`.
struct MultiProgress {
    remaining: usize,
    bytes_accum: u64,
}

/// Per-tileset request bookkeeping. Holds no reference to the transport
/// itself; callers pass one in on each call so the same scheduler can be
/// reused across tests with fake transports.
#[derive(Default)]
pub struct Scheduler {
    in_flight: HashMap<FetchHandle, FlightEntry>,
    by_tile: HashMap<TileId, Vec<FetchHandle>>,
    /// Hashes of URIs already in flight, so two placeholder tiles that
    /// happen to resolve to the same resource (e.g. an implicit subtree
    /// revisited from a different parent before the first fetch lands)
    /// collapse onto a single request instead of doubling up.
    in_flight_uris: HashSet<u64>,
    multi_progress: HashMap<TileId, MultiProgress>,
    max_in_flight: usize,
}

impl Scheduler {
    pub fn new(max_in_flight: usize) -> Self {
        Scheduler {
            in_flight: HashMap::new(),
            by_tile: HashMap::new(),
            in_flight_uris: HashSet::new(),
            multi_progress: HashMap::new(),
            max_in_flight,
        }
    }

    /// Every URI a tile's content resolves to: one for SINGLE/IMPLICIT, one
    /// per entry for MULTIPLE, none for an empty tile.
    fn content_uris(content: &Content) -> Vec<String> {
        match content {
            Content::Single { uri, .. } => vec![uri.clone()],
            Content::Implicit(placeholder) => vec![placeholder.template.subtree_uri(placeholder.coordinate)],
            Content::Multiple(entries) => entries.iter().map(|(uri, _)| uri.clone()).collect(),
            Content::None => Vec::new(),
        }
    }

    /// Issues fetches for as many of `requested` as the in-flight budget
    /// allows, priority order first. Tiles left over stay UNLOADED for the
    /// next frame's traversal to re-request. A MULTIPLE-content tile issues
    /// every one of its URIs together or not at all this frame, so it never
    /// gets stuck half-fetched against a tight budget.
    pub fn issue_requests(
        &mut self,
        arena: &mut TileArena,
        mut requested: Vec<TileId>,
        config: &TraversalConfig,
        motion: &CameraMotion,
        transport: &dyn Transport,
        frame: u64,
    ) {
        sort_by_priority(arena, &mut requested, config);

        for id in requested {
            if self.by_tile.contains_key(&id) {
                continue;
            }
            if self.in_flight.len() >= self.max_in_flight {
                break;
            }

            if config.cull_requests_while_moving && motion.is_moving {
                let Some(tile) = arena.get(id) else { continue };
                let footprint = -tile.priority.reverse_sse;
                let benefit = footprint / (1.0 + motion.speed * config.cull_requests_while_moving_multiplier);
                if benefit < 1.0 {
                    continue;
                }
            }

            // Foveation defers off-axis tiles until the camera has been
            // still for `foveated_time_delay` seconds, so a pan doesn't spend
            // the in-flight budget on tiles at the edge of view.
            if config.foveated_sse {
                let Some(tile) = arena.get(id) else { continue };
                let off_axis = tile.priority.foveated_factor > config.foveated_cone_size;
                if off_axis && motion.time_since_stopped < config.foveated_time_delay {
                    continue;
                }
            }

            let Some(tile) = arena.get(id) else { continue };
            if tile.state != TileState::Unloaded && tile.state != TileState::Expired {
                continue;
            }
            let uris = Self::content_uris(&tile.content);
            if uris.is_empty() || self.in_flight.len() + uris.len() > self.max_in_flight {
                continue;
            }

            let mut handles = Vec::with_capacity(uris.len());
            for uri in &uris {
                let uri_hash = hash_uri(uri);
                if !self.in_flight_uris.insert(uri_hash) {
                    continue;
                }
                let handle = transport.fetch(uri);
                self.in_flight.insert(handle, FlightEntry { tile: id, uri: uri.clone() });
                handles.push(handle);
            }
            if handles.is_empty() {
                continue;
            }
            if uris.len() > 1 {
                self.multi_progress.insert(id, MultiProgress { remaining: handles.len(), bytes_accum: 0 });
            }
            self.by_tile.insert(id, handles);
            if let Some(tile) = arena.get_mut(id) {
                tile.state = TileState::Loading;
                tile.request_frame = frame;
            }
        }
    }

    /// Drains `Transport::poll_completed`, moving fetched tiles to
    /// PROCESSING (success) or FAILED (error). Returns one `(tile, uri,
    /// bytes)` entry per completed fetch, so a MULTIPLE-content tile yields
    /// several entries that `apply_decoded` accumulates independently.
    pub fn collect_completed(&mut self, arena: &mut TileArena, transport: &dyn Transport) -> Vec<(TileId, String, Vec<u8>)> {
        let completed = transport.poll_completed();
        let mut ready_for_decode = Vec::new();

        for (handle, outcome) in completed {
            let Some(entry) = self.in_flight.remove(&handle) else {
                continue;
            };
            self.in_flight_uris.remove(&hash_uri(&entry.uri));
            if let Some(handles) = self.by_tile.get_mut(&entry.tile) {
                handles.retain(|h| *h != handle);
                if handles.is_empty() {
                    self.by_tile.remove(&entry.tile);
                }
            }

            match outcome {
                FetchOutcome::Ok(bytes) => {
                    if let Some(tile) = arena.get_mut(entry.tile) {
                        if tile.state == TileState::Loading {
                            tile.state = TileState::Processing;
                        }
                    }
                    ready_for_decode.push((entry.tile, entry.uri, bytes));
                }
                FetchOutcome::Err(message) => {
                    self.multi_progress.remove(&entry.tile);
                    if let Some(tile) = arena.get_mut(entry.tile) {
                        tile.state = TileState::Failed(message);
                    }
                }
            }
        }

        ready_for_decode
    }

    /// Applies a decoded payload to a PROCESSING tile: content bytes move it
    /// to READY with its byte cost recorded (summed across every URI for a
    /// MULTIPLE-content tile before the transition fires); subtree
    /// availability is handed back to the caller so
    /// `implicit::expand_subtree` can materialize children.
    pub fn apply_decoded(
        &mut self,
        arena: &mut TileArena,
        id: TileId,
        payload: crate::errors::Result<DecodedPayload>,
    ) -> Option<crate::implicit::SubtreeAvailability> {
        if let Some(progress) = self.multi_progress.get_mut(&id) {
            return match payload {
                Ok(DecodedPayload::Content { byte_length }) => {
                    progress.bytes_accum += byte_length;
                    progress.remaining = progress.remaining.saturating_sub(1);
                    if progress.remaining == 0 {
                        let total = progress.bytes_accum;
                        self.multi_progress.remove(&id);
                        if let Some(tile) = arena.get_mut(id) {
                            tile.byte_length = total;
                            tile.state = TileState::Ready;
                        }
                    }
                    None
                }
                Ok(DecodedPayload::Subtree(_)) => {
                    log::warn!("multiple-content tile decoded a subtree payload, which is unexpected");
                    None
                }
                Err(err) => {
                    self.multi_progress.remove(&id);
                    if let Some(tile) = arena.get_mut(id) {
                        tile.state = TileState::Failed(err.to_string());
                    }
                    None
                }
            };
        }

        match payload {
            Ok(DecodedPayload::Content { byte_length }) => {
                if let Some(tile) = arena.get_mut(id) {
                    tile.byte_length = byte_length;
                    tile.state = TileState::Ready;
                }
                None
            }
            Ok(DecodedPayload::Subtree(availability)) => {
                if let Some(tile) = arena.get_mut(id) {
                    tile.state = TileState::Ready;
                }
                Some(availability)
            }
            Err(err) => {
                if let Some(tile) = arena.get_mut(id) {
                    tile.state = TileState::Failed(err.to_string());
                }
                None
            }
        }
    }

    /// postPass cancellation: any in-flight tile not touched this frame has
    /// every one of its fetches cancelled and state restored to UNLOADED.
    pub fn cancel_untouched(&mut self, arena: &mut TileArena, transport: &dyn Transport, frame: u64) {
        let stale: Vec<TileId> = self
            .by_tile
            .keys()
            .copied()
            .filter(|id| {
                arena
                    .get(*id)
                    .map(|t| frame.saturating_sub(t.touched_frame) >= 1)
                    .unwrap_or(true)
            })
            .collect();

        for id in stale {
            if let Some(handles) = self.by_tile.remove(&id) {
                for handle in handles {
                    if let Some(entry) = self.in_flight.remove(&handle) {
                        self.in_flight_uris.remove(&hash_uri(&entry.uri));
                    }
                    transport.cancel(handle);
                }
            }
            self.multi_progress.remove(&id);
            if let Some(tile) = arena.get_mut(id) {
                if tile.state == TileState::Loading {
                    tile.state = TileState::Unloaded;
                }
            }
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::{ContentKind, Priority, Tile};
    use cgmath::Matrix4;
    use std::sync::Mutex;

    struct FakeTransport {
        next_handle: Mutex<u64>,
        completed: Mutex<Vec<(FetchHandle, FetchOutcome)>>,
        fetched_uris: Mutex<Vec<String>>,
    }

    impl FakeTransport {
        fn new() -> Self {
            FakeTransport {
                next_handle: Mutex::new(0),
                completed: Mutex::new(Vec::new()),
                fetched_uris: Mutex::new(Vec::new()),
            }
        }
    }

    impl Transport for FakeTransport {
        fn fetch(&self, uri: &str) -> FetchHandle {
            let mut next = self.next_handle.lock().unwrap();
            let handle = FetchHandle(*next);
            *next += 1;
            self.fetched_uris.lock().unwrap().push(uri.to_string());
            self.completed
                .lock()
                .unwrap()
                .push((handle, FetchOutcome::Ok(vec![1, 2, 3])));
            handle
        }

        fn cancel(&self, _handle: FetchHandle) {}

        fn poll_completed(&self) -> Vec<(FetchHandle, FetchOutcome)> {
            std::mem::take(&mut self.completed.lock().unwrap())
        }
    }

    fn unloaded_tile() -> Tile {
        Tile {
            parent: None,
            children: Vec::new(),
            geometric_error: 10.0,
            refine: crate::tile::Refine::Replace,
            bounding_volume: crate::volumes::BoundingVolume::Sphere {
                center: cgmath::Point3::new(0.0, 0.0, 0.0),
                radius: 1.0,
            },
            content_bounding_volume: None,
            viewer_request_volume: None,
            transform: Matrix4::from_scale(1.0),
            computed_transform: Matrix4::from_scale(1.0),
            content: Content::Single {
                uri: "a.glb".into(),
                kind: ContentKind::Gltf,
            },
            state: TileState::Unloaded,
            priority: Priority::default(),
            touched_frame: 0,
            selected_frame: 0,
            visible_frame: 0,
            request_frame: 0,
            byte_length: 0,
            expire_at: None,
            geometric_error_scale: None,
            in_cache: false,
        }
    }

    #[test]
    fn issues_request_and_collects_completion() {
        let mut arena = TileArena::new();
        let id = arena.alloc(unloaded_tile());
        let transport = FakeTransport::new();
        let config = TraversalConfig::default();
        let motion = CameraMotion::default();
        let mut scheduler = Scheduler::new(8);

        scheduler.issue_requests(&mut arena, vec![id], &config, &motion, &transport, 1);
        assert_eq!(arena.get(id).unwrap().state, TileState::Loading);

        let completed = scheduler.collect_completed(&mut arena, &transport);
        assert_eq!(completed.len(), 1);
        assert_eq!(arena.get(id).unwrap().state, TileState::Processing);
    }

    fn unloaded_multi_tile(uris: &[&str]) -> Tile {
        let mut tile = unloaded_tile();
        tile.content = Content::Multiple(uris.iter().map(|u| (u.to_string(), ContentKind::B3dm)).collect());
        tile
    }

    #[test]
    fn multiple_content_tile_fetches_every_uri_and_sums_bytes() {
        let mut arena = TileArena::new();
        let id = arena.alloc(unloaded_multi_tile(&["a.b3dm", "b.b3dm", "c.b3dm"]));
        let transport = FakeTransport::new();
        let config = TraversalConfig::default();
        let motion = CameraMotion::default();
        let mut scheduler = Scheduler::new(8);

        scheduler.issue_requests(&mut arena, vec![id], &config, &motion, &transport, 1);
        assert_eq!(transport.fetched_uris.lock().unwrap().len(), 3);
        assert_eq!(arena.get(id).unwrap().state, TileState::Loading);

        let completed = scheduler.collect_completed(&mut arena, &transport);
        assert_eq!(completed.len(), 3);
        assert_eq!(arena.get(id).unwrap().state, TileState::Processing);

        for (tile_id, _uri, _bytes) in &completed[..2] {
            let payload = Ok(DecodedPayload::Content { byte_length: 10 });
            scheduler.apply_decoded(&mut arena, *tile_id, payload);
            assert_eq!(arena.get(id).unwrap().state, TileState::Processing, "not READY until every part lands");
        }
        let payload = Ok(DecodedPayload::Content { byte_length: 10 });
        scheduler.apply_decoded(&mut arena, completed[2].0, payload);
        assert_eq!(arena.get(id).unwrap().state, TileState::Ready);
        assert_eq!(arena.get(id).unwrap().byte_length, 30);
    }

    #[test]
    fn respects_in_flight_budget() {
        let mut arena = TileArena::new();
        let a = arena.alloc(unloaded_tile());
        let b = arena.alloc(unloaded_tile());
        let transport = FakeTransport::new();
        let config = TraversalConfig::default();
        let motion = CameraMotion::default();
        let mut scheduler = Scheduler::new(1);

        scheduler.issue_requests(&mut arena, vec![a, b], &config, &motion, &transport, 1);
        assert_eq!(scheduler.in_flight_count(), 1);
    }
}
