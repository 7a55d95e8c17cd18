//! Test doubles shared by the scenario suite: a `Transport` the test drives
//! by hand instead of letting bytes arrive on their own schedule, a
//! `ContentLoader` with byte sizes fixed up front, and `Hooks`/`Renderer`
//! implementations that just record what they were told.

use std::collections::HashMap;
use std::sync::Mutex;

use cgmath::{Deg, Point3, Vector3};

use std::time::{Duration, Instant};

use crate::{
    Camera, CameraPosition, Clock, ContentLoader, DecodedPayload, FetchHandle, FetchOutcome, Hooks,
    Renderer, Result, SelectedTile, TileId, Transport,
};

/// A `Transport` whose fetches never resolve until the test explicitly calls
/// [`FakeTransport::complete`] or [`FakeTransport::fail`] for a given URI.
/// Lets scenario tests drive exact frame boundaries around when bytes show
/// up, instead of racing a real network.
#[derive(Default)]
pub struct FakeTransport {
    next_handle: Mutex<u64>,
    pending: Mutex<HashMap<u64, String>>,
    completed: Mutex<Vec<(FetchHandle, FetchOutcome)>>,
    cancelled: Mutex<Vec<u64>>,
    fetched_uris: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves the oldest still-pending fetch for `uri` with `bytes`.
    /// Panics-free no-op if nothing is pending for that URI (the caller
    /// presumably already checked `fetched_uris`).
    pub fn complete(&self, uri: &str, bytes: Vec<u8>) {
        if let Some(handle) = self.take_pending(uri) {
            self.completed.lock().unwrap().push((FetchHandle(handle), FetchOutcome::Ok(bytes)));
        }
    }

    pub fn fail(&self, uri: &str, message: &str) {
        if let Some(handle) = self.take_pending(uri) {
            self.completed
                .lock()
                .unwrap()
                .push((FetchHandle(handle), FetchOutcome::Err(message.to_string())));
        }
    }

    fn take_pending(&self, uri: &str) -> Option<u64> {
        let mut pending = self.pending.lock().unwrap();
        let handle = pending.iter().find(|(_, u)| u.as_str() == uri).map(|(h, _)| *h)?;
        pending.remove(&handle);
        Some(handle)
    }

    pub fn fetched_uris(&self) -> Vec<String> {
        self.fetched_uris.lock().unwrap().clone()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn cancelled_count(&self) -> usize {
        self.cancelled.lock().unwrap().len()
    }

    pub fn is_pending(&self, uri: &str) -> bool {
        self.pending.lock().unwrap().values().any(|u| u == uri)
    }
}

impl Transport for FakeTransport {
    fn fetch(&self, uri: &str) -> FetchHandle {
        let mut next = self.next_handle.lock().unwrap();
        let handle = *next;
        *next += 1;
        self.pending.lock().unwrap().insert(handle, uri.to_string());
        self.fetched_uris.lock().unwrap().push(uri.to_string());
        FetchHandle(handle)
    }

    fn cancel(&self, handle: FetchHandle) {
        self.cancelled.lock().unwrap().push(handle.0);
    }

    fn poll_completed(&self) -> Vec<(FetchHandle, FetchOutcome)> {
        std::mem::take(&mut self.completed.lock().unwrap())
    }
}

/// Decodes every URI to a fixed byte cost, configurable per-URI so a test
/// can model a mix of coarse proxies and heavy leaf content without a real
/// glTF/B3DM parser.
pub struct FakeContentLoader {
    sizes: Mutex<HashMap<String, u64>>,
    default_size: u64,
}

impl FakeContentLoader {
    pub fn new(default_size: u64) -> Self {
        FakeContentLoader {
            sizes: Mutex::new(HashMap::new()),
            default_size,
        }
    }

    pub fn with_size(self, uri: impl Into<String>, size: u64) -> Self {
        self.sizes.lock().unwrap().insert(uri.into(), size);
        self
    }
}

impl ContentLoader for FakeContentLoader {
    fn decode(&self, uri: &str, bytes: Vec<u8>) -> Result<DecodedPayload> {
        let _ = bytes;
        let byte_length = self.sizes.lock().unwrap().get(uri).copied().unwrap_or(self.default_size);
        Ok(DecodedPayload::Content { byte_length })
    }
}

/// Records every hook callback it receives, in order, for straightforward
/// assertions. Real embedders would forward these to UI/telemetry instead.
#[derive(Default)]
pub struct RecordingHooks {
    pub loaded: Vec<TileId>,
    pub unloaded: Vec<TileId>,
    pub failed: Vec<(TileId, String)>,
    pub visible: Vec<TileId>,
    pub progress: Vec<(u32, u32, u32)>,
    pub initial_loaded_count: u32,
    pub all_loaded_count: u32,
}

impl Hooks for RecordingHooks {
    fn on_tile_load(&mut self, id: TileId, _byte_length: u64) {
        self.loaded.push(id);
    }
    fn on_tile_unload(&mut self, id: TileId) {
        self.unloaded.push(id);
    }
    fn on_tile_failed(&mut self, id: TileId, _uri: &str, message: &str) {
        self.failed.push((id, message.to_string()));
    }
    fn on_tile_visible(&mut self, id: TileId) {
        self.visible.push(id);
    }
    fn on_load_progress(&mut self, pending: u32, in_flight: u32, processing: u32) {
        self.progress.push((pending, in_flight, processing));
    }
    fn on_all_tiles_loaded(&mut self) {
        self.all_loaded_count += 1;
    }
    fn on_initial_tiles_loaded(&mut self) {
        self.initial_loaded_count += 1;
    }
}

/// Records each pass's `(selected, empty)` hand-off instead of drawing
/// anything, so a test can assert on exactly what a real Renderer would see.
#[derive(Default)]
pub struct RecordingRenderer {
    pub selected_calls: Vec<Vec<SelectedTile>>,
    pub empty_calls: Vec<Vec<SelectedTile>>,
    pub visible: Vec<TileId>,
}

impl RecordingRenderer {
    pub fn last_selected(&self) -> &[SelectedTile] {
        self.selected_calls.last().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn last_empty(&self) -> &[SelectedTile] {
        self.empty_calls.last().map(Vec::as_slice).unwrap_or(&[])
    }
}

impl Renderer for RecordingRenderer {
    fn on_selected(&mut self, tiles: &[SelectedTile]) {
        self.selected_calls.push(tiles.to_vec());
    }
    fn on_empty(&mut self, tiles: &[SelectedTile]) {
        self.empty_calls.push(tiles.to_vec());
    }
    fn on_tile_visible(&mut self, tile: &SelectedTile) {
        self.visible.push(tile.id);
    }
}

/// A pinhole camera looking down -z at the origin from `distance` away,
/// matching the axis-aligned setup the unit tests elsewhere in this crate
/// already use for SSE math.
pub fn camera_at(distance: f64, viewport_height_px: f64) -> Camera {
    Camera::new(
        CameraPosition {
            eye: Point3::new(0.0, 0.0, distance),
            target: Point3::new(0.0, 0.0, 0.0),
            up: Vector3::unit_y(),
        },
        Deg(60.0),
        16.0 / 9.0,
        viewport_height_px,
    )
}

/// Same, but with the eye rotated `degrees_off_axis` around the vertical
/// axis so the target sits away from screen center — for foveation tests.
pub fn camera_off_axis(distance: f64, viewport_height_px: f64, degrees_off_axis: f64) -> Camera {
    let rad = degrees_off_axis.to_radians();
    Camera::new(
        CameraPosition {
            eye: Point3::new(0.0, 0.0, distance),
            target: Point3::new(distance * rad.tan(), 0.0, 0.0),
            up: Vector3::unit_y(),
        },
        Deg(60.0),
        16.0 / 9.0,
        viewport_height_px,
    )
}

/// A `Clock` whose `now()` a test advances explicitly with
/// [`ManualClock::advance`], so expiry tests don't depend on wall-clock
/// timing to land a tile's `expire_at` in the past.
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap()
    }
}

pub const MIB: u64 = 1024 * 1024;
