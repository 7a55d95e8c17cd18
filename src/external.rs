//! Contracts toward the three external collaborators (Renderer,
//! ContentLoader, a network Transport) plus a `Clock` abstraction for
//! deterministic tests. Transport is a trait rather than a concrete client
//! since shipping one is out of scope; `Clock` stands in for wall-clock time
//! the way a frame-rate tracker would.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::errors::Result;
use crate::helpers::channel::{self, Receiver, Sender};
use crate::implicit::SubtreeAvailability;
use crate::tile::{Content, TileId};

/// A reference to a tile plus the pieces of it a Renderer needs to hand off
/// to the GPU: transform, bounding volumes, and a content handle it can use
/// to look up whatever it cached for this tile's `ContentLoader` output. A
/// tile enters `selected`/`empty` as soon as it is in view, before its fetch
/// completes; `ready` tells the Renderer whether there is anything to draw
/// yet or whether this frame should fall back to an ancestor's content.
#[derive(Debug, Clone)]
pub struct SelectedTile {
    pub id: TileId,
    pub computed_transform: cgmath::Matrix4<f64>,
    pub bounding_volume: crate::volumes::BoundingVolume,
    pub content: Content,
    pub ready: bool,
}

/// Consumes the per-pass selection. The core never touches a GPU; it only
/// ever calls these three methods, all infallible from the core's point of
/// view (a Renderer that fails to draw a tile is the embedder's problem).
pub trait Renderer {
    fn on_selected(&mut self, tiles: &[SelectedTile]);
    fn on_empty(&mut self, tiles: &[SelectedTile]);
    /// Fired once per selected tile per frame so styling/picking hooks can
    /// observe visibility independent of `on_selected`'s batch shape.
    fn on_tile_visible(&mut self, tile: &SelectedTile) {
        let _ = tile;
    }
}

/// What a completed decode produced. Ordinary geometry only needs its byte
/// cost tracked by the cache; implicit-tiling placeholders additionally
/// hand back an availability list the core uses to expand the subtree.
#[derive(Debug, Clone)]
pub enum DecodedPayload {
    Content { byte_length: u64 },
    Subtree(SubtreeAvailability),
}

/// Decodes whatever bytes `Transport` fetched into a `DecodedPayload`. The
/// core never interprets glTF/B3DM/I3DM/PNTS/subtree binaries itself; it
/// only learns the resulting byte cost (or availability list).
pub trait ContentLoader: Send + Sync {
    fn decode(&self, uri: &str, bytes: Vec<u8>) -> Result<DecodedPayload>;
}

/// Handle to an in-flight fetch, returned by `Transport::fetch` and passed
/// back to `Transport::cancel`. Opaque to the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchHandle(pub u64);

/// Outcome of a fetch, delivered asynchronously via whatever channel the
/// embedder wires up (see the bounded delivery queue in `helpers::channel`).
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Ok(Vec<u8>),
    Err(String),
}

/// Network transport boundary. The core issues fetches and may cancel them;
/// it never blocks on them: fetches run elsewhere, completion is observed at
/// the next prePass.
pub trait Transport: Send + Sync {
    fn fetch(&self, uri: &str) -> FetchHandle;
    fn cancel(&self, handle: FetchHandle);
    /// Non-blocking drain of whatever fetches have completed since the last
    /// call. Order is not meaningful.
    fn poll_completed(&self) -> Vec<(FetchHandle, FetchOutcome)>;
}

/// Deterministic time source so tests can drive exact frame boundaries
/// without sleeping.
pub trait Clock {
    fn now(&self) -> std::time::Instant;
    fn elapsed_since(&self, earlier: std::time::Instant) -> Duration {
        self.now().saturating_duration_since(earlier)
    }
}

/// `Clock` backed by the real wall clock, the default outside tests.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> std::time::Instant {
        std::time::Instant::now()
    }
}

/// A `Transport` whose completion side is a bounded `crossbeam-channel`
/// queue: whatever fetches bytes off-thread pushes `(FetchHandle,
/// FetchOutcome)` pairs through a cloned [`Sender`], and `poll_completed`
/// drains them non-blockingly. The bound applies back-pressure to a fetch
/// worker pool instead of letting completions pile up unbounded in memory.
/// `fetch` itself is a no-op here beyond handle allocation; a real transport
/// would spawn the actual request and hand its result to the sender.
pub struct ChannelTransport {
    next_handle: AtomicU64,
    cancelled: Mutex<HashSet<u64>>,
    sender: Sender<(FetchHandle, FetchOutcome)>,
    receiver: Receiver<(FetchHandle, FetchOutcome)>,
}

impl ChannelTransport {
    pub fn new(bound: usize) -> Self {
        let (sender, receiver) = channel::channel(bound);
        ChannelTransport {
            next_handle: AtomicU64::new(0),
            cancelled: Mutex::new(HashSet::new()),
            sender,
            receiver,
        }
    }

    /// A cloneable handle a fetch worker uses to report completion from
    /// another thread without this `Transport` needing `&mut self`.
    pub fn completion_sender(&self) -> Sender<(FetchHandle, FetchOutcome)> {
        self.sender.clone()
    }
}

impl Transport for ChannelTransport {
    fn fetch(&self, _uri: &str) -> FetchHandle {
        FetchHandle(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    fn cancel(&self, handle: FetchHandle) {
        self.cancelled.lock().unwrap().insert(handle.0);
    }

    fn poll_completed(&self) -> Vec<(FetchHandle, FetchOutcome)> {
        let mut cancelled = self.cancelled.lock().unwrap();
        self.receiver
            .drain()
            .filter(|(handle, _)| !cancelled.remove(&handle.0))
            .collect()
    }
}
