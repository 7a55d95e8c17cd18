//! The BVH node and its arena: tiles live in one `Vec`, addressed by
//! `TileId`, with parent/children stored as indices rather than built into
//! an `Rc`/`RefCell` object graph.

use cgmath::Matrix4;
use std::time::Instant;

use crate::volumes::BoundingVolume;

/// Index into `TileArena::tiles`. `u32` keeps the arena cache-dense even for
/// the 40+-level hierarchies the design notes call out; four billion tiles
/// is far beyond any real dataset.
pub type TileId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refine {
    Add,
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Gltf,
    B3dm,
    I3dm,
    Pnts,
    Geojson,
    /// A nested `tileset.json` reference; its root tile is spliced into this
    /// tile's children once fetched and parsed.
    ExternalTileset,
    /// The binary availability subtree for an implicit-tiling placeholder.
    ImplicitSubtree,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    None,
    Single { uri: String, kind: ContentKind },
    Multiple(Vec<(String, ContentKind)>),
    Implicit(crate::implicit::ImplicitPlaceholder),
}

impl Content {
    pub fn is_empty(&self) -> bool {
        match self {
            Content::None => true,
            Content::Multiple(entries) => entries.is_empty(),
            _ => false,
        }
    }
}

/// Lifecycle state. `Failed` carries the message surfaced through
/// `on_tile_failed`; `Ready` carries nothing extra because byte accounting
/// lives on `Tile::byte_length` (content bytes themselves are owned by the
/// external `Renderer`/`ContentLoader`, not here).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileState {
    Unloaded,
    Loading,
    Processing,
    Ready,
    Expired,
    Failed(String),
}

impl TileState {
    pub fn is_ready(&self) -> bool {
        matches!(self, TileState::Ready)
    }
}

/// Per-frame priority inputs recomputed by the traversal/scheduler.
#[derive(Debug, Clone, Copy, Default)]
pub struct Priority {
    pub depth: u32,
    pub distance_to_camera: f64,
    pub foveated_factor: f64,
    /// Larger screen-space error sorts first; stored pre-negated so ascending
    /// sort by this field alone already yields "largest SSE first".
    pub reverse_sse: f64,
}

#[derive(Debug, Clone)]
pub struct Tile {
    pub parent: Option<TileId>,
    pub children: Vec<TileId>,

    pub geometric_error: f64,
    pub refine: Refine,
    pub bounding_volume: BoundingVolume,
    pub content_bounding_volume: Option<BoundingVolume>,
    pub viewer_request_volume: Option<BoundingVolume>,

    /// Local-to-parent transform as declared in the manifest.
    pub transform: Matrix4<f64>,
    /// `parent.computed_transform ∘ transform`, cached at load/expansion time.
    pub computed_transform: Matrix4<f64>,

    pub content: Content,
    pub state: TileState,

    pub priority: Priority,
    pub touched_frame: u64,
    pub selected_frame: u64,
    pub visible_frame: u64,
    pub request_frame: u64,

    pub byte_length: u64,
    pub expire_at: Option<Instant>,

    /// For point-cloud content; divides SSE when set.
    pub geometric_error_scale: Option<f64>,

    /// Set true while this tile sits in the cache's LRU list.
    pub in_cache: bool,
}

impl Tile {
    pub fn world_bounding_volume(&self) -> BoundingVolume {
        self.bounding_volume.transform(&self.computed_transform)
    }

    pub fn world_content_bounding_volume(&self) -> BoundingVolume {
        match &self.content_bounding_volume {
            Some(bv) => bv.transform(&self.computed_transform),
            None => self.world_bounding_volume(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

enum Slot {
    Occupied(Tile),
    Vacant,
}

/// Owns every tile as a flat, index-addressed arena. Destroying a subtree
/// (cache eviction of a whole branch, or content expiry) tombstones its
/// slots into a free list rather than shifting the vector or deleting a
/// contiguous index range, so `TileId`s handed to the request scheduler or
/// the Renderer snapshot stay valid across a frame even if the owning
/// subtree is destroyed moments later, and lazily-expanded implicit subtrees
/// don't need contiguous child ranges.
#[derive(Default)]
pub struct TileArena {
    slots: Vec<Slot>,
    free: Vec<TileId>,
    pub root: Option<TileId>,
}

impl TileArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, tile: Tile) -> TileId {
        if let Some(id) = self.free.pop() {
            self.slots[id as usize] = Slot::Occupied(tile);
            id
        } else {
            let id = self.slots.len() as TileId;
            self.slots.push(Slot::Occupied(tile));
            id
        }
    }

    pub fn get(&self, id: TileId) -> Option<&Tile> {
        match self.slots.get(id as usize) {
            Some(Slot::Occupied(t)) => Some(t),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, id: TileId) -> Option<&mut Tile> {
        match self.slots.get_mut(id as usize) {
            Some(Slot::Occupied(t)) => Some(t),
            _ => None,
        }
    }

    /// Destroys a tile and every descendant, reclaiming their slots. Used by
    /// cache eviction of whole branches and by expiry of subtree content,
    /// which is handled as destroy-and-re-request rather than in-place
    /// refresh.
    pub fn destroy_subtree(&mut self, id: TileId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let children = match self.get(current) {
                Some(t) => t.children.clone(),
                None => continue,
            };
            stack.extend(children);
            self.slots[current as usize] = Slot::Vacant;
            self.free.push(current);
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (TileId, &Tile)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| match s {
            Slot::Occupied(t) => Some((i as TileId, t)),
            Slot::Vacant => None,
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (TileId, &mut Tile)> {
        self.slots.iter_mut().enumerate().filter_map(|(i, s)| match s {
            Slot::Occupied(t) => Some((i as TileId, t)),
            Slot::Vacant => None,
        })
    }
}
