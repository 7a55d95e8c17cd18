//! Depth-first tree walk producing the per-frame selected/empty/requested
//! lists: visibility culling, SSE-driven refinement, and the three traversal
//! strategies (Base, Skip-LOD, Most-Detailed) chosen per pass.

use crate::config::TraversalConfig;
use crate::dynamics::{apply_dynamic_sse, foveated_factor, foveated_threshold, Camera};
use crate::tile::{Priority, Refine, Tile, TileArena, TileId, TileState};
use crate::volumes::{AxisAlignedBox, PlaneSide};
use cgmath::Vector3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Base,
    SkipLod,
    MostDetailed,
}

/// Output of one traversal pass: disjoint lists a pass dispatcher hands to
/// the Renderer and the request scheduler.
#[derive(Debug, Default)]
pub struct TraversalOutput {
    pub selected: Vec<TileId>,
    pub empty: Vec<TileId>,
    pub requested: Vec<TileId>,
}

/// Parameters folded in from the dynamic-SSE modulator, computed once per
/// frame by the caller and shared across every tile visited this frame.
#[derive(Debug, Clone, Copy)]
pub struct DynamicSseParams {
    pub density: f64,
    pub near_cutoff: f64,
    pub max_factor: f64,
}

impl Default for DynamicSseParams {
    fn default() -> Self {
        DynamicSseParams {
            density: 0.0,
            near_cutoff: 0.0,
            max_factor: 0.0,
        }
    }
}

/// Computes a tile's screen-space error against `camera`, folding in dynamic
/// SSE and geometric-error-scale (point clouds). Returns `f64::INFINITY`
/// when the camera is inside the tile's bounding volume.
fn tile_sse(tile: &Tile, camera: &Camera, dynamic: &DynamicSseParams) -> f64 {
    let world_bv = tile.world_bounding_volume();
    let fovy = camera.fovy_radians();
    let denom = world_bv.screen_space_error_denominator(camera.position.eye, fovy, camera.orthographic_pixel_range);

    let geometric_error = match tile.geometric_error_scale {
        Some(scale) if scale > 0.0 => tile.geometric_error / scale,
        _ => tile.geometric_error,
    };

    let Some(denom) = denom else {
        return f64::INFINITY;
    };

    let raw = geometric_error * camera.viewport_height_px / denom;
    let distance = world_bv.distance_to_camera(camera.position.eye);
    apply_dynamic_sse(raw, distance, dynamic.near_cutoff, dynamic.density, dynamic.max_factor)
}

fn is_culled(tile: &Tile, arena: &TileArena, camera: &Camera, config: &TraversalConfig) -> bool {
    let world_bv = tile.world_bounding_volume();
    if world_bv.intersects_frustum(camera.planes()) == PlaneSide::Outside {
        return true;
    }
    if let Some(viewer_volume) = &tile.viewer_request_volume {
        let world_viewer_volume = viewer_volume.transform(&tile.computed_transform);
        if world_viewer_volume.distance_to_camera(camera.position.eye) > 0.0 {
            return true;
        }
    }
    if config.cull_with_children_bounds && !tile.children.is_empty() {
        if let Some(children_aabb) = union_children_aabb(arena, &tile.children) {
            if children_aabb.intersects_frustum(camera.planes()) == PlaneSide::Outside {
                return true;
            }
        }
    }
    false
}

/// Union AABB of every child's world bounding volume, used to tighten a
/// parent's frustum test beyond its own (often looser) declared volume.
/// Returns `None` if none of the children resolve to a live arena slot.
fn union_children_aabb(arena: &TileArena, children: &[TileId]) -> Option<AxisAlignedBox> {
    let mut min = Vector3::new(f64::MAX, f64::MAX, f64::MAX);
    let mut max = Vector3::new(f64::MIN, f64::MIN, f64::MIN);
    let mut any = false;
    for &child in children {
        let Some(child_tile) = arena.get(child) else { continue };
        any = true;
        for corner in child_tile.world_bounding_volume().corners() {
            min.x = min.x.min(corner.x);
            min.y = min.y.min(corner.y);
            min.z = min.z.min(corner.z);
            max.x = max.x.max(corner.x);
            max.y = max.y.max(corner.y);
            max.z = max.z.max(corner.z);
        }
    }
    any.then_some(AxisAlignedBox { min, max })
}

/// Recomputes `Tile::priority` for the current frame: depth, distance,
/// foveated factor, and the reverse-SSE tie-break key.
fn update_priority(tile: &mut Tile, camera: &Camera, sse: f64, depth: u32) {
    let world_bv = tile.world_bounding_volume();
    let distance = world_bv.distance_to_camera(camera.position.eye);
    let center = world_bv.center();
    tile.priority = Priority {
        depth,
        distance_to_camera: distance,
        foveated_factor: foveated_factor(camera, center),
        reverse_sse: -sse,
    };
}

struct BaseTraversal<'a> {
    arena: &'a mut TileArena,
    camera: &'a Camera,
    config: &'a TraversalConfig,
    dynamic: DynamicSseParams,
    threshold: f64,
    strategy: Strategy,
    output: TraversalOutput,
    requested_set: std::collections::HashSet<TileId>,
    /// The tileset's single frame counter, stamped onto visited tiles'
    /// `touched_frame`/`selected_frame`/`visible_frame` rather than each
    /// tile (or this traversal) keeping its own incrementing copy — a
    /// frame with more than one fetching pass (render + preload) shares
    /// this same number across both calls, so a tile touched by one pass
    /// isn't mistaken for stale by the other pass's cancellation.
    frame: u64,
}

impl<'a> BaseTraversal<'a> {
    /// Visits one tile, returning whether it (or a READY descendant standing
    /// in for it) is fully resolved for REPLACE's "all children ready" rule.
    fn visit(&mut self, id: TileId, depth: u32) -> bool {
        let Some(tile) = self.arena.get(id) else {
            return false;
        };

        if is_culled(tile, self.arena, self.camera, self.config) {
            return false;
        }

        let sse = tile_sse(tile, self.camera, &self.dynamic);
        let effective_threshold = if self.strategy == Strategy::MostDetailed {
            0.0
        } else {
            foveated_threshold(self.config, self.threshold, tile.priority.foveated_factor)
        };

        let refine = tile.refine;
        let is_leaf = tile.is_leaf();
        let content_is_empty = tile.content.is_empty();
        let children = tile.children.clone();

        if let Some(tile) = self.arena.get_mut(id) {
            update_priority(tile, self.camera, sse, depth);
            tile.touched_frame = self.frame;
        }

        if sse <= effective_threshold || is_leaf {
            self.select_or_request(id, content_is_empty);
            if refine == Refine::Add {
                for child in &children {
                    self.visit(*child, depth + 1);
                }
            }
            return matches!(self.arena.get(id).map(|t| &t.state), Some(TileState::Ready)) || content_is_empty;
        }

        match refine {
            Refine::Add => {
                self.select_or_request(id, content_is_empty);
                for child in &children {
                    self.visit(*child, depth + 1);
                }
                true
            }
            Refine::Replace => self.visit_replace(id, depth, &children, content_is_empty),
        }
    }

    fn visit_replace(&mut self, id: TileId, depth: u32, children: &[TileId], content_is_empty: bool) -> bool {
        if children.is_empty() {
            self.select_or_request(id, content_is_empty);
            return matches!(self.arena.get(id).map(|t| &t.state), Some(TileState::Ready)) || content_is_empty;
        }

        let skip_lod = self.strategy == Strategy::SkipLod
            && self.config.is_skipping_lod(false)
            && self.skip_eligible(id);

        if skip_lod {
            return self.visit_skip_lod(id, depth, children, content_is_empty);
        }

        let mut all_ready = true;
        for child in children {
            if !self.visit(*child, depth + 1) {
                all_ready = false;
            }
        }

        if all_ready {
            true
        } else {
            self.select_or_request(id, content_is_empty);
            for child in children {
                self.request_if_unloaded(*child);
            }
            matches!(self.arena.get(id).map(|t| &t.state), Some(TileState::Ready)) || content_is_empty
        }
    }

    fn skip_eligible(&self, id: TileId) -> bool {
        let Some(tile) = self.arena.get(id) else {
            return false;
        };
        let sse = tile_sse(tile, self.camera, &self.dynamic);
        sse > self.threshold && sse <= self.config.base_sse * self.config.skip_sse_factor
    }

    /// Displays whichever ancestor is READY while requesting the target
    /// descendants `skip_levels` deep directly, bypassing intermediate LOD.
    fn visit_skip_lod(&mut self, id: TileId, depth: u32, children: &[TileId], content_is_empty: bool) -> bool {
        let mut targets = children.to_vec();
        for _ in 0..self.config.skip_levels {
            let mut next = Vec::new();
            for t in &targets {
                if let Some(tile) = self.arena.get(*t) {
                    if tile.children.is_empty() {
                        next.push(*t);
                    } else {
                        next.extend(tile.children.iter().copied());
                    }
                }
            }
            targets = next;
        }

        if self.config.load_siblings {
            let mut with_siblings = Vec::new();
            for t in &targets {
                if let Some(tile) = self.arena.get(*t) {
                    if let Some(parent) = tile.parent {
                        if let Some(parent_tile) = self.arena.get(parent) {
                            with_siblings.extend(parent_tile.children.iter().copied());
                            continue;
                        }
                    }
                }
                with_siblings.push(*t);
            }
            targets = with_siblings;
        }

        for t in &targets {
            self.visit(*t, depth + 1);
            if self.config.immediately_load_desired_lod {
                self.request_if_unloaded(*t);
            }
        }

        self.select_or_request(id, content_is_empty);
        matches!(self.arena.get(id).map(|t| &t.state), Some(TileState::Ready)) || content_is_empty
    }

    fn select_or_request(&mut self, id: TileId, content_is_empty: bool) {
        let Some(tile) = self.arena.get_mut(id) else {
            return;
        };
        tile.selected_frame = self.frame;
        if content_is_empty {
            self.output.empty.push(id);
        } else {
            self.output.selected.push(id);
            tile.visible_frame = self.frame;
        }
        self.request_if_unloaded(id);
    }

    fn request_if_unloaded(&mut self, id: TileId) {
        if let Some(tile) = self.arena.get(id) {
            let needs_fetch = matches!(tile.state, TileState::Unloaded | TileState::Expired);
            if needs_fetch && !tile.content.is_empty() && self.requested_set.insert(id) {
                self.output.requested.push(id);
            }
        }
    }
}

/// Runs a single traversal pass starting at `root`, using `strategy` to
/// decide how SSE thresholds and skip-LOD rules apply.
pub fn traverse(
    arena: &mut TileArena,
    root: TileId,
    camera: &Camera,
    config: &TraversalConfig,
    dynamic: DynamicSseParams,
    strategy: Strategy,
    memory_adjusted_sse: f64,
    frame: u64,
) -> TraversalOutput {
    let threshold = if strategy == Strategy::MostDetailed { 0.0 } else { memory_adjusted_sse };
    let mut pass = BaseTraversal {
        arena,
        camera,
        config,
        dynamic,
        threshold,
        strategy,
        output: TraversalOutput::default(),
        requested_set: std::collections::HashSet::new(),
        frame,
    };
    pass.visit(root, 0);
    pass.output
}

/// Lexicographic priority score used to sort the request queue: larger SSE
/// first, then closer, then more on-axis, then shallower (or, with
/// `prefer_leaves` enabled, deeper). Lower score sorts first (more
/// important).
pub fn priority_score(p: &Priority, prefer_leaves: bool) -> (f64, u64, f64, u32) {
    let distance_bits = p.distance_to_camera.max(0.0) as u64;
    let depth_key = if prefer_leaves { u32::MAX - p.depth } else { p.depth };
    (p.reverse_sse, distance_bits, p.foveated_factor, depth_key)
}

pub fn sort_by_priority(arena: &TileArena, ids: &mut [TileId], config: &TraversalConfig) {
    ids.sort_by(|a, b| {
        let pa = arena.get(*a).map(|t| t.priority).unwrap_or_default();
        let pb = arena.get(*b).map(|t| t.priority).unwrap_or_default();
        priority_score(&pa, config.prefer_leaves)
            .partial_cmp(&priority_score(&pb, config.prefer_leaves))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamics::CameraPosition;
    use crate::tile::{Content, TileState};
    use crate::volumes::BoundingVolume;
    use cgmath::{Deg, Matrix4, Point3, Vector3};

    fn leaf_tile(parent: Option<TileId>, geometric_error: f64, radius: f64) -> Tile {
        Tile {
            parent,
            children: Vec::new(),
            geometric_error,
            refine: Refine::Replace,
            bounding_volume: BoundingVolume::Sphere {
                center: Point3::new(0.0, 0.0, 0.0),
                radius,
            },
            content_bounding_volume: None,
            viewer_request_volume: None,
            transform: Matrix4::from_scale(1.0),
            computed_transform: Matrix4::from_scale(1.0),
            content: Content::Single {
                uri: "tile.glb".into(),
                kind: crate::tile::ContentKind::Gltf,
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

    fn test_camera(distance: f64) -> Camera {
        Camera::new(
            CameraPosition {
                eye: Point3::new(0.0, 0.0, distance),
                target: Point3::new(0.0, 0.0, 0.0),
                up: Vector3::unit_y(),
            },
            Deg(60.0),
            16.0 / 9.0,
            800.0,
        )
    }

    #[test]
    fn low_sse_leaf_is_selected_without_request_when_ready() {
        let mut arena = TileArena::new();
        let mut root_tile = leaf_tile(None, 1.0, 1.0);
        root_tile.state = TileState::Ready;
        let root = arena.alloc(root_tile);

        let camera = test_camera(1000.0);
        let config = TraversalConfig::default();
        let output = traverse(&mut arena, root, &camera, &config, DynamicSseParams::default(), Strategy::Base, config.maximum_sse, 1);

        assert_eq!(output.selected, vec![root]);
        assert!(output.requested.is_empty());
    }

    #[test]
    fn high_sse_triggers_request() {
        let mut arena = TileArena::new();
        let root_tile = leaf_tile(None, 1_000_000.0, 50.0);
        let root = arena.alloc(root_tile);

        let camera = test_camera(100.0);
        let config = TraversalConfig::default();
        let output = traverse(&mut arena, root, &camera, &config, DynamicSseParams::default(), Strategy::Base, config.maximum_sse, 1);

        assert_eq!(output.selected, vec![root]);
        assert_eq!(output.requested, vec![root]);
    }

    #[test]
    fn replace_parent_selected_until_all_children_ready() {
        let mut arena = TileArena::new();
        let mut root_tile = leaf_tile(None, 200.0, 5.0);
        root_tile.state = TileState::Ready;
        let root = arena.alloc(root_tile);

        let mut child_a = leaf_tile(Some(root), 50.0, 2.0);
        child_a.state = TileState::Unloaded;
        let child_a_id = arena.alloc(child_a);
        let mut child_b = leaf_tile(Some(root), 50.0, 2.0);
        child_b.state = TileState::Ready;
        let child_b_id = arena.alloc(child_b);

        if let Some(root_mut) = arena.get_mut(root) {
            root_mut.children = vec![child_a_id, child_b_id];
        }

        let camera = test_camera(20.0);
        let config = TraversalConfig::default();
        let output = traverse(&mut arena, root, &camera, &config, DynamicSseParams::default(), Strategy::Base, config.maximum_sse, 1);

        assert!(output.selected.contains(&root));
        assert!(output.requested.contains(&child_a_id));
    }
}
