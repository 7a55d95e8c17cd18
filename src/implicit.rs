//! Implicit-tiling placeholders and subtree expansion. A placeholder tile
//! carries a template URI and a subdivision coordinate; the first traversal
//! that visits it (marks it visible) drives it through the normal request
//! pipeline to fetch the `.subtree` resource, and the returned availability
//! list is used to materialize real children in the arena. Kept to plain
//! structs with no trait objects, matching the rest of the tile model.

use crate::tile::{Content, ContentKind, Priority, Refine, Tile, TileArena, TileId, TileState};
use crate::volumes::subdivide_quadrant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubdivisionScheme {
    Quadtree,
    Octree,
}

/// Coordinate of a node within an implicit subtree, `(level, x, y, z)` with
/// `z` absent for quadtree subdivision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImplicitCoordinate {
    pub level: u32,
    pub x: u32,
    pub y: u32,
    pub z: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ImplicitTemplate {
    pub subtree_uri_template: String,
    pub content_uri_template: String,
    pub scheme: SubdivisionScheme,
    pub subtree_levels: u32,
    pub available_levels: u32,
}

impl ImplicitTemplate {
    fn resolve(&self, template: &str, c: ImplicitCoordinate) -> String {
        let mut uri = template
            .replace("{level}", &c.level.to_string())
            .replace("{x}", &c.x.to_string())
            .replace("{y}", &c.y.to_string());
        if let Some(z) = c.z {
            uri = uri.replace("{z}", &z.to_string());
        }
        uri
    }

    pub fn subtree_uri(&self, c: ImplicitCoordinate) -> String {
        self.resolve(&self.subtree_uri_template, c)
    }

    pub fn content_uri(&self, c: ImplicitCoordinate) -> String {
        self.resolve(&self.content_uri_template, c)
    }
}

#[derive(Debug, Clone)]
pub struct ImplicitPlaceholder {
    pub template: std::sync::Arc<ImplicitTemplate>,
    pub coordinate: ImplicitCoordinate,
}

/// Decoded result of a `.subtree` resource: which child quadrants/octants
/// exist. In a full implementation this comes from parsing the subtree's
/// availability bitstream (a `ContentLoader` concern); tests hand one in
/// directly via `ContentLoader::decode` returning `DecodedPayload::Subtree`.
#[derive(Debug, Clone)]
pub struct SubtreeAvailability {
    pub available_children: Vec<ImplicitCoordinate>,
}

fn child_coordinates(scheme: SubdivisionScheme, parent: ImplicitCoordinate) -> Vec<ImplicitCoordinate> {
    let level = parent.level + 1;
    let mut out = Vec::new();
    for dx in 0..2u32 {
        for dy in 0..2u32 {
            match scheme {
                SubdivisionScheme::Quadtree => out.push(ImplicitCoordinate {
                    level,
                    x: parent.x * 2 + dx,
                    y: parent.y * 2 + dy,
                    z: None,
                }),
                SubdivisionScheme::Octree => {
                    for dz in 0..2u32 {
                        out.push(ImplicitCoordinate {
                            level,
                            x: parent.x * 2 + dx,
                            y: parent.y * 2 + dy,
                            z: Some(parent.z.unwrap_or(0) * 2 + dz),
                        });
                    }
                }
            }
        }
    }
    out
}

/// Materializes children of an implicit placeholder tile into the arena,
/// one per available coordinate, halving geometric error and subdividing
/// the bounding volume per quadrant.
pub fn expand_subtree(
    arena: &mut TileArena,
    placeholder_id: TileId,
    availability: &SubtreeAvailability,
) {
    let (template, parent_coord, parent_geometric_error, parent_bv, parent_transform, parent_refine) = {
        let tile = match arena.get(placeholder_id) {
            Some(t) => t,
            None => return,
        };
        let Content::Implicit(ref placeholder) = tile.content else {
            return;
        };
        (
            placeholder.template.clone(),
            placeholder.coordinate,
            tile.geometric_error,
            tile.bounding_volume.clone(),
            tile.computed_transform,
            tile.refine,
        )
    };

    let all_children = child_coordinates(template.scheme, parent_coord);
    let mut new_children = Vec::new();

    for coord in all_children {
        if !availability.available_children.contains(&coord) {
            continue;
        }

        let (x_half, y_half, z_half) = match template.scheme {
            SubdivisionScheme::Quadtree => (coord.x % 2 == 1, coord.y % 2 == 1, None),
            SubdivisionScheme::Octree => (
                coord.x % 2 == 1,
                coord.y % 2 == 1,
                Some(coord.z.unwrap_or(0) % 2 == 1),
            ),
        };
        let bv = subdivide_quadrant(&parent_bv, x_half, y_half, z_half);

        let is_leaf_level = coord.level + 1 >= template.available_levels;
        let content = if is_leaf_level || coord.level + 1 >= template.subtree_levels {
            Content::Single {
                uri: template.content_uri(coord),
                kind: ContentKind::Gltf,
            }
        } else {
            Content::Implicit(ImplicitPlaceholder {
                template: template.clone(),
                coordinate: coord,
            })
        };

        let child = Tile {
            parent: Some(placeholder_id),
            children: Vec::new(),
            geometric_error: parent_geometric_error * 0.5,
            refine: parent_refine,
            bounding_volume: bv,
            content_bounding_volume: None,
            viewer_request_volume: None,
            transform: cgmath::Matrix4::from_scale(1.0),
            computed_transform: parent_transform,
            content,
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
        };
        new_children.push(arena.alloc(child));
    }

    if let Some(tile) = arena.get_mut(placeholder_id) {
        tile.children = new_children;
    }
}
