//! Bounding-volume primitives shared by every tile: sphere, oriented box,
//! geographic region, and S2 cell. Box math (12-number box, ray intersection,
//! closest-point) is generalized to the full capability set the traversal
//! engine needs: plane/frustum tests that distinguish INSIDE from
//! INTERSECTING, not just a single visibility bit.

use crate::helpers::geodetic_to_ecef_z_up;
use cgmath::{InnerSpace, Matrix3, Matrix4, Point3, SquareMatrix, Transform, Vector3, Vector4, Zero};

/// Result of testing a volume against a single plane or a frustum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneSide {
    Inside,
    Outside,
    Intersecting,
}

impl PlaneSide {
    fn combine(self, other: PlaneSide) -> PlaneSide {
        match (self, other) {
            (PlaneSide::Outside, _) | (_, PlaneSide::Outside) => PlaneSide::Outside,
            (PlaneSide::Intersecting, _) | (_, PlaneSide::Intersecting) => PlaneSide::Intersecting,
            _ => PlaneSide::Inside,
        }
    }
}

/// A plane in `normal . p + distance = 0` form, normal pointing into the
/// half-space considered "inside" the frustum.
#[derive(Debug, Clone, Copy)]
pub struct Plane {
    pub normal: Vector3<f64>,
    pub distance: f64,
}

impl Plane {
    pub fn new(normal: Vector3<f64>, distance: f64) -> Self {
        let len = normal.magnitude();
        if len > 0.0 {
            Plane {
                normal: normal / len,
                distance: distance / len,
            }
        } else {
            Plane { normal, distance }
        }
    }

    fn signed_distance(&self, p: Vector3<f64>) -> f64 {
        self.normal.dot(p) + self.distance
    }
}

/// Six-plane view frustum (left, right, bottom, top, near, far). Keeps the
/// far plane (unlike a reverse-z renderer that folds it away) since distance
/// culling needs it directly.
pub type FrustumPlanes = [Plane; 6];

/// Derives the six frustum planes from a combined projection * view matrix
/// by the standard row-combination trick, for a conventional (non reverse-z)
/// projection, hence all six planes kept.
pub fn extract_frustum_planes(proj_view: &Matrix4<f64>) -> FrustumPlanes {
    let rows = [
        proj_view.row(0),
        proj_view.row(1),
        proj_view.row(2),
        proj_view.row(3),
    ];

    let raw = |v: Vector4<f64>| Plane::new(Vector3::new(v.x, v.y, v.z), v.w);

    [
        raw(rows[3] + rows[0]), // left
        raw(rows[3] - rows[0]), // right
        raw(rows[3] + rows[1]), // bottom
        raw(rows[3] - rows[1]), // top
        raw(rows[3] + rows[2]), // near
        raw(rows[3] - rows[2]), // far
    ]
}

#[derive(Debug, Clone, Copy)]
pub struct AxisAlignedBox {
    pub min: Vector3<f64>,
    pub max: Vector3<f64>,
}

impl AxisAlignedBox {
    pub fn corners(&self) -> [Vector3<f64>; 8] {
        let mut out = [Vector3::zero(); 8];
        for i in 0..2 {
            for j in 0..2 {
                for k in 0..2 {
                    out[i * 4 + j * 2 + k] = Vector3::new(
                        if i == 0 { self.min.x } else { self.max.x },
                        if j == 0 { self.min.y } else { self.max.y },
                        if k == 0 { self.min.z } else { self.max.z },
                    );
                }
            }
        }
        out
    }

    pub fn intersects_plane(&self, plane: &Plane) -> PlaneSide {
        let positive = Vector3::new(
            if plane.normal.x >= 0.0 { self.max.x } else { self.min.x },
            if plane.normal.y >= 0.0 { self.max.y } else { self.min.y },
            if plane.normal.z >= 0.0 { self.max.z } else { self.min.z },
        );
        let negative = Vector3::new(
            if plane.normal.x >= 0.0 { self.min.x } else { self.max.x },
            if plane.normal.y >= 0.0 { self.min.y } else { self.max.y },
            if plane.normal.z >= 0.0 { self.min.z } else { self.max.z },
        );

        if plane.signed_distance(positive) < 0.0 {
            return PlaneSide::Outside;
        }
        if plane.signed_distance(negative) < 0.0 {
            return PlaneSide::Intersecting;
        }
        PlaneSide::Inside
    }

    /// Same combine-across-planes logic as `BoundingVolume::intersects_frustum`,
    /// exposed directly on the box for culling against a synthesized union
    /// volume (e.g. `cull_with_children_bounds`) that never needs the other
    /// `BoundingVolume` variants.
    pub fn intersects_frustum(&self, frustum: &FrustumPlanes) -> PlaneSide {
        let mut side = PlaneSide::Inside;
        for plane in frustum {
            match self.intersects_plane(plane) {
                PlaneSide::Outside => return PlaneSide::Outside,
                s => side = side.combine(s),
            }
        }
        side
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Ray {
    pub origin: Point3<f64>,
    pub direction: Vector3<f64>,
}

/// Oriented box: center plus three (possibly non-unit, non-orthonormal in the
/// degenerate case) half-axes, the standard 12-number `box` layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientedBox {
    pub center: Point3<f64>,
    pub half_axes: [Vector3<f64>; 3],
}

impl OrientedBox {
    fn bounding_sphere_radius(&self) -> f64 {
        (self.half_axes[0].magnitude2() + self.half_axes[1].magnitude2() + self.half_axes[2].magnitude2())
            .sqrt()
    }

    fn to_aabb(&self) -> AxisAlignedBox {
        let extent = Vector3::new(
            self.half_axes[0].x.abs() + self.half_axes[1].x.abs() + self.half_axes[2].x.abs(),
            self.half_axes[0].y.abs() + self.half_axes[1].y.abs() + self.half_axes[2].y.abs(),
            self.half_axes[0].z.abs() + self.half_axes[1].z.abs() + self.half_axes[2].z.abs(),
        );
        AxisAlignedBox {
            min: self.center.to_vec() - extent,
            max: self.center.to_vec() + extent,
        }
    }

    fn corners(&self) -> [Vector3<f64>; 8] {
        let c = self.center.to_vec();
        let a = self.half_axes;
        let mut out = [Vector3::zero(); 8];
        for i in 0..2 {
            for j in 0..2 {
                for k in 0..2 {
                    out[i * 4 + j * 2 + k] = c
                        + a[0] * if i == 0 { -1.0 } else { 1.0 }
                        + a[1] * if j == 0 { -1.0 } else { 1.0 }
                        + a[2] * if k == 0 { -1.0 } else { 1.0 };
                }
            }
        }
        out
    }

    fn intersects_plane(&self, plane: &Plane) -> PlaneSide {
        let r = self.half_axes[0].dot(plane.normal).abs()
            + self.half_axes[1].dot(plane.normal).abs()
            + self.half_axes[2].dot(plane.normal).abs();
        let d = plane.signed_distance(self.center.to_vec());
        if d < -r {
            PlaneSide::Outside
        } else if d > r {
            PlaneSide::Inside
        } else {
            PlaneSide::Intersecting
        }
    }

    fn closest_point(&self, point: Vector3<f64>) -> Vector3<f64> {
        let basis = Matrix3::from_cols(self.half_axes[0], self.half_axes[1], self.half_axes[2]);
        let Some(inv_basis) = basis.invert() else {
            log::warn!("oriented box basis is not invertible; degenerate half-axes");
            return self.center.to_vec();
        };
        let local = inv_basis * (point - self.center.to_vec());
        if local.x.abs() <= 1.0 && local.y.abs() <= 1.0 && local.z.abs() <= 1.0 {
            return point;
        }
        let clamped = Vector3::new(local.x.clamp(-1.0, 1.0), local.y.clamp(-1.0, 1.0), local.z.clamp(-1.0, 1.0));
        self.center.to_vec() + basis * clamped
    }

    fn transform(&self, m: &Matrix4<f64>) -> Self {
        let center = m.transform_point(self.center);
        let linear = Matrix3::from_cols(m.x.truncate(), m.y.truncate(), m.z.truncate());
        OrientedBox {
            center,
            half_axes: [linear * self.half_axes[0], linear * self.half_axes[1], linear * self.half_axes[2]],
        }
    }
}

/// WGS84 geographic region: west/south/east/north in radians, plus a height range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
    pub min_height: f64,
    pub max_height: f64,
}

impl Region {
    /// Conservative ECEF AABB obtained by sampling the eight corner extremes.
    /// Cheap and adequate for culling; not a tight fit for large regions.
    fn to_aabb(&self) -> AxisAlignedBox {
        let lons = [self.west, self.east];
        let lats = [self.south, self.north];
        let heights = [self.min_height, self.max_height];
        let mut min = Vector3::new(f64::MAX, f64::MAX, f64::MAX);
        let mut max = Vector3::new(f64::MIN, f64::MIN, f64::MIN);
        for &lon in &lons {
            for &lat in &lats {
                for &h in &heights {
                    let p = geodetic_to_ecef_z_up(lat.to_degrees(), lon.to_degrees(), h);
                    min.x = min.x.min(p.x);
                    min.y = min.y.min(p.y);
                    min.z = min.z.min(p.z);
                    max.x = max.x.max(p.x);
                    max.y = max.y.max(p.y);
                    max.z = max.z.max(p.z);
                }
            }
        }
        AxisAlignedBox { min, max }
    }

    fn center(&self) -> Point3<f64> {
        let lon = (self.west + self.east) * 0.5;
        let lat = (self.south + self.north) * 0.5;
        let h = (self.min_height + self.max_height) * 0.5;
        geodetic_to_ecef_z_up(lat.to_degrees(), lon.to_degrees(), h)
    }
}

/// A bounding volume of one of the four 3D Tiles variants. `S2Cell` is kept
/// as a simplified oriented-box approximation: the core never needs the
/// exact S2 cell subdivision math, only a conservative spatial envelope for
/// visibility and distance, so the cell is rasterized into an `OrientedBox`
/// once at load time (see `BoundingVolume::from_s2`) rather than carrying
/// face/i/j/level around through every test.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundingVolume {
    Sphere { center: Point3<f64>, radius: f64 },
    OrientedBox(OrientedBox),
    Region(Region),
    S2Cell(OrientedBox),
}

impl BoundingVolume {
    pub fn from_s2_approximation(obb: OrientedBox) -> Self {
        BoundingVolume::S2Cell(obb)
    }

    pub fn center(&self) -> Point3<f64> {
        match self {
            BoundingVolume::Sphere { center, .. } => *center,
            BoundingVolume::OrientedBox(obb) => obb.center,
            BoundingVolume::Region(r) => r.center(),
            BoundingVolume::S2Cell(obb) => obb.center,
        }
    }

    /// Conservative bounding radius, used for the screen-space-error kernel
    /// and for the "camera is inside" (`distance == 0`) special case.
    pub fn bounding_radius(&self) -> f64 {
        match self {
            BoundingVolume::Sphere { radius, .. } => *radius,
            BoundingVolume::OrientedBox(obb) => obb.bounding_sphere_radius(),
            BoundingVolume::Region(r) => {
                let aabb = r.to_aabb();
                (aabb.max - aabb.min).magnitude() * 0.5
            }
            BoundingVolume::S2Cell(obb) => obb.bounding_sphere_radius(),
        }
    }

    fn to_aabb(&self) -> AxisAlignedBox {
        match self {
            BoundingVolume::Sphere { center, radius } => AxisAlignedBox {
                min: center.to_vec() - Vector3::new(*radius, *radius, *radius),
                max: center.to_vec() + Vector3::new(*radius, *radius, *radius),
            },
            BoundingVolume::OrientedBox(obb) => obb.to_aabb(),
            BoundingVolume::Region(r) => r.to_aabb(),
            BoundingVolume::S2Cell(obb) => obb.to_aabb(),
        }
    }

    pub fn corners(&self) -> [Vector3<f64>; 8] {
        match self {
            BoundingVolume::OrientedBox(obb) | BoundingVolume::S2Cell(obb) => obb.corners(),
            _ => self.to_aabb().corners(),
        }
    }

    /// Closest point on the surface/interior of the volume to `point`, used
    /// by `distance_to_camera`. For the sphere this is the usual clamp along
    /// the center-to-point ray; for box-like volumes it is the standard
    /// per-axis clamp into oriented-box space.
    pub fn closest_point(&self, point: Vector3<f64>) -> Vector3<f64> {
        match self {
            BoundingVolume::Sphere { center, radius } => {
                let d = point - center.to_vec();
                let len = d.magnitude();
                if len <= *radius {
                    point
                } else {
                    center.to_vec() + d * (*radius / len)
                }
            }
            BoundingVolume::OrientedBox(obb) | BoundingVolume::S2Cell(obb) => obb.closest_point(point),
            BoundingVolume::Region(r) => {
                // Conservative: clamp against the sampled AABB.
                let aabb = r.to_aabb();
                Vector3::new(
                    point.x.clamp(aabb.min.x, aabb.max.x),
                    point.y.clamp(aabb.min.y, aabb.max.y),
                    point.z.clamp(aabb.min.z, aabb.max.z),
                )
            }
        }
    }

    /// `distance_to_camera(camera) -> f64`, zero iff the camera lies inside
    /// (or on the surface of) the volume — the SSE formula's `+inf` trigger.
    pub fn distance_to_camera(&self, camera: Point3<f64>) -> f64 {
        let closest = self.closest_point(camera.to_vec());
        (camera.to_vec() - closest).magnitude()
    }

    pub fn intersects_plane(&self, plane: &Plane) -> PlaneSide {
        match self {
            BoundingVolume::Sphere { center, radius } => {
                let d = plane.signed_distance(center.to_vec());
                if d < -radius {
                    PlaneSide::Outside
                } else if d > *radius {
                    PlaneSide::Inside
                } else {
                    PlaneSide::Intersecting
                }
            }
            BoundingVolume::OrientedBox(obb) | BoundingVolume::S2Cell(obb) => obb.intersects_plane(plane),
            BoundingVolume::Region(_) => self.to_aabb().intersects_plane(plane),
        }
    }

    pub fn intersects_frustum(&self, frustum: &FrustumPlanes) -> PlaneSide {
        let mut side = PlaneSide::Inside;
        for plane in frustum {
            match self.intersects_plane(plane) {
                PlaneSide::Outside => return PlaneSide::Outside,
                s => side = side.combine(s),
            }
        }
        side
    }

    pub fn transform(&self, m: &Matrix4<f64>) -> Self {
        match self {
            BoundingVolume::Sphere { center, radius } => {
                let new_center = m.transform_point(*center);
                // Conservative uniform-scale estimate from the longest transformed basis vector.
                let scale = m.x.truncate().magnitude().max(m.y.truncate().magnitude()).max(m.z.truncate().magnitude());
                BoundingVolume::Sphere {
                    center: new_center,
                    radius: radius * scale,
                }
            }
            BoundingVolume::OrientedBox(obb) => BoundingVolume::OrientedBox(obb.transform(m)),
            BoundingVolume::S2Cell(obb) => BoundingVolume::S2Cell(obb.transform(m)),
            BoundingVolume::Region(r) => BoundingVolume::Region(*r), // regions are absolute WGS84, untransformed
        }
    }

    /// Screen-space-error denominator: `distance * 2 * tan(fovy/2)` for
    /// perspective, or `pixel_range` for orthographic. Returns `None` when
    /// the camera is inside the volume (`distance == 0`), signalling the
    /// caller to use `sse = +inf`.
    pub fn screen_space_error_denominator(&self, camera: Point3<f64>, fovy_rad: f64, orthographic_pixel_range: Option<f64>) -> Option<f64> {
        let distance = self.distance_to_camera(camera);
        if distance <= 0.0 {
            return None;
        }
        Some(match orthographic_pixel_range {
            Some(pixel_range) => pixel_range,
            None => distance * 2.0 * (fovy_rad * 0.5).tan(),
        })
    }
}

/// Subdivides a bounding volume into one of 4 (quadtree) or 8 (octree)
/// quadrant volumes, used by implicit-tiling expansion. Works for the two
/// volume kinds 3D Tiles implicit tiling actually uses in practice (region
/// and oriented box); spheres/S2 cells are not legal implicit roots per the
/// 3D Tiles spec and are rejected by the caller before reaching here.
pub fn subdivide_quadrant(volume: &BoundingVolume, x_half: bool, y_half: bool, z_half: Option<bool>) -> BoundingVolume {
    let sign = |half: bool| if half { 1.0 } else { -1.0 };
    match volume {
        BoundingVolume::Region(r) => {
            let mid_lon = (r.west + r.east) * 0.5;
            let mid_lat = (r.south + r.north) * 0.5;
            let (west, east) = if x_half { (mid_lon, r.east) } else { (r.west, mid_lon) };
            let (south, north) = if y_half { (mid_lat, r.north) } else { (r.south, mid_lat) };
            let (min_height, max_height) = match z_half {
                Some(upper) => {
                    let mid_h = (r.min_height + r.max_height) * 0.5;
                    if upper {
                        (mid_h, r.max_height)
                    } else {
                        (r.min_height, mid_h)
                    }
                }
                None => (r.min_height, r.max_height),
            };
            BoundingVolume::Region(Region { west, south, east, north, min_height, max_height })
        }
        BoundingVolume::OrientedBox(obb) => {
            let half = [obb.half_axes[0] * 0.5, obb.half_axes[1] * 0.5, obb.half_axes[2] * 0.5];
            let center = obb.center.to_vec() + half[0] * sign(x_half) + half[1] * sign(y_half)
                + z_half.map(|z| half[2] * sign(z)).unwrap_or(Vector3::zero());
            let half_axes = match z_half {
                Some(_) => half,
                None => [half[0], half[1], obb.half_axes[2]],
            };
            BoundingVolume::OrientedBox(OrientedBox { center: Point3::from_vec(center), half_axes })
        }
        other => other.clone(),
    }
}
