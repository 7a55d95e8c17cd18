//! Camera state and the per-frame SSE modulation that reacts to it: frustum
//! derivation from eye/target/up, and the height/horizon-driven relaxation
//! that lets distant tiles refine less while the camera is low and looking
//! toward the horizon.

use cgmath::{Deg, InnerSpace, Matrix4, Point3, Vector3};

use crate::config::TraversalConfig;
use crate::volumes::{extract_frustum_planes, FrustumPlanes};

const NEAR_MIN: f64 = 0.1;
const NEAR_MAX: f64 = 10_000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraPosition {
    pub eye: Point3<f64>,
    pub target: Point3<f64>,
    pub up: Vector3<f64>,
}

/// A camera's full state: user-set position/lens plus the matrices derived
/// from them. Recomputed once per frame by `update`, not lazily per-query,
/// so every tile's traversal within a frame sees an identical view.
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: CameraPosition,
    pub fovy: Deg<f64>,
    pub aspect: f64,
    pub viewport_height_px: f64,
    pub orthographic_pixel_range: Option<f64>,
    pub near: Option<f64>,
    pub far: Option<f64>,

    planes: FrustumPlanes,
    proj_view: Matrix4<f64>,
    resolved_near: f64,
    resolved_far: f64,
}

impl Camera {
    pub fn new(position: CameraPosition, fovy: Deg<f64>, aspect: f64, viewport_height_px: f64) -> Self {
        let mut camera = Camera {
            position,
            fovy,
            aspect,
            viewport_height_px,
            orthographic_pixel_range: None,
            near: None,
            far: None,
            planes: extract_frustum_planes(&Matrix4::from_scale(1.0)),
            proj_view: Matrix4::from_scale(1.0),
            resolved_near: NEAR_MIN,
            resolved_far: NEAR_MAX,
        };
        camera.update();
        camera
    }

    /// Recomputes the projection/view matrices and frustum planes. Must be
    /// called after any field mutation and before the next traversal pass.
    pub fn update(&mut self) {
        let distance_to_target = (self.position.target - self.position.eye).magnitude().max(1.0);
        let near_scale = if distance_to_target > 50_000.0 { 0.5 } else { 0.25 };

        self.resolved_near = self
            .near
            .unwrap_or((distance_to_target * near_scale).clamp(NEAR_MIN, NEAR_MAX));
        self.resolved_far = self.far.unwrap_or(distance_to_target * 4.0);

        let proj = cgmath::perspective(self.fovy, self.aspect, self.resolved_near, self.resolved_far);
        let view = Matrix4::look_at_rh(self.position.eye, self.position.target, self.position.up);
        self.proj_view = proj * view;
        self.planes = extract_frustum_planes(&self.proj_view);
    }

    pub fn planes(&self) -> &FrustumPlanes {
        &self.planes
    }

    pub fn proj_view(&self) -> &Matrix4<f64> {
        &self.proj_view
    }

    pub fn direction(&self) -> Vector3<f64> {
        (self.position.target - self.position.eye).normalize()
    }

    pub fn fovy_radians(&self) -> f64 {
        cgmath::Rad::from(self.fovy).0
    }

    /// A copy of this camera with `viewport_height_px` scaled by `fraction`,
    /// used by progressive-resolution preload passes: a smaller viewport
    /// raises every tile's computed SSE, so traversal settles on coarser LOD
    /// without touching the SSE threshold itself.
    pub fn with_viewport_height_fraction(&self, fraction: f64) -> Camera {
        let mut scaled = self.clone();
        scaled.viewport_height_px = (self.viewport_height_px * fraction.clamp(0.0, 1.0)).max(1.0);
        scaled
    }
}

/// Per-frame motion tracking the scheduler's move-cull needs: speed in
/// world units per second, derived from eye displacement across frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct CameraMotion {
    pub speed: f64,
    pub is_moving: bool,
    pub time_since_stopped: f64,
}

impl CameraMotion {
    pub fn update(&mut self, previous_eye: Point3<f64>, current_eye: Point3<f64>, dt_seconds: f64) {
        if dt_seconds <= 0.0 {
            return;
        }
        let displacement = (current_eye - previous_eye).magnitude();
        self.speed = displacement / dt_seconds;
        let moving_now = self.speed > 1e-6;
        if moving_now {
            self.time_since_stopped = 0.0;
        } else if !self.is_moving {
            self.time_since_stopped += dt_seconds;
        } else {
            self.time_since_stopped = 0.0;
        }
        self.is_moving = moving_now;
    }
}

/// Height/horizon-driven SSE relaxation (dynamic SSE). `min_height` and
/// `max_height` describe the tileset's vertical extent (root
/// content-bounding-region, or an OBB/sphere approximation of it).
pub fn dynamic_sse_density(
    config: &TraversalConfig,
    camera: &Camera,
    camera_height: f64,
    min_height: f64,
    max_height: f64,
) -> f64 {
    if !config.dynamic_sse {
        return 0.0;
    }
    let falloff_point = min_height + config.dynamic_sse_height_falloff * (max_height - min_height);
    let span = (max_height - falloff_point).max(1e-9);
    let t = ((camera_height - falloff_point) / span).clamp(0.0, 1.0);

    let up = camera.position.up.normalize();
    let horizon_factor = (1.0 - camera.direction().dot(up).abs()) * (1.0 - t);

    config.dynamic_sse_density * horizon_factor
}

/// Applies dynamic SSE relaxation to a single tile's raw SSE value. `density`
/// comes from [`dynamic_sse_density`], computed once per frame and shared
/// across every tile visited that frame.
pub fn apply_dynamic_sse(raw_sse: f64, distance: f64, near_cutoff: f64, density: f64, max_factor: f64) -> f64 {
    if density <= 0.0 {
        return raw_sse;
    }
    let attenuation = (-density * (distance - near_cutoff).max(0.0)).exp();
    let reduced = raw_sse * attenuation;
    raw_sse - (raw_sse - reduced).min(max_factor)
}

/// Foveated SSE threshold relaxation: tiles outside the foveation cone get a
/// relaxed (higher) SSE threshold, interpolated between
/// `foveated_min_sse_relax` and `maximum_sse` by how far off-axis they are.
pub fn foveated_threshold(config: &TraversalConfig, maximum_sse: f64, foveated_factor: f64) -> f64 {
    if !config.foveated_sse {
        return maximum_sse;
    }
    let cone = config.foveated_cone_size.clamp(0.0, 1.0);
    if foveated_factor <= cone {
        return maximum_sse;
    }
    let t = ((foveated_factor - cone) / (1.0 - cone).max(1e-9)).clamp(0.0, 1.0);
    let eased = config.foveated_interpolation.interpolate(t);
    config.foveated_min_sse_relax + eased * (maximum_sse - config.foveated_min_sse_relax)
}

/// Angular offset of a world point from the camera's view axis, normalized
/// to `[0, 1]` where `0` is dead-center and `1` is at or beyond the edge of
/// the field of view. Feeds both `Priority::foveated_factor` and
/// `foveated_threshold`.
pub fn foveated_factor(camera: &Camera, world_point: Point3<f64>) -> f64 {
    let to_point = (world_point - camera.position.eye).normalize();
    let axis = camera.direction();
    let cos_angle = to_point.dot(axis).clamp(-1.0, 1.0);
    let angle = cos_angle.acos();
    let half_fovy = camera.fovy_radians() / 2.0;
    if half_fovy <= 0.0 {
        return 0.0;
    }
    (angle / half_fovy).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_camera() -> Camera {
        Camera::new(
            CameraPosition {
                eye: Point3::new(0.0, 0.0, 100.0),
                target: Point3::new(0.0, 0.0, 0.0),
                up: Vector3::unit_y(),
            },
            Deg(60.0),
            16.0 / 9.0,
            800.0,
        )
    }

    #[test]
    fn foveated_factor_is_zero_on_axis() {
        let camera = test_camera();
        let f = foveated_factor(&camera, Point3::new(0.0, 0.0, 0.0));
        assert!(f < 1e-6, "expected ~0, got {f}");
    }

    #[test]
    fn foveated_threshold_relaxes_off_axis() {
        let config = TraversalConfig::default();
        let on_axis = foveated_threshold(&config, 16.0, 0.0);
        let off_axis = foveated_threshold(&config, 16.0, 1.0);
        assert_eq!(on_axis, 16.0);
        assert!(off_axis >= on_axis);
    }

    #[test]
    fn dynamic_sse_reduces_distant_tiles() {
        let config = TraversalConfig::default();
        let reduced = apply_dynamic_sse(100.0, 10_000.0, 0.0, 2e-4, 24.0);
        assert!(reduced < 100.0);
        assert!(reduced >= 100.0 - 24.0);
        let _ = config;
    }

    #[test]
    fn motion_tracks_speed_and_stop_time() {
        let mut motion = CameraMotion::default();
        motion.update(Point3::new(0.0, 0.0, 0.0), Point3::new(10.0, 0.0, 0.0), 1.0);
        assert!(motion.is_moving);
        assert_eq!(motion.speed, 10.0);

        motion.update(Point3::new(10.0, 0.0, 0.0), Point3::new(10.0, 0.0, 0.0), 1.0);
        assert!(!motion.is_moving);
    }
}
