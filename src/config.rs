//! Recognized configuration, layered with the `config` crate: a
//! `tile3d.toml`/`tile3d.local.toml` file under `TILE3D__`-prefixed
//! environment variables, with `.env` picked up via `dotenvy` before either
//! is read.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where the root manifest comes from. Network fetch itself is an external
/// collaborator, so this only distinguishes *origin*: the two shapes the
/// core itself can act on without a transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ManifestSource {
    Url { url: String },
    /// Pre-fetched JSON, e.g. read from disk by the embedder or produced by
    /// a test fixture.
    Inline { json: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FoveationInterpolation {
    Linear,
    SmoothStep,
}

impl FoveationInterpolation {
    pub fn interpolate(&self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self {
            FoveationInterpolation::Linear => t,
            FoveationInterpolation::SmoothStep => t * t * (3.0 - 2.0 * t),
        }
    }
}

/// Screen-space-error, cache, and traversal thresholds. Threshold setters
/// are expected to go through `TraversalConfig::set_*` so the
/// `recompute_next_frame` flag gets set; the fields themselves stay plain so
/// serde can (de)serialize the whole struct directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalConfig {
    pub maximum_sse: f64,
    pub cull_with_children_bounds: bool,
    pub cull_requests_while_moving: bool,
    pub cull_requests_while_moving_multiplier: f64,
    pub preload_when_hidden: bool,
    pub preload_flight_destinations: bool,
    pub prefer_leaves: bool,

    pub dynamic_sse: bool,
    pub dynamic_sse_density: f64,
    pub dynamic_sse_factor: f64,
    pub dynamic_sse_height_falloff: f64,

    pub progressive_resolution_height_fraction: f64,

    pub foveated_sse: bool,
    pub foveated_cone_size: f64,
    pub foveated_min_sse_relax: f64,
    pub foveated_time_delay: f64,
    pub foveated_interpolation: FoveationInterpolation,

    pub skip_lod: bool,
    pub base_sse: f64,
    pub skip_sse_factor: f64,
    pub skip_levels: u32,
    pub immediately_load_desired_lod: bool,
    pub load_siblings: bool,

    /// Collaborator-reported flags folded into the single `is_skipping_lod`
    /// gate: true while a classification pass (picking, styling) is active,
    /// or while the embedder's content policy forbids mixing detail levels.
    pub classification_active: bool,
    pub mixed_content_allowed: bool,

    #[serde(skip)]
    pub recompute_next_frame: bool,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        TraversalConfig {
            maximum_sse: 16.0,
            cull_with_children_bounds: true,
            cull_requests_while_moving: true,
            cull_requests_while_moving_multiplier: 60.0,
            preload_when_hidden: false,
            preload_flight_destinations: true,
            prefer_leaves: false,

            dynamic_sse: true,
            dynamic_sse_density: 2e-4,
            dynamic_sse_factor: 24.0,
            dynamic_sse_height_falloff: 0.25,

            progressive_resolution_height_fraction: 0.3,

            foveated_sse: true,
            foveated_cone_size: 0.1,
            foveated_min_sse_relax: 0.0,
            foveated_time_delay: 0.2,
            foveated_interpolation: FoveationInterpolation::Linear,

            skip_lod: false,
            base_sse: 1024.0,
            skip_sse_factor: 16.0,
            skip_levels: 1,
            immediately_load_desired_lod: false,
            load_siblings: false,

            classification_active: false,
            mixed_content_allowed: true,

            recompute_next_frame: false,
        }
    }
}

impl TraversalConfig {
    /// The only way to observe skip-LOD eligibility: no corresponding
    /// setter exists, it is entirely derived.
    pub fn is_skipping_lod(&self, all_tiles_add_refine: bool) -> bool {
        self.skip_lod
            && !self.classification_active
            && self.mixed_content_allowed
            && !all_tiles_add_refine
    }

    pub fn set_maximum_sse(&mut self, value: f64) -> crate::errors::Result<()> {
        if value < 0.0 || !value.is_finite() {
            return Err(crate::errors::TileEngineError::Config(format!(
                "maximum_sse must be >= 0 and finite, got {value}"
            )));
        }
        self.maximum_sse = value;
        self.recompute_next_frame = true;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub cache_bytes: u64,
    pub maximum_cache_overflow_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        const MIB: u64 = 1024 * 1024;
        CacheConfig {
            cache_bytes: 512 * MIB,
            maximum_cache_overflow_bytes: 512 * MIB,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: Option<ManifestSource>,
    pub traversal: TraversalConfig,
    pub cache: CacheConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            source: None,
            traversal: TraversalConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("config build error: {0}")]
    Build(#[from] config::ConfigError),
}

/// Layers compiled-in defaults under `tile3d.toml`/`tile3d.local.toml` (if
/// present) under `TILE3D__`-prefixed environment variables.
pub fn load_config() -> Result<Config, LoadConfigError> {
    let _ = dotenvy::dotenv();

    let builder = config::Config::builder()
        .add_source(config::File::with_name("tile3d").required(false))
        .add_source(config::File::with_name("tile3d.local").required(false))
        .add_source(
            config::Environment::with_prefix("TILE3D")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

    let built = builder.build()?;
    log::info!("tile engine config loaded: {built:?}");
    let cfg: Config = built.try_deserialize().unwrap_or_default();
    Ok(cfg)
}
