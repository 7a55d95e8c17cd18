mod cache;
mod config;
mod dynamics;
mod errors;
mod external;
mod helpers;
mod hooks;
mod implicit;
mod manifest;
mod pass;
mod scheduler;
mod tile;
mod tileset;
mod traversal;
mod volumes;

#[cfg(test)]
mod tests;

pub use config::{
    CacheConfig, Config, FoveationInterpolation, LoadConfigError, ManifestSource, TraversalConfig,
    load_config,
};
pub use helpers::{default_worker_count, init_profiling, FrameClock, Tick};
pub use helpers::channel::{Receiver as ChannelReceiver, Sender as ChannelSender};
pub use dynamics::{Camera, CameraMotion, CameraPosition};
pub use errors::{Result, TileContext, TileEngineError};
pub use external::{
    ChannelTransport, Clock, ContentLoader, DecodedPayload, FetchHandle, FetchOutcome, Renderer,
    SelectedTile, SystemClock, Transport,
};
pub use hooks::{HookEvent, Hooks};
pub use implicit::{ImplicitCoordinate, ImplicitTemplate, SubdivisionScheme, SubtreeAvailability};
pub use pass::{Pass, PassContext};
pub use tile::{Content, ContentKind, Priority, Refine, Tile, TileArena, TileId, TileState};
pub use tileset::{PassStatistics, Tileset};
pub use volumes::{AxisAlignedBox, BoundingVolume, FrustumPlanes, OrientedBox, Plane, PlaneSide, Ray, Region};
