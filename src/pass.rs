//! The pass dispatcher: each call to `Tileset::update` runs one or more
//! named passes, each choosing its own traversal strategy, optionally an
//! alternate camera/culling volume, and whether to suppress render hand-off.

use crate::dynamics::Camera;
use crate::traversal::Strategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pass {
    Render,
    Pick,
    Preload,
    PreloadFlight,
    MostDetailedPreload,
    MostDetailedPick,
    RequestRenderModeDeferCheck,
}

impl Pass {
    pub fn strategy(&self, skip_lod_enabled: bool) -> Strategy {
        match self {
            Pass::Render | Pass::RequestRenderModeDeferCheck => {
                if skip_lod_enabled {
                    Strategy::SkipLod
                } else {
                    Strategy::Base
                }
            }
            Pass::Preload | Pass::PreloadFlight => Strategy::Base,
            Pass::Pick | Pass::MostDetailedPreload | Pass::MostDetailedPick => Strategy::MostDetailed,
        }
    }

    /// True when this pass fetches and selects but must not hand tiles to
    /// the Renderer (preload/pick passes exist to warm the cache or answer
    /// a query, not to draw).
    pub fn ignore_commands(&self) -> bool {
        !matches!(self, Pass::Render)
    }

    /// True when hidden-tile preloading (`preload_when_hidden`) applies to
    /// this pass.
    pub fn is_preload(&self) -> bool {
        matches!(self, Pass::Preload | Pass::PreloadFlight | Pass::MostDetailedPreload)
    }
}

/// A pass's camera/culling override. `None` means "use the tileset's main
/// camera unchanged"; `Some` supplies an alternate, e.g. a narrow frustum
/// built around a picked pixel for `Pass::Pick`.
pub struct PassContext<'a> {
    pub pass: Pass,
    pub camera: &'a Camera,
}

impl<'a> PassContext<'a> {
    pub fn main(pass: Pass, camera: &'a Camera) -> Self {
        PassContext { pass, camera }
    }
}
