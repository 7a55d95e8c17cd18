pub mod coord_utils;
pub use coord_utils::*;

pub mod hash;
pub use hash::*;

pub mod platform;
pub use platform::*;

pub mod logging;
pub use logging::*;

pub mod frame_clock;
pub use frame_clock::*;

pub mod channel;
