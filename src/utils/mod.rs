//! Utility helpers: generational arena, step tracing, profiling and transform math.

pub mod allocator;
pub mod logging;
pub mod math;
pub mod profiling;

pub use allocator::{Arena, EntityId, GenerationalId};
pub use math::*;
