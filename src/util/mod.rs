pub mod geometry;
pub mod logging;

pub use geometry::{FrameF, Point, Rect};
