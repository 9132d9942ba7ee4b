//! Render-tree handles owned by screens.

pub mod node;

pub use node::{DisplayNode, DisplayNodeConfig, SurfaceNode};
