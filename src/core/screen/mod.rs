//! Screen Management
//!
//! Physical and virtual screens, screen groups and the controller that keeps
//! them in step with the render service.

pub mod controller;
pub mod group;
pub mod id_manager;
pub mod screen;
pub mod types;

pub use controller::{
    AbstractScreenCallback, AbstractScreenController, AgentId, OrientationSwitchHook,
    RsScreenChangeListener,
};
pub use group::ScreenGroup;
pub use id_manager::ScreenIdManager;
pub use screen::{AbstractScreen, ScreenKind, SharedScreen};
pub use types::*;
