//! Platform Integration Module
//!
//! The core talks to the platform compositor only through
//! [`RenderService`]. `SimulatedRenderService` keeps everything in memory.

pub mod api;
pub mod simulated;

pub use api::{RenderService, RsScreenModeInfo, RsScreenType, ScreenChangeCallback};
pub use simulated::SimulatedRenderService;
