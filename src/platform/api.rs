//! Render Service Trait
//!
//! What the screen and display controllers need from the platform
//! compositor. A production embedding wires this to its real render
//! service; tests and the demo use [`SimulatedRenderService`].
//!
//! [`SimulatedRenderService`]: super::SimulatedRenderService
//!
//! # Threading
//! The connection callback may fire on any thread. Controllers never call
//! into the service while holding a lock the callback needs.

use std::sync::Arc;

use crate::core::buffer::BufferQueue;
use crate::core::errors::DmResult;
use crate::core::render::{DisplayNode, DisplayNodeConfig};
use crate::core::screen::types::{
    ScreenColorGamut, ScreenEvent, ScreenGamutMap, ScreenId, ScreenPowerStatus,
    VirtualScreenOption,
};

/// One mode as reported by the render service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RsScreenModeInfo {
    /// Index into the supported mode list; negative when unknown
    pub mode_id: i32,
    pub width: u32,
    pub height: u32,
    pub refresh_rate: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsScreenType {
    BuiltIn,
    External,
    Virtual,
    Undefined,
}

/// Connection callback installed by the screen controller.
pub type ScreenChangeCallback = Arc<dyn Fn(ScreenId, ScreenEvent) + Send + Sync>;

/// Platform render service interface.
pub trait RenderService: Send + Sync {
    /// `SCREEN_ID_INVALID` until a built-in screen exists.
    fn default_screen_id(&self) -> ScreenId;

    fn screen_supported_modes(&self, rs_id: ScreenId) -> Vec<RsScreenModeInfo>;

    fn screen_active_mode(&self, rs_id: ScreenId) -> RsScreenModeInfo;

    fn set_screen_active_mode(&self, rs_id: ScreenId, mode_id: u32);

    fn screen_type(&self, rs_id: ScreenId) -> DmResult<RsScreenType>;

    /// Returns the new rs id, or `SCREEN_ID_INVALID` on failure.
    fn create_virtual_screen(
        &self,
        option: &VirtualScreenOption,
        surface: Option<Arc<BufferQueue>>,
        mirror_id: ScreenId,
    ) -> ScreenId;

    fn remove_virtual_screen(&self, rs_id: ScreenId);

    fn set_virtual_screen_surface(
        &self,
        rs_id: ScreenId,
        surface: Option<Arc<BufferQueue>>,
    ) -> DmResult<()>;

    fn supported_color_gamuts(&self, rs_id: ScreenId) -> DmResult<Vec<ScreenColorGamut>>;

    fn color_gamut(&self, rs_id: ScreenId) -> DmResult<ScreenColorGamut>;

    fn set_color_gamut(&self, rs_id: ScreenId, index: i32) -> DmResult<()>;

    fn gamut_map(&self, rs_id: ScreenId) -> DmResult<ScreenGamutMap>;

    fn set_gamut_map(&self, rs_id: ScreenId, map: ScreenGamutMap) -> DmResult<()>;

    fn screen_power_status(&self, rs_id: ScreenId) -> ScreenPowerStatus;

    fn set_screen_power_status(&self, rs_id: ScreenId, status: ScreenPowerStatus);

    /// Install the connection callback. Fails while the service is not ready.
    fn set_screen_change_callback(&self, callback: ScreenChangeCallback) -> DmResult<()>;

    fn create_display_node(&self, config: DisplayNodeConfig) -> Option<Arc<DisplayNode>>;

    /// Publish staged node mutations.
    fn flush_transaction(&self);
}
