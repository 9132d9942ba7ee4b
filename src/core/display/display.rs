//! Logical displays layered over screens.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::screen::types::{
    DisplayId, Orientation, Rotation, ScreenId, ScreenMode, SCREEN_ID_INVALID,
};
use crate::core::screen::AbstractScreen;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum FreezeFlag {
    Freezing,
    #[default]
    Unfreezing,
}

/// What a display state listener is told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DisplayStateChangeType {
    Create,
    Destroy,
    SizeChange,
    UpdateRotation,
    VirtualPixelRatioChange,
    Freeze,
    Unfreeze,
    DisplayCompress,
}

/// Immutable snapshot of an [`AbstractDisplay`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayInfo {
    pub id: DisplayId,
    pub name: String,
    pub width: i32,
    pub height: i32,
    pub refresh_rate: u32,
    pub screen_id: ScreenId,
    pub screen_group_id: ScreenId,
    pub virtual_pixel_ratio: f32,
    pub offset_x: i32,
    pub offset_y: i32,
    pub rotation: Rotation,
    pub orientation: Orientation,
    pub freeze_flag: FreezeFlag,
    pub waterfall_compressed: bool,
}

/// Listener for display state changes. `group` holds every display that
/// shares the changed display's screen group, the changed one included.
pub trait DisplayStateChangeListener: Send + Sync {
    fn on_display_state_change(
        &self,
        default_display_id: DisplayId,
        info: DisplayInfo,
        group: BTreeMap<DisplayId, DisplayInfo>,
        change: DisplayStateChangeType,
    );
}

#[derive(Debug, Clone, PartialEq)]
pub struct AbstractDisplay {
    pub id: DisplayId,
    pub name: String,
    pub screen_id: ScreenId,
    pub screen_group_id: ScreenId,
    pub width: i32,
    pub height: i32,
    pub refresh_rate: u32,
    pub virtual_pixel_ratio: f32,
    pub offset_x: i32,
    pub offset_y: i32,
    pub rotation: Rotation,
    pub orientation: Orientation,
    pub freeze_flag: FreezeFlag,
    pub waterfall_compressed: bool,
}

impl AbstractDisplay {
    pub fn new(id: DisplayId, name: impl Into<String>, mode: ScreenMode, screen: &AbstractScreen) -> Self {
        let mut display = Self::unbound(id, name, mode);
        display.screen_id = screen.dms_id;
        display.screen_group_id = screen.group_dms_id;
        display.virtual_pixel_ratio = screen.virtual_pixel_ratio;
        display.orientation = screen.orientation;
        display.request_rotation(screen.rotation);
        display
    }

    /// A display not yet tied to any screen.
    pub fn unbound(id: DisplayId, name: impl Into<String>, mode: ScreenMode) -> Self {
        Self {
            id,
            name: name.into(),
            screen_id: SCREEN_ID_INVALID,
            screen_group_id: SCREEN_ID_INVALID,
            width: mode.width as i32,
            height: mode.height as i32,
            refresh_rate: mode.refresh_rate,
            virtual_pixel_ratio: 1.0,
            offset_x: 0,
            offset_y: 0,
            rotation: Rotation::Rotation0,
            orientation: Orientation::Unspecified,
            freeze_flag: FreezeFlag::Unfreezing,
            waterfall_compressed: false,
        }
    }

    /// Point this display at `screen` and take its active mode. Fails when
    /// the screen has none.
    pub fn bind_abstract_screen(&mut self, screen: &AbstractScreen) -> bool {
        let Some(mode) = screen.active_screen_mode() else {
            tracing::error!("screen {} has no active mode", screen.dms_id);
            return false;
        };
        self.width = mode.width as i32;
        self.height = mode.height as i32;
        self.refresh_rate = mode.refresh_rate;
        self.screen_id = screen.dms_id;
        self.screen_group_id = screen.group_dms_id;
        true
    }

    /// Returns whether the rotation changed.
    pub fn request_rotation(&mut self, rotation: Rotation) -> bool {
        if self.rotation == rotation {
            return false;
        }
        if rotation.is_vertical() != self.rotation.is_vertical() {
            std::mem::swap(&mut self.width, &mut self.height);
        }
        self.rotation = rotation;
        true
    }

    pub fn set_offset(&mut self, x: i32, y: i32) {
        self.offset_x = x;
        self.offset_y = y;
    }

    pub fn convert_to_display_info(&self) -> DisplayInfo {
        DisplayInfo {
            id: self.id,
            name: self.name.clone(),
            width: self.width,
            height: self.height,
            refresh_rate: self.refresh_rate,
            screen_id: self.screen_id,
            screen_group_id: self.screen_group_id,
            virtual_pixel_ratio: self.virtual_pixel_ratio,
            offset_x: self.offset_x,
            offset_y: self.offset_y,
            rotation: self.rotation,
            orientation: self.orientation,
            freeze_flag: self.freeze_flag,
            waterfall_compressed: self.waterfall_compressed,
        }
    }
}
