//! Plain value types shared by the screen and display controllers.

use serde::{Deserialize, Serialize};

use crate::util::geometry::Point;

pub type ScreenId = u64;
pub type DisplayId = u64;
pub type NodeId = u64;

pub const SCREEN_ID_INVALID: ScreenId = u64::MAX;
pub const DISPLAY_ID_INVALID: DisplayId = u64::MAX;

/// Name prefix for physical screens; the dms id is appended.
pub const DEFAULT_SCREEN_NAME: &str = "Screen";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    Rotation0 = 0,
    Rotation90 = 1,
    Rotation180 = 2,
    Rotation270 = 3,
}

impl Rotation {
    /// 0 and 180 keep the panel's native aspect.
    pub fn is_vertical(self) -> bool {
        matches!(self, Rotation::Rotation0 | Rotation::Rotation180)
    }

    pub fn is_horizontal(self) -> bool {
        !self.is_vertical()
    }

    pub fn degrees(self) -> f32 {
        90.0 * self as u32 as f32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    #[default]
    Unspecified,
    Vertical,
    Horizontal,
    ReverseVertical,
    ReverseHorizontal,
    Sensor,
    SensorVertical,
    SensorHorizontal,
    AutoRotationRestricted,
    AutoRotationPortraitRestricted,
    AutoRotationLandscapeRestricted,
    Locked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ScreenType {
    #[default]
    Undefined,
    Real,
    Virtual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScreenCombination {
    Alone,
    Mirror,
    Expand,
}

/// One supported resolution of a screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ScreenMode {
    pub width: u32,
    pub height: u32,
    pub refresh_rate: u32,
}

impl ScreenMode {
    pub const fn new(width: u32, height: u32, refresh_rate: u32) -> Self {
        Self { width, height, refresh_rate }
    }
}

/// Snapshot of a screen handed to listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenInfo {
    pub id: ScreenId,
    pub name: String,
    pub virtual_width: u32,
    pub virtual_height: u32,
    pub virtual_pixel_ratio: f32,
    pub last_parent: ScreenId,
    pub parent: ScreenId,
    pub is_screen_group: bool,
    pub rotation: Rotation,
    pub orientation: Orientation,
    pub screen_type: ScreenType,
    pub mode_id: i32,
    pub modes: Vec<ScreenMode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScreenGroupInfo {
    pub screen: ScreenInfo,
    pub combination: ScreenCombination,
    pub children: Vec<ScreenId>,
    pub position: Vec<Point>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScreenChangeEvent {
    UpdateOrientation,
    UpdateRotation,
    ChangeMode,
    VirtualPixelRatioChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScreenGroupChangeEvent {
    AddToGroup,
    RemoveFromGroup,
    ChangeGroup,
}

/// Connection events raised by the render service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScreenEvent {
    Connected,
    Disconnected,
    Unknown,
}

/// Change kinds the screen controller forwards to the display layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisplayChangeEvent {
    UpdateOrientation,
    UpdateRotation,
    DisplaySizeChanged,
    DisplayFreezed,
    DisplayUnfreezed,
    DisplayVirtualPixelRatioChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScreenPowerState {
    PowerOn,
    PowerStandBy,
    PowerSuspend,
    PowerOff,
    PowerButt,
    InvalidState,
}

/// Power status as the render service understands it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScreenPowerStatus {
    On,
    StandBy,
    Suspend,
    Off,
    Butt,
}

impl From<ScreenPowerStatus> for ScreenPowerState {
    fn from(status: ScreenPowerStatus) -> Self {
        match status {
            ScreenPowerStatus::On => ScreenPowerState::PowerOn,
            ScreenPowerStatus::StandBy => ScreenPowerState::PowerStandBy,
            ScreenPowerStatus::Suspend => ScreenPowerState::PowerSuspend,
            ScreenPowerStatus::Off => ScreenPowerState::PowerOff,
            ScreenPowerStatus::Butt => ScreenPowerState::PowerButt,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerStateChangeReason {
    PowerButton,
    Application,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisplayPowerEvent {
    WakeUp,
    Sleep,
    DisplayOn,
    DisplayOff,
    DesktopReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventStatus {
    Begin,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScreenColorGamut {
    Native = 0,
    Bt601 = 1,
    Bt709 = 2,
    DciP3 = 3,
    Srgb = 4,
    AdobeRgb = 5,
    DisplayP3 = 6,
    Bt2020 = 7,
    Bt2100Pq = 8,
    Bt2100Hlg = 9,
    DisplayBt2020 = 10,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScreenGamutMap {
    Constant = 0,
    Extension = 1,
    HdrConstant = 2,
    HdrExtension = 3,
}

/// Arguments of `create_virtual_screen`.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualScreenOption {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub density: f32,
    pub flags: i32,
}
