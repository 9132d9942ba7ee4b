//! In-memory render service.
//!
//! Screens, modes, gamuts and power state live in a map; connection events
//! are raised by the test or demo through [`SimulatedRenderService::connect`]
//! and [`SimulatedRenderService::disconnect`].

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::api::{RenderService, RsScreenModeInfo, RsScreenType, ScreenChangeCallback};
use crate::core::buffer::BufferQueue;
use crate::core::errors::{DmError, DmResult};
use crate::core::render::{DisplayNode, DisplayNodeConfig};
use crate::core::screen::types::{
    ScreenColorGamut, ScreenEvent, ScreenGamutMap, ScreenId, ScreenMode, ScreenPowerStatus,
    VirtualScreenOption, SCREEN_ID_INVALID,
};

/// First rs id handed to virtual screens.
const VIRTUAL_SCREEN_ID_BASE: ScreenId = 1000;

struct SimScreen {
    kind: RsScreenType,
    modes: Vec<ScreenMode>,
    active_mode: i32,
    power: ScreenPowerStatus,
    gamuts: Vec<ScreenColorGamut>,
    gamut_index: usize,
    gamut_map: ScreenGamutMap,
    surface: Option<Arc<BufferQueue>>,
}

impl SimScreen {
    fn new(kind: RsScreenType, modes: Vec<ScreenMode>, active_mode: i32) -> Self {
        Self {
            kind,
            modes,
            active_mode,
            power: ScreenPowerStatus::On,
            gamuts: vec![ScreenColorGamut::Native, ScreenColorGamut::Srgb, ScreenColorGamut::DisplayP3],
            gamut_index: 0,
            gamut_map: ScreenGamutMap::Constant,
            surface: None,
        }
    }
}

struct SimState {
    screens: BTreeMap<ScreenId, SimScreen>,
    default_screen: ScreenId,
    next_virtual_id: ScreenId,
    next_node_id: u64,
    callback: Option<ScreenChangeCallback>,
    refuse_callbacks: u32,
    flushes: u64,
    virtual_screen_failure: bool,
}

pub struct SimulatedRenderService {
    state: Mutex<SimState>,
}

impl Default for SimulatedRenderService {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedRenderService {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                screens: BTreeMap::new(),
                default_screen: SCREEN_ID_INVALID,
                next_virtual_id: VIRTUAL_SCREEN_ID_BASE,
                next_node_id: 1,
                callback: None,
                refuse_callbacks: 0,
                flushes: 0,
                virtual_screen_failure: false,
            }),
        }
    }

    /// Register a physical screen without raising an event. The first
    /// built-in screen becomes the default screen.
    pub fn add_screen(&self, rs_id: ScreenId, kind: RsScreenType, modes: Vec<ScreenMode>, active_mode: i32) {
        let mut state = self.state.lock();
        if kind == RsScreenType::BuiltIn && state.default_screen == SCREEN_ID_INVALID {
            state.default_screen = rs_id;
        }
        state.screens.insert(rs_id, SimScreen::new(kind, modes, active_mode));
    }

    /// Register a screen and raise `Connected` through the installed callback.
    pub fn connect(&self, rs_id: ScreenId, kind: RsScreenType, modes: Vec<ScreenMode>, active_mode: i32) {
        self.add_screen(rs_id, kind, modes, active_mode);
        self.emit(rs_id, ScreenEvent::Connected);
    }

    pub fn disconnect(&self, rs_id: ScreenId) {
        {
            let mut state = self.state.lock();
            state.screens.remove(&rs_id);
            if state.default_screen == rs_id {
                state.default_screen = SCREEN_ID_INVALID;
            }
        }
        self.emit(rs_id, ScreenEvent::Disconnected);
    }

    fn emit(&self, rs_id: ScreenId, event: ScreenEvent) {
        let callback = self.state.lock().callback.clone();
        match callback {
            Some(callback) => callback(rs_id, event),
            None => debug!("no screen change callback, dropping {:?} for {}", event, rs_id),
        }
    }

    pub fn set_default_screen_id(&self, rs_id: ScreenId) {
        self.state.lock().default_screen = rs_id;
    }

    /// Make the next `count` callback registrations fail.
    pub fn refuse_callback_registrations(&self, count: u32) {
        self.state.lock().refuse_callbacks = count;
    }

    pub fn has_callback(&self) -> bool {
        self.state.lock().callback.is_some()
    }

    pub fn set_virtual_screen_failure(&self, fail: bool) {
        self.state.lock().virtual_screen_failure = fail;
    }

    pub fn set_supported_color_gamuts(&self, rs_id: ScreenId, gamuts: Vec<ScreenColorGamut>) {
        if let Some(screen) = self.state.lock().screens.get_mut(&rs_id) {
            screen.gamuts = gamuts;
            screen.gamut_index = 0;
        }
    }

    pub fn has_screen(&self, rs_id: ScreenId) -> bool {
        self.state.lock().screens.contains_key(&rs_id)
    }

    pub fn virtual_screen_surface(&self, rs_id: ScreenId) -> Option<Arc<BufferQueue>> {
        self.state.lock().screens.get(&rs_id).and_then(|screen| screen.surface.clone())
    }

    pub fn flush_count(&self) -> u64 {
        self.state.lock().flushes
    }

    fn with_screen<T>(&self, rs_id: ScreenId, f: impl FnOnce(&mut SimScreen) -> T) -> DmResult<T> {
        let mut state = self.state.lock();
        state
            .screens
            .get_mut(&rs_id)
            .map(f)
            .ok_or_else(|| DmError::render_service_failed(format!("no rs screen {rs_id}")))
    }
}

impl RenderService for SimulatedRenderService {
    fn default_screen_id(&self) -> ScreenId {
        self.state.lock().default_screen
    }

    fn screen_supported_modes(&self, rs_id: ScreenId) -> Vec<RsScreenModeInfo> {
        self.with_screen(rs_id, |screen| {
            screen
                .modes
                .iter()
                .enumerate()
                .map(|(idx, mode)| RsScreenModeInfo {
                    mode_id: idx as i32,
                    width: mode.width,
                    height: mode.height,
                    refresh_rate: mode.refresh_rate,
                })
                .collect()
        })
        .unwrap_or_default()
    }

    fn screen_active_mode(&self, rs_id: ScreenId) -> RsScreenModeInfo {
        self.with_screen(rs_id, |screen| {
            let mode = usize::try_from(screen.active_mode)
                .ok()
                .and_then(|idx| screen.modes.get(idx))
                .copied()
                .unwrap_or_default();
            RsScreenModeInfo {
                mode_id: screen.active_mode,
                width: mode.width,
                height: mode.height,
                refresh_rate: mode.refresh_rate,
            }
        })
        .unwrap_or(RsScreenModeInfo { mode_id: -1, ..Default::default() })
    }

    fn set_screen_active_mode(&self, rs_id: ScreenId, mode_id: u32) {
        if let Err(err) = self.with_screen(rs_id, |screen| screen.active_mode = mode_id as i32) {
            warn!("set_screen_active_mode: {}", err);
        }
    }

    fn screen_type(&self, rs_id: ScreenId) -> DmResult<RsScreenType> {
        self.with_screen(rs_id, |screen| screen.kind)
    }

    fn create_virtual_screen(
        &self,
        option: &VirtualScreenOption,
        surface: Option<Arc<BufferQueue>>,
        _mirror_id: ScreenId,
    ) -> ScreenId {
        let mut state = self.state.lock();
        if state.virtual_screen_failure {
            return SCREEN_ID_INVALID;
        }
        let rs_id = state.next_virtual_id;
        state.next_virtual_id += 1;
        let mut screen = SimScreen::new(
            RsScreenType::Virtual,
            vec![ScreenMode::new(option.width, option.height, 60)],
            0,
        );
        screen.surface = surface;
        state.screens.insert(rs_id, screen);
        debug!("virtual screen {} ({}) created", rs_id, option.name);
        rs_id
    }

    fn remove_virtual_screen(&self, rs_id: ScreenId) {
        self.state.lock().screens.remove(&rs_id);
    }

    fn set_virtual_screen_surface(
        &self,
        rs_id: ScreenId,
        surface: Option<Arc<BufferQueue>>,
    ) -> DmResult<()> {
        self.with_screen(rs_id, |screen| {
            if screen.kind != RsScreenType::Virtual {
                return Err(DmError::render_service_failed(format!("rs screen {rs_id} is not virtual")));
            }
            screen.surface = surface;
            Ok(())
        })?
    }

    fn supported_color_gamuts(&self, rs_id: ScreenId) -> DmResult<Vec<ScreenColorGamut>> {
        self.with_screen(rs_id, |screen| screen.gamuts.clone())
    }

    fn color_gamut(&self, rs_id: ScreenId) -> DmResult<ScreenColorGamut> {
        self.with_screen(rs_id, |screen| screen.gamuts.get(screen.gamut_index).copied())?
            .ok_or_else(|| DmError::render_service_failed(format!("rs screen {rs_id} has no gamut")))
    }

    fn set_color_gamut(&self, rs_id: ScreenId, index: i32) -> DmResult<()> {
        self.with_screen(rs_id, |screen| match usize::try_from(index) {
            Ok(idx) if idx < screen.gamuts.len() => {
                screen.gamut_index = idx;
                Ok(())
            }
            _ => Err(DmError::render_service_failed(format!("gamut index {index}"))),
        })?
    }

    fn gamut_map(&self, rs_id: ScreenId) -> DmResult<ScreenGamutMap> {
        self.with_screen(rs_id, |screen| screen.gamut_map)
    }

    fn set_gamut_map(&self, rs_id: ScreenId, map: ScreenGamutMap) -> DmResult<()> {
        self.with_screen(rs_id, |screen| screen.gamut_map = map)
    }

    fn screen_power_status(&self, rs_id: ScreenId) -> ScreenPowerStatus {
        self.with_screen(rs_id, |screen| screen.power).unwrap_or(ScreenPowerStatus::Butt)
    }

    fn set_screen_power_status(&self, rs_id: ScreenId, status: ScreenPowerStatus) {
        if let Err(err) = self.with_screen(rs_id, |screen| screen.power = status) {
            warn!("set_screen_power_status: {}", err);
        }
    }

    fn set_screen_change_callback(&self, callback: ScreenChangeCallback) -> DmResult<()> {
        let mut state = self.state.lock();
        if state.refuse_callbacks > 0 {
            state.refuse_callbacks -= 1;
            return Err(DmError::render_service_failed("render service not ready"));
        }
        state.callback = Some(callback);
        Ok(())
    }

    fn create_display_node(&self, config: DisplayNodeConfig) -> Option<Arc<DisplayNode>> {
        let mut state = self.state.lock();
        let id = state.next_node_id;
        state.next_node_id += 1;
        Some(Arc::new(DisplayNode::new(id, config)))
    }

    fn flush_transaction(&self) {
        self.state.lock().flushes += 1;
    }
}
