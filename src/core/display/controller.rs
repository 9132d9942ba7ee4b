//! Abstract Display Controller
//!
//! Keeps one logical display per alone screen and per expand member, and
//! turns screen-level changes into display notifications.
//!
//! Public entry points resolve everything they need from the screen
//! controller before taking the display lock. Screen callbacks arrive with
//! the screen controller lock already held, so they may call it freely.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::ReentrantMutex;
use tracing::{debug, error, info, warn};

use super::display::{
    AbstractDisplay, DisplayInfo, DisplayStateChangeListener, DisplayStateChangeType, FreezeFlag,
};
use crate::core::context::CoreContext;
use crate::core::screen::types::{
    DisplayChangeEvent, DisplayId, ScreenCombination, ScreenId, ScreenMode, ScreenType,
    DISPLAY_ID_INVALID, SCREEN_ID_INVALID,
};
use crate::core::screen::{AbstractScreenCallback, AbstractScreenController, SharedScreen};
use crate::util::logging::DISPLAY;

#[derive(Default)]
struct DisplayRegistry {
    displays: BTreeMap<DisplayId, AbstractDisplay>,
    display_count: DisplayId,
    dummy: Option<DisplayId>,
    listener: Option<Arc<dyn DisplayStateChangeListener>>,
}

impl DisplayRegistry {
    fn next_display_id(&mut self) -> DisplayId {
        let id = self.display_count;
        self.display_count += 1;
        id
    }

    fn display_id_by_screen(&self, screen_id: ScreenId) -> Option<DisplayId> {
        self.displays
            .values()
            .find(|display| display.screen_id == screen_id)
            .map(|display| display.id)
    }
}

pub struct AbstractDisplayController {
    ctx: Arc<CoreContext>,
    screens: Arc<AbstractScreenController>,
    state: ReentrantMutex<RefCell<DisplayRegistry>>,
    weak_self: Weak<Self>,
}

/// Forwards screen callbacks without keeping the display controller alive.
struct ScreenCallbackAdapter(Weak<AbstractDisplayController>);

impl AbstractScreenCallback for ScreenCallbackAdapter {
    fn on_connect(&self, screen: &SharedScreen) {
        if let Some(controller) = self.0.upgrade() {
            controller.on_abstract_screen_connect(screen);
        }
    }

    fn on_disconnect(&self, screen: &SharedScreen) {
        if let Some(controller) = self.0.upgrade() {
            controller.on_abstract_screen_disconnect(screen);
        }
    }

    fn on_change(&self, screen: &SharedScreen, event: DisplayChangeEvent) {
        if let Some(controller) = self.0.upgrade() {
            controller.on_abstract_screen_change(screen, event);
        }
    }
}

impl AbstractDisplayController {
    pub fn new(ctx: Arc<CoreContext>, screens: Arc<AbstractScreenController>) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            ctx,
            screens,
            state: ReentrantMutex::new(RefCell::new(DisplayRegistry::default())),
            weak_self: weak_self.clone(),
        })
    }

    /// Start following the screen controller. Screens that are already
    /// connected are replayed.
    pub fn init(&self) {
        crate::dlog!(DISPLAY, "display controller following screen changes");
        self.screens
            .register_abstract_screen_callback(Arc::new(ScreenCallbackAdapter(self.weak_self.clone())));
    }

    fn with_registry<R>(&self, f: impl FnOnce(&mut DisplayRegistry) -> R) -> R {
        let guard = self.state.lock();
        let mut registry = guard.borrow_mut();
        f(&mut registry)
    }

    pub fn register_display_state_change_listener(&self, listener: Arc<dyn DisplayStateChangeListener>) {
        self.with_registry(|r| r.listener = Some(listener));
    }

    /// A display that stands in until the default screen connects.
    pub fn create_dummy_display(&self, mode: ScreenMode) -> DisplayId {
        self.with_registry(|r| {
            let id = r.next_display_id();
            r.displays.insert(id, AbstractDisplay::unbound(id, format!("display_{id}"), mode));
            r.dummy = Some(id);
            info!("dummy display {} created ({}x{})", id, mode.width, mode.height);
            id
        })
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get_abstract_display(&self, display_id: DisplayId) -> Option<AbstractDisplay> {
        self.with_registry(|r| r.displays.get(&display_id).cloned())
    }

    pub fn get_abstract_display_by_screen(&self, screen_id: ScreenId) -> Option<AbstractDisplay> {
        self.with_registry(|r| {
            r.display_id_by_screen(screen_id)
                .and_then(|id| r.displays.get(&id).cloned())
        })
    }

    pub fn get_all_display_ids(&self) -> Vec<DisplayId> {
        self.with_registry(|r| r.displays.keys().copied().collect())
    }

    pub fn get_default_display_id(&self) -> DisplayId {
        let screen_id = self.screens.get_default_abstract_screen_id();
        if screen_id == SCREEN_ID_INVALID {
            return DISPLAY_ID_INVALID;
        }
        self.with_registry(|r| r.display_id_by_screen(screen_id))
            .unwrap_or(DISPLAY_ID_INVALID)
    }

    pub fn get_all_display_info_of_group(&self, info: &DisplayInfo) -> BTreeMap<DisplayId, DisplayInfo> {
        self.with_registry(|r| {
            r.displays
                .values()
                .filter(|display| display.screen_group_id == info.screen_group_id)
                .map(|display| (display.id, display.convert_to_display_info()))
                .collect()
        })
    }

    // ========================================================================
    // Freeze
    // ========================================================================

    /// Requests already in the wanted state are skipped; the rest still go
    /// through.
    pub fn set_freeze(&self, display_ids: &[DisplayId], freeze: bool) {
        let default_display_id = self.get_default_display_id();
        let (flag, change, event) = if freeze {
            (FreezeFlag::Freezing, DisplayStateChangeType::Freeze, DisplayChangeEvent::DisplayFreezed)
        } else {
            (FreezeFlag::Unfreezing, DisplayStateChangeType::Unfreeze, DisplayChangeEvent::DisplayUnfreezed)
        };
        let _guard = self.state.lock();
        for display_id in display_ids {
            let updated = self.with_registry(|r| match r.displays.get_mut(display_id) {
                None => {
                    error!("display {} not found", display_id);
                    false
                }
                Some(display) if display.freeze_flag == flag => {
                    warn!("display {} is already {:?}", display_id, flag);
                    false
                }
                Some(display) => {
                    display.freeze_flag = flag;
                    true
                }
            });
            if updated {
                self.notify_state_change(default_display_id, *display_id, change);
                self.notify_agent_change(*display_id, event);
            }
        }
    }

    // ========================================================================
    // Screen callbacks
    // ========================================================================

    fn on_abstract_screen_connect(&self, screen: &SharedScreen) {
        let (screen_id, group_id) = {
            let screen = screen.read();
            (screen.dms_id, screen.group_dms_id)
        };
        info!("connect new screen. id:{}", screen_id);
        let _guard = self.state.lock();
        let Some(group) = self.screens.get_abstract_screen_group(group_id) else {
            error!("the group information of the screen {} is wrong", screen_id);
            return;
        };
        let (combination, child_count) = {
            let group = group.read();
            match group.group() {
                Some(g) => (g.combination, g.child_count()),
                None => return,
            }
        };
        if combination == ScreenCombination::Alone || child_count == 1 {
            self.bind_alone_screen(screen);
        } else if combination == ScreenCombination::Mirror {
            info!("screen {} mirrors its group, no display of its own", screen_id);
        } else {
            self.add_screen_to_expand(screen);
        }
    }

    fn bind_alone_screen(&self, screen: &SharedScreen) {
        let default_screen_id = self.screens.get_default_abstract_screen_id();
        let (screen_id, mode) = {
            let screen = screen.read();
            (screen.dms_id, screen.active_screen_mode())
        };
        if default_screen_id == SCREEN_ID_INVALID || default_screen_id != screen_id {
            error!("the first real screen should be default, screen {} default {}", screen_id, default_screen_id);
            return;
        }
        let Some(mode) = mode else {
            error!("bind alone screen error, cannot get info.");
            return;
        };
        if self.with_registry(|r| r.display_id_by_screen(screen_id)).is_some() {
            debug!("screen {} already has a display", screen_id);
            return;
        }
        let dummy = self.with_registry(|r| r.dummy.take());
        match dummy {
            None => {
                let display_id = self.with_registry(|r| {
                    let id = r.next_display_id();
                    let display = AbstractDisplay::new(id, format!("display_{id}"), mode, &screen.read());
                    r.displays.insert(id, display);
                    id
                });
                info!("create display {} for screen {}", display_id, screen_id);
                self.notify_agent_create(display_id);
                self.notify_state_change_default(display_id, DisplayStateChangeType::Create);
            }
            Some(dummy_id) => {
                info!("bind dummy display {} to screen {}", dummy_id, screen_id);
                let same_size = self.with_registry(|r| {
                    let display = r.displays.get_mut(&dummy_id)?;
                    let same_size = display.width == mode.width as i32 && display.height == mode.height as i32;
                    display.bind_abstract_screen(&screen.read());
                    display.virtual_pixel_ratio = screen.read().virtual_pixel_ratio;
                    Some(same_size)
                });
                match same_size {
                    Some(true) => self.notify_agent_create(dummy_id),
                    Some(false) => {
                        self.notify_state_change_default(dummy_id, DisplayStateChangeType::SizeChange);
                        self.notify_agent_change(dummy_id, DisplayChangeEvent::DisplaySizeChanged);
                    }
                    None => error!("dummy display {} vanished", dummy_id),
                }
            }
        }
    }

    fn add_screen_to_expand(&self, screen: &SharedScreen) {
        let (screen_id, group_id, screen_type, own_mode) = {
            let screen = screen.read();
            (screen.dms_id, screen.group_dms_id, screen.screen_type, screen.active_screen_mode())
        };
        if self.with_registry(|r| r.display_id_by_screen(screen_id)).is_some() {
            error!("screen {} already has corresponding display", screen_id);
            return;
        }
        info!("bind display for new screen. screen:{}", screen_id);
        let mode = if screen_type == ScreenType::Virtual {
            info!("screen type is virtual, use default screen info");
            self.screens
                .get_abstract_screen(self.screens.get_default_abstract_screen_id())
                .and_then(|default| default.read().active_screen_mode())
        } else {
            own_mode
        };
        let Some(mode) = mode else {
            error!("no mode for expand screen {}", screen_id);
            return;
        };
        let point = self
            .screens
            .get_abstract_screen_group(group_id)
            .map(|group| group.read().group().map(|g| g.child_position(screen_id)).unwrap_or_default())
            .unwrap_or_default();
        let display_id = self.with_registry(|r| {
            let id = r.next_display_id();
            let mut display = AbstractDisplay::new(id, format!("display_{id}"), mode, &screen.read());
            display.set_offset(point.x, point.y);
            r.displays.insert(id, display);
            id
        });
        info!("expand display {} at ({}, {})", display_id, point.x, point.y);
        self.notify_agent_create(display_id);
        self.notify_state_change_default(display_id, DisplayStateChangeType::Create);
    }

    fn on_abstract_screen_disconnect(&self, screen: &SharedScreen) {
        let (screen_id, group_id) = {
            let screen = screen.read();
            (screen.dms_id, screen.group_dms_id)
        };
        info!("disconnect screen. id:{}", screen_id);
        let _guard = self.state.lock();
        let Some(group) = self.screens.get_abstract_screen_group(group_id) else {
            error!("the group information of the screen {} is wrong", screen_id);
            return;
        };
        let (combination, child_count) = {
            let group = group.read();
            match group.group() {
                Some(g) => (g.combination, g.child_count()),
                None => return,
            }
        };
        match combination {
            ScreenCombination::Alone | ScreenCombination::Mirror => {
                let Some(display_id) = self.process_normal_screen_disconnected(screen_id) else {
                    debug!("screen {} had no display", screen_id);
                    return;
                };
                if child_count == 0 {
                    self.with_registry(|r| r.displays.remove(&display_id));
                    self.notify_agent_destroy(display_id);
                }
            }
            ScreenCombination::Expand => {
                let Some(display_id) = self.process_expand_screen_disconnected(screen_id) else {
                    error!("the displayId of the disconnected expand screen was not found");
                    return;
                };
                self.notify_state_change_default(display_id, DisplayStateChangeType::Destroy);
                self.notify_agent_destroy(display_id);
                self.with_registry(|r| r.displays.remove(&display_id));
            }
        }
    }

    /// Rebind the screen's display to the default screen.
    fn process_normal_screen_disconnected(&self, screen_id: ScreenId) -> Option<DisplayId> {
        let display_id = self.with_registry(|r| r.display_id_by_screen(screen_id))?;
        info!("normal screen disconnect, displayId: {}, screenId: {}", display_id, screen_id);
        let default_screen = self
            .screens
            .get_abstract_screen(self.screens.get_default_abstract_screen_id());
        let bound = default_screen.is_some_and(|default| {
            self.with_registry(|r| {
                r.displays
                    .get_mut(&display_id)
                    .is_some_and(|display| display.bind_abstract_screen(&default.read()))
            })
        });
        if !bound {
            warn!("failed to bind display {} to the default screen", display_id);
        }
        Some(display_id)
    }

    /// Every other display goes back to the origin.
    fn process_expand_screen_disconnected(&self, screen_id: ScreenId) -> Option<DisplayId> {
        let (target, others) = self.with_registry(|r| {
            let mut target = None;
            let mut others = Vec::new();
            for display in r.displays.values_mut() {
                if display.screen_id == screen_id {
                    target = Some(display.id);
                } else {
                    display.set_offset(0, 0);
                    others.push(display.screen_id);
                }
            }
            (target, others)
        });
        for other in others {
            if let Some(node) = self.screens.get_rs_display_node_by_screen_id(other) {
                node.set_display_offset(0, 0);
            }
        }
        target
    }

    fn on_abstract_screen_change(&self, screen: &SharedScreen, event: DisplayChangeEvent) {
        let _guard = self.state.lock();
        match event {
            DisplayChangeEvent::UpdateOrientation => self.process_display_update_orientation(screen),
            DisplayChangeEvent::UpdateRotation => self.process_display_rotation_change(screen),
            DisplayChangeEvent::DisplaySizeChanged => self.process_display_size_change(screen),
            DisplayChangeEvent::DisplayVirtualPixelRatioChanged => {
                self.process_virtual_pixel_ratio_change(screen)
            }
            other => warn!("unknown screen change event {:?}", other),
        }
    }

    fn process_display_update_orientation(&self, screen: &SharedScreen) {
        let (screen_id, orientation, rotation) = {
            let screen = screen.read();
            (screen.dms_id, screen.orientation, screen.rotation)
        };
        let rotated = self.with_registry(|r| {
            let id = r.display_id_by_screen(screen_id)?;
            let display = r.displays.get_mut(&id)?;
            display.orientation = orientation;
            Some((id, display.request_rotation(rotation)))
        });
        let Some((display_id, rotated)) = rotated else {
            error!("fail to find display of screen {}", screen_id);
            return;
        };
        if rotated {
            self.notify_state_change_default(display_id, DisplayStateChangeType::UpdateRotation);
            self.process_display_compression(screen);
        }
    }

    fn process_display_rotation_change(&self, screen: &SharedScreen) {
        let (screen_id, rotation) = {
            let screen = screen.read();
            (screen.dms_id, screen.rotation)
        };
        let rotated = self.with_registry(|r| {
            let id = r.display_id_by_screen(screen_id)?;
            let display = r.displays.get_mut(&id)?;
            Some((id, display.request_rotation(rotation)))
        });
        let Some((display_id, rotated)) = rotated else {
            debug!("no display for rotated screen {}", screen_id);
            return;
        };
        if !rotated {
            debug!("display {} already at {:?}", display_id, rotation);
            return;
        }
        self.notify_state_change_default(display_id, DisplayStateChangeType::UpdateRotation);
        self.notify_agent_change(display_id, DisplayChangeEvent::UpdateRotation);
        self.process_display_compression(screen);
    }

    fn process_display_size_change(&self, screen: &SharedScreen) {
        let (screen_id, mode) = {
            let screen = screen.read();
            (screen.dms_id, screen.active_screen_mode())
        };
        let Some(mode) = mode else {
            error!("cannot get active mode of screen {}", screen_id);
            return;
        };
        let changed: Vec<DisplayId> = self.with_registry(|r| {
            r.displays
                .values_mut()
                .filter(|display| display.screen_id == screen_id)
                .filter_map(|display| {
                    let (width, height) = (mode.width as i32, mode.height as i32);
                    if display.width == width && display.height == height {
                        let display_id = display.id;
                        info!("keep display size. display:{}", display_id);
                        return None;
                    }
                    display.width = width;
                    display.height = height;
                    Some(display.id)
                })
                .collect()
        });
        for display_id in changed {
            self.notify_state_change_default(display_id, DisplayStateChangeType::SizeChange);
            self.notify_agent_change(display_id, DisplayChangeEvent::DisplaySizeChanged);
        }
    }

    fn process_virtual_pixel_ratio_change(&self, screen: &SharedScreen) {
        let (screen_id, ratio) = {
            let screen = screen.read();
            (screen.dms_id, screen.virtual_pixel_ratio)
        };
        let display_id = self.with_registry(|r| {
            let id = r.display_id_by_screen(screen_id)?;
            let display = r.displays.get_mut(&id)?;
            if (display.virtual_pixel_ratio - ratio).abs() < 1e-6 {
                return None;
            }
            display.virtual_pixel_ratio = ratio;
            Some(id)
        });
        let Some(display_id) = display_id else {
            debug!("no display density change for screen {}", screen_id);
            return;
        };
        self.notify_state_change_default(display_id, DisplayStateChangeType::VirtualPixelRatioChange);
        self.notify_agent_change(display_id, DisplayChangeEvent::DisplayVirtualPixelRatioChanged);
    }

    /// Shrink the default display away from waterfall edges while it is
    /// horizontal and restore it when it turns back.
    fn process_display_compression(&self, screen: &SharedScreen) {
        let (screen_id, mode) = {
            let screen = screen.read();
            (screen.dms_id, screen.active_screen_mode())
        };
        let Some(display_id) = self.with_registry(|r| r.display_id_by_screen(screen_id)) else {
            debug!("no display bound to screen {}, skip compression", screen_id);
            return;
        };
        let default_display_id = self.get_default_display_id();
        if display_id != default_display_id {
            return;
        }
        let config = &self.ctx.config().display;
        if !config.waterfall_compression_enabled || config.waterfall_compression_size_vp == 0 {
            debug!("waterfall compression not enabled");
            return;
        }
        let Some(mode) = mode else {
            return;
        };
        let size_vp = config.waterfall_compression_size_vp;
        let compressed = self.with_registry(|r| {
            let display = r.displays.get_mut(&display_id)?;
            let size_px = (size_vp as f32 * display.virtual_pixel_ratio) as u32;
            // must stay under a quarter of either side
            if size_px >= mode.height / 4 || size_px >= mode.width / 4 {
                warn!("invalid compression size {}px", size_px);
                return None;
            }
            let is_default_vertical = mode.height > mode.width;
            if display.rotation.is_horizontal() {
                if display.waterfall_compressed {
                    return None;
                }
                let full = if is_default_vertical { mode.width } else { mode.height };
                display.offset_x = 0;
                display.offset_y = size_px as i32;
                display.height = full as i32 - 2 * size_px as i32;
                display.waterfall_compressed = true;
            } else {
                if !display.waterfall_compressed {
                    return None;
                }
                display.offset_x = 0;
                display.offset_y = 0;
                let (width, height) = if is_default_vertical {
                    (mode.width, mode.height)
                } else {
                    (mode.height, mode.width)
                };
                display.width = width as i32;
                display.height = height as i32;
                display.waterfall_compressed = false;
            }
            Some(display.waterfall_compressed)
        });
        let Some(compressed) = compressed else {
            return;
        };
        info!("display {} waterfall compressed: {}", display_id, compressed);
        self.notify_state_change(default_display_id, display_id, DisplayStateChangeType::DisplayCompress);
        self.notify_agent_change(display_id, DisplayChangeEvent::DisplaySizeChanged);
    }

    // ========================================================================
    // Notifications
    // ========================================================================

    fn display_info(&self, display_id: DisplayId) -> Option<DisplayInfo> {
        self.with_registry(|r| r.displays.get(&display_id).map(|d| d.convert_to_display_info()))
    }

    fn notify_agent_create(&self, display_id: DisplayId) {
        if let Some(info) = self.display_info(display_id) {
            self.ctx.agent().on_display_create(info);
        }
    }

    fn notify_agent_destroy(&self, display_id: DisplayId) {
        self.ctx.agent().on_display_destroy(display_id);
    }

    fn notify_agent_change(&self, display_id: DisplayId, event: DisplayChangeEvent) {
        if let Some(info) = self.display_info(display_id) {
            self.ctx.agent().on_display_change(info, event);
        }
    }

    /// Only for the screen-callback path, where the screen controller lock
    /// is already held.
    fn notify_state_change_default(&self, display_id: DisplayId, change: DisplayStateChangeType) {
        let default_display_id = self.get_default_display_id();
        self.notify_state_change(default_display_id, display_id, change);
    }

    fn notify_state_change(
        &self,
        default_display_id: DisplayId,
        display_id: DisplayId,
        change: DisplayStateChangeType,
    ) {
        let Some(listener) = self.with_registry(|r| r.listener.clone()) else {
            return;
        };
        let Some(info) = self.display_info(display_id) else {
            return;
        };
        let group = self.get_all_display_info_of_group(&info);
        listener.on_display_state_change(default_display_id, info, group, change);
    }
}
